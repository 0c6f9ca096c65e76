//! Media engine implementations shipped with the crate.
//! Production hosts bring their own [MediaEngine](crate::core::engine::MediaEngine);
//! `DummyMediaEngine` is an in-memory engine for testing.

#[cfg(any(test, feature = "dummy"))]
mod dummy;

#[cfg(any(test, feature = "dummy"))]
pub use crate::connections::dummy::DummyFaults;
#[cfg(any(test, feature = "dummy"))]
pub use crate::connections::dummy::DummyMediaEngine;
#[cfg(any(test, feature = "dummy"))]
pub use crate::connections::dummy::DUMMY_LOCAL_CANDIDATES;

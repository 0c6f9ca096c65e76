//! The main concepts of this mod are:
//!
//! The [MediaEngine](engine::MediaEngine) trait is the contract with the host's
//! real-time media engine: session creation, offer/answer generation,
//! description and candidate application, local media acquisition and teardown.
//! See the [engine] module.
//!
//! The [DeviceCallback](callback::DeviceCallback) trait lets the owner of a device
//! observe what the engine reports asynchronously for a session: local ICE
//! candidates, connection state changes and remote tracks. See the [callback] module.
//!
//! Plain data exchanged across both traits lives in the [media] module.

pub mod callback;
pub mod engine;
pub mod media;

#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
pub mod comm;
pub mod config;
pub mod consts;
pub mod error;
pub mod field;
pub mod identity;
pub mod logging;
pub mod message;

pub use comm::callback::CommCallback;
pub use comm::callback::CommEvent;
pub use comm::record::CallRecord;
pub use comm::record::CallState;
pub use comm::record::CallTarget;
pub use comm::MultipointComm;
pub use comm::MultipointCommBuilder;
pub use multipoint_transport;

#[cfg(test)]
mod tests;

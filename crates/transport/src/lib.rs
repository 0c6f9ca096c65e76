#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
pub mod callback;
pub mod connections;
pub mod core;
pub mod device;
pub mod error;
pub mod ice_server;

//! Error of multipoint_core
#![allow(missing_docs)]

use multipoint_transport::error::Error as TransportError;

/// A wrap `Result` contains custom errors.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to the host application.
/// Every kind has a stable numeric [code](Error::code).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    #[error("Local identity is not available")]
    Uninitialized,

    #[error("Contact not found: {0}")]
    NoContact(String),

    #[error("Communication field not found: {0}")]
    NoCommField(String),

    #[error("Group state error: {0}")]
    GroupStateError(String),

    #[error("Server fault: {0}")]
    ServerFault(String),

    #[error("Caller is busy with another call")]
    CallerBusy,

    #[error("Callee is busy with another call")]
    CalleeBusy,

    #[error("Transport device is already negotiating")]
    ConnRepeated,

    #[error("Media permission denied: {0}")]
    MediaPermissionDenied(String),

    #[error("Create offer failed: {0}")]
    CreateOfferFailed(String),

    #[error("Create answer failed: {0}")]
    CreateAnswerFailed(String),

    #[error("Local description fault: {0}")]
    LocalDescriptionFault(String),

    #[error("Remote description fault: {0}")]
    RemoteDescriptionFault(String),

    #[error("Peer connection error: {0}")]
    RTCPeerError(String),

    #[error("Signaling error: {0}")]
    SignalingError(String),

    #[error("Data structure error: {0}")]
    DataStructureError(String),

    #[error("Unsupported signaling: {0}")]
    UnsupportedSignaling(String),

    #[error("Video element is not set")]
    VideoElementNotSetting,

    #[error("Config file error: {0}")]
    ConfigFile(String),

    #[error("Invalid logging level: {0}")]
    InvalidLoggingLevel(String),
}

impl Error {
    /// Stable numeric code for host interop.
    pub fn code(&self) -> u32 {
        match self {
            Error::Uninitialized => 1001,
            Error::NoContact(_) => 1002,
            Error::NoCommField(_) => 1003,
            Error::GroupStateError(_) => 1004,
            Error::ServerFault(_) => 1005,
            Error::ConfigFile(_) => 1006,
            Error::InvalidLoggingLevel(_) => 1007,
            Error::CallerBusy => 2001,
            Error::CalleeBusy => 2002,
            Error::ConnRepeated => 2003,
            Error::MediaPermissionDenied(_) => 3001,
            Error::CreateOfferFailed(_) => 3002,
            Error::CreateAnswerFailed(_) => 3003,
            Error::LocalDescriptionFault(_) => 3004,
            Error::RemoteDescriptionFault(_) => 3005,
            Error::RTCPeerError(_) => 3006,
            Error::SignalingError(_) => 4001,
            Error::DataStructureError(_) => 4002,
            Error::UnsupportedSignaling(_) => 4003,
            Error::VideoElementNotSetting => 5001,
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::ConnRepeated(_) => Error::ConnRepeated,
            TransportError::MediaPermissionDenied(s) => Error::MediaPermissionDenied(s),
            TransportError::CreateOfferFailed(s) => Error::CreateOfferFailed(s),
            TransportError::CreateAnswerFailed(s) => Error::CreateAnswerFailed(s),
            TransportError::LocalDescriptionFault(s) => Error::LocalDescriptionFault(s),
            TransportError::RemoteDescriptionFault(s) => Error::RemoteDescriptionFault(s),
            TransportError::IceServer(e) => Error::ConfigFile(e.to_string()),
            other => Error::RTCPeerError(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::DataStructureError(e.to_string())
    }
}

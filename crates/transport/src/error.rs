#![allow(missing_docs)]

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum IceServerError {
    #[error("Url parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Ice server scheme {0} has not supported yet")]
    SchemeNotSupported(String),

    #[error("Cannot extract host from url")]
    UrlMissHost,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("IceServer error: {0}")]
    IceServer(#[from] IceServerError),

    #[error("Device {0} is already negotiating")]
    ConnRepeated(u64),

    #[error("Local media permission denied: {0}")]
    MediaPermissionDenied(String),

    #[error("Create offer failed: {0}")]
    CreateOfferFailed(String),

    #[error("Create answer failed: {0}")]
    CreateAnswerFailed(String),

    #[error("Set local description failed: {0}")]
    LocalDescriptionFault(String),

    #[error("Set remote description failed: {0}")]
    RemoteDescriptionFault(String),

    #[error("Peer connection error: {0}")]
    RTCPeerError(String),

    #[error("Device {0} is closed")]
    DeviceClosed(u64),

    #[error("Device {0} is in wrong state: {1}")]
    InvalidDeviceState(u64, String),

    /// Raw failure reported by the media engine, before the device classifies it.
    #[error("Media engine error: {0}")]
    Engine(String),
}

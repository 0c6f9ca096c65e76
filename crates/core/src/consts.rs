//! Constant variables.

/// Name of the server side service every signaling is addressed to.
pub const SIGNALING_DESTINATION: &str = "MultipointComm";
/// default call timeout in ms
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 30 * 1000;
/// The callee arms its timer this much shorter, the caller's timer started earlier.
pub const DEFAULT_CALL_TIMEOUT_GUARD_MS: u64 = 5 * 1000;
/// default timeout of one signaling round trip in ms
pub const DEFAULT_SIGNALING_TIMEOUT_MS: u64 = 10 * 1000;
/// Used when the host configures no ICE server.
pub const DEFAULT_ICE_SERVERS: &str = "stun://stun.l.google.com:19302";
/// kbps
pub const DEFAULT_VIDEO_BANDWIDTH: u32 = 800;
/// kbps
pub const DEFAULT_AUDIO_BANDWIDTH: u32 = 64;
/// Response code of a successful signaling round trip.
pub const RESPONSE_OK: u32 = 0;

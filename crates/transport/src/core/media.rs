//! Media level data types: negotiation payloads, constraints and handles.
//! SDP and candidate strings are opaque here, only the engine interprets them.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::ice_server::IceServer;

/// Direction of the media a device negotiates.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DeviceMode {
    /// Publish local media and receive remote media.
    SendRecv,
    /// Publish local media only.
    SendOnly,
    /// Receive remote media only, never touches local capture.
    RecvOnly,
}

impl DeviceMode {
    /// Devices in this mode own an outbound stream.
    pub fn is_sending(&self) -> bool {
        !matches!(self, DeviceMode::RecvOnly)
    }
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceMode::SendRecv => "sendrecv",
            DeviceMode::SendOnly => "sendonly",
            DeviceMode::RecvOnly => "recvonly",
        };
        f.write_str(s)
    }
}

/// Preset capture sizes.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoDimension {
    /// 320x240
    QVGA,
    /// 640x480
    VGA,
    /// 1280x720
    HD,
    /// 1920x1080
    FullHD,
}

impl VideoDimension {
    /// Width in pixels.
    pub fn width(&self) -> u32 {
        match self {
            VideoDimension::QVGA => 320,
            VideoDimension::VGA => 640,
            VideoDimension::HD => 1280,
            VideoDimension::FullHD => 1920,
        }
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        match self {
            VideoDimension::QVGA => 240,
            VideoDimension::VGA => 480,
            VideoDimension::HD => 720,
            VideoDimension::FullHD => 1080,
        }
    }
}

/// Which media a party asks for.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MediaConstraint {
    /// Audio requested.
    pub audio: bool,
    /// Video requested.
    pub video: bool,
    /// Capture size when video is requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_dimension: Option<VideoDimension>,
}

impl MediaConstraint {
    /// Create a constraint without a preferred dimension.
    pub fn new(video: bool, audio: bool) -> Self {
        Self {
            audio,
            video,
            video_dimension: None,
        }
    }

    /// Audio only call.
    pub fn audio_only() -> Self {
        Self::new(false, true)
    }

    /// Audio and video call.
    pub fn audio_video() -> Self {
        Self::new(true, true)
    }

    /// Set the preferred capture size.
    pub fn with_dimension(mut self, dimension: VideoDimension) -> Self {
        self.video_dimension = Some(dimension);
        self
    }
}

impl Default for MediaConstraint {
    fn default() -> Self {
        Self::audio_only()
    }
}

/// Kind of an SDP payload.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    #[allow(missing_docs)]
    Offer,
    #[allow(missing_docs)]
    Answer,
    #[allow(missing_docs)]
    Pranswer,
    #[allow(missing_docs)]
    Rollback,
}

/// A session description, `{type, sdp}` on the wire.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    /// Offer or answer.
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    /// Opaque SDP text.
    pub sdp: String,
}

impl SessionDescription {
    /// Wrap an offer.
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Wrap an answer.
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// One ICE candidate as exchanged between peers.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    /// Candidate attribute line.
    pub candidate: String,
    /// Media stream identification tag.
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Index of the m-line the candidate belongs to.
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    /// Candidate for the first m-line.
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
        }
    }
}

/// Opaque handle of one engine session (peer connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionHandle(pub u64);

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Media track kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    #[allow(missing_docs)]
    Audio,
    #[allow(missing_docs)]
    Video,
}

/// Handle of a local or remote media stream owned by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaStream {
    /// Engine assigned stream id.
    pub id: String,
    /// The stream carries an audio track.
    pub audio: bool,
    /// The stream carries a video track.
    pub video: bool,
}

impl MediaStream {
    /// Whether the stream carries a track of `kind`.
    pub fn has_track(&self, kind: TrackKind) -> bool {
        match kind {
            TrackKind::Audio => self.audio,
            TrackKind::Video => self.video,
        }
    }
}

/// Connectivity of an engine session, as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaConnectionState {
    /// Unspecified.
    #[default]
    Unspecified,
    /// Created, nothing exchanged yet.
    New,
    /// ICE/DTLS in progress.
    Connecting,
    /// Media flows.
    Connected,
    /// Connectivity lost, may recover.
    Disconnected,
    /// Connectivity failed for good.
    Failed,
    /// Session closed.
    Closed,
}

/// What the engine needs to create a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Serial of the device that owns the session.
    pub serial: u64,
    /// Media direction.
    pub mode: DeviceMode,
    /// STUN/TURN servers.
    pub ice_servers: Vec<IceServer>,
}

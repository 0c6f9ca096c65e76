use serde::Deserialize;
use serde::Serialize;

use crate::identity::Device;
use crate::identity::Identity;

/// Compute the Keccak-256 hash of input bytes.
fn keccak256(bytes: &[u8]) -> [u8; 32] {
    use tiny_keccak::Hasher;
    use tiny_keccak::Keccak;
    let mut output = [0u8; 32];
    let mut hasher = Keccak::v256();
    hasher.update(bytes);
    hasher.finalize(&mut output);
    output
}

/// Deterministic endpoint id of an identity signed in on a device.
pub fn endpoint_id(identity: &Identity, device: &Device) -> String {
    let seed = format!(
        "{}@{}#{}#{}",
        identity.id, identity.domain, device.name, device.platform
    );
    hex::encode(&keccak256(seed.as_bytes())[..16])
}

/// Lifecycle of an endpoint inside a field.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndpointState {
    /// Present, no media negotiated yet.
    #[default]
    Normal,
    /// Negotiation in progress.
    Calling,
    /// In another call.
    Busy,
    /// Media flows.
    CallConnected,
    /// Left the call.
    CallBye,
    /// Reported by a newer server.
    Unknown,
}

/// One participant device inside one field.
///
/// `video_enabled`/`audio_enabled` tell what the endpoint can publish,
/// the `*_stream_enabled` flags whether that stream is currently unmuted.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CommFieldEndpoint {
    /// Server assigned or derived from identity and device.
    pub id: String,
    /// Who this endpoint is.
    pub identity: Identity,
    /// The device the identity joined with.
    pub device: Device,
    /// Call progress of this endpoint.
    #[serde(default)]
    pub state: EndpointState,
    /// Can publish video.
    #[serde(default)]
    pub video_enabled: bool,
    /// Can publish audio.
    #[serde(default = "enabled")]
    pub audio_enabled: bool,
    /// Video is unmuted.
    #[serde(default = "enabled")]
    pub video_stream_enabled: bool,
    /// Audio is unmuted.
    #[serde(default = "enabled")]
    pub audio_stream_enabled: bool,
    /// kbps
    #[serde(default)]
    pub video_bandwidth: u32,
    /// kbps
    #[serde(default)]
    pub audio_bandwidth: u32,
}

fn enabled() -> bool {
    true
}

impl CommFieldEndpoint {
    /// Endpoint with the id derived from `identity` and `device`.
    pub fn new(identity: Identity, device: Device) -> Self {
        let id = endpoint_id(&identity, &device);
        Self::with_id(id, identity, device)
    }

    /// Endpoint with a server assigned id.
    pub fn with_id(id: impl Into<String>, identity: Identity, device: Device) -> Self {
        Self {
            id: id.into(),
            identity,
            device,
            state: EndpointState::Normal,
            video_enabled: false,
            audio_enabled: true,
            video_stream_enabled: true,
            audio_stream_enabled: true,
            video_bandwidth: 0,
            audio_bandwidth: 0,
        }
    }

    /// Set the announced bandwidth in kbps.
    pub fn with_bandwidth(mut self, video_kbps: u32, audio_kbps: u32) -> Self {
        self.video_bandwidth = video_kbps;
        self.audio_bandwidth = audio_kbps;
        self
    }
}

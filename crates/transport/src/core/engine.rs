use std::sync::Arc;

use async_trait::async_trait;

use crate::callback::InnerDeviceCallback;
use crate::core::media::IceCandidate;
use crate::core::media::MediaConstraint;
use crate::core::media::MediaStream;
use crate::core::media::SessionConfig;
use crate::core::media::SessionDescription;
use crate::core::media::SessionHandle;
use crate::core::media::TrackKind;
use crate::error::Result;

/// The contract with the host's real-time media engine.
///
/// Every method maps onto one primitive of an ICE/SDP capable peer connection.
/// Implementations report failures as [Error::Engine](crate::error::Error::Engine)
/// (or [Error::MediaPermissionDenied](crate::error::Error::MediaPermissionDenied) for capture),
/// the calling [RTCDevice](crate::device::RTCDevice) classifies them.
///
/// Asynchronous engine events (gathered candidates, connectivity, remote tracks)
/// are delivered through the callback passed to [MediaEngine::create_session].
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Create a new session (peer connection) and bind its event callback.
    async fn create_session(
        &self,
        config: SessionConfig,
        callback: Arc<InnerDeviceCallback>,
    ) -> Result<SessionHandle>;

    /// Generate an offer for the session.
    async fn create_offer(
        &self,
        handle: SessionHandle,
        constraint: &MediaConstraint,
    ) -> Result<SessionDescription>;

    /// Generate an answer to `offer`, which is already applied as remote description.
    async fn create_answer(
        &self,
        handle: SessionHandle,
        offer: &SessionDescription,
        constraint: &MediaConstraint,
    ) -> Result<SessionDescription>;

    /// Apply the local description.
    async fn set_local_description(
        &self,
        handle: SessionHandle,
        description: &SessionDescription,
    ) -> Result<()>;

    /// Apply the remote description.
    async fn set_remote_description(
        &self,
        handle: SessionHandle,
        description: &SessionDescription,
    ) -> Result<()>;

    /// Apply one remote ICE candidate.
    async fn add_ice_candidate(&self, handle: SessionHandle, candidate: &IceCandidate)
        -> Result<()>;

    /// Open local capture devices according to `constraint`.
    async fn acquire_local_media(&self, constraint: &MediaConstraint) -> Result<MediaStream>;

    /// Attach a local stream to the session so its tracks are sent.
    async fn attach_stream(&self, handle: SessionHandle, stream: &MediaStream) -> Result<()>;

    /// Stop the capture behind a local stream.
    async fn release_local_media(&self, stream: &MediaStream) -> Result<()>;

    /// Toggle the `enabled` flag of one track of a stream.
    fn set_track_enabled(&self, stream: &MediaStream, kind: TrackKind, enabled: bool);

    /// Close the session. Closing an unknown or closed session is not an error.
    async fn close(&self, handle: SessionHandle) -> Result<()>;
}

/// The [MediaEngine] trait object shared by all devices of a controller.
pub type SharedMediaEngine = Arc<dyn MediaEngine>;

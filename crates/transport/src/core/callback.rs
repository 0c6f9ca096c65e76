use std::sync::Arc;

use async_trait::async_trait;

use crate::core::media::IceCandidate;
use crate::core::media::MediaConnectionState;
use crate::core::media::MediaStream;

type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Any object that implements this trait can observe the engine events of a device.
/// The `serial` argument is the serial number of the device the session belongs to.
#[async_trait]
pub trait DeviceCallback {
    /// A local ICE candidate was gathered and should be signaled to the remote side.
    async fn on_ice_candidate(
        &self,
        _serial: u64,
        _candidate: IceCandidate,
    ) -> Result<(), CallbackError> {
        Ok(())
    }

    /// The connectivity of the session changed.
    async fn on_connection_state_change(
        &self,
        _serial: u64,
        _state: MediaConnectionState,
    ) -> Result<(), CallbackError> {
        Ok(())
    }

    /// A remote stream arrived on the session.
    async fn on_track(&self, _serial: u64, _stream: MediaStream) -> Result<(), CallbackError> {
        Ok(())
    }
}

/// The [DeviceCallback] trait object shared between a device and its engine session.
pub type SharedDeviceCallback = Arc<dyn DeviceCallback + Send + Sync>;

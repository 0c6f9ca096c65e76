//! This module contains the [InnerDeviceCallback] struct.

use crate::core::callback::SharedDeviceCallback;
use crate::core::media::IceCandidate;
use crate::core::media::MediaConnectionState;
use crate::core::media::MediaStream;

/// [InnerDeviceCallback] wraps the [SharedDeviceCallback] with inner handling for a specific device.
/// The media engine only ever sees this wrapper, so a failing user callback is logged
/// instead of tearing down the engine's event loop.
pub struct InnerDeviceCallback {
    /// The serial number of the device to which the current callback is assigned.
    pub serial: u64,
    callback: SharedDeviceCallback,
}

impl InnerDeviceCallback {
    /// Create a new [InnerDeviceCallback].
    pub fn new(serial: u64, callback: SharedDeviceCallback) -> Self {
        Self { serial, callback }
    }

    /// This method is invoked when the engine gathered a local ICE candidate.
    pub async fn on_ice_candidate(&self, candidate: IceCandidate) {
        tracing::trace!("device {} gathered candidate {:?}", self.serial, candidate);
        if let Err(e) = self
            .callback
            .on_ice_candidate(self.serial, candidate)
            .await
        {
            tracing::error!("Callback on_ice_candidate failed: {e:?}");
        }
    }

    /// This method is invoked when the state of the session has changed.
    pub async fn on_connection_state_change(&self, state: MediaConnectionState) {
        tracing::debug!("device {} connection state: {:?}", self.serial, state);
        if let Err(e) = self
            .callback
            .on_connection_state_change(self.serial, state)
            .await
        {
            tracing::error!("Callback on_connection_state_change failed: {e:?}");
        }
    }

    /// This method is invoked when a remote stream arrives.
    pub async fn on_track(&self, stream: MediaStream) {
        if let Err(e) = self.callback.on_track(self.serial, stream).await {
            tracing::error!("Callback on_track failed: {e:?}");
        }
    }
}

use async_trait::async_trait;
use multipoint_transport::core::callback::DeviceCallback;
use multipoint_transport::core::media::IceCandidate;
use multipoint_transport::core::media::MediaConnectionState;
use multipoint_transport::core::media::MediaStream;
use tokio::sync::mpsc::UnboundedSender;

use crate::message::Signaling;

type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Everything a [MultipointComm](crate::comm::MultipointComm) reacts to,
/// funneled through one channel and handled in arrival order.
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub enum FieldEvent {
    /// Signaling pushed by the server.
    Signaling(Box<Signaling>),
    /// A device of a field gathered a local candidate.
    LocalCandidate {
        field_id: String,
        serial: u64,
        candidate: IceCandidate,
    },
    /// The engine reported a new connection state for a device.
    ConnectionState {
        field_id: String,
        serial: u64,
        state: MediaConnectionState,
    },
    /// A remote stream arrived on a device.
    Track {
        field_id: String,
        serial: u64,
        stream: MediaStream,
    },
    /// The call timer of record `seq` fired.
    CallTimeout { seq: u64 },
    /// A private field with no call may be forgotten.
    ReapField { field_id: String, mark: u64 },
}

/// Sender side of the controller channel.
pub type FieldEventSender = UnboundedSender<FieldEvent>;

/// The only callback a field registers on its devices.
/// It forwards engine events, tagged with the field id, into the controller's channel.
pub struct FieldDeviceCallback {
    field_id: String,
    events: FieldEventSender,
}

impl FieldDeviceCallback {
    /// Callback tagging events with `field_id`.
    pub fn new(field_id: String, events: FieldEventSender) -> Self {
        Self { field_id, events }
    }

    fn send(&self, event: FieldEvent) -> Result<(), CallbackError> {
        self.events.send(event).map_err(|e| e.to_string().into())
    }
}

#[async_trait]
impl DeviceCallback for FieldDeviceCallback {
    async fn on_ice_candidate(
        &self,
        serial: u64,
        candidate: IceCandidate,
    ) -> Result<(), CallbackError> {
        self.send(FieldEvent::LocalCandidate {
            field_id: self.field_id.clone(),
            serial,
            candidate,
        })
    }

    async fn on_connection_state_change(
        &self,
        serial: u64,
        state: MediaConnectionState,
    ) -> Result<(), CallbackError> {
        self.send(FieldEvent::ConnectionState {
            field_id: self.field_id.clone(),
            serial,
            state,
        })
    }

    async fn on_track(&self, serial: u64, stream: MediaStream) -> Result<(), CallbackError> {
        self.send(FieldEvent::Track {
            field_id: self.field_id.clone(),
            serial,
            stream,
        })
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use multipoint_transport::core::media::MediaStream;

use crate::comm::record::CallRecord;
use crate::error::Error;
use crate::field::callback::FieldEvent;
use crate::field::callback::FieldEventSender;
use crate::field::endpoint::CommFieldEndpoint;
use crate::identity::Identity;
use crate::message::FieldDescriptor;
use crate::message::Signaling;
use crate::message::SignalingHandler;

type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// The [MultipointComm](super::MultipointComm) accepts shared [CommCallback] trait object.
pub type SharedCommCallback = Arc<dyn CommCallback + Send + Sync>;

/// Used to notify the application of what happens to calls and conferences.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum CommEvent {
    /// An offer arrived, answer with `answer_call` or reject with `hangup_call`.
    NewCall(CallRecord),
    /// An outbound call or join started.
    InProgress(CallRecord),
    /// The callee was notified.
    Ringing(CallRecord),
    /// The call is negotiated.
    Connected(CallRecord),
    /// The call ended, locally or remotely.
    Bye(CallRecord),
    /// The callee rejected the call as busy.
    Busy(CallRecord),
    /// Nobody answered in time.
    Timeout(CallRecord),
    /// The call failed.
    Failed {
        /// The failed call.
        record: CallRecord,
        /// Why.
        error: Error,
    },
    /// An endpoint joined the active conference.
    Arrived {
        /// The conference.
        field_id: String,
        /// Who joined.
        endpoint: CommFieldEndpoint,
    },
    /// An endpoint left the active conference.
    Left {
        /// The conference.
        field_id: String,
        /// Who left.
        endpoint: CommFieldEndpoint,
    },
    /// This client was invited into a conference.
    Invited {
        /// The conference to join.
        field: FieldDescriptor,
        /// Who invited.
        inviter: Identity,
    },
    /// A receive only leg to a conference endpoint is negotiated.
    Followed {
        /// Conference the leg belongs to.
        field_id: String,
        /// Endpoint the leg receives from.
        endpoint: CommFieldEndpoint,
    },
    /// A receive only leg was closed.
    Revoked {
        /// Conference the leg belonged to.
        field_id: String,
        /// Endpoint the leg received from.
        endpoint: CommFieldEndpoint,
    },
    /// A device connected its media.
    MediaConnected {
        /// Field of the device.
        field_id: String,
        /// Serial of the device.
        serial: u64,
    },
    /// A device lost its media.
    MediaDisconnected {
        /// Field of the device.
        field_id: String,
        /// Serial of the device.
        serial: u64,
    },
    /// Remote media to render. `endpoint_id` is absent on private fields.
    RemoteStream {
        /// Field of the stream.
        field_id: String,
        /// Endpoint the stream comes from.
        endpoint_id: Option<String>,
        /// The stream.
        stream: MediaStream,
    },
}

/// Any object that implements this trait can be used as a callback for the controller.
#[async_trait]
pub trait CommCallback {
    /// This method is invoked for every [CommEvent], in order.
    async fn on_event(&self, _event: &CommEvent) -> Result<(), CallbackError> {
        Ok(())
    }
}

/// Registered on the [SignalingTransport](crate::message::SignalingTransport),
/// queues inbound signaling for the controller's listen loop.
pub struct SignalingInbox {
    events: FieldEventSender,
}

impl SignalingInbox {
    /// Inbox forwarding into `events`.
    pub fn new(events: FieldEventSender) -> Self {
        Self { events }
    }
}

#[async_trait]
impl SignalingHandler for SignalingInbox {
    async fn on_signaling(&self, signaling: Signaling) {
        if let Err(e) = self.events.send(FieldEvent::Signaling(Box::new(signaling))) {
            tracing::error!("Failed to queue inbound signaling: {}", e);
        }
    }
}

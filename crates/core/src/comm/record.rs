use std::sync::Arc;

use chrono::DateTime;
use chrono::Utc;
use multipoint_transport::core::media::MediaConstraint;
use multipoint_transport::core::media::SessionDescription;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::field::endpoint::CommFieldEndpoint;
use crate::field::CommField;
use crate::identity::Group;
use crate::identity::Identity;
use crate::message::FieldDescriptor;

/// State of a [CallRecord].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Reserved, nothing sent yet.
    Idle,
    /// `ApplyCall`/`ApplyJoin` round trip in flight.
    Proposing,
    /// Offer sent, timer armed.
    AwaitingAnswer,
    /// The peer was notified. On the callee side, waiting for the host to answer.
    Ringing,
    /// Media negotiated.
    Connected,
    /// Hung up or timed out.
    Ended,
    /// Rejected by a busy callee.
    Busy,
    /// Setup failed, see [CallRecord::last_error].
    Failed,
}

impl CallState {
    /// States the call timer guards.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            CallState::Proposing | CallState::AwaitingAnswer | CallState::Ringing
        )
    }

    /// No transition leaves these states.
    pub fn is_final(&self) -> bool {
        matches!(self, CallState::Ended | CallState::Busy | CallState::Failed)
    }
}

/// What [make_call](crate::comm::MultipointComm::make_call) is asked to reach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTarget {
    /// A 1:1 call.
    Identity(Identity),
    /// Join the conference of a group, creating it when the group has none.
    Group(Group),
    /// Join a known conference field.
    Field(FieldDescriptor),
    /// Follow one endpoint of the active conference.
    Endpoint(CommFieldEndpoint),
}

/// The call level state exposed to the host.
#[derive(Debug, Clone)]
pub struct CallRecord {
    /// Identifies the record among all records of a controller.
    pub seq: u64,
    /// Identity this client is signed in as.
    pub local: Identity,
    /// Remote party of a private call.
    pub peer: Option<Identity>,
    /// Field of the call, once created.
    pub field: Option<Arc<CommField>>,
    /// This client placed the call.
    pub outgoing: bool,
    /// Current state.
    pub state: CallState,
    /// When the record was reserved.
    pub start_time: DateTime<Utc>,
    /// When media got negotiated.
    pub answer_time: Option<DateTime<Utc>>,
    /// When the call ended.
    pub end_time: Option<DateTime<Utc>>,
    /// Constraint of the offer.
    pub caller_constraint: Option<MediaConstraint>,
    /// Constraint of the answer.
    pub callee_constraint: Option<MediaConstraint>,
    /// Why the call failed.
    pub last_error: Option<Error>,
    pub(crate) offer: Option<SessionDescription>,
    pub(crate) timer: Option<CancellationToken>,
}

impl CallRecord {
    pub(crate) fn new(seq: u64, local: Identity, outgoing: bool) -> Self {
        Self {
            seq,
            local,
            peer: None,
            field: None,
            outgoing,
            state: CallState::Idle,
            start_time: Utc::now(),
            answer_time: None,
            end_time: None,
            caller_constraint: None,
            callee_constraint: None,
            last_error: None,
            offer: None,
            timer: None,
        }
    }

    /// The field exists and holds at least one device.
    pub fn is_active(&self) -> bool {
        self.field
            .as_ref()
            .map(|f| f.num_devices() > 0)
            .unwrap_or(false)
    }

    /// Id of the call field.
    pub fn field_id(&self) -> Option<&str> {
        self.field.as_ref().map(|f| f.id())
    }

    /// The call field is private.
    pub fn is_private(&self) -> bool {
        self.field
            .as_ref()
            .map(|f| f.is_private())
            .unwrap_or(true)
    }

    /// Whether an incoming offer waits for the host's answer.
    pub fn has_pending_offer(&self) -> bool {
        self.offer.is_some()
    }

    pub(crate) fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }
}

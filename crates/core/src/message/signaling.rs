use std::sync::Arc;

use async_trait::async_trait;
use multipoint_transport::core::media::IceCandidate;
use multipoint_transport::core::media::MediaConstraint;
use multipoint_transport::core::media::SessionDescription;
use serde::Deserialize;
use serde::Serialize;

use crate::consts::RESPONSE_OK;
use crate::error::Error;
use crate::error::Result;
use crate::field::endpoint::CommFieldEndpoint;
use crate::identity::Device;
use crate::identity::Identity;

/// Action of a [Signaling].
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalingAction {
    /// Session offer of a private call.
    Offer,
    /// Answer to an offer.
    Answer,
    /// Hang up a private call.
    Bye,
    /// Callee is in another call.
    Busy,
    /// ICE candidates.
    Candidate,
    /// Callee got the offer.
    Ringing,
    /// Ask the server to place a private call.
    ApplyCall,
    /// Ask the server to join a conference.
    ApplyJoin,
    /// Leave a conference.
    ApplyTerminate,
    /// Create the conference of a group.
    CreateField,
    /// Look up the conference of a group.
    GetField,
    /// Close a receive only leg.
    Revoke,
    /// Invite identities into a conference.
    Invite,
    /// An endpoint joined a conference.
    Arrived,
    /// An endpoint left a conference.
    Left,
    /// Any action this client does not know. Decoded, then ignored.
    #[serde(other)]
    Unknown,
}

/// Compact description of a field, enough to create it on a receiver that never saw it.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    /// Field id. The founder id for private fields.
    pub id: String,
    /// Identity that created the field.
    pub founder_id: String,
    /// A 1:1 call rather than a conference.
    pub is_private: bool,
    /// Media the field was opened with.
    #[serde(default)]
    pub media_constraint: MediaConstraint,
    /// Endpoints known to the sender.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<CommFieldEndpoint>,
    /// Caller of a private field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller: Option<Identity>,
    /// Callee of a private field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callee: Option<Identity>,
    /// Group a conference field belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

/// The signaling wire unit.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Signaling {
    /// What to do.
    pub action: SignalingAction,
    /// The field it applies to.
    pub field: FieldDescriptor,
    /// Who sent it.
    pub sender_identity: Identity,
    /// The device it was sent from.
    pub sender_device: Device,
    /// Absent: addressed to the default outbound leg.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<CommFieldEndpoint>,
    /// Offer or answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<SessionDescription>,
    /// A single candidate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<IceCandidate>,
    /// A batch of candidates.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<IceCandidate>,
    /// Media of an offer or answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_constraint: Option<MediaConstraint>,
    /// Caller of a private call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller: Option<Identity>,
    /// Callee of a private call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callee: Option<Identity>,
    /// Identities asked to join, `Invite` only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub invitees: Vec<Identity>,
}

impl Signaling {
    /// Signaling of `action` on `field`, carrying its caller and callee.
    pub fn new(
        action: SignalingAction,
        field: FieldDescriptor,
        sender_identity: Identity,
        sender_device: Device,
    ) -> Self {
        let caller = field.caller.clone();
        let callee = field.callee.clone();
        Self {
            action,
            field,
            sender_identity,
            sender_device,
            target: None,
            description: None,
            candidate: None,
            candidates: vec![],
            media_constraint: None,
            caller,
            callee,
            invitees: vec![],
        }
    }

    /// Address one leg.
    pub fn with_target(mut self, target: Option<CommFieldEndpoint>) -> Self {
        self.target = target;
        self
    }

    /// Attach a session description.
    pub fn with_description(mut self, description: SessionDescription) -> Self {
        self.description = Some(description);
        self
    }

    /// Attach one candidate.
    pub fn with_candidate(mut self, candidate: IceCandidate) -> Self {
        self.candidate = Some(candidate);
        self
    }

    /// Attach a media constraint.
    pub fn with_media_constraint(mut self, constraint: MediaConstraint) -> Self {
        self.media_constraint = Some(constraint);
        self
    }

    /// Attach the identities to invite.
    pub fn with_invitees(mut self, invitees: Vec<Identity>) -> Self {
        self.invitees = invitees;
        self
    }

    /// `candidate` followed by `candidates`, in order.
    pub fn all_candidates(&self) -> impl Iterator<Item = &IceCandidate> {
        self.candidate.iter().chain(self.candidates.iter())
    }

    /// Encode as JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from JSON.
    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

/// What the server answers to every signaling.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SignalingResponse {
    /// Zero on success.
    pub code: u32,
    /// The server's authoritative view of the field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<FieldDescriptor>,
    /// Why the request failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SignalingResponse {
    /// Success, optionally with the field.
    pub fn ok(field: Option<FieldDescriptor>) -> Self {
        Self {
            code: RESPONSE_OK,
            field,
            reason: None,
        }
    }

    /// Failure carrying the code of `error`.
    pub fn error(error: &Error) -> Self {
        Self {
            code: error.code(),
            field: None,
            reason: Some(error.to_string()),
        }
    }

    /// The request succeeded.
    pub fn is_ok(&self) -> bool {
        self.code == RESPONSE_OK
    }

    /// Map a failure code back onto the module error it stands for.
    pub fn into_result(self) -> Result<Self> {
        if self.is_ok() {
            return Ok(self);
        }
        let reason = self.reason.clone().unwrap_or_default();
        let err = match self.code {
            c if c == Error::CalleeBusy.code() => Error::CalleeBusy,
            c if c == Error::CallerBusy.code() => Error::CallerBusy,
            c if c == Error::NoContact(String::new()).code() => Error::NoContact(reason),
            c if c == Error::NoCommField(String::new()).code() => Error::NoCommField(reason),
            c if c == Error::GroupStateError(String::new()).code() => {
                Error::GroupStateError(reason)
            }
            c => Error::ServerFault(format!("code {c}: {reason}")),
        };
        Err(err)
    }
}

/// Contract with the channel that carries signaling to the server.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Send one signaling and wait for the server's response.
    /// Timeouts are applied by the caller.
    async fn send(&self, destination: &str, signaling: &Signaling) -> Result<SignalingResponse>;

    /// Register the receiver of signaling pushed by the server.
    fn on_message(&self, handler: SharedSignalingHandler);
}

/// Shared [SignalingTransport] trait object.
pub type SharedSignalingTransport = Arc<dyn SignalingTransport>;

/// Receiver of inbound signaling.
#[async_trait]
pub trait SignalingHandler: Send + Sync {
    /// Called once per inbound signaling, in arrival order.
    async fn on_signaling(&self, signaling: Signaling);
}

/// Shared [SignalingHandler] trait object.
pub type SharedSignalingHandler = Arc<dyn SignalingHandler>;

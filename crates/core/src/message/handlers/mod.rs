#![warn(missing_docs)]
//! Handlers of signaling pushed by the server.
//!
//! Every handler runs on the controller's listen loop. A handler that suspends re-checks
//! the call record by seq before it mutates it, since the host may hang up meanwhile.

use crate::comm::MultipointComm;
use crate::error::Result;
use crate::message::Signaling;
use crate::message::SignalingAction;

/// Offer, Answer, Bye, Busy and Ringing.
pub mod call;
/// Remote ICE candidates.
pub mod candidate;
/// Conference roster changes, Revoke and Invite.
pub mod roster;

impl MultipointComm {
    /// Route one inbound signaling to its handler. Unknown actions are ignored.
    pub async fn handle_signaling(&self, signaling: &Signaling) -> Result<()> {
        tracing::debug!(
            "received {:?} of field {} from {}",
            signaling.action,
            signaling.field.id,
            signaling.sender_identity.id
        );

        match signaling.action {
            SignalingAction::Offer => self.handle_offer(signaling).await,
            SignalingAction::Answer => self.handle_answer(signaling).await,
            SignalingAction::Bye => self.handle_bye(signaling).await,
            SignalingAction::Busy => self.handle_busy(signaling).await,
            SignalingAction::Ringing => self.handle_ringing(signaling).await,
            SignalingAction::Candidate => self.handle_candidate(signaling).await,
            SignalingAction::Arrived => self.handle_arrived(signaling).await,
            SignalingAction::Left => self.handle_left(signaling).await,
            SignalingAction::Revoke => self.handle_revoke(signaling).await,
            SignalingAction::Invite => self.handle_invite(signaling).await,
            SignalingAction::ApplyCall
            | SignalingAction::ApplyJoin
            | SignalingAction::ApplyTerminate
            | SignalingAction::CreateField
            | SignalingAction::GetField => {
                tracing::warn!("server request {:?} pushed to a client", signaling.action);
                Ok(())
            }
            SignalingAction::Unknown => {
                tracing::debug!("ignore unknown signaling of field {}", signaling.field.id);
                Ok(())
            }
        }
    }
}

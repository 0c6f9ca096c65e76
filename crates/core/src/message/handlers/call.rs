use chrono::Utc;

use crate::comm::callback::CommEvent;
use crate::comm::record::CallRecord;
use crate::comm::record::CallState;
use crate::comm::MultipointComm;
use crate::error::Error;
use crate::error::Result;
use crate::field::Leg;
use crate::message::Signaling;
use crate::message::SignalingAction;

impl MultipointComm {
    /// An incoming call. A busy controller answers `Busy` and keeps no trace of it.
    pub(crate) async fn handle_offer(&self, signaling: &Signaling) -> Result<()> {
        let descriptor = &signaling.field;
        if !descriptor.is_private {
            return Err(Error::UnsupportedSignaling(format!(
                "offer pushed for conference field {}",
                descriptor.id
            )));
        }
        let offer = signaling.description.clone().ok_or_else(|| {
            Error::DataStructureError(format!("offer of field {} has no description", descriptor.id))
        })?;
        if self.record_seq_for(&descriptor.id).is_some() {
            tracing::warn!("repeated offer of field {} ignored", descriptor.id);
            return Ok(());
        }
        self.ended.remove(&descriptor.id);

        let local = self.local_identity()?;
        let field = self.resolve_field(descriptor)?;
        let reserved = self.reserve(|seq| {
            let mut r = CallRecord::new(seq, local.clone(), false);
            r.peer = Some(signaling.sender_identity.clone());
            r.field = Some(field.clone());
            r.state = CallState::Ringing;
            r.caller_constraint = signaling.media_constraint;
            r.offer = Some(offer);
            r
        });
        let snapshot = match reserved {
            Ok(record) => record,
            Err(_) => {
                tracing::info!(
                    "busy, rejecting call of {} on field {}",
                    signaling.sender_identity.id,
                    descriptor.id
                );
                let busy = field.signaling(SignalingAction::Busy);
                self.drop_field(&field).await;
                field.send_signaling(&busy).await?;
                return Ok(());
            }
        };
        let seq = snapshot.seq;

        let peer = match self
            .identity
            .resolve_identity(&signaling.sender_identity.id)
            .await
        {
            Ok(peer) => peer,
            Err(e) => {
                tracing::warn!(
                    "caller {} not resolved, keeping the announced identity: {}",
                    signaling.sender_identity.id,
                    e
                );
                signaling.sender_identity.clone()
            }
        };
        let Some(record) = self.with_record(seq, |r| {
            r.peer = Some(peer);
            r.clone()
        }) else {
            self.abandoned(snapshot, &field).await;
            return Ok(());
        };

        self.arm_timer(seq, self.config.callee_timeout());
        tracing::info!(
            "incoming call {} from {}",
            seq,
            signaling.sender_identity.id
        );
        self.emit(CommEvent::NewCall(record)).await;

        if self.with_record(seq, |_| ()).is_some() {
            if let Err(e) = field
                .send_signaling(&field.signaling(SignalingAction::Ringing))
                .await
            {
                tracing::warn!("ringing of field {} not delivered: {}", field.id(), e);
            }
        }
        Ok(())
    }

    /// The remote description for one of our offers.
    ///
    /// On a private field it is the peer's answer to the call. On a conference the target
    /// names the leg: our own endpoint for the published leg, a remote endpoint for a follow.
    pub(crate) async fn handle_answer(&self, signaling: &Signaling) -> Result<()> {
        let Some(field) = self.field(&signaling.field.id) else {
            tracing::warn!("answer of unknown field {} ignored", signaling.field.id);
            return Ok(());
        };
        let answer = signaling.description.clone().ok_or_else(|| {
            Error::DataStructureError(format!("answer of field {} has no description", field.id()))
        })?;
        if !field.is_private() && signaling.target.is_none() {
            return Err(Error::SignalingError(format!(
                "answer of conference field {} has no target",
                field.id()
            )));
        }

        let leg = field.leg_for_target(signaling.target.as_ref());
        let Some(device) = field.route(signaling.target.as_ref()) else {
            tracing::warn!("answer of field {} for {:?} has no device", field.id(), leg);
            return Ok(());
        };

        if let Err(e) = device.do_answer(&answer).await {
            let e = Error::from(e);
            match (&leg, self.record_seq_for(field.id())) {
                (Leg::Outbound, Some(seq)) => {
                    self.fail_call(seq, e.clone(), true).await;
                }
                _ => {
                    field.close_leg(&leg).await;
                }
            }
            return Err(e);
        }
        field.copy(&signaling.field);

        match leg {
            Leg::Outbound => {
                let connected = self.record_seq_for(field.id()).and_then(|seq| {
                    self.with_record(seq, |r| {
                        if !r.state.is_pending() {
                            return None;
                        }
                        r.disarm();
                        r.answer_time = Some(Utc::now());
                        r.state = CallState::Connected;
                        r.callee_constraint = signaling.media_constraint;
                        Some(r.clone())
                    })
                    .flatten()
                });
                let Some(record) = connected else {
                    tracing::warn!("answer of field {} without pending call", field.id());
                    return Ok(());
                };
                tracing::info!("call {} connected", record.seq);
                self.emit(CommEvent::Connected(record)).await;
                if !field.is_private() {
                    self.follow_all(&field).await;
                }
            }
            Leg::Inbound(id) => {
                if let Some(endpoint) = field.endpoint(&id) {
                    self.emit(CommEvent::Followed {
                        field_id: field.id().to_string(),
                        endpoint,
                    })
                    .await;
                }
            }
        }
        Ok(())
    }

    /// The peer hung up, or a conference endpoint went away.
    pub(crate) async fn handle_bye(&self, signaling: &Signaling) -> Result<()> {
        let Some(field) = self.field(&signaling.field.id) else {
            tracing::debug!("bye of unknown field {} ignored", signaling.field.id);
            return Ok(());
        };

        match field.leg_for_target(signaling.target.as_ref()) {
            Leg::Outbound => match self.record_seq_for(field.id()) {
                Some(seq) => {
                    if let Some(record) = self.end_call(seq, CallState::Ended, None, false).await {
                        tracing::info!("call {} ended by {}", seq, signaling.sender_identity.id);
                        self.emit(CommEvent::Bye(record)).await;
                    }
                }
                None => self.drop_field(&field).await,
            },
            Leg::Inbound(id) => {
                if let Some(endpoint) = field.endpoint(&id) {
                    field.close_endpoint(&id).await;
                    self.emit(CommEvent::Left {
                        field_id: field.id().to_string(),
                        endpoint,
                    })
                    .await;
                }
            }
        }
        Ok(())
    }

    /// The callee is in another call.
    pub(crate) async fn handle_busy(&self, signaling: &Signaling) -> Result<()> {
        let Some(seq) = self.record_seq_for(&signaling.field.id) else {
            tracing::warn!("busy of field {} without call", signaling.field.id);
            return Ok(());
        };
        if let Some(record) = self
            .end_call(seq, CallState::Busy, Some(Error::CalleeBusy), false)
            .await
        {
            tracing::info!("call {} rejected as busy", seq);
            self.emit(CommEvent::Busy(record)).await;
        }
        Ok(())
    }

    /// The callee surfaced the call to its user.
    pub(crate) async fn handle_ringing(&self, signaling: &Signaling) -> Result<()> {
        let Some(seq) = self.record_seq_for(&signaling.field.id) else {
            return Ok(());
        };
        let ringing = self
            .with_record(seq, |r| {
                if r.outgoing
                    && matches!(r.state, CallState::Proposing | CallState::AwaitingAnswer)
                {
                    r.state = CallState::Ringing;
                    Some(r.clone())
                } else {
                    None
                }
            })
            .flatten();
        if let Some(record) = ringing {
            self.emit(CommEvent::Ringing(record)).await;
        }
        Ok(())
    }
}

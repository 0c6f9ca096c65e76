use std::sync::Arc;

use crate::comm::callback::CommEvent;
use crate::comm::record::CallState;
use crate::comm::MultipointComm;
use crate::error::Error;
use crate::error::Result;
use crate::field::endpoint::CommFieldEndpoint;
use crate::field::CommField;
use crate::field::Leg;
use crate::message::Signaling;

impl MultipointComm {
    /// The conference field and the endpoint a roster signaling is about.
    fn conference_target(
        &self,
        signaling: &Signaling,
    ) -> Result<Option<(Arc<CommField>, CommFieldEndpoint)>> {
        if signaling.field.is_private {
            return Err(Error::UnsupportedSignaling(format!(
                "{:?} on private field {}",
                signaling.action, signaling.field.id
            )));
        }
        let Some(field) = self.field(&signaling.field.id) else {
            tracing::debug!(
                "{:?} of unknown field {} ignored",
                signaling.action,
                signaling.field.id
            );
            return Ok(None);
        };
        let endpoint = signaling.target.clone().ok_or_else(|| {
            Error::DataStructureError(format!(
                "{:?} of field {} has no target",
                signaling.action,
                field.id()
            ))
        })?;
        Ok(Some((field, endpoint)))
    }

    /// An endpoint joined a conference we are in. A connected call follows it.
    pub(crate) async fn handle_arrived(&self, signaling: &Signaling) -> Result<()> {
        let Some((field, endpoint)) = self.conference_target(signaling)? else {
            return Ok(());
        };
        field.copy(&signaling.field);
        field.add_endpoint(endpoint.clone());
        self.emit(CommEvent::Arrived {
            field_id: field.id().to_string(),
            endpoint: endpoint.clone(),
        })
        .await;

        let connected = self
            .record_seq_for(field.id())
            .and_then(|seq| self.with_record(seq, |r| r.state == CallState::Connected))
            .unwrap_or(false);
        if connected && field.inbound_device(&endpoint.id).is_none() {
            let id = endpoint.id.clone();
            if let Err(e) = self.follow(&field, endpoint).await {
                tracing::error!("field {} failed to follow {}: {}", field.id(), id, e);
            }
        }
        Ok(())
    }

    /// An endpoint left: close its leg, then drop it from the roster.
    pub(crate) async fn handle_left(&self, signaling: &Signaling) -> Result<()> {
        let Some((field, endpoint)) = self.conference_target(signaling)? else {
            return Ok(());
        };
        if endpoint.id == field.local_endpoint().id {
            tracing::warn!("field {} reports our own endpoint left", field.id());
            return Ok(());
        }
        field.close_endpoint(&endpoint.id).await;
        self.emit(CommEvent::Left {
            field_id: field.id().to_string(),
            endpoint,
        })
        .await;
        Ok(())
    }

    /// The server withdrew one followed endpoint. The roster entry stays.
    pub(crate) async fn handle_revoke(&self, signaling: &Signaling) -> Result<()> {
        let Some((field, endpoint)) = self.conference_target(signaling)? else {
            return Ok(());
        };
        if field
            .close_leg(&Leg::Inbound(endpoint.id.clone()))
            .await
        {
            self.emit(CommEvent::Revoked {
                field_id: field.id().to_string(),
                endpoint,
            })
            .await;
        }
        Ok(())
    }

    /// Surface an invitation as [CommEvent::Invited].
    pub(crate) async fn handle_invite(&self, signaling: &Signaling) -> Result<()> {
        tracing::info!(
            "{} invites to field {}",
            signaling.sender_identity.id,
            signaling.field.id
        );
        self.emit(CommEvent::Invited {
            field: signaling.field.clone(),
            inviter: signaling.sender_identity.clone(),
        })
        .await;
        Ok(())
    }
}

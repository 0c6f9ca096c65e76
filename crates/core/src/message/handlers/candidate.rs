use std::sync::atomic::Ordering;

use crate::comm::MultipointComm;
use crate::error::Error;
use crate::error::Result;
use crate::message::Signaling;

impl MultipointComm {
    /// Remote candidates. They may arrive before the offer that creates their field,
    /// or before the callee answers. Both cases keep them on the field until a device exists.
    pub(crate) async fn handle_candidate(&self, signaling: &Signaling) -> Result<()> {
        if signaling.all_candidates().next().is_none() {
            return Err(Error::DataStructureError(format!(
                "candidate signaling of field {} carries no candidate",
                signaling.field.id
            )));
        }

        let field = match self.field(&signaling.field.id) {
            Some(field) => field,
            None => {
                if signaling.field.is_private {
                    if signaling.field.founder_id == self.local_identity()?.id {
                        tracing::debug!("candidates of ended call {} dropped", signaling.field.id);
                        return Ok(());
                    }
                    if self.ended.contains_key(&signaling.field.id) {
                        tracing::debug!("late candidates of field {} dropped", signaling.field.id);
                        return Ok(());
                    }
                    if self.call_record().is_some() {
                        tracing::debug!(
                            "candidates of field {} dropped while in another call",
                            signaling.field.id
                        );
                        return Ok(());
                    }
                }
                let field = self.resolve_field(&signaling.field)?;
                if field.is_private() {
                    // forgotten unless an offer adopts it in time
                    let mark = self.marks.fetch_add(1, Ordering::SeqCst);
                    self.schedule_reap(field.id(), mark, self.config.callee_timeout());
                }
                field
            }
        };

        let leg = field.leg_for_target(signaling.target.as_ref());
        match field.route(signaling.target.as_ref()) {
            Some(device) => {
                for candidate in signaling.all_candidates() {
                    if let Err(e) = device.do_candidate(candidate.clone()).await {
                        tracing::warn!(
                            "device {} rejects candidate of field {}: {}",
                            device.serial(),
                            field.id(),
                            e
                        );
                    }
                }
            }
            None => {
                for candidate in signaling.all_candidates() {
                    field.buffer_candidate(leg.clone(), candidate.clone());
                }
            }
        }
        Ok(())
    }
}

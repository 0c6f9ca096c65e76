#![warn(missing_docs)]
//! The call controller.
//!
//! [MultipointComm] owns at most one [CallRecord] at a time, the fields it created or
//! learned from signaling, and the call timers. Inbound signaling, device events and timer
//! expiry all arrive on one channel and are handled in order by [MultipointComm::listen].

mod builder;
/// Host facing events and the callback that receives them.
pub mod callback;
/// Call records and call targets.
pub mod record;

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::RwLock;
use std::time::Duration;

pub use builder::MultipointCommBuilder;
use chrono::Utc;
use dashmap::DashMap;
use futures::lock::Mutex as FuturesMutex;
use multipoint_transport::core::engine::SharedMediaEngine;
use multipoint_transport::core::media::DeviceMode;
use multipoint_transport::core::media::MediaConstraint;
use multipoint_transport::device::DeviceState;
use multipoint_transport::device::RTCDevice;
use multipoint_transport::ice_server::IceServer;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use crate::comm::callback::CommEvent;
use crate::comm::callback::SharedCommCallback;
use crate::comm::record::CallRecord;
use crate::comm::record::CallState;
use crate::comm::record::CallTarget;
use crate::config::CommConfig;
use crate::error::Error;
use crate::error::Result;
use crate::field::callback::FieldEvent;
use crate::field::callback::FieldEventSender;
use crate::field::endpoint::CommFieldEndpoint;
use crate::field::endpoint::EndpointState;
use crate::field::CommField;
use crate::field::FieldContext;
use crate::field::Leg;
use crate::identity::Group;
use crate::identity::Identity;
use crate::identity::SharedIdentityService;
use crate::message::send_signaling;
use crate::message::FieldDescriptor;
use crate::message::SharedSignalingTransport;
use crate::message::Signaling;
use crate::message::SignalingAction;
use crate::message::SignalingResponse;

/// Rendering targets registered by the host.
#[derive(Debug, Clone, Default)]
pub(crate) struct VideoSinks {
    pub local: Option<String>,
    pub remote: Option<String>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// The multipoint communication controller.
pub struct MultipointComm {
    pub(crate) config: CommConfig,
    pub(crate) ice_servers: Vec<IceServer>,
    pub(crate) engine: SharedMediaEngine,
    pub(crate) transport: SharedSignalingTransport,
    pub(crate) identity: SharedIdentityService,
    pub(crate) callback: RwLock<SharedCommCallback>,
    pub(crate) events_tx: FieldEventSender,
    pub(crate) events_rx: FuturesMutex<UnboundedReceiver<FieldEvent>>,
    /// The single call slot.
    pub(crate) record: Mutex<Option<CallRecord>>,
    pub(crate) fields: DashMap<String, Arc<CommField>>,
    /// Private fields closed recently, with the mark of their reap timer.
    pub(crate) ended: DashMap<String, u64>,
    pub(crate) seq: AtomicU64,
    pub(crate) marks: AtomicU64,
    pub(crate) sinks: Mutex<VideoSinks>,
}

impl MultipointComm {
    /// Snapshot of the current call, if any.
    pub fn call_record(&self) -> Option<CallRecord> {
        lock(&self.record).clone()
    }

    /// Whether a call occupies the controller.
    pub fn is_active(&self) -> bool {
        lock(&self.record).is_some()
    }

    /// Field known under `id`.
    pub fn field(&self, id: &str) -> Option<Arc<CommField>> {
        self.fields.get(id).map(|f| f.value().clone())
    }

    /// Number of fields the controller holds.
    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    /// Replace the host callback.
    pub fn set_callback(&self, callback: SharedCommCallback) {
        *self.callback.write().unwrap_or_else(|e| e.into_inner()) = callback;
    }

    /// Register the element local video renders into. `None` unregisters it.
    pub fn set_local_video_sink(&self, sink: Option<String>) {
        lock(&self.sinks).local = sink;
    }

    /// Register the element remote video renders into. `None` unregisters it.
    pub fn set_remote_video_sink(&self, sink: Option<String>) {
        lock(&self.sinks).remote = sink;
    }

    pub(crate) fn local_identity(&self) -> Result<Identity> {
        self.identity.local_identity().ok_or(Error::Uninitialized)
    }

    pub(crate) fn field_context(&self, local: &Identity) -> FieldContext {
        FieldContext {
            local_identity: local.clone(),
            local_device: self.identity.local_device(),
            engine: self.engine.clone(),
            ice_servers: self.ice_servers.clone(),
            transport: self.transport.clone(),
            destination: self.config.signaling_destination.clone(),
            signaling_timeout: self.config.signaling_timeout(),
            bandwidth: (
                self.config.video_bandwidth_kbps,
                self.config.audio_bandwidth_kbps,
            ),
            events: self.events_tx.clone(),
        }
    }

    pub(crate) async fn emit(&self, event: CommEvent) {
        let callback = self
            .callback
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Err(e) = callback.on_event(&event).await {
            tracing::error!("CommCallback failed on {:?}: {}", event, e);
        }
    }

    /// Reserve the call slot. Fails with [Error::CallerBusy] when it is taken.
    pub(crate) fn reserve(&self, build: impl FnOnce(u64) -> CallRecord) -> Result<CallRecord> {
        let mut slot = lock(&self.record);
        if slot.is_some() {
            return Err(Error::CallerBusy);
        }
        let record = build(self.seq.fetch_add(1, Ordering::SeqCst));
        *slot = Some(record.clone());
        Ok(record)
    }

    /// Run `f` on the current record if it is still record `seq`.
    pub(crate) fn with_record<R>(&self, seq: u64, f: impl FnOnce(&mut CallRecord) -> R) -> Option<R> {
        lock(&self.record)
            .as_mut()
            .filter(|r| r.seq == seq)
            .map(f)
    }

    /// Seq of the current record when it runs on field `field_id`.
    pub(crate) fn record_seq_for(&self, field_id: &str) -> Option<u64> {
        lock(&self.record)
            .as_ref()
            .filter(|r| r.field_id() == Some(field_id))
            .map(|r| r.seq)
    }

    /// Field of the current record.
    pub(crate) fn active_field(&self) -> Result<Arc<CommField>> {
        lock(&self.record)
            .as_ref()
            .and_then(|r| r.field.clone())
            .ok_or_else(|| Error::NoCommField("no active call".to_string()))
    }

    /// Existing field of `descriptor`, merged with it, or a new one.
    pub(crate) fn resolve_field(&self, descriptor: &FieldDescriptor) -> Result<Arc<CommField>> {
        if let Some(field) = self.field(&descriptor.id) {
            field.copy(descriptor);
            return Ok(field);
        }
        let local = self.local_identity()?;
        let field = Arc::new(CommField::from_descriptor(
            descriptor,
            self.field_context(&local),
        )?);
        Ok(self
            .fields
            .entry(descriptor.id.clone())
            .or_insert(field)
            .value()
            .clone())
    }

    /// Close a field and forget it. Signaling of a closed private field is
    /// ignored until an `Offer` reopens it or the reap timer fires.
    pub(crate) async fn drop_field(&self, field: &CommField) {
        field.close().await;
        self.fields.remove(field.id());
        if field.is_private() {
            let mark = self.marks.fetch_add(1, Ordering::SeqCst);
            self.ended.insert(field.id().to_string(), mark);
            self.schedule_reap(field.id(), mark, self.config.callee_timeout());
        }
    }

    /// Send [FieldEvent::ReapField] for `field_id` after `after`.
    pub(crate) fn schedule_reap(&self, field_id: &str, mark: u64, after: Duration) {
        let events = self.events_tx.clone();
        let field_id = field_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Err(e) = events.send(FieldEvent::ReapField { field_id, mark }) {
                tracing::debug!("reap timer lost: {}", e);
            }
        });
    }

    /// Arm the call timer of record `seq`, disarming the previous one.
    pub(crate) fn arm_timer(&self, seq: u64, timeout: Duration) {
        let token = CancellationToken::new();
        let armed = self
            .with_record(seq, |r| {
                r.disarm();
                r.timer = Some(token.clone());
            })
            .is_some();
        if !armed {
            return;
        }

        let events = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    if let Err(e) = events.send(FieldEvent::CallTimeout { seq }) {
                        tracing::warn!("call timer of record {} lost: {}", seq, e);
                    }
                }
            }
        });
    }

    /// Take record `seq` out of the slot, close its field and stamp the final state.
    /// With `notify`, the peer of a private field gets `Bye` and a conference is left
    /// with `ApplyTerminate`. Returns `None` when the record is already gone.
    pub(crate) async fn end_call(
        &self,
        seq: u64,
        state: CallState,
        error: Option<Error>,
        notify: bool,
    ) -> Option<CallRecord> {
        let mut record = {
            let mut slot = lock(&self.record);
            if slot.as_ref().map(|r| r.seq) != Some(seq) {
                return None;
            }
            slot.take()?
        };
        record.disarm();
        record.offer = None;

        if let Some(field) = record.field.clone() {
            let farewell = notify.then(|| {
                if field.is_private() {
                    field.signaling(SignalingAction::Bye)
                } else {
                    field.signaling(SignalingAction::ApplyTerminate)
                }
            });
            self.drop_field(&field).await;
            if let Some(signaling) = farewell {
                if let Err(e) = field.send_signaling(&signaling).await {
                    tracing::warn!(
                        "field {} {:?} not delivered: {}",
                        field.id(),
                        signaling.action,
                        e
                    );
                }
            }
        }

        record.state = state;
        record.end_time = Some(Utc::now());
        if error.is_some() {
            record.last_error = error;
        }
        tracing::info!("call {} ended as {:?}", record.seq, record.state);
        Some(record)
    }

    /// End record `seq` after a failure and tell the host.
    /// A server side busy ends as [CallState::Busy], anything else as [CallState::Failed].
    pub(crate) async fn fail_call(&self, seq: u64, error: Error, notify: bool) -> Error {
        let state = if error == Error::CalleeBusy {
            CallState::Busy
        } else {
            CallState::Failed
        };
        tracing::error!("call {} failed: {}", seq, error);
        if let Some(record) = self.end_call(seq, state, Some(error.clone()), notify).await {
            let event = match state {
                CallState::Busy => CommEvent::Busy(record),
                _ => CommEvent::Failed {
                    record,
                    error: error.clone(),
                },
            };
            self.emit(event).await;
        }
        error
    }

    /// A negotiation on a reserved field failed.
    /// The server reservation is released with `ApplyTerminate` instead of a `Bye`,
    /// which would need media the device could not provide.
    async fn fail_launch(&self, seq: u64, field: &CommField, error: Error) -> Error {
        if let Err(e) = field.apply_terminate().await {
            tracing::warn!("field {} ApplyTerminate failed: {}", field.id(), e);
        }
        self.fail_call(seq, error, false).await
    }

    /// The record was cleared while an operation of it was suspended.
    pub(crate) async fn abandoned(&self, mut snapshot: CallRecord, field: &CommField) -> CallRecord {
        tracing::warn!("call {} ended during setup", snapshot.seq);
        self.drop_field(field).await;
        snapshot.state = CallState::Ended;
        snapshot.end_time = Some(Utc::now());
        snapshot.timer = None;
        snapshot
    }

    fn check_local_sink(&self, constraint: &MediaConstraint) -> Result<()> {
        if constraint.video && lock(&self.sinks).local.is_none() {
            return Err(Error::VideoElementNotSetting);
        }
        Ok(())
    }

    fn check_remote_sink(&self, constraint: &MediaConstraint) -> Result<()> {
        if constraint.video && lock(&self.sinks).remote.is_none() {
            return Err(Error::VideoElementNotSetting);
        }
        Ok(())
    }

    /// Replay the local endpoint's stream preferences into a new outbound device.
    async fn prime_device(&self, field: &CommField, device: &RTCDevice) {
        if !device.mode().is_sending() {
            return;
        }
        let local = field.local_endpoint();
        device.enable_outbound_video(local.video_stream_enabled).await;
        device.enable_outbound_audio(local.audio_stream_enabled).await;
    }

    /// Start a call, a conference join or the follow of one conference endpoint.
    ///
    /// Only one call is allowed per controller: while one is active, any further call fails
    /// with [Error::CallerBusy] before anything is sent.
    pub async fn make_call(
        &self,
        target: CallTarget,
        constraint: MediaConstraint,
    ) -> Result<CallRecord> {
        match target {
            CallTarget::Identity(callee) => self.call_identity(callee, constraint).await,
            CallTarget::Group(group) => self.join_group(group, constraint).await,
            CallTarget::Field(descriptor) => self.join_field(descriptor, constraint).await,
            CallTarget::Endpoint(endpoint) => self.follow_endpoint(endpoint).await,
        }
    }

    async fn call_identity(&self, callee: Identity, constraint: MediaConstraint) -> Result<CallRecord> {
        let local = self.local_identity()?;
        self.check_local_sink(&constraint)?;
        if callee.id == local.id {
            return Err(Error::NoContact(format!("{} cannot call itself", local.id)));
        }

        let mut snapshot = self.reserve(|seq| {
            let mut r = CallRecord::new(seq, local.clone(), true);
            r.peer = Some(callee.clone());
            r.caller_constraint = Some(constraint);
            r.state = CallState::Proposing;
            r
        })?;
        let seq = snapshot.seq;

        let callee = match self.identity.resolve_identity(&callee.id).await {
            Ok(callee) => callee,
            Err(e) => return Err(self.fail_call(seq, e, false).await),
        };

        let field = Arc::new(CommField::new_private(
            callee.clone(),
            constraint,
            self.field_context(&local),
        ));
        self.fields.insert(field.id().to_string(), field.clone());
        self.ended.remove(field.id());
        let Some(record) = self.with_record(seq, |r| {
            r.peer = Some(callee);
            r.field = Some(field.clone());
            r.clone()
        }) else {
            return Ok(self.abandoned(snapshot, &field).await);
        };
        snapshot = record.clone();
        tracing::info!("call {} to {} proposing", seq, field.callee().map(|c| c.id).unwrap_or_default());
        self.emit(CommEvent::InProgress(record)).await;

        if let Err(e) = field.apply_call().await {
            return Err(self.fail_call(seq, e, false).await);
        }
        if self.with_record(seq, |_| ()).is_none() {
            return Ok(self.abandoned(snapshot, &field).await);
        }

        let device = field.new_device(DeviceMode::SendRecv);
        self.prime_device(&field, &device).await;
        if let Err(e) = field.launch_offer(device, &constraint, None).await {
            return Err(self.fail_launch(seq, &field, e).await);
        }
        self.offer_sent(seq, snapshot, &field).await
    }

    /// The offer of record `seq` reached the server: wait for the answer under the call timer.
    async fn offer_sent(
        &self,
        seq: u64,
        snapshot: CallRecord,
        field: &CommField,
    ) -> Result<CallRecord> {
        let pending = self.with_record(seq, |r| {
            if r.state == CallState::Proposing {
                r.state = CallState::AwaitingAnswer;
            }
            r.state.is_pending()
        });
        match pending {
            None => Ok(self.abandoned(snapshot, field).await),
            Some(pending) => {
                if pending {
                    self.arm_timer(seq, self.config.call_timeout());
                }
                Ok(self.call_record().filter(|r| r.seq == seq).unwrap_or(snapshot))
            }
        }
    }

    async fn join_group(&self, group: Group, constraint: MediaConstraint) -> Result<CallRecord> {
        let local = self.local_identity()?;
        self.check_local_sink(&constraint)?;
        let snapshot = self.reserve(|seq| {
            let mut r = CallRecord::new(seq, local.clone(), true);
            r.caller_constraint = Some(constraint);
            r.state = CallState::Proposing;
            r
        })?;
        let seq = snapshot.seq;
        self.emit(CommEvent::InProgress(snapshot.clone())).await;

        let descriptor = match self.group_field(&local, &group, constraint).await {
            Ok(descriptor) => descriptor,
            Err(e) => return Err(self.fail_call(seq, e, false).await),
        };
        self.join_reserved(seq, snapshot, descriptor, constraint).await
    }

    /// Ask the server for the conference field of `group`, creating it when there is none.
    async fn group_field(
        &self,
        local: &Identity,
        group: &Group,
        constraint: MediaConstraint,
    ) -> Result<FieldDescriptor> {
        let probe = FieldDescriptor {
            id: String::new(),
            founder_id: local.id.clone(),
            is_private: false,
            media_constraint: constraint,
            endpoints: vec![],
            caller: None,
            callee: None,
            group_id: Some(group.id.clone()),
        };
        let request = |action| {
            Signaling::new(
                action,
                probe.clone(),
                local.clone(),
                self.identity.local_device(),
            )
        };

        let resp = match self.server_request(&request(SignalingAction::GetField)).await {
            Err(Error::NoCommField(_)) => {
                tracing::info!("group {} has no conference, creating one", group.id);
                self.server_request(&request(SignalingAction::CreateField))
                    .await?
            }
            resp => resp?,
        };
        let descriptor = resp.field.ok_or_else(|| {
            Error::DataStructureError(format!("no field in the response for group {}", group.id))
        })?;
        if descriptor.is_private || descriptor.group_id.as_deref() != Some(group.id.as_str()) {
            return Err(Error::GroupStateError(format!(
                "field {} is not a conference of group {}",
                descriptor.id, group.id
            )));
        }
        Ok(descriptor)
    }

    async fn server_request(
        &self,
        signaling: &Signaling,
    ) -> Result<SignalingResponse> {
        send_signaling(
            self.transport.as_ref(),
            &self.config.signaling_destination,
            self.config.signaling_timeout(),
            signaling,
        )
        .await
    }

    async fn join_field(
        &self,
        descriptor: FieldDescriptor,
        constraint: MediaConstraint,
    ) -> Result<CallRecord> {
        let local = self.local_identity()?;
        self.check_local_sink(&constraint)?;
        if descriptor.is_private {
            return Err(Error::UnsupportedSignaling(format!(
                "field {} is private, call its founder instead",
                descriptor.id
            )));
        }
        let snapshot = self.reserve(|seq| {
            let mut r = CallRecord::new(seq, local.clone(), true);
            r.caller_constraint = Some(constraint);
            r.state = CallState::Proposing;
            r
        })?;
        self.emit(CommEvent::InProgress(snapshot.clone())).await;
        self.join_reserved(snapshot.seq, snapshot, descriptor, constraint)
            .await
    }

    /// Join the conference `descriptor` on behalf of the reserved record `seq`:
    /// `ApplyJoin`, then publish a send only leg.
    async fn join_reserved(
        &self,
        seq: u64,
        mut snapshot: CallRecord,
        descriptor: FieldDescriptor,
        constraint: MediaConstraint,
    ) -> Result<CallRecord> {
        let field = match self.resolve_field(&descriptor) {
            Ok(field) => field,
            Err(e) => return Err(self.fail_call(seq, e, false).await),
        };
        match self.with_record(seq, |r| {
            r.field = Some(field.clone());
            r.clone()
        }) {
            Some(record) => snapshot = record,
            None => return Ok(self.abandoned(snapshot, &field).await),
        }

        if let Err(e) = field.apply_join().await {
            return Err(self.fail_call(seq, e, false).await);
        }
        if self.with_record(seq, |_| ()).is_none() {
            return Ok(self.abandoned(snapshot, &field).await);
        }
        tracing::info!("call {} joined field {}", seq, field.id());

        let device = field.new_device(DeviceMode::SendOnly);
        self.prime_device(&field, &device).await;
        if let Err(e) = field.launch_offer(device, &constraint, None).await {
            return Err(self.fail_launch(seq, &field, e).await);
        }
        self.offer_sent(seq, snapshot, &field).await
    }

    async fn follow_endpoint(&self, endpoint: CommFieldEndpoint) -> Result<CallRecord> {
        let field = self.active_field()?;
        if field.is_private() {
            return Err(Error::UnsupportedSignaling(
                "endpoints of a private field cannot be followed".to_string(),
            ));
        }
        self.follow(&field, endpoint).await?;
        self.call_record()
            .ok_or_else(|| Error::NoCommField(field.id().to_string()))
    }

    /// Open a receive only leg to one conference endpoint.
    pub(crate) async fn follow(&self, field: &CommField, endpoint: CommFieldEndpoint) -> Result<()> {
        if endpoint.id == field.local_endpoint().id {
            return Ok(());
        }
        let constraint = MediaConstraint::new(endpoint.video_enabled, endpoint.audio_enabled);
        tracing::debug!("field {} follows endpoint {}", field.id(), endpoint.id);
        let device = field.new_device(DeviceMode::RecvOnly);
        field.launch_offer(device, &constraint, Some(endpoint)).await
    }

    /// Follow every endpoint of `field` that has no leg yet.
    pub(crate) async fn follow_all(&self, field: &CommField) {
        let local_id = field.local_endpoint().id;
        for endpoint in field.endpoints() {
            if endpoint.id == local_id || field.inbound_device(&endpoint.id).is_some() {
                continue;
            }
            let id = endpoint.id.clone();
            if let Err(e) = self.follow(field, endpoint).await {
                tracing::error!("field {} failed to follow {}: {}", field.id(), id, e);
            }
        }
    }

    /// Accept the incoming call with the local media `constraint`.
    pub async fn answer_call(&self, constraint: MediaConstraint) -> Result<CallRecord> {
        self.check_remote_sink(&constraint)?;
        let (snapshot, field, offer) = {
            let mut slot = lock(&self.record);
            let record = slot
                .as_mut()
                .filter(|r| !r.outgoing && r.state == CallState::Ringing)
                .ok_or_else(|| Error::NoCommField("no incoming call to answer".to_string()))?;
            let field = record
                .field
                .clone()
                .ok_or_else(|| Error::NoCommField("incoming call has no field".to_string()))?;
            let offer = record
                .offer
                .take()
                .ok_or_else(|| Error::SignalingError("incoming call has no offer".to_string()))?;
            record.callee_constraint = Some(constraint);
            (record.clone(), field, offer)
        };
        let seq = snapshot.seq;
        field.add_endpoint(field.local_endpoint());

        let device = field.new_device(DeviceMode::SendRecv);
        self.prime_device(&field, &device).await;
        if let Err(e) = field.launch_answer(device, &offer, &constraint, None).await {
            return Err(self.fail_launch(seq, &field, e).await);
        }

        let connected = self.with_record(seq, |r| {
            r.disarm();
            r.answer_time = Some(Utc::now());
            r.state = CallState::Connected;
            r.clone()
        });
        match connected {
            Some(record) => {
                tracing::info!("call {} answered", seq);
                field.set_endpoint_state(&field.local_endpoint().id, EndpointState::CallConnected);
                self.emit(CommEvent::Connected(record.clone())).await;
                Ok(record)
            }
            None => Ok(self.abandoned(snapshot, &field).await),
        }
    }

    /// Hang up, reject or leave the current call. Without a call this is a no-op.
    pub async fn hangup_call(&self) -> Result<()> {
        let Some(seq) = lock(&self.record).as_ref().map(|r| r.seq) else {
            tracing::debug!("hangup without call");
            return Ok(());
        };
        if let Some(record) = self.end_call(seq, CallState::Ended, None, true).await {
            self.emit(CommEvent::Bye(record)).await;
        }
        Ok(())
    }

    /// Stop receiving one endpoint of the active conference.
    pub async fn revoke_endpoint(&self, endpoint_id: &str) -> Result<()> {
        let field = self.active_field()?;
        if field.is_private() {
            return Err(Error::UnsupportedSignaling(
                "revoke on a private field".to_string(),
            ));
        }
        let endpoint = field
            .endpoint(endpoint_id)
            .ok_or_else(|| Error::NoContact(endpoint_id.to_string()))?;

        let signaling = field
            .signaling(SignalingAction::Revoke)
            .with_target(Some(endpoint.clone()));
        field
            .close_leg(&Leg::Inbound(endpoint_id.to_string()))
            .await;
        field.send_signaling(&signaling).await?;
        self.emit(CommEvent::Revoked {
            field_id: field.id().to_string(),
            endpoint,
        })
        .await;
        Ok(())
    }

    /// Invite identities into the active conference.
    pub async fn invite_call(&self, invitees: Vec<Identity>) -> Result<()> {
        let field = self.active_field()?;
        if field.is_private() {
            return Err(Error::UnsupportedSignaling(
                "invite on a private field".to_string(),
            ));
        }
        let signaling = field
            .signaling(SignalingAction::Invite)
            .with_invitees(invitees);
        field.send_signaling(&signaling).await?;
        Ok(())
    }

    async fn set_outbound_enabled(&self, video: Option<bool>, audio: Option<bool>) -> Result<()> {
        let field = self.active_field()?;
        field.set_stream_enabled(&field.local_endpoint().id, video, audio);
        if let Some(device) = field.outbound_device() {
            if let Some(video) = video {
                device.enable_outbound_video(video).await;
            }
            if let Some(audio) = audio {
                device.enable_outbound_audio(audio).await;
            }
        }
        Ok(())
    }

    /// Stop sending local video.
    pub async fn mute_video(&self) -> Result<()> {
        self.set_outbound_enabled(Some(false), None).await
    }

    /// Resume sending local video.
    pub async fn unmute_video(&self) -> Result<()> {
        self.set_outbound_enabled(Some(true), None).await
    }

    /// Stop sending local audio.
    pub async fn mute_audio(&self) -> Result<()> {
        self.set_outbound_enabled(None, Some(false)).await
    }

    /// Resume sending local audio.
    pub async fn unmute_audio(&self) -> Result<()> {
        self.set_outbound_enabled(None, Some(true)).await
    }

    /// Devices playing remote media: the single device of a private field,
    /// one endpoint's leg, or every inbound leg of a conference.
    fn playback_devices(&self, field: &CommField, endpoint_id: Option<&str>) -> Vec<(String, Arc<RTCDevice>)> {
        if field.is_private() {
            let peer = field
                .endpoints()
                .into_iter()
                .find(|e| e.id != field.local_endpoint().id)
                .map(|e| e.id)
                .unwrap_or_default();
            return field
                .outbound_device()
                .map(|d| vec![(peer, d)])
                .unwrap_or_default();
        }
        match endpoint_id {
            Some(id) => field
                .inbound_device(id)
                .map(|d| vec![(id.to_string(), d)])
                .unwrap_or_default(),
            None => field
                .endpoints()
                .into_iter()
                .filter_map(|e| field.inbound_device(&e.id).map(|d| (e.id, d)))
                .collect(),
        }
    }

    /// Play or silence remote video. `endpoint_id` narrows a conference to one endpoint.
    pub async fn enable_inbound_video(&self, endpoint_id: Option<&str>, enabled: bool) -> Result<()> {
        let field = self.active_field()?;
        for (id, device) in self.playback_devices(&field, endpoint_id) {
            field.set_stream_enabled(&id, Some(enabled), None);
            device.enable_inbound_video(enabled).await;
        }
        Ok(())
    }

    /// Play or silence remote audio. `endpoint_id` narrows a conference to one endpoint.
    pub async fn enable_inbound_audio(&self, endpoint_id: Option<&str>, enabled: bool) -> Result<()> {
        let field = self.active_field()?;
        for (id, device) in self.playback_devices(&field, endpoint_id) {
            field.set_stream_enabled(&id, None, Some(enabled));
            device.enable_inbound_audio(enabled).await;
        }
        Ok(())
    }

    /// Handle one event from the channel.
    pub async fn handle_event(&self, event: &FieldEvent) -> Result<()> {
        match event {
            FieldEvent::Signaling(signaling) => self.handle_signaling(signaling).await,
            FieldEvent::LocalCandidate {
                field_id,
                serial,
                candidate,
            } => {
                let Some(field) = self.field(field_id) else {
                    return Ok(());
                };
                let Some(leg) = field.leg_of(*serial) else {
                    tracing::debug!("candidate of closed device {} dropped", serial);
                    return Ok(());
                };
                let signaling = field
                    .signaling(SignalingAction::Candidate)
                    .with_target(field.target_for_leg(&leg))
                    .with_candidate(candidate.clone());
                field.send_signaling(&signaling).await?;
                Ok(())
            }
            FieldEvent::ConnectionState {
                field_id,
                serial,
                state,
            } => {
                let Some(field) = self.field(field_id) else {
                    return Ok(());
                };
                let Some((leg, device)) = field.device_of(*serial) else {
                    return Ok(());
                };
                let endpoint_id = match &leg {
                    Leg::Outbound => field.local_endpoint().id,
                    Leg::Inbound(id) => id.clone(),
                };
                match device.on_connection_state(*state).await {
                    DeviceState::MediaConnected => {
                        field.set_endpoint_state(&endpoint_id, EndpointState::CallConnected);
                        self.emit(CommEvent::MediaConnected {
                            field_id: field_id.clone(),
                            serial: *serial,
                        })
                        .await;
                    }
                    DeviceState::MediaDisconnected => {
                        tracing::warn!("field {} lost media on device {}", field_id, serial);
                        self.emit(CommEvent::MediaDisconnected {
                            field_id: field_id.clone(),
                            serial: *serial,
                        })
                        .await;
                        if field.is_private() {
                            if let Some(seq) = self.record_seq_for(field_id) {
                                if let Some(record) =
                                    self.end_call(seq, CallState::Ended, None, true).await
                                {
                                    self.emit(CommEvent::Bye(record)).await;
                                }
                            }
                        }
                    }
                    _ => {}
                }
                Ok(())
            }
            FieldEvent::Track {
                field_id,
                serial,
                stream,
            } => {
                let Some(field) = self.field(field_id) else {
                    return Ok(());
                };
                let Some((leg, device)) = field.device_of(*serial) else {
                    return Ok(());
                };
                device.on_track(stream.clone()).await;
                let endpoint_id = match leg {
                    Leg::Outbound => None,
                    Leg::Inbound(id) => Some(id),
                };
                self.emit(CommEvent::RemoteStream {
                    field_id: field_id.clone(),
                    endpoint_id,
                    stream: stream.clone(),
                })
                .await;
                Ok(())
            }
            FieldEvent::CallTimeout { seq } => {
                let pending = self
                    .with_record(*seq, |r| r.state.is_pending())
                    .unwrap_or(false);
                if !pending {
                    return Ok(());
                }
                tracing::info!("call {} timed out", seq);
                if let Some(record) = self.end_call(*seq, CallState::Ended, None, true).await {
                    self.emit(CommEvent::Timeout(record)).await;
                }
                Ok(())
            }
            FieldEvent::ReapField { field_id, mark } => {
                self.ended.remove_if(field_id, |_, m| m == mark);
                let Some(field) = self.field(field_id) else {
                    return Ok(());
                };
                if self.record_seq_for(field_id).is_some() || field.num_devices() > 0 {
                    return Ok(());
                }
                tracing::debug!("orphan field {} reaped", field_id);
                field.close().await;
                self.fields.remove(field_id);
                Ok(())
            }
        }
    }

    /// Wait for one event and handle it. Returns the handled event.
    pub async fn listen_once(&self) -> Option<FieldEvent> {
        let event = {
            let mut events = self.events_rx.lock().await;
            events.recv().await?
        };
        if let Err(e) = self.handle_event(&event).await {
            tracing::error!("MultipointComm failed on handling {:?}: {}", event, e);
        }
        Some(event)
    }

    /// Handle events until the controller is dropped.
    pub async fn listen(self: Arc<Self>) {
        while self.listen_once().await.is_some() {}
    }
}

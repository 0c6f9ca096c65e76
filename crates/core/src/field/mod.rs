#![warn(missing_docs)]
//! The communication field: one call or conference session.
//!
//! A field holds the endpoint roster, at most one outbound device and the inbound devices
//! keyed by the remote endpoint they play. It is the only place devices are registered,
//! wired to callbacks and closed.

/// Device callback that feeds the controller's event channel.
pub mod callback;
/// Participants of a field.
pub mod endpoint;

use std::fmt;
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::RwLockReadGuard;
use std::sync::RwLockWriteGuard;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use multipoint_transport::core::engine::SharedMediaEngine;
use multipoint_transport::core::media::DeviceMode;
use multipoint_transport::core::media::IceCandidate;
use multipoint_transport::core::media::MediaConstraint;
use multipoint_transport::core::media::SessionDescription;
use multipoint_transport::device::RTCDevice;
use multipoint_transport::ice_server::IceServer;

use crate::error::Error;
use crate::error::Result;
use crate::field::callback::FieldDeviceCallback;
use crate::field::callback::FieldEventSender;
use crate::field::endpoint::CommFieldEndpoint;
use crate::field::endpoint::EndpointState;
use crate::identity::Device;
use crate::identity::Identity;
use crate::message::send_signaling;
use crate::message::FieldDescriptor;
use crate::message::SharedSignalingTransport;
use crate::message::Signaling;
use crate::message::SignalingAction;
use crate::message::SignalingResponse;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

/// What a field needs from its controller.
#[derive(Clone)]
pub struct FieldContext {
    /// Signed in identity.
    pub local_identity: Identity,
    /// Device of this client.
    pub local_device: Device,
    /// Media engine every device of the field uses.
    pub engine: SharedMediaEngine,
    /// STUN/TURN servers for new devices.
    pub ice_servers: Vec<IceServer>,
    /// Channel to the server.
    pub transport: SharedSignalingTransport,
    /// Server side service name.
    pub destination: String,
    /// Bound of one signaling round trip.
    pub signaling_timeout: Duration,
    /// Advertised `(video, audio)` bandwidth of the local endpoint, kbps.
    pub bandwidth: (u32, u32),
    /// Controller's event channel.
    pub events: FieldEventSender,
}

/// The leg a device serves.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Leg {
    /// The one device publishing local media.
    Outbound,
    /// The device playing the remote endpoint with this id.
    Inbound(String),
}

/// A call or conference session.
pub struct CommField {
    id: String,
    founder_id: String,
    private: bool,
    group_id: Option<String>,
    media_constraint: MediaConstraint,
    ctx: FieldContext,
    local_id: String,
    local_endpoint: RwLock<CommFieldEndpoint>,
    endpoints: RwLock<Vec<CommFieldEndpoint>>,
    outbound: RwLock<Option<Arc<RTCDevice>>>,
    inbound: DashMap<String, Arc<RTCDevice>>,
    serials: DashMap<u64, Leg>,
    early_candidates: DashMap<Leg, Vec<IceCandidate>>,
    caller: RwLock<Option<Identity>>,
    callee: RwLock<Option<Identity>>,
}

impl fmt::Debug for CommField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommField")
            .field("id", &self.id)
            .field("private", &self.private)
            .field("endpoints", &self.num_endpoints())
            .field("devices", &self.num_devices())
            .finish()
    }
}

impl CommField {
    fn build(
        id: String,
        founder_id: String,
        group_id: Option<String>,
        media_constraint: MediaConstraint,
        ctx: FieldContext,
    ) -> Self {
        let mut local_endpoint =
            CommFieldEndpoint::new(ctx.local_identity.clone(), ctx.local_device.clone())
                .with_bandwidth(ctx.bandwidth.0, ctx.bandwidth.1);
        local_endpoint.video_enabled = media_constraint.video;
        local_endpoint.audio_enabled = media_constraint.audio;

        Self {
            private: id == founder_id,
            id,
            founder_id,
            group_id,
            media_constraint,
            ctx,
            local_id: local_endpoint.id.clone(),
            local_endpoint: RwLock::new(local_endpoint),
            endpoints: RwLock::new(vec![]),
            outbound: RwLock::new(None),
            inbound: DashMap::new(),
            serials: DashMap::new(),
            early_candidates: DashMap::new(),
            caller: RwLock::new(None),
            callee: RwLock::new(None),
        }
    }

    /// A private field founded by the local identity, calling `callee`.
    pub fn new_private(callee: Identity, media_constraint: MediaConstraint, ctx: FieldContext) -> Self {
        let local = ctx.local_identity.clone();
        let field = Self::build(local.id.clone(), local.id.clone(), None, media_constraint, ctx);
        *write(&field.caller) = Some(local);
        *write(&field.callee) = Some(callee);
        field.add_endpoint(field.local_endpoint());
        field
    }

    /// Create the local object of a field first seen in a descriptor.
    pub fn from_descriptor(descriptor: &FieldDescriptor, ctx: FieldContext) -> Result<Self> {
        if descriptor.is_private != (descriptor.id == descriptor.founder_id) {
            return Err(Error::DataStructureError(format!(
                "field {} privacy does not match its founder",
                descriptor.id
            )));
        }
        let field = Self::build(
            descriptor.id.clone(),
            descriptor.founder_id.clone(),
            descriptor.group_id.clone(),
            descriptor.media_constraint,
            ctx,
        );
        field.copy(descriptor);
        Ok(field)
    }

    /// Field id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Id of the identity that founded the field.
    pub fn founder_id(&self) -> &str {
        &self.founder_id
    }

    /// Private fields model 1:1 calls, their id is the founder's id.
    pub fn is_private(&self) -> bool {
        self.private
    }

    /// Group of a conference field.
    pub fn group_id(&self) -> Option<&str> {
        self.group_id.as_deref()
    }

    /// Requested media of the session.
    pub fn media_constraint(&self) -> MediaConstraint {
        self.media_constraint
    }

    /// Local participant as announced to the server.
    pub fn local_endpoint(&self) -> CommFieldEndpoint {
        self.endpoint(&self.local_id)
            .unwrap_or_else(|| read(&self.local_endpoint).clone())
    }

    /// Caller of a private field.
    pub fn caller(&self) -> Option<Identity> {
        read(&self.caller).clone()
    }

    /// Callee of a private field.
    pub fn callee(&self) -> Option<Identity> {
        read(&self.callee).clone()
    }

    /// Snapshot of the roster, in order.
    pub fn endpoints(&self) -> Vec<CommFieldEndpoint> {
        read(&self.endpoints).clone()
    }

    /// Size of the roster.
    pub fn num_endpoints(&self) -> usize {
        read(&self.endpoints).len()
    }

    /// Roster entry by id.
    pub fn endpoint(&self, id: &str) -> Option<CommFieldEndpoint> {
        read(&self.endpoints).iter().find(|e| e.id == id).cloned()
    }

    /// Live devices, outbound plus inbound.
    pub fn num_devices(&self) -> usize {
        usize::from(read(&self.outbound).is_some()) + self.inbound.len()
    }

    /// The device publishing local media.
    pub fn outbound_device(&self) -> Option<Arc<RTCDevice>> {
        read(&self.outbound).clone()
    }

    /// The device playing `endpoint_id`.
    pub fn inbound_device(&self, endpoint_id: &str) -> Option<Arc<RTCDevice>> {
        self.inbound.get(endpoint_id).map(|d| d.value().clone())
    }

    /// Leg served by the device with `serial`.
    pub fn leg_of(&self, serial: u64) -> Option<Leg> {
        self.serials.get(&serial).map(|l| l.value().clone())
    }

    /// Device with `serial` and the leg it serves.
    pub fn device_of(&self, serial: u64) -> Option<(Leg, Arc<RTCDevice>)> {
        let leg = self.leg_of(serial)?;
        let device = self.device_for_leg(&leg)?;
        Some((leg, device))
    }

    /// A fresh, unregistered device bound to the field's engine.
    pub fn new_device(&self, mode: DeviceMode) -> Arc<RTCDevice> {
        Arc::new(RTCDevice::new(
            mode,
            self.ctx.ice_servers.clone(),
            self.ctx.engine.clone(),
        ))
    }

    /// Compact descriptor embedded in every signaling of the field.
    pub fn descriptor(&self) -> FieldDescriptor {
        FieldDescriptor {
            id: self.id.clone(),
            founder_id: self.founder_id.clone(),
            is_private: self.private,
            media_constraint: self.media_constraint,
            endpoints: self.endpoints(),
            caller: self.caller(),
            callee: self.callee(),
            group_id: self.group_id.clone(),
        }
    }

    /// A signaling of this field sent by the local identity.
    pub fn signaling(&self, action: SignalingAction) -> Signaling {
        Signaling::new(
            action,
            self.descriptor(),
            self.ctx.local_identity.clone(),
            self.ctx.local_device.clone(),
        )
    }

    /// Leg a message addressed to `target` belongs to.
    /// No target, or the local endpoint as target, means the outbound leg.
    pub fn leg_for_target(&self, target: Option<&CommFieldEndpoint>) -> Leg {
        match target {
            Some(t) if t.id != self.local_id => Leg::Inbound(t.id.clone()),
            _ => Leg::Outbound,
        }
    }

    /// Target to put on signaling about `leg`.
    pub fn target_for_leg(&self, leg: &Leg) -> Option<CommFieldEndpoint> {
        match leg {
            Leg::Outbound if self.private => None,
            Leg::Outbound => Some(self.local_endpoint()),
            Leg::Inbound(id) => self.endpoint(id),
        }
    }

    /// Resolve the device a message addressed to `target` is for.
    /// An unknown target is admitted to the roster first.
    pub fn route(&self, target: Option<&CommFieldEndpoint>) -> Option<Arc<RTCDevice>> {
        let leg = self.leg_for_target(target);
        if let (Leg::Inbound(_), Some(t)) = (&leg, target) {
            if self.endpoint(&t.id).is_none() {
                self.add_endpoint(t.clone());
            }
        }
        self.device_for_leg(&leg)
    }

    fn device_for_leg(&self, leg: &Leg) -> Option<Arc<RTCDevice>> {
        match leg {
            Leg::Outbound => self.outbound_device(),
            Leg::Inbound(id) => self.inbound_device(id),
        }
    }

    /// Admit an endpoint, or refresh it in place. Returns true when it is new.
    pub fn add_endpoint(&self, endpoint: CommFieldEndpoint) -> bool {
        let mut endpoints = write(&self.endpoints);
        match endpoints.iter_mut().find(|e| e.id == endpoint.id) {
            Some(existing) => {
                *existing = endpoint;
                false
            }
            None => {
                endpoints.push(endpoint);
                true
            }
        }
    }

    fn remove_endpoint(&self, id: &str) -> Option<CommFieldEndpoint> {
        let mut endpoints = write(&self.endpoints);
        let pos = endpoints.iter().position(|e| e.id == id)?;
        Some(endpoints.remove(pos))
    }

    /// Update the lifecycle state of a roster entry.
    pub fn set_endpoint_state(&self, id: &str, state: EndpointState) {
        if let Some(e) = write(&self.endpoints).iter_mut().find(|e| e.id == id) {
            e.state = state;
        }
    }

    /// Record which streams of a roster entry are unmuted.
    /// Preferences of the local endpoint survive roster replacement.
    pub fn set_stream_enabled(&self, id: &str, video: Option<bool>, audio: Option<bool>) {
        let apply = |e: &mut CommFieldEndpoint| {
            if let Some(video) = video {
                e.video_stream_enabled = video;
            }
            if let Some(audio) = audio {
                e.audio_stream_enabled = audio;
            }
        };
        if id == self.local_id {
            apply(&mut write(&self.local_endpoint));
        }
        if let Some(e) = write(&self.endpoints).iter_mut().find(|e| e.id == id) {
            apply(e);
        }
    }

    /// Keep a remote candidate for a leg whose device is not registered yet.
    pub fn buffer_candidate(&self, leg: Leg, candidate: IceCandidate) {
        tracing::debug!("field {} keeps early candidate for {:?}", self.id, leg);
        self.early_candidates.entry(leg).or_default().push(candidate);
    }

    /// Candidates kept for a leg without device.
    pub fn early_candidates(&self, leg: &Leg) -> usize {
        self.early_candidates.get(leg).map(|v| v.len()).unwrap_or(0)
    }

    /// Merge the server's authoritative view of the field.
    pub fn copy(&self, descriptor: &FieldDescriptor) {
        if descriptor.id != self.id {
            tracing::warn!(
                "field {} ignores descriptor of field {}",
                self.id,
                descriptor.id
            );
            return;
        }
        if !descriptor.endpoints.is_empty() {
            let mut roster: Vec<CommFieldEndpoint> = Vec::with_capacity(descriptor.endpoints.len());
            for e in &descriptor.endpoints {
                if !roster.iter().any(|r| r.id == e.id) {
                    roster.push(e.clone());
                }
            }
            *write(&self.endpoints) = roster;
        }
        if let Some(caller) = &descriptor.caller {
            *write(&self.caller) = Some(caller.clone());
        }
        if let Some(callee) = &descriptor.callee {
            *write(&self.callee) = Some(callee.clone());
        }
    }

    async fn register(&self, device: &Arc<RTCDevice>, leg: &Leg) -> Result<()> {
        match leg {
            Leg::Outbound => {
                let mut outbound = write(&self.outbound);
                if outbound.is_some() {
                    return Err(Error::ConnRepeated);
                }
                *outbound = Some(device.clone());
            }
            Leg::Inbound(id) => match self.inbound.entry(id.clone()) {
                Entry::Occupied(_) => return Err(Error::ConnRepeated),
                Entry::Vacant(v) => {
                    v.insert(device.clone());
                }
            },
        }
        self.serials.insert(device.serial(), leg.clone());

        device
            .set_callback(Arc::new(FieldDeviceCallback::new(
                self.id.clone(),
                self.ctx.events.clone(),
            )))
            .await;

        if let Some((_, early)) = self.early_candidates.remove(leg) {
            tracing::debug!(
                "field {} replays {} early candidates into device {}",
                self.id,
                early.len(),
                device.serial()
            );
            for candidate in early {
                if let Err(e) = device.do_candidate(candidate).await {
                    tracing::warn!("device {} rejects early candidate: {}", device.serial(), e);
                }
            }
        }
        Ok(())
    }

    fn leg_for_device(&self, device: &RTCDevice, target: Option<&CommFieldEndpoint>) -> Result<Leg> {
        if device.mode().is_sending() {
            return Ok(Leg::Outbound);
        }
        match target {
            Some(t) if t.id != self.local_id => {
                if self.endpoint(&t.id).is_none() {
                    self.add_endpoint(t.clone());
                }
                Ok(Leg::Inbound(t.id.clone()))
            }
            _ => Err(Error::SignalingError(
                "a receive only leg needs a remote target".to_string(),
            )),
        }
    }

    /// Register `device`, negotiate an offer and signal it.
    /// Sending devices become the outbound leg, receive only devices the inbound leg of `target`.
    pub async fn launch_offer(
        &self,
        device: Arc<RTCDevice>,
        constraint: &MediaConstraint,
        target: Option<CommFieldEndpoint>,
    ) -> Result<()> {
        let leg = self.leg_for_device(&device, target.as_ref())?;
        self.register(&device, &leg).await?;

        let offer = match device.open_offer(constraint).await {
            Ok(offer) => offer,
            Err(e) => {
                self.close_leg(&leg).await;
                return Err(e.into());
            }
        };

        let signaling = self
            .signaling(SignalingAction::Offer)
            .with_target(self.target_for_leg(&leg))
            .with_description(offer)
            .with_media_constraint(*constraint);
        self.commit(&leg, &signaling).await
    }

    /// Register `device`, answer `offer` and signal the answer.
    pub async fn launch_answer(
        &self,
        device: Arc<RTCDevice>,
        offer: &SessionDescription,
        constraint: &MediaConstraint,
        target: Option<CommFieldEndpoint>,
    ) -> Result<()> {
        let leg = self.leg_for_device(&device, target.as_ref())?;
        self.register(&device, &leg).await?;

        let answer = match device.open_answer(offer, constraint).await {
            Ok(answer) => answer,
            Err(e) => {
                self.close_leg(&leg).await;
                return Err(e.into());
            }
        };

        let signaling = self
            .signaling(SignalingAction::Answer)
            .with_target(self.target_for_leg(&leg))
            .with_description(answer)
            .with_media_constraint(*constraint);
        self.commit(&leg, &signaling).await
    }

    async fn commit(&self, leg: &Leg, signaling: &Signaling) -> Result<()> {
        match self.send_signaling(signaling).await {
            Ok(resp) => {
                if let Some(field) = &resp.field {
                    self.copy(field);
                }
                Ok(())
            }
            Err(e) => {
                self.close_leg(leg).await;
                Err(e)
            }
        }
    }

    async fn apply(&self, action: SignalingAction) -> Result<()> {
        let resp = self.send_signaling(&self.signaling(action)).await?;
        if let Some(field) = &resp.field {
            self.copy(field);
        }
        Ok(())
    }

    /// Reserve the call between caller and callee on the server.
    pub async fn apply_call(&self) -> Result<()> {
        self.apply(SignalingAction::ApplyCall).await
    }

    /// Admit the local endpoint to the field's roster on the server.
    pub async fn apply_join(&self) -> Result<()> {
        self.add_endpoint(self.local_endpoint());
        self.apply(SignalingAction::ApplyJoin).await
    }

    /// Leave the field on the server, without further media negotiation.
    pub async fn apply_terminate(&self) -> Result<()> {
        self.apply(SignalingAction::ApplyTerminate).await
    }

    /// One signaling round trip, bounded by the signaling timeout.
    pub async fn send_signaling(&self, signaling: &Signaling) -> Result<SignalingResponse> {
        send_signaling(
            self.ctx.transport.as_ref(),
            &self.ctx.destination,
            self.ctx.signaling_timeout,
            signaling,
        )
        .await
    }

    /// Close the device of one leg. Returns whether a device was closed.
    pub async fn close_leg(&self, leg: &Leg) -> bool {
        let device = match leg {
            Leg::Outbound => write(&self.outbound).take(),
            Leg::Inbound(id) => self.inbound.remove(id).map(|(_, d)| d),
        };
        self.early_candidates.remove(leg);

        let Some(device) = device else {
            return false;
        };
        device.close().await;
        self.serials.remove(&device.serial());
        tracing::debug!("field {} closed {:?} leg", self.id, leg);
        true
    }

    /// Close the inbound device of an endpoint, then drop it from the roster.
    pub async fn close_endpoint(&self, endpoint_id: &str) -> bool {
        if endpoint_id == self.local_id {
            return self.close_leg(&Leg::Outbound).await;
        }
        let closed = self.close_leg(&Leg::Inbound(endpoint_id.to_string())).await;
        self.remove_endpoint(endpoint_id);
        closed
    }

    /// Close every device, then clear the roster.
    pub async fn close(&self) {
        self.close_leg(&Leg::Outbound).await;
        let inbound: Vec<Leg> = self
            .inbound
            .iter()
            .map(|e| Leg::Inbound(e.key().clone()))
            .collect();
        futures::future::join_all(inbound.iter().map(|leg| self.close_leg(leg))).await;
        self.early_candidates.clear();
        self.serials.clear();
        write(&self.endpoints).clear();
        tracing::info!("field {} closed", self.id);
    }
}

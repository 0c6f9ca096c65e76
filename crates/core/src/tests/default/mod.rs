use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use multipoint_transport::connections::DummyMediaEngine;
use multipoint_transport::core::media::SessionDescription;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::UnboundedSender;

use crate::comm::callback::CommCallback;
use crate::comm::callback::CommEvent;
use crate::comm::MultipointComm;
use crate::comm::MultipointCommBuilder;
use crate::config::CommConfig;
use crate::error::Error;
use crate::error::Result;
use crate::field::CommField;
use crate::identity::Device;
use crate::identity::Identity;
use crate::identity::StaticIdentityService;
use crate::message::FieldDescriptor;
use crate::message::SharedSignalingHandler;
use crate::message::Signaling;
use crate::message::SignalingAction;
use crate::message::SignalingResponse;
use crate::message::SignalingTransport;

mod test_call;
mod test_conference;

/// Long enough for the call timers under paused time.
const EVENT_TIMEOUT: Duration = Duration::from_secs(60);

/// An in-memory signaling server.
///
/// Private signaling is forwarded to the other party of the call. Conference offers are
/// answered by the server itself, as a media server would.
#[derive(Default)]
pub struct LoopbackServer {
    inboxes: DashMap<String, SharedSignalingHandler>,
    fields: DashMap<String, FieldDescriptor>,
    groups: DashMap<String, String>,
    next_field: AtomicU64,
    log: Mutex<Vec<(String, Signaling)>>,
}

impl LoopbackServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn server_identity() -> Identity {
        Identity::new("server", "Loopback", "example.org")
    }

    /// Requests received so far.
    pub fn requests(&self) -> usize {
        self.log.lock().unwrap().len()
    }

    /// Requests of `action` received so far.
    pub fn count(&self, action: SignalingAction) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, s)| s.action == action)
            .count()
    }

    /// Requests of `action` sent by `identity_id`.
    pub fn count_from(&self, identity_id: &str, action: SignalingAction) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(from, s)| from == identity_id && s.action == action)
            .count()
    }

    pub fn conference(&self, field_id: &str) -> Option<FieldDescriptor> {
        self.fields.get(field_id).map(|f| f.value().clone())
    }

    async fn deliver(&self, identity_id: &str, signaling: Signaling) {
        let inbox = self.inboxes.get(identity_id).map(|i| i.value().clone());
        match inbox {
            Some(inbox) => inbox.on_signaling(signaling).await,
            None => tracing::debug!("{} is offline, {:?} dropped", identity_id, signaling.action),
        }
    }

    fn push(&self, action: SignalingAction, field: &FieldDescriptor) -> Signaling {
        Signaling::new(
            action,
            field.clone(),
            Self::server_identity(),
            Device::new("loopback", "test"),
        )
    }

    async fn broadcast(&self, except: &str, signaling: Signaling) {
        for member in signaling.field.endpoints.clone() {
            if member.identity.id != except {
                self.deliver(&member.identity.id, signaling.clone()).await;
            }
        }
    }

    async fn handle(&self, from: &str, signaling: &Signaling) -> Result<SignalingResponse> {
        self.log
            .lock()
            .unwrap()
            .push((from.to_string(), signaling.clone()));

        if signaling.field.is_private {
            return self.handle_private(from, signaling).await;
        }

        match signaling.action {
            SignalingAction::GetField => {
                let group = signaling.field.group_id.clone().unwrap_or_default();
                let field = self
                    .groups
                    .get(&group)
                    .and_then(|id| self.conference(id.value()));
                match field {
                    Some(field) => Ok(SignalingResponse::ok(Some(field))),
                    None => Ok(SignalingResponse::error(&Error::NoCommField(group))),
                }
            }
            SignalingAction::CreateField => {
                let group = signaling.field.group_id.clone().unwrap_or_default();
                let id = format!("conf-{}", self.next_field.fetch_add(1, Ordering::SeqCst));
                let field = FieldDescriptor {
                    id: id.clone(),
                    founder_id: from.to_string(),
                    is_private: false,
                    media_constraint: signaling.field.media_constraint,
                    endpoints: vec![],
                    caller: None,
                    callee: None,
                    group_id: Some(group.clone()),
                };
                self.fields.insert(id.clone(), field.clone());
                self.groups.insert(group, id);
                Ok(SignalingResponse::ok(Some(field)))
            }
            SignalingAction::ApplyJoin => {
                let Some(joiner) = signaling
                    .field
                    .endpoints
                    .iter()
                    .find(|e| e.identity.id == from)
                    .cloned()
                else {
                    return Ok(SignalingResponse::error(&Error::DataStructureError(
                        "joiner not in roster".to_string(),
                    )));
                };
                let field = {
                    let Some(mut field) = self.fields.get_mut(&signaling.field.id) else {
                        return Ok(SignalingResponse::error(&Error::NoCommField(
                            signaling.field.id.clone(),
                        )));
                    };
                    field.endpoints.retain(|e| e.id != joiner.id);
                    field.endpoints.push(joiner.clone());
                    field.clone()
                };
                let arrived = self
                    .push(SignalingAction::Arrived, &field)
                    .with_target(Some(joiner));
                self.broadcast(from, arrived).await;
                Ok(SignalingResponse::ok(Some(field)))
            }
            SignalingAction::ApplyTerminate => {
                let left = {
                    let Some(mut field) = self.fields.get_mut(&signaling.field.id) else {
                        return Ok(SignalingResponse::ok(None));
                    };
                    let leaving = field
                        .endpoints
                        .iter()
                        .find(|e| e.identity.id == from)
                        .cloned();
                    field.endpoints.retain(|e| e.identity.id != from);
                    leaving.map(|e| (e, field.clone()))
                };
                if let Some((endpoint, field)) = left {
                    let left = self
                        .push(SignalingAction::Left, &field)
                        .with_target(Some(endpoint));
                    self.broadcast(from, left).await;
                }
                Ok(SignalingResponse::ok(None))
            }
            SignalingAction::Offer => {
                let field = self
                    .conference(&signaling.field.id)
                    .unwrap_or_else(|| signaling.field.clone());
                let mut answer = self
                    .push(SignalingAction::Answer, &field)
                    .with_target(signaling.target.clone())
                    .with_description(SessionDescription::answer("v=0\r\no=loopback 1 1 IN IP4 0.0.0.0\r\n"));
                answer.media_constraint = signaling.media_constraint;
                self.deliver(from, answer).await;
                Ok(SignalingResponse::ok(Some(field)))
            }
            SignalingAction::Invite => {
                for invitee in &signaling.invitees {
                    let mut invite = signaling.clone();
                    invite.invitees = vec![];
                    self.deliver(&invitee.id, invite).await;
                }
                Ok(SignalingResponse::ok(None))
            }
            _ => Ok(SignalingResponse::ok(None)),
        }
    }

    async fn handle_private(&self, from: &str, signaling: &Signaling) -> Result<SignalingResponse> {
        match signaling.action {
            SignalingAction::ApplyCall | SignalingAction::ApplyTerminate => {
                Ok(SignalingResponse::ok(Some(signaling.field.clone())))
            }
            SignalingAction::Offer
            | SignalingAction::Answer
            | SignalingAction::Candidate
            | SignalingAction::Bye
            | SignalingAction::Busy
            | SignalingAction::Ringing => {
                let caller = signaling.field.caller.as_ref().map(|c| c.id.clone());
                let callee = signaling.field.callee.as_ref().map(|c| c.id.clone());
                let peer = if caller.as_deref() == Some(from) {
                    callee
                } else {
                    caller
                };
                if let Some(peer) = peer {
                    self.deliver(&peer, signaling.clone()).await;
                }
                Ok(SignalingResponse::ok(None))
            }
            _ => Ok(SignalingResponse::ok(None)),
        }
    }
}

/// The connection of one client to the [LoopbackServer].
pub struct LoopbackTransport {
    server: Arc<LoopbackServer>,
    identity_id: String,
}

#[async_trait]
impl SignalingTransport for LoopbackTransport {
    async fn send(&self, _destination: &str, signaling: &Signaling) -> Result<SignalingResponse> {
        self.server.handle(&self.identity_id, signaling).await
    }

    fn on_message(&self, handler: SharedSignalingHandler) {
        self.server
            .inboxes
            .insert(self.identity_id.clone(), handler);
    }
}

pub struct Node {
    pub comm: Arc<MultipointComm>,
    pub engine: Arc<DummyMediaEngine>,
    pub identity: Identity,
    pub contacts: Arc<StaticIdentityService>,
    events_rx: UnboundedReceiver<CommEvent>,
    seen: Vec<CommEvent>,
}

pub struct NodeCallback {
    events_tx: UnboundedSender<CommEvent>,
}

#[async_trait]
impl CommCallback for NodeCallback {
    async fn on_event(
        &self,
        event: &CommEvent,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.events_tx
            .send(event.clone())
            .map_err(|e| e.to_string().into())
    }
}

impl Node {
    pub async fn listen_once(&mut self) -> Option<CommEvent> {
        tokio::time::timeout(EVENT_TIMEOUT, self.events_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Consume events until one matches.
    pub async fn wait_for(&mut self, pred: impl Fn(&CommEvent) -> bool) -> CommEvent {
        loop {
            match self.listen_once().await {
                Some(event) => {
                    self.seen.push(event.clone());
                    if pred(&event) {
                        return event;
                    }
                }
                None => panic!(
                    "{} waited in vain, seen: {:#?}",
                    self.identity.id, self.seen
                ),
            }
        }
    }

    /// Events consumed so far.
    pub fn seen(&self) -> &[CommEvent] {
        &self.seen
    }

    /// Make `other` resolvable by this node.
    pub fn know(&self, other: &Node) {
        self.contacts.add_contact(other.identity.clone());
    }

    /// The field of the current call.
    pub fn active_field(&self) -> Arc<CommField> {
        self.comm
            .call_record()
            .and_then(|r| r.field)
            .expect("no active field")
    }
}

pub fn prepare_node(server: &Arc<LoopbackServer>, id: &str, name: &str) -> Node {
    prepare_node_with(
        server,
        Identity::new(id, name, "example.org"),
        DummyMediaEngine::new(),
        CommConfig::default(),
    )
}

pub fn prepare_node_with(
    server: &Arc<LoopbackServer>,
    identity: Identity,
    engine: DummyMediaEngine,
    config: CommConfig,
) -> Node {
    let engine = Arc::new(engine);
    let contacts = Arc::new(StaticIdentityService::new(
        Some(identity.clone()),
        Device::new(format!("{}-laptop", identity.name), "linux"),
    ));
    let transport = Arc::new(LoopbackTransport {
        server: server.clone(),
        identity_id: identity.id.clone(),
    });
    let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();

    let comm = MultipointCommBuilder::new(engine.clone(), transport, contacts.clone())
        .config(config)
        .callback(Arc::new(NodeCallback { events_tx }))
        .build()
        .unwrap();
    tokio::spawn(comm.clone().listen());

    Node {
        comm,
        engine,
        identity,
        contacts,
        events_rx,
        seen: vec![],
    }
}

/// Two nodes that know each other.
pub fn prepare_pair(server: &Arc<LoopbackServer>) -> (Node, Node) {
    let alice = prepare_node(server, "10001", "Alice");
    let bob = prepare_node(server, "10002", "Bob");
    alice.know(&bob);
    bob.know(&alice);
    (alice, bob)
}

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;
use rand::distributions::Distribution;

use crate::callback::InnerDeviceCallback;
use crate::core::engine::MediaEngine;
use crate::core::media::DeviceMode;
use crate::core::media::IceCandidate;
use crate::core::media::MediaConnectionState;
use crate::core::media::MediaConstraint;
use crate::core::media::MediaStream;
use crate::core::media::SessionConfig;
use crate::core::media::SessionDescription;
use crate::core::media::SessionHandle;
use crate::core::media::TrackKind;
use crate::error::Error;
use crate::error::Result;

/// Number of host candidates every dummy session gathers after its local description is set.
pub const DUMMY_LOCAL_CANDIDATES: usize = 2;

/// Failures the [DummyMediaEngine] injects on demand.
#[derive(Debug, Clone, Copy, Default)]
pub struct DummyFaults {
    /// The user refuses camera/microphone access.
    pub deny_media: bool,
    /// Session creation fails.
    pub fail_create_session: bool,
    /// Offer generation fails.
    pub fail_create_offer: bool,
    /// Answer generation fails.
    pub fail_create_answer: bool,
    /// Applying a local description fails.
    pub fail_local_description: bool,
    /// Applying a remote description fails.
    pub fail_remote_description: bool,
}

struct DummySession {
    mode: DeviceMode,
    callback: Arc<InnerDeviceCallback>,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    applied: Vec<IceCandidate>,
    attached: Option<String>,
    state: MediaConnectionState,
}

/// A media engine for local testing, no capture and no network.
///
/// Sessions gather [DUMMY_LOCAL_CANDIDATES] candidates once their local description is set
/// and report `Connecting` then `Connected` once both descriptions are in place.
/// Remote candidates are recorded in arrival order and rejected before a remote description exists,
/// the same way a real ICE agent behaves.
pub struct DummyMediaEngine {
    next_id: AtomicU64,
    faults: Mutex<DummyFaults>,
    auto_connect: bool,
    sessions: DashMap<SessionHandle, DummySession>,
    streams: DashMap<String, MediaStream>,
    tracks: DashMap<(String, TrackKind), bool>,
}

impl Default for DummyMediaEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyMediaEngine {
    /// Create a new [DummyMediaEngine] whose sessions connect as soon as negotiation completes.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            faults: Mutex::new(DummyFaults::default()),
            auto_connect: true,
            sessions: DashMap::new(),
            streams: DashMap::new(),
            tracks: DashMap::new(),
        }
    }

    /// Sessions stay in `New` until [DummyMediaEngine::set_connection_state] is called.
    pub fn manual_connect(mut self) -> Self {
        self.auto_connect = false;
        self
    }

    /// Replace the injected faults.
    pub fn set_faults(&self, faults: DummyFaults) {
        *self.faults.lock().unwrap_or_else(|e| e.into_inner()) = faults;
    }

    fn faults(&self) -> DummyFaults {
        *self.faults.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Remote candidates applied to a session, in application order.
    pub fn applied_candidates(&self, handle: SessionHandle) -> Vec<IceCandidate> {
        self.sessions
            .get(&handle)
            .map(|s| s.applied.clone())
            .unwrap_or_default()
    }

    /// Sessions created and not closed yet.
    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Local streams acquired and not released yet.
    pub fn live_streams(&self) -> usize {
        self.streams.len()
    }

    /// Last `enabled` flag set on a track, `None` if it was never toggled.
    pub fn track_enabled(&self, stream_id: &str, kind: TrackKind) -> Option<bool> {
        self.tracks
            .get(&(stream_id.to_string(), kind))
            .map(|v| *v.value())
    }

    /// The local stream attached to a session.
    pub fn attached_stream(&self, handle: SessionHandle) -> Option<String> {
        self.sessions.get(&handle).and_then(|s| s.attached.clone())
    }

    /// Force a connection state on a session, as if the network changed.
    pub async fn set_connection_state(&self, handle: SessionHandle, state: MediaConnectionState) {
        let callback = {
            let Some(mut session) = self.sessions.get_mut(&handle) else {
                return;
            };
            if session.state == state {
                return;
            }
            session.state = state;
            session.callback.clone()
        };
        callback.on_connection_state_change(state).await;
    }

    fn session_err(handle: SessionHandle) -> Error {
        Error::Engine(format!("{handle} not found"))
    }

    async fn gather_candidates(&self, handle: SessionHandle) -> Result<()> {
        let callback = self
            .sessions
            .get(&handle)
            .map(|s| s.callback.clone())
            .ok_or_else(|| Self::session_err(handle))?;

        for i in 0..DUMMY_LOCAL_CANDIDATES {
            let port = random(10000, 60000);
            let candidate = IceCandidate::new(format!(
                "candidate:{i} 1 udp 2122260223 10.0.{}.{} {port} typ host",
                handle.0 % 256,
                i + 1,
            ));
            callback.on_ice_candidate(candidate).await;
        }
        Ok(())
    }

    async fn maybe_connect(&self, handle: SessionHandle) {
        if !self.auto_connect {
            return;
        }

        let (callback, mode) = {
            let Some(session) = self.sessions.get(&handle) else {
                return;
            };
            if session.local.is_none()
                || session.remote.is_none()
                || session.state == MediaConnectionState::Connected
            {
                return;
            }
            (session.callback.clone(), session.mode)
        };

        self.set_connection_state(handle, MediaConnectionState::Connecting)
            .await;
        self.set_connection_state(handle, MediaConnectionState::Connected)
            .await;

        if mode != DeviceMode::SendOnly {
            callback
                .on_track(MediaStream {
                    id: format!("remote-{}", handle.0),
                    audio: true,
                    video: true,
                })
                .await;
        }
    }
}

#[async_trait]
impl MediaEngine for DummyMediaEngine {
    async fn create_session(
        &self,
        config: SessionConfig,
        callback: Arc<InnerDeviceCallback>,
    ) -> Result<SessionHandle> {
        if self.faults().fail_create_session {
            return Err(Error::Engine("peer connection unavailable".to_string()));
        }

        let handle = SessionHandle(self.next_id.fetch_add(1, Ordering::SeqCst));
        tracing::debug!(
            "dummy {handle} created for device {} ({}), {} ice servers",
            config.serial,
            config.mode,
            config.ice_servers.len()
        );
        self.sessions.insert(handle, DummySession {
            mode: config.mode,
            callback,
            local: None,
            remote: None,
            applied: vec![],
            attached: None,
            state: MediaConnectionState::New,
        });
        Ok(handle)
    }

    async fn create_offer(
        &self,
        handle: SessionHandle,
        constraint: &MediaConstraint,
    ) -> Result<SessionDescription> {
        if self.faults().fail_create_offer {
            return Err(Error::Engine("offer generation failed".to_string()));
        }
        let mode = self
            .sessions
            .get(&handle)
            .map(|s| s.mode)
            .ok_or_else(|| Self::session_err(handle))?;
        Ok(SessionDescription::offer(format!(
            "v=0\r\no=dummy {} 1 IN IP4 0.0.0.0\r\na={mode}\r\na=audio:{}\r\na=video:{}\r\n",
            handle.0, constraint.audio, constraint.video
        )))
    }

    async fn create_answer(
        &self,
        handle: SessionHandle,
        offer: &SessionDescription,
        constraint: &MediaConstraint,
    ) -> Result<SessionDescription> {
        if self.faults().fail_create_answer {
            return Err(Error::Engine("answer generation failed".to_string()));
        }
        let session = self
            .sessions
            .get(&handle)
            .ok_or_else(|| Self::session_err(handle))?;
        if session.remote.as_ref() != Some(offer) {
            return Err(Error::Engine("offer is not the remote description".to_string()));
        }
        Ok(SessionDescription::answer(format!(
            "v=0\r\no=dummy {} 1 IN IP4 0.0.0.0\r\na={}\r\na=audio:{}\r\na=video:{}\r\n",
            handle.0, session.mode, constraint.audio, constraint.video
        )))
    }

    async fn set_local_description(
        &self,
        handle: SessionHandle,
        description: &SessionDescription,
    ) -> Result<()> {
        if self.faults().fail_local_description {
            return Err(Error::Engine("local description rejected".to_string()));
        }
        {
            let mut session = self
                .sessions
                .get_mut(&handle)
                .ok_or_else(|| Self::session_err(handle))?;
            session.local = Some(description.clone());
        }
        self.gather_candidates(handle).await?;
        self.maybe_connect(handle).await;
        Ok(())
    }

    async fn set_remote_description(
        &self,
        handle: SessionHandle,
        description: &SessionDescription,
    ) -> Result<()> {
        if self.faults().fail_remote_description {
            return Err(Error::Engine("remote description rejected".to_string()));
        }
        {
            let mut session = self
                .sessions
                .get_mut(&handle)
                .ok_or_else(|| Self::session_err(handle))?;
            session.remote = Some(description.clone());
        }
        self.maybe_connect(handle).await;
        Ok(())
    }

    async fn add_ice_candidate(
        &self,
        handle: SessionHandle,
        candidate: &IceCandidate,
    ) -> Result<()> {
        let mut session = self
            .sessions
            .get_mut(&handle)
            .ok_or_else(|| Self::session_err(handle))?;
        if session.remote.is_none() {
            return Err(Error::Engine(
                "candidate before remote description".to_string(),
            ));
        }
        session.applied.push(candidate.clone());
        Ok(())
    }

    async fn acquire_local_media(&self, constraint: &MediaConstraint) -> Result<MediaStream> {
        if self.faults().deny_media {
            return Err(Error::MediaPermissionDenied(
                "NotAllowedError: permission denied by user".to_string(),
            ));
        }
        let stream = MediaStream {
            id: format!("local-{}", random(0, 10000000000)),
            audio: constraint.audio,
            video: constraint.video,
        };
        self.streams.insert(stream.id.clone(), stream.clone());
        Ok(stream)
    }

    async fn attach_stream(&self, handle: SessionHandle, stream: &MediaStream) -> Result<()> {
        let mut session = self
            .sessions
            .get_mut(&handle)
            .ok_or_else(|| Self::session_err(handle))?;
        session.attached = Some(stream.id.clone());
        Ok(())
    }

    async fn release_local_media(&self, stream: &MediaStream) -> Result<()> {
        self.streams.remove(&stream.id);
        Ok(())
    }

    fn set_track_enabled(&self, stream: &MediaStream, kind: TrackKind, enabled: bool) {
        if stream.has_track(kind) {
            self.tracks.insert((stream.id.clone(), kind), enabled);
        }
    }

    async fn close(&self, handle: SessionHandle) -> Result<()> {
        self.sessions.remove(&handle);
        Ok(())
    }
}

fn random(low: u64, high: u64) -> u64 {
    let range = rand::distributions::Uniform::new(low, high);
    let mut rng = rand::thread_rng();
    range.sample(&mut rng)
}

//! This module contains the [RTCDevice] struct, one media endpoint of a call.
//!
//! A device owns at most one engine session and walks it through offer/answer negotiation.
//! Remote ICE candidates that arrive before the session has both descriptions are buffered
//! and flushed in arrival order exactly once, when the device becomes ready.

use std::collections::VecDeque;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::lock::Mutex as FuturesMutex;
use futures::lock::MutexGuard;

use crate::callback::InnerDeviceCallback;
use crate::core::callback::DeviceCallback;
use crate::core::callback::SharedDeviceCallback;
use crate::core::engine::SharedMediaEngine;
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
use crate::ice_server::IceServer;

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Serials are unique within the process and never reused.
fn next_serial() -> u64 {
    NEXT_SERIAL.fetch_add(1, Ordering::Relaxed)
}

struct NoopDeviceCallback;

impl DeviceCallback for NoopDeviceCallback {}

/// Lifecycle of a [RTCDevice].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Created, negotiation not started.
    Idle,
    /// Offer or answer in flight.
    Negotiating,
    /// Local and remote descriptions applied, candidates flow directly to the engine.
    Ready,
    /// The engine reports connected media.
    MediaConnected,
    /// Media was connected and got lost.
    MediaDisconnected,
    /// Closed, terminal.
    Closed,
}

#[derive(Debug, Clone, Copy)]
struct StreamFlags {
    outbound_video: bool,
    outbound_audio: bool,
    inbound_video: bool,
    inbound_audio: bool,
}

impl Default for StreamFlags {
    fn default() -> Self {
        Self {
            outbound_video: true,
            outbound_audio: true,
            inbound_video: true,
            inbound_audio: true,
        }
    }
}

struct DeviceInner {
    callback: SharedDeviceCallback,
    handle: Option<SessionHandle>,
    started: bool,
    ready: bool,
    media_connected: bool,
    media_lost: bool,
    closed: bool,
    constraint: Option<MediaConstraint>,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    pending_candidates: VecDeque<IceCandidate>,
    outbound_stream: Option<MediaStream>,
    inbound_stream: Option<MediaStream>,
    flags: StreamFlags,
}

impl DeviceInner {
    fn state(&self) -> DeviceState {
        if self.closed {
            DeviceState::Closed
        } else if self.media_connected {
            DeviceState::MediaConnected
        } else if self.media_lost {
            DeviceState::MediaDisconnected
        } else if self.ready {
            DeviceState::Ready
        } else if self.started {
            DeviceState::Negotiating
        } else {
            DeviceState::Idle
        }
    }
}

/// A media endpoint bound to one engine session.
///
/// All mutation goes through one async lock, so engine calls of a device never interleave
/// and buffered candidates keep their order.
pub struct RTCDevice {
    serial: u64,
    mode: DeviceMode,
    ice_servers: Vec<IceServer>,
    engine: SharedMediaEngine,
    inner: FuturesMutex<DeviceInner>,
}

impl RTCDevice {
    /// Create a new device with a fresh serial. No engine resource is touched yet.
    pub fn new(mode: DeviceMode, ice_servers: Vec<IceServer>, engine: SharedMediaEngine) -> Self {
        Self {
            serial: next_serial(),
            mode,
            ice_servers,
            engine,
            inner: FuturesMutex::new(DeviceInner {
                callback: Arc::new(NoopDeviceCallback),
                handle: None,
                started: false,
                ready: false,
                media_connected: false,
                media_lost: false,
                closed: false,
                constraint: None,
                local_description: None,
                remote_description: None,
                pending_candidates: VecDeque::new(),
                outbound_stream: None,
                inbound_stream: None,
                flags: StreamFlags::default(),
            }),
        }
    }

    /// Serial of the device.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Media direction of the device.
    pub fn mode(&self) -> DeviceMode {
        self.mode
    }

    /// Ice servers handed to the engine session.
    pub fn ice_servers(&self) -> &[IceServer] {
        &self.ice_servers
    }

    /// Bind the observer of engine events. Must happen before negotiation starts
    /// to take effect, the session captures the callback on creation.
    pub async fn set_callback(&self, callback: SharedDeviceCallback) {
        self.inner.lock().await.callback = callback;
    }

    /// Current [DeviceState].
    pub async fn state(&self) -> DeviceState {
        self.inner.lock().await.state()
    }

    /// Whether both descriptions are applied.
    pub async fn is_ready(&self) -> bool {
        self.inner.lock().await.ready
    }

    /// Whether the device is closed.
    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.closed
    }

    /// Engine session handle, once negotiation started.
    pub async fn handle(&self) -> Option<SessionHandle> {
        self.inner.lock().await.handle
    }

    /// Number of remote candidates waiting for the device to become ready.
    pub async fn pending_candidates(&self) -> usize {
        self.inner.lock().await.pending_candidates.len()
    }

    /// Constraint negotiation started with.
    pub async fn constraint(&self) -> Option<MediaConstraint> {
        self.inner.lock().await.constraint
    }

    /// Local description applied to the session.
    pub async fn local_description(&self) -> Option<SessionDescription> {
        self.inner.lock().await.local_description.clone()
    }

    /// Remote description applied to the session.
    pub async fn remote_description(&self) -> Option<SessionDescription> {
        self.inner.lock().await.remote_description.clone()
    }

    /// The local stream this device publishes.
    pub async fn outbound_stream(&self) -> Option<MediaStream> {
        self.inner.lock().await.outbound_stream.clone()
    }

    /// The remote stream this device plays.
    pub async fn inbound_stream(&self) -> Option<MediaStream> {
        self.inner.lock().await.inbound_stream.clone()
    }

    /// Attach an already acquired local stream instead of opening capture on negotiation.
    pub async fn set_outbound_stream(&self, stream: MediaStream) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(Error::DeviceClosed(self.serial));
        }
        if inner.started {
            return Err(Error::InvalidDeviceState(
                self.serial,
                "outbound stream must be set before negotiation".to_string(),
            ));
        }
        inner.outbound_stream = Some(stream);
        Ok(())
    }

    /// Start negotiation as the calling side and return the offer to signal.
    pub async fn open_offer(&self, constraint: &MediaConstraint) -> Result<SessionDescription> {
        let mut inner = self.lock_for_open(constraint).await?;

        match self.negotiate_offer(&mut inner, constraint).await {
            Ok(offer) => {
                tracing::debug!("device {} offer created", self.serial);
                Ok(offer)
            }
            Err(e) => {
                tracing::warn!("device {} open offer failed: {}", self.serial, e);
                self.close_inner(&mut inner).await;
                Err(e)
            }
        }
    }

    /// Start negotiation as the called side: apply `offer` and return the answer to signal.
    /// The device is ready once this returns.
    pub async fn open_answer(
        &self,
        offer: &SessionDescription,
        constraint: &MediaConstraint,
    ) -> Result<SessionDescription> {
        let mut inner = self.lock_for_open(constraint).await?;

        match self.negotiate_answer(&mut inner, offer, constraint).await {
            Ok(answer) => {
                tracing::debug!("device {} answer created", self.serial);
                self.on_ready(&mut inner).await;
                Ok(answer)
            }
            Err(e) => {
                tracing::warn!("device {} open answer failed: {}", self.serial, e);
                self.close_inner(&mut inner).await;
                Err(e)
            }
        }
    }

    /// Apply the remote answer to a device opened with [RTCDevice::open_offer].
    /// A repeated answer is ignored.
    pub async fn do_answer(&self, answer: &SessionDescription) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(Error::DeviceClosed(self.serial));
        }
        if inner.ready {
            tracing::debug!("device {} ignores repeated answer", self.serial);
            return Ok(());
        }
        let Some(handle) = inner.handle.filter(|_| inner.local_description.is_some()) else {
            return Err(Error::InvalidDeviceState(
                self.serial,
                "answer before offer".to_string(),
            ));
        };

        if let Err(e) = self.engine.set_remote_description(handle, answer).await {
            tracing::warn!("device {} rejects answer: {}", self.serial, e);
            self.close_inner(&mut inner).await;
            return Err(Error::RemoteDescriptionFault(e.to_string()));
        }
        inner.remote_description = Some(answer.clone());
        self.on_ready(&mut inner).await;
        Ok(())
    }

    /// Apply one remote candidate, or buffer it until the device is ready.
    pub async fn do_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(Error::DeviceClosed(self.serial));
        }

        match inner.handle.filter(|_| inner.ready) {
            Some(handle) => self
                .engine
                .add_ice_candidate(handle, &candidate)
                .await
                .map_err(|e| Error::RTCPeerError(e.to_string())),
            None => {
                tracing::trace!("device {} buffers early candidate", self.serial);
                inner.pending_candidates.push_back(candidate);
                Ok(())
            }
        }
    }

    /// Enable or disable the outbound video track. The request is remembered and
    /// replayed once the device is ready. Returns whether a live track was toggled.
    pub async fn enable_outbound_video(&self, enabled: bool) -> bool {
        let mut inner = self.inner.lock().await;
        inner.flags.outbound_video = enabled;
        self.apply_track(&inner, true, TrackKind::Video, enabled)
    }

    /// Enable or disable the outbound audio track. See [RTCDevice::enable_outbound_video].
    pub async fn enable_outbound_audio(&self, enabled: bool) -> bool {
        let mut inner = self.inner.lock().await;
        inner.flags.outbound_audio = enabled;
        self.apply_track(&inner, true, TrackKind::Audio, enabled)
    }

    /// Enable or disable playback of the inbound video track.
    pub async fn enable_inbound_video(&self, enabled: bool) -> bool {
        let mut inner = self.inner.lock().await;
        inner.flags.inbound_video = enabled;
        self.apply_track(&inner, false, TrackKind::Video, enabled)
    }

    /// Enable or disable playback of the inbound audio track.
    pub async fn enable_inbound_audio(&self, enabled: bool) -> bool {
        let mut inner = self.inner.lock().await;
        inner.flags.inbound_audio = enabled;
        self.apply_track(&inner, false, TrackKind::Audio, enabled)
    }

    /// Requested `(video, audio)` state of the outbound stream.
    pub async fn outbound_enabled(&self) -> (bool, bool) {
        let flags = self.inner.lock().await.flags;
        (flags.outbound_video, flags.outbound_audio)
    }

    /// Requested `(video, audio)` state of the inbound stream.
    pub async fn inbound_enabled(&self) -> (bool, bool) {
        let flags = self.inner.lock().await.flags;
        (flags.inbound_video, flags.inbound_audio)
    }

    /// Feed a connection state reported by the engine and return the resulting [DeviceState].
    pub async fn on_connection_state(&self, state: MediaConnectionState) -> DeviceState {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return DeviceState::Closed;
        }

        match state {
            MediaConnectionState::Connected => {
                inner.media_connected = true;
                inner.media_lost = false;
            }
            MediaConnectionState::Disconnected | MediaConnectionState::Failed => {
                if inner.media_connected {
                    inner.media_lost = true;
                }
                inner.media_connected = false;
            }
            _ => {}
        }
        inner.state()
    }

    /// Record the remote stream and apply the requested inbound track state to it.
    pub async fn on_track(&self, stream: MediaStream) {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return;
        }
        tracing::debug!("device {} received stream {}", self.serial, stream.id);
        inner.inbound_stream = Some(stream);
        self.sync_stream_state(&inner);
    }

    /// Release the engine session and local capture. Closing twice is a no-op.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        self.close_inner(&mut inner).await;
    }

    async fn lock_for_open(
        &self,
        constraint: &MediaConstraint,
    ) -> Result<MutexGuard<'_, DeviceInner>> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(Error::DeviceClosed(self.serial));
        }
        if inner.started {
            return Err(Error::ConnRepeated(self.serial));
        }
        inner.started = true;
        inner.constraint = Some(*constraint);
        Ok(inner)
    }

    async fn ensure_session(&self, inner: &mut DeviceInner) -> Result<SessionHandle> {
        if let Some(handle) = inner.handle {
            return Ok(handle);
        }
        let config = SessionConfig {
            serial: self.serial,
            mode: self.mode,
            ice_servers: self.ice_servers.clone(),
        };
        let callback = Arc::new(InnerDeviceCallback::new(
            self.serial,
            inner.callback.clone(),
        ));
        let handle = self
            .engine
            .create_session(config, callback)
            .await
            .map_err(|e| Error::RTCPeerError(e.to_string()))?;
        inner.handle = Some(handle);
        Ok(handle)
    }

    /// Only sending devices open capture, and only when no stream was attached up front.
    async fn prepare_local_media(
        &self,
        inner: &mut DeviceInner,
        handle: SessionHandle,
        constraint: &MediaConstraint,
    ) -> Result<()> {
        if !self.mode.is_sending() {
            return Ok(());
        }
        let stream = match inner.outbound_stream.clone() {
            Some(stream) => stream,
            None => {
                let stream = self
                    .engine
                    .acquire_local_media(constraint)
                    .await
                    .map_err(|e| match e {
                        Error::MediaPermissionDenied(reason) => Error::MediaPermissionDenied(reason),
                        other => Error::MediaPermissionDenied(other.to_string()),
                    })?;
                inner.outbound_stream = Some(stream.clone());
                stream
            }
        };
        self.engine
            .attach_stream(handle, &stream)
            .await
            .map_err(|e| Error::RTCPeerError(e.to_string()))
    }

    async fn negotiate_offer(
        &self,
        inner: &mut DeviceInner,
        constraint: &MediaConstraint,
    ) -> Result<SessionDescription> {
        let handle = self.ensure_session(inner).await?;
        self.prepare_local_media(inner, handle, constraint).await?;

        let offer = self
            .engine
            .create_offer(handle, constraint)
            .await
            .map_err(|e| Error::CreateOfferFailed(e.to_string()))?;
        self.engine
            .set_local_description(handle, &offer)
            .await
            .map_err(|e| Error::LocalDescriptionFault(e.to_string()))?;
        inner.local_description = Some(offer.clone());
        Ok(offer)
    }

    async fn negotiate_answer(
        &self,
        inner: &mut DeviceInner,
        offer: &SessionDescription,
        constraint: &MediaConstraint,
    ) -> Result<SessionDescription> {
        let handle = self.ensure_session(inner).await?;
        self.prepare_local_media(inner, handle, constraint).await?;

        self.engine
            .set_remote_description(handle, offer)
            .await
            .map_err(|e| Error::RemoteDescriptionFault(e.to_string()))?;
        inner.remote_description = Some(offer.clone());

        let answer = self
            .engine
            .create_answer(handle, offer, constraint)
            .await
            .map_err(|e| Error::CreateAnswerFailed(e.to_string()))?;
        self.engine
            .set_local_description(handle, &answer)
            .await
            .map_err(|e| Error::LocalDescriptionFault(e.to_string()))?;
        inner.local_description = Some(answer.clone());
        Ok(answer)
    }

    /// Flush buffered candidates in arrival order, then replay the requested track state.
    async fn on_ready(&self, inner: &mut DeviceInner) {
        inner.ready = true;
        let Some(handle) = inner.handle else {
            return;
        };

        let pending: Vec<IceCandidate> = inner.pending_candidates.drain(..).collect();
        if !pending.is_empty() {
            tracing::debug!(
                "device {} flushes {} buffered candidates",
                self.serial,
                pending.len()
            );
        }
        for candidate in pending {
            if let Err(e) = self.engine.add_ice_candidate(handle, &candidate).await {
                tracing::warn!("device {} failed to apply candidate: {}", self.serial, e);
            }
        }

        self.sync_stream_state(inner);
    }

    fn sync_stream_state(&self, inner: &DeviceInner) {
        let flags = inner.flags;
        if let Some(stream) = &inner.outbound_stream {
            self.engine
                .set_track_enabled(stream, TrackKind::Video, flags.outbound_video);
            self.engine
                .set_track_enabled(stream, TrackKind::Audio, flags.outbound_audio);
        }
        if let Some(stream) = &inner.inbound_stream {
            self.engine
                .set_track_enabled(stream, TrackKind::Video, flags.inbound_video);
            self.engine
                .set_track_enabled(stream, TrackKind::Audio, flags.inbound_audio);
        }
    }

    fn apply_track(
        &self,
        inner: &DeviceInner,
        outbound: bool,
        kind: TrackKind,
        enabled: bool,
    ) -> bool {
        if !inner.ready || inner.closed {
            return false;
        }
        let stream = if outbound {
            &inner.outbound_stream
        } else {
            &inner.inbound_stream
        };
        match stream {
            Some(stream) if stream.has_track(kind) => {
                self.engine.set_track_enabled(stream, kind, enabled);
                true
            }
            _ => false,
        }
    }

    async fn close_inner(&self, inner: &mut DeviceInner) {
        if inner.closed {
            return;
        }
        inner.closed = true;
        inner.ready = false;
        inner.media_connected = false;
        inner.pending_candidates.clear();

        if let Some(stream) = inner.outbound_stream.take() {
            if let Err(e) = self.engine.release_local_media(&stream).await {
                tracing::warn!("device {} failed to release local media: {}", self.serial, e);
            }
        }
        inner.inbound_stream = None;

        if let Some(handle) = inner.handle.take() {
            if let Err(e) = self.engine.close(handle).await {
                tracing::warn!("device {} failed to close {}: {}", self.serial, handle, e);
            }
        }
        tracing::info!("device {} closed", self.serial);
    }
}

#![warn(missing_docs)]
//! This module provides [MultipointCommBuilder] and its interface for
//! [MultipointComm]

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;

use dashmap::DashMap;
use futures::lock::Mutex as FuturesMutex;
use multipoint_transport::core::engine::SharedMediaEngine;

use crate::comm::callback::CommCallback;
use crate::comm::callback::SharedCommCallback;
use crate::comm::callback::SignalingInbox;
use crate::comm::MultipointComm;
use crate::comm::VideoSinks;
use crate::config::CommConfig;
use crate::error::Result;
use crate::identity::SharedIdentityService;
use crate::message::SharedSignalingTransport;

struct DefaultCallback;
impl CommCallback for DefaultCallback {}

/// Creates a MultipointCommBuilder to configure a MultipointComm.
pub struct MultipointCommBuilder {
    engine: SharedMediaEngine,
    transport: SharedSignalingTransport,
    identity: SharedIdentityService,
    config: CommConfig,
    callback: Option<SharedCommCallback>,
}

impl MultipointCommBuilder {
    /// Creates new instance of [MultipointCommBuilder]
    pub fn new(
        engine: SharedMediaEngine,
        transport: SharedSignalingTransport,
        identity: SharedIdentityService,
    ) -> Self {
        Self {
            engine,
            transport,
            identity,
            config: CommConfig::default(),
            callback: None,
        }
    }

    /// Replace the default configuration.
    pub fn config(mut self, config: CommConfig) -> Self {
        self.config = config;
        self
    }

    /// Bind callback for MultipointComm.
    pub fn callback(mut self, callback: SharedCommCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Try build for `MultipointComm`, and register it as receiver of the transport's inbound signaling.
    pub fn build(self) -> Result<Arc<MultipointComm>> {
        let ice_servers = self.config.parse_ice_servers()?;
        let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();

        let callback = RwLock::new(
            self.callback
                .unwrap_or_else(|| Arc::new(DefaultCallback {})),
        );

        self.transport
            .on_message(Arc::new(SignalingInbox::new(events_tx.clone())));

        Ok(Arc::new(MultipointComm {
            config: self.config,
            ice_servers,
            engine: self.engine,
            transport: self.transport,
            identity: self.identity,
            callback,
            events_tx,
            events_rx: FuturesMutex::new(events_rx),
            record: Mutex::new(None),
            fields: DashMap::new(),
            ended: DashMap::new(),
            seq: AtomicU64::new(1),
            marks: AtomicU64::new(1),
            sinks: Mutex::new(VideoSinks::default()),
        }))
    }
}

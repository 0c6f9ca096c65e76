//! Identities, devices and groups, plus the [IdentityService] contract with the host's
//! contact and authentication services.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use serde::Serialize;

use crate::error::Error;
use crate::error::Result;

/// A contact known to the identity service.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Account id, unique per domain.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Account domain.
    #[serde(default)]
    pub domain: String,
}

impl Identity {
    /// Build an identity.
    pub fn new(id: impl Into<String>, name: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            domain: domain.into(),
        }
    }
}

/// The client device an identity signed in with.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Device name shown to peers.
    pub name: String,
    /// OS or client platform.
    pub platform: String,
}

impl Device {
    /// Build a device.
    pub fn new(name: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            platform: platform.into(),
        }
    }
}

/// A set of identities that can hold a conference.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    /// Group id.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Members known to the client.
    #[serde(default)]
    pub members: Vec<Identity>,
}

/// Contract with the host's contact and authentication services.
#[async_trait]
pub trait IdentityService: Send + Sync {
    /// The signed in identity, `None` before sign in.
    fn local_identity(&self) -> Option<Identity>;

    /// The device of this client.
    fn local_device(&self) -> Device;

    /// Look up a contact, [Error::NoContact] when unknown.
    async fn resolve_identity(&self, id: &str) -> Result<Identity>;
}

/// Shared [IdentityService] trait object.
pub type SharedIdentityService = Arc<dyn IdentityService>;

/// An [IdentityService] over a fixed in-memory directory.
pub struct StaticIdentityService {
    local: Option<Identity>,
    device: Device,
    contacts: DashMap<String, Identity>,
}

impl StaticIdentityService {
    /// Directory holding only `local`, if any.
    pub fn new(local: Option<Identity>, device: Device) -> Self {
        let contacts = DashMap::new();
        if let Some(local) = &local {
            contacts.insert(local.id.clone(), local.clone());
        }
        Self {
            local,
            device,
            contacts,
        }
    }

    /// Add or replace a contact.
    pub fn add_contact(&self, identity: Identity) {
        self.contacts.insert(identity.id.clone(), identity);
    }
}

#[async_trait]
impl IdentityService for StaticIdentityService {
    fn local_identity(&self) -> Option<Identity> {
        self.local.clone()
    }

    fn local_device(&self) -> Device {
        self.device.clone()
    }

    async fn resolve_identity(&self, id: &str) -> Result<Identity> {
        self.contacts
            .get(id)
            .map(|v| v.value().clone())
            .ok_or_else(|| Error::NoContact(id.to_string()))
    }
}

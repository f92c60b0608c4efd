//! RPC identifiers and the engine-owned registration table.
//!
//! An [`RpcId`] is derived deterministically from `(name, provider id)`:
//! the upper 48 bits hash the name, the lower 16 bits carry the provider
//! id. Both sides of a connection therefore agree on the id of a named
//! RPC without exchanging a mapping, and the provider id can be recovered
//! from any inbound id.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{EngineError, Result};
use crate::handle::RpcHandler;

/// Identifier of a registered RPC within a `(name, provider id)` scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RpcId(u64);

impl RpcId {
    /// Derive the id for `name` under `provider_id`.
    pub fn derive(name: &str, provider_id: u16) -> Self {
        let hash = xxh3_64(name.as_bytes());
        RpcId((hash & !0xffff) | u64::from(provider_id))
    }

    /// The provider id embedded in this RPC id.
    pub fn provider_id(self) -> u16 {
        (self.0 & 0xffff) as u16
    }

    /// Raw value, for transport-level addressing.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RpcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// One registration: the name it was registered under, the optional
/// server-side handler, and the fire-and-forget flag.
pub(crate) struct RpcEntry {
    pub(crate) name: String,
    pub(crate) handler: Option<Arc<dyn RpcHandler>>,
    pub(crate) response_disabled: bool,
}

/// Engine-owned table of RPC registrations.
///
/// Registration and dispatch race with each other on transport-managed
/// threads, so every access goes through the interior lock.
#[derive(Default)]
pub(crate) struct RpcRegistry {
    entries: RwLock<HashMap<RpcId, RpcEntry>>,
}

impl RpcRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) the registration for `(name, provider_id)`.
    ///
    /// Re-registering the same pair returns the same id; the handler and
    /// flags are replaced.
    pub(crate) fn insert(
        &self,
        name: &str,
        handler: Option<Arc<dyn RpcHandler>>,
        provider_id: u16,
    ) -> RpcId {
        let id = RpcId::derive(name, provider_id);
        self.entries.write().insert(
            id,
            RpcEntry {
                name: name.to_string(),
                handler,
                response_disabled: false,
            },
        );
        id
    }

    /// Look up an id without registering. Returns `None` when `(name,
    /// provider_id)` has no registration.
    pub(crate) fn lookup(&self, name: &str, provider_id: u16) -> Option<RpcId> {
        let id = RpcId::derive(name, provider_id);
        self.entries.read().contains_key(&id).then_some(id)
    }

    /// Remove a registration.
    pub(crate) fn remove(&self, id: RpcId) -> Result<()> {
        match self.entries.write().remove(&id) {
            Some(_) => Ok(()),
            None => Err(EngineError::UnknownRpc { id }),
        }
    }

    /// Toggle the fire-and-forget flag for `id`.
    pub(crate) fn set_response_disabled(&self, id: RpcId, disabled: bool) -> Result<()> {
        match self.entries.write().get_mut(&id) {
            Some(entry) => {
                entry.response_disabled = disabled;
                Ok(())
            }
            None => Err(EngineError::UnknownRpc { id }),
        }
    }

    /// Whether `id` is fire-and-forget.
    pub(crate) fn response_disabled(&self, id: RpcId) -> Result<bool> {
        self.entries
            .read()
            .get(&id)
            .map(|entry| entry.response_disabled)
            .ok_or(EngineError::UnknownRpc { id })
    }

    /// Handler registered for `id`, if any.
    ///
    /// `Err(UnknownRpc)` when the id has no registration at all,
    /// `Ok(None)` when it was registered client-side only.
    pub(crate) fn handler(&self, id: RpcId) -> Result<Option<Arc<dyn RpcHandler>>> {
        self.entries
            .read()
            .get(&id)
            .map(|entry| entry.handler.clone())
            .ok_or(EngineError::UnknownRpc { id })
    }

    /// Name under which `id` was registered, for diagnostics.
    pub(crate) fn name_of(&self, id: RpcId) -> Option<String> {
        self.entries.read().get(&id).map(|entry| entry.name.clone())
    }
}

//! Provider-scoped RPC namespaces.
//!
//! A [`Provider`] is an immutable `(engine, provider id)` pair that lets
//! several logical services share one engine and session without name
//! collisions: the same RPC name registered under different provider ids
//! yields distinct RPC ids. All calls delegate to the engine with the
//! provider id attached.

use std::sync::Arc;

use crate::engine::Engine;
use crate::error::Result;
use crate::handle::RpcHandler;
use crate::registry::RpcId;

/// A named registration namespace layered on an [`Engine`].
#[derive(Clone)]
pub struct Provider {
    engine: Engine,
    provider_id: u16,
}

impl Provider {
    /// Attach a provider namespace to `engine`.
    pub fn new(engine: &Engine, provider_id: u16) -> Self {
        Self {
            engine: engine.clone(),
            provider_id,
        }
    }

    /// Register `handler` under `name` in this provider's namespace.
    pub fn register(&self, name: &str, handler: Arc<dyn RpcHandler>) -> Result<RpcId> {
        self.engine.register(name, Some(handler), self.provider_id)
    }

    /// Look up `name` in this provider's namespace without registering.
    pub fn registered(&self, name: &str) -> Result<Option<RpcId>> {
        self.engine.registered(name, Some(self.provider_id))
    }

    /// This provider's id.
    pub fn provider_id(&self) -> u16 {
        self.provider_id
    }

    /// The engine this provider is attached to.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("provider_id", &self.provider_id)
            .finish()
    }
}

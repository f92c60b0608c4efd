//! Network addresses of engines.
//!
//! An [`Address`] pairs an opaque transport endpoint with an explicit
//! ownership flag. Owned addresses (from `Engine::lookup`, `Engine::addr`
//! or [`Address::clone`]) release their endpoint when dropped; borrowed
//! ones (the sender address inside an inbound handle) never do and must
//! be cloned before being retained beyond the handler invocation.

use crate::engine::Engine;
use crate::error::Result;
use crate::transport::RawEndpoint;

/// The network address of an engine.
pub struct Address {
    engine: Engine,
    raw: RawEndpoint,
    owned: bool,
}

impl Address {
    pub(crate) fn new(engine: Engine, raw: RawEndpoint, owned: bool) -> Self {
        Self { engine, raw, owned }
    }

    pub(crate) fn raw(&self) -> RawEndpoint {
        self.raw
    }

    /// Whether dropping this address releases the underlying endpoint.
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Textual form of this address, suitable for `Engine::lookup`.
    ///
    /// Guaranteed only for addresses obtained from `Engine::addr` or
    /// `Engine::lookup`; the transport may be unable to render a sender
    /// address taken from an inbound handle.
    pub fn to_text(&self) -> Result<String> {
        self.engine.endpoint_to_string(self.raw)
    }

    /// Request that the engine behind this address shut down.
    ///
    /// Honored only if that engine called `enable_remote_shutdown`;
    /// otherwise the request is rejected with a remote error.
    pub fn shutdown(&self) -> Result<()> {
        self.engine.request_remote_shutdown(self.raw)
    }
}

/// Cloning duplicates the underlying endpoint; the clone is owned and
/// independently releasable regardless of whether the source was
/// borrowed.
impl Clone for Address {
    fn clone(&self) -> Self {
        Address {
            engine: self.engine.clone(),
            raw: self.engine.endpoint_dup(self.raw),
            owned: true,
        }
    }
}

/// Structural equivalence of the underlying endpoints, delegated to the
/// transport. Independent of which engine produced either side.
impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.engine.endpoint_eq(self.raw, other.raw)
    }
}

impl Eq for Address {}

impl Drop for Address {
    fn drop(&mut self) {
        // Borrowed addresses are never released by the holder.
        if self.owned {
            self.engine.endpoint_release(self.raw);
        }
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Address")
            .field("raw", &self.raw)
            .field("owned", &self.owned)
            .finish()
    }
}

//! Transport collaborator contract.
//!
//! The engine never performs raw I/O itself: every network primitive goes
//! through a [`TransportSession`]. A session is selected by the scheme of
//! the address specification given to `Engine::init` (for example
//! `loopback://server-a`). The crate ships one built-in implementation,
//! the in-process [`loopback`] fabric; real network transports implement
//! the same trait.

pub mod loopback;

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::bulk::{AccessMode, TransferOp};
use crate::engine::{EngineOptions, Mode};
use crate::error::{EngineError, Result};
use crate::registry::RpcId;

/// Opaque transport-level endpoint reference.
///
/// Only meaningful to the session that produced it. Lifetime is managed
/// through `endpoint_dup` / `endpoint_release`, never by the holder
/// guessing ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawEndpoint(pub u64);

impl fmt::Display for RawEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ep:{}", self.0)
    }
}

/// Opaque transport-level memory registration.
///
/// Serializable so a region can be advertised to peers inside an RPC
/// payload (see `BulkDescriptor`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionId(pub u64);

/// Inbound request sink provided by the engine.
///
/// The transport invokes this from its progress or dispatch threads for
/// every inbound request; implementations must therefore be fully
/// thread-safe.
pub trait RequestDispatcher: Send + Sync {
    /// Dispatch an inbound request addressed to `rpc`.
    ///
    /// Returns the response payload, `Ok(None)` when the RPC has responses
    /// disabled, or an error to report back to the sender.
    fn dispatch(&self, rpc: RpcId, sender: RawEndpoint, payload: Bytes) -> Result<Option<Bytes>>;
}

/// One transport session, owned by exactly one engine.
///
/// All methods are callable from any thread. Sessions are black boxes to
/// the engine: address handles, region ids and the progress machinery are
/// interpreted only by the session that issued them.
pub trait TransportSession: Send + Sync {
    /// Whether the session accepts inbound RPCs (server mode and bound).
    fn is_listening(&self) -> bool;

    /// This session's own endpoint.
    fn self_endpoint(&self) -> RawEndpoint;

    /// Resolve a textual address to an endpoint.
    fn lookup(&self, address: &str) -> Result<RawEndpoint>;

    /// Textual form of an endpoint.
    ///
    /// Guaranteed to work only for endpoints from [`Self::self_endpoint`]
    /// or [`Self::lookup`]; transports may not be able to render sender
    /// endpoints embedded in inbound requests.
    fn endpoint_to_string(&self, endpoint: RawEndpoint) -> Result<String>;

    /// Structural equality of two endpoints.
    fn endpoint_eq(&self, a: RawEndpoint, b: RawEndpoint) -> bool;

    /// Duplicate an endpoint with independent lifetime.
    fn endpoint_dup(&self, endpoint: RawEndpoint) -> RawEndpoint;

    /// Release one reference to an endpoint.
    fn endpoint_release(&self, endpoint: RawEndpoint);

    /// Hint that an endpoint is stale so cached state can be purged.
    /// Best-effort; never fails.
    fn set_remove(&self, endpoint: RawEndpoint);

    /// Install the engine's inbound request sink.
    fn set_dispatcher(&self, dispatcher: Arc<dyn RequestDispatcher>);

    /// Send a request and, when `await_response` is set, block the calling
    /// thread until the response (or a failure) arrives.
    fn send_request(
        &self,
        destination: RawEndpoint,
        rpc: RpcId,
        payload: Bytes,
        await_response: bool,
    ) -> Result<Option<Bytes>>;

    /// Opt this session in to honoring remote shutdown requests.
    fn enable_remote_shutdown(&self);

    /// Ask the peer at `destination` to shut down. Rejected unless the
    /// peer enabled remote shutdown.
    fn request_remote_shutdown(&self, destination: RawEndpoint) -> Result<()>;

    /// Block until a remote shutdown request is accepted or local
    /// finalization is signalled.
    fn wait_shutdown(&self);

    /// Register `data` as a remotely-accessible region under `mode`.
    fn register_region(&self, data: Vec<u8>, mode: AccessMode) -> Result<RegionId>;

    /// Release a region registration.
    fn release_region(&self, region: RegionId);

    /// Read `len` bytes at `offset` from a region registered by this
    /// session.
    fn region_read(&self, region: RegionId, offset: usize, len: usize) -> Result<Vec<u8>>;

    /// Move `size` bytes between a region at `origin` and a local region.
    ///
    /// The transport re-validates bounds and access modes against its
    /// authoritative registration table.
    #[allow(clippy::too_many_arguments)]
    fn transfer(
        &self,
        op: TransferOp,
        origin: RawEndpoint,
        origin_region: RegionId,
        origin_offset: usize,
        local_region: RegionId,
        local_offset: usize,
        size: usize,
    ) -> Result<()>;

    /// Halt the progress machinery: stop accepting inbound work and wait
    /// for in-flight dispatches to drain.
    fn signal_finalize(&self);

    /// Release all session resources. Called exactly once, after
    /// [`Self::signal_finalize`]. Internal failures are logged, not
    /// surfaced.
    fn release(&self);
}

/// Create a session for `spec`, choosing the transport by scheme.
pub fn create_session(
    spec: &str,
    mode: Mode,
    options: &EngineOptions,
) -> Result<Box<dyn TransportSession>> {
    if spec == "loopback" || spec.starts_with("loopback://") {
        return loopback::create_session(spec, mode, options);
    }
    Err(EngineError::Initialization {
        spec: spec.to_string(),
        message: "unknown transport scheme".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_scheme_is_rejected() {
        let result = create_session("warpdrive://x", Mode::Client, &EngineOptions::default());
        assert!(matches!(
            result,
            Err(EngineError::Initialization { spec, .. }) if spec == "warpdrive://x"
        ));
    }
}

//! RPC handles: the client call side and the server inbound side.
//!
//! A [`CallHandle`] binds a destination address to one RPC id and can
//! issue any number of sequential invocations. On the server, each
//! inbound request is materialized as an [`IncomingHandle`] and passed to
//! the registered [`RpcHandler`] together with the request payload.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::address::Address;
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::registry::RpcId;
use crate::transport::RawEndpoint;

/// Server-side request handler capability.
///
/// Registered directly with `Engine::register` or `Provider::register`;
/// there is no runtime method-name lookup. Handlers run on
/// transport-managed threads and must not assume exclusivity with the
/// thread that registered them.
pub trait RpcHandler: Send + Sync {
    /// Handle one inbound request.
    ///
    /// Respond through [`IncomingHandle::respond`]; completing without a
    /// response is reported to the caller as a remote failure unless the
    /// RPC has responses disabled.
    fn handle(&self, incoming: &IncomingHandle, payload: Bytes) -> Result<()>;
}

/// Blanket implementation so plain closures can serve as handlers.
impl<F> RpcHandler for F
where
    F: Fn(&IncomingHandle, Bytes) -> Result<()> + Send + Sync,
{
    fn handle(&self, incoming: &IncomingHandle, payload: Bytes) -> Result<()> {
        self(incoming, payload)
    }
}

/// A reusable client-side call handle bound to (destination, RPC id).
pub struct CallHandle {
    engine: Engine,
    destination: Address,
    rpc: RpcId,
}

impl CallHandle {
    pub(crate) fn new(engine: Engine, destination: Address, rpc: RpcId) -> Self {
        Self {
            engine,
            destination,
            rpc,
        }
    }

    /// The bound destination.
    pub fn destination(&self) -> &Address {
        &self.destination
    }

    /// The bound RPC id.
    pub fn rpc_id(&self) -> RpcId {
        self.rpc
    }

    /// Issue one invocation, blocking until the response arrives.
    ///
    /// Returns `Ok(None)` without waiting when responses are disabled for
    /// this RPC id on the issuing engine.
    pub fn call(&self, payload: impl Into<Bytes>) -> Result<Option<Bytes>> {
        self.engine.issue(&self.destination, self.rpc, payload.into())
    }
}

impl std::fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallHandle")
            .field("destination", &self.destination)
            .field("rpc", &self.rpc)
            .finish()
    }
}

/// One inbound request, as seen by a server-side handler.
pub struct IncomingHandle {
    engine: Engine,
    rpc: RpcId,
    sender: RawEndpoint,
    response: Mutex<ResponseSlot>,
}

enum ResponseSlot {
    Pending,
    Filled(Bytes),
    Taken,
}

impl IncomingHandle {
    pub(crate) fn new(engine: Engine, rpc: RpcId, sender: RawEndpoint) -> Self {
        Self {
            engine,
            rpc,
            sender,
            response: Mutex::new(ResponseSlot::Pending),
        }
    }

    /// The RPC id this request was addressed to.
    pub fn rpc_id(&self) -> RpcId {
        self.rpc
    }

    /// The provider id extracted from the RPC id.
    pub fn provider_id(&self) -> u16 {
        self.rpc.provider_id()
    }

    /// The engine serving this request.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// An owned duplicate of the sender's address.
    ///
    /// The underlying sender endpoint is only borrowed for the duration
    /// of the handler invocation, so this returns an independent copy
    /// that may outlive it.
    pub fn sender(&self) -> Address {
        let borrowed = Address::new(self.engine.clone(), self.sender, false);
        borrowed.clone()
    }

    /// Send the response for this request. Single-shot.
    pub fn respond(&self, payload: impl Into<Bytes>) -> Result<()> {
        let mut slot = self.response.lock();
        match *slot {
            ResponseSlot::Pending => {
                *slot = ResponseSlot::Filled(payload.into());
                Ok(())
            }
            _ => Err(EngineError::Configuration {
                message: "response already sent for this handle".to_string(),
            }),
        }
    }

    /// Take the response out, if the handler produced one.
    pub(crate) fn take_response(&self) -> Option<Bytes> {
        let mut slot = self.response.lock();
        match std::mem::replace(&mut *slot, ResponseSlot::Taken) {
            ResponseSlot::Filled(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// Convenience for handlers that don't need the engine: keeps the arc
/// count explicit at registration sites.
pub type SharedHandler = Arc<dyn RpcHandler>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_slot_single_shot() {
        let mut slot = ResponseSlot::Pending;
        assert!(matches!(
            std::mem::replace(&mut slot, ResponseSlot::Filled(Bytes::from_static(b"x"))),
            ResponseSlot::Pending
        ));
        match std::mem::replace(&mut slot, ResponseSlot::Taken) {
            ResponseSlot::Filled(bytes) => assert_eq!(&bytes[..], b"x"),
            _ => panic!("expected a filled slot"),
        }
    }
}

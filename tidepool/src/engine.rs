//! The engine: top-level RPC context and factory.
//!
//! An [`Engine`] owns one transport session and the RPC registry, and is
//! the factory for addresses, call handles, bulk regions and providers.
//! It is cheaply cloneable; clones share the same session. Lifecycle is
//! `Active → Finalizing → Finalized`: every mutating operation other
//! than finalization itself requires the `Active` state.

use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex, RwLock};
use serde_json::{Map, Value};

use crate::address::Address;
use crate::bulk::{AccessMode, BulkDescriptor, BulkRegion, TransferOp};
use crate::error::{EngineError, Result};
use crate::handle::{CallHandle, IncomingHandle, RpcHandler};
use crate::logging::{self, LogLevel, LogSink};
use crate::provider::Provider;
use crate::registry::{RpcId, RpcRegistry};
use crate::transport::{self, RawEndpoint, RegionId, RequestDispatcher, TransportSession};

/// Whether an engine accepts inbound RPCs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Listens for inbound RPCs and may also issue calls.
    Server,
    /// Issues calls only; cannot host handlers.
    Client,
}

/// Configuration passed to [`Engine::init`].
///
/// `use_progress_thread` and `num_rpc_threads` shape how the transport
/// schedules progress and handler execution; everything under
/// `transport` is a transport-specific key-value map passed through
/// verbatim, unrecognized keys included.
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Run the transport progress loop on a dedicated thread.
    pub use_progress_thread: bool,
    /// Number of dedicated RPC dispatch threads; zero means handlers run
    /// cooperatively on whichever thread drives the engine.
    pub num_rpc_threads: usize,
    /// Transport-specific tuning keys, passed through opaquely.
    pub transport: Map<String, Value>,
}

impl EngineOptions {
    /// Default options: cooperative progress, no dispatch threads.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the progress loop on a dedicated thread.
    pub fn with_progress_thread(mut self, enabled: bool) -> Self {
        self.use_progress_thread = enabled;
        self
    }

    /// Use `count` dedicated RPC dispatch threads.
    pub fn with_rpc_threads(mut self, count: usize) -> Self {
        self.num_rpc_threads = count;
        self
    }

    /// Add one transport-specific tuning key.
    pub fn with_transport_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.transport.insert(key.into(), value.into());
        self
    }

    /// Parse transport tuning keys from their serialized JSON form.
    pub fn from_json(json: &str) -> Result<Self> {
        match serde_json::from_str(json)? {
            Value::Object(map) => Ok(Self {
                transport: map,
                ..Self::default()
            }),
            _ => Err(EngineError::Configuration {
                message: "transport options must be a JSON object".to_string(),
            }),
        }
    }

    /// Serialized form of the transport tuning keys.
    pub fn transport_json(&self) -> String {
        Value::Object(self.transport.clone()).to_string()
    }
}

enum Lifecycle {
    Active,
    Finalizing,
    Finalized,
}

type Callback = Box<dyn FnOnce() + Send>;

pub(crate) struct EngineInner {
    identity: String,
    mode: Mode,
    session: Box<dyn TransportSession>,
    registry: RpcRegistry,
    state: Mutex<Lifecycle>,
    state_cond: Condvar,
    prefinalize: Mutex<Vec<Callback>>,
    finalize_cbs: Mutex<Vec<Callback>>,
    log_sink: RwLock<Option<Arc<dyn LogSink>>>,
    log_level: RwLock<Option<LogLevel>>,
}

/// The top-level RPC context.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Establish a transport session and construct an engine around it.
    ///
    /// The transport is selected by the scheme of `spec`. Fails with
    /// [`EngineError::Initialization`] when the transport cannot bind or
    /// connect; no partial engine escapes on failure.
    pub fn init(spec: &str, mode: Mode, options: EngineOptions) -> Result<Engine> {
        let session = transport::create_session(spec, mode, &options)?;
        let self_endpoint = session.self_endpoint();
        let identity = session
            .endpoint_to_string(self_endpoint)
            .unwrap_or_else(|_| spec.to_string());
        let inner = Arc::new(EngineInner {
            identity,
            mode,
            session,
            registry: RpcRegistry::new(),
            state: Mutex::new(Lifecycle::Active),
            state_cond: Condvar::new(),
            prefinalize: Mutex::new(Vec::new()),
            finalize_cbs: Mutex::new(Vec::new()),
            log_sink: RwLock::new(None),
            log_level: RwLock::new(None),
        });
        let dispatcher: Arc<dyn RequestDispatcher> = Arc::new(EngineDispatcher {
            engine: Arc::downgrade(&inner),
        });
        inner.session.set_dispatcher(dispatcher);
        inner.diag(
            LogLevel::Debug,
            &format!("engine initialized in {mode:?} mode"),
        );
        Ok(Engine { inner })
    }

    /// The mode this engine was constructed in.
    pub fn mode(&self) -> Mode {
        self.inner.mode
    }

    /// Whether the engine is a server actively accepting inbound RPCs.
    pub fn is_listening(&self) -> bool {
        self.inner.session.is_listening()
    }

    /// Whether the engine has been finalized.
    pub fn finalized(&self) -> bool {
        matches!(*self.inner.state.lock(), Lifecycle::Finalized)
    }

    /// Finalize the engine: run prefinalize callbacks, halt the
    /// transport's progress machinery, run finalize callbacks, release
    /// the session.
    ///
    /// Calling `finalize` on an already-finalized engine is a documented
    /// no-op returning `Ok(())`; every other operation on a finalized
    /// engine fails with [`EngineError::Lifecycle`]. Finalize blocks
    /// until in-flight handlers complete, so it must not be called from
    /// inside a handler. Session release failures are reported through
    /// the logging facade at warning level, never re-raised.
    pub fn finalize(&self) -> Result<()> {
        self.inner.finalize_impl()
    }

    /// Block until another actor finalizes this engine, typically via an
    /// accepted remote shutdown request, then complete the finalization
    /// on this thread. On return the engine is finalized.
    pub fn wait_for_finalize(&self) -> Result<()> {
        if self.finalized() {
            return Ok(());
        }
        self.inner.session.wait_shutdown();
        self.inner.finalize_impl()
    }

    /// Register a callback to run at the start of finalization, before
    /// the progress machinery halts. Callbacks run in registration
    /// order; there is no de-registration.
    pub fn on_prefinalize(&self, callback: impl FnOnce() + Send + 'static) -> Result<()> {
        self.inner.ensure_active("on_prefinalize")?;
        self.inner.prefinalize.lock().push(Box::new(callback));
        Ok(())
    }

    /// Register a callback to run during finalization, after the
    /// progress machinery has halted. Callbacks run in registration
    /// order; there is no de-registration.
    pub fn on_finalize(&self, callback: impl FnOnce() + Send + 'static) -> Result<()> {
        self.inner.ensure_active("on_finalize")?;
        self.inner.finalize_cbs.lock().push(Box::new(callback));
        Ok(())
    }

    /// Opt in to honoring remote shutdown requests addressed to this
    /// engine. Without this, such requests are rejected.
    pub fn enable_remote_shutdown(&self) -> Result<()> {
        self.inner.ensure_active("enable_remote_shutdown")?;
        self.inner.session.enable_remote_shutdown();
        Ok(())
    }

    /// Register an RPC under `name` and `provider_id`.
    ///
    /// With a handler, the registration is server-side and inbound
    /// requests for the id are dispatched to it; registering a handler
    /// on a client-mode engine is a configuration error. Without a
    /// handler the id is client-side only, used to issue calls.
    /// Re-registering the same `(name, provider_id)` returns the same id
    /// and replaces the handler.
    pub fn register(
        &self,
        name: &str,
        handler: Option<Arc<dyn RpcHandler>>,
        provider_id: u16,
    ) -> Result<RpcId> {
        self.inner.ensure_active("register")?;
        if handler.is_some() && self.inner.mode == Mode::Client {
            return Err(EngineError::Configuration {
                message: "handlers require a server-mode engine".to_string(),
            });
        }
        let id = self.inner.registry.insert(name, handler, provider_id);
        self.inner.diag(
            LogLevel::Debug,
            &format!("registered rpc '{name}' (provider {provider_id}) as {id}"),
        );
        Ok(id)
    }

    /// Look up a registration without creating one. `None` for the
    /// provider id resolves in the default (unscoped) namespace.
    pub fn registered(&self, name: &str, provider_id: Option<u16>) -> Result<Option<RpcId>> {
        self.inner.ensure_active("registered")?;
        Ok(self.inner.registry.lookup(name, provider_id.unwrap_or(0)))
    }

    /// Remove a prior registration. Subsequent invocations addressed to
    /// `id` fail with [`EngineError::UnknownRpc`] on the receiving side.
    pub fn deregister(&self, id: RpcId) -> Result<()> {
        self.inner.ensure_active("deregister")?;
        self.inner.registry.remove(id)
    }

    /// Toggle fire-and-forget for `id`. While disabled, issuing threads
    /// do not block waiting for a response.
    pub fn disable_response(&self, id: RpcId, disabled: bool) -> Result<()> {
        self.inner.ensure_active("disable_response")?;
        self.inner.registry.set_response_disabled(id, disabled)
    }

    /// Whether `id` is fire-and-forget.
    pub fn disabled_response(&self, id: RpcId) -> Result<bool> {
        self.inner.ensure_active("disabled_response")?;
        self.inner.registry.response_disabled(id)
    }

    /// Resolve a textual endpoint descriptor to an owned [`Address`].
    ///
    /// Resolution does not guarantee the peer is currently live.
    pub fn lookup(&self, address: &str) -> Result<Address> {
        self.inner.ensure_active("lookup")?;
        let raw = self.inner.session.lookup(address)?;
        Ok(Address::new(self.clone(), raw, true))
    }

    /// This engine's own address (owned).
    pub fn addr(&self) -> Result<Address> {
        self.inner.ensure_active("addr")?;
        let raw = self
            .inner
            .session
            .endpoint_dup(self.inner.session.self_endpoint());
        Ok(Address::new(self.clone(), raw, true))
    }

    /// Alias for [`Engine::addr`].
    pub fn address(&self) -> Result<Address> {
        self.addr()
    }

    /// Attach a provider namespace to this engine.
    pub fn provider(&self, provider_id: u16) -> Provider {
        Provider::new(self, provider_id)
    }

    /// Bind a reusable client-side call handle for `(destination, rpc)`.
    pub fn create_handle(&self, destination: &Address, rpc: RpcId) -> Result<CallHandle> {
        self.inner.ensure_active("create_handle")?;
        Ok(CallHandle::new(self.clone(), destination.clone(), rpc))
    }

    /// Register `buffer` as a remotely-accessible bulk region under
    /// `mode`. The buffer moves behind the registration and stays pinned
    /// there for the region's lifetime.
    pub fn create_bulk(&self, buffer: Vec<u8>, mode: AccessMode) -> Result<BulkRegion> {
        self.inner.ensure_active("create_bulk")?;
        let len = buffer.len();
        let id = self.inner.session.register_region(buffer, mode)?;
        Ok(BulkRegion::new(self.clone(), id, len, mode))
    }

    /// Move `size` bytes between a peer's region and a local one.
    ///
    /// `Push` sends local bytes to the origin region, `Pull` fetches
    /// origin bytes into the local region. Fails with
    /// [`EngineError::OutOfBounds`] when `offset + size` exceeds either
    /// registered extent and with [`EngineError::AccessMode`] when the
    /// direction is incompatible with either region's mode. Blocks until
    /// the range is fully moved or the operation fails; a failed
    /// transfer may leave the destination range partially written.
    #[allow(clippy::too_many_arguments)]
    pub fn transfer(
        &self,
        op: TransferOp,
        origin: &Address,
        origin_region: &BulkDescriptor,
        origin_offset: usize,
        local: &BulkRegion,
        local_offset: usize,
        size: usize,
    ) -> Result<()> {
        self.inner.ensure_active("transfer")?;
        check_extent(origin_offset, size, origin_region.len)?;
        check_extent(local_offset, size, local.len())?;
        match op {
            TransferOp::Push => {
                if !local.mode().readable() {
                    return Err(EngineError::AccessMode {
                        message: "push requires a readable local region".to_string(),
                    });
                }
                if !origin_region.mode.writable() {
                    return Err(EngineError::AccessMode {
                        message: "push requires a writable origin region".to_string(),
                    });
                }
            }
            TransferOp::Pull => {
                if !origin_region.mode.readable() {
                    return Err(EngineError::AccessMode {
                        message: "pull requires a readable origin region".to_string(),
                    });
                }
                if !local.mode().writable() {
                    return Err(EngineError::AccessMode {
                        message: "pull requires a writable local region".to_string(),
                    });
                }
            }
        }
        self.inner.session.transfer(
            op,
            origin.raw(),
            origin_region.region,
            origin_offset,
            local.id(),
            local_offset,
            size,
        )
    }

    /// Hint that `address` is stale so the transport can purge cached
    /// connection state. Best-effort; never fails the caller.
    pub fn set_remove(&self, address: &Address) {
        if self.inner.ensure_active("set_remove").is_ok() {
            self.inner.session.set_remove(address.raw());
        }
    }

    /// Per-engine logging facade. Messages routed through it carry this
    /// engine's identity and honor the engine's sink and level overrides
    /// before falling back to the process-wide configuration.
    pub fn logger(&self) -> EngineLogger {
        EngineLogger {
            inner: Arc::clone(&self.inner),
        }
    }

    // --- crate-internal plumbing for Address / BulkRegion / CallHandle ---

    pub(crate) fn endpoint_to_string(&self, raw: RawEndpoint) -> Result<String> {
        self.inner.ensure_active("address to_text")?;
        self.inner.session.endpoint_to_string(raw)
    }

    pub(crate) fn endpoint_eq(&self, a: RawEndpoint, b: RawEndpoint) -> bool {
        self.inner.session.endpoint_eq(a, b)
    }

    pub(crate) fn endpoint_dup(&self, raw: RawEndpoint) -> RawEndpoint {
        self.inner.session.endpoint_dup(raw)
    }

    pub(crate) fn endpoint_release(&self, raw: RawEndpoint) {
        self.inner.session.endpoint_release(raw);
    }

    pub(crate) fn request_remote_shutdown(&self, raw: RawEndpoint) -> Result<()> {
        self.inner.ensure_active("shutdown")?;
        self.inner.session.request_remote_shutdown(raw)
    }

    pub(crate) fn region_read(&self, region: RegionId, offset: usize, len: usize) -> Result<Vec<u8>> {
        self.inner.ensure_active("bulk read")?;
        self.inner.session.region_read(region, offset, len)
    }

    pub(crate) fn release_region(&self, region: RegionId) {
        self.inner.session.release_region(region);
    }

    pub(crate) fn issue(
        &self,
        destination: &Address,
        rpc: RpcId,
        payload: Bytes,
    ) -> Result<Option<Bytes>> {
        self.inner.ensure_active("call")?;
        let await_response = !self.inner.registry.response_disabled(rpc).unwrap_or(false);
        self.inner
            .session
            .send_request(destination.raw(), rpc, payload, await_response)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("identity", &self.inner.identity)
            .field("mode", &self.inner.mode)
            .field("finalized", &self.finalized())
            .finish()
    }
}

fn check_extent(offset: usize, size: usize, extent: usize) -> Result<()> {
    match offset.checked_add(size) {
        Some(end) if end <= extent => Ok(()),
        _ => Err(EngineError::OutOfBounds {
            offset,
            size,
            extent,
        }),
    }
}

impl EngineInner {
    fn ensure_active(&self, operation: &'static str) -> Result<()> {
        match *self.state.lock() {
            Lifecycle::Active => Ok(()),
            _ => Err(EngineError::Lifecycle { operation }),
        }
    }

    /// The single finalization path, shared by `finalize`,
    /// `wait_for_finalize` and the drop guard. Exactly one caller runs
    /// the sequence; latecomers wait for it to complete.
    fn finalize_impl(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            loop {
                match *state {
                    Lifecycle::Active => {
                        *state = Lifecycle::Finalizing;
                        break;
                    }
                    Lifecycle::Finalizing => self.state_cond.wait(&mut state),
                    Lifecycle::Finalized => return Ok(()),
                }
            }
        }
        self.diag(LogLevel::Debug, "finalizing engine");
        let callbacks = std::mem::take(&mut *self.prefinalize.lock());
        for callback in callbacks {
            callback();
        }
        self.session.signal_finalize();
        let callbacks = std::mem::take(&mut *self.finalize_cbs.lock());
        for callback in callbacks {
            callback();
        }
        self.session.release();
        *self.state.lock() = Lifecycle::Finalized;
        self.state_cond.notify_all();
        self.diag(LogLevel::Info, "engine finalized");
        Ok(())
    }

    /// Route an internal diagnostic through the per-engine override or
    /// the process-wide configuration.
    fn diag(&self, level: LogLevel, message: &str) {
        let threshold = self
            .log_level
            .read()
            .unwrap_or_else(logging::global_level);
        if level < threshold {
            return;
        }
        let line = format!("[{}] {}", self.identity, message);
        let sink = self.log_sink.read().clone();
        match sink {
            Some(sink) => sink.emit(level, &line),
            None => logging::global_sink().emit(level, &line),
        }
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        let finalized = matches!(*self.state.lock(), Lifecycle::Finalized);
        if !finalized {
            if let Err(err) = self.finalize_impl() {
                logging::warning(&format!("engine finalize during drop failed: {err}"));
            }
        }
    }
}

/// Inbound request sink handed to the transport. Holds a weak engine
/// reference so the session does not keep its own engine alive.
struct EngineDispatcher {
    engine: Weak<EngineInner>,
}

impl RequestDispatcher for EngineDispatcher {
    fn dispatch(&self, rpc: RpcId, sender: RawEndpoint, payload: Bytes) -> Result<Option<Bytes>> {
        let inner = self.engine.upgrade().ok_or_else(|| EngineError::Remote {
            message: "engine is gone".to_string(),
        })?;
        inner.ensure_active("dispatch")?;
        let handler = inner
            .registry
            .handler(rpc)?
            .ok_or(EngineError::UnknownRpc { id: rpc })?;
        if let Some(name) = inner.registry.name_of(rpc) {
            inner.diag(LogLevel::Trace, &format!("dispatching rpc '{name}'"));
        }
        let engine = Engine {
            inner: Arc::clone(&inner),
        };
        let incoming = IncomingHandle::new(engine, rpc, sender);
        handler.handle(&incoming, payload)?;
        let response = incoming.take_response();
        if inner.registry.response_disabled(rpc).unwrap_or(false) {
            return Ok(None);
        }
        match response {
            Some(bytes) => Ok(Some(bytes)),
            None => Err(EngineError::Remote {
                message: format!("handler for rpc {rpc} completed without a response"),
            }),
        }
    }
}

/// Logging facade bound to one engine's identity.
pub struct EngineLogger {
    inner: Arc<EngineInner>,
}

impl EngineLogger {
    /// Override the log level for this engine only.
    pub fn set_level(&self, level: LogLevel) {
        *self.inner.log_level.write() = Some(level);
    }

    /// Override the sink for this engine only; process-wide logging is
    /// unaffected.
    pub fn set_sink(&self, sink: Arc<dyn LogSink>) {
        *self.inner.log_sink.write() = Some(sink);
    }

    /// Trace-level message tagged with this engine's identity.
    pub fn trace(&self, message: &str) {
        self.inner.diag(LogLevel::Trace, message);
    }

    /// Debug-level message tagged with this engine's identity.
    pub fn debug(&self, message: &str) {
        self.inner.diag(LogLevel::Debug, message);
    }

    /// Info-level message tagged with this engine's identity.
    pub fn info(&self, message: &str) {
        self.inner.diag(LogLevel::Info, message);
    }

    /// Warning-level message tagged with this engine's identity.
    pub fn warning(&self, message: &str) {
        self.inner.diag(LogLevel::Warning, message);
    }

    /// Error-level message tagged with this engine's identity.
    pub fn error(&self, message: &str) {
        self.inner.diag(LogLevel::Error, message);
    }

    /// Critical-level message tagged with this engine's identity.
    pub fn critical(&self, message: &str) {
        self.inner.diag(LogLevel::Critical, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    struct CaptureSink {
        messages: PlMutex<Vec<(LogLevel, String)>>,
    }

    impl CaptureSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                messages: PlMutex::new(Vec::new()),
            })
        }

        fn take(&self) -> Vec<(LogLevel, String)> {
            std::mem::take(&mut self.messages.lock())
        }
    }

    impl LogSink for CaptureSink {
        fn trace(&self, message: &str) {
            self.messages.lock().push((LogLevel::Trace, message.into()));
        }
        fn debug(&self, message: &str) {
            self.messages.lock().push((LogLevel::Debug, message.into()));
        }
        fn info(&self, message: &str) {
            self.messages.lock().push((LogLevel::Info, message.into()));
        }
        fn warning(&self, message: &str) {
            self.messages
                .lock()
                .push((LogLevel::Warning, message.into()));
        }
        fn error(&self, message: &str) {
            self.messages.lock().push((LogLevel::Error, message.into()));
        }
        fn critical(&self, message: &str) {
            self.messages
                .lock()
                .push((LogLevel::Critical, message.into()));
        }
    }

    fn server(name: &str) -> Engine {
        Engine::init(
            &format!("loopback://{name}"),
            Mode::Server,
            EngineOptions::default(),
        )
        .expect("server engine")
    }

    #[test]
    fn test_options_builders_and_json() {
        let options = EngineOptions::new()
            .with_progress_thread(true)
            .with_rpc_threads(2)
            .with_transport_option("rdma_hint", "eager");
        assert!(options.use_progress_thread);
        assert_eq!(options.num_rpc_threads, 2);
        assert_eq!(options.transport_json(), r#"{"rdma_hint":"eager"}"#);

        let parsed = EngineOptions::from_json(r#"{"a":1}"#).expect("parse");
        assert_eq!(parsed.transport.get("a"), Some(&Value::from(1)));
        assert!(EngineOptions::from_json("[1,2]").is_err());
    }

    #[test]
    fn test_init_unknown_scheme_fails() {
        let result = Engine::init("bogus://x", Mode::Server, EngineOptions::default());
        assert!(matches!(result, Err(EngineError::Initialization { .. })));
    }

    #[test]
    fn test_listening_reflects_mode() {
        let server = server("eng-listening-server");
        let client = Engine::init("loopback", Mode::Client, EngineOptions::default())
            .expect("client engine");
        assert!(server.is_listening());
        assert!(!client.is_listening());
        server.finalize().expect("finalize server");
        client.finalize().expect("finalize client");
    }

    #[test]
    fn test_finalize_is_idempotent_but_other_ops_fail() {
        let engine = server("eng-lifecycle");
        engine.finalize().expect("first finalize");
        assert!(engine.finalized());
        // Documented no-op.
        engine.finalize().expect("second finalize");
        assert!(matches!(
            engine.lookup("loopback://eng-lifecycle"),
            Err(EngineError::Lifecycle { operation: "lookup" })
        ));
        assert!(matches!(
            engine.register("late", None, 0),
            Err(EngineError::Lifecycle { .. })
        ));
        assert!(matches!(
            engine.addr(),
            Err(EngineError::Lifecycle { .. })
        ));
    }

    #[test]
    fn test_callbacks_run_in_registration_order() {
        let engine = server("eng-callbacks");
        let order = Arc::new(PlMutex::new(Vec::new()));
        for tag in ["pre-1", "pre-2"] {
            let order = Arc::clone(&order);
            engine
                .on_prefinalize(move || order.lock().push(tag))
                .expect("prefinalize");
        }
        for tag in ["fin-1", "fin-2"] {
            let order = Arc::clone(&order);
            engine
                .on_finalize(move || order.lock().push(tag))
                .expect("finalize cb");
        }
        engine.finalize().expect("finalize");
        assert_eq!(*order.lock(), vec!["pre-1", "pre-2", "fin-1", "fin-2"]);
    }

    #[test]
    fn test_client_mode_rejects_handlers() {
        let client = Engine::init("loopback", Mode::Client, EngineOptions::default())
            .expect("client engine");
        let handler: Arc<dyn RpcHandler> =
            Arc::new(|_: &IncomingHandle, _: Bytes| -> Result<()> { Ok(()) });
        assert!(matches!(
            client.register("echo", Some(handler), 0),
            Err(EngineError::Configuration { .. })
        ));
        // Client-side-only registration is fine.
        client.register("echo", None, 0).expect("client-side id");
        client.finalize().expect("finalize");
    }

    #[test]
    fn test_registered_scopes_by_provider() {
        let engine = server("eng-reg-scope");
        let handler: Arc<dyn RpcHandler> =
            Arc::new(|_: &IncomingHandle, _: Bytes| -> Result<()> { Ok(()) });
        let id = engine
            .register("echo", Some(handler), 7)
            .expect("register");
        assert_eq!(engine.registered("echo", Some(7)).expect("lookup"), Some(id));
        assert_eq!(engine.registered("echo", Some(8)).expect("lookup"), None);
        assert_eq!(engine.registered("echo", None).expect("lookup"), None);
        assert_eq!(id.provider_id(), 7);
        engine.finalize().expect("finalize");
    }

    #[test]
    fn test_engine_logger_override_and_threshold() {
        let engine = server("eng-logger");
        let sink = CaptureSink::new();
        let logger = engine.logger();
        logger.set_sink(sink.clone());
        logger.set_level(LogLevel::Info);

        logger.debug("below threshold");
        logger.info("at threshold");
        logger.critical("way above");

        let messages = sink.take();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].0, LogLevel::Info);
        assert!(messages[0].1.contains("[loopback://eng-logger]"));
        assert!(messages[0].1.contains("at threshold"));
        assert_eq!(messages[1].0, LogLevel::Critical);
        engine.finalize().expect("finalize");
    }

    #[test]
    fn test_drop_finalizes() {
        let engine = server("eng-drop");
        let flag = Arc::new(PlMutex::new(false));
        {
            let flag = Arc::clone(&flag);
            engine
                .on_finalize(move || *flag.lock() = true)
                .expect("callback");
        }
        drop(engine);
        assert!(*flag.lock());
    }
}

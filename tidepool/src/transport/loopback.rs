//! In-process loopback transport.
//!
//! All loopback sessions in a process share one fabric: a registry of
//! nodes keyed by endpoint id and by textual name. Requests are
//! dispatched either inline on the calling thread (cooperative progress)
//! or on the destination's dedicated RPC threads when the engine was
//! initialized with `num_rpc_threads > 0`. Bulk regions live in a
//! fabric-wide table so a peer can address them by descriptor.
//!
//! Address specifications are `loopback://<name>`, or bare `loopback` to
//! get an auto-assigned name.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::JoinHandle;

use bytes::Bytes;
use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex, RwLock};

use crate::bulk::{AccessMode, TransferOp};
use crate::engine::{EngineOptions, Mode};
use crate::error::{EngineError, Result};
use crate::registry::RpcId;
use crate::transport::{RawEndpoint, RegionId, RequestDispatcher, TransportSession};

const SCHEME_PREFIX: &str = "loopback://";

/// Process-wide loopback fabric shared by every session.
struct Fabric {
    nodes: RwLock<HashMap<u64, Arc<Node>>>,
    names: RwLock<HashMap<String, u64>>,
    regions: RwLock<HashMap<RegionId, Arc<Region>>>,
    next_node_id: AtomicU64,
    next_region_id: AtomicU64,
}

static FABRIC: OnceLock<Fabric> = OnceLock::new();

fn fabric() -> &'static Fabric {
    FABRIC.get_or_init(|| Fabric {
        nodes: RwLock::new(HashMap::new()),
        names: RwLock::new(HashMap::new()),
        regions: RwLock::new(HashMap::new()),
        next_node_id: AtomicU64::new(1),
        next_region_id: AtomicU64::new(1),
    })
}

impl Fabric {
    fn node(&self, endpoint: RawEndpoint) -> Result<Arc<Node>> {
        self.nodes
            .read()
            .get(&endpoint.0)
            .cloned()
            .ok_or_else(|| EngineError::Remote {
                message: format!("no engine behind endpoint {endpoint}"),
            })
    }
}

/// A registered bulk region. The extent never changes after
/// registration; transfers write in place.
struct Region {
    owner: u64,
    mode: AccessMode,
    extent: usize,
    data: RwLock<Vec<u8>>,
}

struct NodeState {
    shutdown_requested: bool,
    finalizing: bool,
    in_flight: usize,
}

/// One loopback endpoint.
struct Node {
    id: u64,
    name: String,
    listening: bool,
    allow_remote_shutdown: AtomicBool,
    dispatcher: RwLock<Option<Arc<dyn RequestDispatcher>>>,
    pool: RwLock<Option<DispatchPool>>,
    state: Mutex<NodeState>,
    cond: Condvar,
}

impl Node {
    /// Run one inbound request against the engine's dispatcher,
    /// tracking it as in-flight so finalize can drain.
    fn dispatch(&self, rpc: RpcId, sender: RawEndpoint, payload: Bytes) -> Result<Option<Bytes>> {
        {
            let mut state = self.state.lock();
            if state.finalizing {
                return Err(EngineError::Remote {
                    message: "peer is shutting down".to_string(),
                });
            }
            state.in_flight += 1;
        }
        let result = match self.dispatcher.read().clone() {
            Some(dispatcher) => dispatcher.dispatch(rpc, sender, payload),
            None => Err(EngineError::Remote {
                message: "peer has no request dispatcher".to_string(),
            }),
        };
        {
            let mut state = self.state.lock();
            state.in_flight -= 1;
        }
        self.cond.notify_all();
        // The caller sees typed unknown-rpc failures as-is; anything
        // else from the peer's side is a remote failure.
        match result {
            Err(err @ EngineError::UnknownRpc { .. }) | Err(err @ EngineError::Remote { .. }) => {
                Err(err)
            }
            Err(other) => Err(EngineError::Remote {
                message: other.to_string(),
            }),
            ok => ok,
        }
    }
}

struct Job {
    rpc: RpcId,
    sender: RawEndpoint,
    payload: Bytes,
    reply: Option<Sender<Result<Option<Bytes>>>>,
}

/// Dedicated RPC dispatch threads for one node.
struct DispatchPool {
    tx: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl DispatchPool {
    fn start(node: Weak<Node>, threads: usize) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded::<Job>();
        let workers = (0..threads)
            .map(|index| {
                let rx = rx.clone();
                let node = node.clone();
                std::thread::Builder::new()
                    .name(format!("tidepool-rpc-{index}"))
                    .spawn(move || {
                        while let Ok(job) = rx.recv() {
                            let Some(node) = node.upgrade() else { break };
                            let result = node.dispatch(job.rpc, job.sender, job.payload);
                            if let Some(reply) = job.reply {
                                let _ = reply.send(result);
                            }
                        }
                    })
                    .expect("failed to spawn rpc dispatch thread")
            })
            .collect();
        Self { tx, workers }
    }

    fn shutdown(self) {
        drop(self.tx);
        for worker in self.workers {
            let _ = worker.join();
        }
    }
}

/// A loopback transport session, one per engine.
pub(crate) struct LoopbackSession {
    node: Arc<Node>,
}

/// Create a session on the process-wide fabric.
pub(crate) fn create_session(
    spec: &str,
    mode: Mode,
    options: &EngineOptions,
) -> Result<Box<dyn TransportSession>> {
    let fabric = fabric();
    let id = fabric.next_node_id.fetch_add(1, Ordering::Relaxed);
    let name = match spec.strip_prefix(SCHEME_PREFIX) {
        Some("") | None if spec == "loopback" || spec == SCHEME_PREFIX => format!("node-{id}"),
        Some(name) => name.to_string(),
        None => {
            return Err(EngineError::Initialization {
                spec: spec.to_string(),
                message: "malformed loopback address specification".to_string(),
            })
        }
    };
    {
        let mut names = fabric.names.write();
        if names.contains_key(&name) {
            return Err(EngineError::Initialization {
                spec: spec.to_string(),
                message: format!("loopback name '{name}' is already bound"),
            });
        }
        names.insert(name.clone(), id);
    }
    let node = Arc::new(Node {
        id,
        name: name.clone(),
        listening: mode == Mode::Server,
        allow_remote_shutdown: AtomicBool::new(false),
        dispatcher: RwLock::new(None),
        pool: RwLock::new(None),
        state: Mutex::new(NodeState {
            shutdown_requested: false,
            finalizing: false,
            in_flight: 0,
        }),
        cond: Condvar::new(),
    });
    if options.num_rpc_threads > 0 {
        *node.pool.write() = Some(DispatchPool::start(
            Arc::downgrade(&node),
            options.num_rpc_threads,
        ));
    }
    fabric.nodes.write().insert(id, Arc::clone(&node));
    // The loopback fabric has no progress work and recognizes no tuning
    // keys; both are accepted and recorded per the pass-through contract.
    tracing::debug!(
        target: "tidepool::loopback",
        node = id,
        name = %name,
        progress_thread = options.use_progress_thread,
        rpc_threads = options.num_rpc_threads,
        options = %options.transport_json(),
        "loopback session created"
    );
    Ok(Box::new(LoopbackSession { node }))
}

fn strip_name(address: &str) -> &str {
    address.strip_prefix(SCHEME_PREFIX).unwrap_or(address)
}

impl TransportSession for LoopbackSession {
    fn is_listening(&self) -> bool {
        self.node.listening && !self.node.state.lock().finalizing
    }

    fn self_endpoint(&self) -> RawEndpoint {
        RawEndpoint(self.node.id)
    }

    fn lookup(&self, address: &str) -> Result<RawEndpoint> {
        let name = strip_name(address);
        if name.is_empty() {
            return Err(EngineError::AddressResolution {
                address: address.to_string(),
                message: "empty loopback name".to_string(),
            });
        }
        fabric()
            .names
            .read()
            .get(name)
            .map(|id| RawEndpoint(*id))
            .ok_or_else(|| EngineError::AddressResolution {
                address: address.to_string(),
                message: "no loopback engine with this name".to_string(),
            })
    }

    fn endpoint_to_string(&self, endpoint: RawEndpoint) -> Result<String> {
        let node = fabric()
            .node(endpoint)
            .map_err(|_| EngineError::AddressResolution {
                address: endpoint.to_string(),
                message: "endpoint is no longer bound".to_string(),
            })?;
        Ok(format!("{SCHEME_PREFIX}{}", node.name))
    }

    fn endpoint_eq(&self, a: RawEndpoint, b: RawEndpoint) -> bool {
        a.0 == b.0
    }

    fn endpoint_dup(&self, endpoint: RawEndpoint) -> RawEndpoint {
        // Loopback endpoint ids are stable fabric keys; duplication is
        // value copy and release is a no-op.
        endpoint
    }

    fn endpoint_release(&self, _endpoint: RawEndpoint) {}

    fn set_remove(&self, endpoint: RawEndpoint) {
        tracing::trace!(
            target: "tidepool::loopback",
            endpoint = endpoint.0,
            "stale-address hint ignored, loopback keeps no connection cache"
        );
    }

    fn set_dispatcher(&self, dispatcher: Arc<dyn RequestDispatcher>) {
        *self.node.dispatcher.write() = Some(dispatcher);
    }

    fn send_request(
        &self,
        destination: RawEndpoint,
        rpc: RpcId,
        payload: Bytes,
        await_response: bool,
    ) -> Result<Option<Bytes>> {
        let dest = fabric().node(destination)?;
        if !dest.listening {
            return Err(EngineError::Remote {
                message: "destination endpoint is not listening".to_string(),
            });
        }
        let sender = RawEndpoint(self.node.id);
        let pool_tx = dest.pool.read().as_ref().map(|pool| pool.tx.clone());
        match pool_tx {
            Some(tx) => {
                if await_response {
                    let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
                    tx.send(Job {
                        rpc,
                        sender,
                        payload,
                        reply: Some(reply_tx),
                    })
                    .map_err(|_| EngineError::Remote {
                        message: "peer dispatch pool is stopped".to_string(),
                    })?;
                    reply_rx.recv().map_err(|_| EngineError::Remote {
                        message: "peer stopped before replying".to_string(),
                    })?
                } else {
                    tx.send(Job {
                        rpc,
                        sender,
                        payload,
                        reply: None,
                    })
                    .map_err(|_| EngineError::Remote {
                        message: "peer dispatch pool is stopped".to_string(),
                    })?;
                    Ok(None)
                }
            }
            None => {
                // Cooperative progress: the handler runs on this thread.
                let result = dest.dispatch(rpc, sender, payload);
                if await_response {
                    result
                } else {
                    if let Err(err) = result {
                        tracing::debug!(
                            target: "tidepool::loopback",
                            rpc = %rpc,
                            "fire-and-forget dispatch failed: {err}"
                        );
                    }
                    Ok(None)
                }
            }
        }
    }

    fn enable_remote_shutdown(&self) {
        self.node.allow_remote_shutdown.store(true, Ordering::SeqCst);
    }

    fn request_remote_shutdown(&self, destination: RawEndpoint) -> Result<()> {
        let dest = fabric().node(destination)?;
        if !dest.allow_remote_shutdown.load(Ordering::SeqCst) {
            return Err(EngineError::Remote {
                message: "peer has not enabled remote shutdown".to_string(),
            });
        }
        dest.state.lock().shutdown_requested = true;
        dest.cond.notify_all();
        Ok(())
    }

    fn wait_shutdown(&self) {
        let mut state = self.node.state.lock();
        while !state.shutdown_requested && !state.finalizing {
            self.node.cond.wait(&mut state);
        }
    }

    fn register_region(&self, data: Vec<u8>, mode: AccessMode) -> Result<RegionId> {
        let fabric = fabric();
        let id = RegionId(fabric.next_region_id.fetch_add(1, Ordering::Relaxed));
        let extent = data.len();
        fabric.regions.write().insert(
            id,
            Arc::new(Region {
                owner: self.node.id,
                mode,
                extent,
                data: RwLock::new(data),
            }),
        );
        Ok(id)
    }

    fn release_region(&self, region: RegionId) {
        let mut regions = fabric().regions.write();
        if regions
            .get(&region)
            .is_some_and(|entry| entry.owner == self.node.id)
        {
            regions.remove(&region);
        }
    }

    fn region_read(&self, region: RegionId, offset: usize, len: usize) -> Result<Vec<u8>> {
        let entry = fabric()
            .regions
            .read()
            .get(&region)
            .cloned()
            .filter(|entry| entry.owner == self.node.id)
            .ok_or_else(|| EngineError::Configuration {
                message: "region is not registered with this session".to_string(),
            })?;
        let end = checked_end(offset, len, entry.extent)?;
        let bytes = entry.data.read()[offset..end].to_vec();
        Ok(bytes)
    }

    fn transfer(
        &self,
        op: TransferOp,
        origin: RawEndpoint,
        origin_region: RegionId,
        origin_offset: usize,
        local_region: RegionId,
        local_offset: usize,
        size: usize,
    ) -> Result<()> {
        let (origin_buf, local_buf) = {
            let regions = fabric().regions.read();
            let origin_buf =
                regions
                    .get(&origin_region)
                    .cloned()
                    .ok_or_else(|| EngineError::Remote {
                        message: "origin region is not registered".to_string(),
                    })?;
            let local_buf =
                regions
                    .get(&local_region)
                    .cloned()
                    .ok_or_else(|| EngineError::Configuration {
                        message: "local region is not registered with this session".to_string(),
                    })?;
            (origin_buf, local_buf)
        };
        if origin_buf.owner != origin.0 {
            return Err(EngineError::Remote {
                message: "origin region does not belong to the origin address".to_string(),
            });
        }
        if local_buf.owner != self.node.id {
            return Err(EngineError::Configuration {
                message: "local region belongs to another session".to_string(),
            });
        }
        // Authoritative re-validation of bounds and access modes.
        let origin_end = checked_end(origin_offset, size, origin_buf.extent)?;
        let local_end = checked_end(local_offset, size, local_buf.extent)?;
        match op {
            TransferOp::Push => {
                if !local_buf.mode.readable() {
                    return Err(EngineError::AccessMode {
                        message: "push requires a readable local region".to_string(),
                    });
                }
                if !origin_buf.mode.writable() {
                    return Err(EngineError::AccessMode {
                        message: "push requires a writable origin region".to_string(),
                    });
                }
            }
            TransferOp::Pull => {
                if !origin_buf.mode.readable() {
                    return Err(EngineError::AccessMode {
                        message: "pull requires a readable origin region".to_string(),
                    });
                }
                if !local_buf.mode.writable() {
                    return Err(EngineError::AccessMode {
                        message: "pull requires a writable local region".to_string(),
                    });
                }
            }
        }
        let (src, src_offset, dst, dst_offset, dst_end) = match op {
            TransferOp::Push => (
                &local_buf,
                local_offset,
                &origin_buf,
                origin_offset,
                origin_end,
            ),
            TransferOp::Pull => (
                &origin_buf,
                origin_offset,
                &local_buf,
                local_offset,
                local_end,
            ),
        };
        if origin_region == local_region {
            let mut data = dst.data.write();
            data.copy_within(src_offset..src_offset + size, dst_offset);
            return Ok(());
        }
        // Copy out under the read lock, then write; taking both locks
        // at once could deadlock against a concurrent reverse transfer.
        let chunk = src.data.read()[src_offset..src_offset + size].to_vec();
        dst.data.write()[dst_offset..dst_end].copy_from_slice(&chunk);
        Ok(())
    }

    fn signal_finalize(&self) {
        {
            let mut state = self.node.state.lock();
            state.finalizing = true;
            self.node.cond.notify_all();
            while state.in_flight > 0 {
                self.node.cond.wait(&mut state);
            }
        }
        let pool = self.node.pool.write().take();
        if let Some(pool) = pool {
            pool.shutdown();
        }
    }

    fn release(&self) {
        let fabric = fabric();
        fabric.nodes.write().remove(&self.node.id);
        fabric.names.write().remove(&self.node.name);
        fabric
            .regions
            .write()
            .retain(|_, region| region.owner != self.node.id);
        *self.node.dispatcher.write() = None;
        tracing::debug!(
            target: "tidepool::loopback",
            node = self.node.id,
            "loopback session released"
        );
    }
}

fn checked_end(offset: usize, size: usize, extent: usize) -> Result<usize> {
    match offset.checked_add(size) {
        Some(end) if end <= extent => Ok(end),
        _ => Err(EngineError::OutOfBounds {
            offset,
            size,
            extent,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_end_boundaries() {
        assert_eq!(checked_end(0, 1024, 1024).ok(), Some(1024));
        assert!(checked_end(1, 1024, 1024).is_err());
        assert!(checked_end(usize::MAX, 2, 1024).is_err());
    }

    #[test]
    fn test_session_lookup_and_identity() {
        let options = EngineOptions::default();
        let session =
            create_session("loopback://lb-unit-server", Mode::Server, &options).expect("session");
        assert!(session.is_listening());
        let endpoint = session.lookup("loopback://lb-unit-server").expect("lookup");
        assert!(session.endpoint_eq(endpoint, session.self_endpoint()));
        assert_eq!(
            session.endpoint_to_string(endpoint).expect("to_string"),
            "loopback://lb-unit-server"
        );
        session.signal_finalize();
        session.release();
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let options = EngineOptions::default();
        let session =
            create_session("loopback://lb-unit-dup", Mode::Server, &options).expect("session");
        let duplicate = create_session("loopback://lb-unit-dup", Mode::Server, &options);
        assert!(matches!(
            duplicate,
            Err(EngineError::Initialization { .. })
        ));
        session.signal_finalize();
        session.release();
    }

    #[test]
    fn test_lookup_unknown_name_fails() {
        let options = EngineOptions::default();
        let session =
            create_session("loopback://lb-unit-lookup", Mode::Client, &options).expect("session");
        assert!(matches!(
            session.lookup("loopback://nobody-here"),
            Err(EngineError::AddressResolution { .. })
        ));
        session.signal_finalize();
        session.release();
    }

    #[test]
    fn test_region_read_checks_bounds() {
        let options = EngineOptions::default();
        let session =
            create_session("loopback://lb-unit-region", Mode::Client, &options).expect("session");
        let region = session
            .register_region(vec![7u8; 64], AccessMode::ReadWrite)
            .expect("register");
        assert_eq!(session.region_read(region, 60, 4).expect("read"), vec![7u8; 4]);
        assert!(matches!(
            session.region_read(region, 60, 5),
            Err(EngineError::OutOfBounds { .. })
        ));
        session.release_region(region);
        session.signal_finalize();
        session.release();
    }
}

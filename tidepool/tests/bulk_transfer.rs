//! Integration tests for bulk region registration and push/pull
//! transfers, including the bounds and access-mode constraints.

use std::sync::Arc;

use bytes::Bytes;
use tidepool::{
    AccessMode, BulkDescriptor, Engine, EngineError, EngineOptions, IncomingHandle, Mode, Result,
    TransferOp,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Spin up a server exposing one registered region. The "expose" RPC
/// answers with the region's descriptor so peers can address it.
fn region_server(name: &str, data: Vec<u8>, mode: AccessMode) -> (Engine, Arc<tidepool::BulkRegion>) {
    let engine = Engine::init(
        &format!("loopback://{name}"),
        Mode::Server,
        EngineOptions::default(),
    )
    .expect("server engine");
    let region = Arc::new(engine.create_bulk(data, mode).expect("register region"));
    let descriptor = region.descriptor();
    let handler = move |incoming: &IncomingHandle, _: Bytes| -> Result<()> {
        let encoded = serde_json::to_vec(&descriptor).map_err(|err| EngineError::Remote {
            message: err.to_string(),
        })?;
        incoming.respond(encoded)
    };
    engine
        .register("expose", Some(Arc::new(handler)), 0)
        .expect("register expose");
    (engine, region)
}

fn fetch_descriptor(client: &Engine, server_name: &str) -> (tidepool::Address, BulkDescriptor) {
    let rpc = client.register("expose", None, 0).expect("client-side id");
    let addr = client
        .lookup(&format!("loopback://{server_name}"))
        .expect("resolve server");
    let handle = client.create_handle(&addr, rpc).expect("handle");
    let response = handle.call(Bytes::new()).expect("call").expect("descriptor");
    let descriptor: BulkDescriptor = serde_json::from_slice(&response).expect("decode");
    (addr, descriptor)
}

#[test]
fn test_pull_into_write_only_region() {
    init_tracing();
    let pattern: Vec<u8> = (0..2048u32).map(|i| (i % 251) as u8).collect();
    let (server, _region) =
        region_server("bulk-pull-server", pattern.clone(), AccessMode::ReadOnly);

    let client = Engine::init("loopback", Mode::Client, EngineOptions::default())
        .expect("client engine");
    let (addr, descriptor) = fetch_descriptor(&client, "bulk-pull-server");
    assert_eq!(descriptor.len, 2048);

    let local = client
        .create_bulk(vec![0u8; 1024], AccessMode::WriteOnly)
        .expect("local region");
    client
        .transfer(TransferOp::Pull, &addr, &descriptor, 0, &local, 512, 256)
        .expect("pull");

    // Local access is not subject to the remote access mode.
    let fetched = local.read(512, 256).expect("read back");
    assert_eq!(fetched, &pattern[0..256]);

    // Pulling the same range again yields identical bytes.
    client
        .transfer(TransferOp::Pull, &addr, &descriptor, 0, &local, 512, 256)
        .expect("second pull");
    assert_eq!(local.read(512, 256).expect("read back"), fetched);

    client.finalize().expect("finalize client");
    server.finalize().expect("finalize server");
}

#[test]
fn test_push_to_remote_region() {
    let (server, server_region) =
        region_server("bulk-push-server", vec![0u8; 1024], AccessMode::WriteOnly);

    let client = Engine::init("loopback", Mode::Client, EngineOptions::default())
        .expect("client engine");
    let (addr, descriptor) = fetch_descriptor(&client, "bulk-push-server");

    let payload: Vec<u8> = (0..128u8).collect();
    let local = client
        .create_bulk(payload.clone(), AccessMode::ReadOnly)
        .expect("local region");
    client
        .transfer(TransferOp::Push, &addr, &descriptor, 896, &local, 0, 128)
        .expect("push");

    assert_eq!(server_region.read(896, 128).expect("server read"), payload);

    client.finalize().expect("finalize client");
    server.finalize().expect("finalize server");
}

#[test]
fn test_transfer_bounds_are_exact() {
    let (server, _region) =
        region_server("bulk-bounds-server", vec![1u8; 2048], AccessMode::ReadOnly);
    let client = Engine::init("loopback", Mode::Client, EngineOptions::default())
        .expect("client engine");
    let (addr, descriptor) = fetch_descriptor(&client, "bulk-bounds-server");

    let local = client
        .create_bulk(vec![0u8; 2048], AccessMode::ReadWrite)
        .expect("local region");

    // offset + size == extent is the last valid range.
    client
        .transfer(TransferOp::Pull, &addr, &descriptor, 1024, &local, 0, 1024)
        .expect("boundary pull");

    // One byte past the origin extent.
    assert!(matches!(
        client.transfer(TransferOp::Pull, &addr, &descriptor, 1025, &local, 0, 1024),
        Err(EngineError::OutOfBounds { extent: 2048, .. })
    ));

    // One byte past the local extent.
    assert!(matches!(
        client.transfer(TransferOp::Pull, &addr, &descriptor, 0, &local, 1025, 1024),
        Err(EngineError::OutOfBounds { extent: 2048, .. })
    ));

    client.finalize().expect("finalize client");
    server.finalize().expect("finalize server");
}

#[test]
fn test_transfer_respects_access_modes() {
    let (server, _region) = region_server(
        "bulk-modes-server",
        vec![9u8; 256],
        AccessMode::ReadOnly,
    );
    let client = Engine::init("loopback", Mode::Client, EngineOptions::default())
        .expect("client engine");
    let (addr, descriptor) = fetch_descriptor(&client, "bulk-modes-server");

    // Pull into a read-only local region: the destination is not
    // writable.
    let read_only_local = client
        .create_bulk(vec![0u8; 256], AccessMode::ReadOnly)
        .expect("local region");
    assert!(matches!(
        client.transfer(
            TransferOp::Pull,
            &addr,
            &descriptor,
            0,
            &read_only_local,
            0,
            64
        ),
        Err(EngineError::AccessMode { .. })
    ));

    // Push into a read-only origin region: the target is not writable.
    assert!(matches!(
        client.transfer(
            TransferOp::Push,
            &addr,
            &descriptor,
            0,
            &read_only_local,
            0,
            64
        ),
        Err(EngineError::AccessMode { .. })
    ));

    // Push from a write-only local region: the source is not readable.
    let write_only_local = client
        .create_bulk(vec![0u8; 256], AccessMode::WriteOnly)
        .expect("local region");
    assert!(matches!(
        client.transfer(
            TransferOp::Push,
            &addr,
            &descriptor,
            0,
            &write_only_local,
            0,
            64
        ),
        Err(EngineError::AccessMode { .. })
    ));

    client.finalize().expect("finalize client");
    server.finalize().expect("finalize server");
}

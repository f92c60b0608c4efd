//! # Tidepool
//!
//! RPC engine context and data-movement layer for distributed services.
//!
//! A process constructs an [`Engine`] in server or client mode against a
//! transport address specification. Servers register named RPC handlers,
//! optionally scoped by provider id; clients resolve peer [`Address`]es,
//! bind [`CallHandle`]s and invoke them. Large payloads move through
//! registered [`BulkRegion`]s with push/pull semantics instead of RPC
//! payload copies.
//!
//! This crate provides:
//! - **Engine**: session lifecycle, RPC registry, callback hooks
//! - **Address**: endpoint resolution, equality, explicit ownership
//! - **Bulk regions**: registered memory with access-mode enforcement
//! - **Providers**: id-scoped RPC namespaces sharing one engine
//! - **Logging facade**: process-wide and per-engine sinks and levels
//!
//! The network itself is behind the [`transport::TransportSession`]
//! contract; the built-in `loopback` transport connects engines within
//! one process and is what the integration tests run on.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

// =============================================================================
// Modules
// =============================================================================

/// Network addresses of engines.
pub mod address;

/// Bulk (RDMA-style) memory regions.
pub mod bulk;

/// The engine: top-level RPC context and factory.
pub mod engine;

/// Error types for the engine API.
pub mod error;

/// RPC call handles, inbound handles and the handler capability trait.
pub mod handle;

/// Process-wide and per-engine logging facade.
pub mod logging;

/// Provider-scoped RPC namespaces.
pub mod provider;

/// RPC identifiers and the registration table.
pub mod registry;

/// Transport collaborator contract and the loopback implementation.
pub mod transport;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use address::Address;
pub use bulk::{AccessMode, BulkDescriptor, BulkRegion, TransferOp};
pub use engine::{Engine, EngineLogger, EngineOptions, Mode};
pub use error::{EngineError, Result};
pub use handle::{CallHandle, IncomingHandle, RpcHandler, SharedHandler};
pub use logging::{LogLevel, LogSink, TracingSink};
pub use provider::Provider;
pub use registry::RpcId;

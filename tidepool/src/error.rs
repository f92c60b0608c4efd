//! Error types for the tidepool engine.
//!
//! Every failure crossing the public API surfaces as an [`EngineError`];
//! raw transport error codes never escape the engine boundary.

use crate::registry::RpcId;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur on the engine API.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// The transport session could not be created or bound.
    #[error("initialization failed for '{spec}': {message}")]
    Initialization {
        /// The address specification that was passed to `init`.
        spec: String,
        /// Details from the transport.
        message: String,
    },

    /// A textual address could not be resolved to an endpoint.
    #[error("address resolution failed for '{address}': {message}")]
    AddressResolution {
        /// The textual address that failed to resolve.
        address: String,
        /// Details from the transport.
        message: String,
    },

    /// Registration arguments were ambiguous or invalid.
    #[error("invalid configuration: {message}")]
    Configuration {
        /// Description of the invalid argument combination.
        message: String,
    },

    /// An operation referenced an RPC id with no registration.
    #[error("unknown rpc id {id}")]
    UnknownRpc {
        /// The id that has no registration.
        id: RpcId,
    },

    /// A bulk transfer range exceeds a registered region's extent.
    #[error("bulk range out of bounds: offset {offset} + size {size} exceeds {extent}-byte region")]
    OutOfBounds {
        /// Byte offset into the region.
        offset: usize,
        /// Requested transfer size in bytes.
        size: usize,
        /// Registered extent of the violated region.
        extent: usize,
    },

    /// A bulk transfer direction is incompatible with a region's access mode.
    #[error("bulk access mode violation: {message}")]
    AccessMode {
        /// Which side and mode were incompatible.
        message: String,
    },

    /// An operation was attempted on a finalized engine.
    #[error("operation '{operation}' attempted on a finalized engine")]
    Lifecycle {
        /// The operation that was rejected.
        operation: &'static str,
    },

    /// A peer-reported failure surfaced through the transport.
    #[error("remote failure: {message}")]
    Remote {
        /// Description reported by (or about) the peer.
        message: String,
    },
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Configuration {
            message: err.to_string(),
        }
    }
}

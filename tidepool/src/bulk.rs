//! Bulk (RDMA-style) memory regions.
//!
//! A [`BulkRegion`] registers a contiguous buffer with the transport so
//! peers can move byte ranges in and out of it without an RPC round-trip
//! per chunk. The access mode is fixed at registration and enforced on
//! every transfer. Regions are advertised to peers as a serializable
//! [`BulkDescriptor`] carried inside an ordinary RPC payload.

use serde::{Deserialize, Serialize};

use crate::engine::Engine;
use crate::error::Result;
use crate::transport::RegionId;

/// What remote peers may do with a registered region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessMode {
    /// Peers may read from the region (pull source, push source).
    ReadOnly,
    /// Peers may write into the region (pull destination, push target).
    WriteOnly,
    /// Both directions are allowed.
    ReadWrite,
}

impl AccessMode {
    /// Whether data may be read out of a region with this mode.
    pub fn readable(self) -> bool {
        matches!(self, AccessMode::ReadOnly | AccessMode::ReadWrite)
    }

    /// Whether data may be written into a region with this mode.
    pub fn writable(self) -> bool {
        matches!(self, AccessMode::WriteOnly | AccessMode::ReadWrite)
    }
}

/// Direction of a bulk transfer, always expressed from the local side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferOp {
    /// Send local bytes to the origin region.
    Push,
    /// Fetch bytes from the origin region into local memory.
    Pull,
}

/// Wire-exchangeable description of a registered region.
///
/// Produced by [`BulkRegion::descriptor`] and typically embedded in an
/// RPC payload so the peer can name this region in a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkDescriptor {
    /// Transport-level registration handle.
    pub region: RegionId,
    /// Registered extent in bytes.
    pub len: usize,
    /// Access mode fixed at registration.
    pub mode: AccessMode,
}

/// A registered, remotely-accessible contiguous memory region.
///
/// The registered buffer lives behind the transport registration for the
/// lifetime of this handle, so it cannot move or be freed while a remote
/// peer holds the descriptor. Dropping the region releases the
/// registration.
pub struct BulkRegion {
    engine: Engine,
    id: RegionId,
    len: usize,
    mode: AccessMode,
}

impl BulkRegion {
    pub(crate) fn new(engine: Engine, id: RegionId, len: usize, mode: AccessMode) -> Self {
        Self {
            engine,
            id,
            len,
            mode,
        }
    }

    /// Registered extent in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the region is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Access mode fixed at registration.
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Descriptor to advertise this region to a peer.
    pub fn descriptor(&self) -> BulkDescriptor {
        BulkDescriptor {
            region: self.id,
            len: self.len,
            mode: self.mode,
        }
    }

    pub(crate) fn id(&self) -> RegionId {
        self.id
    }

    /// Read `len` bytes at `offset` out of the registered buffer.
    ///
    /// Local access; not subject to the remote access mode.
    pub fn read(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        self.engine.region_read(self.id, offset, len)
    }

    /// The entire registered buffer.
    pub fn contents(&self) -> Result<Vec<u8>> {
        self.read(0, self.len)
    }
}

impl Drop for BulkRegion {
    fn drop(&mut self) {
        self.engine.release_region(self.id);
    }
}

impl std::fmt::Debug for BulkRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkRegion")
            .field("id", &self.id)
            .field("len", &self.len)
            .field("mode", &self.mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_mode_directions() {
        assert!(AccessMode::ReadOnly.readable());
        assert!(!AccessMode::ReadOnly.writable());
        assert!(!AccessMode::WriteOnly.readable());
        assert!(AccessMode::WriteOnly.writable());
        assert!(AccessMode::ReadWrite.readable());
        assert!(AccessMode::ReadWrite.writable());
    }

    #[test]
    fn test_descriptor_serde_roundtrip() {
        let descriptor = BulkDescriptor {
            region: RegionId(42),
            len: 2048,
            mode: AccessMode::ReadOnly,
        };
        let json = serde_json::to_string(&descriptor).expect("serialize");
        let decoded: BulkDescriptor = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(descriptor, decoded);
    }
}

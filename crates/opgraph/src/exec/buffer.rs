//! Backend-owned memory blocks tracked by the execution layer.

use std::sync::Arc;

use crate::error::ExecResult;

/// Opaque fixed-size block of backend memory.
///
/// The core never interprets buffer contents; it only moves bytes across the
/// host boundary and tracks which node produced which buffer. Implementations
/// are free to back this with host memory, device memory, or anything else
/// that can satisfy the byte-copy contract. Interior mutability is expected:
/// `write_bytes` takes `&self` because device allocations are naturally
/// handles, not exclusive borrows.
pub trait DeviceBuffer: Send + Sync + std::fmt::Debug {
    /// Size of the block in bytes; fixed for the buffer's lifetime.
    fn num_bytes(&self) -> usize;

    /// Copies the full buffer contents into `dst`, which must hold exactly
    /// `num_bytes()` bytes.
    fn read_bytes(&self, dst: &mut [u8]) -> ExecResult<()>;

    /// Overwrites the full buffer contents from `src`, which must hold
    /// exactly `num_bytes()` bytes.
    fn write_bytes(&self, src: &[u8]) -> ExecResult<()>;
}

/// Shared, type-erased handle to a backend buffer.
pub type BufferRef = Arc<dyn DeviceBuffer>;

//! Kernel dispatch table keyed by operation kind.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ExecError, ExecResult};
use crate::graph::{OpKind, Operation};

use super::buffer::{BufferRef, DeviceBuffer};

/// Executes one node: reads the dependency buffers, writes the output buffer.
///
/// Kernels are synchronous with respect to buffer contents: the output must
/// be fully written before the kernel returns, because the scheduler then
/// considers the node done and may release its inputs.
pub type KernelFn =
    Arc<dyn Fn(&Operation, &[BufferRef], &dyn DeviceBuffer) -> ExecResult<()> + Send + Sync>;

/// Backend-supplied kernels, one per operation kind.
///
/// Registering a kernel under `Variable`, `Constant`, or `Reshape` overrides
/// the scheduler's default source/aliasing behavior for that kind.
#[derive(Default, Clone)]
pub struct KernelTable {
    kernels: HashMap<OpKind, KernelFn>,
}

impl KernelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a kernel; registering the same kind twice is an error.
    pub fn register(&mut self, kind: OpKind, kernel: KernelFn) -> ExecResult<()> {
        if self.kernels.contains_key(&kind) {
            return Err(ExecError::DuplicateKernel(kind));
        }
        self.kernels.insert(kind, kernel);
        Ok(())
    }

    /// Convenience wrapper accepting a plain closure.
    pub fn register_fn<F>(&mut self, kind: OpKind, kernel: F) -> ExecResult<()>
    where
        F: Fn(&Operation, &[BufferRef], &dyn DeviceBuffer) -> ExecResult<()>
            + Send
            + Sync
            + 'static,
    {
        self.register(kind, Arc::new(kernel))
    }

    pub fn lookup(&self, kind: &OpKind) -> Option<&KernelFn> {
        self.kernels.get(kind)
    }

    /// Every kind with a registered kernel, sorted by name.
    pub fn kinds(&self) -> Vec<OpKind> {
        let mut kinds: Vec<OpKind> = self.kernels.keys().cloned().collect();
        kinds.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        kinds
    }
}

//! Contracts between the core scheduler and backend collaborators.

use std::collections::HashMap;

use crate::error::ExecResult;
use crate::graph::{NodeId, OpRef};

use super::buffer::BufferRef;
use super::plan::Plan;

/// Supplies fresh, zero-initialized buffers of a requested byte size.
pub trait Allocator: Send + Sync {
    fn allocate(&self, num_bytes: usize) -> ExecResult<BufferRef>;
}

/// Caller-supplied overrides mapping a node to an existing buffer.
///
/// A bound node's sub-graph is excluded from scheduling entirely, so
/// bindings serve both as leaf-variable inputs and as cached intermediate
/// results.
pub type Bindings = HashMap<NodeId, BufferRef>;

/// One-shot evaluation of a node set.
pub trait Evaluator {
    /// Evaluates `outputs`, returning their buffers in the caller's order.
    ///
    /// Intermediate buffers are released as soon as their last consumer has
    /// executed, so peak memory follows the live frontier of the graph
    /// rather than its total size.
    fn evaluate(&self, outputs: &[OpRef], bindings: &Bindings) -> ExecResult<Vec<BufferRef>>;
}

/// Compilation of a node set into a reusable [`Plan`].
pub trait Compiler {
    /// Performs the expensive one-time work (dependency ordering, kernel
    /// selection, buffer preallocation) so repeated executions only bind
    /// leaves and launch kernels.
    fn compile(&self, outputs: &[OpRef]) -> ExecResult<Plan>;
}

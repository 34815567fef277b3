//! Shared scheduling steps: dependency ordering, consumer counts, and the
//! slot arena that tracks buffer ownership.

use std::collections::{HashMap, HashSet};

use crate::error::{ExecError, ExecResult};
use crate::graph::{topology, NodeId, OpKind, OpRef};

use super::buffer::BufferRef;
use super::kernel::{KernelFn, KernelTable};

/// Dependency-ordered node list with per-node consumer counts.
///
/// A node's count is the number of times it appears as a dependency among
/// the scheduled nodes plus the number of times it appears in the requested
/// outputs; output occurrences are never decremented, which is what keeps
/// result buffers alive to the end.
pub(super) struct Schedule {
    pub order: Vec<OpRef>,
    consumers: HashMap<NodeId, usize>,
}

impl Schedule {
    pub fn plan(outputs: &[OpRef], exclude: &HashSet<NodeId>) -> Self {
        let order = topology::reachable_excluding(outputs, exclude);
        let mut consumers: HashMap<NodeId, usize> = HashMap::new();
        for node in &order {
            for dep in node.deps() {
                *consumers.entry(dep.id()).or_insert(0) += 1;
            }
        }
        for output in outputs {
            *consumers.entry(output.id()).or_insert(0) += 1;
        }
        Schedule { order, consumers }
    }

    pub fn consumer_count(&self, id: NodeId) -> usize {
        self.consumers.get(&id).copied().unwrap_or(0)
    }
}

/// How the scheduler realizes one node.
pub(super) enum NodeRole<'a> {
    /// No dependencies and no kernel: the node supplies its own buffer
    /// (binding, default value, or uploaded literal); nothing executes.
    Source,
    /// Pure shape relabeling with no kernel: the node shares its single
    /// dependency's buffer, zero-copy.
    Alias,
    /// Everything else: allocate an output and launch the kernel.
    Kernel(&'a KernelFn),
}

/// Decides how `node` executes under `kernels`; a registered kernel always
/// wins, so backends can override the source and aliasing defaults.
pub(super) fn classify<'a>(node: &OpRef, kernels: &'a KernelTable) -> ExecResult<NodeRole<'a>> {
    if let Some(kernel) = kernels.lookup(node.kind()) {
        return Ok(NodeRole::Kernel(kernel));
    }
    if node.deps().is_empty() {
        return Ok(NodeRole::Source);
    }
    if matches!(node.kind(), OpKind::Reshape) && node.deps().len() == 1 {
        return Ok(NodeRole::Alias);
    }
    Err(ExecError::MissingKernel(node.kind().clone()))
}

struct Slot {
    buffer: Option<BufferRef>,
    remaining: usize,
}

/// Buffer slots indexed by node id, with explicit ownership per slot.
///
/// An aliasing node is a second id entry pointing at the same slot rather
/// than a copied handle, so shared lifetime is visible to the arena: the
/// slot's remaining count aggregates every consumer of every node mapped to
/// it, and the buffer is dropped exactly when that count reaches zero.
pub(super) struct SlotArena {
    lookup: HashMap<NodeId, usize>,
    slots: Vec<Slot>,
}

impl SlotArena {
    pub fn new() -> Self {
        SlotArena {
            lookup: HashMap::new(),
            slots: Vec::new(),
        }
    }

    /// Assigns a fresh slot owning `buffer` on behalf of `id`.
    pub fn bind(&mut self, id: NodeId, buffer: BufferRef, consumers: usize) {
        let index = self.slots.len();
        self.slots.push(Slot {
            buffer: Some(buffer),
            remaining: consumers,
        });
        self.lookup.insert(id, index);
    }

    /// Points `id` at `target`'s slot, taking over `consumers` shares.
    pub fn alias(&mut self, id: NodeId, target: NodeId, consumers: usize) -> ExecResult<()> {
        let index = *self
            .lookup
            .get(&target)
            .ok_or_else(|| ExecError::execution(format!("alias target {target} has no slot")))?;
        self.slots[index].remaining += consumers;
        self.lookup.insert(id, index);
        Ok(())
    }

    pub fn buffer(&self, id: NodeId) -> Option<BufferRef> {
        let index = *self.lookup.get(&id)?;
        self.slots[index].buffer.clone()
    }

    /// Records that one consumer of `id` has executed; the slot's buffer is
    /// dropped when no consumers remain.
    pub fn consume(&mut self, id: NodeId) {
        if let Some(&index) = self.lookup.get(&id) {
            let slot = &mut self.slots[index];
            slot.remaining = slot.remaining.saturating_sub(1);
            if slot.remaining == 0 {
                slot.buffer = None;
            }
        }
    }
}

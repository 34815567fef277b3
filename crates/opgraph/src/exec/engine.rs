//! Generic graph execution over any allocator and kernel table.

use std::collections::HashSet;

use smallvec::SmallVec;

use crate::error::{ExecError, ExecResult};
use crate::graph::{NodeId, OpRef};

use super::buffer::BufferRef;
use super::contract::{Allocator, Bindings, Compiler, Evaluator};
use super::kernel::KernelTable;
use super::plan::Plan;
use super::schedule::{classify, NodeRole, Schedule, SlotArena};

/// Backend-independent executor: an allocator plus a kernel table.
///
/// Concrete backends construct one of these with their own pieces; the
/// scheduling, aliasing, and buffer-lifetime logic lives here and is shared
/// by every backend.
pub struct Engine<A: Allocator> {
    allocator: A,
    kernels: KernelTable,
}

impl<A: Allocator> Engine<A> {
    pub fn new(allocator: A, kernels: KernelTable) -> Self {
        Self { allocator, kernels }
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    pub fn kernels(&self) -> &KernelTable {
        &self.kernels
    }

    /// Produces the buffer a source node supplies by itself.
    fn source_buffer(&self, node: &OpRef) -> ExecResult<BufferRef> {
        if let Some(buffer) = node.attrs().buffer("value") {
            // Pre-materialized device value: reuse directly, no allocation.
            return Ok(BufferRef::clone(buffer));
        }
        if let Some(literal) = node.attrs().literal("value") {
            let buffer = self.allocator.allocate(literal.byte_len())?;
            buffer.write_bytes(literal.bytes())?;
            return Ok(buffer);
        }
        Err(ExecError::UnboundSource { site: node.site() })
    }
}

fn check_size(node: &OpRef, buffer: &BufferRef) -> ExecResult<()> {
    let expected = node.output_type().byte_len();
    let actual = buffer.num_bytes();
    if expected != actual {
        return Err(ExecError::SizeMismatch {
            site: node.site(),
            expected,
            actual,
        });
    }
    Ok(())
}

impl<A: Allocator> Evaluator for Engine<A> {
    fn evaluate(&self, outputs: &[OpRef], bindings: &Bindings) -> ExecResult<Vec<BufferRef>> {
        let exclude: HashSet<NodeId> = bindings.keys().copied().collect();
        let schedule = Schedule::plan(outputs, &exclude);
        let mut arena = SlotArena::new();

        let fetch = |arena: &SlotArena, dep: &OpRef| -> ExecResult<BufferRef> {
            if let Some(bound) = bindings.get(&dep.id()) {
                check_size(dep, bound)?;
                return Ok(BufferRef::clone(bound));
            }
            arena.buffer(dep.id()).ok_or_else(|| {
                ExecError::execution(format!("dependency {} has no live buffer", dep.id()))
            })
        };

        for node in &schedule.order {
            let consumers = schedule.consumer_count(node.id());
            match classify(node, &self.kernels)? {
                NodeRole::Source => {
                    let buffer = self.source_buffer(node)?;
                    arena.bind(node.id(), buffer, consumers);
                }
                NodeRole::Alias => {
                    let dep = &node.deps()[0];
                    if let Some(bound) = bindings.get(&dep.id()) {
                        check_size(dep, bound)?;
                        arena.bind(node.id(), BufferRef::clone(bound), consumers);
                    } else {
                        // Share the slot first so taking over the alias's
                        // consumers happens before the dependency is counted
                        // as consumed.
                        arena.alias(node.id(), dep.id(), consumers)?;
                        arena.consume(dep.id());
                    }
                }
                NodeRole::Kernel(kernel) => {
                    let inputs: SmallVec<[BufferRef; 2]> = node
                        .deps()
                        .iter()
                        .map(|dep| fetch(&arena, dep))
                        .collect::<ExecResult<_>>()?;
                    let output = self.allocator.allocate(node.output_type().byte_len())?;
                    kernel(node, &inputs, output.as_ref()).map_err(|err| match err {
                        kernel_err @ ExecError::Kernel { .. } => kernel_err,
                        other => ExecError::kernel(node.kind().clone(), other.to_string()),
                    })?;
                    arena.bind(node.id(), output, consumers);
                    for dep in node.deps() {
                        if !bindings.contains_key(&dep.id()) {
                            arena.consume(dep.id());
                        }
                    }
                }
            }
        }

        outputs
            .iter()
            .map(|output| {
                if let Some(bound) = bindings.get(&output.id()) {
                    return Ok(BufferRef::clone(bound));
                }
                arena.buffer(output.id()).ok_or_else(|| {
                    ExecError::execution(format!("output {} has no result buffer", output.id()))
                })
            })
            .collect()
    }
}

impl<A: Allocator> Compiler for Engine<A> {
    fn compile(&self, outputs: &[OpRef]) -> ExecResult<Plan> {
        Plan::compile(outputs, &self.allocator, &self.kernels)
    }
}

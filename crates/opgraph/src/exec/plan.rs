//! Compiled, reusable execution plans.

use std::collections::{HashMap, HashSet};

use smallvec::SmallVec;

use crate::error::{ExecError, ExecResult};
use crate::graph::{NodeId, OpRef};

use super::buffer::BufferRef;
use super::contract::{Allocator, Bindings};
use super::kernel::{KernelFn, KernelTable};
use super::schedule::{classify, NodeRole, Schedule};

struct PlanSlot {
    /// Representative producing node; used for error sites and size checks.
    node: OpRef,
    /// Buffer owned by the plan: a preallocated kernel output, an uploaded
    /// constant, or a source's default value. `None` means the slot must be
    /// fed by a binding on every execution.
    fixed: Option<BufferRef>,
    source: bool,
}

struct Step {
    node: OpRef,
    kernel: KernelFn,
    inputs: SmallVec<[usize; 2]>,
    output: usize,
}

/// Immutable compiled artifact over a fixed ordered output set.
///
/// Compilation performs the dependency sort, kernel selection, and per-node
/// buffer preallocation once; each [`execute`](Plan::execute) only binds
/// leaves and launches kernels. The plan owns its buffers for its entire
/// lifetime and must be explicitly [`release`](Plan::release)d when no
/// longer needed.
pub struct Plan {
    slots: Vec<PlanSlot>,
    lookup: HashMap<NodeId, usize>,
    steps: Vec<Step>,
    outputs: Vec<OpRef>,
    output_slots: Vec<usize>,
    released: bool,
}

impl Plan {
    pub(super) fn compile<A: Allocator>(
        outputs: &[OpRef],
        allocator: &A,
        kernels: &KernelTable,
    ) -> ExecResult<Self> {
        let schedule = Schedule::plan(outputs, &HashSet::new());

        let mut slots: Vec<PlanSlot> = Vec::new();
        let mut lookup: HashMap<NodeId, usize> = HashMap::new();
        let mut steps: Vec<Step> = Vec::new();

        for node in &schedule.order {
            match classify(node, kernels)? {
                NodeRole::Source => {
                    // Default values are uploaded once here; sources without
                    // one stay empty and are fed per execution.
                    let fixed = if let Some(buffer) = node.attrs().buffer("value") {
                        Some(BufferRef::clone(buffer))
                    } else if let Some(literal) = node.attrs().literal("value") {
                        let buffer = allocator.allocate(literal.byte_len())?;
                        buffer.write_bytes(literal.bytes())?;
                        Some(buffer)
                    } else {
                        None
                    };
                    let index = slots.len();
                    slots.push(PlanSlot {
                        node: OpRef::clone(node),
                        fixed,
                        source: true,
                    });
                    lookup.insert(node.id(), index);
                }
                NodeRole::Alias => {
                    let dep = &node.deps()[0];
                    let index = *lookup.get(&dep.id()).ok_or_else(|| {
                        ExecError::execution(format!("alias target {} has no slot", dep.id()))
                    })?;
                    lookup.insert(node.id(), index);
                }
                NodeRole::Kernel(kernel) => {
                    let inputs: SmallVec<[usize; 2]> = node
                        .deps()
                        .iter()
                        .map(|dep| {
                            lookup.get(&dep.id()).copied().ok_or_else(|| {
                                ExecError::execution(format!(
                                    "dependency {} has no slot",
                                    dep.id()
                                ))
                            })
                        })
                        .collect::<ExecResult<_>>()?;
                    let buffer = allocator.allocate(node.output_type().byte_len())?;
                    let index = slots.len();
                    slots.push(PlanSlot {
                        node: OpRef::clone(node),
                        fixed: Some(buffer),
                        source: false,
                    });
                    lookup.insert(node.id(), index);
                    steps.push(Step {
                        node: OpRef::clone(node),
                        kernel: KernelFn::clone(kernel),
                        inputs,
                        output: index,
                    });
                }
            }
        }

        let output_slots = outputs
            .iter()
            .map(|output| {
                lookup.get(&output.id()).copied().ok_or_else(|| {
                    ExecError::execution(format!("output {} has no slot", output.id()))
                })
            })
            .collect::<ExecResult<Vec<_>>>()?;

        Ok(Plan {
            slots,
            lookup,
            steps,
            outputs: outputs.to_vec(),
            output_slots,
            released: false,
        })
    }

    /// The output set this plan was compiled for, in the caller's order.
    pub fn outputs(&self) -> &[OpRef] {
        &self.outputs
    }

    /// Runs the compiled steps against fresh leaf bindings.
    ///
    /// Only source nodes may be bound; everything else is recomputed into
    /// the plan's own buffers. Returned buffers stay owned by the plan (or
    /// by the caller's bindings) and are overwritten by the next execution.
    pub fn execute(&self, bindings: &Bindings) -> ExecResult<Vec<BufferRef>> {
        if self.released {
            return Err(ExecError::PlanReleased);
        }

        let mut current: Vec<Option<BufferRef>> =
            self.slots.iter().map(|slot| slot.fixed.clone()).collect();

        for (id, buffer) in bindings {
            let Some(&index) = self.lookup.get(id) else {
                return Err(ExecError::execution(format!(
                    "binding targets node {id}, which is not part of this plan"
                )));
            };
            let slot = &self.slots[index];
            if !slot.source {
                return Err(ExecError::execution(format!(
                    "only source nodes can be bound in a compiled plan, {} is computed",
                    slot.node.site()
                )));
            }
            let expected = slot.node.output_type().byte_len();
            if buffer.num_bytes() != expected {
                return Err(ExecError::SizeMismatch {
                    site: slot.node.site(),
                    expected,
                    actual: buffer.num_bytes(),
                });
            }
            current[index] = Some(BufferRef::clone(buffer));
        }

        for (index, slot) in self.slots.iter().enumerate() {
            if current[index].is_none() {
                return Err(ExecError::UnboundSource {
                    site: slot.node.site(),
                });
            }
        }

        for step in &self.steps {
            let inputs: SmallVec<[BufferRef; 2]> = step
                .inputs
                .iter()
                .map(|&input| {
                    current[input]
                        .clone()
                        .expect("all slots checked before stepping")
                })
                .collect();
            let output = current[step.output]
                .clone()
                .expect("kernel outputs are preallocated at compile time");
            (step.kernel)(&step.node, &inputs, output.as_ref()).map_err(|err| match err {
                kernel_err @ ExecError::Kernel { .. } => kernel_err,
                other => ExecError::kernel(step.node.kind().clone(), other.to_string()),
            })?;
        }

        Ok(self
            .output_slots
            .iter()
            .map(|&slot| {
                current[slot]
                    .clone()
                    .expect("output slots checked before stepping")
            })
            .collect())
    }

    /// Drops every buffer and compiled step the plan owns. Further
    /// executions fail with [`ExecError::PlanReleased`].
    pub fn release(&mut self) {
        self.slots.clear();
        self.lookup.clear();
        self.steps.clear();
        self.output_slots.clear();
        self.released = true;
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

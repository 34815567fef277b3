//! Typed tensor operation graphs with reverse-mode differentiation and a
//! backend-agnostic execution layer.
//!
//! Nodes are immutable and only come into existence through a [`Registry`],
//! whose per-kind verifiers and judges make every node type-correct by
//! construction. [`grad`](grad::grad) walks a graph in reverse topological
//! order and emits derivative nodes built from the same operators, so
//! gradients are themselves differentiable. The [`exec`] layer turns node
//! sets into dependency-ordered, reference-counted buffer programs that any
//! backend can drive by supplying an [`Allocator`](exec::Allocator) and a
//! kernel table.

pub mod error;
pub mod exec;
pub mod grad;
pub mod graph;
pub mod ops;
pub mod tensor;

pub use error::{ExecError, ExecResult, GraphError, GraphResult};
pub use graph::{default_registry, AttrValue, Attrs, NodeId, OpKind, OpRef, Operation, Registry};
pub use tensor::{DType, Shape, TensorLiteral, TensorType};

//! Backend-agnostic execution: buffer contracts, kernel dispatch, one-shot
//! evaluation, and compiled plans.
//!
//! Concrete numeric kernels live in backend crates; this module owns the
//! scheduling contract they plug into. Buffers flow through an arena of
//! slots keyed by node id, shape-relabeling nodes alias their dependency's
//! slot instead of copying, and the one-shot path releases every slot as
//! soon as its last consumer has executed.

mod buffer;
mod contract;
mod engine;
mod kernel;
mod plan;
mod schedule;

pub use buffer::{BufferRef, DeviceBuffer};
pub use contract::{Allocator, Bindings, Compiler, Evaluator};
pub use engine::Engine;
pub use kernel::{KernelFn, KernelTable};
pub use plan::Plan;

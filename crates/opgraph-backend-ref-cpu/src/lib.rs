//! Reference host-memory backend for `opgraph`.
//!
//! Deliberately naive: scalar loops, no SIMD, no threading. It exists so the
//! core's evaluator, plan, and gradient layers can be exercised end-to-end
//! and so backend authors have a minimal template for the
//! `Allocator`/`DeviceBuffer`/kernel-table contracts.

pub mod cpu;

pub use cpu::{buffer_to_f32, buffer_to_i32, engine, kernel_table, HostAllocator, HostBuffer};

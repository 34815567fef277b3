use std::sync::{Arc, Mutex};

use anyhow::Result;
use opgraph::exec::{Allocator, Bindings, BufferRef, DeviceBuffer, Engine, Evaluator, KernelTable};
use opgraph::graph::default_registry;
use opgraph::{ops, DType, ExecError, ExecResult, Shape, TensorLiteral, TensorType};
use opgraph_backend_ref_cpu::{buffer_to_f32, engine, kernel_table, HostAllocator};

/// Wraps the host allocator to observe allocation counts and peak liveness.
#[derive(Default, Debug)]
struct AllocStats {
    total: usize,
    live: usize,
    max_live: usize,
}

#[derive(Clone)]
struct CountingAllocator {
    inner: HostAllocator,
    stats: Arc<Mutex<AllocStats>>,
}

#[derive(Debug)]
struct TrackedBuffer {
    inner: BufferRef,
    stats: Arc<Mutex<AllocStats>>,
}

impl CountingAllocator {
    fn new() -> Self {
        Self {
            inner: HostAllocator,
            stats: Arc::new(Mutex::new(AllocStats::default())),
        }
    }

    fn total(&self) -> usize {
        self.stats.lock().unwrap().total
    }

    fn max_live(&self) -> usize {
        self.stats.lock().unwrap().max_live
    }
}

impl Allocator for CountingAllocator {
    fn allocate(&self, num_bytes: usize) -> ExecResult<BufferRef> {
        let inner = self.inner.allocate(num_bytes)?;
        let mut stats = self.stats.lock().unwrap();
        stats.total += 1;
        stats.live += 1;
        stats.max_live = stats.max_live.max(stats.live);
        Ok(Arc::new(TrackedBuffer {
            inner,
            stats: Arc::clone(&self.stats),
        }))
    }
}

impl DeviceBuffer for TrackedBuffer {
    fn num_bytes(&self) -> usize {
        self.inner.num_bytes()
    }

    fn read_bytes(&self, dst: &mut [u8]) -> ExecResult<()> {
        self.inner.read_bytes(dst)
    }

    fn write_bytes(&self, src: &[u8]) -> ExecResult<()> {
        self.inner.write_bytes(src)
    }
}

impl Drop for TrackedBuffer {
    fn drop(&mut self) {
        let mut stats = self.stats.lock().unwrap();
        stats.live -= 1;
    }
}

fn host_f32(values: &[f32]) -> BufferRef {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    let buffer = HostAllocator.allocate(bytes.len()).unwrap();
    buffer.write_bytes(&bytes).unwrap();
    buffer
}

#[test]
fn scalar_broadcast_adds_one_everywhere() -> Result<()> {
    let registry = default_registry();
    let x = ops::constant(registry, TensorLiteral::from_f32([2, 2], &[1.0, 2.0, 3.0, 4.0])?)?;
    let one = ops::scalar(registry, DType::F32, 1.0)?;
    let sum = ops::add(registry, &x, &one)?;

    let results = engine().evaluate(&[sum], &Bindings::new())?;
    assert_eq!(buffer_to_f32(results[0].as_ref())?, vec![2.0, 3.0, 4.0, 5.0]);
    Ok(())
}

#[test]
fn reshape_is_zero_copy() -> Result<()> {
    let registry = default_registry();
    let x = ops::constant(registry, TensorLiteral::from_f32([4], &[1.0, 2.0, 3.0, 4.0])?)?;
    let reshaped = ops::reshape(registry, &x, vec![2, 2])?;

    let allocator = CountingAllocator::new();
    let engine = Engine::new(allocator.clone(), kernel_table());
    let results = engine.evaluate(&[x, reshaped], &Bindings::new())?;

    // Byte-identical output, and the relabeling shares the source buffer
    // instead of allocating its own.
    assert_eq!(buffer_to_f32(results[0].as_ref())?, vec![1.0, 2.0, 3.0, 4.0]);
    assert!(Arc::ptr_eq(&results[0], &results[1]));
    assert_eq!(allocator.total(), 1);
    Ok(())
}

#[test]
fn chain_buffers_are_released_before_the_chain_ends() -> Result<()> {
    let registry = default_registry();
    let a = ops::constant(registry, TensorLiteral::from_f32([2], &[1.0, 2.0])?)?;
    let b = ops::neg(registry, &a)?;
    let c = ops::neg(registry, &b)?;
    let d = ops::neg(registry, &c)?;

    let allocator = CountingAllocator::new();
    let engine = Engine::new(allocator.clone(), kernel_table());
    let results = engine.evaluate(&[d], &Bindings::new())?;

    assert_eq!(buffer_to_f32(results[0].as_ref())?, vec![-1.0, -2.0]);
    // Four buffers existed over the run, but consumed ones were dropped as
    // soon as their consumer executed: the live set never exceeded two.
    assert_eq!(allocator.total(), 4);
    assert_eq!(allocator.max_live(), 2);
    Ok(())
}

#[test]
fn evaluation_is_idempotent_for_identical_bindings() -> Result<()> {
    let registry = default_registry();
    let x = ops::variable(registry, "x", TensorType::new(DType::F32, Shape::new([3])))?;
    let y = ops::tanh(registry, &ops::mul(registry, &x, &x)?)?;

    let mut bindings = Bindings::new();
    bindings.insert(x.id(), host_f32(&[0.5, -1.0, 2.0]));

    let engine = engine();
    let first = engine.evaluate(&[y.clone()], &bindings)?;
    let second = engine.evaluate(&[y], &bindings)?;
    assert_eq!(
        buffer_to_f32(first[0].as_ref())?,
        buffer_to_f32(second[0].as_ref())?
    );
    Ok(())
}

#[test]
fn missing_kernels_fail_naming_the_kind() -> Result<()> {
    let registry = default_registry();
    let x = ops::constant(registry, TensorLiteral::from_f32([2], &[0.5, 0.7])?)?;
    let y = ops::tanh(registry, &x)?;

    let bare = Engine::new(HostAllocator, KernelTable::new());
    let err = bare.evaluate(&[y], &Bindings::new()).unwrap_err();
    assert!(matches!(err, ExecError::MissingKernel(_)));
    assert!(err.to_string().contains("tanh"));
    Ok(())
}

#[test]
fn unbound_variables_fail_naming_the_label() -> Result<()> {
    let registry = default_registry();
    let x = ops::variable(registry, "weights", TensorType::new(DType::F32, Shape::new([2])))?;
    let y = ops::neg(registry, &x)?;

    let err = engine().evaluate(&[y], &Bindings::new()).unwrap_err();
    assert!(matches!(err, ExecError::UnboundSource { .. }));
    assert!(err.to_string().contains("weights"));
    Ok(())
}

#[test]
fn bound_nodes_cut_their_subgraph_out_of_the_schedule() -> Result<()> {
    let registry = default_registry();
    let x = ops::variable(registry, "x", TensorType::new(DType::F32, Shape::new([2])))?;
    let mid = ops::neg(registry, &x)?;
    let out = ops::neg(registry, &mid)?;

    // Binding the interior node means `x` is never needed at all.
    let mut bindings = Bindings::new();
    bindings.insert(mid.id(), host_f32(&[3.0, -4.0]));

    let allocator = CountingAllocator::new();
    let engine = Engine::new(allocator.clone(), kernel_table());
    let results = engine.evaluate(&[out], &bindings)?;

    assert_eq!(buffer_to_f32(results[0].as_ref())?, vec![-3.0, 4.0]);
    assert_eq!(allocator.total(), 1);
    Ok(())
}

#[test]
fn binding_size_mismatches_are_rejected() -> Result<()> {
    let registry = default_registry();
    let x = ops::variable(registry, "x", TensorType::new(DType::F32, Shape::new([2])))?;
    let y = ops::neg(registry, &x)?;

    let mut bindings = Bindings::new();
    bindings.insert(x.id(), host_f32(&[1.0]));

    let err = engine().evaluate(&[y], &bindings).unwrap_err();
    match err {
        ExecError::SizeMismatch {
            expected, actual, ..
        } => {
            assert_eq!(expected, 8);
            assert_eq!(actual, 4);
        }
        other => panic!("expected SizeMismatch, got {other:?}"),
    }
    Ok(())
}

#[test]
fn default_variable_values_are_used_when_unbound() -> Result<()> {
    let registry = default_registry();
    let x = ops::variable_with(registry, "x", TensorLiteral::from_f32([2], &[2.0, 8.0])?)?;
    let y = ops::neg(registry, &x)?;

    let engine = engine();
    let defaulted = engine.evaluate(&[y.clone()], &Bindings::new())?;
    assert_eq!(buffer_to_f32(defaulted[0].as_ref())?, vec![-2.0, -8.0]);

    let mut bindings = Bindings::new();
    bindings.insert(x.id(), host_f32(&[1.0, 1.0]));
    let bound = engine.evaluate(&[y], &bindings)?;
    assert_eq!(buffer_to_f32(bound[0].as_ref())?, vec![-1.0, -1.0]);
    Ok(())
}

#[test]
fn matmul_and_reductions_compose() -> Result<()> {
    let registry = default_registry();
    let a = ops::constant(registry, TensorLiteral::from_f32([2, 3], &[1., 2., 3., 4., 5., 6.])?)?;
    let b = ops::constant(registry, TensorLiteral::from_f32([3, 2], &[7., 8., 9., 10., 11., 12.])?)?;
    let product = ops::matmul(registry, &a, &b)?;
    let total = ops::reduce_all(registry, &product)?;
    let transposed = ops::transpose(registry, &product, vec![1, 0])?;

    let results = engine().evaluate(&[product, total, transposed], &Bindings::new())?;
    assert_eq!(
        buffer_to_f32(results[0].as_ref())?,
        vec![58.0, 64.0, 139.0, 154.0]
    );
    assert_eq!(buffer_to_f32(results[1].as_ref())?, vec![415.0]);
    assert_eq!(
        buffer_to_f32(results[2].as_ref())?,
        vec![58.0, 139.0, 64.0, 154.0]
    );
    Ok(())
}

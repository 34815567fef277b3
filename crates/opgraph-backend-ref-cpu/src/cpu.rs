use std::sync::Mutex;

use opgraph::error::{ExecError, ExecResult};
use opgraph::exec::{Allocator, BufferRef, DeviceBuffer, Engine, KernelFn, KernelTable};
use opgraph::graph::{OpKind, Operation};
use opgraph::tensor::DType;

/// Host-memory buffer satisfying the byte-copy device contract.
#[derive(Debug)]
pub struct HostBuffer {
    len: usize,
    bytes: Mutex<Vec<u8>>,
}

impl HostBuffer {
    pub fn zeroed(len: usize) -> Self {
        Self {
            len,
            bytes: Mutex::new(vec![0u8; len]),
        }
    }
}

impl DeviceBuffer for HostBuffer {
    fn num_bytes(&self) -> usize {
        self.len
    }

    fn read_bytes(&self, dst: &mut [u8]) -> ExecResult<()> {
        if dst.len() != self.len {
            return Err(ExecError::execution(format!(
                "read of {} bytes from a {}-byte buffer",
                dst.len(),
                self.len
            )));
        }
        let bytes = self.bytes.lock().expect("host buffer poisoned");
        dst.copy_from_slice(&bytes);
        Ok(())
    }

    fn write_bytes(&self, src: &[u8]) -> ExecResult<()> {
        if src.len() != self.len {
            return Err(ExecError::execution(format!(
                "write of {} bytes into a {}-byte buffer",
                src.len(),
                self.len
            )));
        }
        let mut bytes = self.bytes.lock().expect("host buffer poisoned");
        bytes.copy_from_slice(src);
        Ok(())
    }
}

/// Zero-initializing host allocator.
#[derive(Default, Clone, Copy)]
pub struct HostAllocator;

impl Allocator for HostAllocator {
    fn allocate(&self, num_bytes: usize) -> ExecResult<BufferRef> {
        Ok(std::sync::Arc::new(HostBuffer::zeroed(num_bytes)))
    }
}

fn read_all(buffer: &dyn DeviceBuffer) -> ExecResult<Vec<u8>> {
    let mut bytes = vec![0u8; buffer.num_bytes()];
    buffer.read_bytes(&mut bytes)?;
    Ok(bytes)
}

fn bytes_to_f32(bytes: &[u8]) -> ExecResult<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(ExecError::execution("byte length is not a multiple of 4"));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

fn f32_to_bytes(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn bytes_to_i32(bytes: &[u8]) -> ExecResult<Vec<i32>> {
    if bytes.len() % 4 != 0 {
        return Err(ExecError::execution("byte length is not a multiple of 4"));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

fn i32_to_bytes(values: &[i32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Reads a buffer of f32 elements back to the host, for tests and debugging.
pub fn buffer_to_f32(buffer: &dyn DeviceBuffer) -> ExecResult<Vec<f32>> {
    bytes_to_f32(&read_all(buffer)?)
}

/// Reads a buffer of i32 elements back to the host, for tests and debugging.
pub fn buffer_to_i32(buffer: &dyn DeviceBuffer) -> ExecResult<Vec<i32>> {
    bytes_to_i32(&read_all(buffer)?)
}

fn unsupported(kind: &OpKind, dtype: DType) -> ExecError {
    ExecError::execution(format!(
        "dtype {dtype:?} is not supported by the reference cpu `{kind}` kernel"
    ))
}

fn attr_err(err: anyhow::Error) -> ExecError {
    ExecError::execution(err.to_string())
}

fn row_major_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; dims.len()];
    for axis in (0..dims.len().saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * dims[axis + 1];
    }
    strides
}

fn unravel(mut index: usize, strides: &[usize], coords: &mut [usize]) {
    for (axis, &stride) in strides.iter().enumerate() {
        coords[axis] = index / stride;
        index %= stride;
    }
}

fn op_elementwise_binary(
    node: &Operation,
    inputs: &[BufferRef],
    output: &dyn DeviceBuffer,
    float_op: fn(f32, f32) -> f32,
    int_op: Option<fn(i32, i32) -> i32>,
) -> ExecResult<()> {
    match node.output_type().dtype() {
        DType::F32 => {
            let lhs = bytes_to_f32(&read_all(inputs[0].as_ref())?)?;
            let rhs = bytes_to_f32(&read_all(inputs[1].as_ref())?)?;
            let result: Vec<f32> = lhs
                .iter()
                .zip(rhs.iter())
                .map(|(&a, &b)| float_op(a, b))
                .collect();
            output.write_bytes(&f32_to_bytes(&result))
        }
        DType::I32 => {
            let int_op =
                int_op.ok_or_else(|| unsupported(node.kind(), node.output_type().dtype()))?;
            let lhs = bytes_to_i32(&read_all(inputs[0].as_ref())?)?;
            let rhs = bytes_to_i32(&read_all(inputs[1].as_ref())?)?;
            let result: Vec<i32> = lhs
                .iter()
                .zip(rhs.iter())
                .map(|(&a, &b)| int_op(a, b))
                .collect();
            output.write_bytes(&i32_to_bytes(&result))
        }
        other => Err(unsupported(node.kind(), other)),
    }
}

fn op_elementwise_unary(
    node: &Operation,
    inputs: &[BufferRef],
    output: &dyn DeviceBuffer,
    float_op: fn(f32) -> f32,
    int_op: Option<fn(i32) -> i32>,
) -> ExecResult<()> {
    match node.output_type().dtype() {
        DType::F32 => {
            let operand = bytes_to_f32(&read_all(inputs[0].as_ref())?)?;
            let result: Vec<f32> = operand.iter().map(|&a| float_op(a)).collect();
            output.write_bytes(&f32_to_bytes(&result))
        }
        DType::I32 => {
            let int_op =
                int_op.ok_or_else(|| unsupported(node.kind(), node.output_type().dtype()))?;
            let operand = bytes_to_i32(&read_all(inputs[0].as_ref())?)?;
            let result: Vec<i32> = operand.iter().map(|&a| int_op(a)).collect();
            output.write_bytes(&i32_to_bytes(&result))
        }
        other => Err(unsupported(node.kind(), other)),
    }
}

fn op_matmul(node: &Operation, inputs: &[BufferRef], output: &dyn DeviceBuffer) -> ExecResult<()> {
    if node.output_type().dtype() != DType::F32 {
        return Err(unsupported(node.kind(), node.output_type().dtype()));
    }
    let lhs_dims = node.deps()[0].output_type().shape().dims().to_vec();
    let rhs_dims = node.deps()[1].output_type().shape().dims().to_vec();
    let (rows, inner, cols) = (lhs_dims[0], lhs_dims[1], rhs_dims[1]);

    let lhs = bytes_to_f32(&read_all(inputs[0].as_ref())?)?;
    let rhs = bytes_to_f32(&read_all(inputs[1].as_ref())?)?;
    let mut result = vec![0f32; rows * cols];
    for row in 0..rows {
        for k in 0..inner {
            let a = lhs[row * inner + k];
            for col in 0..cols {
                result[row * cols + col] += a * rhs[k * cols + col];
            }
        }
    }
    output.write_bytes(&f32_to_bytes(&result))
}

fn op_transpose(
    node: &Operation,
    inputs: &[BufferRef],
    output: &dyn DeviceBuffer,
) -> ExecResult<()> {
    let perm = node.attrs().axes("perm").map_err(attr_err)?.to_vec();
    let src_ty = node.deps()[0].output_type();
    let elem = src_ty.dtype().size_in_bytes();
    let src_dims = src_ty.shape().dims();
    let out_dims = node.output_type().shape().dims();
    let src_strides = row_major_strides(src_dims);
    let out_strides = row_major_strides(out_dims);

    let src = read_all(inputs[0].as_ref())?;
    let mut result = vec![0u8; output.num_bytes()];
    let mut coords = vec![0usize; out_dims.len()];
    for index in 0..node.output_type().volume() {
        unravel(index, &out_strides, &mut coords);
        let mut src_index = 0usize;
        for (axis, &coord) in coords.iter().enumerate() {
            src_index += coord * src_strides[perm[axis]];
        }
        result[index * elem..(index + 1) * elem]
            .copy_from_slice(&src[src_index * elem..(src_index + 1) * elem]);
    }
    output.write_bytes(&result)
}

fn op_broadcast(
    node: &Operation,
    inputs: &[BufferRef],
    output: &dyn DeviceBuffer,
) -> ExecResult<()> {
    let src_ty = node.deps()[0].output_type();
    let elem = src_ty.dtype().size_in_bytes();
    let src_dims = src_ty.shape().dims();
    let out_dims = node.output_type().shape().dims();
    let offset = out_dims.len() - src_dims.len();
    let src_strides = row_major_strides(src_dims);
    let out_strides = row_major_strides(out_dims);

    let src = read_all(inputs[0].as_ref())?;
    let mut result = vec![0u8; output.num_bytes()];
    let mut coords = vec![0usize; out_dims.len()];
    for index in 0..node.output_type().volume() {
        unravel(index, &out_strides, &mut coords);
        let mut src_index = 0usize;
        for (axis, &dim) in src_dims.iter().enumerate() {
            let coord = if dim == 1 { 0 } else { coords[offset + axis] };
            src_index += coord * src_strides[axis];
        }
        result[index * elem..(index + 1) * elem]
            .copy_from_slice(&src[src_index * elem..(src_index + 1) * elem]);
    }
    output.write_bytes(&result)
}

fn op_reduce_sum(
    node: &Operation,
    inputs: &[BufferRef],
    output: &dyn DeviceBuffer,
) -> ExecResult<()> {
    let axes = node.attrs().axes("axes").map_err(attr_err)?.to_vec();
    let src_ty = node.deps()[0].output_type();
    let src_dims = src_ty.shape().dims();
    let src_strides = row_major_strides(src_dims);
    let out_dims = node.output_type().shape().dims();
    let out_strides = row_major_strides(out_dims);

    let mut coords = vec![0usize; src_dims.len()];
    let out_index = |coords: &[usize]| -> usize {
        let mut index = 0usize;
        let mut out_axis = 0usize;
        for (axis, &coord) in coords.iter().enumerate() {
            if axes.contains(&axis) {
                continue;
            }
            index += coord * out_strides[out_axis];
            out_axis += 1;
        }
        index
    };

    match node.output_type().dtype() {
        DType::F32 => {
            let src = bytes_to_f32(&read_all(inputs[0].as_ref())?)?;
            let mut result = vec![0f32; node.output_type().volume()];
            for (index, &value) in src.iter().enumerate() {
                unravel(index, &src_strides, &mut coords);
                result[out_index(&coords)] += value;
            }
            output.write_bytes(&f32_to_bytes(&result))
        }
        DType::I32 => {
            let src = bytes_to_i32(&read_all(inputs[0].as_ref())?)?;
            let mut result = vec![0i32; node.output_type().volume()];
            for (index, &value) in src.iter().enumerate() {
                unravel(index, &src_strides, &mut coords);
                result[out_index(&coords)] += value;
            }
            output.write_bytes(&i32_to_bytes(&result))
        }
        other => Err(unsupported(node.kind(), other)),
    }
}

/// Builds the kernel table covering the built-in operation kinds.
///
/// `Reshape` deliberately registers nothing, so the scheduler's zero-copy
/// aliasing handles it; `Variable` and `Constant` likewise fall through to
/// the scheduler's source handling.
pub fn kernel_table() -> KernelTable {
    fn register(table: &mut KernelTable, kind: OpKind, kernel: KernelFn) {
        table
            .register(kind, kernel)
            .expect("fresh kernel table has no duplicates");
    }

    let mut table = KernelTable::new();

    macro_rules! binary {
        ($kind:expr, $float:expr, $int:expr) => {
            register(
                &mut table,
                $kind,
                std::sync::Arc::new(|node: &Operation, inputs: &[BufferRef], output: &dyn DeviceBuffer| {
                    op_elementwise_binary(node, inputs, output, $float, $int)
                }),
            )
        };
    }
    macro_rules! unary {
        ($kind:expr, $float:expr, $int:expr) => {
            register(
                &mut table,
                $kind,
                std::sync::Arc::new(|node: &Operation, inputs: &[BufferRef], output: &dyn DeviceBuffer| {
                    op_elementwise_unary(node, inputs, output, $float, $int)
                }),
            )
        };
    }

    binary!(OpKind::Add, |a, b| a + b, Some(|a, b| a + b));
    binary!(OpKind::Sub, |a, b| a - b, Some(|a, b| a - b));
    binary!(OpKind::Mul, |a, b| a * b, Some(|a, b| a * b));
    binary!(OpKind::Div, |a, b| a / b, Some(|a, b| a / b));
    unary!(OpKind::Neg, |a| -a, Some(|a: i32| -a));
    unary!(OpKind::Exp, f32::exp, None);
    unary!(OpKind::Log, f32::ln, None);
    unary!(OpKind::Tanh, f32::tanh, None);
    register(&mut table, OpKind::MatMul, std::sync::Arc::new(op_matmul));
    register(
        &mut table,
        OpKind::Transpose,
        std::sync::Arc::new(op_transpose),
    );
    register(
        &mut table,
        OpKind::Broadcast,
        std::sync::Arc::new(op_broadcast),
    );
    register(
        &mut table,
        OpKind::ReduceSum,
        std::sync::Arc::new(op_reduce_sum),
    );
    table
}

/// An [`Engine`] wired to host memory and the reference kernels.
pub fn engine() -> Engine<HostAllocator> {
    Engine::new(HostAllocator, kernel_table())
}

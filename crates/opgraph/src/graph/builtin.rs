//! Verifiers and judges for the built-in operation kinds.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{bail, ensure, Context, Result};

use crate::tensor::{Shape, TensorType};

use super::node::{NodeView, OpKind};
use super::registry::{OpDef, Registry};

fn def<V, J>(verify: V, judge: J) -> OpDef
where
    V: Fn(&NodeView<'_>) -> Result<()> + Send + Sync + 'static,
    J: Fn(&NodeView<'_>) -> Result<TensorType> + Send + Sync + 'static,
{
    OpDef::new(Arc::new(verify), Arc::new(judge))
}

fn expect_arity(view: &NodeView<'_>, arity: usize) -> Result<()> {
    ensure!(
        view.deps.len() == arity,
        "expected {arity} dependencies, got {}",
        view.deps.len()
    );
    Ok(())
}

fn verify_source(view: &NodeView<'_>) -> Result<()> {
    expect_arity(view, 0)?;
    let declared = match view.kind {
        // A constant's type can come from its literal instead.
        OpKind::Constant => view.attrs.tensor_type("type").ok().cloned(),
        _ => Some(view.attrs.tensor_type("type")?.clone()),
    };
    let declared = match (declared, view.attrs.literal("value")) {
        (Some(ty), Some(literal)) => {
            ensure!(
                literal.ty() == &ty,
                "default value has type {} but the node declares {}",
                literal.ty(),
                ty
            );
            ty
        }
        (Some(ty), None) => ty,
        (None, Some(literal)) => literal.ty().clone(),
        (None, None) => bail!("source nodes require a `type` attribute or a `value` literal"),
    };
    if let Some(literal) = view.attrs.literal("value") {
        ensure!(
            literal.byte_len() == declared.byte_len(),
            "default value holds {} bytes but type {} implies {}",
            literal.byte_len(),
            declared,
            declared.byte_len()
        );
    }
    if let Some(buffer) = view.attrs.buffer("value") {
        ensure!(
            buffer.num_bytes() == declared.byte_len(),
            "default buffer holds {} bytes but type {} implies {}",
            buffer.num_bytes(),
            declared,
            declared.byte_len()
        );
    }
    Ok(())
}

fn judge_source(view: &NodeView<'_>) -> Result<TensorType> {
    if let Ok(ty) = view.attrs.tensor_type("type") {
        return Ok(ty.clone());
    }
    if let Some(literal) = view.attrs.literal("value") {
        return Ok(literal.ty().clone());
    }
    bail!("source nodes require a `type` attribute or a `value` literal")
}

fn verify_elementwise_binary(view: &NodeView<'_>) -> Result<()> {
    expect_arity(view, 2)?;
    let lhs = view.deps[0].output_type();
    let rhs = view.deps[1].output_type();
    ensure!(
        lhs == rhs,
        "operands must share element type and shape, got {lhs} vs {rhs}"
    );
    Ok(())
}

fn judge_first_dep(view: &NodeView<'_>) -> Result<TensorType> {
    let first = view
        .deps
        .first()
        .context("operation requires at least one dependency")?;
    Ok(first.output_type().clone())
}

fn verify_unary(view: &NodeView<'_>) -> Result<()> {
    expect_arity(view, 1)
}

fn verify_float_unary(view: &NodeView<'_>) -> Result<()> {
    expect_arity(view, 1)?;
    let operand = view.deps[0].output_type();
    ensure!(
        operand.dtype().is_float(),
        "operand must be floating point, got {:?}",
        operand.dtype()
    );
    Ok(())
}

fn verify_matmul(view: &NodeView<'_>) -> Result<()> {
    expect_arity(view, 2)?;
    let lhs = view.deps[0].output_type();
    let rhs = view.deps[1].output_type();
    ensure!(
        lhs.dtype() == rhs.dtype(),
        "operands must share element type, got {:?} vs {:?}",
        lhs.dtype(),
        rhs.dtype()
    );
    ensure!(
        lhs.rank() == 2 && rhs.rank() == 2,
        "operands must be rank-2 matrices, got rank {} and rank {}",
        lhs.rank(),
        rhs.rank()
    );
    let inner_lhs = lhs.shape().dims()[1];
    let inner_rhs = rhs.shape().dims()[0];
    ensure!(
        inner_lhs == inner_rhs,
        "inner dimensions must agree, got {} vs {}",
        inner_lhs,
        inner_rhs
    );
    Ok(())
}

fn judge_matmul(view: &NodeView<'_>) -> Result<TensorType> {
    let lhs = view.deps[0].output_type();
    let rhs = view.deps[1].output_type();
    let dims = vec![lhs.shape().dims()[0], rhs.shape().dims()[1]];
    Ok(TensorType::new(lhs.dtype(), Shape::new(dims)))
}

fn verify_transpose(view: &NodeView<'_>) -> Result<()> {
    expect_arity(view, 1)?;
    let rank = view.deps[0].output_type().rank();
    let perm = view.attrs.axes("perm")?;
    ensure!(
        perm.len() == rank,
        "permutation length {} must equal operand rank {}",
        perm.len(),
        rank
    );
    let mut seen = HashSet::new();
    for &axis in perm {
        ensure!(axis < rank, "permutation axis {axis} out of range for rank {rank}");
        ensure!(seen.insert(axis), "permutation repeats axis {axis}");
    }
    Ok(())
}

fn judge_transpose(view: &NodeView<'_>) -> Result<TensorType> {
    let operand = view.deps[0].output_type();
    let perm = view.attrs.axes("perm")?;
    let dims: Vec<usize> = perm
        .iter()
        .map(|&axis| operand.shape().dims()[axis])
        .collect();
    Ok(TensorType::new(operand.dtype(), Shape::new(dims)))
}

fn verify_reshape(view: &NodeView<'_>) -> Result<()> {
    expect_arity(view, 1)?;
    let operand = view.deps[0].output_type();
    let target = Shape::new(view.attrs.shape("shape")?);
    ensure!(
        operand.volume() == target.volume(),
        "element counts must agree, got {} for {} vs {} for {}",
        operand.volume(),
        operand.shape(),
        target.volume(),
        target
    );
    Ok(())
}

fn judge_reshape(view: &NodeView<'_>) -> Result<TensorType> {
    let operand = view.deps[0].output_type();
    Ok(TensorType::new(
        operand.dtype(),
        Shape::new(view.attrs.shape("shape")?),
    ))
}

fn verify_broadcast(view: &NodeView<'_>) -> Result<()> {
    expect_arity(view, 1)?;
    let operand = view.deps[0].output_type();
    let target = view.attrs.shape("shape")?;
    ensure!(
        operand.rank() <= target.len(),
        "target rank {} must be >= operand rank {}",
        target.len(),
        operand.rank()
    );
    // Operand axes align to the trailing target axes.
    let offset = target.len() - operand.rank();
    for (axis, &dim) in operand.shape().dims().iter().enumerate() {
        let out = target[offset + axis];
        ensure!(
            dim == 1 || dim == out,
            "dimension mismatch at axis {axis}: {dim} cannot repeat to {out}"
        );
    }
    Ok(())
}

fn judge_broadcast(view: &NodeView<'_>) -> Result<TensorType> {
    let operand = view.deps[0].output_type();
    Ok(TensorType::new(
        operand.dtype(),
        Shape::new(view.attrs.shape("shape")?),
    ))
}

fn verify_reduce(view: &NodeView<'_>) -> Result<()> {
    expect_arity(view, 1)?;
    let rank = view.deps[0].output_type().rank();
    let axes = view.attrs.axes("axes")?;
    let mut seen = HashSet::new();
    for &axis in axes {
        ensure!(axis < rank, "reduction axis {axis} out of range for rank {rank}");
        ensure!(seen.insert(axis), "reduction axes repeat axis {axis}");
    }
    Ok(())
}

fn judge_reduce(view: &NodeView<'_>) -> Result<TensorType> {
    let operand = view.deps[0].output_type();
    let axes = view.attrs.axes("axes")?;
    let dims: Vec<usize> = operand
        .shape()
        .dims()
        .iter()
        .enumerate()
        .filter(|(axis, _)| !axes.contains(axis))
        .map(|(_, &dim)| dim)
        .collect();
    Ok(TensorType::new(operand.dtype(), Shape::new(dims)))
}

/// Populates `registry` with the built-in operation kinds.
pub(super) fn install_ops(registry: &mut Registry) -> crate::error::GraphResult<()> {
    registry.register_op(OpKind::Variable, def(verify_source, judge_source))?;
    registry.register_op(OpKind::Constant, def(verify_source, judge_source))?;
    for kind in [OpKind::Add, OpKind::Sub, OpKind::Mul, OpKind::Div] {
        registry.register_op(kind, def(verify_elementwise_binary, judge_first_dep))?;
    }
    registry.register_op(OpKind::Neg, def(verify_unary, judge_first_dep))?;
    for kind in [OpKind::Exp, OpKind::Log, OpKind::Tanh] {
        registry.register_op(kind, def(verify_float_unary, judge_first_dep))?;
    }
    registry.register_op(OpKind::MatMul, def(verify_matmul, judge_matmul))?;
    registry.register_op(OpKind::Transpose, def(verify_transpose, judge_transpose))?;
    registry.register_op(OpKind::Reshape, def(verify_reshape, judge_reshape))?;
    registry.register_op(OpKind::Broadcast, def(verify_broadcast, judge_broadcast))?;
    registry.register_op(OpKind::ReduceSum, def(verify_reduce, judge_reduce))?;
    Ok(())
}

//! Local-gradient rules for the built-in operation kinds.
//!
//! Each rule receives the node and its upstream gradient and emits the
//! downstream gradient expression per dependency, as new graph nodes.
//! `Variable` and `Constant` are leaves and register no rule.

use std::sync::Arc;

use anyhow::Result;

use crate::error::GraphResult;
use crate::graph::{GradFn, OpKind, OpRef, Registry};
use crate::ops;

fn rule<F>(f: F) -> GradFn
where
    F: Fn(&Registry, &OpRef, &OpRef) -> Result<Vec<Option<OpRef>>> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn grad_add(_: &Registry, _: &OpRef, g: &OpRef) -> Result<Vec<Option<OpRef>>> {
    Ok(vec![Some(OpRef::clone(g)), Some(OpRef::clone(g))])
}

fn grad_sub(registry: &Registry, _: &OpRef, g: &OpRef) -> Result<Vec<Option<OpRef>>> {
    Ok(vec![
        Some(OpRef::clone(g)),
        Some(ops::neg(registry, g)?),
    ])
}

fn grad_mul(registry: &Registry, node: &OpRef, g: &OpRef) -> Result<Vec<Option<OpRef>>> {
    let lhs = &node.deps()[0];
    let rhs = &node.deps()[1];
    Ok(vec![
        Some(ops::mul(registry, g, rhs)?),
        Some(ops::mul(registry, g, lhs)?),
    ])
}

fn grad_div(registry: &Registry, node: &OpRef, g: &OpRef) -> Result<Vec<Option<OpRef>>> {
    let lhs = &node.deps()[0];
    let rhs = &node.deps()[1];
    // d/dl (l/r) = g/r, d/dr (l/r) = -g*l/r².
    let wrt_lhs = ops::div(registry, g, rhs)?;
    let numerator = ops::mul(registry, g, lhs)?;
    let denominator = ops::mul(registry, rhs, rhs)?;
    let wrt_rhs = ops::neg(registry, &ops::div(registry, &numerator, &denominator)?)?;
    Ok(vec![Some(wrt_lhs), Some(wrt_rhs)])
}

fn grad_neg(registry: &Registry, _: &OpRef, g: &OpRef) -> Result<Vec<Option<OpRef>>> {
    Ok(vec![Some(ops::neg(registry, g)?)])
}

fn grad_exp(registry: &Registry, node: &OpRef, g: &OpRef) -> Result<Vec<Option<OpRef>>> {
    // The node itself is exp(x); reuse it rather than rebuilding.
    Ok(vec![Some(ops::mul(registry, g, node)?)])
}

fn grad_log(registry: &Registry, node: &OpRef, g: &OpRef) -> Result<Vec<Option<OpRef>>> {
    Ok(vec![Some(ops::div(registry, g, &node.deps()[0])?)])
}

fn grad_tanh(registry: &Registry, node: &OpRef, g: &OpRef) -> Result<Vec<Option<OpRef>>> {
    let ty = node.output_type();
    let one = ops::scalar(registry, ty.dtype(), 1.0)?;
    let ones = ops::broadcast(registry, &one, ty.shape().dims().to_vec())?;
    let squared = ops::mul(registry, node, node)?;
    let derivative = ops::sub(registry, &ones, &squared)?;
    Ok(vec![Some(ops::mul(registry, g, &derivative)?)])
}

fn grad_matmul(registry: &Registry, node: &OpRef, g: &OpRef) -> Result<Vec<Option<OpRef>>> {
    let lhs = &node.deps()[0];
    let rhs = &node.deps()[1];
    let wrt_lhs = ops::matmul(registry, g, &ops::transpose(registry, rhs, vec![1, 0])?)?;
    let wrt_rhs = ops::matmul(registry, &ops::transpose(registry, lhs, vec![1, 0])?, g)?;
    Ok(vec![Some(wrt_lhs), Some(wrt_rhs)])
}

fn grad_transpose(registry: &Registry, node: &OpRef, g: &OpRef) -> Result<Vec<Option<OpRef>>> {
    let perm = node.attrs().axes("perm")?;
    let mut inverse = vec![0usize; perm.len()];
    for (index, &axis) in perm.iter().enumerate() {
        inverse[axis] = index;
    }
    Ok(vec![Some(ops::transpose(registry, g, inverse)?)])
}

fn grad_reshape(registry: &Registry, node: &OpRef, g: &OpRef) -> Result<Vec<Option<OpRef>>> {
    let source = node.deps()[0].output_type().shape().dims().to_vec();
    Ok(vec![Some(ops::reshape(registry, g, source)?)])
}

fn grad_broadcast(registry: &Registry, node: &OpRef, g: &OpRef) -> Result<Vec<Option<OpRef>>> {
    let source = node.deps()[0].output_type().shape().dims().to_vec();
    let target_rank = node.output_type().rank();
    let offset = target_rank - source.len();

    // Sum over every axis the broadcast introduced or repeated.
    let mut axes: Vec<usize> = (0..offset).collect();
    for (axis, &dim) in source.iter().enumerate() {
        if dim == 1 {
            axes.push(offset + axis);
        }
    }
    if axes.is_empty() {
        return Ok(vec![Some(OpRef::clone(g))]);
    }
    let summed = ops::reduce_sum(registry, g, axes)?;
    // Restore any size-1 axes the reduction dropped.
    Ok(vec![Some(ops::reshape(registry, &summed, source)?)])
}

fn grad_reduce_sum(registry: &Registry, node: &OpRef, g: &OpRef) -> Result<Vec<Option<OpRef>>> {
    let source = node.deps()[0].output_type().shape().dims().to_vec();
    let axes = node.attrs().axes("axes")?;
    let kept: Vec<usize> = source
        .iter()
        .enumerate()
        .map(|(axis, &dim)| if axes.contains(&axis) { 1 } else { dim })
        .collect();
    let reshaped = ops::reshape(registry, g, kept)?;
    Ok(vec![Some(ops::broadcast(registry, &reshaped, source)?)])
}

/// Populates `registry` with gradients for every differentiable built-in.
pub(crate) fn install_gradients(registry: &mut Registry) -> GraphResult<()> {
    registry.register_gradient(OpKind::Add, rule(grad_add))?;
    registry.register_gradient(OpKind::Sub, rule(grad_sub))?;
    registry.register_gradient(OpKind::Mul, rule(grad_mul))?;
    registry.register_gradient(OpKind::Div, rule(grad_div))?;
    registry.register_gradient(OpKind::Neg, rule(grad_neg))?;
    registry.register_gradient(OpKind::Exp, rule(grad_exp))?;
    registry.register_gradient(OpKind::Log, rule(grad_log))?;
    registry.register_gradient(OpKind::Tanh, rule(grad_tanh))?;
    registry.register_gradient(OpKind::MatMul, rule(grad_matmul))?;
    registry.register_gradient(OpKind::Transpose, rule(grad_transpose))?;
    registry.register_gradient(OpKind::Reshape, rule(grad_reshape))?;
    registry.register_gradient(OpKind::Broadcast, rule(grad_broadcast))?;
    registry.register_gradient(OpKind::ReduceSum, rule(grad_reduce_sum))?;
    Ok(())
}

//! Convenience constructors for the built-in operation kinds.
//!
//! These assemble attribute bags and go through [`Registry::build`], so they
//! add nothing a collaborator could not do directly; they exist to keep
//! call sites readable and to host the one implicit-broadcast rule.

use crate::error::GraphResult;
use crate::graph::{AttrValue, Attrs, OpKind, OpRef, Registry};
use crate::tensor::{DType, TensorLiteral, TensorType};

/// Declares a named leaf whose value is bound at execution time.
pub fn variable(registry: &Registry, name: &str, ty: TensorType) -> GraphResult<OpRef> {
    registry.build_labeled(
        OpKind::Variable,
        Vec::new(),
        Attrs::new().with("type", AttrValue::Type(ty)),
        Some(name),
    )
}

/// Declares a named leaf with a default value used when no binding is given.
pub fn variable_with(registry: &Registry, name: &str, value: TensorLiteral) -> GraphResult<OpRef> {
    registry.build_labeled(
        OpKind::Variable,
        Vec::new(),
        Attrs::new()
            .with("type", AttrValue::Type(value.ty().clone()))
            .with("value", AttrValue::Literal(value)),
        Some(name),
    )
}

/// Embeds a fixed host payload in the graph.
pub fn constant(registry: &Registry, value: TensorLiteral) -> GraphResult<OpRef> {
    registry.build(
        OpKind::Constant,
        Vec::new(),
        Attrs::new().with("value", AttrValue::Literal(value)),
    )
}

/// Embeds a rank-0 constant of the given dtype.
pub fn scalar(registry: &Registry, dtype: DType, value: f64) -> GraphResult<OpRef> {
    constant(
        registry,
        TensorLiteral::splat(TensorType::scalar(dtype), value),
    )
}

/// Repeats `operand` up to `dims`, aligning its axes to the trailing target
/// axes; size-1 and missing axes repeat.
pub fn broadcast(registry: &Registry, operand: &OpRef, dims: Vec<usize>) -> GraphResult<OpRef> {
    registry.build(
        OpKind::Broadcast,
        vec![OpRef::clone(operand)],
        Attrs::new().with("shape", AttrValue::Shape(dims)),
    )
}

fn elementwise_binary(
    registry: &Registry,
    kind: OpKind,
    lhs: &OpRef,
    rhs: &OpRef,
) -> GraphResult<OpRef> {
    // The single implicit-broadcast rule: a rank-0 right-hand operand is
    // repeated up to the left-hand shape before the binary node is created.
    let rhs = if rhs.output_type().rank() == 0 && lhs.output_type().rank() > 0 {
        broadcast(registry, rhs, lhs.output_type().shape().dims().to_vec())?
    } else {
        OpRef::clone(rhs)
    };
    registry.build(kind, vec![OpRef::clone(lhs), rhs], Attrs::new())
}

pub fn add(registry: &Registry, lhs: &OpRef, rhs: &OpRef) -> GraphResult<OpRef> {
    elementwise_binary(registry, OpKind::Add, lhs, rhs)
}

pub fn sub(registry: &Registry, lhs: &OpRef, rhs: &OpRef) -> GraphResult<OpRef> {
    elementwise_binary(registry, OpKind::Sub, lhs, rhs)
}

pub fn mul(registry: &Registry, lhs: &OpRef, rhs: &OpRef) -> GraphResult<OpRef> {
    elementwise_binary(registry, OpKind::Mul, lhs, rhs)
}

pub fn div(registry: &Registry, lhs: &OpRef, rhs: &OpRef) -> GraphResult<OpRef> {
    elementwise_binary(registry, OpKind::Div, lhs, rhs)
}

fn unary(registry: &Registry, kind: OpKind, operand: &OpRef) -> GraphResult<OpRef> {
    registry.build(kind, vec![OpRef::clone(operand)], Attrs::new())
}

pub fn neg(registry: &Registry, operand: &OpRef) -> GraphResult<OpRef> {
    unary(registry, OpKind::Neg, operand)
}

pub fn exp(registry: &Registry, operand: &OpRef) -> GraphResult<OpRef> {
    unary(registry, OpKind::Exp, operand)
}

pub fn log(registry: &Registry, operand: &OpRef) -> GraphResult<OpRef> {
    unary(registry, OpKind::Log, operand)
}

pub fn tanh(registry: &Registry, operand: &OpRef) -> GraphResult<OpRef> {
    unary(registry, OpKind::Tanh, operand)
}

/// Rank-2 matrix product.
pub fn matmul(registry: &Registry, lhs: &OpRef, rhs: &OpRef) -> GraphResult<OpRef> {
    registry.build(
        OpKind::MatMul,
        vec![OpRef::clone(lhs), OpRef::clone(rhs)],
        Attrs::new(),
    )
}

/// Reorders axes according to `perm`, which must be a bijection on the
/// operand's axes.
pub fn transpose(registry: &Registry, operand: &OpRef, perm: Vec<usize>) -> GraphResult<OpRef> {
    registry.build(
        OpKind::Transpose,
        vec![OpRef::clone(operand)],
        Attrs::new().with("perm", AttrValue::Axes(perm)),
    )
}

/// Relabels the operand's shape; element count must be preserved.
pub fn reshape(registry: &Registry, operand: &OpRef, dims: Vec<usize>) -> GraphResult<OpRef> {
    registry.build(
        OpKind::Reshape,
        vec![OpRef::clone(operand)],
        Attrs::new().with("shape", AttrValue::Shape(dims)),
    )
}

/// Sums over `axes`, dropping them from the output shape; reducing every
/// axis yields a scalar.
pub fn reduce_sum(registry: &Registry, operand: &OpRef, axes: Vec<usize>) -> GraphResult<OpRef> {
    registry.build(
        OpKind::ReduceSum,
        vec![OpRef::clone(operand)],
        Attrs::new().with("axes", AttrValue::Axes(axes)),
    )
}

/// Sums every axis, producing a rank-0 result.
pub fn reduce_all(registry: &Registry, operand: &OpRef) -> GraphResult<OpRef> {
    let axes = (0..operand.output_type().rank()).collect();
    reduce_sum(registry, operand, axes)
}

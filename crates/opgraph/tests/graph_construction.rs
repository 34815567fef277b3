use std::sync::Arc;

use anyhow::{ensure, Result};
use opgraph::graph::{default_registry, NodeView, OpDef};
use opgraph::{ops, AttrValue, Attrs, DType, GraphError, OpKind, Registry, Shape, TensorLiteral, TensorType};

fn f32_ty<D: Into<Vec<usize>>>(dims: D) -> TensorType {
    TensorType::new(DType::F32, Shape::new(dims))
}

fn passthrough_def() -> OpDef {
    OpDef::new(
        Arc::new(|view: &NodeView<'_>| {
            ensure!(view.deps.len() == 1, "expected one dependency");
            Ok(())
        }),
        Arc::new(|view: &NodeView<'_>| Ok(view.deps[0].output_type().clone())),
    )
}

#[test]
fn duplicate_op_registration_fails() {
    let mut registry = Registry::with_builtins();
    let err = registry
        .register_op(OpKind::Add, passthrough_def())
        .unwrap_err();
    assert!(matches!(err, GraphError::DuplicateOp(OpKind::Add)));
}

#[test]
fn unknown_kind_is_rejected_by_name() {
    let registry = default_registry();
    let err = registry
        .build(OpKind::custom("missing_op"), Vec::new(), Attrs::new())
        .unwrap_err();
    assert!(matches!(err, GraphError::UnknownOp(_)));
    assert!(err.to_string().contains("missing_op"));
}

#[test]
fn custom_kinds_extend_the_registry() -> Result<()> {
    let mut registry = Registry::with_builtins();
    let scale = OpKind::custom("scale");
    registry.register_op(
        scale.clone(),
        OpDef::new(
            Arc::new(|view: &NodeView<'_>| {
                ensure!(view.deps.len() == 1, "expected one dependency");
                view.attrs.scalar("factor")?;
                Ok(())
            }),
            Arc::new(|view: &NodeView<'_>| Ok(view.deps[0].output_type().clone())),
        ),
    )?;

    let x = ops::variable(&registry, "x", f32_ty([4]))?;
    let scaled = registry.build(
        scale.clone(),
        vec![x],
        Attrs::new().with("factor", AttrValue::Scalar(2.5)),
    )?;
    assert_eq!(scaled.output_type(), &f32_ty([4]));
    assert!(registry.list_ops().contains(&scale));
    Ok(())
}

#[test]
fn matmul_rejects_non_matrix_operands() -> Result<()> {
    let registry = default_registry();
    let rank3 = ops::variable(registry, "a", f32_ty([2, 3, 4]))?;
    let rank2 = ops::variable(registry, "b", f32_ty([3, 4]))?;
    let err = ops::matmul(registry, &rank3, &rank2).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("matmul"), "got: {message}");
    assert!(message.contains("rank"), "got: {message}");
    Ok(())
}

#[test]
fn matmul_rejects_inner_dimension_mismatch() -> Result<()> {
    let registry = default_registry();
    let lhs = ops::variable(registry, "lhs", f32_ty([2, 3]))?;
    let rhs = ops::variable(registry, "rhs", f32_ty([4, 5]))?;
    let err = ops::matmul(registry, &lhs, &rhs).unwrap_err();
    assert!(err.to_string().contains("inner dimensions"));
    Ok(())
}

#[test]
fn elementwise_ops_require_identical_types() -> Result<()> {
    let registry = default_registry();
    let lhs = ops::variable(registry, "lhs", f32_ty([2, 2]))?;
    let rhs = ops::variable(registry, "rhs", f32_ty([4]))?;
    let err = ops::add(registry, &lhs, &rhs).unwrap_err();
    assert!(matches!(err, GraphError::Verification { .. }));
    assert!(err.to_string().contains("add"));
    Ok(())
}

#[test]
fn transpose_permutation_must_be_a_bijection() -> Result<()> {
    let registry = default_registry();
    let x = ops::variable(registry, "x", f32_ty([2, 3]))?;
    let err = ops::transpose(registry, &x, vec![0, 0]).unwrap_err();
    assert!(err.to_string().contains("repeats axis"));

    let err = ops::transpose(registry, &x, vec![0, 2]).unwrap_err();
    assert!(err.to_string().contains("out of range"));
    Ok(())
}

#[test]
fn reshape_preserves_element_count() -> Result<()> {
    let registry = default_registry();
    let x = ops::variable(registry, "x", f32_ty([2, 3]))?;
    let ok = ops::reshape(registry, &x, vec![3, 2])?;
    assert_eq!(ok.output_type(), &f32_ty([3, 2]));

    let err = ops::reshape(registry, &x, vec![4, 2]).unwrap_err();
    assert!(err.to_string().contains("element counts"));
    Ok(())
}

#[test]
fn reduction_axes_must_be_distinct_and_in_range() -> Result<()> {
    let registry = default_registry();
    let x = ops::variable(registry, "x", f32_ty([2, 3]))?;
    let err = ops::reduce_sum(registry, &x, vec![2]).unwrap_err();
    assert!(err.to_string().contains("out of range"));

    let err = ops::reduce_sum(registry, &x, vec![0, 0]).unwrap_err();
    assert!(err.to_string().contains("repeat"));

    let scalar = ops::reduce_sum(registry, &x, vec![0, 1])?;
    assert_eq!(scalar.output_type().rank(), 0);
    assert_eq!(scalar.output_type().volume(), 1);
    Ok(())
}

#[test]
fn scalar_rhs_is_implicitly_broadcast() -> Result<()> {
    let registry = default_registry();
    let x = ops::variable(registry, "x", f32_ty([2, 2]))?;
    let one = ops::scalar(registry, DType::F32, 1.0)?;
    let sum = ops::add(registry, &x, &one)?;

    assert_eq!(sum.output_type(), &f32_ty([2, 2]));
    let rhs = &sum.deps()[1];
    assert_eq!(rhs.kind(), &OpKind::Broadcast);
    assert_eq!(rhs.output_type(), &f32_ty([2, 2]));
    Ok(())
}

#[test]
fn scalar_lhs_is_not_broadcast() -> Result<()> {
    let registry = default_registry();
    let x = ops::variable(registry, "x", f32_ty([2, 2]))?;
    let one = ops::scalar(registry, DType::F32, 1.0)?;
    // Only the right-hand operand participates in the implicit rule.
    let err = ops::add(registry, &one, &x).unwrap_err();
    assert!(matches!(err, GraphError::Verification { .. }));
    Ok(())
}

#[test]
fn judges_are_pure_over_constructed_nodes() -> Result<()> {
    let registry = default_registry();
    let a = ops::variable(registry, "a", f32_ty([2, 3]))?;
    let b = ops::variable(registry, "b", f32_ty([3, 4]))?;
    let nodes = vec![
        ops::matmul(registry, &a, &b)?,
        ops::transpose(registry, &a, vec![1, 0])?,
        ops::reshape(registry, &a, vec![6])?,
        ops::reduce_sum(registry, &a, vec![0])?,
        ops::neg(registry, &a)?,
    ];
    for node in nodes {
        let def = registry.op_def(node.kind()).expect("kind is registered");
        let rejudged = (def.judge)(&node.view()).expect("judge accepts constructed nodes");
        assert_eq!(&rejudged, node.output_type());
    }
    Ok(())
}

#[test]
fn verifier_errors_carry_the_label() -> Result<()> {
    let registry = default_registry();
    let lhs = ops::variable(registry, "lhs", f32_ty([2, 3]))?;
    let rhs = ops::variable(registry, "rhs", f32_ty([4, 5]))?;
    let err = registry
        .build_labeled(OpKind::MatMul, vec![lhs, rhs], Attrs::new(), Some("proj"))
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("proj"), "got: {message}");
    assert!(message.contains("matmul"), "got: {message}");
    Ok(())
}

#[test]
fn source_default_values_must_match_the_declared_type() -> Result<()> {
    let registry = default_registry();
    let literal = TensorLiteral::from_f32([2], &[1.0, 2.0])?;
    let err = registry
        .build_labeled(
            OpKind::Variable,
            Vec::new(),
            Attrs::new()
                .with("type", AttrValue::Type(f32_ty([3])))
                .with("value", AttrValue::Literal(literal)),
            Some("w"),
        )
        .unwrap_err();
    assert!(err.to_string().contains("default value"));
    Ok(())
}

#[test]
fn listing_is_sorted_and_complete() {
    let registry = default_registry();
    let ops = registry.list_ops();
    let names: Vec<&str> = ops.iter().map(|kind| kind.as_str()).collect();
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);
    assert!(names.contains(&"matmul"));
    assert!(names.contains(&"variable"));
    assert_eq!(registry.list_gradients().len(), 13);
}

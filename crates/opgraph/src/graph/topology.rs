//! Deterministic dependency ordering over operation graphs.

use std::collections::HashSet;

use super::node::{NodeId, OpRef};

/// Returns every node reachable from `roots` exactly once, dependencies
/// before dependents.
///
/// The traversal is iterative depth-first postorder with dependencies visited
/// left-to-right, so the order is deterministic for a given root list and
/// does not recurse (arbitrarily long chains are fine). Nodes shared between
/// several roots appear once.
pub fn reachable_in_order(roots: &[OpRef]) -> Vec<OpRef> {
    reachable_excluding(roots, &HashSet::new())
}

/// Like [`reachable_in_order`], but nodes in `stop` are treated as absent:
/// they are neither visited nor traversed through. Used by the execution
/// layer to cut the schedule at caller-bound nodes.
pub fn reachable_excluding(roots: &[OpRef], stop: &HashSet<NodeId>) -> Vec<OpRef> {
    let mut order = Vec::new();
    let mut visited: HashSet<NodeId> = HashSet::new();

    for root in roots {
        if stop.contains(&root.id()) {
            continue;
        }
        // Each stack frame tracks how many dependencies have been descended
        // into; a node is appended once all of them have been emitted.
        let mut stack: Vec<(OpRef, usize)> = vec![(OpRef::clone(root), 0)];
        while let Some((node, next_dep)) = stack.pop() {
            if next_dep == 0 {
                if visited.contains(&node.id()) {
                    continue;
                }
                visited.insert(node.id());
            }
            match node.deps().get(next_dep) {
                Some(dep) => {
                    let dep = OpRef::clone(dep);
                    stack.push((node, next_dep + 1));
                    if !visited.contains(&dep.id()) && !stop.contains(&dep.id()) {
                        stack.push((dep, 0));
                    }
                }
                None => order.push(node),
            }
        }
    }

    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::default_registry;
    use crate::ops;
    use crate::tensor::{DType, Shape, TensorType};

    #[test]
    fn shared_subgraphs_appear_once() {
        let registry = default_registry();
        let ty = TensorType::new(DType::F32, Shape::new([2]));
        let x = ops::variable(registry, "x", ty).unwrap();
        let doubled = ops::add(registry, &x, &x).unwrap();
        let y = ops::mul(registry, &doubled, &x).unwrap();

        let order = reachable_in_order(&[y.clone()]);
        assert_eq!(order.len(), 3);
        assert_eq!(order[0].id(), x.id());
        assert_eq!(order[1].id(), doubled.id());
        assert_eq!(order[2].id(), y.id());
    }

    #[test]
    fn every_node_follows_its_dependencies() {
        let registry = default_registry();
        let ty = TensorType::new(DType::F32, Shape::new([2, 2]));
        let a = ops::variable(registry, "a", ty.clone()).unwrap();
        let b = ops::variable(registry, "b", ty).unwrap();
        let left = ops::mul(registry, &a, &b).unwrap();
        let right = ops::sub(registry, &a, &b).unwrap();
        let out = ops::add(registry, &left, &right).unwrap();

        let order = reachable_in_order(&[out]);
        assert_eq!(order.len(), 5);
        let position = |id| order.iter().position(|node| node.id() == id).unwrap();
        for node in &order {
            for dep in node.deps() {
                assert!(position(dep.id()) < position(node.id()));
            }
        }
    }

    #[test]
    fn excluded_nodes_cut_the_traversal() {
        let registry = default_registry();
        let ty = TensorType::new(DType::F32, Shape::new([2]));
        let x = ops::variable(registry, "x", ty).unwrap();
        let inner = ops::neg(registry, &x).unwrap();
        let out = ops::exp(registry, &inner).unwrap();

        let stop: HashSet<NodeId> = [inner.id()].into_iter().collect();
        let order = reachable_excluding(&[out.clone()], &stop);
        assert_eq!(order.len(), 1);
        assert_eq!(order[0].id(), out.id());
    }
}

//! Reverse-mode differentiation over operation graphs.

use std::collections::HashMap;

use anyhow::anyhow;

use crate::error::{GraphError, GraphResult};
use crate::graph::{topology, NodeId, OpRef, Registry};
use crate::ops;
use crate::tensor::TensorLiteral;

/// Returns, for each entry of `wrt`, a node computing `∂objective/∂entry`.
///
/// The objective must be a floating-point scalar (volume 1). The returned
/// nodes are ordinary graph nodes built from existing operators, so they can
/// be evaluated, compiled, or differentiated again for higher-order
/// derivatives.
///
/// Kinds without a registered gradient, and nodes that receive no gradient
/// from above, contribute zero everywhere below them; that is the supported
/// way to express stop-gradient subgraphs and is deliberately not an error.
/// Only a `wrt` entry that ends up with no gradient at all is rejected, with
/// its index named.
pub fn grad(registry: &Registry, objective: &OpRef, wrt: &[OpRef]) -> GraphResult<Vec<OpRef>> {
    let objective_ty = objective.output_type();
    if objective_ty.volume() != 1 || !objective_ty.dtype().is_float() {
        return Err(GraphError::ObjectiveNotScalar {
            dtype: objective_ty.dtype(),
            volume: objective_ty.volume(),
        });
    }

    let order = topology::reachable_in_order(std::slice::from_ref(objective));

    // ∂objective/∂objective = 1, in the objective's own type.
    let seed = ops::constant(registry, TensorLiteral::splat(objective_ty.clone(), 1.0))?;
    let mut grads: HashMap<NodeId, OpRef> = HashMap::new();
    grads.insert(objective.id(), seed);

    for node in order.iter().rev() {
        let Some(upstream) = grads.get(&node.id()).cloned() else {
            continue;
        };
        let Some(rule) = registry.gradient_for(node.kind()) else {
            continue;
        };

        let contributions =
            rule(registry, node, &upstream).map_err(|source| GraphError::LocalGradient {
                site: node.site(),
                source,
            })?;
        if contributions.len() != node.deps().len() {
            return Err(GraphError::LocalGradient {
                site: node.site(),
                source: anyhow!(
                    "rule returned {} contributions for {} dependencies",
                    contributions.len(),
                    node.deps().len()
                ),
            });
        }

        for (dep, contribution) in node.deps().iter().zip(contributions) {
            let Some(contribution) = contribution else {
                continue;
            };
            let accumulated = match grads.get(&dep.id()) {
                Some(existing) => ops::add(registry, existing, &contribution)?,
                None => contribution,
            };
            grads.insert(dep.id(), accumulated);
        }
    }

    wrt.iter()
        .enumerate()
        .map(|(index, node)| {
            grads
                .get(&node.id())
                .cloned()
                .ok_or_else(|| GraphError::UnreachableWrt {
                    index,
                    site: node.site(),
                })
        })
        .collect()
}

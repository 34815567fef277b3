//! Operation and gradient registries, and the single node-construction path.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::Lazy;

use crate::error::{GraphError, GraphResult};
use crate::tensor::TensorType;

use super::attr::Attrs;
use super::node::{NodeSite, NodeView, OpKind, OpRef, Operation};

/// Structural validity predicate run against a candidate node.
///
/// Verifiers must check every shape/type precondition specific to their kind
/// and report the violated one; the registry wraps the failure with the kind
/// and label.
pub type VerifyFn = Arc<dyn Fn(&NodeView<'_>) -> Result<()> + Send + Sync>;

/// Output-type inference run after verification succeeds.
///
/// Judges must be pure functions of the candidate view: re-judging a
/// constructed node reproduces its cached output type exactly.
pub type JudgeFn = Arc<dyn Fn(&NodeView<'_>) -> Result<TensorType> + Send + Sync>;

/// Local-gradient function for one operation kind.
///
/// Given the node and the gradient flowing into it, returns one gradient
/// expression per dependency (`None` for a dependency receiving no
/// contribution). The expressions are ordinary graph nodes built through the
/// same registry, so gradients are themselves differentiable.
pub type GradFn =
    Arc<dyn Fn(&Registry, &OpRef, &OpRef) -> Result<Vec<Option<OpRef>>> + Send + Sync>;

/// Verifier/judge pair registered once per operation kind.
#[derive(Clone)]
pub struct OpDef {
    pub verify: VerifyFn,
    pub judge: JudgeFn,
}

impl OpDef {
    pub fn new(verify: VerifyFn, judge: JudgeFn) -> Self {
        Self { verify, judge }
    }
}

/// Holds every registered operation kind and gradient function.
///
/// Registries are populated at startup and read-only afterwards; graph
/// construction and differentiation borrow the registry instead of reaching
/// for hidden global state. [`default_registry`] provides the common
/// process-wide instance preloaded with the built-ins.
#[derive(Default)]
pub struct Registry {
    ops: HashMap<OpKind, OpDef>,
    grads: HashMap<OpKind, GradFn>,
}

impl Registry {
    /// An empty registry with no operation kinds at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry preloaded with the built-in kinds and their gradients.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        super::builtin::install_ops(&mut registry).expect("built-in op registration");
        crate::grad::install_gradients(&mut registry).expect("built-in gradient registration");
        registry
    }

    /// Registers a verifier/judge pair under `kind`.
    ///
    /// Registering the same kind twice is a programming error and fails.
    pub fn register_op(&mut self, kind: OpKind, def: OpDef) -> GraphResult<()> {
        if self.ops.contains_key(&kind) {
            return Err(GraphError::DuplicateOp(kind));
        }
        self.ops.insert(kind, def);
        Ok(())
    }

    /// Registers a local-gradient function under `kind`.
    pub fn register_gradient(&mut self, kind: OpKind, grad: GradFn) -> GraphResult<()> {
        if self.grads.contains_key(&kind) {
            return Err(GraphError::DuplicateGradient(kind));
        }
        self.grads.insert(kind, grad);
        Ok(())
    }

    /// Removes and returns the gradient function for `kind`, if any.
    pub fn deregister_gradient(&mut self, kind: &OpKind) -> Option<GradFn> {
        self.grads.remove(kind)
    }

    pub fn op_def(&self, kind: &OpKind) -> Option<&OpDef> {
        self.ops.get(kind)
    }

    pub fn gradient_for(&self, kind: &OpKind) -> Option<&GradFn> {
        self.grads.get(kind)
    }

    /// Every registered operation kind, sorted by name for determinism.
    pub fn list_ops(&self) -> Vec<OpKind> {
        let mut kinds: Vec<OpKind> = self.ops.keys().cloned().collect();
        kinds.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        kinds
    }

    /// Every kind with a registered gradient, sorted by name.
    pub fn list_gradients(&self) -> Vec<OpKind> {
        let mut kinds: Vec<OpKind> = self.grads.keys().cloned().collect();
        kinds.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        kinds
    }

    /// Builds a node of `kind` from already-constructed dependencies.
    ///
    /// This is the only path by which a node comes into existence: the
    /// registered verifier must accept the candidate and the judge then
    /// computes the cached output type, so every node in the system is
    /// type-correct by construction.
    pub fn build(&self, kind: OpKind, deps: Vec<OpRef>, attrs: Attrs) -> GraphResult<OpRef> {
        self.build_labeled(kind, deps, attrs, None)
    }

    /// Like [`build`](Self::build), attaching a label surfaced in errors.
    pub fn build_labeled(
        &self,
        kind: OpKind,
        deps: Vec<OpRef>,
        attrs: Attrs,
        label: Option<&str>,
    ) -> GraphResult<OpRef> {
        let def = self
            .ops
            .get(&kind)
            .ok_or_else(|| GraphError::UnknownOp(kind.clone()))?
            .clone();

        let label: Option<Arc<str>> = label.map(Arc::<str>::from);
        let site = || NodeSite {
            kind: kind.clone(),
            label: label.clone(),
        };

        let view = NodeView {
            kind: &kind,
            deps: &deps,
            attrs: &attrs,
        };
        (def.verify)(&view).map_err(|source| GraphError::Verification {
            site: site(),
            source,
        })?;
        let output = (def.judge)(&view).map_err(|source| GraphError::Judge {
            site: site(),
            source,
        })?;

        Ok(Arc::new(Operation::new(kind, deps, attrs, output, label)))
    }
}

static DEFAULT_REGISTRY: Lazy<Registry> = Lazy::new(Registry::with_builtins);

/// Process-wide registry holding the built-ins.
///
/// Created on first use and read-only thereafter; callers that need custom
/// kinds build their own [`Registry`] value instead.
pub fn default_registry() -> &'static Registry {
    &DEFAULT_REGISTRY
}

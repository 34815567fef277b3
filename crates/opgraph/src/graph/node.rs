//! Immutable operation nodes and their identifiers.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::tensor::TensorType;

use super::attr::Attrs;

/// Names an operation family.
///
/// The built-in kinds are closed so dispatch over them is exhaustive;
/// collaborator-defined kinds go through the `Custom` extension slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OpKind {
    Variable,
    Constant,
    Add,
    Sub,
    Mul,
    Div,
    Neg,
    Exp,
    Log,
    Tanh,
    MatMul,
    Transpose,
    Reshape,
    Broadcast,
    ReduceSum,
    Custom(Arc<str>),
}

impl OpKind {
    /// Names a collaborator-defined kind.
    pub fn custom(name: impl Into<String>) -> Self {
        OpKind::Custom(Arc::<str>::from(name.into()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            OpKind::Variable => "variable",
            OpKind::Constant => "constant",
            OpKind::Add => "add",
            OpKind::Sub => "sub",
            OpKind::Mul => "mul",
            OpKind::Div => "div",
            OpKind::Neg => "neg",
            OpKind::Exp => "exp",
            OpKind::Log => "log",
            OpKind::Tanh => "tanh",
            OpKind::MatMul => "matmul",
            OpKind::Transpose => "transpose",
            OpKind::Reshape => "reshape",
            OpKind::Broadcast => "broadcast",
            OpKind::ReduceSum => "reduce_sum",
            OpKind::Custom(name) => name,
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable small-integer identifier assigned to every node at construction.
///
/// Identifiers are process-wide and monotone, so traversal visited-sets and
/// binding maps key on them instead of node addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

static NEXT_NODE_ID: AtomicU32 = AtomicU32::new(0);

impl NodeId {
    pub(crate) fn next() -> Self {
        NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Shared handle to a constructed node.
pub type OpRef = Arc<Operation>;

/// One immutable vertex of the computation DAG.
///
/// Construction through [`Registry::build`](super::Registry::build) is the
/// only way a node comes into existence: the registered verifier has accepted
/// the dependency/attribute combination and the registered judge has computed
/// the output type. Nothing mutates afterwards, which is what keeps the
/// dependency relation acyclic and the typing deterministic.
pub struct Operation {
    id: NodeId,
    kind: OpKind,
    deps: Vec<OpRef>,
    attrs: Attrs,
    output: TensorType,
    label: Option<Arc<str>>,
}

impl Operation {
    pub(super) fn new(
        kind: OpKind,
        deps: Vec<OpRef>,
        attrs: Attrs,
        output: TensorType,
        label: Option<Arc<str>>,
    ) -> Self {
        Self {
            id: NodeId::next(),
            kind,
            deps,
            attrs,
            output,
            label,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> &OpKind {
        &self.kind
    }

    pub fn deps(&self) -> &[OpRef] {
        &self.deps
    }

    pub fn attrs(&self) -> &Attrs {
        &self.attrs
    }

    /// The output type computed by the judge at construction time.
    pub fn output_type(&self) -> &TensorType {
        &self.output
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Candidate view of this node, as seen by verifiers and judges.
    pub fn view(&self) -> NodeView<'_> {
        NodeView {
            kind: &self.kind,
            deps: &self.deps,
            attrs: &self.attrs,
        }
    }

    /// Kind plus label, for error reporting.
    pub fn site(&self) -> NodeSite {
        NodeSite {
            kind: self.kind.clone(),
            label: self.label.clone(),
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Operation");
        debug
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("output", &self.output)
            .field("deps", &self.deps.iter().map(|d| d.id()).collect::<Vec<_>>());
        if let Some(label) = &self.label {
            debug.field("label", label);
        }
        debug.finish()
    }
}

/// Borrowed view of a node under construction.
///
/// Verifiers and judges run before the node exists, so they receive the
/// proposed kind/dependency/attribute combination rather than a finished
/// [`Operation`].
#[derive(Clone, Copy)]
pub struct NodeView<'a> {
    pub kind: &'a OpKind,
    pub deps: &'a [OpRef],
    pub attrs: &'a Attrs,
}

/// Identifies a node in error messages: its kind plus optional label.
#[derive(Debug, Clone)]
pub struct NodeSite {
    pub kind: OpKind,
    pub label: Option<Arc<str>>,
}

impl fmt::Display for NodeSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "`{}` (`{label}`)", self.kind),
            None => write!(f, "`{}`", self.kind),
        }
    }
}

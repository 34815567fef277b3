//! Error taxonomy for graph construction, differentiation, and execution.
//!
//! Every failure is unrecoverable at its point of detection; the variants
//! exist so messages can name the operation kind and the violated
//! precondition rather than to enable recovery.

use thiserror::Error;

use crate::graph::{NodeSite, OpKind};
use crate::tensor::DType;

/// Failures raised while building graphs, populating registries, or
/// differentiating.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Construction referenced a kind nothing has registered.
    #[error("operation kind `{0}` is not registered")]
    UnknownOp(OpKind),

    /// An operation kind was registered twice.
    #[error("operation kind `{0}` is already registered")]
    DuplicateOp(OpKind),

    /// A gradient function was registered twice for the same kind.
    #[error("gradient for operation kind `{0}` is already registered")]
    DuplicateGradient(OpKind),

    /// The kind's verifier rejected the proposed dependency/attribute
    /// combination.
    #[error("{site} failed verification: {source}")]
    Verification {
        site: NodeSite,
        #[source]
        source: anyhow::Error,
    },

    /// The kind's judge could not infer an output type.
    #[error("{site} output type inference failed: {source}")]
    Judge {
        site: NodeSite,
        #[source]
        source: anyhow::Error,
    },

    /// `grad` was called on an objective that is not a floating-point scalar.
    #[error(
        "gradient objective must be a floating-point scalar, got {dtype:?} with volume {volume}"
    )]
    ObjectiveNotScalar { dtype: DType, volume: usize },

    /// A registered local-gradient function failed or returned the wrong
    /// number of contributions.
    #[error("local gradient for {site} failed: {source}")]
    LocalGradient {
        site: NodeSite,
        #[source]
        source: anyhow::Error,
    },

    /// A `wrt` entry receives no gradient from the objective.
    #[error("wrt[{index}] ({site}) is not reachable from the objective")]
    UnreachableWrt { index: usize, site: NodeSite },
}

/// Convenience alias for results returned by graph-layer routines.
pub type GraphResult<T> = Result<T, GraphError>;

/// Failures raised while evaluating graphs or executing plans.
#[derive(Debug, Error)]
pub enum ExecError {
    /// A scheduled node's kind has no kernel and no default behavior.
    #[error("no kernel registered for operation kind `{0}`")]
    MissingKernel(OpKind),

    /// A kernel was registered twice for the same kind.
    #[error("kernel for operation kind `{0}` is already registered")]
    DuplicateKernel(OpKind),

    /// A source node has neither a caller binding nor a default value.
    #[error("source {site} has neither a binding nor a default value")]
    UnboundSource { site: NodeSite },

    /// A buffer does not match the byte length implied by a node's type.
    #[error("buffer for {site} holds {actual} bytes but {expected} were expected")]
    SizeMismatch {
        site: NodeSite,
        expected: usize,
        actual: usize,
    },

    /// The plan was explicitly released and can no longer execute.
    #[error("plan has been released and can no longer execute")]
    PlanReleased,

    /// A kernel reported a failure while executing.
    #[error("kernel `{kind}` failed: {message}")]
    Kernel { kind: OpKind, message: String },

    /// Backend-reported failure outside the other categories.
    #[error("execution failure: {message}")]
    Execution { message: String },
}

impl ExecError {
    pub fn execution(message: impl Into<String>) -> Self {
        ExecError::Execution {
            message: message.into(),
        }
    }

    pub fn kernel(kind: OpKind, message: impl Into<String>) -> Self {
        ExecError::Kernel {
            kind,
            message: message.into(),
        }
    }
}

/// Convenience alias for results returned by execution routines.
pub type ExecResult<T> = Result<T, ExecError>;

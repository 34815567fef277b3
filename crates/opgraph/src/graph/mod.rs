//! Operation graph construction: typed attributes, immutable nodes, and the
//! registries that gate node creation.

mod attr;
mod builtin;
mod node;
mod registry;
pub mod topology;

pub use attr::{AttrValue, Attrs};
pub use node::{NodeId, NodeSite, NodeView, OpKind, OpRef, Operation};
pub use registry::{default_registry, GradFn, JudgeFn, OpDef, Registry, VerifyFn};

//! Typed attribute bags attached to graph nodes.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};

use crate::exec::BufferRef;
use crate::tensor::{TensorLiteral, TensorType};

/// Closed set of attribute payloads an operation may carry.
///
/// Every access goes through a typed accessor on [`Attrs`]; there is no
/// stringly-typed tag checking at use sites.
#[derive(Clone)]
pub enum AttrValue {
    /// A target shape, e.g. for reshape and broadcast.
    Shape(Vec<usize>),
    /// An axis list, e.g. reduction axes or a transpose permutation.
    Axes(Vec<usize>),
    /// A plain numeric attribute.
    Scalar(f64),
    /// A nested tensor type, e.g. the declared type of a variable.
    Type(TensorType),
    /// A dense host payload, e.g. the value of a constant.
    Literal(TensorLiteral),
    /// A pre-materialized device value reused directly at execution time.
    Buffer(BufferRef),
}

impl std::fmt::Debug for AttrValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttrValue::Shape(dims) => f.debug_tuple("Shape").field(dims).finish(),
            AttrValue::Axes(axes) => f.debug_tuple("Axes").field(axes).finish(),
            AttrValue::Scalar(value) => f.debug_tuple("Scalar").field(value).finish(),
            AttrValue::Type(ty) => f.debug_tuple("Type").field(ty).finish(),
            AttrValue::Literal(literal) => f.debug_tuple("Literal").field(literal.ty()).finish(),
            AttrValue::Buffer(buffer) => {
                write!(f, "Buffer({} bytes)", buffer.num_bytes())
            }
        }
    }
}

/// String-keyed attribute map frozen into a node at construction time.
#[derive(Debug, Clone, Default)]
pub struct Attrs {
    entries: BTreeMap<String, AttrValue>,
}

impl Attrs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion for constructing attribute bags inline.
    pub fn with(mut self, key: impl Into<String>, value: AttrValue) -> Self {
        self.entries.insert(key.into(), value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: AttrValue) {
        self.entries.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Fetches a required shape attribute.
    pub fn shape(&self, key: &str) -> Result<&[usize]> {
        match self.get(key) {
            Some(AttrValue::Shape(dims)) => Ok(dims),
            Some(other) => Err(anyhow!("attribute `{key}` is {other:?}, expected a shape")),
            None => Err(anyhow!("missing required shape attribute `{key}`")),
        }
    }

    /// Fetches a required axis-list attribute.
    pub fn axes(&self, key: &str) -> Result<&[usize]> {
        match self.get(key) {
            Some(AttrValue::Axes(axes)) => Ok(axes),
            Some(other) => Err(anyhow!(
                "attribute `{key}` is {other:?}, expected an axis list"
            )),
            None => Err(anyhow!("missing required axis-list attribute `{key}`")),
        }
    }

    /// Fetches a required scalar attribute.
    pub fn scalar(&self, key: &str) -> Result<f64> {
        match self.get(key) {
            Some(AttrValue::Scalar(value)) => Ok(*value),
            Some(other) => Err(anyhow!("attribute `{key}` is {other:?}, expected a scalar")),
            None => Err(anyhow!("missing required scalar attribute `{key}`")),
        }
    }

    /// Fetches a required tensor-type attribute.
    pub fn tensor_type(&self, key: &str) -> Result<&TensorType> {
        match self.get(key) {
            Some(AttrValue::Type(ty)) => Ok(ty),
            Some(other) => Err(anyhow!(
                "attribute `{key}` is {other:?}, expected a tensor type"
            )),
            None => Err(anyhow!("missing required tensor-type attribute `{key}`")),
        }
    }

    /// Fetches an optional literal attribute.
    pub fn literal(&self, key: &str) -> Option<&TensorLiteral> {
        match self.get(key) {
            Some(AttrValue::Literal(literal)) => Some(literal),
            _ => None,
        }
    }

    /// Fetches an optional device-buffer attribute.
    pub fn buffer(&self, key: &str) -> Option<&BufferRef> {
        match self.get(key) {
            Some(AttrValue::Buffer(buffer)) => Some(buffer),
            _ => None,
        }
    }
}

//! Tensor metadata coupling dtype and shape.

use serde::{Deserialize, Serialize};

use super::dtype::DType;
use super::shape::Shape;

/// Full type of a tensor value: element type plus shape.
///
/// Two tensor types are equal iff their element types match and their shape
/// sequences match element-wise. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorType {
    dtype: DType,
    shape: Shape,
}

impl TensorType {
    pub fn new(dtype: DType, shape: Shape) -> Self {
        Self { dtype, shape }
    }

    /// A rank-0 type of the given element type.
    pub fn scalar(dtype: DType) -> Self {
        Self::new(dtype, Shape::scalar())
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    /// Total element count; 1 for scalars.
    pub fn volume(&self) -> usize {
        self.shape.volume()
    }

    /// Total byte length of a dense value of this type.
    pub fn byte_len(&self) -> usize {
        self.volume() * self.dtype.size_in_bytes()
    }
}

impl std::fmt::Display for TensorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}{}", self.dtype, self.shape)
    }
}

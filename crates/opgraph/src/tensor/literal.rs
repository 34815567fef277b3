//! Dense host-side tensor payloads attached to source nodes.

use std::sync::Arc;

use anyhow::{ensure, Result};
use half::{bf16, f16};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize};

use super::dtype::DType;
use super::shape::Shape;
use super::ty::TensorType;

/// Immutable host bytes paired with the tensor type they encode.
///
/// The byte payload is shared, so cloning a literal never copies tensor data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorLiteral {
    ty: TensorType,
    bytes: Arc<[u8]>,
}

impl TensorLiteral {
    /// Wraps raw little-endian bytes without validation; byte length is
    /// checked when the literal is attached to a node.
    pub fn new(ty: TensorType, bytes: Arc<[u8]>) -> Self {
        Self { ty, bytes }
    }

    /// Builds an `F32` literal from a dense row-major slice.
    pub fn from_f32<D: Into<Vec<usize>>>(dims: D, values: &[f32]) -> Result<Self> {
        let ty = TensorType::new(DType::F32, Shape::new(dims));
        ensure!(
            values.len() == ty.volume(),
            "literal holds {} values but shape {} implies {}",
            values.len(),
            ty.shape(),
            ty.volume()
        );
        let mut bytes = Vec::with_capacity(values.len() * 4);
        for value in values {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        Ok(Self::new(ty, Arc::from(bytes.into_boxed_slice())))
    }

    /// Builds an `I32` literal from a dense row-major slice.
    pub fn from_i32<D: Into<Vec<usize>>>(dims: D, values: &[i32]) -> Result<Self> {
        let ty = TensorType::new(DType::I32, Shape::new(dims));
        ensure!(
            values.len() == ty.volume(),
            "literal holds {} values but shape {} implies {}",
            values.len(),
            ty.shape(),
            ty.volume()
        );
        let mut bytes = Vec::with_capacity(values.len() * 4);
        for value in values {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        Ok(Self::new(ty, Arc::from(bytes.into_boxed_slice())))
    }

    /// Fills every element of `ty` with the same value, encoded per dtype.
    pub fn splat(ty: TensorType, value: f64) -> Self {
        let element: Vec<u8> = match ty.dtype() {
            DType::F32 => (value as f32).to_le_bytes().to_vec(),
            DType::F16 => f16::from_f64(value).to_bits().to_le_bytes().to_vec(),
            DType::Bf16 => bf16::from_f64(value).to_bits().to_le_bytes().to_vec(),
            DType::I32 => (value as i32).to_le_bytes().to_vec(),
        };
        let mut bytes = Vec::with_capacity(ty.byte_len());
        for _ in 0..ty.volume() {
            bytes.extend_from_slice(&element);
        }
        Self::new(ty, Arc::from(bytes.into_boxed_slice()))
    }

    pub fn ty(&self) -> &TensorType {
        &self.ty
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn shared_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }
}

impl Serialize for TensorLiteral {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("TensorLiteral", 2)?;
        state.serialize_field("ty", &self.ty)?;
        state.serialize_field("bytes", &self.bytes.as_ref())?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for TensorLiteral {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct TensorLiteralHelper {
            ty: TensorType,
            bytes: Vec<u8>,
        }

        let helper = TensorLiteralHelper::deserialize(deserializer)?;
        Ok(TensorLiteral {
            ty: helper.ty,
            bytes: Arc::<[u8]>::from(helper.bytes),
        })
    }
}

//! Resolved value types attached to every expression.

use serde::{Deserialize, Serialize};

/// Element data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Bool,
    I32,
    I64,
    F16,
    F32,
    F64,
}

impl DType {
    /// Types whose 0-d constants are inlined instead of passed as buffers.
    pub fn is_simple(&self) -> bool {
        !matches!(self, DType::F16)
    }
}

/// A tensor with a fully resolved shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorType {
    pub shape: Vec<usize>,
    pub dtype: DType,
}

impl TensorType {
    pub fn new(shape: Vec<usize>, dtype: DType) -> Self {
        Self { shape, dtype }
    }

    pub fn num_elements(&self) -> u64 {
        self.shape.iter().map(|&d| d as u64).product()
    }

    pub fn is_scalar(&self) -> bool {
        self.shape.is_empty()
    }
}

/// Checked type of an expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Type {
    Tensor(TensorType),
    Tuple(Vec<Type>),
    /// Functions, references and anything else that is not a tensor value.
    Opaque,
}

impl Type {
    pub fn tensor(shape: Vec<usize>, dtype: DType) -> Self {
        Type::Tensor(TensorType::new(shape, dtype))
    }

    pub fn as_tensor(&self) -> Option<&TensorType> {
        match self {
            Type::Tensor(t) => Some(t),
            _ => None,
        }
    }

    pub fn is_tensor(&self) -> bool {
        matches!(self, Type::Tensor(_))
    }

    pub fn fields(&self) -> Option<&[Type]> {
        match self {
            Type::Tuple(fields) => Some(fields),
            _ => None,
        }
    }

    /// Number of elements moved when this value is materialized.
    ///
    /// Tuples count the sum of their fields; opaque values count nothing.
    pub fn num_elements(&self) -> u64 {
        match self {
            Type::Tensor(t) => t.num_elements(),
            Type::Tuple(fields) => fields.iter().map(Type::num_elements).sum(),
            Type::Opaque => 0,
        }
    }

    /// Number of flat result slots this value occupies in a fused call.
    pub fn arity(&self) -> usize {
        match self {
            Type::Tuple(fields) => fields.len(),
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_num_elements() {
        assert_eq!(Type::tensor(vec![4, 8, 2], DType::F64).num_elements(), 64);
        assert_eq!(Type::tensor(vec![], DType::F32).num_elements(), 1);
        let tuple = Type::Tuple(vec![
            Type::tensor(vec![3], DType::F32),
            Type::tensor(vec![5], DType::F32),
        ]);
        assert_eq!(tuple.num_elements(), 8);
        assert_eq!(tuple.arity(), 2);
        assert_eq!(Type::Opaque.num_elements(), 0);
    }
}

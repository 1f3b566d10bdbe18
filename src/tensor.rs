use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by tensor construction and tensor functions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TensorError {
    /// The number of values does not match the product of the shape.
    #[error("shape {shape:?} holds {expected} values, got {got}")]
    ShapeMismatch {
        /// Requested shape.
        shape: Vec<usize>,
        /// Number of values the shape requires.
        expected: usize,
        /// Number of values provided.
        got: usize,
    },
    /// Two operands of an element-wise function have different shapes.
    #[error("incompatible shapes {lhs:?} and {rhs:?}")]
    IncompatibleShapes {
        /// Shape of the left operand.
        lhs: Vec<usize>,
        /// Shape of the right operand.
        rhs: Vec<usize>,
    },
    /// A function was called with the wrong number of inputs.
    #[error("{func_name} expects {expected} inputs, got {got}")]
    UnexpectedInputCount {
        /// Number of inputs the function takes.
        expected: usize,
        /// Number of inputs provided.
        got: usize,
        /// Name of the function, for context.
        func_name: String,
    },
    /// A tensor of the wrong element type was supplied.
    #[error("expected a {expected} tensor")]
    UnexpectedType {
        /// The expected element type.
        expected: &'static str,
    },
    /// A reduction was requested over zero elements.
    #[error("cannot reduce an empty tensor")]
    EmptyReduction,
    /// A single value was requested from a tensor holding more than one.
    #[error("tensor of shape {shape:?} is not a single value")]
    NotAScalar {
        /// Shape of the offending tensor.
        shape: Vec<usize>,
    },
    /// A classification target lies outside `0..num_classes`.
    #[error("target {target} is out of bounds for {num_classes} classes")]
    InvalidTarget {
        /// The offending class index.
        target: usize,
        /// Number of classes in the logits.
        num_classes: usize,
    },
}

/// A dense, row-major n-dimensional array.
///
/// A tensor with an empty shape is zero-dimensional and holds exactly one value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor<V> {
    shape: Vec<usize>,
    blob: Vec<V>,
}

impl<V: Clone + Default> Tensor<V> {
    /// Builds a tensor from a shape and its row-major values.
    ///
    /// # Errors
    /// Returns `TensorError::ShapeMismatch` if `blob.len()` is not the product of `shape`.
    pub fn raw(shape: &[usize], blob: Vec<V>) -> Result<Self, TensorError> {
        let expected = shape.iter().product::<usize>();
        if blob.len() != expected {
            return Err(TensorError::ShapeMismatch {
                shape: shape.to_vec(),
                expected,
                got: blob.len(),
            });
        }
        Ok(Self {
            shape: shape.to_vec(),
            blob,
        })
    }

    /// A tensor of the given shape filled with `V::default()`.
    pub fn zeros(shape: &[usize]) -> Self {
        Self {
            shape: shape.to_vec(),
            blob: vec![V::default(); shape.iter().product()],
        }
    }

    /// A zero-dimensional tensor holding `value`.
    pub fn scalar(value: V) -> Self {
        Self {
            shape: Vec::new(),
            blob: vec![value],
        }
    }

    /// Extracts the only value of a single-element tensor.
    ///
    /// # Errors
    /// Returns `TensorError::NotAScalar` if the tensor holds more or fewer than one value.
    pub fn item(&self) -> Result<V, TensorError> {
        match self.blob.as_slice() {
            [v] => Ok(v.clone()),
            _ => Err(TensorError::NotAScalar {
                shape: self.shape.clone(),
            }),
        }
    }
}

impl<V> Tensor<V> {
    /// The shape of the tensor.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of dimensions (0 for a scalar).
    pub fn dim(&self) -> usize {
        self.shape.len()
    }

    /// Total number of values.
    pub fn size(&self) -> usize {
        self.blob.len()
    }

    /// Row-major values.
    pub fn blob(&self) -> &[V] {
        &self.blob
    }
}

impl Tensor<f32> {
    /// A tensor of values drawn from the standard normal distribution.
    pub fn randn<R: Rng + ?Sized>(rng: &mut R, shape: &[usize]) -> Self {
        let blob = (0..shape.iter().product::<usize>())
            .map(|_| Distribution::<f32>::sample(&StandardNormal, rng))
            .collect();
        Self {
            shape: shape.to_vec(),
            blob,
        }
    }

    /// Applies `f` to every value, keeping the shape.
    #[must_use]
    pub fn map_values<F: Fn(f32) -> f32>(&self, f: F) -> Self {
        Self {
            shape: self.shape.clone(),
            blob: self.blob.iter().map(|&v| f(v)).collect(),
        }
    }

    /// Arithmetic mean of all values as a zero-dimensional tensor.
    ///
    /// # Errors
    /// Returns `TensorError::EmptyReduction` for a tensor with no values.
    pub fn mean(&self) -> Result<Self, TensorError> {
        if self.blob.is_empty() {
            return Err(TensorError::EmptyReduction);
        }
        let sum: f32 = self.blob.iter().sum();
        Ok(Self::scalar(sum / self.blob.len() as f32))
    }
}

impl std::ops::Add for &Tensor<f32> {
    type Output = Result<Tensor<f32>, TensorError>;

    fn add(self, rhs: Self) -> Self::Output {
        if self.shape != rhs.shape {
            return Err(TensorError::IncompatibleShapes {
                lhs: self.shape.clone(),
                rhs: rhs.shape.clone(),
            });
        }
        Ok(Tensor {
            shape: self.shape.clone(),
            blob: self.blob.iter().zip(&rhs.blob).map(|(a, b)| a + b).collect(),
        })
    }
}

/// A tensor of either element type, as consumed by [`crate::funcs::Function`].
#[derive(Debug, Clone, PartialEq)]
pub enum GeneralTensor {
    /// Floating-point values (logits, losses).
    Float(Tensor<f32>),
    /// Integer values (class indices).
    Usize(Tensor<usize>),
}

impl GeneralTensor {
    /// Borrows the float tensor.
    ///
    /// # Errors
    /// Returns `TensorError::UnexpectedType` for an integer tensor.
    pub fn as_float(&self) -> Result<&Tensor<f32>, TensorError> {
        match self {
            Self::Float(t) => Ok(t),
            Self::Usize(_) => Err(TensorError::UnexpectedType { expected: "float" }),
        }
    }

    /// Borrows the integer tensor.
    ///
    /// # Errors
    /// Returns `TensorError::UnexpectedType` for a float tensor.
    pub fn as_usize(&self) -> Result<&Tensor<usize>, TensorError> {
        match self {
            Self::Usize(t) => Ok(t),
            Self::Float(_) => Err(TensorError::UnexpectedType { expected: "usize" }),
        }
    }
}

use super::{expect_inputs, Function};
use crate::tensor::{GeneralTensor, Tensor, TensorError};

/// Element-wise addition: `Output = Input1 + Input2`.
///
/// Expects exactly two float tensors of the same shape. Used to accumulate
/// per-example losses.
#[derive(Debug, Clone, Default)]
pub struct Add;

impl Add {
    /// Creates a new Add function, boxed for the `Function` trait.
    pub fn new() -> Box<dyn Function> {
        Box::new(Self)
    }
}

impl Function for Add {
    /// # Errors
    /// Returns `TensorError` if:
    /// * Exactly two inputs are not provided.
    /// * Inputs are not float tensors.
    /// * The shapes differ.
    fn run(&mut self, inps: &[&GeneralTensor]) -> Result<Tensor<f32>, TensorError> {
        expect_inputs(inps, 2, "Add")?;

        let lhs = inps[0].as_float()?;
        let rhs = inps[1].as_float()?;

        lhs + rhs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adds_scalars() {
        let a = GeneralTensor::Float(Tensor::scalar(1.5));
        let b = GeneralTensor::Float(Tensor::scalar(2.0));
        let out = Add::new().run(&[&a, &b]).unwrap();
        assert_eq!(out.dim(), 0);
        assert_eq!(out.item().unwrap(), 3.5);
    }

    #[test]
    fn rejects_wrong_input_count() {
        let a = GeneralTensor::Float(Tensor::scalar(1.0));
        let err = Add::new().run(&[&a]).unwrap_err();
        assert_eq!(
            err,
            TensorError::UnexpectedInputCount {
                expected: 2,
                got: 1,
                func_name: "Add".to_string()
            }
        );
    }

    #[test]
    fn rejects_integer_inputs() {
        let a = GeneralTensor::Float(Tensor::scalar(1.0));
        let b = GeneralTensor::Usize(Tensor::scalar(1));
        assert!(matches!(
            Add::new().run(&[&a, &b]),
            Err(TensorError::UnexpectedType { .. })
        ));
    }
}

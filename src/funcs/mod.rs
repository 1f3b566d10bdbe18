//! Tensor functions used by the batch-loss computation.
//!
//! Each function consumes a slice of [`GeneralTensor`] inputs and produces a
//! float tensor. There is no backward pass: these are forward-only.

mod add;
mod cross_entropy;

pub use add::Add;
pub use cross_entropy::CrossEntropy;

use crate::tensor::{GeneralTensor, Tensor, TensorError};

/// A forward-only tensor function.
pub trait Function: std::fmt::Debug + Send {
    /// Evaluates the function on `inps`.
    ///
    /// # Errors
    /// Implementations return `TensorError` for a wrong input count, a wrong
    /// element type, or shapes the function cannot combine.
    fn run(&mut self, inps: &[&GeneralTensor]) -> Result<Tensor<f32>, TensorError>;
}

/// Checks the input count of a function, naming it in the error.
fn expect_inputs(
    inps: &[&GeneralTensor],
    expected: usize,
    func_name: &str,
) -> Result<(), TensorError> {
    if inps.len() == expected {
        Ok(())
    } else {
        Err(TensorError::UnexpectedInputCount {
            expected,
            got: inps.len(),
            func_name: func_name.to_string(),
        })
    }
}

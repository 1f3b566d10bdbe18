use super::{expect_inputs, Function};
use crate::tensor::{GeneralTensor, Tensor, TensorError};

/// Cross-entropy between raw logits and class indices, averaged over rows.
///
/// Inputs:
/// * `logits`: float tensor of shape `[N, C]`.
/// * `targets`: usize tensor of shape `[N]`, each value in `0..C`.
///
/// The output is a zero-dimensional tensor: `mean_i(logsumexp(logits[i]) - logits[i][targets[i]])`.
#[derive(Debug, Clone, Default)]
pub struct CrossEntropy;

impl CrossEntropy {
    /// Creates a new CrossEntropy function, boxed for the `Function` trait.
    pub fn new() -> Box<dyn Function> {
        Box::new(Self)
    }
}

/// Numerically stable `log(sum(exp(row)))`.
fn log_sum_exp(row: &[f32]) -> f32 {
    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let sum: f32 = row.iter().map(|&v| (v - max).exp()).sum();
    max + sum.ln()
}

impl Function for CrossEntropy {
    /// # Errors
    /// Returns `TensorError` if:
    /// * Exactly two inputs are not provided, or their element types are wrong.
    /// * `logits` is not 2-D or `targets` does not hold one index per row.
    /// * A target is not a valid class index (`InvalidTarget`).
    /// * There are no rows to average over.
    fn run(&mut self, inps: &[&GeneralTensor]) -> Result<Tensor<f32>, TensorError> {
        expect_inputs(inps, 2, "CrossEntropy")?;

        let logits = inps[0].as_float()?;
        let targets = inps[1].as_usize()?;

        let (rows, num_classes) = match logits.shape() {
            [rows, classes] => (*rows, *classes),
            _ => {
                return Err(TensorError::IncompatibleShapes {
                    lhs: logits.shape().to_vec(),
                    rhs: targets.shape().to_vec(),
                })
            }
        };
        if targets.shape() != [rows] {
            return Err(TensorError::IncompatibleShapes {
                lhs: logits.shape().to_vec(),
                rhs: targets.shape().to_vec(),
            });
        }
        if rows == 0 || num_classes == 0 {
            return Err(TensorError::EmptyReduction);
        }

        let mut total = 0.0f32;
        for (row, &target) in logits.blob().chunks(num_classes).zip(targets.blob()) {
            if target >= num_classes {
                return Err(TensorError::InvalidTarget {
                    target,
                    num_classes,
                });
            }
            total += log_sum_exp(row) - row[target];
        }

        Ok(Tensor::scalar(total / rows as f32))
    }
}

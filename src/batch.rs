use crate::funcs::{Add, CrossEntropy};
use crate::tensor::{GeneralTensor, Tensor, TensorError};

use rand::Rng;
use thiserror::Error;
use tracing::{debug, trace};

// Stand-in logits are drawn for a binary classifier.
const NUM_CLASSES: usize = 2;

/// Errors produced by [`process_batch`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BatchError {
    /// The batch has no examples, so there is nothing to average.
    #[error("cannot compute the loss of an empty batch")]
    EmptyBatch,
    /// Prompts and labels differ in length.
    #[error("got {prompts} prompts but {labels} labels")]
    LengthMismatch {
        /// Number of prompts.
        prompts: usize,
        /// Number of labels.
        labels: usize,
    },
    /// The loss computation failed, e.g. on a label outside `{0, 1}`.
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

/// Computes the mean classification loss of a batch.
///
/// For every prompt, in order, `get_model_response` is called once; two
/// standard-normal scores then stand in for the model's logits and are scored
/// against the label with cross-entropy. The response itself does not feed the
/// loss. `model` is an opaque handle and is not used.
///
/// Returns a zero-dimensional tensor.
///
/// # Errors
/// * `BatchError::EmptyBatch` if `prompts` is empty.
/// * `BatchError::LengthMismatch` if `prompts` and `labels` differ in length.
/// * `BatchError::Tensor(TensorError::InvalidTarget { .. })` for a label other than 0 or 1.
pub fn process_batch<M, P, F>(
    model: &M,
    prompts: &[P],
    labels: &[usize],
    get_model_response: F,
) -> Result<Tensor<f32>, BatchError>
where
    M: ?Sized,
    P: AsRef<str>,
    F: FnMut(&str) -> String,
{
    process_batch_with_rng(&mut rand::thread_rng(), model, prompts, labels, get_model_response)
}

/// [`process_batch`] drawing the stand-in logits from `rng`.
///
/// # Errors
/// Same as [`process_batch`].
pub fn process_batch_with_rng<R, M, P, F>(
    rng: &mut R,
    _model: &M,
    prompts: &[P],
    labels: &[usize],
    mut get_model_response: F,
) -> Result<Tensor<f32>, BatchError>
where
    R: Rng + ?Sized,
    M: ?Sized,
    P: AsRef<str>,
    F: FnMut(&str) -> String,
{
    if prompts.is_empty() {
        return Err(BatchError::EmptyBatch);
    }
    if prompts.len() != labels.len() {
        return Err(BatchError::LengthMismatch {
            prompts: prompts.len(),
            labels: labels.len(),
        });
    }

    let mut cross_entropy = CrossEntropy::new();
    let mut add = Add::new();
    let mut batch_loss = GeneralTensor::Float(Tensor::scalar(0.0));

    for (i, (prompt, &label)) in prompts.iter().zip(labels).enumerate() {
        let response = get_model_response(prompt.as_ref());
        trace!(index = i, response_len = response.len(), "model response received");

        let logits = GeneralTensor::Float(Tensor::randn(rng, &[1, NUM_CLASSES]));
        let target = GeneralTensor::Usize(Tensor::raw(&[1], vec![label])?);
        let loss = cross_entropy.run(&[&logits, &target])?;
        let value = loss.item()?;
        debug!(index = i, label, loss = value, "example loss");

        batch_loss = GeneralTensor::Float(add.run(&[&batch_loss, &GeneralTensor::Float(loss)])?);
    }

    let n = prompts.len() as f32;
    Ok(batch_loss.as_float()?.map_values(|v| v / n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn returns_scalar_and_calls_back_once_per_prompt() {
        let mut calls = Vec::new();
        let loss = process_batch(&(), &["prompt1", "prompt2"], &[0, 1], |p| {
            calls.push(p.to_string());
            "mocked response".to_string()
        })
        .unwrap();
        assert_eq!(loss.dim(), 0);
        assert!(loss.item().unwrap().is_finite());
        assert!(loss.item().unwrap() > 0.0);
        assert_eq!(calls, vec!["prompt1", "prompt2"]);
    }

    #[test]
    fn seeded_rng_is_reproducible() {
        let prompts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let run = || {
            process_batch_with_rng(
                &mut StdRng::seed_from_u64(42),
                &(),
                &prompts,
                &[0, 1, 1],
                |_| String::new(),
            )
            .unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn mean_matches_per_example_losses() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut expected = 0.0f32;
        for label in [1usize, 0] {
            let logits = GeneralTensor::Float(Tensor::randn(&mut rng, &[1, NUM_CLASSES]));
            let target = GeneralTensor::Usize(Tensor::raw(&[1], vec![label]).unwrap());
            expected += CrossEntropy::new()
                .run(&[&logits, &target])
                .unwrap()
                .item()
                .unwrap();
        }
        expected /= 2.0;

        let loss = process_batch_with_rng(
            &mut StdRng::seed_from_u64(3),
            &(),
            &["x", "y"],
            &[1, 0],
            |_| String::new(),
        )
        .unwrap();
        assert!((loss.item().unwrap() - expected).abs() < 1e-6);
    }

    #[test]
    fn empty_batch_is_rejected() {
        let mut called = false;
        let err = process_batch(&(), &Vec::<String>::new(), &[], |_| {
            called = true;
            String::new()
        })
        .unwrap_err();
        assert_eq!(err, BatchError::EmptyBatch);
        assert!(!called);
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let err = process_batch(&(), &["a", "b"], &[0], |_| String::new()).unwrap_err();
        assert_eq!(err, BatchError::LengthMismatch { prompts: 2, labels: 1 });
    }

    #[test]
    fn invalid_label_is_rejected() {
        let err = process_batch(&(), &["a"], &[2], |_| String::new()).unwrap_err();
        assert_eq!(
            err,
            BatchError::Tensor(TensorError::InvalidTarget {
                target: 2,
                num_classes: 2
            })
        );
    }
}

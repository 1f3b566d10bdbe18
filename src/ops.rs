use crate::device::Device;
use crate::tensor::{Tensor, TensorError};

use thiserror::Error;
use tracing::debug;

/// Errors produced by [`gpu_tensor_operation`].
#[derive(Debug, Error)]
pub enum OpError {
    /// The text was empty, so there is no mean.
    #[error("cannot average an empty text")]
    EmptyInput,
    /// The requested device does not exist or is not ready.
    #[error("device {0} is not available")]
    DeviceUnavailable(Device),
    /// Building the host tensor failed.
    #[error(transparent)]
    Tensor(#[from] TensorError),
    /// The accelerator failed while running the reduction.
    #[cfg(feature = "gpu")]
    #[error(transparent)]
    Gpu(#[from] crate::gpu::GpuError),
}

/// Mean of the Unicode code points of `text`, computed on `device`.
///
/// There is no fallback: asking for an accelerator that is not present fails
/// with `OpError::DeviceUnavailable`. Check [`Device::is_available`] first.
///
/// # Errors
/// * `OpError::EmptyInput` if `text` is empty.
/// * `OpError::DeviceUnavailable` if `device` cannot be used.
pub fn gpu_tensor_operation(text: &str, device: Device) -> Result<f32, OpError> {
    if text.is_empty() {
        return Err(OpError::EmptyInput);
    }
    if !device.is_available() {
        return Err(OpError::DeviceUnavailable(device));
    }

    let codes: Vec<f32> = text.chars().map(|c| u32::from(c) as f32).collect();
    debug!(%device, len = codes.len(), "averaging code points");

    match device {
        Device::Cpu => {
            let tensor = Tensor::raw(&[codes.len()], codes)?;
            Ok(tensor.mean()?.item()?)
        }
        #[cfg(feature = "gpu")]
        Device::Gpu(index) => Ok(crate::gpu::mean(&codes, index)?),
        #[cfg(not(feature = "gpu"))]
        Device::Gpu(_) => Err(OpError::DeviceUnavailable(device)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_of_code_points() {
        assert_eq!(gpu_tensor_operation("test", Device::Cpu).unwrap(), 112.0);
    }

    #[test]
    fn is_deterministic() {
        let a = gpu_tensor_operation("hello, world", Device::Cpu).unwrap();
        let b = gpu_tensor_operation("hello, world", Device::Cpu).unwrap();
        assert_eq!(a, b);
        assert!(a.is_finite());
    }

    #[test]
    fn counts_characters_not_bytes() {
        // U+00E9 is two bytes in UTF-8 but one code point.
        assert_eq!(gpu_tensor_operation("\u{e9}", Device::Cpu).unwrap(), 233.0);
    }

    #[test]
    fn empty_text_is_rejected() {
        assert!(matches!(
            gpu_tensor_operation("", Device::Cpu),
            Err(OpError::EmptyInput)
        ));
    }

    #[test]
    fn unavailable_device_is_rejected() {
        let device = Device::Gpu(usize::MAX);
        assert!(matches!(
            gpu_tensor_operation("test", device),
            Err(OpError::DeviceUnavailable(d)) if d == device
        ));
    }

    #[test]
    fn runs_on_accelerator_when_present() {
        let device = Device::Gpu(0);
        if device.is_available() {
            let result = gpu_tensor_operation("test", device).unwrap();
            assert!((result - 112.0).abs() < 1e-3);
        } else {
            eprintln!("no accelerator available, skipping GPU check");
        }
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced while parsing a device identifier.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The identifier is not `cpu`, `gpu`, `cuda`, or one of those with `:<index>`.
    #[error("unknown device {0:?}, expected `cpu`, `gpu` or `gpu:<index>`")]
    Unknown(String),
}

/// A compute target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Device {
    /// The host processor. Always available.
    #[default]
    Cpu,
    /// The accelerator at the given index.
    Gpu(usize),
}

impl Device {
    /// Whether this device can run work right now.
    ///
    /// Accelerators are only ever available when the crate is built with the
    /// `gpu` feature and an OpenCL GPU is present.
    pub fn is_available(&self) -> bool {
        match self {
            Self::Cpu => true,
            Self::Gpu(index) => *index < Self::gpu_count(),
        }
    }

    /// Number of accelerators visible to this process.
    pub fn gpu_count() -> usize {
        #[cfg(feature = "gpu")]
        {
            crate::gpu::device_count()
        }
        #[cfg(not(feature = "gpu"))]
        {
            0
        }
    }

    /// The first accelerator if one is available, otherwise the CPU.
    pub fn best_available() -> Self {
        if Self::gpu_count() > 0 {
            Self::Gpu(0)
        } else {
            Self::Cpu
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Gpu(index) => write!(f, "gpu:{index}"),
        }
    }
}

impl FromStr for Device {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let (kind, index) = match lower.split_once(':') {
            Some((kind, index)) => (
                kind,
                Some(
                    index
                        .parse::<usize>()
                        .map_err(|_| DeviceError::Unknown(s.to_string()))?,
                ),
            ),
            None => (lower.as_str(), None),
        };
        match (kind, index) {
            ("cpu", None) => Ok(Self::Cpu),
            ("gpu" | "cuda", index) => Ok(Self::Gpu(index.unwrap_or(0))),
            _ => Err(DeviceError::Unknown(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_identifiers() {
        assert_eq!("cpu".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!("GPU".parse::<Device>().unwrap(), Device::Gpu(0));
        assert_eq!("cuda:3".parse::<Device>().unwrap(), Device::Gpu(3));
        assert!("cpu:1".parse::<Device>().is_err());
        assert!("tpu".parse::<Device>().is_err());
        assert!("gpu:x".parse::<Device>().is_err());
    }

    #[test]
    fn display_round_trips() {
        for device in [Device::Cpu, Device::Gpu(2)] {
            assert_eq!(device.to_string().parse::<Device>().unwrap(), device);
        }
    }

    #[test]
    fn cpu_is_always_available() {
        assert!(Device::Cpu.is_available());
        assert!(!Device::Gpu(usize::MAX).is_available());
    }

    #[cfg(not(feature = "gpu"))]
    #[test]
    fn no_accelerators_without_gpu_feature() {
        assert_eq!(Device::gpu_count(), 0);
        assert!(!Device::Gpu(0).is_available());
        assert_eq!(Device::best_available(), Device::Cpu);
    }
}

#![warn(missing_docs)] // Enforce documentation coverage at the warning level

//! # dist-finetune
//!
//! `dist-finetune` holds the utilities a data-parallel fine-tuning job is built
//! from: joining a process group, serving text/label examples, scoring a batch,
//! and running a small reduction on a chosen compute device.
//!
//! There is no model here. The batch loss scores random stand-in logits, and no
//! collective operation is ever issued on the group; the crate fixes the
//! contracts around those pieces so a real model can be dropped in later.
//!
//! ## Key Components:
//!
//! *   [`setup`] / [`cleanup`]: Form and release a [`ProcessGroup`] for a
//!     `(rank, world_size)` pair. The handle also releases on drop.
//! *   [`CustomDataset`]: Read-only texts paired with integer labels, with
//!     sharding and batching helpers.
//! *   [`process_batch`]: Mean cross-entropy over a batch, calling a
//!     response callback once per prompt.
//! *   [`gpu_tensor_operation`]: Mean of a text's code points on a [`Device`].
//! *   [`Tensor`]: The minimal n-dimensional array the above are expressed in.
//!
//! ## Features
//!
//! *   `gpu`: Enables the OpenCL backend (`ocl` crate) so `Device::Gpu(_)` can run work.
//!     Requires OpenCL drivers and runtime to be installed on the system.
//! *   `cli`: Builds the `dist-finetune` binary.
//!
//! ## Example
//!
//! ```no_run
//! use dist_finetune::{cleanup, process_batch, setup, Backend, CustomDataset, RendezvousConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RendezvousConfig { backend: Backend::Local, ..RendezvousConfig::default() };
//! let group = setup(0, 1, &config)?;
//!
//! let dataset = CustomDataset::new(vec!["good", "bad"], vec![1, 0])?;
//! for batch in dataset.batches(2)? {
//!     let loss = process_batch(&(), &batch.prompts, &batch.labels, |p| p.to_uppercase())?;
//!     println!("loss: {:.4}", loss.item()?);
//! }
//!
//! cleanup(group);
//! # Ok(())
//! # }
//! ```

// --- Module Declarations ---

/// Batch-loss computation over prompts and labels.
pub mod batch;
/// Rendezvous configuration read from the environment.
pub mod config;
/// Text/label datasets.
pub mod dataset;
/// Compute device identifiers and availability.
pub mod device;
/// Process-group setup and teardown.
pub mod distributed;
/// Forward-only tensor functions (addition, cross-entropy).
pub mod funcs;
/// OpenCL kernels for accelerator devices.
#[cfg(feature = "gpu")]
pub mod gpu;
/// Process-wide log setup.
pub mod logging;
/// Device-placed tensor operations.
pub mod ops;
/// The multi-dimensional array (`Tensor`) implementation.
pub mod tensor;

// --- Public API Re-exports ---

pub use batch::{process_batch, process_batch_with_rng, BatchError};
pub use config::{Backend, BackendError, ConfigError, RendezvousConfig};
pub use dataset::{Batch, CustomDataset, DatasetEntry, DatasetError};
pub use device::{Device, DeviceError};
pub use distributed::{cleanup, setup, setup_from_env, DistError, ProcessGroup};
pub use logging::setup_logging;
pub use ops::{gpu_tensor_operation, OpError};
pub use tensor::{GeneralTensor, Tensor, TensorError};

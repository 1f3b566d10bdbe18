use ocl::flags::DEVICE_TYPE_GPU;
use ocl::{Buffer, Context, Device as ClDevice, Kernel, MemFlags, Platform, Program, Queue};
use thiserror::Error;

// One work item sums the whole buffer; inputs here are short strings.
const MEAN_KERNEL: &str = r#"
__kernel void mean_reduce(__global const float *input,
                          __global float *output,
                          uint n)
{
    if (get_global_id(0) == 0) {
        float acc = 0.0f;
        for (uint i = 0; i < n; i++) {
            acc += input[i];
        }
        output[0] = acc / (float)n;
    }
}"#;

/// Errors produced by the OpenCL backend.
#[derive(Debug, Error)]
pub enum GpuError {
    /// No accelerator exists at the requested index.
    #[error("no OpenCL GPU at index {0}")]
    NoSuchDevice(usize),
    /// The input does not fit the kernel's element counter.
    #[error("input of {0} values is too large for the kernel")]
    TooLarge(usize),
    /// Any error reported by the OpenCL runtime.
    #[error("OpenCL error: {0}")]
    OpenCl(#[from] ocl::Error),
}

/// All OpenCL GPU devices, across platforms, in discovery order.
fn gpu_devices() -> Vec<(Platform, ClDevice)> {
    Platform::list()
        .into_iter()
        .flat_map(|platform| {
            ClDevice::list(platform, Some(DEVICE_TYPE_GPU))
                .unwrap_or_default()
                .into_iter()
                .map(move |device| (platform, device))
        })
        .collect()
}

/// Number of OpenCL GPU devices visible to this process.
pub fn device_count() -> usize {
    gpu_devices().len()
}

/// Uploads `values` to the GPU at `index` and returns their mean.
///
/// # Errors
/// Returns `GpuError` if the device does not exist or any OpenCL call fails.
#[allow(unsafe_code)]
pub fn mean(values: &[f32], index: usize) -> Result<f32, GpuError> {
    let (platform, device) = gpu_devices()
        .into_iter()
        .nth(index)
        .ok_or(GpuError::NoSuchDevice(index))?;
    let n = u32::try_from(values.len()).map_err(|_| GpuError::TooLarge(values.len()))?;

    let context = Context::builder().platform(platform).devices(device).build()?;
    let queue = Queue::new(&context, device, None)?;
    let program = Program::builder()
        .devices(device)
        .src(MEAN_KERNEL)
        .build(&context)?;

    let input = Buffer::<f32>::builder()
        .queue(queue.clone())
        .flags(MemFlags::new().read_only())
        .len(values.len())
        .copy_host_slice(values)
        .build()?;
    let output = Buffer::<f32>::builder()
        .queue(queue.clone())
        .flags(MemFlags::new().write_only())
        .len(1)
        .build()?;

    let kernel = Kernel::builder()
        .program(&program)
        .name("mean_reduce")
        .queue(queue.clone())
        .global_work_size(1)
        .arg(&input)
        .arg(&output)
        .arg(n)
        .build()?;

    // SAFETY: the kernel reads `n` elements of `input` and writes one element
    // of `output`; both buffers were allocated with those lengths above.
    unsafe {
        kernel.enq()?;
    }

    let mut result = vec![0.0f32; 1];
    output.read(&mut result).enq()?;
    queue.finish()?;
    Ok(result[0])
}

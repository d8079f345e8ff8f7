//! GPU backend detection and initialization

use crate::error::{CcaError, Result};
use burn::backend::wgpu::{Wgpu, WgpuDevice};
use burn::tensor::Tensor;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::OnceLock;

pub(crate) type Backend = Wgpu;

static GPU_AVAILABLE: OnceLock<bool> = OnceLock::new();

/// Check if a wgpu adapter can run a kernel
///
/// The probe runs once per process. wgpu panics when no adapter can be found,
/// so the probe is isolated with `catch_unwind`.
pub fn is_gpu_available() -> bool {
    *GPU_AVAILABLE.get_or_init(|| {
        catch_unwind(AssertUnwindSafe(|| {
            let device = WgpuDevice::default();
            Tensor::<Backend, 1>::zeros([1], &device).into_data();
        }))
        .is_ok()
    })
}

/// GPU backend wrapper
#[derive(Debug)]
pub struct GpuBackend {
    device: WgpuDevice,
}

impl GpuBackend {
    /// Create a backend on the default adapter
    pub fn new() -> Result<Self> {
        if !is_gpu_available() {
            return Err(CcaError::GpuUnavailable(
                "wgpu could not initialize an adapter".to_string(),
            ));
        }
        Ok(Self {
            device: WgpuDevice::default(),
        })
    }

    /// Get the device
    pub fn device(&self) -> &WgpuDevice {
        &self.device
    }
}

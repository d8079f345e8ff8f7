//! Batched cross-products on the GPU
//!
//! The Q-template is uploaded once per setup. Each batch uploads its stacked
//! signal bases, runs one matrix product on the device and downloads the
//! `[rows, targets·columns]` result for the host-side SVD.

use crate::device::HostTemplate;
use crate::error::{CcaError, Result};
use crate::gpu::backend::{Backend, GpuBackend};
use burn::backend::wgpu::WgpuDevice;
use burn::tensor::{Tensor, TensorData};
use ndarray::{Array2, ArrayView2};
use std::sync::Arc;

/// Stacked Q-template resident on the GPU
pub struct DeviceTemplate {
    backend: Arc<GpuBackend>,
    stacked: Tensor<Backend, 2>,
    targets: usize,
    samples: usize,
    columns: usize,
}

impl std::fmt::Debug for DeviceTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceTemplate")
            .field("device", self.backend.device())
            .field("targets", &self.targets)
            .field("samples", &self.samples)
            .field("columns", &self.columns)
            .finish()
    }
}

impl DeviceTemplate {
    /// Copy a host template to the backend's device
    pub fn upload(backend: Arc<GpuBackend>, host: &HostTemplate) -> Self {
        let stacked = to_device(host.stacked(), backend.device());
        Self {
            backend,
            stacked,
            targets: host.targets_count(),
            samples: host.samples_count(),
            columns: host.columns(),
        }
    }

    /// `bases` (`[rows, samples]`) times the stacked template, `[rows, targets·columns]`
    pub fn cross_products(&self, bases: ArrayView2<f64>) -> Result<Array2<f64>> {
        let (rows, samples) = bases.dim();
        if samples != self.samples {
            return Err(CcaError::ShapeMismatch(format!(
                "bases have {} samples, device template has {}",
                samples, self.samples
            )));
        }

        let lhs = to_device(bases, self.backend.device());
        let product = lhs.matmul(self.stacked.clone());
        let values = product
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| CcaError::Gpu(format!("failed to read back cross-products: {:?}", e)))?;

        Ok(Array2::from_shape_vec(
            (rows, self.targets * self.columns),
            values.into_iter().map(f64::from).collect(),
        )?)
    }

    pub fn targets_count(&self) -> usize {
        self.targets
    }

    pub fn samples_count(&self) -> usize {
        self.samples
    }

    pub fn columns(&self) -> usize {
        self.columns
    }
}

fn to_device(values: ArrayView2<f64>, device: &WgpuDevice) -> Tensor<Backend, 2> {
    let (rows, cols) = values.dim();
    // `iter` walks in logical row-major order regardless of memory layout
    let data: Vec<f32> = values.iter().map(|&v| v as f32).collect();
    Tensor::from_data(TensorData::new(data, [rows, cols]), device)
}

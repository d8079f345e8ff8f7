//! GPU acceleration for batched cross-products
//!
//! ## Implementation Details
//!
//! - **Backend**: WGPU (WebGPU) via burn framework
//! - **Device work**: the single GEMM of all signal bases against the stacked
//!   Q-template of every target
//! - **Host work**: QR and SVD (burn exposes neither); both act on small
//!   matrices, the GEMM dominates for large batches
//! - **Precision**: device arithmetic is `f32`
//! - **Fallback**: none. Requesting the GPU without a usable adapter is a setup error.
//!
//! ## Usage
//!
//! Enable `--features gpu` and set `device: ProcessingDevice::Gpu` in the
//! configuration. Explicit multithreading must stay disabled.

mod backend;
mod batched;

pub use backend::{GpuBackend, is_gpu_available};
pub use batched::DeviceTemplate;

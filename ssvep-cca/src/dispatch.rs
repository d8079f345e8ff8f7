//! Backend and concurrency selection, decided once at setup

use crate::config::{CcaConfig, ProcessingDevice};
use crate::device::{BackendKind, ComputeBackend};
use crate::error::{CcaError, Result};
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::info;

/// How CPU work is scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concurrency {
    /// Whole batches per call; per-item steps use rayon's global pool
    Vectorized,
    /// One (signal, voter) unit per task on a dedicated pool
    WorkerPool { threads: usize },
}

/// Resolved execution strategy, passed to every extraction call
#[derive(Debug, Clone)]
pub struct DispatchPlan {
    backend: ComputeBackend,
    concurrency: Concurrency,
}

impl DispatchPlan {
    /// Pick the backend and concurrency mode for a validated configuration
    ///
    /// A GPU request fails here when no adapter is usable or the crate was
    /// built without the `gpu` feature. There is no fallback to the CPU.
    pub fn resolve(config: &CcaConfig) -> Result<Self> {
        if config.device == ProcessingDevice::Gpu && config.explicit_multithreading > 0 {
            return Err(CcaError::ConfigError(
                "Explicit multithreading cannot be combined with GPU processing".to_string(),
            ));
        }

        let backend = match config.device {
            ProcessingDevice::Cpu => ComputeBackend::Cpu,
            ProcessingDevice::Gpu => gpu_backend()?,
        };
        let concurrency = match config.explicit_multithreading {
            0 => Concurrency::Vectorized,
            threads => Concurrency::WorkerPool { threads },
        };

        let plan = Self {
            backend,
            concurrency,
        };
        info!("Processing on {} ({})", plan.backend.kind(), plan.describe_concurrency());
        Ok(plan)
    }

    pub fn backend(&self) -> &ComputeBackend {
        &self.backend
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn concurrency(&self) -> Concurrency {
        self.concurrency
    }

    /// Dedicated pool for worker-pool extraction, `None` in vectorized mode
    pub fn build_worker_pool(&self) -> Result<Option<ThreadPool>> {
        match self.concurrency {
            Concurrency::Vectorized => Ok(None),
            Concurrency::WorkerPool { threads } => Ok(Some(
                ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|i| format!("cca-worker-{}", i))
                    .build()?,
            )),
        }
    }

    fn describe_concurrency(&self) -> String {
        match self.concurrency {
            Concurrency::Vectorized => "vectorized batches".to_string(),
            Concurrency::WorkerPool { threads } => format!("{} worker threads", threads),
        }
    }
}

#[cfg(feature = "gpu")]
fn gpu_backend() -> Result<ComputeBackend> {
    use crate::gpu::GpuBackend;
    use std::sync::Arc;

    Ok(ComputeBackend::Gpu(Arc::new(GpuBackend::new()?)))
}

#[cfg(not(feature = "gpu"))]
fn gpu_backend() -> Result<ComputeBackend> {
    Err(CcaError::GpuUnavailable(
        "built without the `gpu` feature".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> CcaConfig {
        CcaConfig {
            target_frequencies: vec![10.0, 12.0],
            ..Default::default()
        }
    }

    #[test]
    fn test_default_plan_is_vectorized_cpu() {
        let plan = DispatchPlan::resolve(&base()).unwrap();
        assert_eq!(plan.backend_kind(), BackendKind::Host);
        assert_eq!(plan.concurrency(), Concurrency::Vectorized);
        assert!(plan.build_worker_pool().unwrap().is_none());
    }

    #[test]
    fn test_worker_pool_has_requested_threads() {
        let config = CcaConfig {
            explicit_multithreading: 3,
            ..base()
        };
        let plan = DispatchPlan::resolve(&config).unwrap();
        assert_eq!(plan.concurrency(), Concurrency::WorkerPool { threads: 3 });
        let pool = plan.build_worker_pool().unwrap().unwrap();
        assert_eq!(pool.current_num_threads(), 3);
    }

    #[test]
    fn test_gpu_with_threads_rejected() {
        let config = CcaConfig {
            device: ProcessingDevice::Gpu,
            explicit_multithreading: 2,
            ..base()
        };
        assert!(matches!(
            DispatchPlan::resolve(&config),
            Err(CcaError::ConfigError(_))
        ));
    }

    #[cfg(not(feature = "gpu"))]
    #[test]
    fn test_gpu_without_feature_is_unavailable() {
        let config = CcaConfig {
            device: ProcessingDevice::Gpu,
            ..base()
        };
        assert!(matches!(
            DispatchPlan::resolve(&config),
            Err(CcaError::GpuUnavailable(_))
        ));
    }
}

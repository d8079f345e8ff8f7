//! Compute backends and per-device template replicas
//!
//! Replicas are created once during setup and never mutated afterwards, so
//! extraction calls (and worker threads) can share them without locking.

use crate::error::{CcaError, Result};
use crate::template::ReferenceTemplate;
use ndarray::{Array2, ArrayView2, ArrayView3};
use std::sync::Arc;

#[cfg(feature = "gpu")]
use crate::gpu::{DeviceTemplate, GpuBackend};

/// Index of a device replica
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceId(pub usize);

/// Where an array lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Host,
    Gpu,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Host => write!(f, "CPU"),
            BackendKind::Gpu => write!(f, "GPU"),
        }
    }
}

/// Numeric backend chosen at setup
#[derive(Debug, Clone)]
pub enum ComputeBackend {
    Cpu,
    #[cfg(feature = "gpu")]
    Gpu(Arc<GpuBackend>),
}

impl ComputeBackend {
    pub fn kind(&self) -> BackendKind {
        match self {
            ComputeBackend::Cpu => BackendKind::Host,
            #[cfg(feature = "gpu")]
            ComputeBackend::Gpu(_) => BackendKind::Gpu,
        }
    }
}

/// Side-by-side target blocks, `[targets, samples, columns]` -> `[samples, targets·columns]`
pub fn stack_targets(cube: ArrayView3<f64>) -> Result<Array2<f64>> {
    let (targets, samples, columns) = cube.dim();
    Ok(cube
        .permuted_axes([1, 0, 2])
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order((samples, targets * columns))?)
}

/// Host-resident template, target blocks side by side
#[derive(Debug)]
pub struct HostTemplate {
    stacked: Array2<f64>,
    targets: usize,
    samples: usize,
    columns: usize,
}

impl HostTemplate {
    pub fn new(cube: ArrayView3<f64>) -> Result<Self> {
        let (targets, samples, columns) = cube.dim();
        Ok(Self {
            stacked: stack_targets(cube)?,
            targets,
            samples,
            columns,
        })
    }

    /// `[samples, targets·columns]`
    pub fn stacked(&self) -> ArrayView2<'_, f64> {
        self.stacked.view()
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

/// A template copy owned by one backend
#[derive(Debug, Clone)]
pub enum TemplateReplica {
    Host(Arc<HostTemplate>),
    #[cfg(feature = "gpu")]
    Device(Arc<DeviceTemplate>),
}

impl TemplateReplica {
    /// Which backend owns this replica
    pub fn backend(&self) -> BackendKind {
        match self {
            TemplateReplica::Host(_) => BackendKind::Host,
            #[cfg(feature = "gpu")]
            TemplateReplica::Device(_) => BackendKind::Gpu,
        }
    }

    pub fn targets_count(&self) -> usize {
        match self {
            TemplateReplica::Host(t) => t.targets_count(),
            #[cfg(feature = "gpu")]
            TemplateReplica::Device(t) => t.targets_count(),
        }
    }

    pub fn samples_count(&self) -> usize {
        match self {
            TemplateReplica::Host(t) => t.samples_count(),
            #[cfg(feature = "gpu")]
            TemplateReplica::Device(t) => t.samples_count(),
        }
    }

    pub fn columns(&self) -> usize {
        match self {
            TemplateReplica::Host(t) => t.columns(),
            #[cfg(feature = "gpu")]
            TemplateReplica::Device(t) => t.columns(),
        }
    }

    fn replicate(cube: ArrayView3<f64>, backend: &ComputeBackend) -> Result<Self> {
        let host = HostTemplate::new(cube)?;
        match backend {
            ComputeBackend::Cpu => Ok(TemplateReplica::Host(Arc::new(host))),
            #[cfg(feature = "gpu")]
            ComputeBackend::Gpu(gpu) => Ok(TemplateReplica::Device(Arc::new(
                DeviceTemplate::upload(Arc::clone(gpu), &host),
            ))),
        }
    }
}

/// Read-only map from device id to replica
#[derive(Debug, Clone)]
pub struct ReplicaRegistry<R> {
    replicas: Vec<R>,
}

impl<R> ReplicaRegistry<R> {
    pub fn from_replicas(replicas: Vec<R>) -> Self {
        Self { replicas }
    }

    pub fn get(&self, device: DeviceId) -> Result<&R> {
        self.replicas.get(device.0).ok_or_else(|| {
            CcaError::ConfigError(format!(
                "no replica for device {} ({} available)",
                device.0,
                self.replicas.len()
            ))
        })
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }
}

/// Replicas of the centered template and of its Q factor
#[derive(Debug, Clone)]
pub struct TemplateReplicas {
    pub template: ReplicaRegistry<TemplateReplica>,
    pub q_template: ReplicaRegistry<TemplateReplica>,
}

impl TemplateReplicas {
    /// One replica per device of `backend`
    pub fn replicate(template: &ReferenceTemplate, backend: &ComputeBackend) -> Result<Self> {
        Ok(Self {
            template: ReplicaRegistry::from_replicas(vec![TemplateReplica::replicate(
                template.template(),
                backend,
            )?]),
            q_template: ReplicaRegistry::from_replicas(vec![TemplateReplica::replicate(
                template.q_template(),
                backend,
            )?]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CcaConfig;

    fn template() -> ReferenceTemplate {
        let config = CcaConfig {
            harmonics_count: 2,
            target_frequencies: vec![8.0, 10.0],
            sampling_frequency: 128.0,
            ..Default::default()
        };
        ReferenceTemplate::build(&config, 128).unwrap()
    }

    #[test]
    fn test_cpu_replicas_live_on_host() {
        let replicas = TemplateReplicas::replicate(&template(), &ComputeBackend::Cpu).unwrap();
        assert_eq!(replicas.q_template.len(), 1);
        let replica = replicas.q_template.get(DeviceId(0)).unwrap();
        assert_eq!(replica.backend(), BackendKind::Host);
        assert_eq!(replica.targets_count(), 2);
        assert_eq!(replica.samples_count(), 128);
        assert_eq!(replica.columns(), 4);
    }

    #[test]
    fn test_unknown_device_rejected() {
        let replicas = TemplateReplicas::replicate(&template(), &ComputeBackend::Cpu).unwrap();
        assert!(replicas.q_template.get(DeviceId(3)).is_err());
    }

    #[test]
    fn test_host_template_stacking_matches_cube() {
        let template = template();
        let cube = template.q_template();
        let host = HostTemplate::new(cube).unwrap();
        assert_eq!(host.stacked().dim(), (128, 8));
        assert_eq!(
            (host.targets_count(), host.samples_count(), host.columns()),
            cube.dim()
        );
        for ((target, n, c), &v) in cube.indexed_iter() {
            assert_eq!(host.stacked()[[n, target * 4 + c]], v);
        }
    }
}

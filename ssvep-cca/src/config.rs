use crate::error::{CcaError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Processing device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingDevice {
    #[default]
    Cpu,
    Gpu,
}

/// How the orthonormal basis of a signal or template is computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QrMethod {
    /// LAPACK Householder QR through `ndarray-linalg`
    #[default]
    Householder,
    /// Modified Gram-Schmidt, no LAPACK call
    GramSchmidt,
}

/// CCA feature extractor configuration
///
/// Filter-bank, time-delay embedding and filtering parameters belong to the
/// preprocessing stage and are not part of this configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CcaConfig {
    /// Number of harmonics per target in the reference template (typically 3 to 5)
    pub harmonics_count: usize,

    /// Stimulation frequency of each target, in Hz
    pub target_frequencies: Vec<f64>,

    /// Sampling rate of the signal, in samples per second
    pub sampling_frequency: f64,

    /// Samples per signal. When set, the template is built during setup;
    /// otherwise it is learned from the signal pool before voting.
    pub samples_count: Option<usize>,

    /// Keep only the largest canonical correlation per target
    pub max_correlation_only: bool,

    /// Number of electrode selections (voters)
    pub voters_count: usize,

    /// Seed for random electrode selection
    pub random_seed: u64,

    /// Processing device
    pub device: ProcessingDevice,

    /// Maximum number of (signal, voter) pairs processed in one batch
    pub max_batch_size: usize,

    /// Worker threads for explicit multithreading, 0 disables it
    pub explicit_multithreading: usize,

    /// Orthogonalization routine
    pub qr_method: QrMethod,
}

impl Default for CcaConfig {
    fn default() -> Self {
        Self {
            harmonics_count: 3,
            target_frequencies: Vec::new(),
            sampling_frequency: 256.0,
            samples_count: None,
            max_correlation_only: true,
            voters_count: 1,
            random_seed: 0,
            device: ProcessingDevice::Cpu,
            max_batch_size: 16,
            explicit_multithreading: 0,
            qr_method: QrMethod::Householder,
        }
    }
}

impl CcaConfig {
    pub fn targets_count(&self) -> usize {
        self.target_frequencies.len()
    }

    /// Columns of the reference template: one sine and one cosine per harmonic
    pub fn template_columns(&self) -> usize {
        2 * self.harmonics_count
    }

    /// Check parameter ranges and flag combinations
    pub fn validate(&self) -> Result<()> {
        if self.harmonics_count == 0 {
            return Err(CcaError::ConfigError(
                "harmonics_count must be a positive integer".to_string(),
            ));
        }
        if self.target_frequencies.is_empty() {
            return Err(CcaError::ConfigError(
                "target_frequencies must contain at least one frequency".to_string(),
            ));
        }
        if let Some(f) = self
            .target_frequencies
            .iter()
            .find(|f| !f.is_finite() || **f <= 0.0)
        {
            return Err(CcaError::ConfigError(format!(
                "Target frequencies must be positive, got {}",
                f
            )));
        }
        if !self.sampling_frequency.is_finite() || self.sampling_frequency <= 0.0 {
            return Err(CcaError::ConfigError(format!(
                "sampling_frequency must be positive, got {}",
                self.sampling_frequency
            )));
        }
        if self.samples_count == Some(0) {
            return Err(CcaError::ConfigError(
                "samples_count must be positive when provided".to_string(),
            ));
        }
        if self.voters_count == 0 {
            return Err(CcaError::ConfigError(
                "voters_count must be a positive integer".to_string(),
            ));
        }
        if self.max_batch_size == 0 {
            return Err(CcaError::ConfigError(
                "max_batch_size must be a positive integer".to_string(),
            ));
        }
        if self.device == ProcessingDevice::Gpu && self.explicit_multithreading > 0 {
            return Err(CcaError::ConfigError(
                "Explicit multithreading cannot be combined with GPU processing".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a configuration from a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_json(&value)
    }

    /// Build a configuration from a JSON object.
    ///
    /// Missing keys keep their default value; unknown keys and keys with the
    /// wrong type fail with `ConfigError`. Flags that are not JSON booleans fail
    /// with `TypeCoercion`. `use_gpu` is accepted in place of `device`,
    /// `samples_count: 0` means "learn it from the signal pool", and a
    /// non-positive `explicit_multithreading` disables worker threads.
    pub fn from_json(value: &Value) -> Result<Self> {
        let mut object = value
            .as_object()
            .ok_or_else(|| CcaError::ConfigError("Configuration must be a JSON object".to_string()))?
            .clone();

        if let Some(v) = object.get("max_correlation_only") {
            parse_flag("max_correlation_only", v)?;
        }
        if let Some(v) = object.remove("use_gpu") {
            let device = if parse_flag("use_gpu", &v)? {
                ProcessingDevice::Gpu
            } else {
                ProcessingDevice::Cpu
            };
            let device = serde_json::to_value(device)?;
            if let Some(explicit) = object.get("device").filter(|d| **d != device) {
                return Err(CcaError::ConfigError(format!(
                    "'use_gpu' is {} but 'device' is {}",
                    v, explicit
                )));
            }
            object.insert("device".to_string(), device);
        }
        if object.get("samples_count").and_then(Value::as_u64) == Some(0) {
            object.insert("samples_count".to_string(), Value::Null);
        }
        if let Some(threads) = object.get_mut("explicit_multithreading") {
            if threads.as_i64().is_some_and(|n| n < 0) {
                *threads = Value::from(0);
            }
        }

        let config: CcaConfig = serde_json::from_value(Value::Object(object))
            .map_err(|e| CcaError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// Accept only JSON booleans for flags
pub fn parse_flag(flag: &str, value: &Value) -> Result<bool> {
    value.as_bool().ok_or_else(|| CcaError::TypeCoercion {
        flag: flag.to_string(),
        value: value.to_string(),
    })
}

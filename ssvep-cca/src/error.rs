use thiserror::Error;

#[derive(Error, Debug)]
pub enum CcaError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("GPU processing requested but no capable device is available: {0}")]
    GpuUnavailable(String),

    #[error(
        "Template matrix is not full rank: target {target} ({frequency} Hz) has rank {rank}, expected {expected}"
    )]
    TemplateRank {
        target: usize,
        frequency: f64,
        rank: usize,
        expected: usize,
    },

    #[error("Input signal is not full rank: trial {trial} has rank {rank}, expected {expected}")]
    RankDeficiency {
        trial: usize,
        rank: usize,
        expected: usize,
    },

    #[error("Insufficient samples: need at least {min} samples per signal, got {actual}")]
    InsufficientSamples { min: usize, actual: usize },

    #[error("Flag '{flag}' must be Boolean, got {value}")]
    TypeCoercion { flag: String, value: String },

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Numerical failure: {0}")]
    Numerical(String),

    #[error("Linear algebra error: {0}")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),

    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("Failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("GPU backend error: {0}")]
    Gpu(String),
}

impl CcaError {
    /// True for errors raised while validating configuration, before any data is touched
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CcaError::ConfigError(_) | CcaError::GpuUnavailable(_) | CcaError::TypeCoercion { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CcaError>;

/// Receives every unrecoverable error before it is returned to the caller.
///
/// The surrounding framework can install its own hook to terminate a session,
/// flag the trial as invalid, or forward the error to a supervisor. Errors are
/// always returned as well; the hook cannot turn a failure into a result.
pub trait FatalHook: Send + Sync {
    fn on_fatal(&self, error: &CcaError);
}

/// Default hook: log the error through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFatal;

impl FatalHook for LogFatal {
    fn on_fatal(&self, error: &CcaError) {
        tracing::error!("{}", error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl FatalHook for Recorder {
        fn on_fatal(&self, error: &CcaError) {
            self.0.lock().unwrap().push(error.to_string());
        }
    }

    #[test]
    fn test_configuration_classification() {
        assert!(CcaError::ConfigError("x".into()).is_configuration());
        assert!(CcaError::GpuUnavailable("x".into()).is_configuration());
        assert!(
            CcaError::TypeCoercion {
                flag: "f".into(),
                value: "1.5".into()
            }
            .is_configuration()
        );
        assert!(!CcaError::InsufficientSamples { min: 2, actual: 1 }.is_configuration());
    }

    #[test]
    fn test_hook_receives_message() {
        let hook = Recorder::default();
        hook.on_fatal(&CcaError::RankDeficiency {
            trial: 3,
            rank: 7,
            expected: 8,
        });
        let messages = hook.0.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("trial 3"));
    }
}

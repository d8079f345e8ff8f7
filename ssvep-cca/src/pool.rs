//! Centered multichannel signal pool, `[trials, electrodes, samples]`

use crate::error::{CcaError, Result};
use crate::linalg::{center_along, matrix_rank};
use ndarray::{Array3, ArrayView2, ArrayView3, Axis};
use rayon::prelude::*;
use tracing::debug;

/// Signals shared read-only by every extraction call
///
/// The pool owns its buffer. `SignalPool::new` takes the caller's array by value
/// and centers it in place; `SignalPool::from_view` copies first. Either way the
/// caller never observes a mutated buffer it still holds.
#[derive(Debug, Clone)]
pub struct SignalPool {
    signals: Array3<f64>,
}

impl SignalPool {
    /// Take ownership of `signals` and remove each channel's mean
    pub fn new(mut signals: Array3<f64>) -> Result<Self> {
        let (trials, electrodes, samples) = signals.dim();
        if trials == 0 || electrodes == 0 {
            return Err(CcaError::ShapeMismatch(format!(
                "signal pool must contain at least one trial and one electrode, got [{}, {}, {}]",
                trials, electrodes, samples
            )));
        }
        if samples < 2 {
            return Err(CcaError::InsufficientSamples {
                min: 2,
                actual: samples,
            });
        }
        center_along(&mut signals, Axis(2));
        Ok(Self { signals })
    }

    /// Copy and center a borrowed array
    pub fn from_view(signals: ArrayView3<f64>) -> Result<Self> {
        Self::new(signals.to_owned())
    }

    /// Every trial must have rank `min(electrodes, samples)`
    ///
    /// Reports the first deficient trial in index order.
    pub fn validate_rank(&self) -> Result<()> {
        let expected = self.electrodes_count().min(self.samples_count());
        let ranks = self
            .signals
            .outer_iter()
            .into_par_iter()
            .map(matrix_rank)
            .collect::<Result<Vec<usize>>>()?;

        if let Some((trial, &rank)) = ranks.iter().enumerate().find(|(_, r)| **r < expected) {
            return Err(CcaError::RankDeficiency {
                trial,
                rank,
                expected,
            });
        }
        debug!("Signal pool rank check passed for {} trials", ranks.len());
        Ok(())
    }

    pub fn signals(&self) -> ArrayView3<'_, f64> {
        self.signals.view()
    }

    /// One trial, `[electrodes, samples]`
    pub fn trial(&self, index: usize) -> ArrayView2<'_, f64> {
        self.signals.index_axis(Axis(0), index)
    }

    pub fn trials_count(&self) -> usize {
        self.signals.len_of(Axis(0))
    }

    pub fn electrodes_count(&self) -> usize {
        self.signals.len_of(Axis(1))
    }

    pub fn samples_count(&self) -> usize {
        self.signals.len_of(Axis(2))
    }

    pub fn into_inner(self) -> Array3<f64> {
        self.signals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn noisy(trials: usize, electrodes: usize, samples: usize) -> Array3<f64> {
        Array3::from_shape_fn((trials, electrodes, samples), |(t, e, s)| {
            5.0 + ((s * (e + 2) + t * 7) as f64 * 0.731).sin() + (s as f64 * 0.05 * (e + 1) as f64).cos()
        })
    }

    #[test]
    fn test_pool_is_centered() {
        let pool = SignalPool::new(noisy(2, 4, 100)).unwrap();
        for channel in pool.signals().lanes(Axis(2)) {
            assert_abs_diff_eq!(channel.mean().unwrap(), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_from_view_leaves_caller_untouched() {
        let raw = noisy(1, 3, 50);
        let pool = SignalPool::from_view(raw.view()).unwrap();
        assert!(raw[[0, 0, 0]] > 3.0);
        assert!(pool.signals()[[0, 0, 0]] < 3.0);
    }

    #[test]
    fn test_duplicate_electrode_is_rank_deficient() {
        let mut raw = noisy(3, 4, 64);
        let copy = raw.slice(ndarray::s![2, 0, ..]).to_owned();
        raw.slice_mut(ndarray::s![2, 3, ..]).assign(&copy);

        let pool = SignalPool::new(raw).unwrap();
        match pool.validate_rank() {
            Err(CcaError::RankDeficiency {
                trial,
                rank,
                expected,
            }) => {
                assert_eq!(trial, 2);
                assert_eq!(rank, 3);
                assert_eq!(expected, 4);
            }
            other => panic!("expected rank deficiency, got {:?}", other),
        }
    }

    #[test]
    fn test_full_rank_pool_passes() {
        let pool = SignalPool::new(noisy(4, 5, 128)).unwrap();
        assert!(pool.validate_rank().is_ok());
    }

    #[test]
    fn test_single_sample_pool_rejected() {
        let result = SignalPool::new(Array3::zeros((2, 3, 1)));
        assert!(matches!(result, Err(CcaError::InsufficientSamples { .. })));
    }
}

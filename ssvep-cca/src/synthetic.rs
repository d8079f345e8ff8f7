//! Reproducible synthetic SSVEP recordings for tests, benches and the CLI

use ndarray::{Array3, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;

/// Generator of multichannel recordings dominated by one stimulation frequency
///
/// Each electrode sees the attended frequency with its own gain and phase,
/// a second harmonic scaled by `harmonic_gain`, uniform noise and a DC offset.
#[derive(Debug, Clone)]
pub struct SyntheticSsvep {
    pub electrodes_count: usize,
    pub samples_count: usize,
    pub sampling_frequency: f64,
    /// Half-width of the uniform noise
    pub noise_amplitude: f64,
    /// Second harmonic amplitude relative to the fundamental, 0 for a pure sinusoid
    pub harmonic_gain: f64,
    pub seed: u64,
}

impl Default for SyntheticSsvep {
    fn default() -> Self {
        Self {
            electrodes_count: 8,
            samples_count: 512,
            sampling_frequency: 256.0,
            noise_amplitude: 1.0,
            harmonic_gain: 0.4,
            seed: 0,
        }
    }
}

impl SyntheticSsvep {
    /// One trial per attended frequency, `[trials, electrodes, samples]`
    pub fn trials(&self, attended: &[f64]) -> Array3<f64> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut signals =
            Array3::<f64>::zeros((attended.len(), self.electrodes_count, self.samples_count));

        for (mut trial, &frequency) in signals.outer_iter_mut().zip(attended) {
            for mut channel in trial.axis_iter_mut(Axis(0)) {
                let gain = rng.random_range(0.5..1.5);
                let phase = rng.random_range(0.0..2.0 * PI);
                let offset = rng.random_range(-1.0..1.0);
                for (n, value) in channel.iter_mut().enumerate() {
                    let t = n as f64 / self.sampling_frequency;
                    let fundamental = (2.0 * PI * frequency * t + phase).sin();
                    let harmonic = (2.0 * PI * 2.0 * frequency * t + 2.0 * phase).cos();
                    let noise = if self.noise_amplitude > 0.0 {
                        rng.random_range(-self.noise_amplitude..self.noise_amplitude)
                    } else {
                        0.0
                    };
                    *value = gain * (fundamental + self.harmonic_gain * harmonic) + noise + offset;
                }
            }
        }

        signals
    }
}

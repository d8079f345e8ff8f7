//! Harmonic reference templates
//!
//! For every target frequency `f` the reference holds a sine and a cosine
//! column for each harmonic `h = 1..=H`, sampled at the signal's rate:
//!
//! ```text
//! [sin(2π·1·f·t), cos(2π·1·f·t), sin(2π·2·f·t), cos(2π·2·f·t), ...]
//! ```
//!
//! Columns are centered and an orthonormal basis (the Q factor of a QR
//! decomposition) is kept per target. Canonical correlations only depend on
//! the column space, so the engine works with the Q factor directly.

use crate::config::{CcaConfig, QrMethod};
use crate::device::stack_targets;
use crate::error::{CcaError, Result};
use crate::linalg::{center_along, matrix_rank, orthonormal_basis};
use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};
use std::f64::consts::PI;
use tracing::{info, warn};

/// Raw (uncentered) harmonic reference, `[targets, samples, 2·harmonics]`
pub fn harmonic_reference(
    harmonics_count: usize,
    target_frequencies: &[f64],
    sampling_frequency: f64,
    samples_count: usize,
) -> Array3<f64> {
    let columns = 2 * harmonics_count;
    Array3::from_shape_fn(
        (target_frequencies.len(), samples_count, columns),
        |(target, sample, column)| {
            let harmonic = (column / 2 + 1) as f64;
            let t = sample as f64 / sampling_frequency;
            let phase = 2.0 * PI * harmonic * target_frequencies[target] * t;
            if column % 2 == 0 { phase.sin() } else { phase.cos() }
        },
    )
}

/// Centered harmonic template and its per-target orthonormal basis
#[derive(Debug, Clone)]
pub struct ReferenceTemplate {
    template: Array3<f64>,
    q_template: Array3<f64>,
    target_frequencies: Vec<f64>,
    harmonics_count: usize,
}

impl ReferenceTemplate {
    /// Build the reference for a configuration and a known sample count
    pub fn build(config: &CcaConfig, samples_count: usize) -> Result<Self> {
        if samples_count < 2 {
            return Err(CcaError::InsufficientSamples {
                min: 2,
                actual: samples_count,
            });
        }

        let nyquist = config.sampling_frequency / 2.0;
        let highest = config
            .target_frequencies
            .iter()
            .copied()
            .fold(0.0_f64, f64::max)
            * config.harmonics_count as f64;
        if highest >= nyquist {
            warn!(
                "Highest harmonic ({:.2} Hz) reaches the Nyquist frequency ({:.2} Hz)",
                highest, nyquist
            );
        }

        let raw = harmonic_reference(
            config.harmonics_count,
            &config.target_frequencies,
            config.sampling_frequency,
            samples_count,
        );
        Self::from_reference(
            raw,
            &config.target_frequencies,
            config.harmonics_count,
            config.qr_method,
        )
    }

    /// Center and orthogonalize an existing raw reference
    ///
    /// `raw` is `[targets, samples, 2·harmonics]`; its first dimension must match
    /// `target_frequencies`.
    pub fn from_reference(
        mut raw: Array3<f64>,
        target_frequencies: &[f64],
        harmonics_count: usize,
        qr_method: QrMethod,
    ) -> Result<Self> {
        let (targets, samples, columns) = raw.dim();
        if targets != target_frequencies.len() || columns != 2 * harmonics_count {
            return Err(CcaError::ShapeMismatch(format!(
                "reference is [{}, {}, {}], expected [{}, samples, {}]",
                targets,
                samples,
                columns,
                target_frequencies.len(),
                2 * harmonics_count
            )));
        }
        if samples < 2 {
            return Err(CcaError::InsufficientSamples {
                min: 2,
                actual: samples,
            });
        }

        // Mostly centered already, except when the window cuts a period short
        center_along(&mut raw, Axis(1));

        let mut q_template = Array3::<f64>::zeros((targets, samples, columns.min(samples)));
        for (target, (reference, mut q)) in raw
            .outer_iter()
            .zip(q_template.outer_iter_mut())
            .enumerate()
        {
            let rank = matrix_rank(reference)?;
            if rank != columns {
                return Err(CcaError::TemplateRank {
                    target,
                    frequency: target_frequencies[target],
                    rank,
                    expected: columns,
                });
            }
            q.assign(&orthonormal_basis(reference, qr_method)?);
        }

        info!(
            "Built reference template: {} targets, {} samples, {} harmonics",
            targets, samples, harmonics_count
        );

        Ok(Self {
            template: raw,
            q_template,
            target_frequencies: target_frequencies.to_vec(),
            harmonics_count,
        })
    }

    /// Centered template, `[targets, samples, 2·harmonics]`
    pub fn template(&self) -> ArrayView3<'_, f64> {
        self.template.view()
    }

    /// Orthonormal basis per target, `[targets, samples, 2·harmonics]`
    pub fn q_template(&self) -> ArrayView3<'_, f64> {
        self.q_template.view()
    }

    /// Orthonormal basis of a single target, `[samples, 2·harmonics]`
    pub fn q_target(&self, target: usize) -> ArrayView2<'_, f64> {
        self.q_template.index_axis(Axis(0), target)
    }

    /// Q factors of all targets side by side, `[samples, targets·2·harmonics]`
    ///
    /// Column `t·2H + c` is column `c` of target `t`, so a single matrix product
    /// against this matrix yields the cross-products with every target at once.
    pub fn stacked_q(&self) -> Result<Array2<f64>> {
        stack_targets(self.q_template.view())
    }

    pub fn targets_count(&self) -> usize {
        self.template.len_of(Axis(0))
    }

    pub fn samples_count(&self) -> usize {
        self.template.len_of(Axis(1))
    }

    pub fn columns(&self) -> usize {
        self.template.len_of(Axis(2))
    }

    pub fn harmonics_count(&self) -> usize {
        self.harmonics_count
    }

    pub fn target_frequencies(&self) -> &[f64] {
        &self.target_frequencies
    }
}

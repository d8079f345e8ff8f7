//! Canonical correlation between signals and harmonic templates
//!
//! For a centered signal `X` (`[electrodes, samples]`) and a centered template
//! `Y` (`[samples, 2·harmonics]`), the canonical correlations are the singular
//! values of `Qxᵀ·Qy`, where `Qx` and `Qy` are orthonormal bases of the column
//! spaces of `Xᵀ` and `Y`. The engine computes every signal basis of a batch,
//! multiplies all of them against every target in one matrix product, and
//! takes the singular values block by block.

use crate::config::{CcaConfig, QrMethod};
use crate::device::{HostTemplate, TemplateReplica};
use crate::error::{CcaError, Result};
use crate::linalg::{center_along, clip_unit, orthonormal_basis, singular_values};
use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis, s};
use rayon::prelude::*;
use tracing::debug;

/// Computes and reduces canonical correlation coefficients
#[derive(Debug, Clone, Copy)]
pub struct CorrelationEngine {
    max_correlation_only: bool,
    features_count: usize,
    qr_method: QrMethod,
}

impl CorrelationEngine {
    /// Engine for signals with at most `electrodes_count` electrodes
    ///
    /// With `max_correlation_only` every (signal, target) pair yields one
    /// feature; otherwise `min(electrodes, 2·harmonics)` features, zero-padded
    /// for voters with fewer electrodes.
    pub fn new(config: &CcaConfig, electrodes_count: usize) -> Self {
        let features_count = if config.max_correlation_only {
            1
        } else {
            electrodes_count.min(config.template_columns())
        };
        Self {
            max_correlation_only: config.max_correlation_only,
            features_count,
            qr_method: config.qr_method,
        }
    }

    pub fn features_count(&self) -> usize {
        self.features_count
    }

    pub fn max_correlation_only(&self) -> bool {
        self.max_correlation_only
    }

    /// Raw coefficients for a centered batch
    ///
    /// `batch` is `[items, electrodes, samples]`. Returns `[items, targets, k]`
    /// with `k = min(electrodes, samples, 2·harmonics)`, each row sorted in
    /// descending order and clipped to [0, 1].
    pub fn canonical_correlations(
        &self,
        batch: ArrayView3<f64>,
        replica: &TemplateReplica,
    ) -> Result<Array3<f64>> {
        let (items, electrodes, samples) = batch.dim();
        let targets = replica.targets_count();
        let columns = replica.columns();

        if samples != replica.samples_count() {
            return Err(CcaError::ShapeMismatch(format!(
                "batch has {} samples, template has {}",
                samples,
                replica.samples_count()
            )));
        }
        let rank = electrodes.min(samples);
        let k = rank.min(columns);
        if items == 0 {
            return Ok(Array3::zeros((0, targets, k)));
        }

        // Orthonormal basis of each signal, stored row-wise as [rank, samples]
        let bases = batch
            .outer_iter()
            .into_par_iter()
            .map(|signal| {
                orthonormal_basis(signal.t(), self.qr_method).map(|q| q.reversed_axes())
            })
            .collect::<Result<Vec<Array2<f64>>>>()?;
        let views: Vec<ArrayView2<f64>> = bases.iter().map(|b| b.view()).collect();
        let stacked = ndarray::concatenate(Axis(0), &views)?;

        let products = match replica {
            TemplateReplica::Host(host) => stacked.dot(&host.stacked()),
            #[cfg(feature = "gpu")]
            TemplateReplica::Device(device) => device.cross_products(stacked.view())?,
        };
        debug!(
            "Cross-products for {} items on {}: [{}, {}]",
            items,
            replica.backend(),
            products.nrows(),
            products.ncols()
        );

        let blocks = (0..items)
            .into_par_iter()
            .map(|item| {
                item_coefficients(
                    products.slice(s![item * rank..(item + 1) * rank, ..]),
                    targets,
                    columns,
                )
            })
            .collect::<Result<Vec<Array2<f64>>>>()?;
        let views: Vec<ArrayView2<f64>> = blocks.iter().map(|b| b.view()).collect();
        Ok(ndarray::stack(Axis(0), &views)?)
    }

    /// Reduce raw coefficients `[items, targets, k]` to `[items, targets, features]`
    pub fn reduce(&self, raw: Array3<f64>) -> Result<Array3<f64>> {
        if self.max_correlation_only {
            // Coefficients are clipped to [0, 1], so 0 is a safe identity
            return Ok(raw
                .fold_axis(Axis(2), 0.0_f64, |acc, &v| acc.max(v))
                .insert_axis(Axis(2)));
        }

        let (items, targets, k) = raw.dim();
        if k == self.features_count {
            return Ok(raw);
        }
        if k > self.features_count {
            return Err(CcaError::ShapeMismatch(format!(
                "{} coefficients do not fit in {} features",
                k, self.features_count
            )));
        }
        let mut features = Array3::zeros((items, targets, self.features_count));
        features.slice_mut(s![.., .., ..k]).assign(&raw);
        Ok(features)
    }

    /// Reduced features of one signal, `[targets, features]`
    ///
    /// `signal` is `[electrodes, samples]`. It is centered on a private copy,
    /// so the call is independent of every other unit.
    pub fn correlate_unit(
        &self,
        signal: ArrayView2<f64>,
        template: &HostTemplate,
    ) -> Result<Array2<f64>> {
        let samples = signal.ncols();
        if samples != template.samples_count() {
            return Err(CcaError::ShapeMismatch(format!(
                "signal has {} samples, template has {}",
                samples,
                template.samples_count()
            )));
        }

        let mut centered = signal.to_owned();
        center_along(&mut centered, Axis(1));

        let basis = orthonormal_basis(centered.t(), self.qr_method)?.reversed_axes();
        let products = basis.dot(&template.stacked());
        let raw = item_coefficients(products.view(), template.targets_count(), template.columns())?;

        Ok(self
            .reduce(raw.insert_axis(Axis(0)))?
            .index_axis_move(Axis(0), 0))
    }
}

/// Singular values of each target block of one item's cross-products
///
/// `products` is `[rank, targets·columns]`; returns `[targets, min(rank, columns)]`.
fn item_coefficients(
    products: ArrayView2<f64>,
    targets: usize,
    columns: usize,
) -> Result<Array2<f64>> {
    let k = products.nrows().min(columns);
    let mut coefficients = Array2::zeros((targets, k));
    for (target, mut row) in coefficients.outer_iter_mut().enumerate() {
        let block = products.slice(s![.., target * columns..(target + 1) * columns]);
        let mut sigma = singular_values(block)?;
        clip_unit(&mut sigma);
        row.assign(&sigma.slice(s![..k]));
    }
    Ok(coefficients)
}

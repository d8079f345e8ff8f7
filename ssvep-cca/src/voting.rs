//! Ensemble classification from per-voter features

use crate::extractor::FeatureTensor;
use itertools::Itertools;
use ndarray::{Array2, Axis};
use serde::Serialize;

/// Per-signal vote counts and the winning target
#[derive(Debug, Clone, Serialize)]
pub struct VoteResult {
    /// Winning target per signal
    pub predictions: Vec<usize>,
    /// Votes received by each target, `[signals, targets]`
    pub votes: Array2<usize>,
    /// Summed largest correlation per target, `[signals, targets]`
    pub scores: Array2<f64>,
}

impl VoteResult {
    /// Fraction of predictions equal to `labels`
    pub fn accuracy(&self, labels: &[usize]) -> f64 {
        if self.predictions.is_empty() {
            return 0.0;
        }
        let hits = self
            .predictions
            .iter()
            .zip(labels)
            .filter(|(p, l)| p == l)
            .count();
        hits as f64 / self.predictions.len() as f64
    }
}

/// Every voter votes for the target with its largest correlation
///
/// The target with most votes wins. Ties go to the higher summed score, then
/// to the lower target index.
pub fn vote(features: &FeatureTensor) -> VoteResult {
    let signals = features.signals_count();
    let targets = features.targets_count();
    let mut votes = Array2::<usize>::zeros((signals, targets));
    let mut scores = Array2::<f64>::zeros((signals, targets));

    for (signal, per_voter) in features.features().outer_iter().enumerate() {
        for voter in per_voter.outer_iter() {
            // Features are sorted per target, so the first one is the largest
            let strongest = voter.index_axis(Axis(1), 0);
            if let Some(choice) = strongest.iter().position_max_by(|a, b| a.total_cmp(b)) {
                votes[[signal, choice]] += 1;
            }
            scores.row_mut(signal).scaled_add(1.0, &strongest);
        }
    }

    let predictions = (0..signals)
        .map(|signal| {
            (0..targets)
                .rev()
                .max_by(|&a, &b| {
                    votes[[signal, a]]
                        .cmp(&votes[[signal, b]])
                        .then(scores[[signal, a]].total_cmp(&scores[[signal, b]]))
                })
                .unwrap_or(0)
        })
        .collect();

    VoteResult {
        predictions,
        votes,
        scores,
    }
}

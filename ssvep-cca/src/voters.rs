//! Electrode selections, one per voter
//!
//! Each voter correlates a subset of the electrodes against the reference and
//! casts its own vote. Random subsets are drawn uniformly from the non-empty
//! members of the electrodes' power set, so repeats are possible and accepted.

use crate::error::{CcaError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSelectionSet {
    selections: Vec<Vec<usize>>,
    electrodes_count: usize,
}

impl ChannelSelectionSet {
    /// Validate explicit selections against the electrode count
    pub fn new(selections: Vec<Vec<usize>>, electrodes_count: usize) -> Result<Self> {
        if selections.is_empty() {
            return Err(CcaError::ConfigError(
                "at least one electrode selection is required".to_string(),
            ));
        }
        for (voter, selection) in selections.iter().enumerate() {
            if selection.is_empty() {
                return Err(CcaError::ConfigError(format!(
                    "selection for voter {} is empty",
                    voter
                )));
            }
            if let Some(&bad) = selection.iter().find(|&&e| e >= electrodes_count) {
                return Err(CcaError::ConfigError(format!(
                    "selection for voter {} references electrode {} but only {} exist",
                    voter, bad, electrodes_count
                )));
            }
        }
        Ok(Self {
            selections,
            electrodes_count,
        })
    }

    /// Every voter uses every electrode
    pub fn all_electrodes(electrodes_count: usize, voters_count: usize) -> Result<Self> {
        Self::new(
            vec![(0..electrodes_count).collect(); voters_count.max(1)],
            electrodes_count,
        )
    }

    /// Reproducible random subsets
    ///
    /// A single voter always gets all electrodes (no voting). Otherwise each
    /// electrode is included with probability 1/2, rejecting empty draws. The
    /// result is stably sorted by subset size so voters with the same number of
    /// electrodes are adjacent and can share a batch.
    pub fn random(electrodes_count: usize, voters_count: usize, seed: u64) -> Result<Self> {
        if electrodes_count == 0 {
            return Err(CcaError::ConfigError(
                "cannot select from zero electrodes".to_string(),
            ));
        }
        if voters_count <= 1 {
            return Self::all_electrodes(electrodes_count, 1);
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut selections: Vec<Vec<usize>> = (0..voters_count)
            .map(|_| loop {
                let subset: Vec<usize> = (0..electrodes_count)
                    .filter(|_| rng.random_bool(0.5))
                    .collect();
                if !subset.is_empty() {
                    break subset;
                }
            })
            .collect();
        selections.sort_by_key(|s| s.len());

        debug!(
            "Drew {} electrode selections from {} electrodes (seed {})",
            voters_count, electrodes_count, seed
        );
        Self::new(selections, electrodes_count)
    }

    pub fn get(&self, voter: usize) -> Option<&[usize]> {
        self.selections.get(voter).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = &[usize]> {
        self.selections.iter().map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.selections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selections.is_empty()
    }

    pub fn electrodes_count(&self) -> usize {
        self.electrodes_count
    }
}

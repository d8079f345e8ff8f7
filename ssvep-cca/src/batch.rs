//! Batch scheduling and assembly
//!
//! A batch covers a contiguous run of voters whose selections have the same
//! number of electrodes, crossed with a contiguous slice of signals. Assembly
//! gathers `[signals, voters, electrodes, samples]` and flattens the first two
//! axes with the voter index varying fastest; [`crate::debundle`] relies on
//! that ordering.

use crate::error::{CcaError, Result};
use crate::pool::SignalPool;
use crate::voters::ChannelSelectionSet;
use ndarray::{Array3, Array4, Axis, s};

/// One unit of batched work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchDescriptor {
    /// Index of the first voter in the batch
    pub first_voter: usize,
    /// Number of consecutive voters in the batch
    pub voters_in_batch: usize,
    /// Electrodes in every selection of the batch
    pub electrodes_per_selection: usize,
    /// First signal (inclusive)
    pub first_signal: usize,
    /// Last signal (exclusive)
    pub last_signal: usize,
}

impl BatchDescriptor {
    pub fn signals_in_slice(&self) -> usize {
        self.last_signal.saturating_sub(self.first_signal)
    }

    /// Items in the flattened batch
    pub fn len(&self) -> usize {
        self.signals_in_slice() * self.voters_in_batch
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check the signal and voter ranges against a pool and a selection set
    pub fn check_bounds(&self, trials_count: usize, voters_count: usize) -> Result<()> {
        if self.first_signal > self.last_signal || self.last_signal > trials_count {
            return Err(CcaError::ShapeMismatch(format!(
                "signal range {}..{} outside pool of {} trials",
                self.first_signal, self.last_signal, trials_count
            )));
        }
        let last_voter = self.first_voter.checked_add(self.voters_in_batch);
        if self.voters_in_batch == 0 || last_voter.is_none_or(|end| end > voters_count) {
            return Err(CcaError::ShapeMismatch(format!(
                "voters {}+{} outside selection set of {}",
                self.first_voter, self.voters_in_batch, voters_count
            )));
        }
        Ok(())
    }
}

/// Cover every (signal, voter) pair exactly once with batches of at most
/// `max_batch_size` items
pub fn schedule_batches(
    selections: &ChannelSelectionSet,
    signals_count: usize,
    max_batch_size: usize,
) -> Vec<BatchDescriptor> {
    let max_batch_size = max_batch_size.max(1);
    let sizes: Vec<usize> = selections.iter().map(|s| s.len()).collect();
    let mut batches = Vec::new();

    let mut run_start = 0;
    while run_start < sizes.len() {
        let electrodes = sizes[run_start];
        let run_end = sizes[run_start..]
            .iter()
            .position(|&n| n != electrodes)
            .map_or(sizes.len(), |offset| run_start + offset);

        let mut first_voter = run_start;
        while first_voter < run_end {
            let voters_in_batch = (run_end - first_voter).min(max_batch_size);
            let signals_per_slice = (max_batch_size / voters_in_batch).max(1);

            let mut first_signal = 0;
            while first_signal < signals_count {
                let last_signal = (first_signal + signals_per_slice).min(signals_count);
                batches.push(BatchDescriptor {
                    first_voter,
                    voters_in_batch,
                    electrodes_per_selection: electrodes,
                    first_signal,
                    last_signal,
                });
                first_signal = last_signal;
            }
            first_voter += voters_in_batch;
        }
        run_start = run_end;
    }

    batches
}

/// Gather a batch into `[signals·voters, electrodes, samples]`
pub fn assemble_batch(
    pool: &SignalPool,
    selections: &ChannelSelectionSet,
    descriptor: &BatchDescriptor,
) -> Result<Array3<f64>> {
    let BatchDescriptor {
        first_voter,
        voters_in_batch,
        electrodes_per_selection,
        first_signal,
        last_signal,
    } = *descriptor;

    descriptor.check_bounds(pool.trials_count(), selections.len())?;

    let signals_in_slice = last_signal - first_signal;
    let samples = pool.samples_count();
    let slice = pool.signals().slice_move(s![first_signal..last_signal, .., ..]);

    let mut batch = Array4::<f64>::zeros((
        signals_in_slice,
        voters_in_batch,
        electrodes_per_selection,
        samples,
    ));

    for (offset, mut voter_block) in batch.axis_iter_mut(Axis(1)).enumerate() {
        let voter = first_voter + offset;
        let selection = selections.get(voter).ok_or_else(|| {
            CcaError::ShapeMismatch(format!(
                "voter {} outside selection set of {}",
                voter,
                selections.len()
            ))
        })?;
        if selection.len() != electrodes_per_selection {
            return Err(CcaError::ShapeMismatch(format!(
                "voter {} selects {} electrodes, batch expects {}",
                voter,
                selection.len(),
                electrodes_per_selection
            )));
        }
        voter_block.assign(&slice.select(Axis(1), selection));
    }

    Ok(batch.into_shape_with_order((
        signals_in_slice * voters_in_batch,
        electrodes_per_selection,
        samples,
    ))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn pool(trials: usize, electrodes: usize, samples: usize) -> SignalPool {
        let data = Array3::from_shape_fn((trials, electrodes, samples), |(t, e, s)| {
            (t * 1000 + e * 100 + s) as f64
        });
        SignalPool::new(data).unwrap()
    }

    #[test]
    fn test_schedule_covers_every_pair_once() {
        let selections = ChannelSelectionSet::random(6, 23, 11).unwrap();
        let batches = schedule_batches(&selections, 7, 5);

        let mut seen = HashSet::new();
        for batch in &batches {
            assert!(batch.len() <= 5);
            for signal in batch.first_signal..batch.last_signal {
                for voter in batch.first_voter..batch.first_voter + batch.voters_in_batch {
                    assert_eq!(
                        selections.get(voter).unwrap().len(),
                        batch.electrodes_per_selection
                    );
                    assert!(seen.insert((signal, voter)), "pair visited twice");
                }
            }
        }
        assert_eq!(seen.len(), 7 * 23);
    }

    #[test]
    fn test_schedule_packs_signals_for_single_voter() {
        let selections = ChannelSelectionSet::all_electrodes(4, 1).unwrap();
        let batches = schedule_batches(&selections, 10, 4);
        let ranges: Vec<(usize, usize)> =
            batches.iter().map(|b| (b.first_signal, b.last_signal)).collect();
        assert_eq!(ranges, vec![(0, 4), (4, 8), (8, 10)]);
    }

    #[test]
    fn test_assembly_orders_voters_fastest() {
        let pool = pool(3, 4, 6);
        let selections =
            ChannelSelectionSet::new(vec![vec![0, 1], vec![2, 3], vec![3, 0]], 4).unwrap();
        let descriptor = BatchDescriptor {
            first_voter: 0,
            voters_in_batch: 3,
            electrodes_per_selection: 2,
            first_signal: 1,
            last_signal: 3,
        };

        let batch = assemble_batch(&pool, &selections, &descriptor).unwrap();
        assert_eq!(batch.dim(), (6, 2, 6));

        for signal in 0..2 {
            for voter in 0..3 {
                let item = batch.index_axis(Axis(0), signal * 3 + voter);
                let selection = selections.get(voter).unwrap();
                for (row, &electrode) in selection.iter().enumerate() {
                    assert_eq!(item.row(row), pool.trial(1 + signal).row(electrode));
                }
            }
        }
    }

    #[test]
    fn test_descriptor_bounds() {
        let descriptor = BatchDescriptor {
            first_voter: 1,
            voters_in_batch: 2,
            electrodes_per_selection: 2,
            first_signal: 0,
            last_signal: 3,
        };
        assert!(descriptor.check_bounds(3, 3).is_ok());
        // voters 1..3 do not fit in two selections
        assert!(descriptor.check_bounds(3, 2).is_err());
        assert!(descriptor.check_bounds(2, 3).is_err());

        let reversed = BatchDescriptor {
            first_signal: 2,
            last_signal: 1,
            ..descriptor
        };
        assert_eq!(reversed.signals_in_slice(), 0);
        assert!(matches!(
            reversed.check_bounds(3, 3),
            Err(CcaError::ShapeMismatch(_))
        ));

        let no_voters = BatchDescriptor {
            voters_in_batch: 0,
            ..descriptor
        };
        assert!(no_voters.check_bounds(3, 3).is_err());
    }

    #[test]
    fn test_assembly_rejects_mismatched_selection() {
        let pool = pool(2, 4, 6);
        let selections = ChannelSelectionSet::new(vec![vec![0, 1], vec![2]], 4).unwrap();
        let descriptor = BatchDescriptor {
            first_voter: 0,
            voters_in_batch: 2,
            electrodes_per_selection: 2,
            first_signal: 0,
            last_signal: 2,
        };
        assert!(matches!(
            assemble_batch(&pool, &selections, &descriptor),
            Err(CcaError::ShapeMismatch(_))
        ));
    }
}

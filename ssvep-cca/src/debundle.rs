//! Restore the per-signal, per-voter layout of batched results

use crate::error::{CcaError, Result};
use ndarray::{Array3, Array4};

/// `[signals·voters, targets, features]` -> `[signals, voters, targets, features]`
///
/// Items are expected with the voter index varying fastest, as produced by
/// `assemble_batch`. The reshape keeps every value and its order.
pub fn debundle(batched: Array3<f64>, voters_in_batch: usize) -> Result<Array4<f64>> {
    let (items, targets, features) = batched.dim();
    if voters_in_batch == 0 || items % voters_in_batch != 0 {
        return Err(CcaError::ShapeMismatch(format!(
            "{} batched items cannot be split across {} voters",
            items, voters_in_batch
        )));
    }

    let signals = items / voters_in_batch;
    let standard = if batched.is_standard_layout() {
        batched
    } else {
        batched.as_standard_layout().into_owned()
    };
    Ok(standard.into_shape_with_order((signals, voters_in_batch, targets, features))?)
}

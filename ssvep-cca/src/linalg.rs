//! Small dense linear-algebra helpers shared by the template builder and the
//! correlation engine.
//!
//! QR and SVD go through `ndarray-linalg` (LAPACK). A modified Gram-Schmidt
//! routine is kept for backends that have no QR primitive.

use crate::config::QrMethod;
use crate::error::{CcaError, Result};
use ndarray::{Array1, Array2, ArrayBase, ArrayView2, Axis, DataMut, RemoveAxis, s};
use ndarray_linalg::{QR, SVD};

/// Subtract the mean along `axis` in place
pub fn center_along<S, D>(array: &mut ArrayBase<S, D>, axis: Axis)
where
    S: DataMut<Elem = f64>,
    D: RemoveAxis,
{
    if let Some(means) = array.mean_axis(axis) {
        *array -= &means.insert_axis(axis);
    }
}

/// Orthonormal basis of the column space of `a` (`[rows, cols]`).
///
/// Returns the economy-size Q factor, `[rows, min(rows, cols)]`.
pub fn orthonormal_basis(a: ArrayView2<f64>, method: QrMethod) -> Result<Array2<f64>> {
    match method {
        QrMethod::Householder => {
            let (q, _r) = a.qr()?;
            Ok(q)
        }
        QrMethod::GramSchmidt => gram_schmidt(a),
    }
}

/// Modified Gram-Schmidt orthogonalization
///
/// Fails with `Numerical` if a column is (numerically) a combination of the
/// previous ones.
pub fn gram_schmidt(a: ArrayView2<f64>) -> Result<Array2<f64>> {
    let (rows, cols) = a.dim();
    let k = rows.min(cols);
    let mut q = a.slice(s![.., ..k]).to_owned();

    let max_norm = q
        .axis_iter(Axis(1))
        .map(|c| c.dot(&c).sqrt())
        .fold(0.0_f64, f64::max);
    let tolerance = max_norm * rows as f64 * f64::EPSILON;

    for j in 0..k {
        for i in 0..j {
            let qi = q.column(i).to_owned();
            let r = qi.dot(&q.column(j));
            q.column_mut(j).scaled_add(-r, &qi);
        }
        let norm = q.column(j).dot(&q.column(j)).sqrt();
        if norm <= tolerance {
            return Err(CcaError::Numerical(format!(
                "column {} is linearly dependent on the previous columns",
                j
            )));
        }
        q.column_mut(j).mapv_inplace(|x| x / norm);
    }

    Ok(q)
}

/// Singular values in descending order, without singular vectors
pub fn singular_values(a: ArrayView2<f64>) -> Result<Array1<f64>> {
    let (_, sigma, _) = a.svd(false, false)?;
    Ok(sigma)
}

/// Numerical rank, using the same tolerance as NumPy's `matrix_rank`:
/// `max(S) * max(rows, cols) * eps`
pub fn matrix_rank(a: ArrayView2<f64>) -> Result<usize> {
    let (rows, cols) = a.dim();
    if rows == 0 || cols == 0 {
        return Ok(0);
    }
    let sigma = singular_values(a)?;
    let largest = sigma.iter().copied().fold(0.0_f64, f64::max);
    let tolerance = largest * rows.max(cols) as f64 * f64::EPSILON;
    Ok(sigma.iter().filter(|&&v| v > tolerance).count())
}

/// Clamp correlation coefficients to [0, 1]
pub fn clip_unit(values: &mut Array1<f64>) {
    values.mapv_inplace(|v| v.clamp(0.0, 1.0));
}

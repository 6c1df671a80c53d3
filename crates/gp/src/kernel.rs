//! Squared-exponential covariance evaluation between two point sets.
//!
//! Both GP models of this crate use the same kernel family
//! `k(x, x') = sigma * exp(-0.5 * sum_d ((x_d - x'_d) / l_d)^2)`:
//! the single-fidelity model with one length-scale per input dimension,
//! the multi-fidelity model with a single isotropic length-scale.
//! The evaluation is closed-form as it takes part in a likelihood that
//! gets differentiated during hyperparameter training.

use ndarray::{Array1, Array2, ArrayBase, Data, Ix2};

/// Anisotropic squared-exponential covariance between rows of `a` (m, d)
/// and rows of `b` (n, d), giving a (m, n) matrix.
///
/// `lengthscales` holds one strictly positive value per input dimension.
/// Zero-row operands yield the corresponding zero-shaped matrix.
pub fn squared_exponential(
    a: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    b: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    output_scale: f64,
    lengthscales: &Array1<f64>,
) -> Array2<f64> {
    let mut cov = Array2::zeros((a.nrows(), b.nrows()));
    for (i, arow) in a.rows().into_iter().enumerate() {
        for (j, brow) in b.rows().into_iter().enumerate() {
            let mut sq_dist = 0.;
            for ((&x, &y), &l) in arow.iter().zip(brow.iter()).zip(lengthscales.iter()) {
                let d = (x - y) / l;
                sq_dist += d * d;
            }
            cov[[i, j]] = output_scale * (-0.5 * sq_dist).exp();
        }
    }
    cov
}

/// Isotropic squared-exponential covariance: a single length-scale shared
/// across all input dimensions (multi-fidelity usage).
pub fn squared_exponential_iso(
    a: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    b: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    output_scale: f64,
    lengthscale: f64,
) -> Array2<f64> {
    let ls = Array1::from_elem(a.ncols().max(b.ncols()), lengthscale);
    squared_exponential(a, b, output_scale, &ls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_swap_symmetry() {
        let a = array![[0., 1.], [2., -1.], [0.5, 0.5]];
        let b = array![[1., 1.], [-2., 3.]];
        let ls = array![0.7, 1.3];
        let kab = squared_exponential(&a, &b, 2., &ls);
        let kba = squared_exponential(&b, &a, 2., &ls);
        assert_abs_diff_eq!(kab, kba.t(), epsilon = 1e-12);
    }

    #[test]
    fn test_self_covariance() {
        let a = array![[0.3, -0.4], [1., 2.]];
        let k = squared_exponential_iso(&a, &a, 1.5, 2.);
        // diagonal equals the output scale, matrix is symmetric
        assert_abs_diff_eq!(k[[0, 0]], 1.5, epsilon = 1e-12);
        assert_abs_diff_eq!(k[[1, 1]], 1.5, epsilon = 1e-12);
        assert_abs_diff_eq!(k[[0, 1]], k[[1, 0]], epsilon = 1e-12);
        assert!(k[[0, 1]] < 1.5);
    }

    #[test]
    fn test_known_value() {
        let a = array![[0.]];
        let b = array![[1.]];
        let k = squared_exponential(&a, &b, 1., &array![1.]);
        assert_abs_diff_eq!(k[[0, 0]], (-0.5_f64).exp(), epsilon = 1e-12);
    }

    #[test]
    fn test_empty_operands() {
        let a = Array2::<f64>::zeros((0, 2));
        let b = array![[1., 1.], [0., 0.]];
        let k = squared_exponential_iso(&a, &b, 1., 1.);
        assert_eq!(k.shape(), &[0, 2]);
        let k = squared_exponential_iso(&b, &a, 1., 1.);
        assert_eq!(k.shape(), &[2, 0]);
        let k = squared_exponential_iso(&a, &a, 1., 1.);
        assert_eq!(k.shape(), &[0, 0]);
    }
}

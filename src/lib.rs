//! # mmd-twosample
//!
//! Kernel two-sample testing with the Maximum Mean Discrepancy (MMD).
//!
//! ## Why MMD?
//!
//! Given two finite samples X and Y, the question is whether both were drawn
//! from the same distribution. MMD answers it by embedding each sample into a
//! Reproducing Kernel Hilbert Space and measuring the distance between the two
//! mean embeddings. With a characteristic kernel such as the Gaussian (RBF),
//! that distance is zero if and only if the distributions coincide.
//!
//! ## Intuition
//!
//! Everything is expressed through three Gram blocks:
//!
//! ```text
//!   K  = k(X, X)    within-X similarities
//!   L  = k(Y, Y)    within-Y similarities
//!   KL = k(X, Y)    cross similarities
//! ```
//!
//! If X and Y come from the same source, cross similarities look like
//! within-sample similarities and `K + L - KL - KLᵀ` sums to roughly zero.
//! The statistic alone is not a decision: it must be compared to a critical
//! value drawn from its distribution under the null hypothesis. This crate
//! offers three ways of estimating that threshold.
//!
//! ## Key Functions
//!
//! | Function | Purpose |
//! |----------|---------|
//! | [`squared_distances`] | Pairwise ‖a − b‖² via the norm expansion |
//! | [`rbf_kernel_matrix`] | Gaussian Gram matrix from two point sets |
//! | [`median_bandwidth`] | Median heuristic for σ |
//! | [`mmd_statistic`] | m · MMD²_b (biased V-statistic) from three blocks |
//! | [`bootstrap_test`] | Threshold from permutation resampling |
//! | [`gamma_test`] | Threshold from a moment-matched Gamma |
//! | [`spectral_test`] | Threshold from the eigenvalue-weighted χ² mixture |
//!
//! ## Quick Start
//!
//! ```rust
//! use mmd_twosample::{gamma_test, GammaConfig};
//! use ndarray::array;
//!
//! let x = array![[0.0], [0.1], [0.2], [0.3], [0.4], [0.5], [0.6], [0.7], [0.8], [0.9]];
//! let y = &x + 10.0;
//!
//! let config = GammaConfig::new().with_bandwidth(1.0)?;
//! let outcome = gamma_test(x.view(), y.view(), 0.05, &config)?;
//!
//! // Shifted samples → statistic above the critical value
//! assert!(outcome.rejects_null());
//! # Ok::<(), mmd_twosample::Error>(())
//! ```
//!
//! ## Randomness
//!
//! The bootstrap and spectral estimators take a caller-owned [`rand::Rng`].
//! Each estimator draws one base seed from it and derives an independent
//! stream per iteration, so a seeded generator reproduces results exactly,
//! with or without the `parallel` feature.
//!
//! ## What Can Go Wrong
//!
//! 1. **Bandwidth too small**: K and L collapse to the identity, the Gamma
//!    variance vanishes and [`Error::DegenerateMoments`] is returned.
//! 2. **All points coincide**: the median heuristic has nothing to work with
//!    and returns [`Error::DegenerateInput`].
//! 3. **Unequal sample sizes**: the block-permutation and spectral math assume
//!    |X| = |Y|; mismatched inputs are rejected with [`Error::SampleSizeMismatch`].
//! 4. **Scaling**: the statistic is m · MMD²_b, not MMD²_b. Thresholds live on the
//!    same scale.
//!
//! ## References
//!
//! - Gretton et al. (2012). "A Kernel Two-Sample Test" (JMLR)
//! - Gretton et al. (2009). "A Fast, Consistent Kernel Two-Sample Test" (NIPS)

use std::path::PathBuf;

use ndarray::{concatenate, s, Array2, ArrayView2, Axis};
use thiserror::Error;

pub mod cache;
pub mod config;
pub mod null;
mod twosample;

pub use cache::{FileCache, MemoryCache, NullCache};
pub use config::{BootstrapConfig, GammaConfig, SpectralConfig, TestConfig};
pub use null::{
    bootstrap_null, bootstrap_threshold, center_kernel, empirical_quantile, gamma_moments,
    gamma_threshold, null_threshold, spectral_null, spectral_threshold, spectral_weights,
    GammaFit,
};
pub use twosample::{
    bootstrap_run, bootstrap_test, gamma_test, spectral_test, BootstrapRun, TestOutcome,
};

/// Subsample size used by [`median_bandwidth`] when the caller has no preference.
pub const DEFAULT_MAX_SAMPLES: usize = 100;

/// Errors for kernel two-sample testing.
#[derive(Debug, Error)]
pub enum Error {
    #[error("empty input")]
    EmptyInput,

    #[error("dimension mismatch: {0} vs {1}")]
    DimensionMismatch(usize, usize),

    #[error("sample size mismatch: X has {0} rows, Y has {1}")]
    SampleSizeMismatch(usize, usize),

    #[error("kernel block is not square: {0}x{1}")]
    NotSquare(usize, usize),

    #[error("invalid bandwidth: {0}")]
    InvalidBandwidth(f64),

    #[error("no strictly positive pairwise distance in the bandwidth subsample")]
    DegenerateInput,

    #[error("degenerate null moments: mean {mean}, variance {variance}")]
    DegenerateMoments { mean: f64, variance: f64 },

    #[error("significance level must lie in (0, 1), got {0}")]
    InvalidSignificance(f64),

    #[error("quantile level must lie in [0, 1], got {0}")]
    InvalidQuantileLevel(f64),

    #[error("permutation index {index} out of range for {len} points")]
    PermutationIndex { index: usize, len: usize },

    #[error("invalid configuration: {0}")]
    Configuration(&'static str),

    #[error("malformed cache file {}: {}", .path.display(), .reason)]
    CacheRead { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Pairwise Distances
// =============================================================================

/// Squared Euclidean distances D[i,j] = ‖a_i‖² + ‖b_j‖² − 2⟨a_i, b_j⟩.
///
/// Rows are points. The cross term is a single matrix product, so there is no
/// explicit n1×n2×d loop. The expansion loses precision when two points are
/// close relative to their norms; anything inside that rounding band is
/// clamped to exactly zero, and nothing negative ever leaves this function.
///
/// # Errors
///
/// [`Error::DimensionMismatch`] if `a` and `b` have different column counts.
///
/// # Example
///
/// ```rust
/// use mmd_twosample::squared_distances;
/// use ndarray::array;
///
/// let a = array![[0.0, 0.0]];
/// let b = array![[3.0, 4.0]];
///
/// let d = squared_distances(a.view(), b.view()).unwrap();
/// assert_eq!(d[[0, 0]], 25.0);
/// ```
pub fn squared_distances(a: ArrayView2<f64>, b: ArrayView2<f64>) -> Result<Array2<f64>> {
    if a.ncols() != b.ncols() {
        return Err(Error::DimensionMismatch(a.ncols(), b.ncols()));
    }

    let a_norms = a.map_axis(Axis(1), |row| row.dot(&row));
    let b_norms = b.map_axis(Axis(1), |row| row.dot(&row));

    // Relative rounding band of the expansion; grows with the dot-product length.
    let noise = (a.ncols() as f64 + 2.0) * f64::EPSILON;

    let mut d = a.dot(&b.t());
    for ((i, j), v) in d.indexed_iter_mut() {
        let scale = a_norms[i] + b_norms[j];
        let sq = scale - 2.0 * *v;
        *v = if sq <= noise * scale { 0.0 } else { sq };
    }

    Ok(d)
}

// =============================================================================
// Gaussian Kernel
// =============================================================================

/// Gaussian Gram matrix K[i,j] = exp(−‖a_i − b_j‖² / (2σ²)).
///
/// Bandwidth σ controls smoothness:
/// - Small σ: highly peaked, only nearby points similar
/// - Large σ: broad similarity, approaches the constant kernel
///
/// # Arguments
///
/// * `a` - First point set, one point per row
/// * `b` - Second point set, same number of columns
/// * `sigma` - Bandwidth (standard deviation), must be positive and finite
///
/// # Example
///
/// ```rust
/// use mmd_twosample::rbf_kernel_matrix;
/// use ndarray::array;
///
/// let a = array![[0.0, 0.0], [1.0, 0.0]];
///
/// let k = rbf_kernel_matrix(a.view(), a.view(), 1.0).unwrap();
/// assert_eq!(k[[0, 0]], 1.0);
/// // exp(-1/2) ≈ 0.606
/// assert!((k[[0, 1]] - 0.606).abs() < 0.01);
/// ```
pub fn rbf_kernel_matrix(
    a: ArrayView2<f64>,
    b: ArrayView2<f64>,
    sigma: f64,
) -> Result<Array2<f64>> {
    let sigma = config::validate_bandwidth(sigma)?;
    let d = squared_distances(a, b)?;
    rbf_from_distances(d.view(), sigma)
}

/// Gaussian kernel applied entrywise to an already computed distance matrix.
pub fn rbf_from_distances(d: ArrayView2<f64>, sigma: f64) -> Result<Array2<f64>> {
    let sigma = config::validate_bandwidth(sigma)?;
    let denom = 2.0 * sigma * sigma;
    Ok(d.mapv(|sq| (-sq.max(0.0) / denom).exp()))
}

// =============================================================================
// Kernel Bandwidth Selection
// =============================================================================

/// Median heuristic for RBF bandwidth selection.
///
/// Pools up to `max_samples` points, taking rows of `x` first and topping up
/// from `y`. Over the strictly upper triangle of the pooled squared-distance
/// matrix, the strictly positive entries are collected and
/// σ = sqrt(median / 2) is returned. An even count uses the mean of the two
/// middle values.
///
/// # Errors
///
/// - [`Error::DimensionMismatch`] if `x` and `y` disagree on the feature count
/// - [`Error::DegenerateInput`] if every pooled point coincides (or fewer than
///   two points were pooled)
///
/// # Example
///
/// ```rust
/// use mmd_twosample::median_bandwidth;
/// use ndarray::array;
///
/// let x = array![[0.0], [1.0]];
/// let y = array![[3.0]];
///
/// // pooled distances 1, 9, 4 → median 4 → σ = √2
/// let sigma = median_bandwidth(x.view(), y.view(), 100).unwrap();
/// assert!((sigma - 2.0_f64.sqrt()).abs() < 1e-12);
/// ```
pub fn median_bandwidth(
    x: ArrayView2<f64>,
    y: ArrayView2<f64>,
    max_samples: usize,
) -> Result<f64> {
    if x.ncols() != y.ncols() {
        return Err(Error::DimensionMismatch(x.ncols(), y.ncols()));
    }

    let take_x = x.nrows().min(max_samples);
    let take_y = (max_samples - take_x).min(y.nrows());
    let pooled = concatenate(
        Axis(0),
        &[x.slice(s![..take_x, ..]), y.slice(s![..take_y, ..])],
    )
    .map_err(|_| Error::DimensionMismatch(x.ncols(), y.ncols()))?;

    let dists = squared_distances(pooled.view(), pooled.view())?;
    let n = pooled.nrows();
    let dists = &dists;
    let mut positive: Vec<f64> = (0..n)
        .flat_map(|i| ((i + 1)..n).map(move |j| dists[[i, j]]))
        .filter(|&sq| sq > 0.0)
        .collect();

    if positive.is_empty() {
        return Err(Error::DegenerateInput);
    }

    positive.sort_by(|a, b| a.total_cmp(b));
    let mid = positive.len() / 2;
    let median = if positive.len() % 2 == 0 {
        0.5 * (positive[mid - 1] + positive[mid])
    } else {
        positive[mid]
    };

    let sigma = (0.5 * median).sqrt();
    if sigma > 0.0 && sigma.is_finite() {
        Ok(sigma)
    } else {
        Err(Error::InvalidBandwidth(sigma))
    }
}

// =============================================================================
// Maximum Mean Discrepancy (MMD)
// =============================================================================

/// The three Gram blocks a two-sample test works on.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelBlocks {
    /// k(X, X)
    pub k: Array2<f64>,
    /// k(Y, Y)
    pub l: Array2<f64>,
    /// k(X, Y)
    pub kl: Array2<f64>,
}

impl KernelBlocks {
    /// Build K, L and KL under the Gaussian kernel with bandwidth `sigma`.
    pub fn rbf(x: ArrayView2<f64>, y: ArrayView2<f64>, sigma: f64) -> Result<Self> {
        Ok(Self {
            k: rbf_kernel_matrix(x, x, sigma)?,
            l: rbf_kernel_matrix(y, y, sigma)?,
            kl: rbf_kernel_matrix(x, y, sigma)?,
        })
    }

    /// Common block size m, after checking all three blocks are m×m.
    pub fn size(&self) -> Result<usize> {
        block_size(self.k.view(), self.l.view(), self.kl.view())
    }

    /// m · MMD²_b for these blocks. See [`mmd_statistic`].
    pub fn statistic(&self) -> Result<f64> {
        mmd_statistic(self.k.view(), self.l.view(), self.kl.view())
    }

    /// The (2m)×(2m) pooled Gram matrix `[[K, KL], [KLᵀ, L]]`.
    pub fn combined(&self) -> Result<Array2<f64>> {
        let m = self.size()?;
        let mut kz = Array2::zeros((2 * m, 2 * m));
        kz.slice_mut(s![..m, ..m]).assign(&self.k);
        kz.slice_mut(s![..m, m..]).assign(&self.kl);
        kz.slice_mut(s![m.., ..m]).assign(&self.kl.t());
        kz.slice_mut(s![m.., m..]).assign(&self.l);
        Ok(kz)
    }
}

/// Biased MMD statistic, scaled by the sample size.
///
/// t = (1/m) Σᵢⱼ (K + L − KL − KLᵀ)ᵢⱼ, which equals m · MMD²_b where MMD²_b is
/// the biased V-statistic. Thresholds produced by this crate are on the same
/// scale, so the two compare directly.
///
/// Exactly zero (up to rounding) when both samples are identical row-for-row.
///
/// # Errors
///
/// [`Error::NotSquare`] / [`Error::SampleSizeMismatch`] unless all three blocks
/// are m×m for the same m, and [`Error::EmptyInput`] when m = 0.
pub fn mmd_statistic(
    k: ArrayView2<f64>,
    l: ArrayView2<f64>,
    kl: ArrayView2<f64>,
) -> Result<f64> {
    let m = block_size(k, l, kl)?;
    let total = (&k + &l - &kl - &kl.t()).sum();
    Ok(total / m as f64)
}

pub(crate) fn block_size(
    k: ArrayView2<f64>,
    l: ArrayView2<f64>,
    kl: ArrayView2<f64>,
) -> Result<usize> {
    for (rows, cols) in [k.dim(), l.dim(), kl.dim()] {
        if rows != cols {
            return Err(Error::NotSquare(rows, cols));
        }
    }
    let m = k.nrows();
    if l.nrows() != m {
        return Err(Error::SampleSizeMismatch(m, l.nrows()));
    }
    if kl.nrows() != m {
        return Err(Error::SampleSizeMismatch(m, kl.nrows()));
    }
    if m == 0 {
        return Err(Error::EmptyInput);
    }
    Ok(m)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use proptest::prelude::*;

    fn points(n: usize, d: usize, values: Vec<f64>) -> Array2<f64> {
        Array2::from_shape_vec((n, d), values).unwrap()
    }

    #[test]
    fn test_distances_pythagorean() {
        let a = array![[0.0, 0.0]];
        let b = array![[3.0, 4.0]];
        let d = squared_distances(a.view(), b.view()).unwrap();
        assert_eq!(d, array![[25.0]]);
    }

    #[test]
    fn test_distances_dimension_mismatch() {
        let a = array![[0.0, 0.0]];
        let b = array![[1.0, 2.0, 3.0]];
        let err = squared_distances(a.view(), b.view()).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch(2, 3)));
    }

    #[test]
    fn test_distances_self_diagonal_zero() {
        let a = array![[0.1, 0.2, 0.3], [1.7, -2.9, 0.01], [1e3, 1e-3, 7.0]];
        let d = squared_distances(a.view(), a.view()).unwrap();
        for i in 0..3 {
            assert_eq!(d[[i, i]], 0.0, "self distance should clamp to zero");
        }
    }

    #[test]
    fn test_distances_never_negative() {
        // Nearly coincident points far from the origin: classic cancellation.
        let a = array![[1e8, 1e8], [1e8 + 1e-6, 1e8]];
        let d = squared_distances(a.view(), a.view()).unwrap();
        assert!(d.iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn test_distances_empty_rows() {
        let a = Array2::<f64>::zeros((0, 2));
        let b = array![[1.0, 1.0]];
        let d = squared_distances(a.view(), b.view()).unwrap();
        assert_eq!(d.shape(), &[0, 1]);
    }

    #[test]
    fn test_rbf_scenario() {
        let a = array![[0.0, 0.0]];
        let b = array![[3.0, 4.0]];
        let k = rbf_kernel_matrix(a.view(), b.view(), 1.0).unwrap();
        assert!((k[[0, 0]] - (-12.5f64).exp()).abs() < 1e-18);
        assert!((k[[0, 0]] - 3.7267e-6).abs() < 1e-9);
    }

    #[test]
    fn test_rbf_rejects_bad_bandwidth() {
        let a = array![[0.0]];
        for sigma in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = rbf_kernel_matrix(a.view(), a.view(), sigma).unwrap_err();
            assert!(matches!(err, Error::InvalidBandwidth(_)));
        }
    }

    #[test]
    fn test_median_bandwidth_pools_x_first() {
        let x = array![[0.0], [1.0]];
        let y = array![[3.0]];

        // Only X fits: single distance 1 → σ = sqrt(0.5)
        let sigma = median_bandwidth(x.view(), y.view(), 2).unwrap();
        assert!((sigma - 0.5f64.sqrt()).abs() < 1e-12);

        // X then Y: distances 1, 9, 4 → median 4 → σ = sqrt(2)
        let sigma = median_bandwidth(x.view(), y.view(), 100).unwrap();
        assert!((sigma - 2.0f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_median_bandwidth_tops_up_from_y() {
        let x = array![[0.0]];
        let y = array![[2.0], [40.0]];
        // Z = [0, 2] → distance 4 → σ = sqrt(2)
        let sigma = median_bandwidth(x.view(), y.view(), 2).unwrap();
        assert!((sigma - 2.0f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_median_bandwidth_even_count() {
        let x = array![[0.0], [1.0], [3.0], [6.0]];
        let y = Array2::<f64>::zeros((0, 1));
        // distances 1, 9, 36, 4, 25, 9 → median (9 + 9) / 2 = 9
        let sigma = median_bandwidth(x.view(), y.view(), 100).unwrap();
        assert!((sigma - 4.5f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_median_bandwidth_degenerate() {
        let x = array![[1.5, 2.5], [1.5, 2.5]];
        let y = array![[1.5, 2.5], [1.5, 2.5]];
        let err = median_bandwidth(x.view(), y.view(), 100).unwrap_err();
        assert!(matches!(err, Error::DegenerateInput));

        let single = array![[1.0, 1.0]];
        let err = median_bandwidth(single.view(), single.view(), 1).unwrap_err();
        assert!(matches!(err, Error::DegenerateInput));
    }

    #[test]
    fn test_statistic_identical_samples() {
        let x = array![[0.0], [1.0]];
        let blocks = KernelBlocks::rbf(x.view(), x.view(), 1.0).unwrap();
        let e = (-0.5f64).exp();
        assert!((blocks.k[[0, 1]] - e).abs() < 1e-15);
        assert_eq!(blocks.k, blocks.kl);
        assert_eq!(blocks.statistic().unwrap(), 0.0);
    }

    #[test]
    fn test_statistic_separated_samples() {
        let x = array![[0.0], [0.1], [0.2]];
        let y = array![[10.0], [10.1], [10.2]];
        let blocks = KernelBlocks::rbf(x.view(), y.view(), 1.0).unwrap();
        // KL ≈ 0, so t ≈ (ΣK + ΣL) / m > 2
        assert!(blocks.statistic().unwrap() > 2.0);
    }

    #[test]
    fn test_statistic_shape_checks() {
        let sq = Array2::<f64>::eye(2);
        let rect = Array2::<f64>::zeros((2, 3));
        let big = Array2::<f64>::eye(3);

        let err = mmd_statistic(sq.view(), sq.view(), rect.view()).unwrap_err();
        assert!(matches!(err, Error::NotSquare(2, 3)));

        // Blocks borrowed from owners with different lifetimes.
        {
            let local = Array2::<f64>::zeros((3, 2));
            let err = mmd_statistic(local.view(), sq.view(), sq.view()).unwrap_err();
            assert!(matches!(err, Error::NotSquare(3, 2)));
        }

        let err = mmd_statistic(sq.view(), big.view(), sq.view()).unwrap_err();
        assert!(matches!(err, Error::SampleSizeMismatch(2, 3)));

        let empty = Array2::<f64>::zeros((0, 0));
        let err = mmd_statistic(empty.view(), empty.view(), empty.view()).unwrap_err();
        assert!(matches!(err, Error::EmptyInput));
    }

    #[test]
    fn test_combined_layout() {
        let blocks = KernelBlocks {
            k: array![[1.0, 2.0], [2.0, 1.0]],
            l: array![[5.0, 6.0], [6.0, 5.0]],
            kl: array![[3.0, 4.0], [7.0, 8.0]],
        };
        let kz = blocks.combined().unwrap();
        assert_eq!(
            kz,
            array![
                [1.0, 2.0, 3.0, 4.0],
                [2.0, 1.0, 7.0, 8.0],
                [3.0, 7.0, 5.0, 6.0],
                [4.0, 8.0, 6.0, 5.0],
            ]
        );
    }

    proptest! {
        #[test]
        fn prop_distances_transpose_symmetric(
            n1 in 1usize..6,
            n2 in 1usize..6,
            d in 1usize..4,
            seed_a in prop::collection::vec(-3.0f64..3.0, 18),
            seed_b in prop::collection::vec(-3.0f64..3.0, 18),
        ) {
            let a = points(n1, d, seed_a[..n1 * d].to_vec());
            let b = points(n2, d, seed_b[..n2 * d].to_vec());

            let ab = squared_distances(a.view(), b.view()).unwrap();
            let ba = squared_distances(b.view(), a.view()).unwrap();
            for i in 0..n1 {
                for j in 0..n2 {
                    prop_assert!(ab[[i, j]] >= 0.0);
                    prop_assert!((ab[[i, j]] - ba[[j, i]]).abs() < 1e-9);
                }
            }

            let aa = squared_distances(a.view(), a.view()).unwrap();
            for i in 0..n1 {
                prop_assert!(aa[[i, i]].abs() < 1e-12);
            }
        }

        #[test]
        fn prop_rbf_in_unit_interval(
            n in 1usize..6,
            d in 1usize..4,
            sigma in 0.5f64..5.0,
            values in prop::collection::vec(-3.0f64..3.0, 18),
        ) {
            let a = points(n, d, values[..n * d].to_vec());
            let k = rbf_kernel_matrix(a.view(), a.view(), sigma).unwrap();
            for &v in k.iter() {
                prop_assert!(v > 0.0 && v <= 1.0);
            }
            for i in 0..n {
                prop_assert!((k[[i, i]] - 1.0).abs() < 1e-12);
            }
        }

        #[test]
        fn prop_statistic_zero_on_identical(
            n in 1usize..8,
            d in 1usize..4,
            sigma in 0.5f64..5.0,
            values in prop::collection::vec(-3.0f64..3.0, 24),
        ) {
            let x = points(n, d, values[..n * d].to_vec());
            let blocks = KernelBlocks::rbf(x.view(), x.view(), sigma).unwrap();
            prop_assert!(blocks.statistic().unwrap().abs() < 1e-12);
        }
    }
}

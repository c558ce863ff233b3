//! Null-distribution estimators for the MMD statistic.
//!
//! Three ways to get a critical value for m · MMD²_b at significance α:
//!
//! | Estimator | Null approximation | Cost |
//! |-----------|--------------------|------|
//! | [`bootstrap_threshold`] | Permute the pooled Gram matrix, recompute | O(S · (2m)²) |
//! | [`gamma_threshold`] | Gamma fitted to the analytic null mean/variance | O(m²) |
//! | [`spectral_threshold`] | Σ λᵢ zᵢ², λ from the centered Gram spectrum | O((2m)³) + O(N · k) |
//!
//! The Monte Carlo estimators draw a single base seed from the caller's
//! generator and give every iteration its own ChaCha stream derived with
//! [`counter_rng_seed`]. Iterations are therefore independent of execution
//! order, and the `parallel` feature changes wall-clock time only.

use faer::{Mat, Side};
use ndarray::{s, Array2, ArrayView2, Axis};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};
use statrs::distribution::{ContinuousCDF, Gamma};

use crate::{mmd_statistic, Error, KernelBlocks, Result};

// =============================================================================
// Shared Machinery
// =============================================================================

/// Counter-based seed derivation (SplitMix64 finalizer).
///
/// Maps `(base_seed, counter)` to a well-mixed 64-bit seed, so iteration `i`
/// gets the same stream no matter which thread runs it.
#[inline]
pub fn counter_rng_seed(base_seed: u64, counter: u64) -> u64 {
    let mut z = base_seed.wrapping_add(counter.wrapping_mul(0x9e3779b97f4a7c15));
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
    z ^ (z >> 31)
}

fn iteration_rng(base_seed: u64, i: usize) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(counter_rng_seed(base_seed, i as u64))
}

#[cfg(feature = "parallel")]
fn draw_all<T, F>(count: usize, draw: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    use rayon::prelude::*;
    (0..count).into_par_iter().map(draw).collect()
}

#[cfg(not(feature = "parallel"))]
fn draw_all<T, F>(count: usize, draw: F) -> Vec<T>
where
    F: Fn(usize) -> T,
{
    (0..count).map(draw).collect()
}

/// Quantile level 1 − α, after checking α ∈ (0, 1).
pub(crate) fn upper_level(alpha: f64) -> Result<f64> {
    if alpha > 0.0 && alpha < 1.0 {
        Ok(1.0 - alpha)
    } else {
        Err(Error::InvalidSignificance(alpha))
    }
}

/// Empirical quantile with linear interpolation between order statistics
/// (the "type 7" definition).
///
/// # Example
///
/// ```rust
/// use mmd_twosample::empirical_quantile;
///
/// let q = empirical_quantile(&[4.0, 1.0, 3.0, 2.0], 0.5).unwrap();
/// assert_eq!(q, 2.5);
/// ```
pub fn empirical_quantile(samples: &[f64], p: f64) -> Result<f64> {
    if samples.is_empty() {
        return Err(Error::EmptyInput);
    }
    if !(0.0..=1.0).contains(&p) {
        return Err(Error::InvalidQuantileLevel(p));
    }

    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let n = sorted.len();
    let h = (n - 1) as f64 * p;
    let lo = h.floor() as usize;
    if lo + 1 >= n {
        return Ok(sorted[n - 1]);
    }
    let frac = h - h.floor();
    Ok(sorted[lo] + frac * (sorted[lo + 1] - sorted[lo]))
}

/// Critical value at significance `alpha` from a sampled null: its (1 − α)
/// empirical quantile.
pub fn null_threshold(null: &[f64], alpha: f64) -> Result<f64> {
    empirical_quantile(null, upper_level(alpha)?)
}

// =============================================================================
// Permutation Bootstrap
// =============================================================================

/// Uniformly random permutation of `0..n`.
pub fn draw_permutation<R: Rng>(n: usize, rng: &mut R) -> Vec<usize> {
    let mut perm: Vec<usize> = (0..n).collect();
    perm.shuffle(rng);
    perm
}

/// Statistic of one relabelled split of the pooled sample.
///
/// Applies `perm` to both rows and columns of the (2m)×(2m) matrix `kz`, then
/// reads K′, L′ and KL′ off the top-left, bottom-right and top-right blocks.
pub fn permuted_statistic(kz: ArrayView2<f64>, perm: &[usize]) -> Result<f64> {
    let n = kz.nrows();
    if kz.ncols() != n {
        return Err(Error::NotSquare(n, kz.ncols()));
    }
    if perm.len() != n || n % 2 != 0 {
        return Err(Error::SampleSizeMismatch(perm.len(), n));
    }
    if let Some(&index) = perm.iter().find(|&&i| i >= n) {
        return Err(Error::PermutationIndex { index, len: n });
    }

    let m = n / 2;
    let shuffled = kz.select(Axis(0), perm).select(Axis(1), perm);
    mmd_statistic(
        shuffled.slice(s![..m, ..m]),
        shuffled.slice(s![m.., m..]),
        shuffled.slice(s![..m, m..]),
    )
}

/// Null sample of length `shuffles` from random relabellings of X ∪ Y.
pub fn bootstrap_null<R: Rng>(
    blocks: &KernelBlocks,
    shuffles: usize,
    rng: &mut R,
) -> Result<Vec<f64>> {
    let kz = blocks.combined()?;
    let n = kz.nrows();
    let base_seed: u64 = rng.random();

    let kz = &kz;
    draw_all(shuffles, |i| {
        let mut stream = iteration_rng(base_seed, i);
        let perm = draw_permutation(n, &mut stream);
        permuted_statistic(kz.view(), &perm)
    })
    .into_iter()
    .collect()
}

/// Critical value from the (1 − α) quantile of [`bootstrap_null`].
pub fn bootstrap_threshold<R: Rng>(
    blocks: &KernelBlocks,
    shuffles: usize,
    alpha: f64,
    rng: &mut R,
) -> Result<f64> {
    upper_level(alpha)?;
    if shuffles == 0 {
        return Err(Error::Configuration("bootstrap needs at least one shuffle"));
    }
    let null = bootstrap_null(blocks, shuffles, rng)?;
    null_threshold(&null, alpha)
}

// =============================================================================
// Gamma Approximation
// =============================================================================

/// Moment-matched Gamma approximation of the null distribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GammaFit {
    /// Analytic null mean of MMD²_b.
    pub mean: f64,
    /// Analytic null variance of MMD²_b.
    pub variance: f64,
    pub shape: f64,
    pub scale: f64,
}

impl GammaFit {
    /// Quantile of Gamma(shape, scale) at probability `p`.
    pub fn quantile(&self, p: f64) -> Result<f64> {
        let degenerate = || Error::DegenerateMoments {
            mean: self.mean,
            variance: self.variance,
        };
        let gamma = Gamma::new(self.shape, 1.0 / self.scale).map_err(|_| degenerate())?;
        let q = gamma.inverse_cdf(p);
        if q.is_finite() {
            Ok(q)
        } else {
            Err(degenerate())
        }
    }
}

/// Null mean and variance of MMD²_b and the matching Gamma parameters.
///
/// mean = (2/m)(1 − tr(KL)/m). The variance uses the blocks with their
/// diagonals removed: var = 2 / (m(m−1))² · Σ (K + L − KL − KLᵀ)².
/// Then shape = mean² / var and scale = m · var / mean, which puts the
/// Gamma on the m · MMD²_b scale of the statistic.
///
/// # Errors
///
/// [`Error::DegenerateMoments`] if the mean is not strictly positive or the
/// variance is not strictly positive and finite (this includes m = 1).
pub fn gamma_moments(blocks: &KernelBlocks) -> Result<GammaFit> {
    let m = blocks.size()?;
    let mf = m as f64;

    let mean = 2.0 / mf * (1.0 - blocks.kl.diag().sum() / mf);

    let off_diagonal = |a: &Array2<f64>| {
        let mut a = a.clone();
        a.diag_mut().fill(0.0);
        a
    };
    let k = off_diagonal(&blocks.k);
    let l = off_diagonal(&blocks.l);
    let kl = off_diagonal(&blocks.kl);

    let h = &k + &l - &kl - &kl.t();
    let pairs = mf * (mf - 1.0);
    let variance = 2.0 / pairs / pairs * h.mapv(|v| v * v).sum();

    let valid = |v: f64| v > 0.0 && v.is_finite();
    if !valid(mean) || !valid(variance) {
        return Err(Error::DegenerateMoments { mean, variance });
    }

    Ok(GammaFit {
        mean,
        variance,
        shape: mean * mean / variance,
        scale: variance * mf / mean,
    })
}

/// Critical value from the (1 − α) quantile of the fitted Gamma.
pub fn gamma_threshold(blocks: &KernelBlocks, alpha: f64) -> Result<f64> {
    let level = upper_level(alpha)?;
    gamma_moments(blocks)?.quantile(level)
}

// =============================================================================
// Spectral Approximation
// =============================================================================

/// Double-centre a square Gram matrix: H K H with H = I − (1/n) 11ᵀ.
///
/// Computed as K − row means − column means + grand mean, which avoids the
/// two dense products.
pub fn center_kernel(kz: ArrayView2<f64>) -> Result<Array2<f64>> {
    let n = kz.nrows();
    if kz.ncols() != n {
        return Err(Error::NotSquare(n, kz.ncols()));
    }
    if n == 0 {
        return Err(Error::EmptyInput);
    }

    let nf = n as f64;
    let row_means = kz.sum_axis(Axis(1)) / nf;
    let col_means = kz.sum_axis(Axis(0)) / nf;
    let grand_mean = kz.sum() / (nf * nf);

    Ok(Array2::from_shape_fn((n, n), |(i, j)| {
        kz[[i, j]] - row_means[i] - col_means[j] + grand_mean
    }))
}

/// Weights |λᵢ| / (2m) of the χ² mixture, largest magnitude first.
///
/// `num_eigs` defaults to 2m − 2 and is clamped to 2m.
pub fn spectral_weights(blocks: &KernelBlocks, num_eigs: Option<usize>) -> Result<Vec<f64>> {
    let m = blocks.size()?;
    let n = 2 * m;
    let keep = num_eigs.unwrap_or(n.saturating_sub(2)).min(n);

    let centered = center_kernel(blocks.combined()?.view())?;
    let mat = Mat::<f64>::from_fn(n, n, |i, j| centered[[i, j]]);
    let mut eigs = mat.selfadjoint_eigenvalues(Side::Lower);
    eigs.sort_by(|a, b| b.abs().total_cmp(&a.abs()));

    let nf = n as f64;
    Ok(eigs.into_iter().take(keep).map(|lambda| lambda.abs() / nf).collect())
}

/// `num_null_samples` draws of 2 Σᵢ wᵢ zᵢ² with zᵢ ~ N(0, 1).
pub fn spectral_null<R: Rng>(weights: &[f64], num_null_samples: usize, rng: &mut R) -> Vec<f64> {
    let base_seed: u64 = rng.random();
    draw_all(num_null_samples, |i| {
        let mut stream = iteration_rng(base_seed, i);
        let weighted: f64 = weights
            .iter()
            .map(|w| {
                let z: f64 = StandardNormal.sample(&mut stream);
                w * z * z
            })
            .sum();
        2.0 * weighted
    })
}

/// Critical value from the (1 − α) quantile of [`spectral_null`].
pub fn spectral_threshold<R: Rng>(
    blocks: &KernelBlocks,
    num_eigs: Option<usize>,
    num_null_samples: usize,
    alpha: f64,
    rng: &mut R,
) -> Result<f64> {
    upper_level(alpha)?;
    if num_null_samples == 0 {
        return Err(Error::Configuration("spectral test needs at least one null sample"));
    }
    let weights = spectral_weights(blocks, num_eigs)?;
    let null = spectral_null(&weights, num_null_samples, rng);
    null_threshold(&null, alpha)
}

// =============================================================================
// Tests
// =============================================================================

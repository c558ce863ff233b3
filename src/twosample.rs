//! Two-sample test entry points.
//!
//! Every test follows the same path: pick σ (configured, or the median
//! heuristic), build K, L and KL, compute the statistic, then hand the blocks
//! to exactly one threshold estimator.

use ndarray::ArrayView2;
use rand::Rng;

use crate::cache::NullCache;
use crate::config::{BootstrapConfig, GammaConfig, SpectralConfig};
use crate::null::{
    bootstrap_null, gamma_threshold, null_threshold, spectral_threshold, upper_level,
};
use crate::{median_bandwidth, Error, KernelBlocks, Result, DEFAULT_MAX_SAMPLES};

/// Result of a two-sample test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TestOutcome {
    /// m · MMD²_b.
    pub statistic: f64,
    /// Critical value at the requested significance, same scale as `statistic`.
    pub threshold: f64,
    /// Kernel bandwidth the test ran with.
    pub bandwidth: f64,
}

impl TestOutcome {
    /// `true` when the statistic exceeds the critical value.
    pub fn rejects_null(&self) -> bool {
        self.statistic > self.threshold
    }

    /// `(statistic, threshold)`.
    pub fn into_pair(self) -> (f64, f64) {
        (self.statistic, self.threshold)
    }
}

/// Validate inputs, resolve σ and build the Gram blocks.
fn prepare(
    x: ArrayView2<f64>,
    y: ArrayView2<f64>,
    alpha: f64,
    bandwidth: Option<f64>,
) -> Result<(KernelBlocks, f64)> {
    upper_level(alpha)?;
    if x.nrows() == 0 || y.nrows() == 0 {
        return Err(Error::EmptyInput);
    }
    if x.ncols() != y.ncols() {
        return Err(Error::DimensionMismatch(x.ncols(), y.ncols()));
    }
    if x.nrows() != y.nrows() {
        return Err(Error::SampleSizeMismatch(x.nrows(), y.nrows()));
    }

    let sigma = match bandwidth {
        Some(sigma) => sigma,
        None => median_bandwidth(x, y, DEFAULT_MAX_SAMPLES)?,
    };
    Ok((KernelBlocks::rbf(x, y, sigma)?, sigma))
}

/// A bootstrap test together with the null sample behind its threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapRun {
    pub outcome: TestOutcome,
    /// Null sample of m · MMD²_b values the threshold was taken from.
    pub null: Vec<f64>,
    /// Sample size m, the cache key for `null`.
    pub sample_size: usize,
    /// `true` when `null` was read from a cache instead of resampled.
    pub from_cache: bool,
}

impl BootstrapRun {
    /// Store a freshly resampled null array under its sample size.
    ///
    /// Does nothing when the array was itself read from a cache. A failure
    /// here leaves `self.outcome` intact.
    pub fn persist(&self, cache: &mut dyn NullCache) -> Result<()> {
        if self.from_cache {
            return Ok(());
        }
        cache.put(self.sample_size, &self.null)
    }
}

/// Bootstrap test that also returns its null sample.
///
/// With a cache and `force_recompute` unset, a stored null array for this
/// sample size replaces resampling. The cache is only read; writing a fresh
/// array back is up to the caller, through [`BootstrapRun::persist`].
///
/// # Example
///
/// ```rust
/// use mmd_twosample::{bootstrap_run, BootstrapConfig, MemoryCache, NullCache};
/// use ndarray::Array2;
/// use rand::SeedableRng;
/// use rand_chacha::ChaCha8Rng;
///
/// let x = Array2::from_shape_fn((12, 2), |(i, j)| (i + j) as f64 * 0.1);
/// let y = &x + 4.0;
///
/// let config = BootstrapConfig::new(200)?;
/// let mut rng = ChaCha8Rng::seed_from_u64(0);
/// let mut cache = MemoryCache::new();
///
/// let run = bootstrap_run(x.view(), y.view(), 0.05, &config, &mut rng, Some(&cache))?;
/// assert!(run.outcome.rejects_null());
/// assert!(!run.from_cache);
///
/// run.persist(&mut cache)?;
/// assert_eq!(cache.get(12)?.map(|null| null.len()), Some(200));
/// # Ok::<(), mmd_twosample::Error>(())
/// ```
pub fn bootstrap_run<R: Rng>(
    x: ArrayView2<f64>,
    y: ArrayView2<f64>,
    alpha: f64,
    config: &BootstrapConfig,
    rng: &mut R,
    cache: Option<&dyn NullCache>,
) -> Result<BootstrapRun> {
    let (blocks, bandwidth) = prepare(x, y, alpha, config.bandwidth())?;
    let statistic = blocks.statistic()?;
    let sample_size = blocks.size()?;

    let cached = match cache {
        Some(cache) if !config.forces_recompute() => cache.get(sample_size)?,
        _ => None,
    };
    let from_cache = cached.is_some();
    let null = match cached {
        Some(null) => null,
        None => bootstrap_null(&blocks, config.shuffles(), rng)?,
    };

    let threshold = null_threshold(&null, alpha)?;
    Ok(BootstrapRun {
        outcome: TestOutcome {
            statistic,
            threshold,
            bandwidth,
        },
        null,
        sample_size,
        from_cache,
    })
}

/// Two-sample test with a permutation-bootstrap threshold.
///
/// See [`bootstrap_run`] for the cache semantics; this keeps only the outcome.
pub fn bootstrap_test<R: Rng>(
    x: ArrayView2<f64>,
    y: ArrayView2<f64>,
    alpha: f64,
    config: &BootstrapConfig,
    rng: &mut R,
    cache: Option<&dyn NullCache>,
) -> Result<TestOutcome> {
    bootstrap_run(x, y, alpha, config, rng, cache).map(|run| run.outcome)
}

/// Two-sample test with a moment-matched Gamma threshold.
pub fn gamma_test(
    x: ArrayView2<f64>,
    y: ArrayView2<f64>,
    alpha: f64,
    config: &GammaConfig,
) -> Result<TestOutcome> {
    let (blocks, bandwidth) = prepare(x, y, alpha, config.bandwidth())?;
    let statistic = blocks.statistic()?;
    let threshold = gamma_threshold(&blocks, alpha)?;
    Ok(TestOutcome {
        statistic,
        threshold,
        bandwidth,
    })
}

/// Two-sample test with a spectral (χ² mixture) threshold.
pub fn spectral_test<R: Rng>(
    x: ArrayView2<f64>,
    y: ArrayView2<f64>,
    alpha: f64,
    config: &SpectralConfig,
    rng: &mut R,
) -> Result<TestOutcome> {
    let (blocks, bandwidth) = prepare(x, y, alpha, config.bandwidth())?;
    let statistic = blocks.statistic()?;

    let threshold = spectral_threshold(
        &blocks,
        config.num_eigs(),
        config.num_null_samples(),
        alpha,
        rng,
    )?;
    Ok(TestOutcome {
        statistic,
        threshold,
        bandwidth,
    })
}

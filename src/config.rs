//! Per-method test configuration.
//!
//! Each threshold method gets its own options struct. Required options are
//! constructor arguments and every value is checked when the struct is built,
//! so a bad configuration fails before any kernel is computed.
//!
//! ```rust
//! use mmd_twosample::{BootstrapConfig, Error, SpectralConfig};
//!
//! let boot = BootstrapConfig::new(1000)?.with_bandwidth(0.5)?.force_recompute(true);
//! assert_eq!(boot.shuffles(), 1000);
//!
//! assert!(matches!(SpectralConfig::new(0), Err(Error::Configuration(_))));
//! # Ok::<(), Error>(())
//! ```

use ndarray::ArrayView2;
use rand::Rng;

use crate::twosample::{bootstrap_test, gamma_test, spectral_test, TestOutcome};
use crate::{Error, Result};

/// Accept a user-supplied bandwidth only if it is positive and finite.
pub(crate) fn validate_bandwidth(sigma: f64) -> Result<f64> {
    if sigma > 0.0 && sigma.is_finite() {
        Ok(sigma)
    } else {
        Err(Error::InvalidBandwidth(sigma))
    }
}

/// Options for the permutation bootstrap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BootstrapConfig {
    bandwidth: Option<f64>,
    shuffles: usize,
    force_recompute: bool,
}

impl BootstrapConfig {
    /// `shuffles` permutations are drawn to build the null distribution.
    pub fn new(shuffles: usize) -> Result<Self> {
        if shuffles == 0 {
            return Err(Error::Configuration("bootstrap needs at least one shuffle"));
        }
        Ok(Self {
            bandwidth: None,
            shuffles,
            force_recompute: false,
        })
    }

    /// Fix σ instead of using the median heuristic.
    pub fn with_bandwidth(mut self, sigma: f64) -> Result<Self> {
        self.bandwidth = Some(validate_bandwidth(sigma)?);
        Ok(self)
    }

    /// Ignore any cached null array and always resample.
    pub fn force_recompute(mut self, force: bool) -> Self {
        self.force_recompute = force;
        self
    }

    pub fn bandwidth(&self) -> Option<f64> {
        self.bandwidth
    }

    pub fn shuffles(&self) -> usize {
        self.shuffles
    }

    pub fn forces_recompute(&self) -> bool {
        self.force_recompute
    }
}

/// Options for the moment-matched Gamma approximation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GammaConfig {
    bandwidth: Option<f64>,
}

impl GammaConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix σ instead of using the median heuristic.
    pub fn with_bandwidth(mut self, sigma: f64) -> Result<Self> {
        self.bandwidth = Some(validate_bandwidth(sigma)?);
        Ok(self)
    }

    pub fn bandwidth(&self) -> Option<f64> {
        self.bandwidth
    }
}

/// Options for the spectral (eigenvalue-weighted χ²) approximation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralConfig {
    bandwidth: Option<f64>,
    num_eigs: Option<usize>,
    num_null_samples: usize,
}

impl SpectralConfig {
    /// `num_null_samples` Monte Carlo draws approximate the null distribution.
    pub fn new(num_null_samples: usize) -> Result<Self> {
        if num_null_samples == 0 {
            return Err(Error::Configuration("spectral test needs at least one null sample"));
        }
        Ok(Self {
            bandwidth: None,
            num_eigs: None,
            num_null_samples,
        })
    }

    /// Fix σ instead of using the median heuristic.
    pub fn with_bandwidth(mut self, sigma: f64) -> Result<Self> {
        self.bandwidth = Some(validate_bandwidth(sigma)?);
        Ok(self)
    }

    /// Keep the `num_eigs` largest-magnitude eigenvalues (default 2m − 2,
    /// never more than 2m).
    pub fn with_num_eigs(mut self, num_eigs: usize) -> Result<Self> {
        if num_eigs == 0 {
            return Err(Error::Configuration("spectral test needs at least one eigenvalue"));
        }
        self.num_eigs = Some(num_eigs);
        Ok(self)
    }

    pub fn bandwidth(&self) -> Option<f64> {
        self.bandwidth
    }

    pub fn num_eigs(&self) -> Option<usize> {
        self.num_eigs
    }

    pub fn num_null_samples(&self) -> usize {
        self.num_null_samples
    }
}

/// One configuration per threshold method.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TestConfig {
    Bootstrap(BootstrapConfig),
    Gamma(GammaConfig),
    Spectral(SpectralConfig),
}

impl TestConfig {
    pub fn bandwidth(&self) -> Option<f64> {
        match self {
            TestConfig::Bootstrap(c) => c.bandwidth(),
            TestConfig::Gamma(c) => c.bandwidth(),
            TestConfig::Spectral(c) => c.bandwidth(),
        }
    }

    pub fn method_name(&self) -> &'static str {
        match self {
            TestConfig::Bootstrap(_) => "bootstrap",
            TestConfig::Gamma(_) => "gamma",
            TestConfig::Spectral(_) => "spectral",
        }
    }

    /// Run the configured test. The bootstrap runs without a cache; call
    /// [`crate::bootstrap_run`] directly to wire one in.
    pub fn run<R: Rng>(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView2<f64>,
        alpha: f64,
        rng: &mut R,
    ) -> Result<TestOutcome> {
        match self {
            TestConfig::Bootstrap(c) => bootstrap_test(x, y, alpha, c, rng, None),
            TestConfig::Gamma(c) => gamma_test(x, y, alpha, c),
            TestConfig::Spectral(c) => spectral_test(x, y, alpha, c, rng),
        }
    }
}

impl From<BootstrapConfig> for TestConfig {
    fn from(c: BootstrapConfig) -> Self {
        TestConfig::Bootstrap(c)
    }
}

impl From<GammaConfig> for TestConfig {
    fn from(c: GammaConfig) -> Self {
        TestConfig::Gamma(c)
    }
}

impl From<SpectralConfig> for TestConfig {
    fn from(c: SpectralConfig) -> Self {
        TestConfig::Spectral(c)
    }
}

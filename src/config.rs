//! Configuration inputs of the reconstruction setup.

use crate::weno_error::WenoError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Highest polynomial order accepted by [`ReconstructionConfig::validate`].
pub const MAX_POLYNOMIAL_ORDER: usize = 6;

/// When the central stencil of a cell is split into sectorial stencils.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum SplitPolicy {
    /// Only central stencils are built.
    Never,
    /// Every cell gets sectorial stencils.
    Always,
    /// Split when the busiest sector holds more than `imbalance_ratio` times
    /// the mean number of members per sector.
    WhenAnisotropic { imbalance_ratio: f64 },
}

impl Default for SplitPolicy {
    fn default() -> Self {
        SplitPolicy::WhenAnisotropic {
            imbalance_ratio: 2.0,
        }
    }
}

/// Approximate-matching parameters of the matrix cache.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatrixCacheConfig {
    /// Relative tolerance; scaled by the largest absolute entry of the candidate.
    pub epsilon: f64,
    /// Half-width of the hash key window searched for a match.
    pub check_range: i64,
    /// Candidate entries below this magnitude are not compared.
    pub small: f64,
}

impl Default for MatrixCacheConfig {
    fn default() -> Self {
        Self {
            epsilon: 1e-6,
            check_range: 100,
            small: 1e-15,
        }
    }
}

/// Configuration of one reconstruction setup.
///
/// ```rust
/// # use weno_stencil::config::ReconstructionConfig;
/// let cfg = ReconstructionConfig { polynomial_order: 3, ..Default::default() };
/// assert!(cfg.validate().is_ok());
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReconstructionConfig {
    pub polynomial_order: usize,
    /// Stencil growth margin over the number of degrees of freedom.
    pub extend_ratio: f64,
    /// Search row subsets for the best-conditioned pseudo-inverse.
    pub best_conditioned: bool,
    pub split: SplitPolicy,
    pub cache: MatrixCacheConfig,
    /// Directory holding persisted setup state; `None` disables persistence.
    pub persist_dir: Option<PathBuf>,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            polynomial_order: 2,
            extend_ratio: 1.5,
            best_conditioned: false,
            split: SplitPolicy::default(),
            cache: MatrixCacheConfig::default(),
            persist_dir: None,
        }
    }
}

impl ReconstructionConfig {
    pub fn validate(&self) -> Result<(), WenoError> {
        if self.polynomial_order == 0 || self.polynomial_order > MAX_POLYNOMIAL_ORDER {
            return Err(WenoError::InvalidConfig(format!(
                "polynomial order must be in 1..={MAX_POLYNOMIAL_ORDER}, got {}",
                self.polynomial_order
            )));
        }
        if !self.extend_ratio.is_finite() || self.extend_ratio <= 1.0 {
            return Err(WenoError::InvalidConfig(format!(
                "extend ratio must be a finite value > 1, got {}",
                self.extend_ratio
            )));
        }
        if let SplitPolicy::WhenAnisotropic { imbalance_ratio } = self.split {
            if !imbalance_ratio.is_finite() || imbalance_ratio <= 1.0 {
                return Err(WenoError::InvalidConfig(format!(
                    "split imbalance ratio must be a finite value > 1, got {imbalance_ratio}"
                )));
            }
        }
        let cache = &self.cache;
        if !cache.epsilon.is_finite() || cache.epsilon <= 0.0 {
            return Err(WenoError::InvalidConfig(format!(
                "cache epsilon must be positive, got {}",
                cache.epsilon
            )));
        }
        if !cache.small.is_finite() || cache.small < 0.0 || cache.check_range < 0 {
            return Err(WenoError::InvalidConfig(
                "cache small-value threshold and check range must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

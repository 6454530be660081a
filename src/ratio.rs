// src/ratio.rs
//
// Variance-reduction-ratio estimation: the fraction of payoff variance
// removed by the control-variate correction, with the classical
// small-sample degrees-of-freedom adjustment. Reported once per corpus
// run; the per-(profile, strategy) breakdown is an opt-in diagnostic.

use std::collections::BTreeMap;
use std::fmt;

use crate::profile::ProfileKey;
use crate::stats::OnlineStats;

/// Bias-corrected variance-reduction ratio:
/// `((K - 2) / (K - units - 2)) * (1 - q / var)` where `q = σᵗ Σ⁻¹ σ`
/// and `var` is the population variance of the uncentered per-agent
/// average payoffs.
pub fn reduction_ratio(quadratic_form: f64, payoff_variance: f64, observations: u64, units: usize) -> f64 {
    let k = observations as f64;
    ((k - 2.0) / (k - units as f64 - 2.0)) * (1.0 - quadratic_form / payoff_variance)
}

/// True when the corpus is large enough for the degrees-of-freedom
/// correction to be meaningful (and finite).
pub fn has_sufficient_observations(observations: u64, units: usize) -> bool {
    observations > units as u64 + 2
}

/// Errors from the ratio estimator.
#[derive(Debug, Clone, PartialEq)]
pub enum RatioError {
    /// K must exceed units + 2 for the correction factor to be finite.
    InsufficientObservations { observations: u64, units: usize },
    /// The corpus payoffs carry no variance to reduce.
    DegenerateVariance,
}

impl fmt::Display for RatioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RatioError::InsufficientObservations { observations, units } => {
                write!(
                    f,
                    "Reduction ratio needs more than {} agent observations, got {}",
                    units + 2,
                    observations
                )
            }
            RatioError::DegenerateVariance => {
                write!(f, "Corpus payoffs have zero variance; ratio undefined")
            }
        }
    }
}

impl std::error::Error for RatioError {}

/// Per-(profile, strategy) ratio diagnostic entry.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyRatio {
    pub profile: ProfileKey,
    pub strategy: String,
    pub ratio: f64,
}

/// Evaluates the ratio against each (profile, strategy) bucket's own
/// payoff variance instead of the corpus-wide variance. Buckets with
/// zero variance are skipped.
pub fn per_strategy_ratios(
    payoff_stats: &BTreeMap<(ProfileKey, String), OnlineStats>,
    quadratic_form: f64,
    observations: u64,
    units: usize,
) -> Vec<StrategyRatio> {
    payoff_stats
        .iter()
        .filter(|(_, stats)| stats.variance_population() > 0.0)
        .map(|((profile, strategy), stats)| StrategyRatio {
            profile: profile.clone(),
            strategy: strategy.clone(),
            ratio: reduction_ratio(
                quadratic_form,
                stats.variance_population(),
                observations,
                units,
            ),
        })
        .collect()
}

// src/reduce.rs
//
// Variance-reduced scoring: replaces each agent's realized payoff with
// the profile/strategy grand average minus the control-variate
// correction, then re-aggregates through the same PayoffTable
// machinery as the raw pass so every reduced score lands in the same
// (profile, strategy) bucket as its raw counterpart.
//
// This module is a pure consumer of the coefficient solve; it never
// re-derives coefficients.

use crate::coefficients::Coefficients;
use crate::config::MarketConfig;
use crate::payoff::{strategy_averages, SampleAverages};
use crate::profile::profile_key;
use crate::report::{PayoffIndex, ReportError};
use crate::sample::{Agent, Sample};
use crate::values::{normalized_values, UnitValueMeans};

/// Variance-reduced score for one agent:
/// `base_avg - Σ_u c[u] * (normalized[u] - mean[u])`.
pub fn reduced_score(
    agent: &Agent,
    base_avg: f64,
    coefficients: &Coefficients,
    means: &UnitValueMeans,
    cfg: &MarketConfig,
) -> f64 {
    let normalized = normalized_values(agent, cfg);
    let mut score = base_avg;
    for ((c, nv), mean) in coefficients
        .as_slice()
        .iter()
        .zip(&normalized)
        .zip(means.as_slice())
    {
        score -= c * (nv - mean);
    }
    score
}

/// Computes one sample's per-strategy averages of variance-reduced
/// scores, centering each agent on the baseline grand average for its
/// (profile, strategy) bucket. A corpus profile missing from the
/// baseline report is fatal.
pub fn sample_reduced_averages(
    sample: &Sample,
    baseline: &PayoffIndex<'_>,
    coefficients: &Coefficients,
    means: &UnitValueMeans,
    cfg: &MarketConfig,
) -> Result<SampleAverages, ReportError> {
    let profile = profile_key(&sample.agents, cfg.group_size);
    let mut scores = Vec::with_capacity(sample.agents.len());
    for agent in &sample.agents {
        let base = baseline.average(&profile, &agent.strategy)?;
        scores.push(reduced_score(agent, base, coefficients, means, cfg));
    }
    Ok(strategy_averages(sample, &scores, cfg))
}

//! EGTA post-processing for repeated continuous double auction runs.
//!
//! This crate turns a corpus of per-run outcome records into an
//! estimated payoff table over strategy profiles, with variance reduced
//! by a control-variate regression. The binary (`src/main.rs`) is a
//! thin batch CLI around these components.
//!
//! The pipeline is two-stage: stage one aggregates raw payoffs and
//! normalized-value means into an immutable [`pipeline::CorpusStatistics`]
//! artifact; stage two fits control-variate coefficients against it,
//! re-scores the corpus with reduced variance, and estimates how much
//! variance the correction removed.

pub mod coefficients;
pub mod config;
pub mod convert;
pub mod corpus;
pub mod expected;
pub mod payoff;
pub mod pipeline;
pub mod profile;
pub mod ratio;
pub mod reduce;
pub mod report;
pub mod sample;
pub mod stats;
pub mod values;

// --- Re-exports for ergonomic external use ---------------------------------

pub use coefficients::{CoefficientError, Coefficients, CovarianceAccumulator};

pub use config::{ConfigError, GameMeta, MarketConfig, MatrixFormat};

pub use corpus::{CorpusDir, CorpusError};

pub use payoff::{agent_average_payoffs, strategy_averages, PayoffTable};

pub use pipeline::{
    collect_statistics, fit_control_variates, reduce_scores, run_all, CorpusStatistics,
    PipelineError, RunAllOutput,
};

pub use profile::{profile_key, ProfileKey};

pub use report::{GameReport, PayoffReport, ReportError};

pub use sample::{Agent, AgentId, Role, Sample, SampleError, Transaction};

pub use values::{normalized_values, UnitValueMeans};

// --- Cross-module invariants -------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> MarketConfig {
        MarketConfig {
            units: 2,
            reps: 5,
            v_min: 0.0,
            v_max: 100.0,
            group_size: 1,
        }
    }

    fn sample_json(first_strategy: &str) -> String {
        serde_json::json!({
            "agents": [
                { "id": 1, "strategy": first_strategy, "values": [60.0, 40.0] },
                { "id": 2, "strategy": "B", "values": [20.0, 30.0] }
            ],
            "repetitions": [
                { "id": 1, "transactions": [
                    { "buyer_id": 1, "seller_id": 2, "price": 50.0 }
                ] }
            ]
        })
        .to_string()
    }

    /// Raw and reduced scoring must agree on bucket placement: with zero
    /// coefficients the reduced table reproduces the raw averages under
    /// the same profile keys.
    #[test]
    fn zero_coefficients_keep_raw_buckets_and_averages() {
        let cfg = cfg();
        let sample = Sample::from_json_str(&sample_json("A"), &cfg).unwrap();

        let payoffs = agent_average_payoffs(&sample, &cfg);
        let mut table = PayoffTable::new();
        table.record_sample(&strategy_averages(&sample, &payoffs, &cfg));
        let raw = table.to_report();

        let index = raw.average_index();
        let means = UnitValueMeans::from_vec(vec![0.0, 0.0]);
        let zeros = Coefficients::zeros(cfg.units);
        let avgs = reduce::sample_reduced_averages(&sample, &index, &zeros, &means, &cfg).unwrap();

        let profile = &raw.profiles[0];
        assert_eq!(avgs.profile, profile.key);
        for (strategy, reduced_avg) in avgs.strategies.iter().zip(&avgs.averages) {
            let raw_row = profile
                .strategies
                .iter()
                .find(|s| &s.name == strategy)
                .unwrap();
            assert_eq!(*reduced_avg, raw_row.payoff);
        }
    }

    /// The profile key derived while aggregating matches the one a
    /// report round-trip hands back to the centering lookup.
    #[test]
    fn report_round_trip_preserves_profile_keys() {
        let cfg = cfg();
        let sample = Sample::from_json_str(&sample_json("A"), &cfg).unwrap();
        let payoffs = agent_average_payoffs(&sample, &cfg);
        let mut table = PayoffTable::new();
        table.record_sample(&strategy_averages(&sample, &payoffs, &cfg));

        let report = table.to_report();
        let reparsed = PayoffReport::from_plain(&report.to_plain()).unwrap();
        let index = reparsed.average_index();

        let key = profile_key(&sample.agents, cfg.group_size);
        assert_eq!(key.as_str(), "1 A 1 B");
        assert!(index.average(&key, "A").is_ok());
        assert!(index.average(&key, "B").is_ok());
    }
}

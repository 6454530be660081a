// src/payoff.rs
//
// Realized payoff aggregation: per-agent averages over repetitions,
// per-sample strategy averages, and the corpus-wide PayoffTable.
//
// Aggregation is two-level: within a sample, agent payoffs are
// averaged per strategy; across the corpus,
// those per-sample strategy averages are the observations accumulated
// per (profile, strategy), with the profile's sample count as the
// denominator. Standard deviations are population std-devs of the
// per-sample averages around the grand average.

use std::collections::BTreeMap;

use crate::config::MarketConfig;
use crate::profile::{profile_key, strategy_tallies, ProfileKey};
use crate::report::{PayoffReport, ProfileReport, StrategyReport};
use crate::sample::{Role, Sample};

/// Computes each agent's realized payoff averaged over repetitions,
/// in agent order.
///
/// Within a repetition, the agent's recorded transaction prices are
/// matched to value slots in arrival order (not sorted by price):
/// buyer payoff per unit is `value - price`, seller payoff is
/// `price - value`. Repetitions without transactions contribute 0 and
/// remain in the averaging denominator.
pub fn agent_average_payoffs(sample: &Sample, cfg: &MarketConfig) -> Vec<f64> {
    let ledger = sample.prices_by_repetition(cfg);
    sample
        .agents
        .iter()
        .map(|agent| {
            let role = agent.role();
            let mut total = 0.0;
            for per_agent in &ledger {
                if let Some(prices) = per_agent.get(&agent.id) {
                    for (rank, price) in prices.iter().enumerate() {
                        total += match role {
                            Role::Buyer => agent.values[rank] - price,
                            Role::Seller => price - agent.values[rank],
                        };
                    }
                }
            }
            total / cfg.reps as f64
        })
        .collect()
}

/// Per-sample strategy averages of one score vector (raw payoffs or
/// variance-reduced scores), ready to fold into a `PayoffTable`.
#[derive(Debug, Clone)]
pub struct SampleAverages {
    /// Canonical profile of the sample.
    pub profile: ProfileKey,
    /// Distinct strategies, sorted by name.
    pub strategies: Vec<String>,
    /// Per-strategy agent tally divided by the role-group size,
    /// parallel to `strategies`.
    pub reduced_counts: Vec<u32>,
    /// Per-strategy mean score over the sample's agents, parallel to
    /// `strategies`.
    pub averages: Vec<f64>,
}

/// Averages `scores` (one entry per agent, in agent order) per strategy
/// for one sample.
pub fn strategy_averages(sample: &Sample, scores: &[f64], cfg: &MarketConfig) -> SampleAverages {
    debug_assert_eq!(scores.len(), sample.agents.len());

    let tallies = strategy_tallies(&sample.agents);
    let mut sums: BTreeMap<&str, f64> = BTreeMap::new();
    for (agent, score) in sample.agents.iter().zip(scores) {
        *sums.entry(agent.strategy.as_str()).or_insert(0.0) += score;
    }

    let mut strategies = Vec::with_capacity(tallies.len());
    let mut reduced_counts = Vec::with_capacity(tallies.len());
    let mut averages = Vec::with_capacity(tallies.len());
    for (strategy, tally) in &tallies {
        strategies.push(strategy.clone());
        reduced_counts.push(tally / cfg.group_size);
        averages.push(sums[strategy.as_str()] / f64::from(*tally));
    }

    SampleAverages {
        profile: profile_key(&sample.agents, cfg.group_size),
        strategies,
        reduced_counts,
        averages,
    }
}

#[derive(Debug, Clone, Default)]
struct Cell {
    reduced_count: u32,
    sum: f64,
    sum_sq: f64,
}

#[derive(Debug, Clone, Default)]
struct ProfileBucket {
    sample_count: u32,
    strategies: Vec<String>,
    cells: BTreeMap<String, Cell>,
}

/// Corpus-wide accumulator of per-(profile, strategy) sums, spreads and
/// counts. Purely additive; entries are inserted or updated, never
/// removed or decremented. Keyed by `BTreeMap` so enumeration order is
/// deterministic regardless of corpus iteration order.
#[derive(Debug, Clone, Default)]
pub struct PayoffTable {
    profiles: BTreeMap<ProfileKey, ProfileBucket>,
}

impl PayoffTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn profile_count(&self) -> usize {
        self.profiles.len()
    }

    /// Pass one: folds one sample's strategy averages into the sums.
    pub fn record_sample(&mut self, avgs: &SampleAverages) {
        let bucket = self.profiles.entry(avgs.profile.clone()).or_default();
        bucket.sample_count += 1;
        if bucket.strategies.is_empty() {
            bucket.strategies = avgs.strategies.clone();
        }
        for ((strategy, count), avg) in avgs
            .strategies
            .iter()
            .zip(&avgs.reduced_counts)
            .zip(&avgs.averages)
        {
            let cell = bucket.cells.entry(strategy.clone()).or_default();
            cell.reduced_count = *count;
            cell.sum += avg;
        }
    }

    /// Pass two: folds one sample's squared deviation from the grand
    /// average into the spread sums. Must run after every sample has
    /// been through `record_sample`; profiles unseen in pass one are
    /// ignored.
    pub fn record_spread(&mut self, avgs: &SampleAverages) {
        let bucket = match self.profiles.get_mut(&avgs.profile) {
            Some(bucket) => bucket,
            None => return,
        };
        let samples = f64::from(bucket.sample_count);
        for (strategy, avg) in avgs.strategies.iter().zip(&avgs.averages) {
            if let Some(cell) = bucket.cells.get_mut(strategy) {
                let grand = cell.sum / samples;
                cell.sum_sq += (avg - grand) * (avg - grand);
            }
        }
    }

    /// Snapshots the table into a report: grand averages and population
    /// std-devs per (profile, strategy), profiles in key order.
    pub fn to_report(&self) -> PayoffReport {
        let profiles = self
            .profiles
            .iter()
            .map(|(key, bucket)| {
                let samples = f64::from(bucket.sample_count);
                let strategies = bucket
                    .strategies
                    .iter()
                    .map(|name| {
                        let cell = &bucket.cells[name];
                        StrategyReport {
                            name: name.clone(),
                            count: cell.reduced_count,
                            payoff: cell.sum / samples,
                            std_dev: (cell.sum_sq / samples).sqrt(),
                        }
                    })
                    .collect();
                ProfileReport {
                    key: key.clone(),
                    sample_count: bucket.sample_count,
                    strategies,
                }
            })
            .collect();
        PayoffReport { profiles }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{Agent, Transaction};

    fn cfg() -> MarketConfig {
        MarketConfig {
            units: 2,
            reps: 5,
            v_min: 0.0,
            v_max: 100.0,
            group_size: 1,
        }
    }

    fn buyer(id: u32, strategy: &str) -> Agent {
        Agent {
            id,
            strategy: strategy.to_string(),
            values: vec![60.0, 40.0],
            score: None,
        }
    }

    fn seller(id: u32, strategy: &str) -> Agent {
        Agent {
            id,
            strategy: strategy.to_string(),
            values: vec![20.0, 30.0],
            score: None,
        }
    }

    fn tx(buyer_id: u32, seller_id: u32, price: f64) -> Transaction {
        Transaction {
            buyer_id,
            seller_id,
            price,
        }
    }

    /// An agent trading in 2 of 5 repetitions for a fixed per-repetition
    /// payoff of 10 averages to (10 + 10 + 0 + 0 + 0) / 5 = 4.
    #[test]
    fn zero_transaction_repetitions_stay_in_denominator() {
        let sample = Sample {
            agents: vec![buyer(1, "A"), seller(2, "B")],
            // Buyer pays 50 against value 60: payoff 10 per repetition.
            repetitions: vec![
                vec![tx(1, 2, 50.0)],
                vec![tx(1, 2, 50.0)],
                vec![],
                vec![],
                vec![],
            ],
        };
        let payoffs = agent_average_payoffs(&sample, &cfg());
        assert_eq!(payoffs[0], 4.0);
        // The seller earned 50 - 20 = 30 twice: (30 + 30) / 5 = 12.
        assert_eq!(payoffs[1], 12.0);
    }

    /// Transactions map onto value slots in arrival order, not by price.
    #[test]
    fn arrival_order_assigns_value_slots() {
        let sample = Sample {
            agents: vec![buyer(1, "A"), seller(2, "B")],
            repetitions: vec![
                vec![tx(1, 2, 30.0), tx(1, 2, 50.0)],
                vec![],
                vec![],
                vec![],
                vec![],
            ],
        };
        let payoffs = agent_average_payoffs(&sample, &cfg());
        // Buyer: (60 - 30) + (40 - 50) = 20, averaged over 5 reps.
        assert_eq!(payoffs[0], 4.0);
        // Seller: (30 - 20) + (50 - 30) = 30, averaged over 5 reps.
        assert_eq!(payoffs[1], 6.0);
    }

    #[test]
    fn strategy_averages_group_by_name() {
        let sample = Sample {
            agents: vec![buyer(1, "A"), buyer(2, "A"), seller(3, "B")],
            repetitions: vec![vec![], vec![], vec![], vec![], vec![]],
        };
        let avgs = strategy_averages(&sample, &[4.0, 8.0, 3.0], &cfg());
        assert_eq!(avgs.profile.as_str(), "2 A 1 B");
        assert_eq!(avgs.strategies, vec!["A", "B"]);
        assert_eq!(avgs.reduced_counts, vec![2, 1]);
        assert_eq!(avgs.averages, vec![6.0, 3.0]);
    }

    fn sample_avgs(profile: &str, avg_a: f64) -> SampleAverages {
        SampleAverages {
            profile: ProfileKey::from_string(profile.to_string()),
            strategies: vec!["A".to_string()],
            reduced_counts: vec![2],
            averages: vec![avg_a],
        }
    }

    #[test]
    fn table_accumulation_is_commutative() {
        let first = sample_avgs("2 A", 10.0);
        let second = sample_avgs("2 A", 20.0);

        let mut forward = PayoffTable::new();
        forward.record_sample(&first);
        forward.record_sample(&second);

        let mut backward = PayoffTable::new();
        backward.record_sample(&second);
        backward.record_sample(&first);

        let a = forward.to_report();
        let b = backward.to_report();
        assert_eq!(a.profiles[0].strategies[0].payoff, 15.0);
        assert_eq!(
            a.profiles[0].strategies[0].payoff,
            b.profiles[0].strategies[0].payoff
        );
        assert_eq!(a.profiles[0].sample_count, b.profiles[0].sample_count);
    }

    #[test]
    fn spread_pass_yields_population_std_dev() {
        let first = sample_avgs("2 A", 10.0);
        let second = sample_avgs("2 A", 20.0);

        let mut table = PayoffTable::new();
        table.record_sample(&first);
        table.record_sample(&second);
        table.record_spread(&first);
        table.record_spread(&second);

        let report = table.to_report();
        let strat = &report.profiles[0].strategies[0];
        assert_eq!(strat.payoff, 15.0);
        // Population std-dev of {10, 20} around 15 is 5.
        assert_eq!(strat.std_dev, 5.0);
    }

    #[test]
    fn profiles_enumerate_in_key_order() {
        let mut table = PayoffTable::new();
        table.record_sample(&sample_avgs("2 ZIP", 1.0));
        table.record_sample(&sample_avgs("2 GD", 1.0));
        let report = table.to_report();
        assert_eq!(report.profiles[0].key.as_str(), "2 GD");
        assert_eq!(report.profiles[1].key.as_str(), "2 ZIP");
    }
}

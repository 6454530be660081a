// src/sample.rs
//
// In-memory model of one simulation run's outcome record:
// agents in file order, transactions grouped by repetition.
// Records are read from JSON run files; structural validation
// happens after parsing so serde derives stay on the wire shape.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::MarketConfig;

/// Agent identifier, unique within one sample.
pub type AgentId = u32;

/// Market side of an agent, inferred from its value ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Buyer,
    Seller,
}

/// One executed trade between two agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub buyer_id: AgentId,
    pub seller_id: AgentId,
    pub price: f64,
}

/// One agent of a simulation run.
#[derive(Debug, Clone, PartialEq)]
pub struct Agent {
    /// Unique id within the sample.
    pub id: AgentId,
    /// Name of the strategy this agent played.
    pub strategy: String,
    /// Private per-unit valuations, ordered by unit slot. Buyers carry
    /// descending values, sellers ascending.
    pub values: Vec<f64>,
    /// Externally-reported score, when the simulator recorded one.
    pub score: Option<f64>,
}

impl Agent {
    /// Infers the agent's market side from the value ordering.
    ///
    /// An agent is a buyer iff its first value exceeds its last; this is
    /// the sole source of role information in the record format and must
    /// be re-derived wherever a role is needed.
    pub fn role(&self) -> Role {
        if self.values[0] > self.values[self.values.len() - 1] {
            Role::Buyer
        } else {
            Role::Seller
        }
    }
}

/// One simulation run: agents plus transactions grouped by repetition.
///
/// `repetitions` always holds exactly `MarketConfig::reps` slots; input
/// records carry 1-based repetition ids which are normalized to 0-based
/// slots during validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub agents: Vec<Agent>,
    pub repetitions: Vec<Vec<Transaction>>,
}

// --- Wire shape -------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawSample {
    agents: Vec<RawAgent>,
    #[serde(default)]
    repetitions: Vec<RawRepetition>,
}

#[derive(Debug, Deserialize)]
struct RawAgent {
    id: AgentId,
    strategy: String,
    values: Vec<f64>,
    #[serde(default)]
    score: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawRepetition {
    /// 1-based repetition id as written by the simulator.
    id: u32,
    #[serde(default)]
    transactions: Vec<Transaction>,
}

impl Sample {
    /// Reads and validates one run record from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(
        path: P,
        cfg: &MarketConfig,
    ) -> Result<Self, SampleError> {
        let contents = fs::read_to_string(path.as_ref()).map_err(|e| SampleError::Io {
            path: path.as_ref().display().to_string(),
            source: e.to_string(),
        })?;
        Self::from_json_str(&contents, cfg)
    }

    /// Parses and validates one run record from JSON text.
    pub fn from_json_str(json: &str, cfg: &MarketConfig) -> Result<Self, SampleError> {
        let raw: RawSample = serde_json::from_str(json).map_err(|e| SampleError::Parse {
            source: e.to_string(),
        })?;
        Self::from_raw(raw, cfg)
    }

    fn from_raw(raw: RawSample, cfg: &MarketConfig) -> Result<Self, SampleError> {
        if raw.agents.is_empty() {
            return Err(SampleError::Malformed {
                message: "record contains no agents".to_string(),
            });
        }

        let mut seen = HashSet::new();
        let mut agents = Vec::with_capacity(raw.agents.len());
        for a in raw.agents {
            if !seen.insert(a.id) {
                return Err(SampleError::Malformed {
                    message: format!("duplicate agent id {}", a.id),
                });
            }
            if a.values.len() != cfg.units {
                return Err(SampleError::Malformed {
                    message: format!(
                        "agent {} has {} values, expected {}",
                        a.id,
                        a.values.len(),
                        cfg.units
                    ),
                });
            }
            agents.push(Agent {
                id: a.id,
                strategy: a.strategy,
                values: a.values,
                score: a.score,
            });
        }

        let mut repetitions = vec![Vec::new(); cfg.reps];
        for rep in raw.repetitions {
            if rep.id == 0 || rep.id as usize > cfg.reps {
                return Err(SampleError::Malformed {
                    message: format!(
                        "repetition id {} outside 1..={}",
                        rep.id, cfg.reps
                    ),
                });
            }
            repetitions[rep.id as usize - 1].extend(rep.transactions);
        }

        Ok(Self {
            agents,
            repetitions,
        })
    }

    /// Builds the per-repetition transaction-price ledger.
    ///
    /// For every repetition, maps agent id to the prices of that agent's
    /// transactions in arrival order. Both counterparties receive each
    /// price; a transaction is discarded (not an error) when either party
    /// already holds `cfg.units` prices in that repetition.
    pub fn prices_by_repetition(&self, cfg: &MarketConfig) -> Vec<HashMap<AgentId, Vec<f64>>> {
        let mut ledger: Vec<HashMap<AgentId, Vec<f64>>> = vec![HashMap::new(); cfg.reps];
        for (rep, transactions) in self.repetitions.iter().enumerate() {
            let per_agent = &mut ledger[rep];
            for tx in transactions {
                per_agent.entry(tx.buyer_id).or_default();
                per_agent.entry(tx.seller_id).or_default();
                let buyer_full = per_agent[&tx.buyer_id].len() == cfg.units;
                let seller_full = per_agent[&tx.seller_id].len() == cfg.units;
                if buyer_full || seller_full {
                    continue;
                }
                for id in [tx.buyer_id, tx.seller_id] {
                    if let Some(prices) = per_agent.get_mut(&id) {
                        prices.push(tx.price);
                    }
                }
            }
        }
        ledger
    }
}

/// Errors while reading one run record.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleError {
    Io { path: String, source: String },
    Parse { source: String },
    Malformed { message: String },
}

impl fmt::Display for SampleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleError::Io { path, source } => {
                write!(f, "Failed to read sample file '{}': {}", path, source)
            }
            SampleError::Parse { source } => {
                write!(f, "Failed to parse sample record: {}", source)
            }
            SampleError::Malformed { message } => {
                write!(f, "Malformed sample record: {}", message)
            }
        }
    }
}

impl std::error::Error for SampleError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> MarketConfig {
        MarketConfig {
            units: 3,
            reps: 2,
            v_min: 0.0,
            v_max: 100.0,
            group_size: 1,
        }
    }

    fn record() -> serde_json::Value {
        serde_json::json!({
            "agents": [
                { "id": 1, "strategy": "ZI", "values": [90.0, 80.0, 70.0] },
                { "id": 2, "strategy": "ZIP", "values": [10.0, 20.0, 30.0], "score": 12.5 }
            ],
            "repetitions": [
                { "id": 1, "transactions": [
                    { "buyer_id": 1, "seller_id": 2, "price": 50.0 }
                ] },
                { "id": 2 }
            ]
        })
    }

    #[test]
    fn parses_valid_record() {
        let sample = Sample::from_json_str(&record().to_string(), &cfg()).unwrap();
        assert_eq!(sample.agents.len(), 2);
        assert_eq!(sample.agents[0].strategy, "ZI");
        assert_eq!(sample.agents[1].score, Some(12.5));
        assert_eq!(sample.repetitions.len(), 2);
        assert_eq!(sample.repetitions[0].len(), 1);
        assert!(sample.repetitions[1].is_empty());
    }

    #[test]
    fn buyer_iff_descending_values() {
        let sample = Sample::from_json_str(&record().to_string(), &cfg()).unwrap();
        assert_eq!(sample.agents[0].role(), Role::Buyer);
        assert_eq!(sample.agents[1].role(), Role::Seller);
    }

    #[test]
    fn repetition_ids_are_one_based() {
        let mut rec = record();
        rec["repetitions"][0]["id"] = serde_json::json!(3);
        let err = Sample::from_json_str(&rec.to_string(), &cfg()).unwrap_err();
        assert!(matches!(err, SampleError::Malformed { .. }));
    }

    #[test]
    fn wrong_value_count_is_malformed() {
        let mut rec = record();
        rec["agents"][0]["values"] = serde_json::json!([1.0, 2.0]);
        let err = Sample::from_json_str(&rec.to_string(), &cfg()).unwrap_err();
        assert!(matches!(err, SampleError::Malformed { .. }));
    }

    #[test]
    fn duplicate_agent_id_is_malformed() {
        let mut rec = record();
        rec["agents"][1]["id"] = serde_json::json!(1);
        let err = Sample::from_json_str(&rec.to_string(), &cfg()).unwrap_err();
        assert!(matches!(err, SampleError::Malformed { .. }));
    }

    #[test]
    fn missing_strategy_fails_to_parse() {
        let rec = serde_json::json!({
            "agents": [{ "id": 1, "values": [1.0, 2.0, 3.0] }],
            "repetitions": []
        });
        let err = Sample::from_json_str(&rec.to_string(), &cfg()).unwrap_err();
        assert!(matches!(err, SampleError::Parse { .. }));
    }

    #[test]
    fn saturated_agents_discard_excess_transactions() {
        let tx = serde_json::json!({ "buyer_id": 1, "seller_id": 2, "price": 40.0 });
        let rec = serde_json::json!({
            "agents": [
                { "id": 1, "strategy": "ZI", "values": [90.0, 80.0, 70.0] },
                { "id": 2, "strategy": "ZIP", "values": [10.0, 20.0, 30.0] }
            ],
            "repetitions": [
                { "id": 1, "transactions": [tx, tx, tx, tx, tx] }
            ]
        });
        let sample = Sample::from_json_str(&rec.to_string(), &cfg()).unwrap();
        let ledger = sample.prices_by_repetition(&cfg());
        // Capacity is 3 units; the 4th and 5th trades are dropped for both.
        assert_eq!(ledger[0][&1].len(), 3);
        assert_eq!(ledger[0][&2].len(), 3);
    }

    #[test]
    fn prices_keep_arrival_order() {
        let rec = serde_json::json!({
            "agents": [
                { "id": 1, "strategy": "ZI", "values": [90.0, 80.0, 70.0] },
                { "id": 2, "strategy": "ZIP", "values": [10.0, 20.0, 30.0] }
            ],
            "repetitions": [
                { "id": 1, "transactions": [
                    { "buyer_id": 1, "seller_id": 2, "price": 55.0 },
                    { "buyer_id": 1, "seller_id": 2, "price": 45.0 }
                ] }
            ]
        });
        let sample = Sample::from_json_str(&rec.to_string(), &cfg()).unwrap();
        let ledger = sample.prices_by_repetition(&cfg());
        assert_eq!(ledger[0][&1], vec![55.0, 45.0]);
    }
}

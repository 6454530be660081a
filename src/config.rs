// src/config.rs
//
// Central configuration for the EGTA post-processing pipeline.
// The market's fixed constants (unit capacity, repetition count,
// valuation bounds, role-group size) are injected through
// MarketConfig so the same estimators can be reused across market
// configurations.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Market-level constants shared by every stage of the pipeline.
#[derive(Debug, Clone)]
pub struct MarketConfig {
    /// Per-agent unit capacity: number of private value slots per agent
    /// and the per-repetition cap on an agent's transactions.
    pub units: usize,
    /// Fixed number of repetitions per simulation run. Repetitions with
    /// no transactions still count in payoff averaging denominators.
    pub reps: usize,
    /// Global lower bound on private valuations.
    pub v_min: f64,
    /// Global upper bound on private valuations.
    pub v_max: f64,
    /// Number of agents playing each named strategy in a run. Profile
    /// keys carry strategy tallies divided by this group size.
    pub group_size: u32,
}

impl Default for MarketConfig {
    fn default() -> Self {
        // CDA market defaults: 16 players in groups of 4, 10 tradable
        // units each, valuations drawn from [61, 260], 5 repetitions.
        Self {
            units: 10,
            reps: 5,
            v_min: 61.0,
            v_max: 260.0,
            group_size: 4,
        }
    }
}

impl MarketConfig {
    /// Checks internal consistency before any corpus work begins.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.units == 0 {
            return Err(ConfigError::InvalidConfig {
                field: "units".to_string(),
                message: "unit capacity must be positive".to_string(),
            });
        }
        if self.reps == 0 {
            return Err(ConfigError::InvalidConfig {
                field: "reps".to_string(),
                message: "repetition count must be positive".to_string(),
            });
        }
        if self.group_size == 0 {
            return Err(ConfigError::InvalidConfig {
                field: "group_size".to_string(),
                message: "role-group size must be positive".to_string(),
            });
        }
        if !(self.v_min < self.v_max) {
            return Err(ConfigError::InvalidConfig {
                field: "v_min/v_max".to_string(),
                message: format!(
                    "valuation bounds must satisfy v_min < v_max (got {} / {})",
                    self.v_min, self.v_max
                ),
            });
        }
        Ok(())
    }
}

/// Static metadata emitted in the game-description report header.
///
/// These fields describe the simulator that produced the corpus; they are
/// configuration, not computed output.
#[derive(Debug, Clone)]
pub struct GameMeta {
    /// Opaque game identifier.
    pub id: String,
    /// Human-readable game name.
    pub name: String,
    /// Full simulator name and version.
    pub simulator_fullname: String,
    /// Opaque simulator parameter fingerprint, emitted verbatim.
    pub parameter_hash: BTreeMap<String, String>,
    /// Name of the single role every agent plays.
    pub role_name: String,
    /// Declared per-strategy group size for the role.
    pub role_count: u32,
    /// Declared strategy universe for the role.
    pub strategies: Vec<String>,
}

impl Default for GameMeta {
    fn default() -> Self {
        Self {
            id: "329509325323".to_string(),
            name: "CDA".to_string(),
            simulator_fullname: "CDA-2.11".to_string(),
            parameter_hash: BTreeMap::from([("foo".to_string(), "bar".to_string())]),
            role_name: "ALL".to_string(),
            role_count: 4,
            strategies: ["AA", "GD", "GDX", "KAPLAN", "RB", "ZI", "ZIBTQ", "ZIP"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Layout of an externally produced payoff-matrix text file
/// (see `convert`): a fixed-size header to skip, then rows of
/// strategy-id columns followed by the matching payoff columns.
#[derive(Debug, Clone)]
pub struct MatrixFormat {
    /// Number of header lines to discard before the payoff rows.
    pub header_lines: usize,
    /// Number of strategy slots (and payoff columns) per row.
    pub slots_per_row: usize,
    /// Strategy id -> strategy name, in id order.
    pub strategy_names: Vec<(u32, String)>,
}

impl Default for MatrixFormat {
    fn default() -> Self {
        let names = ["GD", "GDX", "KAPLAN", "ZI", "ZIP", "ZIBTQ", "RB"];
        Self {
            header_lines: 18,
            slots_per_row: 4,
            strategy_names: names
                .iter()
                .enumerate()
                .map(|(id, name)| (id as u32, name.to_string()))
                .collect(),
        }
    }
}

impl MatrixFormat {
    /// Resolves a strategy id to its configured name.
    pub fn name_of(&self, id: u32) -> Option<&str> {
        self.strategy_names
            .iter()
            .find(|(sid, _)| *sid == id)
            .map(|(_, name)| name.as_str())
    }
}

/// Configuration / boundary errors, checked eagerly before any
/// corpus processing begins.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A required input path does not exist.
    MissingInput { path: String },
    /// An output path already exists; the pipeline never overwrites.
    OutputExists { path: String },
    /// The market configuration is internally inconsistent.
    InvalidConfig { field: String, message: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingInput { path } => {
                write!(f, "Input path '{}' does not exist", path)
            }
            ConfigError::OutputExists { path } => {
                write!(f, "Output path '{}' already exists; refusing to overwrite", path)
            }
            ConfigError::InvalidConfig { field, message } => {
                write!(f, "Invalid configuration for '{}': {}", field, message)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Fails with `ConfigError::MissingInput` unless `path` exists.
pub fn ensure_input_exists(path: &Path) -> Result<(), ConfigError> {
    if path.exists() {
        Ok(())
    } else {
        Err(ConfigError::MissingInput {
            path: path.display().to_string(),
        })
    }
}

/// Fails with `ConfigError::OutputExists` if `path` is already present.
pub fn ensure_output_absent(path: &Path) -> Result<(), ConfigError> {
    if path.exists() {
        Err(ConfigError::OutputExists {
            path: path.display().to_string(),
        })
    } else {
        Ok(())
    }
}

// src/report.rs
//
// Payoff report emission and parsing.
//
// The plain-text layout is positional and parsed by later pipeline
// stages, so it is preserved line for line:
//
//   <profile count>
//   then per profile:
//     <profile key>
//     <sample count>
//     <strategy count>
//     then per strategy: <name> / <count> / <payoff> / <std dev>
//
// Numbers use Rust's shortest round-trip f64 formatting, which makes
// emit -> parse -> emit byte-identical.
//
// The game-description report nests the same table under static game
// metadata and is serialized as JSON.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::GameMeta;
use crate::profile::ProfileKey;
use crate::values::write_atomic;

/// One strategy row of a profile: name, reduced occurrence count,
/// average payoff and its population std-dev.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyReport {
    pub name: String,
    pub count: u32,
    pub payoff: f64,
    pub std_dev: f64,
}

/// One profile of the payoff table.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileReport {
    pub key: ProfileKey,
    /// Number of corpus samples that played this profile.
    pub sample_count: u32,
    /// Strategy rows in the profile's stored order.
    pub strategies: Vec<StrategyReport>,
}

/// The profile -> strategy -> (count, payoff, std-dev) table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PayoffReport {
    pub profiles: Vec<ProfileReport>,
}

impl PayoffReport {
    /// Renders the positional plain-text layout.
    pub fn to_plain(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.profiles.len().to_string());
        out.push('\n');
        for profile in &self.profiles {
            out.push_str(profile.key.as_str());
            out.push('\n');
            out.push_str(&profile.sample_count.to_string());
            out.push('\n');
            out.push_str(&profile.strategies.len().to_string());
            out.push('\n');
            for strategy in &profile.strategies {
                out.push_str(&strategy.name);
                out.push('\n');
                out.push_str(&strategy.count.to_string());
                out.push('\n');
                out.push_str(&strategy.payoff.to_string());
                out.push('\n');
                out.push_str(&strategy.std_dev.to_string());
                out.push('\n');
            }
        }
        out
    }

    /// Parses the positional plain-text layout back into a table.
    pub fn from_plain(text: &str) -> Result<Self, ReportError> {
        let lines: Vec<&str> = text.lines().collect();
        let mut cursor = Cursor { lines, pos: 0 };

        let profile_count: usize = cursor.parse("profile count")?;
        let mut profiles = Vec::with_capacity(profile_count);
        for _ in 0..profile_count {
            let key = ProfileKey::from_string(cursor.take("profile key")?.to_string());
            let sample_count: u32 = cursor.parse("sample count")?;
            let strategy_count: usize = cursor.parse("strategy count")?;
            let mut strategies = Vec::with_capacity(strategy_count);
            for _ in 0..strategy_count {
                let name = cursor.take("strategy name")?.to_string();
                let count: u32 = cursor.parse("strategy count")?;
                let payoff: f64 = cursor.parse("payoff")?;
                let std_dev: f64 = cursor.parse("std dev")?;
                strategies.push(StrategyReport {
                    name,
                    count,
                    payoff,
                    std_dev,
                });
            }
            profiles.push(ProfileReport {
                key,
                sample_count,
                strategies,
            });
        }
        Ok(Self { profiles })
    }

    /// Loads a plain-text report from disk.
    pub fn load_plain(path: &Path) -> Result<Self, ReportError> {
        let contents = fs::read_to_string(path).map_err(|e| ReportError::Io {
            path: path.display().to_string(),
            source: e.to_string(),
        })?;
        Self::from_plain(&contents)
    }

    /// Writes the plain-text report atomically.
    pub fn write_plain(&self, path: &Path) -> Result<(), ReportError> {
        write_atomic(path, &self.to_plain()).map_err(|e| ReportError::Io {
            path: path.display().to_string(),
            source: e.to_string(),
        })
    }

    /// Builds an average lookup keyed by (profile key, strategy name),
    /// for the stages that center payoffs against this report.
    pub fn average_index(&self) -> PayoffIndex<'_> {
        let mut index = HashMap::new();
        for profile in &self.profiles {
            for strategy in &profile.strategies {
                index.insert(
                    (profile.key.as_str(), strategy.name.as_str()),
                    strategy.payoff,
                );
            }
        }
        PayoffIndex { index }
    }
}

/// Borrowed (profile, strategy) -> average payoff lookup.
#[derive(Debug)]
pub struct PayoffIndex<'a> {
    index: HashMap<(&'a str, &'a str), f64>,
}

impl PayoffIndex<'_> {
    /// Fetches the grand average for a (profile, strategy) pair. Missing
    /// entries mean the baseline report does not cover the corpus being
    /// processed, which is fatal for the caller.
    pub fn average(&self, profile: &ProfileKey, strategy: &str) -> Result<f64, ReportError> {
        self.index
            .get(&(profile.as_str(), strategy))
            .copied()
            .ok_or_else(|| ReportError::MissingEntry {
                profile: profile.as_str().to_string(),
                strategy: strategy.to_string(),
            })
    }
}

struct Cursor<'a> {
    lines: Vec<&'a str>,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, what: &str) -> Result<&'a str, ReportError> {
        let line = self
            .lines
            .get(self.pos)
            .copied()
            .ok_or_else(|| ReportError::Parse {
                line: self.pos + 1,
                message: format!("unexpected end of report, expected {}", what),
            })?;
        self.pos += 1;
        Ok(line)
    }

    fn parse<T: std::str::FromStr>(&mut self, what: &str) -> Result<T, ReportError>
    where
        T::Err: fmt::Display,
    {
        let pos = self.pos;
        let line = self.take(what)?;
        line.trim().parse().map_err(|e: T::Err| ReportError::Parse {
            line: pos + 1,
            message: format!("bad {}: {}", what, e),
        })
    }
}

// --- Game-description report ------------------------------------------------

/// Per-strategy entry of a game-description profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameStrategy {
    pub name: String,
    pub count: u32,
    pub payoff: f64,
    pub payoff_std: f64,
}

/// Role section of a game-description profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameProfileRole {
    pub name: String,
    pub strategies: Vec<GameStrategy>,
}

/// One profile of the game-description report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameProfile {
    pub id: String,
    pub sample_count: u32,
    pub roles: Vec<GameProfileRole>,
}

/// Declared role of the game header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRole {
    pub name: String,
    pub count: u32,
    pub strategies: Vec<String>,
}

/// Full game-description report: static metadata header wrapping the
/// profile payoff table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameReport {
    pub id: String,
    pub name: String,
    pub simulator_fullname: String,
    pub parameter_hash: BTreeMap<String, String>,
    pub roles: Vec<GameRole>,
    pub profiles: Vec<GameProfile>,
}

impl GameReport {
    /// Nests a payoff table under the static game metadata. Profile ids
    /// are assigned by enumeration order.
    pub fn from_payoffs(meta: &GameMeta, report: &PayoffReport) -> Self {
        let profiles = report
            .profiles
            .iter()
            .enumerate()
            .map(|(id, profile)| GameProfile {
                id: id.to_string(),
                sample_count: profile.sample_count,
                roles: vec![GameProfileRole {
                    name: meta.role_name.clone(),
                    strategies: profile
                        .strategies
                        .iter()
                        .map(|s| GameStrategy {
                            name: s.name.clone(),
                            count: s.count,
                            payoff: s.payoff,
                            payoff_std: s.std_dev,
                        })
                        .collect(),
                }],
            })
            .collect();
        Self {
            id: meta.id.clone(),
            name: meta.name.clone(),
            simulator_fullname: meta.simulator_fullname.clone(),
            parameter_hash: meta.parameter_hash.clone(),
            roles: vec![GameRole {
                name: meta.role_name.clone(),
                count: meta.role_count,
                strategies: meta.strategies.clone(),
            }],
            profiles,
        }
    }

    /// Writes the report as pretty-printed JSON, atomically.
    pub fn write_to(&self, path: &Path) -> Result<(), ReportError> {
        let json = serde_json::to_string_pretty(self).map_err(|e| ReportError::Io {
            path: path.display().to_string(),
            source: e.to_string(),
        })?;
        write_atomic(path, &json).map_err(|e| ReportError::Io {
            path: path.display().to_string(),
            source: e.to_string(),
        })
    }
}

/// Errors while reading or writing payoff reports.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportError {
    Io { path: String, source: String },
    Parse { line: usize, message: String },
    MissingEntry { profile: String, strategy: String },
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportError::Io { path, source } => {
                write!(f, "Failed to access report '{}': {}", path, source)
            }
            ReportError::Parse { line, message } => {
                write!(f, "Failed to parse payoff report at line {}: {}", line, message)
            }
            ReportError::MissingEntry { profile, strategy } => {
                write!(
                    f,
                    "Payoff report has no entry for strategy '{}' in profile '{}'",
                    strategy, profile
                )
            }
        }
    }
}

impl std::error::Error for ReportError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> PayoffReport {
        PayoffReport {
            profiles: vec![ProfileReport {
                key: ProfileKey::from_string("2 GD 2 ZIP".to_string()),
                sample_count: 3,
                strategies: vec![
                    StrategyReport {
                        name: "GD".to_string(),
                        count: 2,
                        payoff: 12.5,
                        std_dev: 1.25,
                    },
                    StrategyReport {
                        name: "ZIP".to_string(),
                        count: 2,
                        payoff: -3.0,
                        std_dev: 0.5,
                    },
                ],
            }],
        }
    }

    #[test]
    fn plain_layout_is_positional() {
        let text = report().to_plain();
        let expected = "1\n2 GD 2 ZIP\n3\n2\nGD\n2\n12.5\n1.25\nZIP\n2\n-3\n0.5\n";
        assert_eq!(text, expected);
    }

    #[test]
    fn plain_round_trip_is_byte_identical() {
        let original = report();
        let text = original.to_plain();
        let parsed = PayoffReport::from_plain(&text).unwrap();
        assert_eq!(parsed, original);
        assert_eq!(parsed.to_plain(), text);
    }

    #[test]
    fn parse_reports_line_context() {
        let text = "1\n2 GD 2 ZIP\nthree\n";
        match PayoffReport::from_plain(text) {
            Err(ReportError::Parse { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn truncated_report_is_rejected() {
        let text = "1\n2 GD 2 ZIP\n3\n2\nGD\n";
        assert!(matches!(
            PayoffReport::from_plain(text),
            Err(ReportError::Parse { .. })
        ));
    }

    #[test]
    fn average_index_looks_up_entries() {
        let report = report();
        let index = report.average_index();
        let key = ProfileKey::from_string("2 GD 2 ZIP".to_string());
        assert_eq!(index.average(&key, "GD").unwrap(), 12.5);
        assert_eq!(index.average(&key, "ZIP").unwrap(), -3.0);
        assert!(matches!(
            index.average(&key, "KAPLAN"),
            Err(ReportError::MissingEntry { .. })
        ));
    }

    #[test]
    fn game_report_nests_table_under_metadata() {
        let meta = GameMeta::default();
        let game = GameReport::from_payoffs(&meta, &report());
        assert_eq!(game.name, "CDA");
        assert_eq!(game.roles.len(), 1);
        assert_eq!(game.roles[0].name, "ALL");
        assert_eq!(game.profiles.len(), 1);
        assert_eq!(game.profiles[0].id, "0");
        assert_eq!(game.profiles[0].sample_count, 3);
        let strategies = &game.profiles[0].roles[0].strategies;
        assert_eq!(strategies[0].name, "GD");
        assert_eq!(strategies[0].payoff, 12.5);
        assert_eq!(strategies[1].payoff_std, 0.5);
    }

    #[test]
    fn game_report_serializes_expected_fields() {
        let game = GameReport::from_payoffs(&GameMeta::default(), &report());
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&game).unwrap()).unwrap();
        assert_eq!(json["id"], "329509325323");
        assert_eq!(json["simulator_fullname"], "CDA-2.11");
        assert_eq!(json["parameter_hash"]["foo"], "bar");
        assert_eq!(json["profiles"][0]["roles"][0]["strategies"][0]["count"], 2);
    }
}

// src/convert.rs
//
// Converts an externally produced payoff-matrix text file into the
// game-description JSON format. The input carries a fixed-size header,
// then one row per profile: strategy-id columns followed by the
// matching payoff columns, terminated by a "];" line.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use crate::config::{GameMeta, MatrixFormat};
use crate::report::{GameProfile, GameProfileRole, GameReport, GameRole, GameStrategy};

/// One converted profile row: strategies in first-seen column order,
/// with their multiplicities and payoffs.
#[derive(Debug, Clone, PartialEq)]
struct MatrixRow {
    strategies: Vec<(String, u32, f64)>,
}

/// Parses a payoff-matrix file and wraps the rows in the
/// game-description format: one profile per distinct row, sample count
/// 1, zero std-devs.
pub fn convert_matrix(
    path: &Path,
    format: &MatrixFormat,
    meta: &GameMeta,
) -> Result<GameReport, ConvertError> {
    let contents = fs::read_to_string(path).map_err(|e| ConvertError::Io {
        path: path.display().to_string(),
        source: e.to_string(),
    })?;
    let rows = parse_rows(&contents, format)?;

    let profiles = rows
        .values()
        .enumerate()
        .map(|(id, row)| GameProfile {
            id: id.to_string(),
            sample_count: 1,
            roles: vec![GameProfileRole {
                name: meta.role_name.clone(),
                strategies: row
                    .strategies
                    .iter()
                    .map(|(name, count, payoff)| GameStrategy {
                        name: name.clone(),
                        count: *count,
                        payoff: *payoff,
                        payoff_std: 0.0,
                    })
                    .collect(),
            }],
        })
        .collect();

    Ok(GameReport {
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
    })
}

/// Parses the payoff rows, keyed by their canonical token string so
/// duplicate rows collapse (last occurrence wins) and enumeration is
/// deterministic.
fn parse_rows(
    contents: &str,
    format: &MatrixFormat,
) -> Result<BTreeMap<String, MatrixRow>, ConvertError> {
    let mut rows = BTreeMap::new();

    'rows: for (idx, raw_line) in contents.lines().enumerate().skip(format.header_lines) {
        let line = raw_line.trim();
        if line == "];" {
            break;
        }
        if line.is_empty() {
            continue;
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < format.slots_per_row * 2 {
            return Err(ConvertError::BadRow {
                line: idx + 1,
                message: format!(
                    "expected {} columns, found {}",
                    format.slots_per_row * 2,
                    tokens.len()
                ),
            });
        }

        // Strategy slots first, matching payoff columns after them.
        // Duplicate strategies collapse in first-seen order; rows naming
        // ids outside the configured map are skipped.
        let mut strategies: Vec<(String, u32, f64)> = Vec::new();
        for slot in 0..format.slots_per_row {
            let id: u32 = tokens[slot].parse().map_err(|e| ConvertError::BadRow {
                line: idx + 1,
                message: format!("bad strategy id '{}': {}", tokens[slot], e),
            })?;
            let name = match format.name_of(id) {
                Some(name) => name.to_string(),
                None => continue 'rows,
            };
            let payoff: f64 =
                tokens[format.slots_per_row + slot]
                    .parse()
                    .map_err(|e| ConvertError::BadRow {
                        line: idx + 1,
                        message: format!(
                            "bad payoff '{}': {}",
                            tokens[format.slots_per_row + slot],
                            e
                        ),
                    })?;
            match strategies.iter_mut().find(|(n, _, _)| *n == name) {
                Some(entry) => {
                    entry.1 += 1;
                    entry.2 = payoff;
                }
                None => strategies.push((name, 1, payoff)),
            }
        }

        let key = strategies
            .iter()
            .map(|(name, count, _)| format!("{} {}", count, name))
            .collect::<Vec<_>>()
            .join(" ");
        rows.insert(key, MatrixRow { strategies });
    }

    Ok(rows)
}

/// Errors while converting a payoff matrix.
#[derive(Debug, Clone, PartialEq)]
pub enum ConvertError {
    Io { path: String, source: String },
    BadRow { line: usize, message: String },
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvertError::Io { path, source } => {
                write!(f, "Failed to read payoff matrix '{}': {}", path, source)
            }
            ConvertError::BadRow { line, message } => {
                write!(f, "Bad payoff matrix row at line {}: {}", line, message)
            }
        }
    }
}

impl std::error::Error for ConvertError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn format() -> MatrixFormat {
        MatrixFormat {
            header_lines: 2,
            slots_per_row: 4,
            ..MatrixFormat::default()
        }
    }

    #[test]
    fn parses_rows_after_header() {
        let text = "header one\nheader two\n0 1 2 3  10.5 11.5 12.5 13.5\n];\n";
        let rows = parse_rows(text, &format()).unwrap();
        assert_eq!(rows.len(), 1);
        let row = rows.values().next().unwrap();
        assert_eq!(
            row.strategies,
            vec![
                ("GD".to_string(), 1, 10.5),
                ("GDX".to_string(), 1, 11.5),
                ("KAPLAN".to_string(), 1, 12.5),
                ("ZI".to_string(), 1, 13.5),
            ]
        );
    }

    #[test]
    fn duplicate_strategies_collapse_with_multiplicity() {
        let text = "h\nh\n0 0 3 3  10.0 10.0 20.0 20.0\n];\n";
        let rows = parse_rows(text, &format()).unwrap();
        let row = rows.values().next().unwrap();
        assert_eq!(
            row.strategies,
            vec![("GD".to_string(), 2, 10.0), ("ZI".to_string(), 2, 20.0)]
        );
    }

    #[test]
    fn unknown_strategy_ids_skip_the_row() {
        let text = "h\nh\n0 1 2 99  1.0 2.0 3.0 4.0\n0 1 2 3  1.0 2.0 3.0 4.0\n];\n";
        let rows = parse_rows(text, &format()).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn malformed_numbers_are_errors_with_line_context() {
        let text = "h\nh\n0 1 2 x  1.0 2.0 3.0 4.0\n];\n";
        match parse_rows(text, &format()) {
            Err(ConvertError::BadRow { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected bad row, got {:?}", other),
        }
    }

    #[test]
    fn converted_game_has_static_header_and_unit_sample_counts() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("matrix.txt");
        fs::write(&path, "h\nh\n0 0 3 4  10.0 10.0 20.0 30.0\n];\n").unwrap();

        let meta = GameMeta::default();
        let game = convert_matrix(&path, &format(), &meta).unwrap();
        assert_eq!(game.name, "CDA");
        assert_eq!(game.profiles.len(), 1);
        assert_eq!(game.profiles[0].sample_count, 1);
        let strategies = &game.profiles[0].roles[0].strategies;
        assert_eq!(strategies.len(), 3);
        assert!(strategies.iter().all(|s| s.payoff_std == 0.0));
        assert_eq!(strategies[0].count, 2);
    }
}

// src/values.rs
//
// Value normalization onto the common surplus scale, the corpus-wide
// average-normalized-unit-value artifact, and the newline-separated
// numeric column-file format shared by unit means, control-variate
// coefficients, and regression betas.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::config::MarketConfig;
use crate::sample::{Agent, Role};

/// Maps an agent's raw private values onto the role-independent surplus
/// scale: distance from the binding valuation bound.
///
/// Buyers: `value - v_min`; sellers: `v_max - value`. Non-negative for
/// values inside `[v_min, v_max]`. The buyer/seller flip is re-derived
/// from the value ordering on every call; it is never cached.
pub fn normalized_values(agent: &Agent, cfg: &MarketConfig) -> Vec<f64> {
    match agent.role() {
        Role::Buyer => agent.values.iter().map(|v| v - cfg.v_min).collect(),
        Role::Seller => agent.values.iter().map(|v| cfg.v_max - v).collect(),
    }
}

/// Grand mean of normalized values per unit slot, over all agents in a
/// corpus. Computed once in stage one and consumed read-only by the
/// control-variate stages.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitValueMeans(Vec<f64>);

impl UnitValueMeans {
    pub fn from_vec(means: Vec<f64>) -> Self {
        Self(means)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Writes the means as a newline-separated column file.
    pub fn write_to(&self, path: &Path) -> Result<(), ColumnFileError> {
        write_column_file(path, &self.0)
    }

    /// Loads a previously written column file, checking the slot count.
    pub fn load(path: &Path, units: usize) -> Result<Self, ColumnFileError> {
        let column = read_column_file(path)?;
        if column.len() != units {
            return Err(ColumnFileError::WrongLength {
                path: path.display().to_string(),
                expected: units,
                actual: column.len(),
            });
        }
        Ok(Self(column))
    }
}

/// Incremental accumulator for `UnitValueMeans`.
#[derive(Debug, Clone)]
pub struct UnitValueAccumulator {
    sums: Vec<f64>,
    agents: u64,
}

impl UnitValueAccumulator {
    pub fn new(units: usize) -> Self {
        Self {
            sums: vec![0.0; units],
            agents: 0,
        }
    }

    /// Folds one agent's normalized values into the running sums.
    pub fn add_agent(&mut self, agent: &Agent, cfg: &MarketConfig) {
        for (sum, nv) in self.sums.iter_mut().zip(normalized_values(agent, cfg)) {
            *sum += nv;
        }
        self.agents += 1;
    }

    pub fn agents(&self) -> u64 {
        self.agents
    }

    /// Finalizes the per-slot means. At least one agent must have been
    /// accumulated; the corpus loader rejects empty corpora upstream.
    pub fn finish(&self) -> UnitValueMeans {
        let n = self.agents as f64;
        UnitValueMeans(self.sums.iter().map(|s| s / n).collect())
    }
}

// --- Column files -----------------------------------------------------------

/// Writes one `f64` per line, atomically (temp file + rename) so a failed
/// run never leaves a half-written artifact behind.
pub fn write_column_file(path: &Path, column: &[f64]) -> Result<(), ColumnFileError> {
    let mut text = String::new();
    for v in column {
        text.push_str(&v.to_string());
        text.push('\n');
    }
    write_atomic(path, &text).map_err(|e| ColumnFileError::Io {
        path: path.display().to_string(),
        source: e.to_string(),
    })
}

/// Reads a newline-separated numeric column file. Blank trailing lines
/// are tolerated; anything non-numeric is an error with line context.
pub fn read_column_file(path: &Path) -> Result<Vec<f64>, ColumnFileError> {
    let contents = fs::read_to_string(path).map_err(|e| ColumnFileError::Io {
        path: path.display().to_string(),
        source: e.to_string(),
    })?;
    let mut column = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value = trimmed
            .parse::<f64>()
            .map_err(|e| ColumnFileError::Parse {
                path: path.display().to_string(),
                line: idx + 1,
                message: e.to_string(),
            })?;
        column.push(value);
    }
    Ok(column)
}

/// Atomic whole-file write: stage into a temp file in the destination
/// directory, then persist over the final path.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Errors for the newline-numeric artifact files.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnFileError {
    Io { path: String, source: String },
    Parse { path: String, line: usize, message: String },
    WrongLength { path: String, expected: usize, actual: usize },
}

impl fmt::Display for ColumnFileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnFileError::Io { path, source } => {
                write!(f, "Failed to access column file '{}': {}", path, source)
            }
            ColumnFileError::Parse { path, line, message } => {
                write!(f, "Bad number in '{}' line {}: {}", path, line, message)
            }
            ColumnFileError::WrongLength { path, expected, actual } => {
                write!(
                    f,
                    "Column file '{}' has {} entries, expected {}",
                    path, actual, expected
                )
            }
        }
    }
}

impl std::error::Error for ColumnFileError {}

// src/expected.rs
//
// Expected-payoff model: ordinary least squares of externally-reported
// agent scores on normalized private values, with an intercept term.
// Fitted over the whole corpus via the normal equations and the same
// dense LU machinery as the control-variate solve.

use std::fmt;
use std::path::Path;

use nalgebra::{DMatrix, DVector};

use crate::config::MarketConfig;
use crate::sample::{Agent, AgentId};
use crate::values::{normalized_values, write_column_file, ColumnFileError};

/// Fitted regression: `beta[0]` is the intercept, `beta[1..]` the
/// per-unit-slot coefficients.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpectedPayoffModel {
    beta: Vec<f64>,
}

impl ExpectedPayoffModel {
    pub fn beta(&self) -> &[f64] {
        &self.beta
    }

    /// Predicted score for one agent.
    pub fn predict(&self, agent: &Agent, cfg: &MarketConfig) -> f64 {
        let normalized = normalized_values(agent, cfg);
        let mut score = self.beta[0];
        for (b, nv) in self.beta[1..].iter().zip(&normalized) {
            score += b * nv;
        }
        score
    }

    /// Writes the beta vector as a newline-separated column file,
    /// intercept first.
    pub fn write_to(&self, path: &Path) -> Result<(), ColumnFileError> {
        write_column_file(path, &self.beta)
    }
}

/// Accumulates the normal equations `XᵗX beta = Xᵗy` row by row, so the
/// corpus never needs to be held in memory.
#[derive(Debug, Clone)]
pub struct RegressionAccumulator {
    terms: usize,
    xtx: DMatrix<f64>,
    xty: DVector<f64>,
    rows: u64,
}

impl RegressionAccumulator {
    pub fn new(units: usize) -> Self {
        let terms = units + 1;
        Self {
            terms,
            xtx: DMatrix::zeros(terms, terms),
            xty: DVector::zeros(terms),
            rows: 0,
        }
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Folds one agent into the normal equations. Agents without an
    /// externally-reported score cannot be regressed on.
    pub fn add_agent(&mut self, agent: &Agent, cfg: &MarketConfig) -> Result<(), RegressionError> {
        let score = agent
            .score
            .ok_or(RegressionError::MissingScore { agent_id: agent.id })?;

        let mut row = Vec::with_capacity(self.terms);
        row.push(1.0);
        row.extend(normalized_values(agent, cfg));

        for i in 0..self.terms {
            self.xty[i] += row[i] * score;
            for j in 0..self.terms {
                self.xtx[(i, j)] += row[i] * row[j];
            }
        }
        self.rows += 1;
        Ok(())
    }

    /// Solves for the regression coefficients.
    pub fn solve(&self) -> Result<ExpectedPayoffModel, RegressionError> {
        if self.rows < self.terms as u64 {
            return Err(RegressionError::TooFewRows {
                rows: self.rows,
                terms: self.terms,
            });
        }
        let beta = self
            .xtx
            .clone()
            .lu()
            .solve(&self.xty)
            .ok_or(RegressionError::Singular { terms: self.terms })?;
        if !beta.iter().all(|b| b.is_finite()) {
            return Err(RegressionError::Singular { terms: self.terms });
        }
        Ok(ExpectedPayoffModel {
            beta: beta.iter().copied().collect(),
        })
    }
}

/// Errors from the expected-payoff regression.
#[derive(Debug, Clone, PartialEq)]
pub enum RegressionError {
    MissingScore { agent_id: AgentId },
    TooFewRows { rows: u64, terms: usize },
    Singular { terms: usize },
}

impl fmt::Display for RegressionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegressionError::MissingScore { agent_id } => {
                write!(f, "Agent {} has no reported score to regress on", agent_id)
            }
            RegressionError::TooFewRows { rows, terms } => {
                write!(
                    f,
                    "Regression needs at least {} observations, got {}",
                    terms, rows
                )
            }
            RegressionError::Singular { terms } => {
                write!(f, "Normal equations over {} terms are singular", terms)
            }
        }
    }
}

impl std::error::Error for RegressionError {}

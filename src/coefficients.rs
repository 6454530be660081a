// src/coefficients.rs
//
// Control-variate coefficient estimation: accumulate the empirical
// covariance matrix and cross-covariance vector over the corpus, then
// solve the linear system for the OLS control-variate coefficients.
//
// Convention: the cross-covariance σ pairs centered payoff residuals
// with centered *normalized* values, while the Σ outer product is
// taken over raw values centered on the same means. Both are divided
// by K - 1.

use std::fmt;
use std::path::Path;

use nalgebra::{DMatrix, DVector};

use crate::config::MarketConfig;
use crate::sample::Agent;
use crate::values::{normalized_values, read_column_file, write_column_file, ColumnFileError, UnitValueMeans};

/// Control-variate coefficient vector, one entry per unit slot.
/// Solved once per corpus and shared read-only by the scorer.
#[derive(Debug, Clone, PartialEq)]
pub struct Coefficients(Vec<f64>);

impl Coefficients {
    /// The no-variance-reduction fallback: all coefficients zero.
    pub fn zeros(units: usize) -> Self {
        Self(vec![0.0; units])
    }

    pub fn from_vec(coeffs: Vec<f64>) -> Self {
        Self(coeffs)
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

    /// Writes the coefficients as a newline-separated column file.
    pub fn write_to(&self, path: &Path) -> Result<(), ColumnFileError> {
        write_column_file(path, &self.0)
    }

    /// Loads a coefficient file, checking the slot count.
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

/// Result of the covariance solve: the coefficient vector plus the
/// σᵗ Σ⁻¹ σ quadratic form the ratio estimator consumes.
#[derive(Debug, Clone)]
pub struct ControlVariateSolution {
    pub coefficients: Coefficients,
    /// σᵗ Σ⁻¹ σ, evaluated as σ · c.
    pub quadratic_form: f64,
    /// Total agent observations K behind the estimate.
    pub observations: u64,
}

/// Accumulator for the Σ matrix and σ vector over agent observations.
#[derive(Debug, Clone)]
pub struct CovarianceAccumulator {
    units: usize,
    /// Σ outer-product sums (UNITS × UNITS).
    outer: DMatrix<f64>,
    /// σ cross-covariance sums (UNITS).
    cross: DVector<f64>,
    observations: u64,
}

impl CovarianceAccumulator {
    pub fn new(units: usize) -> Self {
        Self {
            units,
            outer: DMatrix::zeros(units, units),
            cross: DVector::zeros(units),
            observations: 0,
        }
    }

    pub fn observations(&self) -> u64 {
        self.observations
    }

    /// Folds one agent observation into the sums.
    ///
    /// `payoff_residual` is the agent's average payoff minus the grand
    /// average for its (profile, strategy) bucket.
    pub fn add_agent(
        &mut self,
        agent: &Agent,
        payoff_residual: f64,
        means: &UnitValueMeans,
        cfg: &MarketConfig,
    ) {
        let normalized = normalized_values(agent, cfg);
        let means = means.as_slice();

        for u in 0..self.units {
            self.cross[u] += payoff_residual * (normalized[u] - means[u]);
        }
        for q in 0..self.units {
            let dq = agent.values[q] - means[q];
            for r in 0..self.units {
                self.outer[(q, r)] += dq * (agent.values[r] - means[r]);
            }
        }
        self.observations += 1;
    }

    /// Scales the sums by 1 / (K - 1) and solves `Σ c = σ` by dense LU
    /// decomposition. A singular or non-finite system is reported as
    /// `SingularCovariance`; callers fall back to zero coefficients
    /// rather than aborting, since the raw payoff estimate stays valid.
    pub fn solve(&self) -> Result<ControlVariateSolution, CoefficientError> {
        if self.observations < 2 {
            return Err(CoefficientError::TooFewObservations {
                observations: self.observations,
            });
        }
        let denom = (self.observations - 1) as f64;
        let sigma_mat = &self.outer / denom;
        let sigma_vec = &self.cross / denom;

        let coefficients = sigma_mat
            .lu()
            .solve(&sigma_vec)
            .ok_or(CoefficientError::SingularCovariance { units: self.units })?;
        if !coefficients.iter().all(|c| c.is_finite()) {
            return Err(CoefficientError::SingularCovariance { units: self.units });
        }

        let quadratic_form = sigma_vec.dot(&coefficients);
        Ok(ControlVariateSolution {
            coefficients: Coefficients(coefficients.iter().copied().collect()),
            quadratic_form,
            observations: self.observations,
        })
    }
}

/// Errors from the control-variate solve.
#[derive(Debug, Clone, PartialEq)]
pub enum CoefficientError {
    /// The covariance matrix is singular or ill-conditioned.
    SingularCovariance { units: usize },
    /// Not enough agent observations to form the K - 1 estimate.
    TooFewObservations { observations: u64 },
}

impl fmt::Display for CoefficientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoefficientError::SingularCovariance { units } => {
                write!(
                    f,
                    "Covariance matrix over {} unit slots is singular; \
                     control-variate reduction unavailable",
                    units
                )
            }
            CoefficientError::TooFewObservations { observations } => {
                write!(
                    f,
                    "Only {} agent observation(s); need at least 2 for covariance estimation",
                    observations
                )
            }
        }
    }
}

impl std::error::Error for CoefficientError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(units: usize) -> MarketConfig {
        MarketConfig {
            units,
            reps: 5,
            // v_min = 0 keeps buyer normalization the identity, so raw
            // and normalized values coincide and the solve is exact.
            v_min: 0.0,
            v_max: 100.0,
            group_size: 1,
        }
    }

    fn buyer(values: Vec<f64>) -> Agent {
        assert!(values[0] > values[values.len() - 1]);
        Agent {
            id: 0,
            strategy: "ZI".to_string(),
            values,
            score: None,
        }
    }

    #[test]
    fn recovers_exact_linear_coefficients() {
        let cfg = cfg(2);
        let means = UnitValueMeans::from_vec(vec![0.0, 0.0]);
        let mut acc = CovarianceAccumulator::new(2);

        // Residuals are exactly 2*v0 + 3*v1; the solve must return (2, 3).
        for values in [vec![2.0, 1.0], vec![3.0, 1.0], vec![5.0, 2.0]] {
            let e = 2.0 * values[0] + 3.0 * values[1];
            acc.add_agent(&buyer(values), e, &means, &cfg);
        }

        let solution = acc.solve().unwrap();
        let c = solution.coefficients.as_slice();
        assert!((c[0] - 2.0).abs() < 1e-9);
        assert!((c[1] - 3.0).abs() < 1e-9);
        assert_eq!(solution.observations, 3);
        // sigma_hat = (121, 48) / 2; quadratic form = 60.5*2 + 24*3.
        assert!((solution.quadratic_form - 193.0).abs() < 1e-9);
    }

    #[test]
    fn duplicate_value_rows_are_singular() {
        let cfg = cfg(2);
        let means = UnitValueMeans::from_vec(vec![0.0, 0.0]);
        let mut acc = CovarianceAccumulator::new(2);
        for _ in 0..4 {
            acc.add_agent(&buyer(vec![3.0, 1.0]), 1.0, &means, &cfg);
        }
        assert!(matches!(
            acc.solve(),
            Err(CoefficientError::SingularCovariance { .. })
        ));
    }

    #[test]
    fn single_observation_is_rejected() {
        let cfg = cfg(2);
        let means = UnitValueMeans::from_vec(vec![0.0, 0.0]);
        let mut acc = CovarianceAccumulator::new(2);
        acc.add_agent(&buyer(vec![3.0, 1.0]), 1.0, &means, &cfg);
        assert!(matches!(
            acc.solve(),
            Err(CoefficientError::TooFewObservations { observations: 1 })
        ));
    }

    #[test]
    fn zero_fallback_has_right_shape() {
        let zeros = Coefficients::zeros(10);
        assert_eq!(zeros.len(), 10);
        assert!(zeros.as_slice().iter().all(|c| *c == 0.0));
    }

    #[test]
    fn coefficient_file_round_trips() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("coefficients.txt");
        let original = Coefficients::from_vec(vec![0.5, -1.25, 3.0]);
        original.write_to(&path).unwrap();
        let loaded = Coefficients::load(&path, 3).unwrap();
        assert_eq!(loaded, original);
        assert!(matches!(
            Coefficients::load(&path, 4),
            Err(ColumnFileError::WrongLength { .. })
        ));
    }
}

// src/pipeline.rs
//
// Two-stage orchestration over a corpus of run records.
//
// Stage one walks the corpus and produces the immutable
// CorpusStatistics artifact (unit-value means + raw payoff table +
// observation count). Stage two consumes it to fit control-variate
// coefficients, score the corpus with reduced variance, and estimate
// the reduction ratio. The grand averages and coefficients are only
// known after stage one completes, which is why the corpus is walked
// twice per table (sums, then spreads).

use std::collections::BTreeMap;
use std::fmt;

use crate::coefficients::{
    Coefficients, CoefficientError, ControlVariateSolution, CovarianceAccumulator,
};
use crate::config::{ConfigError, MarketConfig};
use crate::convert::ConvertError;
use crate::corpus::{CorpusDir, CorpusError};
use crate::expected::{ExpectedPayoffModel, RegressionAccumulator, RegressionError};
use crate::payoff::{agent_average_payoffs, strategy_averages, PayoffTable};
use crate::profile::{profile_key, ProfileKey};
use crate::ratio::{self, RatioError, StrategyRatio};
use crate::reduce::sample_reduced_averages;
use crate::report::{PayoffReport, ReportError};
use crate::stats::OnlineStats;
use crate::values::{ColumnFileError, UnitValueAccumulator, UnitValueMeans};

/// Immutable stage-one artifact: everything later stages need to know
/// about the corpus without re-deriving it.
#[derive(Debug, Clone)]
pub struct CorpusStatistics {
    /// Grand mean of normalized values per unit slot.
    pub unit_value_means: UnitValueMeans,
    /// Raw (uncorrected) payoff table.
    pub raw_payoffs: PayoffReport,
    /// Total agent observations K across the corpus.
    pub agent_observations: u64,
}

/// Averages the normalized per-unit values over a corpus without
/// touching payoffs; the standalone `unit-values` stage.
pub fn compute_unit_value_means(
    corpus: &CorpusDir,
    cfg: &MarketConfig,
) -> Result<UnitValueMeans, PipelineError> {
    let mut unit_values = UnitValueAccumulator::new(cfg.units);
    for path in corpus.files() {
        let sample = corpus.load(path, cfg)?;
        for agent in &sample.agents {
            unit_values.add_agent(agent, cfg);
        }
    }
    Ok(unit_values.finish())
}

/// Stage one: one pass for unit-value means and payoff sums, a second
/// pass for payoff spreads.
pub fn collect_statistics(
    corpus: &CorpusDir,
    cfg: &MarketConfig,
) -> Result<CorpusStatistics, PipelineError> {
    let mut unit_values = UnitValueAccumulator::new(cfg.units);
    let mut table = PayoffTable::new();

    for path in corpus.files() {
        let sample = corpus.load(path, cfg)?;
        for agent in &sample.agents {
            unit_values.add_agent(agent, cfg);
        }
        let payoffs = agent_average_payoffs(&sample, cfg);
        table.record_sample(&strategy_averages(&sample, &payoffs, cfg));
    }

    for path in corpus.files() {
        let sample = corpus.load(path, cfg)?;
        let payoffs = agent_average_payoffs(&sample, cfg);
        table.record_spread(&strategy_averages(&sample, &payoffs, cfg));
    }

    Ok(CorpusStatistics {
        unit_value_means: unit_values.finish(),
        raw_payoffs: table.to_report(),
        agent_observations: unit_values.agents(),
    })
}

/// Stage-two fit: the coefficient solve plus the corpus payoff variance
/// accumulated in the same pass, ready for the ratio estimator.
#[derive(Debug, Clone)]
pub struct ControlVariateFit {
    pub solution: ControlVariateSolution,
    /// Population variance of the uncentered per-agent average payoffs.
    pub payoff_variance: f64,
}

/// Fits the control-variate coefficients against a baseline payoff
/// report (normally stage one's raw table, or a previously emitted
/// report file).
pub fn fit_control_variates(
    corpus: &CorpusDir,
    cfg: &MarketConfig,
    means: &UnitValueMeans,
    baseline: &PayoffReport,
) -> Result<ControlVariateFit, PipelineError> {
    let index = baseline.average_index();
    let mut accumulator = CovarianceAccumulator::new(cfg.units);
    let mut payoff_stats = OnlineStats::new();

    for path in corpus.files() {
        let sample = corpus.load(path, cfg)?;
        let profile = profile_key(&sample.agents, cfg.group_size);
        let payoffs = agent_average_payoffs(&sample, cfg);
        for (agent, payoff) in sample.agents.iter().zip(&payoffs) {
            let base = index.average(&profile, &agent.strategy)?;
            accumulator.add_agent(agent, payoff - base, means, cfg);
            payoff_stats.add(*payoff);
        }
    }

    let solution = accumulator.solve()?;
    Ok(ControlVariateFit {
        solution,
        payoff_variance: payoff_stats.variance_population(),
    })
}

/// Stage two: variance-reduced scoring and re-aggregation over the
/// corpus (sums pass, then spreads pass).
pub fn reduce_scores(
    corpus: &CorpusDir,
    cfg: &MarketConfig,
    means: &UnitValueMeans,
    baseline: &PayoffReport,
    coefficients: &Coefficients,
) -> Result<PayoffReport, PipelineError> {
    let index = baseline.average_index();
    let mut table = PayoffTable::new();

    for path in corpus.files() {
        let sample = corpus.load(path, cfg)?;
        let avgs = sample_reduced_averages(&sample, &index, coefficients, means, cfg)?;
        table.record_sample(&avgs);
    }
    for path in corpus.files() {
        let sample = corpus.load(path, cfg)?;
        let avgs = sample_reduced_averages(&sample, &index, coefficients, means, cfg)?;
        table.record_spread(&avgs);
    }

    Ok(table.to_report())
}

/// Corpus-level variance-reduction ratio from a stage-two fit. Fails on
/// corpora too small for the degrees-of-freedom correction or without
/// payoff variance.
pub fn variance_reduction_ratio(
    fit: &ControlVariateFit,
    cfg: &MarketConfig,
) -> Result<f64, PipelineError> {
    let observations = fit.solution.observations;
    if !ratio::has_sufficient_observations(observations, cfg.units) {
        return Err(PipelineError::Ratio(RatioError::InsufficientObservations {
            observations,
            units: cfg.units,
        }));
    }
    if fit.payoff_variance <= 0.0 {
        return Err(PipelineError::Ratio(RatioError::DegenerateVariance));
    }
    Ok(ratio::reduction_ratio(
        fit.solution.quadratic_form,
        fit.payoff_variance,
        observations,
        cfg.units,
    ))
}

/// Per-(profile, strategy) payoff moments for the opt-in ratio
/// diagnostic. A separate corpus pass, run only when requested.
pub fn per_strategy_payoff_stats(
    corpus: &CorpusDir,
    cfg: &MarketConfig,
) -> Result<BTreeMap<(ProfileKey, String), OnlineStats>, PipelineError> {
    let mut stats: BTreeMap<(ProfileKey, String), OnlineStats> = BTreeMap::new();
    for path in corpus.files() {
        let sample = corpus.load(path, cfg)?;
        let profile = profile_key(&sample.agents, cfg.group_size);
        let payoffs = agent_average_payoffs(&sample, cfg);
        for (agent, payoff) in sample.agents.iter().zip(&payoffs) {
            stats
                .entry((profile.clone(), agent.strategy.clone()))
                .or_default()
                .add(*payoff);
        }
    }
    Ok(stats)
}

/// Per-strategy ratio diagnostic over a fitted corpus.
pub fn per_strategy_ratio_diagnostic(
    corpus: &CorpusDir,
    cfg: &MarketConfig,
    fit: &ControlVariateFit,
) -> Result<Vec<StrategyRatio>, PipelineError> {
    let stats = per_strategy_payoff_stats(corpus, cfg)?;
    Ok(ratio::per_strategy_ratios(
        &stats,
        fit.solution.quadratic_form,
        fit.solution.observations,
        cfg.units,
    ))
}

/// Everything the end-to-end run produces in one pass over the corpus
/// pipeline.
#[derive(Debug, Clone)]
pub struct RunAllOutput {
    pub statistics: CorpusStatistics,
    pub coefficients: Coefficients,
    pub reduced_payoffs: PayoffReport,
    /// Corpus-level reduction ratio; `None` when variance reduction was
    /// disabled or the corpus is too small to estimate it.
    pub ratio: Option<f64>,
    /// True when the covariance solve failed and the pipeline fell back
    /// to zero coefficients.
    pub variance_reduction_disabled: bool,
}

/// Runs both stages in-process: statistics, coefficient fit (falling
/// back to zero coefficients when the covariance system is singular),
/// reduced scoring, and the reduction ratio.
pub fn run_all(corpus: &CorpusDir, cfg: &MarketConfig) -> Result<RunAllOutput, PipelineError> {
    let statistics = collect_statistics(corpus, cfg)?;

    let (coefficients, ratio, disabled) = match fit_control_variates(
        corpus,
        cfg,
        &statistics.unit_value_means,
        &statistics.raw_payoffs,
    ) {
        Ok(fit) => {
            let ratio = variance_reduction_ratio(&fit, cfg).ok();
            (fit.solution.coefficients, ratio, false)
        }
        // The raw estimate stays valid without the statistical
        // refinement; proceed with zero coefficients.
        Err(PipelineError::Coefficient(_)) => (Coefficients::zeros(cfg.units), None, true),
        Err(other) => return Err(other),
    };

    let reduced_payoffs = reduce_scores(
        corpus,
        cfg,
        &statistics.unit_value_means,
        &statistics.raw_payoffs,
        &coefficients,
    )?;

    Ok(RunAllOutput {
        statistics,
        coefficients,
        reduced_payoffs,
        ratio,
        variance_reduction_disabled: disabled,
    })
}

/// Pipeline-level error: the union of the module errors, surfaced to
/// the binary with enough context to locate the offending input.
#[derive(Debug)]
pub enum PipelineError {
    Config(ConfigError),
    Corpus(CorpusError),
    Column(ColumnFileError),
    Report(ReportError),
    Coefficient(CoefficientError),
    Ratio(RatioError),
    Regression(RegressionError),
    Convert(ConvertError),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Config(e) => e.fmt(f),
            PipelineError::Corpus(e) => e.fmt(f),
            PipelineError::Column(e) => e.fmt(f),
            PipelineError::Report(e) => e.fmt(f),
            PipelineError::Coefficient(e) => e.fmt(f),
            PipelineError::Ratio(e) => e.fmt(f),
            PipelineError::Regression(e) => e.fmt(f),
            PipelineError::Convert(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<ConfigError> for PipelineError {
    fn from(e: ConfigError) -> Self {
        PipelineError::Config(e)
    }
}

impl From<CorpusError> for PipelineError {
    fn from(e: CorpusError) -> Self {
        PipelineError::Corpus(e)
    }
}

impl From<ColumnFileError> for PipelineError {
    fn from(e: ColumnFileError) -> Self {
        PipelineError::Column(e)
    }
}

impl From<ReportError> for PipelineError {
    fn from(e: ReportError) -> Self {
        PipelineError::Report(e)
    }
}

impl From<CoefficientError> for PipelineError {
    fn from(e: CoefficientError) -> Self {
        PipelineError::Coefficient(e)
    }
}

impl From<RatioError> for PipelineError {
    fn from(e: RatioError) -> Self {
        PipelineError::Ratio(e)
    }
}

impl From<RegressionError> for PipelineError {
    fn from(e: RegressionError) -> Self {
        PipelineError::Regression(e)
    }
}

impl From<ConvertError> for PipelineError {
    fn from(e: ConvertError) -> Self {
        PipelineError::Convert(e)
    }
}

/// Fits the expected-payoff regression over a corpus (OLS of reported
/// scores on normalized values).
pub fn fit_expected_payoffs(
    corpus: &CorpusDir,
    cfg: &MarketConfig,
) -> Result<ExpectedPayoffModel, PipelineError> {
    let mut accumulator = RegressionAccumulator::new(cfg.units);
    for path in corpus.files() {
        let sample = corpus.load(path, cfg)?;
        for agent in &sample.agents {
            accumulator.add_agent(agent, cfg)?;
        }
    }
    Ok(accumulator.solve()?)
}

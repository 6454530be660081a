// src/main.rs
//
// Batch CLI for the EGTA post-processing pipeline. One subcommand per
// stage, mirroring the estimation flow:
//
//   unit-values  -> average normalized unit values
//   payoffs      -> raw payoff table
//   coefficients -> control-variate coefficients
//   reduce       -> variance-reduced payoff table + game JSON
//   ratio        -> variance-reduction ratio
//   expected     -> OLS expected-payoff model
//   convert      -> external payoff matrix -> game JSON
//   run-all      -> both stages in-process
//
// All path checks run before any corpus work; failures go to stderr
// with exit code 1 and never leave partial output behind.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use cda_egta::coefficients::Coefficients;
use cda_egta::config::{self, GameMeta, MarketConfig, MatrixFormat};
use cda_egta::convert::convert_matrix;
use cda_egta::corpus::CorpusDir;
use cda_egta::pipeline;
use cda_egta::report::{GameReport, PayoffReport};
use cda_egta::values::UnitValueMeans;

#[derive(Debug, Parser)]
#[command(
    name = "cda-egta",
    about = "EGTA payoff estimation over CDA simulation corpora, with control-variate variance reduction",
    version
)]
struct Cli {
    /// Per-agent unit capacity (value slots per agent).
    #[arg(long, global = true)]
    units: Option<usize>,

    /// Repetitions per simulation run.
    #[arg(long, global = true)]
    reps: Option<usize>,

    /// Global lower bound on private valuations.
    #[arg(long = "v-min", global = true)]
    v_min: Option<f64>,

    /// Global upper bound on private valuations.
    #[arg(long = "v-max", global = true)]
    v_max: Option<f64>,

    /// Agents per strategy group (profile count divisor).
    #[arg(long = "group-size", global = true)]
    group_size: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Average the normalized per-unit values over a corpus.
    UnitValues {
        samples_dir: PathBuf,
        out_file: PathBuf,
    },
    /// Aggregate the raw payoff table over a corpus.
    Payoffs {
        samples_dir: PathBuf,
        out_file: PathBuf,
    },
    /// Fit control-variate coefficients against a baseline report.
    Coefficients {
        samples_dir: PathBuf,
        unit_values_file: PathBuf,
        payoffs_file: PathBuf,
        out_file: PathBuf,
    },
    /// Score the corpus with reduced variance and emit both reports.
    Reduce {
        samples_dir: PathBuf,
        unit_values_file: PathBuf,
        payoffs_file: PathBuf,
        coefficients_file: PathBuf,
        out_json_file: PathBuf,
        out_plain_file: PathBuf,
    },
    /// Estimate the variance-reduction ratio for a corpus.
    Ratio {
        samples_dir: PathBuf,
        unit_values_file: PathBuf,
        payoffs_file: PathBuf,
        /// Also print the per-(profile, strategy) ratio diagnostic.
        #[arg(long)]
        per_strategy: bool,
    },
    /// Fit the OLS expected-payoff model on reported scores.
    Expected {
        samples_dir: PathBuf,
        out_file: PathBuf,
    },
    /// Convert an external payoff matrix into game-description JSON.
    Convert {
        in_file: PathBuf,
        out_file: PathBuf,
    },
    /// Run both pipeline stages and write every artifact.
    RunAll {
        samples_dir: PathBuf,
        out_dir: PathBuf,
    },
}

impl Cli {
    fn market_config(&self) -> MarketConfig {
        let mut cfg = MarketConfig::default();
        if let Some(units) = self.units {
            cfg.units = units;
        }
        if let Some(reps) = self.reps {
            cfg.reps = reps;
        }
        if let Some(v_min) = self.v_min {
            cfg.v_min = v_min;
        }
        if let Some(v_max) = self.v_max {
            cfg.v_max = v_max;
        }
        if let Some(group_size) = self.group_size {
            cfg.group_size = group_size;
        }
        cfg
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("cda-egta: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), pipeline::PipelineError> {
    let cfg = cli.market_config();
    cfg.validate()?;

    match &cli.command {
        Command::UnitValues {
            samples_dir,
            out_file,
        } => {
            config::ensure_output_absent(out_file)?;
            let corpus = CorpusDir::open(samples_dir)?;
            let means = pipeline::compute_unit_value_means(&corpus, &cfg)?;
            means.write_to(out_file)?;
            println!(
                "unit-values: {} samples -> {}",
                corpus.len(),
                out_file.display()
            );
        }
        Command::Payoffs {
            samples_dir,
            out_file,
        } => {
            config::ensure_output_absent(out_file)?;
            let corpus = CorpusDir::open(samples_dir)?;
            let statistics = pipeline::collect_statistics(&corpus, &cfg)?;
            statistics.raw_payoffs.write_plain(out_file)?;
            println!(
                "payoffs: {} samples, {} profiles -> {}",
                corpus.len(),
                statistics.raw_payoffs.profiles.len(),
                out_file.display()
            );
        }
        Command::Coefficients {
            samples_dir,
            unit_values_file,
            payoffs_file,
            out_file,
        } => {
            config::ensure_input_exists(unit_values_file)?;
            config::ensure_input_exists(payoffs_file)?;
            config::ensure_output_absent(out_file)?;
            let corpus = CorpusDir::open(samples_dir)?;
            let means = UnitValueMeans::load(unit_values_file, cfg.units)?;
            let baseline = PayoffReport::load_plain(payoffs_file)?;

            match pipeline::fit_control_variates(&corpus, &cfg, &means, &baseline) {
                Ok(fit) => {
                    fit.solution.coefficients.write_to(out_file)?;
                    println!(
                        "coefficients: K={} agent observations -> {}",
                        fit.solution.observations,
                        out_file.display()
                    );
                }
                Err(pipeline::PipelineError::Coefficient(e)) => {
                    // The raw estimate stays valid; emit the zero vector
                    // so downstream stages run without reduction.
                    eprintln!("cda-egta: {}; writing zero coefficients", e);
                    Coefficients::zeros(cfg.units).write_to(out_file)?;
                }
                Err(other) => return Err(other),
            }
        }
        Command::Reduce {
            samples_dir,
            unit_values_file,
            payoffs_file,
            coefficients_file,
            out_json_file,
            out_plain_file,
        } => {
            config::ensure_input_exists(unit_values_file)?;
            config::ensure_input_exists(payoffs_file)?;
            config::ensure_input_exists(coefficients_file)?;
            config::ensure_output_absent(out_json_file)?;
            config::ensure_output_absent(out_plain_file)?;
            let corpus = CorpusDir::open(samples_dir)?;
            let means = UnitValueMeans::load(unit_values_file, cfg.units)?;
            let baseline = PayoffReport::load_plain(payoffs_file)?;
            let coefficients = Coefficients::load(coefficients_file, cfg.units)?;

            let reduced =
                pipeline::reduce_scores(&corpus, &cfg, &means, &baseline, &coefficients)?;
            let game = GameReport::from_payoffs(&GameMeta::default(), &reduced);
            game.write_to(out_json_file)?;
            reduced.write_plain(out_plain_file)?;
            println!(
                "reduce: {} profiles -> {} / {}",
                reduced.profiles.len(),
                out_json_file.display(),
                out_plain_file.display()
            );
        }
        Command::Ratio {
            samples_dir,
            unit_values_file,
            payoffs_file,
            per_strategy,
        } => {
            config::ensure_input_exists(unit_values_file)?;
            config::ensure_input_exists(payoffs_file)?;
            let corpus = CorpusDir::open(samples_dir)?;
            let means = UnitValueMeans::load(unit_values_file, cfg.units)?;
            let baseline = PayoffReport::load_plain(payoffs_file)?;

            let fit = pipeline::fit_control_variates(&corpus, &cfg, &means, &baseline)?;
            let ratio = pipeline::variance_reduction_ratio(&fit, &cfg)?;
            println!("{}", ratio);

            if *per_strategy {
                let diagnostics = pipeline::per_strategy_ratio_diagnostic(&corpus, &cfg, &fit)?;
                for entry in diagnostics {
                    println!("{} / {}: {}", entry.profile, entry.strategy, entry.ratio);
                }
            }
        }
        Command::Expected {
            samples_dir,
            out_file,
        } => {
            config::ensure_output_absent(out_file)?;
            let corpus = CorpusDir::open(samples_dir)?;
            let model = pipeline::fit_expected_payoffs(&corpus, &cfg)?;
            model.write_to(out_file)?;
            println!(
                "expected: {} regression terms -> {}",
                model.beta().len(),
                out_file.display()
            );
        }
        Command::Convert { in_file, out_file } => {
            config::ensure_input_exists(in_file)?;
            config::ensure_output_absent(out_file)?;
            let game = convert_matrix(in_file, &MatrixFormat::default(), &GameMeta::default())?;
            game.write_to(out_file)?;
            println!(
                "convert: {} profiles -> {}",
                game.profiles.len(),
                out_file.display()
            );
        }
        Command::RunAll {
            samples_dir,
            out_dir,
        } => {
            run_all(&cfg, samples_dir, out_dir)?;
        }
    }

    Ok(())
}

fn run_all(
    cfg: &MarketConfig,
    samples_dir: &PathBuf,
    out_dir: &PathBuf,
) -> Result<(), pipeline::PipelineError> {
    let unit_values_file = out_dir.join("unit_values.txt");
    let payoffs_file = out_dir.join("payoffs.txt");
    let coefficients_file = out_dir.join("coefficients.txt");
    let reduced_plain_file = out_dir.join("reduced_payoffs.txt");
    let game_file = out_dir.join("game.json");

    std::fs::create_dir_all(out_dir).map_err(|e| {
        pipeline::PipelineError::Config(config::ConfigError::InvalidConfig {
            field: "out_dir".to_string(),
            message: format!("cannot create '{}': {}", out_dir.display(), e),
        })
    })?;
    for target in [
        &unit_values_file,
        &payoffs_file,
        &coefficients_file,
        &reduced_plain_file,
        &game_file,
    ] {
        config::ensure_output_absent(target)?;
    }

    let corpus = CorpusDir::open(samples_dir)?;
    println!(
        "run-all: {} samples from {}",
        corpus.len(),
        corpus.path().display()
    );

    let output = pipeline::run_all(&corpus, cfg)?;

    output.statistics.unit_value_means.write_to(&unit_values_file)?;
    output.statistics.raw_payoffs.write_plain(&payoffs_file)?;
    output.coefficients.write_to(&coefficients_file)?;
    output.reduced_payoffs.write_plain(&reduced_plain_file)?;
    let game = GameReport::from_payoffs(&GameMeta::default(), &output.reduced_payoffs);
    game.write_to(&game_file)?;

    println!(
        "run-all: {} profiles, K={} agent observations",
        output.reduced_payoffs.profiles.len(),
        output.statistics.agent_observations
    );
    if output.variance_reduction_disabled {
        println!("run-all: covariance solve failed; variance reduction disabled");
    }
    match output.ratio {
        Some(ratio) => println!("run-all: variance reduction ratio {}", ratio),
        None => println!("run-all: variance reduction ratio unavailable"),
    }
    println!("run-all: artifacts in {}", out_dir.display());

    Ok(())
}

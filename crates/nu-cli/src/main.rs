//! NextUnfold CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nu_core::{Efficiency, Histogram, ResponseMatrix};
use nu_unfold::response::efficiency_closure;
use nu_unfold::{IterativeUnfolder, UnfoldSettings, normalize_response};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "nextunfold")]
#[command(about = "NextUnfold - Iterative Bayesian unfolding")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Unfold observed effects into cause counts
    Unfold {
        /// Input problem (JSON: data, response, efficiencies and their errors)
        #[arg(short, long)]
        input: PathBuf,

        /// Unfolding settings (JSON). Defaults apply when omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the test statistic (ks, chi2, rmd, pf)
        #[arg(long)]
        ts: Option<String>,

        /// Override the stopping threshold
        #[arg(long)]
        ts_stopping: Option<f64>,

        /// Override the iteration cap
        #[arg(long)]
        max_iter: Option<usize>,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Normalize a raw response matrix to the given efficiencies
    Normalize {
        /// Input problem (JSON); only the response and efficiencies are used
        #[arg(short, long)]
        input: PathBuf,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Unfolding problem as read from disk.
///
/// `response` is effects × causes. Missing errors default to Poisson
/// (`data_err`) or zero; missing efficiencies default to one.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProblemJson {
    #[serde(default)]
    data: Vec<f64>,
    #[serde(default)]
    data_err: Option<Vec<f64>>,
    response: Vec<Vec<f64>>,
    #[serde(default)]
    response_err: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    efficiencies: Option<Vec<f64>>,
    #[serde(default)]
    efficiencies_err: Option<Vec<f64>>,
}

impl ProblemJson {
    fn n_causes(&self) -> usize {
        self.response.first().map_or(0, Vec::len)
    }

    fn histogram(&self) -> Result<Histogram> {
        Ok(match &self.data_err {
            Some(err) => Histogram::new(self.data.clone(), err.clone())?,
            None => Histogram::poisson(self.data.clone()),
        })
    }

    fn response(&self) -> Result<ResponseMatrix> {
        let errors = match &self.response_err {
            Some(err) => err.clone(),
            None => self.response.iter().map(|row| vec![0.0; row.len()]).collect(),
        };
        Ok(ResponseMatrix::from_rows(self.response.clone(), errors)?)
    }

    fn efficiencies(&self) -> Result<Efficiency> {
        let n = self.n_causes();
        let values = self.efficiencies.clone().unwrap_or_else(|| vec![1.0; n]);
        let errors = self.efficiencies_err.clone().unwrap_or_else(|| vec![0.0; values.len()]);
        Ok(Efficiency::new(values, errors)?)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Unfold { input, config, ts, ts_stopping, max_iter, output } => {
            let overrides = Overrides { ts, ts_stopping, max_iter };
            cmd_unfold(&input, config.as_ref(), overrides, output.as_ref())
        }
        Commands::Normalize { input, output } => cmd_normalize(&input, output.as_ref()),
    }
}

struct Overrides {
    ts: Option<String>,
    ts_stopping: Option<f64>,
    max_iter: Option<usize>,
}

fn cmd_unfold(
    input: &PathBuf,
    config: Option<&PathBuf>,
    overrides: Overrides,
    output: Option<&PathBuf>,
) -> Result<()> {
    let problem = load_problem(input)?;
    let mut settings = match config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            UnfoldSettings::from_json(&text)?
        }
        None => UnfoldSettings::default(),
    };
    if overrides.ts.is_some() {
        settings.ts = overrides.ts;
    }
    if overrides.ts_stopping.is_some() {
        settings.ts_stopping = overrides.ts_stopping;
    }
    if overrides.max_iter.is_some() {
        settings.max_iter = overrides.max_iter;
    }
    let (cfg, callbacks) = settings.build()?;

    let data = problem.histogram()?;
    let response = problem.response()?;
    let efficiencies = problem.efficiencies()?;

    let result =
        IterativeUnfolder::new(cfg).with_callbacks(callbacks).run(&data, &response, &efficiencies)?;
    tracing::info!(
        iterations = result.num_iterations,
        status = %result.status,
        ts = result.ts_iter.last().copied().unwrap_or(f64::NAN),
        "unfolding complete"
    );

    write_json(output, serde_json::to_value(&result)?)
}

fn cmd_normalize(input: &PathBuf, output: Option<&PathBuf>) -> Result<()> {
    let problem = load_problem(input)?;
    let efficiencies = problem.efficiencies()?;
    let normalized = normalize_response(&problem.response()?, &efficiencies)?;
    let closure = efficiency_closure(&normalized, &efficiencies)?;
    tracing::info!(closure, "response normalized");

    let output_json = serde_json::json!({
        "response": normalized.to_rows(),
        "response_err": normalized.error_rows(),
        "column_sums": normalized.column_sums(),
        "efficiencies": efficiencies.values,
        "efficiency_closure": closure,
    });
    write_json(output, output_json)
}

fn load_problem(input: &PathBuf) -> Result<ProblemJson> {
    tracing::info!(path = %input.display(), "loading problem");
    let json = std::fs::read_to_string(input)
        .with_context(|| format!("reading input {}", input.display()))?;
    let problem: ProblemJson = serde_json::from_str(&json)?;
    tracing::info!(
        effects = problem.response.len(),
        causes = problem.n_causes(),
        "problem loaded"
    );
    Ok(problem)
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}

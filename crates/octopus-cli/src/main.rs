//! The `octopus` command line: load (or compile) two parsers, run the
//! bisimulation, and report the verdict.

mod cli;
mod compile;
mod stat;

use std::path::Path;
use std::process::ExitCode;

use clap::Parser as ClapParser;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use octopus_engine::bisim::{bisimulate, BisimOptions};
use octopus_engine::certificate::CertificateMeta;
use octopus_engine::queries::{EngineCtx, EngineError};
use octopus_ir::{load_parser_from_str, LoadError};
use octopus_smt::portfolio::{parse_solver_specs, Portfolio, PortfolioError};
use octopus_smt::terms::Terms;

use crate::cli::Cli;
use crate::stat::Timer;

/// User-visible failure classes, carrying their exit codes:
/// 2 usage/input, 3 solver indeterminate or timeout, 4 unsupported
/// construct. Exit 0/1 are verdict outcomes, not errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Input(String),
    #[error("unsupported construct: {0}")]
    Unsupported(String),
    #[error("{0}")]
    Indeterminate(String),
}

impl AppError {
    fn exit_code(&self) -> u8 {
        match self {
            AppError::Input(_) => 2,
            AppError::Indeterminate(_) => 3,
            AppError::Unsupported(_) => 4,
        }
    }
}

impl From<LoadError> for AppError {
    fn from(e: LoadError) -> Self {
        match e {
            LoadError::Unsupported(construct) => AppError::Unsupported(construct),
            other => AppError::Input(other.to_string()),
        }
    }
}

impl From<PortfolioError> for AppError {
    fn from(e: PortfolioError) -> Self {
        match e {
            PortfolioError::Spec(_) | PortfolioError::NoSolversAvailable(_) => {
                AppError::Input(e.to_string())
            }
            other => AppError::Indeterminate(other.to_string()),
        }
    }
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        AppError::Indeterminate(e.to_string())
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbosity);
    match run(&cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{e}");
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

fn setup_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "error",
        1 => "warn",
        2 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli) -> Result<u8, AppError> {
    info!("Starting...");
    debug!(?cli, "parsed CLI argument values");

    info!("Reading P4 files...");
    let left_text = read_input(&cli.file1, cli.json)?;
    let right_text = read_input(&cli.file2, cli.json)?;

    info!("Creating Parser objects...");
    let left = load_parser_from_str(&left_text)?;
    let right = load_parser_from_str(&right_text)?;
    debug!(left = %left, right = %right, "loaded parsers");

    let specs = parse_solver_specs(&cli.solvers, cli.solvers_global_options.as_deref())?;
    let terms = Terms::new();
    let portfolio = Portfolio::open(&specs, &terms)?;
    let mut engine = EngineCtx::new(terms, portfolio);

    let options = BisimOptions {
        leaps: !cli.naive && !cli.disable_leaps,
        fallback_naive_on_unknown: cli.fallback_to_naive_on_unknown,
    };
    let method = if cli.naive {
        "naive"
    } else if cli.disable_leaps {
        "symbolic (leaps disabled)"
    } else {
        "symbolic"
    };
    info!(method, solvers = ?engine.solver.solver_names(), "selected bisimulation method");

    let meta = CertificateMeta {
        engine_version: env!("CARGO_PKG_VERSION").to_string(),
        method: method.to_string(),
        solvers: engine.solver.solver_names(),
        left_sha256: sha256_hex(&left_text),
        right_sha256: sha256_hex(&right_text),
    };

    let timer = cli.stat.then(|| {
        Timer::start(if cli.naive {
            "Naive bisimulation"
        } else {
            "Symbolic bisimulation"
        })
    });
    let outcome = bisimulate(&left, &right, &mut engine, &options, meta)?;
    if let Some(timer) = timer {
        println!("{}", timer.report());
    }

    print!("{outcome}");
    if let Some(path) = &cli.output {
        let rendered = if path.extension().and_then(|e| e.to_str()) == Some("json") {
            outcome.to_json()
        } else {
            outcome.to_string()
        };
        std::fs::write(path, rendered).map_err(|e| {
            AppError::Input(format!(
                "Could not write to output file '{}': {e}",
                path.display()
            ))
        })?;
    }

    Ok(if cli.fail_on_mismatch && !outcome.are_equivalent() {
        1
    } else {
        0
    })
}

fn read_input(path: &Path, in_json: bool) -> Result<String, AppError> {
    if in_json {
        std::fs::read_to_string(path).map_err(|e| {
            AppError::Input(format!("Error opening file '{}': {e}", path.display()))
        })
    } else {
        compile::compile_to_ir_json(path)
    }
}

fn sha256_hex(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

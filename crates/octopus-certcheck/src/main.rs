//! Standalone certificate checker.
//!
//! `octopus-certcheck CERT FILE1 FILE2` re-loads both IR JSON parsers,
//! re-runs the bisimulation, and confirms the stored outcome: the verdict
//! must match, and for a certificate every stored class must be reproduced
//! (same state tags and intra-state progress, stored register equalities
//! present in the recomputed class). Exit 0 on confirmation, 1 on
//! refutation, 2 on input errors.

use std::collections::HashSet;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser as ClapParser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use octopus_engine::bisim::{bisimulate, BisimOptions};
use octopus_engine::certificate::{Certificate, CertificateMeta, EquivalenceOutcome};
use octopus_engine::queries::EngineCtx;
use octopus_ir::load_parser;
use octopus_smt::portfolio::{parse_solver_specs, Portfolio};
use octopus_smt::terms::Terms;

#[derive(ClapParser, Debug)]
#[command(name = "octopus-certcheck")]
#[command(about = "Re-verify an octopus bisimulation certificate")]
#[command(version)]
struct Cli {
    /// The certificate or counterexample JSON emitted by `octopus -o`
    cert: PathBuf,

    /// Path to the first parser (IR JSON)
    file1: PathBuf,

    /// Path to the second parser (IR JSON)
    file2: PathBuf,

    /// List of solvers to use for the re-verification
    #[arg(short = 's', long, default_value = r#"["z3", "cvc5"]"#)]
    solvers: String,

    /// Increase output verbosity
    #[arg(short = 'v', long = "verbosity", action = clap::ArgAction::Count)]
    verbosity: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = match cli.verbosity {
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

    match run(&cli) {
        Ok(true) => {
            println!("Certificate confirmed.");
            ExitCode::SUCCESS
        }
        Ok(false) => {
            println!("Certificate REFUTED.");
            ExitCode::from(1)
        }
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::from(2)
        }
    }
}

fn run(cli: &Cli) -> Result<bool, String> {
    let cert_text = std::fs::read_to_string(&cli.cert)
        .map_err(|e| format!("cannot read '{}': {e}", cli.cert.display()))?;
    let stored: EquivalenceOutcome = serde_json::from_str(&cert_text)
        .map_err(|e| format!("'{}' is not an octopus outcome: {e}", cli.cert.display()))?;

    let left = load_parser(cli.file1.to_str().ok_or("non-UTF-8 path")?)
        .map_err(|e| e.to_string())?;
    let right = load_parser(cli.file2.to_str().ok_or("non-UTF-8 path")?)
        .map_err(|e| e.to_string())?;

    let specs = parse_solver_specs(&cli.solvers, None).map_err(|e| e.to_string())?;
    let terms = Terms::new();
    let portfolio = Portfolio::open(&specs, &terms).map_err(|e| e.to_string())?;
    let mut engine = EngineCtx::new(terms, portfolio);

    let meta = CertificateMeta {
        engine_version: env!("CARGO_PKG_VERSION").to_string(),
        method: "certcheck".to_string(),
        solvers: engine.solver.solver_names(),
        left_sha256: String::new(),
        right_sha256: String::new(),
    };
    let recomputed = bisimulate(&left, &right, &mut engine, &BisimOptions::default(), meta)
        .map_err(|e| e.to_string())?;

    match (&stored, &recomputed) {
        (EquivalenceOutcome::Equivalent(stored_cert), EquivalenceOutcome::Equivalent(cert)) => {
            Ok(classes_subsumed(stored_cert, cert))
        }
        (EquivalenceOutcome::NotEquivalent(_), EquivalenceOutcome::NotEquivalent(_)) => {
            info!("both runs report non-equivalence");
            Ok(true)
        }
        _ => {
            info!(
                stored = stored.verdict_class(),
                recomputed = recomputed.verdict_class(),
                "verdicts disagree"
            );
            Ok(false)
        }
    }
}

/// Every stored class must be reproduced by the fresh run: matching tags
/// and progress, and the stored register equalities re-established.
fn classes_subsumed(stored: &Certificate, fresh: &Certificate) -> bool {
    for class in &stored.classes {
        let reproduced = fresh.classes.iter().any(|candidate| {
            if candidate.state_left != class.state_left
                || candidate.state_right != class.state_right
                || candidate.consumed_left != class.consumed_left
                || candidate.consumed_right != class.consumed_right
            {
                return false;
            }
            let fresh_eqs: HashSet<&str> = candidate
                .register_equalities
                .iter()
                .map(String::as_str)
                .collect();
            class
                .register_equalities
                .iter()
                .all(|name| fresh_eqs.contains(name.as_str()))
        });
        if !reproduced {
            info!(
                state_left = %class.state_left,
                state_right = %class.state_right,
                "stored class not reproduced"
            );
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use octopus_engine::certificate::CertClass;

    fn meta() -> CertificateMeta {
        CertificateMeta {
            engine_version: "test".into(),
            method: "certcheck".into(),
            solvers: vec![],
            left_sha256: String::new(),
            right_sha256: String::new(),
        }
    }

    fn class(state: &str, eqs: &[&str]) -> CertClass {
        CertClass {
            state_left: state.into(),
            state_right: state.into(),
            consumed_left: 0,
            consumed_right: 0,
            register_equalities: eqs.iter().map(|s| s.to_string()).collect(),
            path_condition: "true".into(),
        }
    }

    fn cert(classes: Vec<CertClass>) -> Certificate {
        Certificate {
            verdict: "equivalent".into(),
            meta: meta(),
            classes,
        }
    }

    #[test]
    fn identical_certificates_are_subsumed() {
        let a = cert(vec![class("start", &["hdr.h"])]);
        assert!(classes_subsumed(&a, &a));
    }

    #[test]
    fn extra_fresh_equalities_still_subsume() {
        let stored = cert(vec![class("start", &["hdr.h"])]);
        let fresh = cert(vec![class("start", &["hdr.h", "hdr.x"])]);
        assert!(classes_subsumed(&stored, &fresh));
    }

    #[test]
    fn missing_class_refutes() {
        let stored = cert(vec![class("start", &[]), class("next", &[])]);
        let fresh = cert(vec![class("start", &[])]);
        assert!(!classes_subsumed(&stored, &fresh));
    }

    #[test]
    fn weaker_fresh_equalities_refute() {
        let stored = cert(vec![class("start", &["hdr.h"])]);
        let fresh = cert(vec![class("start", &[])]);
        assert!(!classes_subsumed(&stored, &fresh));
    }
}

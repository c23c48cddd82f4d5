//! CLI argument definitions.

use clap::{ArgAction, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "octopus")]
#[command(about = "Octopus is an equivalence checker for P4 packet parsers")]
#[command(version)]
pub struct Cli {
    /// Specify that both inputs are in IR (p4c) JSON format
    #[arg(short = 'j', long)]
    pub json: bool,

    /// Path to the first P4 program
    #[arg(value_name = "file 1")]
    pub file1: PathBuf,

    /// Path to the second P4 program
    #[arg(value_name = "file 2")]
    pub file2: PathBuf,

    /// Increase output verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long = "verbosity", action = ArgAction::Count)]
    pub verbosity: u8,

    /// Use naive bisimulation instead of symbolic bisimulation
    #[arg(short = 'n', long)]
    pub naive: bool,

    /// Disable leaps in symbolic bisimulation (ignored if --naive is set)
    #[arg(short = 'L', long = "disable_leaps")]
    pub disable_leaps: bool,

    /// Write the bisimulation certificate or counterexample to this file
    /// (JSON when the name ends in .json, text otherwise)
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Exit with code 1 if the parsers are not equivalent
    #[arg(short = 'f', long = "fail-on-mismatch")]
    pub fail_on_mismatch: bool,

    /// Measure and print bisimulation execution time and memory usage
    #[arg(short = 'S', long)]
    pub stat: bool,

    /// List of solvers, possibly with options, to use for symbolic
    /// bisimulation
    #[arg(short = 's', long, default_value = r#"["z3", "cvc5"]"#)]
    pub solvers: String,

    /// Global options applied to each of the provided solvers
    #[arg(long = "solvers-global-options", value_name = "GLOBAL_OPTIONS")]
    pub solvers_global_options: Option<String>,

    /// On an unknown solver answer during a leap, retry the pair with
    /// single-bit steps instead of failing
    #[arg(long = "fallback-to-naive-on-unknown")]
    pub fallback_to_naive_on_unknown: bool,
}

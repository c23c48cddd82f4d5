//! Parser intermediate representation for octopus.
//!
//! The IR models a packet parser as a finite state machine over a bounded
//! register file: each state runs an ordered list of statements
//! (fixed-width `extract`s and register-slice `assign`s) and ends in a
//! `select` whose arms are evaluated top to bottom, first match wins.
//!
//! [`json`] loads and canonicalises the IR JSON produced by the external
//! compiler, [`validate`] rejects anything outside the covered subset
//! before a bisimulation starts, and [`interp`] is the concrete reference
//! interpreter used for witness replay.

pub mod interp;
pub mod json;
pub mod parser;
pub mod validate;

pub use json::{load_parser, load_parser_from_str};
pub use parser::{Arm, Expr, ExprOp, Parser, Pattern, Select, State, Statement, Target};

use thiserror::Error;

/// Errors surfaced while loading or validating parser IR.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("IR schema error: {0}")]
    Schema(String),
    #[error("unsupported construct: {0}")]
    Unsupported(String),
    #[error("IR semantic error: {0}")]
    Semantic(String),
}

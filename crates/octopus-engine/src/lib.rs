//! Symbolic bisimulation engine with leaps.
//!
//! The engine decides language equivalence of two parser IRs by computing
//! the largest bisimulation between their symbolic configurations. Both
//! sides read the same lazily materialised symbolic packet; a worklist
//! fixed point explores pair configurations breadth-first, discharging
//! already-covered pairs against the growing relation via SMT and taking
//! leap-sized strides over stretches where neither side branches. The
//! outcome is either a certificate presenting the relation or a concrete
//! witness packet exhibiting divergence.

pub mod bisim;
pub mod buffer;
pub mod certificate;
pub mod config;
pub mod queries;
pub mod step;

pub use bisim::{bisimulate, BisimOptions};
pub use certificate::{
    Certificate, CertificateMeta, Counterexample, EquivalenceOutcome, SideReport,
};
pub use queries::{EngineCtx, EngineError};

//! Abstract SMT solver interface.

use std::collections::HashMap;

use crate::formula::Formula;
use crate::terms::TermArena;

/// Result of a satisfiability check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SatResult {
    Sat,
    Unsat,
    Unknown(String),
}

impl SatResult {
    /// `Sat` and `Unsat` are decisive; `Unknown` is not.
    pub fn is_decisive(&self) -> bool {
        !matches!(self, SatResult::Unknown(_))
    }
}

/// A concrete bit-vector value extracted from a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitsValue {
    pub width: u32,
    pub value: u128,
}

/// A model (variable assignments) extracted from a SAT result.
#[derive(Debug, Clone, Default)]
pub struct Model {
    pub values: HashMap<String, BitsValue>,
}

impl Model {
    pub fn get(&self, name: &str) -> Option<BitsValue> {
        self.values.get(name).copied()
    }

    /// The value of a 1-bit variable, if present in the model.
    pub fn get_bit(&self, name: &str) -> Option<bool> {
        match self.values.get(name) {
            Some(BitsValue { width: 1, value }) => Some(*value == 1),
            _ => None,
        }
    }
}

/// Abstract SMT solver over the bit-vector term algebra.
///
/// Backends receive the arena alongside each formula because formulas hold
/// interned [`crate::terms::TermId`] handles, not owned trees.
pub trait SmtSolver {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Declare a bit-vector variable.
    fn declare_var(&mut self, name: &str, width: u32) -> Result<(), Self::Error>;

    /// Assert a constraint at the current stack frame.
    fn assert(&mut self, arena: &TermArena, formula: &Formula) -> Result<(), Self::Error>;

    /// Push a new scope.
    fn push(&mut self) -> Result<(), Self::Error>;

    /// Pop a scope.
    fn pop(&mut self) -> Result<(), Self::Error>;

    /// Check satisfiability.
    fn check_sat(&mut self) -> Result<SatResult, Self::Error>;

    /// Check satisfiability and extract a model for the named variables if
    /// SAT.
    fn check_sat_with_model(
        &mut self,
        vars: &[(String, u32)],
    ) -> Result<(SatResult, Option<Model>), Self::Error>;

    /// Reset the solver to an empty assertion stack.
    fn reset(&mut self) -> Result<(), Self::Error>;
}

//! The engine's SMT query shapes over the solver portfolio.
//!
//! Every probe is framed by push/pop so the portfolio's base frame only
//! ever holds variable declarations. An indeterminate answer (every solver
//! unknown or failed) aborts the query with context attached; soundness
//! requires decisive answers.

use thiserror::Error;

use octopus_smt::formula::Formula;
use octopus_smt::portfolio::{Portfolio, PortfolioError};
use octopus_smt::solver::{Model, SatResult};
use octopus_smt::terms::Terms;

use crate::buffer::SymbolicBuffer;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("solver indeterminate at {context}: {reasons}")]
    Indeterminate { context: String, reasons: String },
    #[error("solver failure at {context}: {source}")]
    Solver {
        context: String,
        #[source]
        source: PortfolioError,
    },
}

/// Mutable engine context: the term arena handle, the shared symbolic
/// buffer, and the solver portfolio. Owned by the bisimulation main loop;
/// `context` carries the pair currently being explored so errors surface
/// with useful provenance.
pub struct EngineCtx {
    pub terms: Terms,
    pub buffer: SymbolicBuffer,
    pub solver: Portfolio,
    pub context: String,
    queries: u64,
}

impl EngineCtx {
    pub fn new(terms: Terms, solver: Portfolio) -> Self {
        Self {
            terms,
            buffer: SymbolicBuffer::new(),
            solver,
            context: "initialisation".to_string(),
            queries: 0,
        }
    }

    /// Number of SMT checks issued so far.
    pub fn query_count(&self) -> u64 {
        self.queries
    }

    fn fail(&self, source: PortfolioError) -> EngineError {
        match source {
            PortfolioError::Indeterminate(reasons) => EngineError::Indeterminate {
                context: self.context.clone(),
                reasons,
            },
            other => EngineError::Solver {
                context: self.context.clone(),
                source: other,
            },
        }
    }

    /// Is `formula` satisfiable? Literal formulas short-circuit without a
    /// solver round-trip.
    pub fn is_satisfiable(&mut self, formula: &Formula) -> Result<bool, EngineError> {
        if formula.is_true() {
            return Ok(true);
        }
        if formula.is_false() {
            return Ok(false);
        }
        self.queries += 1;
        let result = (|| -> Result<SatResult, PortfolioError> {
            self.solver.push()?;
            let outcome = self
                .solver
                .assert(formula)
                .and_then(|_| self.solver.check());
            // Pop before propagating so the session never strands a frame.
            let popped = self.solver.pop();
            let outcome = outcome?;
            popped?;
            Ok(outcome)
        })();
        match result {
            Ok(SatResult::Sat) => Ok(true),
            Ok(SatResult::Unsat) => Ok(false),
            Ok(SatResult::Unknown(reasons)) => Err(EngineError::Indeterminate {
                context: self.context.clone(),
                reasons,
            }),
            Err(source) => Err(self.fail(source)),
        }
    }

    /// Does `antecedent` imply `consequent`? Decided as
    /// `unsat(antecedent ∧ ¬consequent)`.
    pub fn implies(
        &mut self,
        antecedent: &Formula,
        consequent: &Formula,
    ) -> Result<bool, EngineError> {
        if consequent.is_true() {
            return Ok(true);
        }
        let negated = Formula::and2(antecedent.clone(), Formula::not(consequent.clone()));
        Ok(!self.is_satisfiable(&negated)?)
    }

    /// A model of `formula` over the given variables, or `None` when
    /// unsatisfiable.
    pub fn model(
        &mut self,
        formula: &Formula,
        vars: Vec<(String, u32)>,
    ) -> Result<Option<Model>, EngineError> {
        self.queries += 1;
        let result = (|| -> Result<(SatResult, Option<Model>), PortfolioError> {
            self.solver.push()?;
            let outcome = self
                .solver
                .assert(formula)
                .and_then(|_| self.solver.check_with_model(vars));
            let popped = self.solver.pop();
            let outcome = outcome?;
            popped?;
            Ok(outcome)
        })();
        match result {
            Ok((SatResult::Sat, model)) => Ok(Some(model.unwrap_or_default())),
            Ok((SatResult::Unsat, _)) => Ok(None),
            Ok((SatResult::Unknown(reasons), _)) => Err(EngineError::Indeterminate {
                context: self.context.clone(),
                reasons,
            }),
            Err(source) => Err(self.fail(source)),
        }
    }
}

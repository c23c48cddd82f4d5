//! First-of-N solver portfolio.
//!
//! Every configured solver runs on its own worker thread and replays the
//! same command stream (declarations, assertions, push/pop), so all
//! assertion stacks stay aligned. A satisfiability check is broadcast to
//! every worker; the first definitive answer (`Sat`/`Unsat`) wins and the
//! query resolves immediately. Slower workers finish their
//! native-timeout-bounded check before they see later commands, which keeps
//! their sessions consistent without mid-query cancellation. A query for
//! which every solver reports unknown (or fails) is indeterminate; the
//! engine treats that as fatal because soundness requires decisive answers.

use std::sync::mpsc;
use std::thread::JoinHandle;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::backends::cvc5_backend::Cvc5Solver;
use crate::backends::z3_backend::Z3Solver;
use crate::formula::Formula;
use crate::solver::{Model, SatResult, SmtSolver};
use crate::terms::Terms;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverKind {
    Z3,
    Cvc5,
}

impl std::fmt::Display for SolverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SolverKind::Z3 => write!(f, "z3"),
            SolverKind::Cvc5 => write!(f, "cvc5"),
        }
    }
}

impl std::str::FromStr for SolverKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "z3" => Ok(SolverKind::Z3),
            "cvc5" => Ok(SolverKind::Cvc5),
            other => Err(format!("unknown solver '{other}' (expected z3 or cvc5)")),
        }
    }
}

/// Per-solver options recognised by the portfolio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolverOptions {
    /// When false the worker emulates push/pop by replaying the assertion
    /// prefix on every check. Correctness never depends on incrementality.
    pub incremental: bool,
    pub generate_models: bool,
    /// Per-query wall-clock limit enforced natively by the solver; expiry
    /// surfaces as `Unknown`. Zero disables the limit.
    pub timeout_ms: u64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            incremental: true,
            generate_models: true,
            timeout_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolverSpec {
    pub kind: SolverKind,
    pub options: SolverOptions,
}

#[derive(Debug, Error)]
pub enum PortfolioError {
    #[error("invalid solver specification: {0}")]
    Spec(String),
    #[error("none of the specified solvers are available: {0}")]
    NoSolversAvailable(String),
    #[error("all solvers indeterminate: {0}")]
    Indeterminate(String),
    #[error("all solver workers exited unexpectedly")]
    WorkersGone,
}

/// Parse a solver list such as `["z3", ["cvc5", {"timeout_ms": 5000}]]`,
/// merging `global` options (a JSON object) underneath each entry's own.
pub fn parse_solver_specs(
    spec: &str,
    global: Option<&str>,
) -> Result<Vec<SolverSpec>, PortfolioError> {
    let global_opts = match global {
        Some(text) => {
            let value: Value = serde_json::from_str(text)
                .map_err(|e| PortfolioError::Spec(format!("global options: {e}")))?;
            let obj = value
                .as_object()
                .ok_or_else(|| {
                    PortfolioError::Spec("global options must be a JSON object".into())
                })?
                .clone();
            apply_options(SolverOptions::default(), &obj)?
        }
        None => SolverOptions::default(),
    };

    let value: Value =
        serde_json::from_str(spec).map_err(|e| PortfolioError::Spec(e.to_string()))?;
    let entries = value.as_array().ok_or_else(|| {
        PortfolioError::Spec(format!(
            "expected a list of solvers, e.g. [\"z3\", [\"cvc5\", {{\"timeout_ms\": 5000}}]], got: {spec}"
        ))
    })?;

    let mut specs = Vec::with_capacity(entries.len());
    for entry in entries {
        let (name, own) = match entry {
            Value::String(name) => (name.as_str(), None),
            Value::Array(pair) if pair.len() == 2 => {
                let name = pair[0].as_str().ok_or_else(|| {
                    PortfolioError::Spec(format!("solver name must be a string: {entry}"))
                })?;
                let opts = pair[1].as_object().ok_or_else(|| {
                    PortfolioError::Spec(format!("solver options must be an object: {entry}"))
                })?;
                (name, Some(opts))
            }
            other => {
                return Err(PortfolioError::Spec(format!(
                    "expected \"name\" or [\"name\", {{options}}], got: {other}"
                )))
            }
        };
        let kind: SolverKind = name.parse().map_err(PortfolioError::Spec)?;
        let options = match own {
            Some(obj) => apply_options(global_opts.clone(), obj)?,
            None => global_opts.clone(),
        };
        specs.push(SolverSpec { kind, options });
    }

    if specs.is_empty() {
        return Err(PortfolioError::Spec("solver list is empty".into()));
    }
    Ok(specs)
}

fn apply_options(
    mut base: SolverOptions,
    obj: &serde_json::Map<String, Value>,
) -> Result<SolverOptions, PortfolioError> {
    for (key, value) in obj {
        match key.as_str() {
            "incremental" => {
                base.incremental = value.as_bool().ok_or_else(|| {
                    PortfolioError::Spec(format!("'incremental' must be a bool, got {value}"))
                })?;
            }
            "generate_models" => {
                base.generate_models = value.as_bool().ok_or_else(|| {
                    PortfolioError::Spec(format!("'generate_models' must be a bool, got {value}"))
                })?;
            }
            "timeout_ms" => {
                base.timeout_ms = value.as_u64().ok_or_else(|| {
                    PortfolioError::Spec(format!("'timeout_ms' must be an integer, got {value}"))
                })?;
            }
            other => {
                return Err(PortfolioError::Spec(format!(
                    "unknown solver option '{other}'"
                )));
            }
        }
    }
    Ok(base)
}

enum Cmd {
    Declare(String, u32),
    Assert(Formula),
    Push,
    Pop,
    Check {
        id: u64,
        model_vars: Option<Vec<(String, u32)>>,
    },
    Shutdown,
}

struct Answer {
    id: u64,
    solver: String,
    outcome: Result<(SatResult, Option<Model>), String>,
}

struct Worker {
    name: String,
    tx: mpsc::Sender<Cmd>,
    handle: Option<JoinHandle<()>>,
}

/// A portfolio session. Owns one worker per solver; dropped workers are
/// shut down and joined.
pub struct Portfolio {
    workers: Vec<Worker>,
    answers: mpsc::Receiver<Answer>,
    next_query: u64,
}

impl Portfolio {
    /// Spawn workers for every spec. Solvers that fail to start (for
    /// example a missing `cvc5` binary) are skipped with a warning, matching
    /// the behavior of listing an unavailable solver; if none start the
    /// portfolio is unusable.
    pub fn open(specs: &[SolverSpec], terms: &Terms) -> Result<Self, PortfolioError> {
        let (answer_tx, answer_rx) = mpsc::channel::<Answer>();
        let mut workers = Vec::new();
        let mut failures = Vec::new();

        for spec in specs {
            let name = spec.kind.to_string();
            let (cmd_tx, cmd_rx) = mpsc::channel::<Cmd>();
            let worker_terms = terms.clone();
            let worker_spec = spec.clone();
            let worker_answers = answer_tx.clone();
            let thread_name = name.clone();
            let handle = std::thread::Builder::new()
                .name(format!("solver-{thread_name}"))
                .spawn(move || worker_main(worker_spec, worker_terms, cmd_rx, worker_answers))
                .map_err(|e| PortfolioError::Spec(format!("failed to spawn worker: {e}")))?;
            workers.push(Worker {
                name,
                tx: cmd_tx,
                handle: Some(handle),
            });
        }

        // Init handshake: each worker reports whether its backend started.
        let mut alive = Vec::new();
        for _ in 0..workers.len() {
            match answer_rx.recv() {
                Ok(Answer {
                    id: 0,
                    solver,
                    outcome,
                }) => match outcome {
                    Ok(_) => {
                        debug!(solver = %solver, "solver available");
                        alive.push(solver);
                    }
                    Err(e) => {
                        warn!(solver = %solver, error = %e, "solver is not available");
                        failures.push(format!("{solver}: {e}"));
                    }
                },
                Ok(other) => {
                    // Init answers always carry id 0.
                    return Err(PortfolioError::Spec(format!(
                        "unexpected init answer id {}",
                        other.id
                    )));
                }
                Err(_) => break,
            }
        }

        let mut portfolio = Self {
            workers,
            answers: answer_rx,
            next_query: 1,
        };
        portfolio.retain_workers(&alive);

        if portfolio.workers.is_empty() {
            return Err(PortfolioError::NoSolversAvailable(failures.join("; ")));
        }
        Ok(portfolio)
    }

    fn retain_workers(&mut self, alive: &[String]) {
        let mut kept = Vec::new();
        for mut worker in self.workers.drain(..) {
            if alive.contains(&worker.name) {
                kept.push(worker);
            } else {
                let _ = worker.tx.send(Cmd::Shutdown);
                if let Some(handle) = worker.handle.take() {
                    let _ = handle.join();
                }
            }
        }
        self.workers = kept;
    }

    pub fn solver_names(&self) -> Vec<String> {
        self.workers.iter().map(|w| w.name.clone()).collect()
    }

    fn broadcast(&mut self, make: impl Fn() -> Cmd) -> Result<(), PortfolioError> {
        self.workers.retain(|w| w.tx.send(make()).is_ok());
        if self.workers.is_empty() {
            return Err(PortfolioError::WorkersGone);
        }
        Ok(())
    }

    /// Declare a variable in every solver. Must be issued at the base
    /// assertion frame so declarations survive pops in subprocess backends.
    pub fn declare_var(&mut self, name: &str, width: u32) -> Result<(), PortfolioError> {
        let name = name.to_string();
        self.broadcast(|| Cmd::Declare(name.clone(), width))
    }

    pub fn assert(&mut self, formula: &Formula) -> Result<(), PortfolioError> {
        self.broadcast(|| Cmd::Assert(formula.clone()))
    }

    pub fn push(&mut self) -> Result<(), PortfolioError> {
        self.broadcast(|| Cmd::Push)
    }

    pub fn pop(&mut self) -> Result<(), PortfolioError> {
        self.broadcast(|| Cmd::Pop)
    }

    /// Broadcast a check and resolve it with the first definitive answer.
    pub fn check(&mut self) -> Result<SatResult, PortfolioError> {
        self.check_inner(None).map(|(result, _)| result)
    }

    /// Like [`Portfolio::check`], additionally requesting a model for the
    /// named variables when the result is `Sat`.
    pub fn check_with_model(
        &mut self,
        model_vars: Vec<(String, u32)>,
    ) -> Result<(SatResult, Option<Model>), PortfolioError> {
        self.check_inner(Some(model_vars))
    }

    fn check_inner(
        &mut self,
        model_vars: Option<Vec<(String, u32)>>,
    ) -> Result<(SatResult, Option<Model>), PortfolioError> {
        let id = self.next_query;
        self.next_query += 1;
        let wants_model = model_vars.is_some();
        {
            let vars = model_vars;
            self.broadcast(|| Cmd::Check {
                id,
                model_vars: vars.clone(),
            })?;
        }

        let mut pending = self.workers.len();
        let mut unknowns: Vec<String> = Vec::new();
        let mut sat_without_model = false;
        while pending > 0 {
            let answer = self.answers.recv().map_err(|_| PortfolioError::WorkersGone)?;
            if answer.id != id {
                // A slow worker resolving an already-won earlier query.
                continue;
            }
            pending -= 1;
            match answer.outcome {
                Ok((SatResult::Sat, Some(model))) => return Ok((SatResult::Sat, Some(model))),
                Ok((SatResult::Sat, None)) => {
                    if wants_model {
                        // Decisive, but another solver may still supply the
                        // model; remember and keep listening.
                        sat_without_model = true;
                    } else {
                        return Ok((SatResult::Sat, None));
                    }
                }
                Ok((SatResult::Unsat, _)) => return Ok((SatResult::Unsat, None)),
                Ok((SatResult::Unknown(reason), _)) => {
                    debug!(solver = %answer.solver, reason = %reason, "solver unknown");
                    unknowns.push(format!("{}: {reason}", answer.solver));
                }
                Err(e) => {
                    warn!(solver = %answer.solver, error = %e, "solver failed, excluding answer");
                    unknowns.push(format!("{}: {e}", answer.solver));
                }
            }
        }

        if sat_without_model {
            return Ok((SatResult::Sat, None));
        }
        Err(PortfolioError::Indeterminate(unknowns.join("; ")))
    }
}

impl Drop for Portfolio {
    fn drop(&mut self) {
        for worker in &self.workers {
            let _ = worker.tx.send(Cmd::Shutdown);
        }
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                let _ = handle.join();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Worker side
// ---------------------------------------------------------------------------

/// Backend dispatch with errors flattened to strings for the answer channel.
enum AnySolver {
    Z3(Z3Solver),
    Cvc5(Cvc5Solver),
}

impl AnySolver {
    fn open(spec: &SolverSpec) -> Result<Self, String> {
        match spec.kind {
            SolverKind::Z3 => Ok(AnySolver::Z3(Z3Solver::with_timeout_ms(
                spec.options.timeout_ms,
            ))),
            SolverKind::Cvc5 => Cvc5Solver::with_timeout_ms(spec.options.timeout_ms)
                .map(AnySolver::Cvc5)
                .map_err(|e| e.to_string()),
        }
    }

    fn declare_var(&mut self, name: &str, width: u32) -> Result<(), String> {
        match self {
            AnySolver::Z3(s) => s.declare_var(name, width).map_err(|e| e.to_string()),
            AnySolver::Cvc5(s) => s.declare_var(name, width).map_err(|e| e.to_string()),
        }
    }

    fn assert(
        &mut self,
        arena: &crate::terms::TermArena,
        formula: &Formula,
    ) -> Result<(), String> {
        match self {
            AnySolver::Z3(s) => s.assert(arena, formula).map_err(|e| e.to_string()),
            AnySolver::Cvc5(s) => s.assert(arena, formula).map_err(|e| e.to_string()),
        }
    }

    fn push(&mut self) -> Result<(), String> {
        match self {
            AnySolver::Z3(s) => s.push().map_err(|e| e.to_string()),
            AnySolver::Cvc5(s) => s.push().map_err(|e| e.to_string()),
        }
    }

    fn pop(&mut self) -> Result<(), String> {
        match self {
            AnySolver::Z3(s) => s.pop().map_err(|e| e.to_string()),
            AnySolver::Cvc5(s) => s.pop().map_err(|e| e.to_string()),
        }
    }

    fn check_sat(&mut self) -> Result<SatResult, String> {
        match self {
            AnySolver::Z3(s) => s.check_sat().map_err(|e| e.to_string()),
            AnySolver::Cvc5(s) => s.check_sat().map_err(|e| e.to_string()),
        }
    }

    fn check_sat_with_model(
        &mut self,
        vars: &[(String, u32)],
    ) -> Result<(SatResult, Option<Model>), String> {
        match self {
            AnySolver::Z3(s) => s.check_sat_with_model(vars).map_err(|e| e.to_string()),
            AnySolver::Cvc5(s) => s.check_sat_with_model(vars).map_err(|e| e.to_string()),
        }
    }

    fn reset(&mut self) -> Result<(), String> {
        match self {
            AnySolver::Z3(s) => s.reset().map_err(|e| e.to_string()),
            AnySolver::Cvc5(s) => s.reset().map_err(|e| e.to_string()),
        }
    }
}

fn worker_main(
    spec: SolverSpec,
    terms: Terms,
    commands: mpsc::Receiver<Cmd>,
    answers: mpsc::Sender<Answer>,
) {
    let name = spec.kind.to_string();
    let mut backend = match AnySolver::open(&spec) {
        Ok(backend) => {
            let _ = answers.send(Answer {
                id: 0,
                solver: name.clone(),
                outcome: Ok((SatResult::Unknown("init".into()), None)),
            });
            backend
        }
        Err(e) => {
            let _ = answers.send(Answer {
                id: 0,
                solver: name,
                outcome: Err(e),
            });
            return;
        }
    };

    // Replay log for non-incremental emulation. Declarations are global;
    // assertions are grouped into frames mirroring push/pop.
    let mut declares: Vec<(String, u32)> = Vec::new();
    let mut frames: Vec<Vec<Formula>> = vec![Vec::new()];
    let incremental = spec.options.incremental;

    // A failed declare/assert poisons every later answer from this worker.
    // The worker keeps draining commands so that each broadcast check still
    // receives an answer from it; the poisoned answer reads as a failure.
    let mut poisoned: Option<String> = None;

    while let Ok(cmd) = commands.recv() {
        let step: Result<(), String> = match cmd {
            Cmd::Shutdown => break,
            Cmd::Declare(name, width) => {
                declares.push((name.clone(), width));
                if poisoned.is_none() {
                    backend.declare_var(&name, width)
                } else {
                    Ok(())
                }
            }
            Cmd::Assert(formula) => {
                if !incremental {
                    frames
                        .last_mut()
                        .expect("frame stack never empty")
                        .push(formula);
                    Ok(())
                } else if poisoned.is_none() {
                    let arena = terms.read();
                    backend.assert(&arena, &formula)
                } else {
                    Ok(())
                }
            }
            Cmd::Push => {
                if !incremental {
                    frames.push(Vec::new());
                    Ok(())
                } else if poisoned.is_none() {
                    backend.push()
                } else {
                    Ok(())
                }
            }
            Cmd::Pop => {
                if !incremental {
                    frames.pop();
                    if frames.is_empty() {
                        frames.push(Vec::new());
                    }
                    Ok(())
                } else if poisoned.is_none() {
                    backend.pop()
                } else {
                    Ok(())
                }
            }
            Cmd::Check { id, model_vars } => {
                let result = match &poisoned {
                    Some(reason) => Err(reason.clone()),
                    None if incremental => {
                        run_check(&mut backend, &spec, model_vars.as_deref())
                    }
                    None => replay_and_check(
                        &mut backend,
                        &spec,
                        &terms,
                        &declares,
                        &frames,
                        model_vars.as_deref(),
                    ),
                };
                if answers
                    .send(Answer {
                        id,
                        solver: name.clone(),
                        outcome: result,
                    })
                    .is_err()
                {
                    return;
                }
                Ok(())
            }
        };

        if let Err(e) = step {
            warn!(solver = %name, error = %e, "solver command failed, poisoning worker");
            poisoned = Some(e);
        }
    }
}

fn run_check(
    backend: &mut AnySolver,
    spec: &SolverSpec,
    model_vars: Option<&[(String, u32)]>,
) -> Result<(SatResult, Option<Model>), String> {
    match model_vars {
        Some(vars) if spec.options.generate_models => backend.check_sat_with_model(vars),
        _ => backend.check_sat().map(|r| (r, None)),
    }
}

fn replay_and_check(
    backend: &mut AnySolver,
    spec: &SolverSpec,
    terms: &Terms,
    declares: &[(String, u32)],
    frames: &[Vec<Formula>],
    model_vars: Option<&[(String, u32)]>,
) -> Result<(SatResult, Option<Model>), String> {
    backend.reset()?;
    for (name, width) in declares {
        backend.declare_var(name, *width)?;
    }
    {
        let arena = terms.read();
        for frame in frames {
            for formula in frame {
                backend.assert(&arena, formula)?;
            }
        }
    }
    run_check(backend, spec, model_vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::Formula;

    fn z3_only() -> Vec<SolverSpec> {
        vec![SolverSpec {
            kind: SolverKind::Z3,
            options: SolverOptions::default(),
        }]
    }

    #[test]
    fn parse_plain_solver_list() {
        let specs = parse_solver_specs(r#"["z3", "cvc5"]"#, None).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].kind, SolverKind::Z3);
        assert_eq!(specs[1].kind, SolverKind::Cvc5);
        assert!(specs[0].options.incremental);
    }

    #[test]
    fn parse_solver_with_options_and_global_defaults() {
        let specs = parse_solver_specs(
            r#"["z3", ["cvc5", {"timeout_ms": 5000, "incremental": false}]]"#,
            Some(r#"{"timeout_ms": 1000}"#),
        )
        .unwrap();
        assert_eq!(specs[0].options.timeout_ms, 1000);
        assert_eq!(specs[1].options.timeout_ms, 5000);
        assert!(!specs[1].options.incremental);
    }

    #[test]
    fn parse_rejects_unknown_solver_and_option() {
        assert!(parse_solver_specs(r#"["yices"]"#, None).is_err());
        assert!(parse_solver_specs(r#"[["z3", {"threads": 4}]]"#, None).is_err());
        assert!(parse_solver_specs(r#"{}"#, None).is_err());
        assert!(parse_solver_specs(r#"[]"#, None).is_err());
    }

    #[test]
    fn portfolio_sat_unsat_roundtrip() {
        let terms = Terms::new();
        let mut portfolio = Portfolio::open(&z3_only(), &terms).unwrap();

        let x = terms.var("x", 8);
        let a = terms.constant(8, 3);
        let b = terms.constant(8, 7);
        portfolio.declare_var("x", 8).unwrap();

        portfolio.push().unwrap();
        portfolio.assert(&Formula::Eq(x, a)).unwrap();
        assert_eq!(portfolio.check().unwrap(), SatResult::Sat);
        portfolio.pop().unwrap();

        portfolio.push().unwrap();
        portfolio
            .assert(&Formula::And(vec![Formula::Eq(x, a), Formula::Eq(x, b)]))
            .unwrap();
        assert_eq!(portfolio.check().unwrap(), SatResult::Unsat);
        portfolio.pop().unwrap();
    }

    #[test]
    fn portfolio_model_extraction() {
        let terms = Terms::new();
        let mut portfolio = Portfolio::open(&z3_only(), &terms).unwrap();

        let bit0 = terms.var("pkt_0", 1);
        let bit1 = terms.var("pkt_1", 1);
        portfolio.declare_var("pkt_0", 1).unwrap();
        portfolio.declare_var("pkt_1", 1).unwrap();

        let one = terms.constant(1, 1);
        let zero = terms.constant(1, 0);
        portfolio
            .assert(&Formula::And(vec![
                Formula::Eq(bit0, one),
                Formula::Eq(bit1, zero),
            ]))
            .unwrap();

        let (result, model) = portfolio
            .check_with_model(vec![("pkt_0".to_string(), 1), ("pkt_1".to_string(), 1)])
            .unwrap();
        assert_eq!(result, SatResult::Sat);
        let model = model.unwrap();
        assert_eq!(model.get_bit("pkt_0"), Some(true));
        assert_eq!(model.get_bit("pkt_1"), Some(false));
    }

    #[test]
    fn non_incremental_replay_matches_incremental() {
        let terms = Terms::new();
        let specs = vec![SolverSpec {
            kind: SolverKind::Z3,
            options: SolverOptions {
                incremental: false,
                ..SolverOptions::default()
            },
        }];
        let mut portfolio = Portfolio::open(&specs, &terms).unwrap();

        let x = terms.var("x", 4);
        let one = terms.constant(4, 1);
        let two = terms.constant(4, 2);
        portfolio.declare_var("x", 4).unwrap();
        portfolio.assert(&Formula::Eq(x, one)).unwrap();

        portfolio.push().unwrap();
        portfolio.assert(&Formula::Eq(x, two)).unwrap();
        assert_eq!(portfolio.check().unwrap(), SatResult::Unsat);
        portfolio.pop().unwrap();

        assert_eq!(portfolio.check().unwrap(), SatResult::Sat);
    }
}

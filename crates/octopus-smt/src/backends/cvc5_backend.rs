//! cvc5 backend, driven as a child process over SMT-LIB 2 pipes.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};

use thiserror::Error;

use crate::backends::smtlib_printer::{formula_to_smtlib, sort_to_smtlib};
use crate::formula::Formula;
use crate::solver::{BitsValue, Model, SatResult, SmtSolver};
use crate::terms::TermArena;

#[derive(Debug, Error)]
pub enum Cvc5Error {
    #[error("cvc5 I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cvc5 not found: {0}")]
    NotFound(String),
    #[error("cvc5 error: {0}")]
    SolverError(String),
    #[error("Failed to parse cvc5 output: {0}")]
    ParseError(String),
}

pub struct Cvc5Solver {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    stderr: BufReader<ChildStderr>,
    vars: HashMap<String, u32>,
}

impl Cvc5Solver {
    pub fn new() -> Result<Self, Cvc5Error> {
        Self::with_command_and_timeout("cvc5", None)
    }

    pub fn with_timeout_ms(timeout_ms: u64) -> Result<Self, Cvc5Error> {
        if timeout_ms == 0 {
            return Self::with_command_and_timeout("cvc5", None);
        }
        Self::with_command_and_timeout("cvc5", Some(timeout_ms))
    }

    pub fn with_command_and_timeout(
        cmd: &str,
        timeout_ms: Option<u64>,
    ) -> Result<Self, Cvc5Error> {
        let mut args = vec![
            "--lang".to_string(),
            "smt2".to_string(),
            "--incremental".to_string(),
            "--produce-models".to_string(),
        ];
        if let Some(ms) = timeout_ms {
            args.push(format!("--tlimit-per={ms}"));
        }

        let mut child = Command::new(cmd)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Cvc5Error::NotFound(format!("{cmd}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Cvc5Error::SolverError("failed to capture cvc5 stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Cvc5Error::SolverError("failed to capture cvc5 stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Cvc5Error::SolverError("failed to capture cvc5 stderr".into()))?;

        let mut solver = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            stderr: BufReader::new(stderr),
            vars: HashMap::new(),
        };

        solver.send_command_no_response("(set-logic QF_BV)")?;
        Ok(solver)
    }

    fn send_command(&mut self, cmd: &str) -> Result<String, Cvc5Error> {
        writeln!(self.stdin, "{cmd}")?;
        self.stdin.flush()?;

        let mut response = String::new();
        self.stdout.read_line(&mut response)?;
        if response.is_empty() {
            let mut stderr = String::new();
            let _ = self.stderr.read_line(&mut stderr);
            return Err(Cvc5Error::SolverError(format!(
                "No response from cvc5 for command `{cmd}`. stderr: {}",
                stderr.trim()
            )));
        }
        Ok(response.trim_end().to_string())
    }

    fn send_command_no_response(&mut self, cmd: &str) -> Result<(), Cvc5Error> {
        writeln!(self.stdin, "{cmd}")?;
        self.stdin.flush()?;
        Ok(())
    }
}

impl Drop for Cvc5Solver {
    fn drop(&mut self) {
        let _ = writeln!(self.stdin, "(exit)");
        let _ = self.stdin.flush();
        let _ = self.child.wait();
    }
}

impl SmtSolver for Cvc5Solver {
    type Error = Cvc5Error;

    fn declare_var(&mut self, name: &str, width: u32) -> Result<(), Cvc5Error> {
        let sort = sort_to_smtlib(width);
        self.send_command_no_response(&format!("(declare-const {name} {sort})"))?;
        self.vars.insert(name.to_string(), width);
        Ok(())
    }

    fn assert(&mut self, arena: &TermArena, formula: &Formula) -> Result<(), Cvc5Error> {
        let smt = formula_to_smtlib(arena, formula);
        self.send_command_no_response(&format!("(assert {smt})"))?;
        Ok(())
    }

    fn push(&mut self) -> Result<(), Cvc5Error> {
        self.send_command_no_response("(push 1)")
    }

    fn pop(&mut self) -> Result<(), Cvc5Error> {
        self.send_command_no_response("(pop 1)")
    }

    fn check_sat(&mut self) -> Result<SatResult, Cvc5Error> {
        let response = self.send_command("(check-sat)")?;
        match response.as_str() {
            "sat" => Ok(SatResult::Sat),
            "unsat" => Ok(SatResult::Unsat),
            "unknown" => Ok(SatResult::Unknown("cvc5 returned unknown".into())),
            other => Err(Cvc5Error::SolverError(other.to_string())),
        }
    }

    fn check_sat_with_model(
        &mut self,
        vars: &[(String, u32)],
    ) -> Result<(SatResult, Option<Model>), Cvc5Error> {
        let result = self.check_sat()?;
        if result != SatResult::Sat {
            return Ok((result, None));
        }

        let mut values = HashMap::new();
        for (name, width) in vars {
            let response = self.send_command(&format!("(get-value ({name}))"))?;
            let value = parse_bv_value(&response).ok_or_else(|| {
                Cvc5Error::ParseError(format!("unparseable model value for {name}: {response}"))
            })?;
            values.insert(
                name.clone(),
                BitsValue {
                    width: *width,
                    value,
                },
            );
        }

        Ok((SatResult::Sat, Some(Model { values })))
    }

    fn reset(&mut self) -> Result<(), Cvc5Error> {
        self.send_command_no_response("(reset)")?;
        self.send_command_no_response("(set-logic QF_BV)")?;
        self.vars.clear();
        Ok(())
    }
}

/// Parse a `(get-value (name))` response of the form `((name #b0101))` or
/// `((name #x4d))` into a numeric value.
fn parse_bv_value(response: &str) -> Option<u128> {
    let inner = response
        .trim()
        .trim_start_matches('(')
        .trim_end_matches(')');
    let (_, literal) = inner.split_once(' ')?;
    let literal = literal.trim().trim_end_matches(')').trim();

    if let Some(bits) = literal.strip_prefix("#b") {
        u128::from_str_radix(bits, 2).ok()
    } else if let Some(hex) = literal.strip_prefix("#x") {
        u128::from_str_radix(hex, 16).ok()
    } else {
        None
    }
}

//! In-process Z3 backend over bit-vector asts.

use std::collections::HashMap;

use thiserror::Error;
use z3::ast::Ast;
use z3::SatResult as Z3SatResult;

use crate::formula::Formula;
use crate::solver::{BitsValue, Model, SatResult, SmtSolver};
use crate::terms::{BinOp, TermArena, TermId, TermNode};

#[derive(Debug, Error)]
pub enum Z3Error {
    #[error("Z3 error: {0}")]
    Internal(String),
    #[error("Unknown variable: {0}")]
    UnknownVariable(String),
}

pub struct Z3Solver {
    solver: z3::Solver,
    vars: HashMap<String, z3::ast::BV>,
    /// Translation cache, valid for the lifetime of `vars`.
    cache: HashMap<TermId, z3::ast::BV>,
    params: Option<z3::Params>,
}

impl Z3Solver {
    pub fn new() -> Self {
        Self {
            solver: z3::Solver::new(),
            vars: HashMap::new(),
            cache: HashMap::new(),
            params: None,
        }
    }

    pub fn with_timeout_ms(timeout_ms: u64) -> Self {
        if timeout_ms == 0 {
            return Self::new();
        }
        let solver = z3::Solver::new();
        let mut params = z3::Params::new();
        params.set_u32("timeout", timeout_ms as u32);
        solver.set_params(&params);
        Self {
            solver,
            vars: HashMap::new(),
            cache: HashMap::new(),
            params: Some(params),
        }
    }

    fn translate_term(&mut self, arena: &TermArena, t: TermId) -> Result<z3::ast::BV, Z3Error> {
        if let Some(bv) = self.cache.get(&t) {
            return Ok(bv.clone());
        }
        let bv = match arena.node(t).clone() {
            TermNode::Const { width, value } => bv_constant(width, value),
            TermNode::Var { name, .. } => self
                .vars
                .get(&name)
                .cloned()
                .ok_or(Z3Error::UnknownVariable(name))?,
            TermNode::Concat { hi, lo } => {
                let h = self.translate_term(arena, hi)?;
                let l = self.translate_term(arena, lo)?;
                h.concat(&l)
            }
            TermNode::Extract { base, hi, lo } => {
                self.translate_term(arena, base)?.extract(hi, lo)
            }
            TermNode::Not { base } => self.translate_term(arena, base)?.bvnot(),
            TermNode::Bin { op, lhs, rhs } => {
                let l = self.translate_term(arena, lhs)?;
                let r = self.translate_term(arena, rhs)?;
                match op {
                    BinOp::And => l.bvand(&r),
                    BinOp::Or => l.bvor(&r),
                    BinOp::Xor => l.bvxor(&r),
                    BinOp::Shl => l.bvshl(&r),
                    BinOp::Shr => l.bvlshr(&r),
                }
            }
            TermNode::Ite {
                cond,
                then_branch,
                else_branch,
            } => {
                let c = self.translate_term(arena, cond)?;
                let bit = c._eq(&bv_constant(1, 1));
                let th = self.translate_term(arena, then_branch)?;
                let el = self.translate_term(arena, else_branch)?;
                bit.ite(&th, &el)
            }
        };
        self.cache.insert(t, bv.clone());
        Ok(bv)
    }

    fn translate_formula(
        &mut self,
        arena: &TermArena,
        f: &Formula,
    ) -> Result<z3::ast::Bool, Z3Error> {
        match f {
            Formula::True => Ok(z3::ast::Bool::from_bool(true)),
            Formula::False => Ok(z3::ast::Bool::from_bool(false)),
            Formula::Eq(l, r) => {
                let lt = self.translate_term(arena, *l)?;
                let rt = self.translate_term(arena, *r)?;
                Ok(lt._eq(&rt))
            }
            Formula::Not(inner) => Ok(self.translate_formula(arena, inner)?.not()),
            Formula::And(parts) => {
                let bools: Result<Vec<_>, _> = parts
                    .iter()
                    .map(|p| self.translate_formula(arena, p))
                    .collect();
                let bools = bools?;
                let refs: Vec<&z3::ast::Bool> = bools.iter().collect();
                Ok(z3::ast::Bool::and(&refs))
            }
            Formula::Or(parts) => {
                let bools: Result<Vec<_>, _> = parts
                    .iter()
                    .map(|p| self.translate_formula(arena, p))
                    .collect();
                let bools = bools?;
                let refs: Vec<&z3::ast::Bool> = bools.iter().collect();
                Ok(z3::ast::Bool::or(&refs))
            }
        }
    }

    fn model_value(
        model: &z3::Model,
        bv: &z3::ast::BV,
        width: u32,
    ) -> Result<u128, Z3Error> {
        // `as_u64` only covers 64 bits; evaluate wider vectors in chunks.
        let mut value: u128 = 0;
        let mut lo = 0u32;
        while lo < width {
            let hi = (lo + 63).min(width - 1);
            let chunk = bv.extract(hi, lo);
            let evaluated = model
                .eval::<z3::ast::BV>(&chunk, true)
                .ok_or_else(|| Z3Error::Internal("model evaluation failed".into()))?;
            let bits = evaluated
                .as_u64()
                .ok_or_else(|| Z3Error::Internal("model value is not numeric".into()))?;
            value |= u128::from(bits) << lo;
            lo = hi + 1;
        }
        Ok(value)
    }
}

fn bv_constant(width: u32, value: u128) -> z3::ast::BV {
    if width <= 64 {
        z3::ast::BV::from_u64(value as u64, width)
    } else {
        let hi = z3::ast::BV::from_u64((value >> 64) as u64, width - 64);
        let lo = z3::ast::BV::from_u64(value as u64, 64);
        hi.concat(&lo)
    }
}

impl Default for Z3Solver {
    fn default() -> Self {
        Self::new()
    }
}

impl SmtSolver for Z3Solver {
    type Error = Z3Error;

    fn declare_var(&mut self, name: &str, width: u32) -> Result<(), Z3Error> {
        let v = z3::ast::BV::new_const(name, width);
        self.vars.insert(name.to_string(), v);
        Ok(())
    }

    fn assert(&mut self, arena: &TermArena, formula: &Formula) -> Result<(), Z3Error> {
        let b = self.translate_formula(arena, formula)?;
        self.solver.assert(&b);
        Ok(())
    }

    fn push(&mut self) -> Result<(), Z3Error> {
        self.solver.push();
        Ok(())
    }

    fn pop(&mut self) -> Result<(), Z3Error> {
        self.solver.pop(1);
        Ok(())
    }

    fn check_sat(&mut self) -> Result<SatResult, Z3Error> {
        match self.solver.check() {
            Z3SatResult::Sat => Ok(SatResult::Sat),
            Z3SatResult::Unsat => Ok(SatResult::Unsat),
            Z3SatResult::Unknown => Ok(SatResult::Unknown("Z3 returned unknown".into())),
        }
    }

    fn check_sat_with_model(
        &mut self,
        vars: &[(String, u32)],
    ) -> Result<(SatResult, Option<Model>), Z3Error> {
        match self.solver.check() {
            Z3SatResult::Sat => {
                let z3_model = self
                    .solver
                    .get_model()
                    .ok_or_else(|| Z3Error::Internal("sat but no model available".into()))?;
                let mut values = HashMap::new();
                for (name, width) in vars {
                    let Some(bv) = self.vars.get(name) else {
                        return Err(Z3Error::UnknownVariable(name.clone()));
                    };
                    let value = Self::model_value(&z3_model, bv, *width)?;
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
            Z3SatResult::Unsat => Ok((SatResult::Unsat, None)),
            Z3SatResult::Unknown => {
                Ok((SatResult::Unknown("Z3 returned unknown".into()), None))
            }
        }
    }

    fn reset(&mut self) -> Result<(), Z3Error> {
        self.solver.reset();
        // Z3 may drop per-solver parameters on reset; reapply if configured.
        if let Some(params) = &self.params {
            self.solver.set_params(params);
        }
        self.vars.clear();
        self.cache.clear();
        Ok(())
    }
}

//! The step relation: advancing one side of the bisimulation by `k` bits.
//!
//! A configuration rests inside a state until that state's extract budget
//! is exhausted; completing the state executes its statement block against
//! the buffer slices it consumed, compiles the select scrutinees against
//! the resulting register file, and emits one guarded successor per
//! feasible arm in declaration order (first match wins, so each arm's
//! guard conjoins the negation of its predecessors). Successor states that
//! extract nothing complete immediately, so every returned configuration
//! either rests in a state that needs at least one more bit or is
//! terminal.

use octopus_ir::parser::{Expr, ExprOp, Parser, Pattern, Select, Statement, Target};
use octopus_smt::formula::Formula;
use octopus_smt::terms::{BinOp, TermId};
use tracing::trace;

use crate::config::{Cfg, Ctrl};
use crate::queries::{EngineCtx, EngineError};

/// The configurations a parser starts in: its initial configuration,
/// settled through any zero-width prefix of states.
pub fn initial_configs(parser: &Parser, ctx: &mut EngineCtx) -> Result<Vec<Cfg>, EngineError> {
    let cfg = Cfg::initial();
    if parser.start().extract_width == 0 {
        complete_state(parser, cfg, ctx)
    } else {
        Ok(vec![cfg])
    }
}

/// Advance `cfg` by exactly `k` bits, `1 <= k <= cfg.remaining(parser)`.
/// When the stride completes the state the statement block executes and
/// each feasible select arm yields a successor.
pub fn advance(
    parser: &Parser,
    cfg: &Cfg,
    k: u32,
    ctx: &mut EngineCtx,
) -> Result<Vec<Cfg>, EngineError> {
    let remaining = cfg.remaining(parser);
    assert!(
        k >= 1 && k <= remaining,
        "stride {k} out of range (remaining {remaining})"
    );
    let mut next = cfg.clone();
    next.offset += k as usize;
    if k < remaining {
        return Ok(vec![next]);
    }
    complete_state(parser, next, ctx)
}

/// Execute the statement block of the state `cfg` rests in (whose extract
/// budget `cfg` has fully consumed) and branch on its select.
fn complete_state(
    parser: &Parser,
    cfg: Cfg,
    ctx: &mut EngineCtx,
) -> Result<Vec<Cfg>, EngineError> {
    let Ctrl::InState(state_name) = &cfg.ctrl else {
        panic!("completing a terminal configuration");
    };
    let state = parser.state(state_name);
    debug_assert_eq!(cfg.offset, cfg.entry_offset + state.extract_width as usize);

    let mut regs = cfg.regs.clone();
    let mut read_offset = cfg.entry_offset;
    for stmt in &state.statements {
        match stmt {
            Statement::Extract { register, width } => {
                let slice = ctx
                    .buffer
                    .slice(&ctx.terms, &mut ctx.solver, read_offset, *width)
                    .map_err(|source| EngineError::Solver {
                        context: ctx.context.clone(),
                        source,
                    })?;
                read_offset += *width as usize;
                regs.insert(register.clone(), slice);
            }
            Statement::Assign {
                register,
                hi,
                lo,
                value,
            } => {
                let rhs = compile_expr(value, &regs, ctx);
                let width = parser.register_width(register);
                let full = *lo == 0 && *hi == width - 1;
                let updated = if full {
                    rhs
                } else {
                    let current = regs[register.as_str()];
                    ctx.terms.slice_assign(current, rhs, *hi, *lo)
                };
                regs.insert(register.clone(), ctx.terms.simplify(updated));
            }
        }
    }

    let scrutinees: Vec<TermId> = state
        .select
        .scrutinees
        .iter()
        .map(|s| {
            let t = compile_expr(s, &regs, ctx);
            ctx.terms.simplify(t)
        })
        .collect();

    branch(parser, &cfg, &state.select, &scrutinees, regs, ctx)
}

/// Emit one successor per feasible arm, in arm order, then the default.
fn branch(
    parser: &Parser,
    cfg: &Cfg,
    select: &Select,
    scrutinees: &[TermId],
    regs: indexmap::IndexMap<String, TermId>,
    ctx: &mut EngineCtx,
) -> Result<Vec<Cfg>, EngineError> {
    let mut matches: Vec<Formula> = Vec::with_capacity(select.arms.len());
    let mut successors = Vec::new();

    let arm_targets: Vec<(Formula, &Target)> = {
        let mut out = Vec::with_capacity(select.arms.len() + 1);
        for arm in &select.arms {
            let mut parts = Vec::with_capacity(arm.patterns.len());
            for (pattern, &scrutinee) in arm.patterns.iter().zip(scrutinees) {
                match pattern {
                    Pattern::Wildcard => {}
                    Pattern::Exact { value, width } => {
                        let constant = ctx.terms.constant(*width, *value);
                        let arena = ctx.terms.read();
                        parts.push(Formula::eq(&arena, scrutinee, constant));
                    }
                }
            }
            let matched = Formula::and(parts);
            let prior = Formula::or(matches.clone());
            matches.push(matched.clone());
            out.push((
                Formula::and2(Formula::not(prior), matched),
                &arm.target,
            ));
        }
        out.push((Formula::not(Formula::or(matches.clone())), &select.default));
        out
    };

    for (guard, target) in arm_targets {
        let pc = Formula::and2(cfg.pc.clone(), guard);
        if pc.is_false() {
            continue;
        }
        if !ctx.is_satisfiable(&pc)? {
            trace!(target = %target, "infeasible arm pruned");
            continue;
        }
        let successor = Cfg {
            ctrl: match target {
                Target::Accept => Ctrl::Accept,
                Target::Reject => Ctrl::Reject,
                Target::State(name) => Ctrl::InState(name.clone()),
            },
            entry_offset: cfg.offset,
            offset: cfg.offset,
            regs: regs.clone(),
            pc,
        };
        match target {
            Target::State(name) if parser.state(name).extract_width == 0 => {
                successors.extend(complete_state(parser, successor, ctx)?);
            }
            _ => successors.push(successor),
        }
    }
    Ok(successors)
}

/// Compile a register-file expression to a term under the current register
/// assignment.
fn compile_expr(
    expr: &Expr,
    regs: &indexmap::IndexMap<String, TermId>,
    ctx: &EngineCtx,
) -> TermId {
    match expr {
        Expr::Reg(name) => *regs
            .get(name)
            .unwrap_or_else(|| panic!("read of unwritten register '{name}' survived validation")),
        Expr::Slice { base, hi, lo } => {
            let base = compile_expr(base, regs, ctx);
            ctx.terms.extract(base, *hi, *lo)
        }
        Expr::Concat { left, right } => {
            let left = compile_expr(left, regs, ctx);
            let right = compile_expr(right, regs, ctx);
            ctx.terms.concat(left, right)
        }
        Expr::Const { value, width } => ctx.terms.constant(*width, *value),
        Expr::Not(base) => {
            let base = compile_expr(base, regs, ctx);
            ctx.terms.not_(base)
        }
        Expr::Bin { op, left, right } => {
            let lhs = compile_expr(left, regs, ctx);
            let rhs = compile_expr(right, regs, ctx);
            match op {
                ExprOp::And => ctx.terms.bin(BinOp::And, lhs, rhs),
                ExprOp::Or => ctx.terms.bin(BinOp::Or, lhs, rhs),
                ExprOp::Xor => ctx.terms.bin(BinOp::Xor, lhs, rhs),
                ExprOp::Shl | ExprOp::Shr => {
                    // Shift semantics are defined by the left operand's
                    // width; widen both sides to a common width, shift
                    // there, and slice the result back. Zero-extension
                    // keeps logical shifts exact.
                    let wl = ctx.terms.width(lhs);
                    let wr = ctx.terms.width(rhs);
                    let wide = wl.max(wr);
                    let lhs_wide = ctx.terms.zext(lhs, wide);
                    let rhs_wide = ctx.terms.zext(rhs, wide);
                    let bin_op = if matches!(op, ExprOp::Shl) {
                        BinOp::Shl
                    } else {
                        BinOp::Shr
                    };
                    let shifted = ctx.terms.bin(bin_op, lhs_wide, rhs_wide);
                    ctx.terms.extract(shifted, wl - 1, 0)
                }
            }
        }
    }
}

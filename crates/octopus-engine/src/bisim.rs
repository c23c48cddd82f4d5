//! The worklist fixed point: naive single-bit stepping and the leaps
//! optimisation share one loop, differing only in stride policy.
//!
//! The relation `R` grows monotonically: every uncovered pair contributes
//! its observable abstraction (state tags, intra-state progress, and the
//! register equalities its joint path condition implies). Coverage of a
//! later pair is discharged per class: the pair's joint path condition
//! must force the class's register equalities. The abstraction ranges over
//! control-state pairs times subsets of register names, so the relation is
//! finite and the loop terminates.

use std::collections::VecDeque;

use indexmap::IndexMap;
use tracing::{debug, info};

use octopus_ir::interp;
use octopus_ir::parser::Parser;
use octopus_smt::formula::Formula;
use octopus_smt::terms::TermId;

use crate::buffer::SymbolicBuffer;
use crate::certificate::{
    render_path_condition, CertClass, Certificate, CertificateMeta, Counterexample,
    EquivalenceOutcome, SideReport,
};
use crate::config::{Ctrl, Pair};
use crate::queries::{EngineCtx, EngineError};
use crate::step;

#[derive(Debug, Clone)]
pub struct BisimOptions {
    /// Take leap-sized strides (minimum of both sides' distance to their
    /// next select) instead of single bits.
    pub leaps: bool,
    /// On an indeterminate answer during a leap-sized expansion, retry the
    /// same pair with single-bit strides. Sound: single-bit queries are
    /// strictly simpler.
    pub fallback_naive_on_unknown: bool,
}

impl Default for BisimOptions {
    fn default() -> Self {
        Self {
            leaps: true,
            fallback_naive_on_unknown: false,
        }
    }
}

/// One entry of the relation under construction.
struct ObservableClass {
    state_left: String,
    state_right: String,
    consumed_left: u32,
    consumed_right: u32,
    register_equalities: Vec<String>,
    path_condition: Formula,
}

/// Decide equivalence of two parsers. Returns the certificate or a
/// counterexample; errors only on solver failure or indeterminacy.
pub fn bisimulate(
    left: &Parser,
    right: &Parser,
    ctx: &mut EngineCtx,
    options: &BisimOptions,
    meta: CertificateMeta,
) -> Result<EquivalenceOutcome, EngineError> {
    info!(
        leaps = options.leaps,
        solvers = ?ctx.solver.solver_names(),
        "starting bisimulation"
    );

    let mut relation: Vec<ObservableClass> = Vec::new();
    let mut worklist: VecDeque<Pair> = VecDeque::new();

    ctx.context = "initial configurations".to_string();
    let left_init = step::initial_configs(left, ctx)?;
    let right_init = step::initial_configs(right, ctx)?;
    for l in &left_init {
        for r in &right_init {
            let pair = Pair {
                left: l.clone(),
                right: r.clone(),
            };
            if ctx.is_satisfiable(&pair.joint_pc())? {
                worklist.push_back(pair);
            }
        }
    }

    let mut explored: u64 = 0;
    while let Some(pair) = worklist.pop_front() {
        ctx.context = pair.describe();
        explored += 1;
        debug!(
            pair = %ctx.context,
            queued = worklist.len(),
            classes = relation.len(),
            "exploring pair"
        );

        match (pair.left.verdict(), pair.right.verdict()) {
            (Some(left_verdict), Some(right_verdict)) => {
                if left_verdict != right_verdict {
                    info!(%left_verdict, %right_verdict, "verdict divergence");
                    let condition = pair.joint_pc();
                    return counterexample(left, right, &pair, condition, ctx, meta.clone());
                }
                if let Some(condition) = observable_divergence(&pair, ctx)? {
                    info!("observable snapshot divergence");
                    return counterexample(left, right, &pair, condition, ctx, meta.clone());
                }
            }
            (Some(_), None) | (None, Some(_)) => {
                // One side has committed on a prefix the other is still
                // reading: divergent by definition.
                info!("prefix commitment divergence");
                let condition = pair.joint_pc();
                return counterexample(left, right, &pair, condition, ctx, meta.clone());
            }
            (None, None) => {
                if covered(&pair, &relation, ctx)? {
                    continue;
                }
                relation.push(make_class(&pair, ctx)?);

                let stride = if options.leaps {
                    pair.left.remaining(left).min(pair.right.remaining(right))
                } else {
                    1
                };
                let successors = match expand(left, right, &pair, stride, ctx) {
                    Err(EngineError::Indeterminate { .. })
                        if options.fallback_naive_on_unknown && stride > 1 =>
                    {
                        debug!("leap indeterminate, retrying pair with single-bit strides");
                        expand(left, right, &pair, 1, ctx)?
                    }
                    other => other?,
                };
                worklist.extend(successors);
            }
        }
    }

    info!(
        classes = relation.len(),
        pairs = explored,
        queries = ctx.query_count(),
        "bisimulation closed"
    );
    let classes = relation
        .into_iter()
        .map(|class| CertClass {
            state_left: class.state_left,
            state_right: class.state_right,
            consumed_left: class.consumed_left,
            consumed_right: class.consumed_right,
            register_equalities: class.register_equalities,
            path_condition: render_path_condition(&ctx.terms, &class.path_condition),
        })
        .collect();
    Ok(EquivalenceOutcome::Equivalent(Certificate {
        verdict: "equivalent".to_string(),
        meta,
        classes,
    }))
}

/// The Cartesian product of both sides' successors under a common stride,
/// keeping only jointly feasible pairs.
fn expand(
    left: &Parser,
    right: &Parser,
    pair: &Pair,
    stride: u32,
    ctx: &mut EngineCtx,
) -> Result<Vec<Pair>, EngineError> {
    let left_successors = step::advance(left, &pair.left, stride, ctx)?;
    let right_successors = step::advance(right, &pair.right, stride, ctx)?;
    let mut out = Vec::new();
    for l in &left_successors {
        for r in &right_successors {
            let candidate = Pair {
                left: l.clone(),
                right: r.clone(),
            };
            let joint = candidate.joint_pc();
            if joint.is_false() {
                continue;
            }
            if ctx.is_satisfiable(&joint)? {
                out.push(candidate);
            }
        }
    }
    Ok(out)
}

/// Is the pair already represented by the relation? A class applies when
/// the control tags and intra-state progress agree and the pair's joint
/// path condition forces the class's register equalities.
fn covered(
    pair: &Pair,
    relation: &[ObservableClass],
    ctx: &mut EngineCtx,
) -> Result<bool, EngineError> {
    let (Ctrl::InState(state_left), Ctrl::InState(state_right)) =
        (&pair.left.ctrl, &pair.right.ctrl)
    else {
        unreachable!("coverage is only checked for running pairs");
    };

    for class in relation {
        if class.state_left != *state_left
            || class.state_right != *state_right
            || class.consumed_left != pair.left.consumed_in_state()
            || class.consumed_right != pair.right.consumed_in_state()
        {
            continue;
        }
        let Some(equalities) = instantiate_equalities(class, pair, ctx) else {
            continue;
        };
        if ctx.implies(&pair.joint_pc(), &equalities)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// A class's register equalities applied to the pair's register terms, or
/// `None` when the pair lacks one of the registers.
fn instantiate_equalities(
    class: &ObservableClass,
    pair: &Pair,
    ctx: &EngineCtx,
) -> Option<Formula> {
    let mut parts = Vec::with_capacity(class.register_equalities.len());
    let arena = ctx.terms.read();
    for name in &class.register_equalities {
        let (Some(&l), Some(&r)) = (pair.left.regs.get(name), pair.right.regs.get(name)) else {
            return None;
        };
        if arena.width(l) != arena.width(r) {
            return None;
        }
        parts.push(Formula::eq(&arena, l, r));
    }
    Some(Formula::and(parts))
}

/// The pair's observable abstraction: the common registers whose equality
/// is implied by the joint path condition.
fn make_class(pair: &Pair, ctx: &mut EngineCtx) -> Result<ObservableClass, EngineError> {
    let (Ctrl::InState(state_left), Ctrl::InState(state_right)) =
        (&pair.left.ctrl, &pair.right.ctrl)
    else {
        unreachable!("classes are only built for running pairs");
    };

    let joint = pair.joint_pc();
    let mut equalities = Vec::new();
    let common: Vec<(String, TermId, TermId)> = pair
        .left
        .regs
        .iter()
        .filter_map(|(name, &l)| {
            pair.right
                .regs
                .get(name)
                .map(|&r| (name.clone(), l, r))
        })
        .collect();
    for (name, l, r) in common {
        if ctx.terms.width(l) != ctx.terms.width(r) {
            continue;
        }
        let equality = {
            let arena = ctx.terms.read();
            Formula::eq(&arena, l, r)
        };
        if equality.is_true() || ctx.implies(&joint, &equality)? {
            equalities.push(name);
        }
    }

    Ok(ObservableClass {
        state_left: state_left.clone(),
        state_right: state_right.clone(),
        consumed_left: pair.left.consumed_in_state(),
        consumed_right: pair.right.consumed_in_state(),
        register_equalities: equalities,
        path_condition: joint,
    })
}

/// The divergence condition for a pair of terminal configurations with
/// matching verdicts, or `None` when the observable snapshots provably
/// agree. A register observable on exactly one side, or observable on both
/// with different widths, diverges structurally on every packet reaching
/// the pair; otherwise divergence is value-level and decided by SMT.
fn observable_divergence(
    pair: &Pair,
    ctx: &mut EngineCtx,
) -> Result<Option<Formula>, EngineError> {
    let left_obs: IndexMap<&str, TermId> = pair.left.observable().collect();
    let right_obs: IndexMap<&str, TermId> = pair.right.observable().collect();

    let structural = left_obs.len() != right_obs.len()
        || left_obs.keys().any(|name| !right_obs.contains_key(name));
    if structural {
        debug!("observable register sets differ");
        return Ok(Some(pair.joint_pc()));
    }

    let mut inequalities = Vec::new();
    {
        let arena = ctx.terms.read();
        for (name, &l) in &left_obs {
            let r = right_obs[name];
            if arena.width(l) != arena.width(r) {
                debug!(register = %name, "observable register widths differ");
                return Ok(Some(pair.joint_pc()));
            }
            let equality = Formula::eq(&arena, l, r);
            if !equality.is_true() {
                inequalities.push(Formula::not(equality));
            }
        }
    }
    if inequalities.is_empty() {
        return Ok(None);
    }

    let condition = Formula::and2(pair.joint_pc(), Formula::or(inequalities));
    if ctx.is_satisfiable(&condition)? {
        Ok(Some(condition))
    } else {
        Ok(None)
    }
}

/// Build the witness: a model of the divergence condition over the packet
/// bits consumed so far, replayed concretely through both parsers.
fn counterexample(
    left: &Parser,
    right: &Parser,
    pair: &Pair,
    condition: Formula,
    ctx: &mut EngineCtx,
    meta: CertificateMeta,
) -> Result<EquivalenceOutcome, EngineError> {
    let offset = pair.offset();
    let vars = ctx.buffer.var_names(offset);
    let model = ctx
        .model(&condition, vars)?
        .unwrap_or_else(|| panic!("divergence condition unexpectedly unsatisfiable"));

    let witness: Vec<bool> = (0..offset)
        .map(|i| {
            model
                .get_bit(&SymbolicBuffer::bit_name(i))
                .unwrap_or(false)
        })
        .collect();
    let witness_bits: String = witness.iter().map(|&b| if b { '1' } else { '0' }).collect();

    let left_outcome = interp::replay(left, &witness);
    let right_outcome = interp::replay(right, &witness);
    if left_outcome == right_outcome {
        // The symbolic engine and the reference interpreter disagree;
        // surface loudly rather than emit a bogus witness silently.
        tracing::warn!(
            witness = %witness_bits,
            "witness replay did not diverge; this is an engine bug"
        );
    }

    info!(witness = %witness_bits, "counterexample found");
    Ok(EquivalenceOutcome::NotEquivalent(Counterexample {
        verdict: "not_equivalent".to_string(),
        meta,
        witness_bits,
        offset,
        left: SideReport::from_outcome(pair.left.ctrl.to_string(), &left_outcome),
        right: SideReport::from_outcome(pair.right.ctrl.to_string(), &right_outcome),
    }))
}

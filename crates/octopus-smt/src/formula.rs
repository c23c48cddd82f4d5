//! Boolean formulas over bit-vector terms.
//!
//! Path conditions and guards are small trees compared to the buffer terms
//! they mention, so formulas are ordinary owned values rather than interned
//! handles. The smart constructors flatten nested connectives and
//! short-circuit on literals, which keeps accumulated path conditions
//! readable in certificates.

use crate::terms::{TermArena, TermId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Formula {
    True,
    False,
    /// Equality of two terms of matching width.
    Eq(TermId, TermId),
    Not(Box<Formula>),
    And(Vec<Formula>),
    Or(Vec<Formula>),
}

impl Formula {
    /// Term equality. Identical handles collapse to `True` immediately: the
    /// arena interns structurally equal terms, so `l == r` is a sound
    /// syntactic proof.
    pub fn eq(arena: &TermArena, lhs: TermId, rhs: TermId) -> Formula {
        assert_eq!(
            arena.width(lhs),
            arena.width(rhs),
            "equality width mismatch"
        );
        if lhs == rhs {
            Formula::True
        } else {
            Formula::Eq(lhs, rhs)
        }
    }

    pub fn not(f: Formula) -> Formula {
        match f {
            Formula::True => Formula::False,
            Formula::False => Formula::True,
            Formula::Not(inner) => *inner,
            other => Formula::Not(Box::new(other)),
        }
    }

    pub fn and(parts: Vec<Formula>) -> Formula {
        let mut out = Vec::with_capacity(parts.len());
        for p in parts {
            match p {
                Formula::True => {}
                Formula::False => return Formula::False,
                Formula::And(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        out.dedup();
        match out.len() {
            0 => Formula::True,
            1 => out.pop().unwrap(),
            _ => Formula::And(out),
        }
    }

    pub fn or(parts: Vec<Formula>) -> Formula {
        let mut out = Vec::with_capacity(parts.len());
        for p in parts {
            match p {
                Formula::False => {}
                Formula::True => return Formula::True,
                Formula::Or(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        out.dedup();
        match out.len() {
            0 => Formula::False,
            1 => out.pop().unwrap(),
            _ => Formula::Or(out),
        }
    }

    pub fn and2(lhs: Formula, rhs: Formula) -> Formula {
        Formula::and(vec![lhs, rhs])
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Formula::True)
    }

    pub fn is_false(&self) -> bool {
        matches!(self, Formula::False)
    }

    /// Evaluate under a concrete assignment, mirroring
    /// [`TermArena::eval`].
    pub fn eval(
        &self,
        arena: &TermArena,
        env: &std::collections::HashMap<String, u128>,
    ) -> bool {
        match self {
            Formula::True => true,
            Formula::False => false,
            Formula::Eq(l, r) => arena.eval(*l, env) == arena.eval(*r, env),
            Formula::Not(inner) => !inner.eval(arena, env),
            Formula::And(parts) => parts.iter().all(|p| p.eval(arena, env)),
            Formula::Or(parts) => parts.iter().any(|p| p.eval(arena, env)),
        }
    }
}

//! SMT-LIB 2 rendering of terms and formulas.
//!
//! Shared by the cvc5 subprocess backend, certificate output, and
//! diagnostics. Bit-vector constants print as `#b…` literals so widths are
//! always explicit.

use crate::formula::Formula;
use crate::terms::{BinOp, TermArena, TermId, TermNode};

/// Print a term as SMT-LIB 2.
pub fn term_to_smtlib(arena: &TermArena, t: TermId) -> String {
    match arena.node(t) {
        TermNode::Const { width, value } => {
            let mut s = String::with_capacity(*width as usize + 2);
            s.push_str("#b");
            for bit in (0..*width).rev() {
                s.push(if (value >> bit) & 1 == 1 { '1' } else { '0' });
            }
            s
        }
        TermNode::Var { name, .. } => name.clone(),
        TermNode::Concat { hi, lo } => format!(
            "(concat {} {})",
            term_to_smtlib(arena, *hi),
            term_to_smtlib(arena, *lo)
        ),
        TermNode::Extract { base, hi, lo } => format!(
            "((_ extract {hi} {lo}) {})",
            term_to_smtlib(arena, *base)
        ),
        TermNode::Not { base } => format!("(bvnot {})", term_to_smtlib(arena, *base)),
        TermNode::Bin { op, lhs, rhs } => {
            let name = match op {
                BinOp::And => "bvand",
                BinOp::Or => "bvor",
                BinOp::Xor => "bvxor",
                BinOp::Shl => "bvshl",
                BinOp::Shr => "bvlshr",
            };
            format!(
                "({name} {} {})",
                term_to_smtlib(arena, *lhs),
                term_to_smtlib(arena, *rhs)
            )
        }
        TermNode::Ite {
            cond,
            then_branch,
            else_branch,
        } => format!(
            "(ite (= {} #b1) {} {})",
            term_to_smtlib(arena, *cond),
            term_to_smtlib(arena, *then_branch),
            term_to_smtlib(arena, *else_branch)
        ),
    }
}

/// Print a formula as SMT-LIB 2.
pub fn formula_to_smtlib(arena: &TermArena, f: &Formula) -> String {
    match f {
        Formula::True => "true".to_string(),
        Formula::False => "false".to_string(),
        Formula::Eq(l, r) => format!(
            "(= {} {})",
            term_to_smtlib(arena, *l),
            term_to_smtlib(arena, *r)
        ),
        Formula::Not(inner) => format!("(not {})", formula_to_smtlib(arena, inner)),
        Formula::And(parts) => connective(arena, "and", parts),
        Formula::Or(parts) => connective(arena, "or", parts),
    }
}

fn connective(arena: &TermArena, name: &str, parts: &[Formula]) -> String {
    match parts.len() {
        0 => (if name == "and" { "true" } else { "false" }).to_string(),
        1 => formula_to_smtlib(arena, &parts[0]),
        _ => {
            let inner: Vec<String> = parts.iter().map(|p| formula_to_smtlib(arena, p)).collect();
            format!("({name} {})", inner.join(" "))
        }
    }
}

/// The sort of a bit-vector variable.
pub fn sort_to_smtlib(width: u32) -> String {
    format!("(_ BitVec {width})")
}

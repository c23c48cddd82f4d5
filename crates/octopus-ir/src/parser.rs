//! The typed parser model.

use indexmap::IndexMap;
use std::fmt;

use crate::LoadError;

/// Every parser begins in the state named `start`.
pub const START_STATE: &str = "start";

/// Registers with this prefix form the observable snapshot; everything else
/// (metadata, scratch) participates in guards and assignments only.
pub const OBSERVABLE_PREFIX: &str = "hdr.";

/// A validated parser: a set of named states plus the register file their
/// statements populate.
#[derive(Debug, Clone)]
pub struct Parser {
    /// States in declaration order. The `start` state is guaranteed present.
    pub states: IndexMap<String, State>,
    /// Register name to declared width, in first-write order.
    pub registers: IndexMap<String, u32>,
}

impl Parser {
    pub fn start(&self) -> &State {
        &self.states[START_STATE]
    }

    pub fn state(&self, name: &str) -> &State {
        self.states
            .get(name)
            .unwrap_or_else(|| panic!("unknown state '{name}' survived validation"))
    }

    pub fn register_width(&self, name: &str) -> u32 {
        *self
            .registers
            .get(name)
            .unwrap_or_else(|| panic!("unknown register '{name}' survived validation"))
    }

    pub fn is_observable(register: &str) -> bool {
        register.starts_with(OBSERVABLE_PREFIX)
    }

    /// Names of the observable registers, in declaration order.
    pub fn observable_registers(&self) -> impl Iterator<Item = &str> {
        self.registers
            .keys()
            .map(String::as_str)
            .filter(|name| Self::is_observable(name))
    }
}

/// One parser state: statements then a terminal `select`.
#[derive(Debug, Clone)]
pub struct State {
    pub name: String,
    pub statements: Vec<Statement>,
    pub select: Select,
    /// Total bits consumed by this state's extracts; cached because both the
    /// step relation and the leap length derive from it.
    pub extract_width: u32,
}

impl State {
    /// Static control-flow successors: each arm's target in arm order,
    /// then the default.
    pub fn successor_targets(&self) -> impl Iterator<Item = &Target> {
        self.select
            .arms
            .iter()
            .map(|arm| &arm.target)
            .chain(std::iter::once(&self.select.default))
    }
}

#[derive(Debug, Clone)]
pub enum Statement {
    /// Consume `width` bits from the input into `register`.
    Extract { register: String, width: u32 },
    /// Overwrite bits `[hi:lo]` of `register` with `value`.
    Assign {
        register: String,
        hi: u32,
        lo: u32,
        value: Expr,
    },
}

/// A terminal transition. Arms are ordered; the first whose pattern tuple
/// matches wins, and `default` applies when none does. Direct transitions
/// and bare `accept`/`reject` are canonicalised at load time into a select
/// with no scrutinees whose default is the target.
#[derive(Debug, Clone)]
pub struct Select {
    pub scrutinees: Vec<Expr>,
    pub arms: Vec<Arm>,
    pub default: Target,
}

impl Select {
    pub fn direct(target: Target) -> Self {
        Self {
            scrutinees: Vec::new(),
            arms: Vec::new(),
            default: target,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Arm {
    pub patterns: Vec<Pattern>,
    pub target: Target,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    Exact { value: u128, width: u32 },
    Wildcard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    State(String),
    Accept,
    Reject,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::State(name) => write!(f, "{name}"),
            Target::Accept => write!(f, "accept"),
            Target::Reject => write!(f, "reject"),
        }
    }
}

/// Register-file expressions: the right-hand sides of assignments and the
/// scrutinees of selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Reg(String),
    Slice {
        base: Box<Expr>,
        hi: u32,
        lo: u32,
    },
    Concat {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Const {
        value: u128,
        width: u32,
    },
    Not(Box<Expr>),
    Bin {
        op: ExprOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprOp {
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

impl Expr {
    /// Infer the expression's width against the register table. Width
    /// inconsistencies are semantic errors surfaced at load time.
    pub fn width(&self, registers: &IndexMap<String, u32>) -> Result<u32, LoadError> {
        match self {
            Expr::Reg(name) => registers
                .get(name)
                .copied()
                .ok_or_else(|| LoadError::Semantic(format!("read of unknown register '{name}'"))),
            Expr::Slice { base, hi, lo } => {
                let base_width = base.width(registers)?;
                if lo > hi || *hi >= base_width {
                    return Err(LoadError::Semantic(format!(
                        "slice [{hi}:{lo}] out of range for width {base_width}"
                    )));
                }
                Ok(hi - lo + 1)
            }
            Expr::Concat { left, right } => {
                Ok(left.width(registers)? + right.width(registers)?)
            }
            Expr::Const { width, .. } => Ok(*width),
            Expr::Not(base) => base.width(registers),
            Expr::Bin { op, left, right } => {
                let wl = left.width(registers)?;
                let wr = right.width(registers)?;
                match op {
                    // Shift amounts are widened or truncated when compiled.
                    ExprOp::Shl | ExprOp::Shr => Ok(wl),
                    _ if wl == wr => Ok(wl),
                    _ => Err(LoadError::Semantic(format!(
                        "width inconsistency in bitwise operation: {wl} vs {wr}"
                    ))),
                }
            }
        }
    }

    /// Registers this expression reads, in evaluation order.
    pub fn reads<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Reg(name) => out.push(name),
            Expr::Slice { base, .. } | Expr::Not(base) => base.reads(out),
            Expr::Concat { left, right } | Expr::Bin { left, right, .. } => {
                left.reads(out);
                right.reads(out);
            }
            Expr::Const { .. } => {}
        }
    }
}

impl fmt::Display for Parser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "parser ({} states)", self.states.len())?;
        for state in self.states.values() {
            writeln!(
                f,
                "  {} ({} bits, {} statements, {} arms)",
                state.name,
                state.extract_width,
                state.statements.len(),
                state.select.arms.len()
            )?;
        }
        write!(f, "  registers:")?;
        for (name, width) in &self.registers {
            write!(f, " {name}:{width}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regs(pairs: &[(&str, u32)]) -> IndexMap<String, u32> {
        pairs
            .iter()
            .map(|(n, w)| (n.to_string(), *w))
            .collect()
    }

    #[test]
    fn width_inference() {
        let registers = regs(&[("hdr.a", 8), ("meta.x", 4)]);
        let e = Expr::Concat {
            left: Box::new(Expr::Reg("hdr.a".into())),
            right: Box::new(Expr::Slice {
                base: Box::new(Expr::Reg("meta.x".into())),
                hi: 2,
                lo: 1,
            }),
        };
        assert_eq!(e.width(&registers).unwrap(), 10);
    }

    #[test]
    fn width_inference_rejects_bad_slice() {
        let registers = regs(&[("hdr.a", 8)]);
        let e = Expr::Slice {
            base: Box::new(Expr::Reg("hdr.a".into())),
            hi: 8,
            lo: 0,
        };
        assert!(matches!(e.width(&registers), Err(LoadError::Semantic(_))));
    }

    #[test]
    fn width_inference_rejects_mismatched_bitwise() {
        let registers = regs(&[("hdr.a", 8), ("meta.x", 4)]);
        let e = Expr::Bin {
            op: ExprOp::Xor,
            left: Box::new(Expr::Reg("hdr.a".into())),
            right: Box::new(Expr::Reg("meta.x".into())),
        };
        assert!(matches!(e.width(&registers), Err(LoadError::Semantic(_))));
    }

    #[test]
    fn reads_collects_registers_in_order() {
        let e = Expr::Bin {
            op: ExprOp::And,
            left: Box::new(Expr::Reg("a".into())),
            right: Box::new(Expr::Not(Box::new(Expr::Reg("b".into())))),
        };
        let mut seen = Vec::new();
        e.reads(&mut seen);
        assert_eq!(seen, vec!["a", "b"]);
    }

    #[test]
    fn observability_is_prefix_based() {
        assert!(Parser::is_observable("hdr.mpls"));
        assert!(!Parser::is_observable("meta.count"));
        assert!(!Parser::is_observable("tmp"));
    }
}

//! Concrete reference interpreter.
//!
//! Runs a validated parser over a literal bit string. This is the ground
//! truth the symbolic engine is checked against: counterexample witnesses
//! are replayed here, and the equivalence tests compare replay outcomes.

use indexmap::IndexMap;

use crate::parser::{Expr, ExprOp, Parser, Pattern, Statement, Target, START_STATE};

/// A concrete register value, most significant bit first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bits(pub Vec<bool>);

impl Bits {
    pub fn width(&self) -> usize {
        self.0.len()
    }

    pub fn from_u128(value: u128, width: u32) -> Self {
        Bits((0..width).rev().map(|i| (value >> i) & 1 == 1).collect())
    }

    /// Numeric value; saturates widths above 128 in practice never occur
    /// for values this is called on (shift amounts).
    fn to_u128_saturating(&self) -> u128 {
        let mut out: u128 = 0;
        for &bit in &self.0 {
            if out >> 127 != 0 {
                return u128::MAX;
            }
            out = (out << 1) | u128::from(bit);
        }
        out
    }

    /// Bits `[hi:lo]`, positions counted from the least significant end.
    fn slice(&self, hi: u32, lo: u32) -> Bits {
        let width = self.width();
        let from = width - 1 - hi as usize;
        let to = width - lo as usize;
        Bits(self.0[from..to].to_vec())
    }
}

impl std::fmt::Display for Bits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for &bit in &self.0 {
            write!(f, "{}", if bit { '1' } else { '0' })?;
        }
        Ok(())
    }
}

/// Result of replaying a parser over a finite input prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Committed to `accept` with this observable snapshot.
    Accept(IndexMap<String, Bits>),
    /// Committed to `reject` with this observable snapshot.
    Reject(IndexMap<String, Bits>),
    /// Ran out of input before committing to a verdict.
    Pending,
}

/// Replay `parser` on `input`. Trailing unconsumed bits are fine; running
/// out of bits mid-parse yields [`Outcome::Pending`].
pub fn replay(parser: &Parser, input: &[bool]) -> Outcome {
    let mut store: IndexMap<String, Bits> = IndexMap::new();
    let mut position = 0usize;
    let mut state = parser.state(START_STATE);

    loop {
        for stmt in &state.statements {
            match stmt {
                Statement::Extract { register, width } => {
                    let width = *width as usize;
                    if position + width > input.len() {
                        return Outcome::Pending;
                    }
                    store.insert(
                        register.clone(),
                        Bits(input[position..position + width].to_vec()),
                    );
                    position += width;
                }
                Statement::Assign {
                    register,
                    hi,
                    lo,
                    value,
                } => {
                    let value = eval(value, &store);
                    let register_width = parser.register_width(register) as usize;
                    let mut current = store
                        .get(register)
                        .cloned()
                        .unwrap_or(Bits(vec![false; register_width]));
                    let from = register_width - 1 - *hi as usize;
                    current.0[from..from + value.width()].copy_from_slice(&value.0);
                    store.insert(register.clone(), current);
                }
            }
        }

        let scrutinees: Vec<Bits> = state
            .select
            .scrutinees
            .iter()
            .map(|s| eval(s, &store))
            .collect();

        let mut target = &state.select.default;
        'arms: for arm in &state.select.arms {
            for (pattern, scrutinee) in arm.patterns.iter().zip(&scrutinees) {
                match pattern {
                    Pattern::Wildcard => {}
                    Pattern::Exact { value, width } => {
                        if *scrutinee != Bits::from_u128(*value, *width) {
                            continue 'arms;
                        }
                    }
                }
            }
            target = &arm.target;
            break;
        }

        match target {
            Target::Accept => return Outcome::Accept(observable(&store)),
            Target::Reject => return Outcome::Reject(observable(&store)),
            Target::State(name) => state = parser.state(name),
        }
    }
}

fn observable(store: &IndexMap<String, Bits>) -> IndexMap<String, Bits> {
    store
        .iter()
        .filter(|(name, _)| Parser::is_observable(name))
        .map(|(name, bits)| (name.clone(), bits.clone()))
        .collect()
}

fn eval(expr: &Expr, store: &IndexMap<String, Bits>) -> Bits {
    match expr {
        Expr::Reg(name) => store
            .get(name)
            .cloned()
            .unwrap_or_else(|| panic!("read of unwritten register '{name}' survived validation")),
        Expr::Slice { base, hi, lo } => eval(base, store).slice(*hi, *lo),
        Expr::Concat { left, right } => {
            let mut bits = eval(left, store).0;
            bits.extend(eval(right, store).0);
            Bits(bits)
        }
        Expr::Const { value, width } => Bits::from_u128(*value, *width),
        Expr::Not(base) => Bits(eval(base, store).0.iter().map(|b| !b).collect()),
        Expr::Bin { op, left, right } => {
            let l = eval(left, store);
            let r = eval(right, store);
            match op {
                ExprOp::And => zip_bits(&l, &r, |a, b| a & b),
                ExprOp::Or => zip_bits(&l, &r, |a, b| a | b),
                ExprOp::Xor => zip_bits(&l, &r, |a, b| a ^ b),
                ExprOp::Shl => shift(&l, r.to_u128_saturating(), true),
                ExprOp::Shr => shift(&l, r.to_u128_saturating(), false),
            }
        }
    }
}

fn zip_bits(l: &Bits, r: &Bits, f: impl Fn(bool, bool) -> bool) -> Bits {
    Bits(l.0.iter().zip(&r.0).map(|(&a, &b)| f(a, b)).collect())
}

fn shift(value: &Bits, amount: u128, left: bool) -> Bits {
    let width = value.width();
    if amount >= width as u128 {
        return Bits(vec![false; width]);
    }
    let amount = amount as usize;
    let mut out = vec![false; width];
    if left {
        out[..width - amount].copy_from_slice(&value.0[amount..]);
    } else {
        out[amount..].copy_from_slice(&value.0[..width - amount]);
    }
    Bits(out)
}

/// Parse a `0`/`1` string into bits; helper for tests and witness replay.
pub fn bits_from_str(s: &str) -> Vec<bool> {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c == '1')
        .collect()
}

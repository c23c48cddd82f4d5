//! Hash-consed bit-vector term algebra.
//!
//! All symbolic bit-vector expressions live in a [`TermArena`]: an
//! append-only interning pool. Construction returns a [`TermId`] handle and
//! structurally identical terms always receive the same id, so term equality
//! is id equality. The arena is never pruned; it is dropped wholesale at the
//! end of a run.
//!
//! Width discipline is a structural invariant: every constructor checks the
//! widths of its operands and panics on a mismatch. Such a panic is a
//! programmer error, never a data-dependent failure; inputs that could
//! produce mismatched widths are rejected during IR validation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard};

/// Handle to an interned term. Compare by `==`; identical handles denote
/// structurally identical terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TermId(u32);

impl TermId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Binary bit-vector operators. Both operands must share the result width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    And,
    Or,
    Xor,
    /// Logical shift left; the shift amount is the unsigned value of the rhs.
    Shl,
    /// Logical shift right.
    Shr,
}

/// One interned term node. `Concat` places `hi` in the most significant
/// position, matching SMT-LIB `concat`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TermNode {
    Const { width: u32, value: u128 },
    Var { name: String, width: u32 },
    Concat { hi: TermId, lo: TermId },
    Extract { base: TermId, hi: u32, lo: u32 },
    Not { base: TermId },
    Bin { op: BinOp, lhs: TermId, rhs: TermId },
    /// `cond` must be 1 bit wide; branches share the result width.
    Ite { cond: TermId, then_branch: TermId, else_branch: TermId },
}

/// Bit mask for the low `width` bits of a `u128`.
pub fn mask(width: u32) -> u128 {
    if width >= 128 {
        u128::MAX
    } else {
        (1u128 << width) - 1
    }
}

/// The append-only interning pool for bit-vector terms.
#[derive(Default)]
pub struct TermArena {
    nodes: Vec<TermNode>,
    widths: Vec<u32>,
    table: HashMap<TermNode, TermId>,
}

impl TermArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct interned terms.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, t: TermId) -> &TermNode {
        &self.nodes[t.index()]
    }

    pub fn width(&self, t: TermId) -> u32 {
        self.widths[t.index()]
    }

    fn intern(&mut self, node: TermNode, width: u32) -> TermId {
        if let Some(&id) = self.table.get(&node) {
            return id;
        }
        let id = TermId(u32::try_from(self.nodes.len()).expect("term arena overflow"));
        self.table.insert(node.clone(), id);
        self.nodes.push(node);
        self.widths.push(width);
        id
    }

    /// A constant of the given width. Constants are capped at 128 bits; the
    /// value is truncated to `width` bits.
    pub fn constant(&mut self, width: u32, value: u128) -> TermId {
        assert!(
            width >= 1 && width <= 128,
            "constant width must be in 1..=128, got {width}"
        );
        let value = value & mask(width);
        self.intern(TermNode::Const { width, value }, width)
    }

    pub fn var(&mut self, name: &str, width: u32) -> TermId {
        assert!(width >= 1, "variable '{name}' must have positive width");
        self.intern(
            TermNode::Var {
                name: name.to_string(),
                width,
            },
            width,
        )
    }

    pub fn concat(&mut self, hi: TermId, lo: TermId) -> TermId {
        let width = self.width(hi) + self.width(lo);
        self.intern(TermNode::Concat { hi, lo }, width)
    }

    /// Concatenate left-to-right: the first element ends up most significant.
    pub fn concat_all(&mut self, parts: &[TermId]) -> TermId {
        assert!(!parts.is_empty(), "concat_all of no terms");
        let mut acc = parts[0];
        for &p in &parts[1..] {
            acc = self.concat(acc, p);
        }
        acc
    }

    pub fn extract(&mut self, base: TermId, hi: u32, lo: u32) -> TermId {
        let w = self.width(base);
        assert!(
            lo <= hi && hi < w,
            "extract [{hi}:{lo}] out of range for width {w}"
        );
        if lo == 0 && hi == w - 1 {
            return base;
        }
        self.intern(TermNode::Extract { base, hi, lo }, hi - lo + 1)
    }

    pub fn not_(&mut self, base: TermId) -> TermId {
        let width = self.width(base);
        self.intern(TermNode::Not { base }, width)
    }

    pub fn bin(&mut self, op: BinOp, lhs: TermId, rhs: TermId) -> TermId {
        let wl = self.width(lhs);
        let wr = self.width(rhs);
        assert_eq!(wl, wr, "width mismatch in {op:?}: {wl} vs {wr}");
        self.intern(TermNode::Bin { op, lhs, rhs }, wl)
    }

    pub fn and_(&mut self, lhs: TermId, rhs: TermId) -> TermId {
        self.bin(BinOp::And, lhs, rhs)
    }

    pub fn or_(&mut self, lhs: TermId, rhs: TermId) -> TermId {
        self.bin(BinOp::Or, lhs, rhs)
    }

    pub fn xor_(&mut self, lhs: TermId, rhs: TermId) -> TermId {
        self.bin(BinOp::Xor, lhs, rhs)
    }

    pub fn ite(&mut self, cond: TermId, then_branch: TermId, else_branch: TermId) -> TermId {
        assert_eq!(self.width(cond), 1, "ite condition must be 1 bit");
        let wt = self.width(then_branch);
        let we = self.width(else_branch);
        assert_eq!(wt, we, "ite branch width mismatch: {wt} vs {we}");
        self.intern(
            TermNode::Ite {
                cond,
                then_branch,
                else_branch,
            },
            wt,
        )
    }

    /// Zero-extend `t` to `width` bits.
    pub fn zext(&mut self, t: TermId, width: u32) -> TermId {
        let w = self.width(t);
        assert!(width >= w, "cannot zero-extend width {w} down to {width}");
        if width == w {
            return t;
        }
        let zeros = self.constant(width - w, 0);
        self.concat(zeros, t)
    }

    /// Overwrite bits `[hi:lo]` of `dst` with `src` (width `hi - lo + 1`),
    /// leaving the remaining bits of `dst` unchanged.
    pub fn slice_assign(&mut self, dst: TermId, src: TermId, hi: u32, lo: u32) -> TermId {
        let wd = self.width(dst);
        assert!(
            lo <= hi && hi < wd,
            "slice_assign [{hi}:{lo}] out of range for width {wd}"
        );
        assert_eq!(
            self.width(src),
            hi - lo + 1,
            "slice_assign source width mismatch"
        );
        let mut acc = src;
        if hi + 1 <= wd - 1 {
            let top = self.extract(dst, wd - 1, hi + 1);
            acc = self.concat(top, acc);
        }
        if lo > 0 {
            let bottom = self.extract(dst, lo - 1, 0);
            acc = self.concat(acc, bottom);
        }
        acc
    }

    /// Sound, idempotent local rewriting: constant folding, concat/extract
    /// cancellation, nested-extract fusion, double negation, and/or
    /// idempotence, and ite short-circuiting on constant conditions. Never
    /// changes the represented function.
    pub fn simplify(&mut self, t: TermId) -> TermId {
        let mut memo = HashMap::new();
        self.simplify_rec(t, &mut memo)
    }

    fn simplify_rec(&mut self, t: TermId, memo: &mut HashMap<TermId, TermId>) -> TermId {
        if let Some(&s) = memo.get(&t) {
            return s;
        }
        let out = match self.node(t).clone() {
            TermNode::Const { .. } | TermNode::Var { .. } => t,
            TermNode::Concat { hi, lo } => {
                let hi = self.simplify_rec(hi, memo);
                let lo = self.simplify_rec(lo, memo);
                self.concat_simplified(hi, lo)
            }
            TermNode::Extract { base, hi, lo } => {
                let base = self.simplify_rec(base, memo);
                self.extract_simplified(base, hi, lo)
            }
            TermNode::Not { base } => {
                let base = self.simplify_rec(base, memo);
                match self.node(base).clone() {
                    TermNode::Not { base: inner } => inner,
                    TermNode::Const { width, value } => self.constant(width, !value),
                    _ => self.not_(base),
                }
            }
            TermNode::Bin { op, lhs, rhs } => {
                let lhs = self.simplify_rec(lhs, memo);
                let rhs = self.simplify_rec(rhs, memo);
                self.bin_simplified(op, lhs, rhs)
            }
            TermNode::Ite {
                cond,
                then_branch,
                else_branch,
            } => {
                let cond = self.simplify_rec(cond, memo);
                let cond_value = match self.node(cond) {
                    TermNode::Const { value, .. } => Some(*value),
                    _ => None,
                };
                if let Some(value) = cond_value {
                    let taken = if value == 1 { then_branch } else { else_branch };
                    self.simplify_rec(taken, memo)
                } else {
                    let then_branch = self.simplify_rec(then_branch, memo);
                    let else_branch = self.simplify_rec(else_branch, memo);
                    if then_branch == else_branch {
                        then_branch
                    } else {
                        self.ite(cond, then_branch, else_branch)
                    }
                }
            }
        };
        memo.insert(t, out);
        out
    }

    fn concat_simplified(&mut self, hi: TermId, lo: TermId) -> TermId {
        match (self.node(hi).clone(), self.node(lo).clone()) {
            (
                TermNode::Const {
                    width: wh,
                    value: vh,
                },
                TermNode::Const {
                    width: wl,
                    value: vl,
                },
            ) if wh + wl <= 128 => self.constant(wh + wl, (vh << wl) | vl),
            // Adjacent slices of the same base fuse back into one slice.
            (
                TermNode::Extract {
                    base: bh,
                    hi: h1,
                    lo: l1,
                },
                TermNode::Extract {
                    base: bl,
                    hi: h2,
                    lo: l2,
                },
            ) if bh == bl && l1 == h2 + 1 => self.extract(bh, h1, l2),
            _ => self.concat(hi, lo),
        }
    }

    fn extract_simplified(&mut self, base: TermId, hi: u32, lo: u32) -> TermId {
        let w = self.width(base);
        if lo == 0 && hi == w - 1 {
            return base;
        }
        match self.node(base).clone() {
            TermNode::Const { value, .. } => self.constant(hi - lo + 1, value >> lo),
            TermNode::Concat { hi: top, lo: bot } => {
                let wb = self.width(bot);
                if hi < wb {
                    self.extract_simplified(bot, hi, lo)
                } else if lo >= wb {
                    self.extract_simplified(top, hi - wb, lo - wb)
                } else {
                    let upper = self.extract_simplified(top, hi - wb, 0);
                    let lower = self.extract_simplified(bot, wb - 1, lo);
                    self.concat_simplified(upper, lower)
                }
            }
            TermNode::Extract {
                base: inner,
                lo: ilo,
                ..
            } => self.extract_simplified(inner, ilo + hi, ilo + lo),
            _ => self.extract(base, hi, lo),
        }
    }

    fn bin_simplified(&mut self, op: BinOp, lhs: TermId, rhs: TermId) -> TermId {
        let width = self.width(lhs);
        let as_const = |arena: &TermArena, t: TermId| match arena.node(t) {
            TermNode::Const { value, .. } => Some(*value),
            _ => None,
        };
        if let (Some(vl), Some(vr)) = (as_const(self, lhs), as_const(self, rhs)) {
            let folded = match op {
                BinOp::And => vl & vr,
                BinOp::Or => vl | vr,
                BinOp::Xor => vl ^ vr,
                BinOp::Shl => {
                    if vr >= u128::from(width) {
                        0
                    } else {
                        vl << vr
                    }
                }
                BinOp::Shr => {
                    if vr >= u128::from(width) {
                        0
                    } else {
                        vl >> vr
                    }
                }
            };
            return self.constant(width, folded);
        }
        if matches!(op, BinOp::And | BinOp::Or) && lhs == rhs {
            return lhs;
        }
        self.bin(op, lhs, rhs)
    }

    /// Evaluate a term under a concrete assignment of its variables. Only
    /// defined for terms up to 128 bits wide; used by tests and witness
    /// replay, where that always holds.
    pub fn eval(&self, t: TermId, env: &HashMap<String, u128>) -> u128 {
        let width = self.width(t);
        assert!(width <= 128, "eval only supports widths up to 128");
        match self.node(t) {
            TermNode::Const { value, .. } => *value,
            TermNode::Var { name, width } => {
                let v = *env
                    .get(name)
                    .unwrap_or_else(|| panic!("eval: unbound variable '{name}'"));
                v & mask(*width)
            }
            TermNode::Concat { hi, lo } => {
                let wl = self.width(*lo);
                (self.eval(*hi, env) << wl) | self.eval(*lo, env)
            }
            TermNode::Extract { base, hi, lo } => {
                (self.eval(*base, env) >> lo) & mask(hi - lo + 1)
            }
            TermNode::Not { base } => !self.eval(*base, env) & mask(width),
            TermNode::Bin { op, lhs, rhs } => {
                let l = self.eval(*lhs, env);
                let r = self.eval(*rhs, env);
                let v = match op {
                    BinOp::And => l & r,
                    BinOp::Or => l | r,
                    BinOp::Xor => l ^ r,
                    BinOp::Shl => {
                        if r >= u128::from(width) {
                            0
                        } else {
                            l << r
                        }
                    }
                    BinOp::Shr => {
                        if r >= u128::from(width) {
                            0
                        } else {
                            l >> r
                        }
                    }
                };
                v & mask(width)
            }
            TermNode::Ite {
                cond,
                then_branch,
                else_branch,
            } => {
                if self.eval(*cond, env) == 1 {
                    self.eval(*then_branch, env)
                } else {
                    self.eval(*else_branch, env)
                }
            }
        }
    }

    /// Compact human-readable rendering, for logs and error context.
    pub fn render(&self, t: TermId) -> String {
        match self.node(t) {
            TermNode::Const { width, value } => format!("{value}#{width}"),
            TermNode::Var { name, .. } => name.clone(),
            TermNode::Concat { hi, lo } => {
                format!("({} ++ {})", self.render(*hi), self.render(*lo))
            }
            TermNode::Extract { base, hi, lo } => {
                format!("{}[{hi}:{lo}]", self.render(*base))
            }
            TermNode::Not { base } => format!("~{}", self.render(*base)),
            TermNode::Bin { op, lhs, rhs } => {
                let sym = match op {
                    BinOp::And => "&",
                    BinOp::Or => "|",
                    BinOp::Xor => "^",
                    BinOp::Shl => "<<",
                    BinOp::Shr => ">>",
                };
                format!("({} {sym} {})", self.render(*lhs), self.render(*rhs))
            }
            TermNode::Ite {
                cond,
                then_branch,
                else_branch,
            } => format!(
                "(ite {} {} {})",
                self.render(*cond),
                self.render(*then_branch),
                self.render(*else_branch)
            ),
        }
    }
}

/// Cheaply clonable, thread-shareable handle to a [`TermArena`].
///
/// Construction happens on the engine thread; portfolio workers only read.
/// The arena is append-only, so readers never observe a torn state.
#[derive(Clone, Default)]
pub struct Terms {
    inner: Arc<RwLock<TermArena>>,
}

impl Terms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, TermArena> {
        self.inner.read().unwrap()
    }

    pub fn constant(&self, width: u32, value: u128) -> TermId {
        self.inner.write().unwrap().constant(width, value)
    }

    pub fn var(&self, name: &str, width: u32) -> TermId {
        self.inner.write().unwrap().var(name, width)
    }

    pub fn concat(&self, hi: TermId, lo: TermId) -> TermId {
        self.inner.write().unwrap().concat(hi, lo)
    }

    pub fn concat_all(&self, parts: &[TermId]) -> TermId {
        self.inner.write().unwrap().concat_all(parts)
    }

    pub fn extract(&self, base: TermId, hi: u32, lo: u32) -> TermId {
        self.inner.write().unwrap().extract(base, hi, lo)
    }

    pub fn not_(&self, base: TermId) -> TermId {
        self.inner.write().unwrap().not_(base)
    }

    pub fn bin(&self, op: BinOp, lhs: TermId, rhs: TermId) -> TermId {
        self.inner.write().unwrap().bin(op, lhs, rhs)
    }

    pub fn ite(&self, cond: TermId, then_branch: TermId, else_branch: TermId) -> TermId {
        self.inner
            .write()
            .unwrap()
            .ite(cond, then_branch, else_branch)
    }

    pub fn zext(&self, t: TermId, width: u32) -> TermId {
        self.inner.write().unwrap().zext(t, width)
    }

    pub fn slice_assign(&self, dst: TermId, src: TermId, hi: u32, lo: u32) -> TermId {
        self.inner.write().unwrap().slice_assign(dst, src, hi, lo)
    }

    pub fn simplify(&self, t: TermId) -> TermId {
        self.inner.write().unwrap().simplify(t)
    }

    pub fn width(&self, t: TermId) -> u32 {
        self.inner.read().unwrap().width(t)
    }

    pub fn eval(&self, t: TermId, env: &HashMap<String, u128>) -> u128 {
        self.inner.read().unwrap().eval(t, env)
    }

    pub fn render(&self, t: TermId) -> String {
        self.inner.read().unwrap().render(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn interning_gives_identical_ids() {
        let mut arena = TermArena::new();
        let a1 = arena.var("a", 8);
        let a2 = arena.var("a", 8);
        assert_eq!(a1, a2);

        let c1 = arena.constant(4, 0b1010);
        let c2 = arena.constant(4, 0b1010);
        assert_eq!(c1, c2);

        let x1 = arena.concat(a1, c1);
        let x2 = arena.concat(a2, c2);
        assert_eq!(x1, x2);
        assert_eq!(arena.width(x1), 12);
    }

    #[test]
    fn distinct_widths_make_distinct_vars() {
        let mut arena = TermArena::new();
        let a8 = arena.var("a", 8);
        let a4 = arena.var("a", 4);
        assert_ne!(a8, a4);
    }

    #[test]
    fn constant_is_truncated_to_width() {
        let mut arena = TermArena::new();
        let c = arena.constant(4, 0xff);
        assert!(matches!(
            arena.node(c),
            TermNode::Const { width: 4, value: 0xf }
        ));
    }

    #[test]
    #[should_panic(expected = "extract")]
    fn extract_out_of_range_panics() {
        let mut arena = TermArena::new();
        let a = arena.var("a", 8);
        arena.extract(a, 8, 0);
    }

    #[test]
    #[should_panic(expected = "width mismatch")]
    fn binop_width_mismatch_panics() {
        let mut arena = TermArena::new();
        let a = arena.var("a", 8);
        let b = arena.var("b", 4);
        arena.and_(a, b);
    }

    #[test]
    fn full_range_extract_is_identity() {
        let mut arena = TermArena::new();
        let a = arena.var("a", 8);
        assert_eq!(arena.extract(a, 7, 0), a);
    }

    #[test]
    fn extract_of_concat_cancels_when_aligned() {
        let mut arena = TermArena::new();
        let a = arena.var("a", 8);
        let b = arena.var("b", 8);
        let ab = arena.concat(a, b);
        let hi = arena.extract(ab, 15, 8);
        let lo = arena.extract(ab, 7, 0);
        assert_eq!(arena.simplify(hi), a);
        assert_eq!(arena.simplify(lo), b);
    }

    #[test]
    fn slicing_a_bit_chain_recovers_the_sub_chain() {
        // The shape the engine produces: a wide field is a left-associated
        // concat of 1-bit packet variables, and an assignment slices out a
        // sub-field. Simplification must recover the identical sub-chain a
        // parser that extracts the fields separately would build.
        let mut arena = TermArena::new();
        let bits: Vec<TermId> = (0..8).map(|i| arena.var(&format!("pkt_{i}"), 1)).collect();
        let whole = arena.concat_all(&bits);
        let upper_direct = arena.concat_all(&bits[0..4]);
        let lower_direct = arena.concat_all(&bits[4..8]);

        let upper_sliced = arena.extract(whole, 7, 4);
        let lower_sliced = arena.extract(whole, 3, 0);
        assert_eq!(arena.simplify(upper_sliced), upper_direct);
        assert_eq!(arena.simplify(lower_sliced), lower_direct);
    }

    #[test]
    fn nested_extract_fuses() {
        let mut arena = TermArena::new();
        let a = arena.var("a", 16);
        let mid = arena.extract(a, 11, 4);
        let inner = arena.extract(mid, 5, 2);
        let fused = arena.extract(a, 9, 6);
        assert_eq!(arena.simplify(inner), fused);
    }

    #[test]
    fn adjacent_extracts_refuse_into_one() {
        let mut arena = TermArena::new();
        let a = arena.var("a", 8);
        let hi = arena.extract(a, 7, 4);
        let lo = arena.extract(a, 3, 0);
        let joined = arena.concat(hi, lo);
        assert_eq!(arena.simplify(joined), a);
    }

    #[test]
    fn double_negation_cancels() {
        let mut arena = TermArena::new();
        let a = arena.var("a", 8);
        let nn = {
            let n = arena.not_(a);
            arena.not_(n)
        };
        assert_eq!(arena.simplify(nn), a);
    }

    #[test]
    fn ite_on_constant_condition_short_circuits() {
        let mut arena = TermArena::new();
        let t = arena.var("t", 8);
        let e = arena.var("e", 8);
        let one = arena.constant(1, 1);
        let zero = arena.constant(1, 0);
        let take_then = arena.ite(one, t, e);
        let take_else = arena.ite(zero, t, e);
        assert_eq!(arena.simplify(take_then), t);
        assert_eq!(arena.simplify(take_else), e);
    }

    #[test]
    fn and_or_idempotence() {
        let mut arena = TermArena::new();
        let a = arena.var("a", 8);
        let aa = arena.and_(a, a);
        let oo = arena.or_(a, a);
        assert_eq!(arena.simplify(aa), a);
        assert_eq!(arena.simplify(oo), a);
    }

    #[test]
    fn constant_folding() {
        let mut arena = TermArena::new();
        let a = arena.constant(8, 0b1100_1010);
        let b = arena.constant(8, 0b1010_1100);
        let anded = arena.and_(a, b);
        let expected = arena.constant(8, 0b1000_1000);
        assert_eq!(arena.simplify(anded), expected);

        let cat = arena.concat(a, b);
        let cat_const = arena.constant(16, 0b1100_1010_1010_1100);
        assert_eq!(arena.simplify(cat), cat_const);
    }

    #[test]
    fn slice_assign_rebuilds_the_register() {
        let mut arena = TermArena::new();
        let dst = arena.var("r", 8);
        let src = arena.var("s", 4);
        let out = arena.slice_assign(dst, src, 5, 2);
        assert_eq!(arena.width(out), 8);

        let env: HashMap<String, u128> =
            [("r".to_string(), 0b1111_1111), ("s".to_string(), 0b0000)]
                .into_iter()
                .collect();
        assert_eq!(arena.eval(out, &env), 0b1100_0011);
    }

    #[test]
    fn eval_shifts_saturate_at_width() {
        let mut arena = TermArena::new();
        let a = arena.constant(8, 0xaa);
        let big = arena.constant(8, 9);
        let shl = arena.bin(BinOp::Shl, a, big);
        let shr = arena.bin(BinOp::Shr, a, big);
        let env = HashMap::new();
        assert_eq!(arena.eval(shl, &env), 0);
        assert_eq!(arena.eval(shr, &env), 0);
    }

    // Shape of a random 8-bit term over the variables a and b.
    #[derive(Debug, Clone)]
    enum Shape {
        A,
        B,
        Const(u8),
        Not(Box<Shape>),
        Bin(BinOp, Box<Shape>, Box<Shape>),
        SliceCat(Box<Shape>),
        Ite(Box<Shape>, Box<Shape>, Box<Shape>),
    }

    fn shape_strategy() -> impl Strategy<Value = Shape> {
        let leaf = prop_oneof![
            Just(Shape::A),
            Just(Shape::B),
            any::<u8>().prop_map(Shape::Const),
        ];
        leaf.prop_recursive(4, 32, 3, |inner| {
            prop_oneof![
                inner.clone().prop_map(|s| Shape::Not(Box::new(s))),
                (
                    prop_oneof![
                        Just(BinOp::And),
                        Just(BinOp::Or),
                        Just(BinOp::Xor),
                        Just(BinOp::Shl),
                        Just(BinOp::Shr)
                    ],
                    inner.clone(),
                    inner.clone()
                )
                    .prop_map(|(op, l, r)| Shape::Bin(op, Box::new(l), Box::new(r))),
                inner.clone().prop_map(|s| Shape::SliceCat(Box::new(s))),
                (inner.clone(), inner.clone(), inner)
                    .prop_map(|(c, t, e)| Shape::Ite(Box::new(c), Box::new(t), Box::new(e))),
            ]
        })
    }

    fn build(arena: &mut TermArena, shape: &Shape) -> TermId {
        match shape {
            Shape::A => arena.var("a", 8),
            Shape::B => arena.var("b", 8),
            Shape::Const(v) => arena.constant(8, u128::from(*v)),
            Shape::Not(s) => {
                let t = build(arena, s);
                arena.not_(t)
            }
            Shape::Bin(op, l, r) => {
                let lt = build(arena, l);
                let rt = build(arena, r);
                arena.bin(*op, lt, rt)
            }
            Shape::SliceCat(s) => {
                // Split into nibbles and reassemble; a function-preserving
                // shape that exercises the concat/extract rewrites.
                let t = build(arena, s);
                let hi = arena.extract(t, 7, 4);
                let lo = arena.extract(t, 3, 0);
                arena.concat(hi, lo)
            }
            Shape::Ite(c, t, e) => {
                let ct = build(arena, c);
                let cbit = arena.extract(ct, 0, 0);
                let tt = build(arena, t);
                let et = build(arena, e);
                arena.ite(cbit, tt, et)
            }
        }
    }

    proptest! {
        #[test]
        fn simplify_preserves_eval(shape in shape_strategy(), a: u8, b: u8) {
            let mut arena = TermArena::new();
            let t = build(&mut arena, &shape);
            let s = arena.simplify(t);
            let env: HashMap<String, u128> =
                [("a".to_string(), u128::from(a)), ("b".to_string(), u128::from(b))]
                    .into_iter()
                    .collect();
            prop_assert_eq!(arena.eval(t, &env), arena.eval(s, &env));
        }

        #[test]
        fn simplify_is_idempotent(shape in shape_strategy()) {
            let mut arena = TermArena::new();
            let t = build(&mut arena, &shape);
            let once = arena.simplify(t);
            let twice = arena.simplify(once);
            prop_assert_eq!(once, twice);
        }
    }
}

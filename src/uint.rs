//! Bounded unsigned integers as little-endian bit vectors.
//!
//! A [`UInt`] is a plain value: its bits are expressions over model
//! variables and every operation returns a new integer. Operations that need
//! auxiliary variables (adders, comparators between two integers) live on
//! [`Model`]; pure reindexing (shifts, masking by a boolean) lives on `UInt`.

use crate::error::{Error, Result};
use crate::expr::Expr;
use crate::formula::Literal;
use crate::linear::Cmp;
use crate::model::Model;
use log::trace;

/// Number of bits needed to write `ub` in binary; 0 for 0.
pub(crate) fn bit_length(ub: u64) -> usize {
    (u64::BITS - ub.leading_zeros()) as usize
}

/// Clauses forbidding every value above `k`, one per zero bit of `k` within
/// `bits`: that bit set together with every higher one-bit of `k` already
/// matched would exceed `k`.
fn at_most_clauses<T: Clone>(bits: &[T], k: u64, negate: impl Fn(&T) -> T) -> Vec<Vec<T>> {
    (0..bits.len())
        .filter(|&i| k >> i & 1 == 0)
        .map(|i| {
            std::iter::once(negate(&bits[i]))
                .chain((i + 1..bits.len()).filter(|&j| k >> j & 1 == 1).map(|j| negate(&bits[j])))
                .collect()
        })
        .collect()
}

/// A non-negative integer no larger than its bound. Bit 0 comes first and the
/// width is exactly the bit length of the bound. A bound of `u64::MAX` means the
/// value has saturated and arithmetic on it wraps.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct UInt {
    bits: Vec<Expr>,
    ub: u64,
}

impl UInt {
    pub fn constant(value: u64) -> UInt {
        UInt {
            bits: (0..bit_length(value)).map(|i| Expr::constant(value >> i & 1 == 1)).collect(),
            ub: value,
        }
    }

    /// 1 when `b` holds, 0 otherwise.
    pub fn from_bool(b: Expr) -> UInt {
        match b.as_constant() {
            Some(value) => UInt::constant(value as u64),
            None => UInt { bits: vec![b], ub: 1 },
        }
    }

    /// Wraps raw bits, least significant first. The bound is the largest value
    /// they can spell, so no clause is needed to enforce it.
    pub fn from_bits(bits: Vec<Expr>) -> Result<UInt> {
        if bits.len() > 64 {
            return Err(Error::InvalidOperation("a UInt holds at most 64 bits"));
        }
        let ub = if bits.len() == 64 { u64::MAX } else { (1 << bits.len()) - 1 };
        Ok(UInt { bits, ub })
    }

    pub fn bits(&self) -> &[Expr] {
        &self.bits
    }

    pub fn width(&self) -> usize {
        self.bits.len()
    }

    pub fn ub(&self) -> u64 {
        self.ub
    }

    pub fn is_unbounded(&self) -> bool {
        self.ub == u64::MAX
    }

    /// Bit `i`, which is `false` past the width.
    pub fn bit(&self, i: usize) -> Expr {
        self.bits.get(i).cloned().unwrap_or(Expr::False)
    }

    /// The value, if every bit is a constant.
    pub fn as_constant(&self) -> Option<u64> {
        self.bits.iter().enumerate().try_fold(0, |acc, (i, b)| {
            b.as_constant().map(|set| acc | (set as u64) << i)
        })
    }

    /// `self` when `b` holds, 0 otherwise.
    pub fn mul_bool(&self, b: &Expr) -> UInt {
        match b.as_constant() {
            Some(false) => UInt::constant(0),
            Some(true) => self.clone(),
            None => UInt {
                bits: self.bits.iter().map(|x| x & b).collect(),
                ub: self.ub,
            },
        }
    }

    pub fn shl(&self, n: usize) -> UInt {
        if self.ub == 0 {
            return self.clone();
        }
        let mut bits = vec![Expr::False; n];
        bits.extend(self.bits.iter().cloned());
        let ub = if n <= self.ub.leading_zeros() as usize {
            self.ub << n
        } else {
            bits.truncate(64);
            u64::MAX
        };
        UInt { bits, ub }
    }

    pub fn shr(&self, n: usize) -> UInt {
        UInt {
            bits: self.bits.iter().skip(n).cloned().collect(),
            ub: if n >= 64 { 0 } else { self.ub >> n },
        }
    }

    /// Bitwise and.
    pub fn and(&self, other: &UInt) -> UInt {
        UInt {
            bits: self.bits.iter().zip(&other.bits).map(|(a, b)| a & b).collect(),
            ub: self.ub.min(other.ub),
        }
    }

    /// Bitwise or.
    pub fn or(&self, other: &UInt) -> UInt {
        let width = self.width().max(other.width());
        let full = if width == 64 { u64::MAX } else { (1 << width) - 1 };
        UInt {
            bits: (0..width).map(|i| self.bit(i) | other.bit(i)).collect(),
            ub: self.ub.saturating_add(other.ub).min(full),
        }
    }

    /// `self <= k`. Clausal whenever the bits are literals.
    pub fn le_const(&self, k: u64) -> Expr {
        if k >= self.ub {
            return Expr::True;
        }
        Expr::and(at_most_clauses(&self.bits, k, Expr::negate).into_iter().map(Expr::or))
    }

    pub fn lt_const(&self, k: u64) -> Expr {
        match k {
            0 => Expr::False,
            k => self.le_const(k - 1),
        }
    }

    /// `self >= k`: for every one-bit of `k`, either that bit is set or some
    /// higher bit where `k` is zero is.
    pub fn ge_const(&self, k: u64) -> Expr {
        if k == 0 {
            return Expr::True;
        }
        if k > self.ub {
            return Expr::False;
        }
        let width = self.width();
        Expr::and((0..bit_length(k)).filter(|&i| k >> i & 1 == 1).map(|i| {
            Expr::or(
                std::iter::once(self.bit(i))
                    .chain((i + 1..width).filter(|&j| k >> j & 1 == 0).map(|j| self.bit(j))),
            )
        }))
    }

    pub fn gt_const(&self, k: u64) -> Expr {
        match k.checked_add(1) {
            Some(k) => self.ge_const(k),
            None => Expr::False,
        }
    }

    pub fn eq_const(&self, k: u64) -> Expr {
        if k > self.ub {
            return Expr::False;
        }
        Expr::and(
            self.bits
                .iter()
                .enumerate()
                .map(|(i, b)| if k >> i & 1 == 1 { b.clone() } else { !b }),
        )
    }

    pub fn ne_const(&self, k: u64) -> Expr {
        !self.eq_const(k)
    }

    pub fn cmp_const(&self, cmp: Cmp, k: u64) -> Expr {
        match cmp {
            Cmp::Eq => self.eq_const(k),
            Cmp::Ne => self.ne_const(k),
            Cmp::Le => self.le_const(k),
            Cmp::Lt => self.lt_const(k),
            Cmp::Ge => self.ge_const(k),
            Cmp::Gt => self.gt_const(k),
        }
    }
}

impl Model {
    /// A fresh integer in `0..=ub`. Unless `ub` is one less than a power of
    /// two, clauses excluding the values above it are added.
    pub fn new_uint(&mut self, ub: u64) -> UInt {
        let x = self.new_uint_unchecked(ub);
        if ub & ub.wrapping_add(1) != 0 {
            let bits: Vec<Literal> = x.bits.iter().filter_map(Expr::as_literal).collect();
            for clause in at_most_clauses(&bits, ub, Literal::negated) {
                self.add_clause(clause);
            }
        }
        x
    }

    /// A fresh integer of `ub`'s width, without the clauses enforcing `ub`.
    /// Callers must otherwise guarantee the value stays within the bound.
    pub fn new_uint_unchecked(&mut self, ub: u64) -> UInt {
        UInt {
            bits: self.new_vars(bit_length(ub)),
            ub,
        }
    }

    pub fn uint_value(&self, x: &UInt) -> u64 {
        x.bits
            .iter()
            .enumerate()
            .fold(0, |acc, (i, b)| acc | (self.value(b) as u64) << i)
    }

    fn xor2(&mut self, a: Literal, b: Literal) -> Literal {
        let key = Expr::Lit(a).xor(&Expr::Lit(b));
        if let Some(l) = self.cached(&key) {
            return l;
        }
        let z = self.new_variable().positive();
        self.add_clause(vec![!a, !b, !z]);
        self.add_clause(vec![a, b, !z]);
        self.add_clause(vec![!a, b, z]);
        self.add_clause(vec![a, !b, z]);
        self.remember(key, z);
        z
    }

    /// Sum and carry bits of `a + b + c`.
    fn full_adder(&mut self, a: &Expr, b: &Expr, c: &Expr) -> (Expr, Expr) {
        let inputs = [self.flatten(a), self.flatten(b), self.flatten(c)];
        // two equal inputs carry on their own; complementary ones add exactly 1
        for (i, j, k) in [(0, 1, 2), (0, 2, 1), (1, 2, 0)] {
            if inputs[i] == inputs[j] {
                return (inputs[k].clone(), inputs[i].clone());
            }
            if inputs[i] == !&inputs[j] {
                return (!&inputs[k], inputs[k].clone());
            }
        }

        // at most one input is constant now
        let carry_in = inputs.iter().any(|e| e == &Expr::True);
        let literals: Vec<Literal> = inputs.iter().filter_map(Expr::as_literal).collect();
        match literals[..] {
            [x, y] => {
                let sum = Expr::Lit(self.xor2(x, y));
                let (x, y) = (Expr::Lit(x), Expr::Lit(y));
                if carry_in {
                    (!sum, self.flatten(&(x | y)))
                } else {
                    (sum, self.flatten(&(x & y)))
                }
            }
            [x, y, z] => {
                let sum = self.new_variable().positive();
                for bits in 0..8u32 {
                    let odd = bits.count_ones() % 2 == 1;
                    let clause: Vec<Literal> = [x, y, z]
                        .iter()
                        .enumerate()
                        .map(|(i, l)| if bits >> i & 1 == 1 { !*l } else { *l })
                        .chain(Some(if odd { sum } else { !sum }))
                        .collect();
                    self.add_clause(clause);
                }
                let carry = self.new_variable().positive();
                for (p, q) in [(x, y), (x, z), (y, z)] {
                    self.add_clause(vec![!p, !q, carry]);
                    self.add_clause(vec![p, q, !carry]);
                }
                if self.config.arith_arc_consistency {
                    self.add_clause(vec![!x, sum, carry]);
                    self.add_clause(vec![!y, sum, carry]);
                }
                (Expr::Lit(sum), Expr::Lit(carry))
            }
            _ => unreachable!("constant inputs were folded above"),
        }
    }

    /// `a + b` with a ripple-carry adder. The bound is the sum of the bounds,
    /// saturating at `u64::MAX`, in which case the result wraps.
    pub fn uint_add(&mut self, a: &UInt, b: &UInt) -> UInt {
        let (ub, width) = match a.ub.checked_add(b.ub) {
            Some(ub) => (ub, bit_length(ub)),
            None => (u64::MAX, 64),
        };
        trace!("adding {}-bit and {}-bit integers into {} bits", a.width(), b.width(), width);
        let mut carry = Expr::False;
        let mut bits = Vec::with_capacity(width);
        for i in 0..width {
            let (sum, next) = self.full_adder(&a.bit(i), &b.bit(i), &carry);
            bits.push(sum);
            carry = next;
        }
        UInt { bits, ub }
    }

    pub fn uint_add_bool(&mut self, a: &UInt, b: &Expr) -> UInt {
        self.uint_add(a, &UInt::from_bool(b.clone()))
    }

    /// Sum of `values`, added pairwise as a balanced tree. 0 when empty.
    pub fn uint_sum(&mut self, values: &[UInt]) -> UInt {
        let mut layer = values.to_vec();
        if layer.is_empty() {
            return UInt::constant(0);
        }
        while layer.len() > 1 {
            layer = layer
                .chunks(2)
                .map(|pair| match pair {
                    [a, b] => self.uint_add(a, b),
                    [a] => a.clone(),
                    _ => unreachable!(),
                })
                .collect();
        }
        layer.swap_remove(0)
    }

    /// Number of `literals` that hold.
    pub fn uint_count(&mut self, literals: &[Expr]) -> UInt {
        let ones: Vec<UInt> = literals.iter().map(|l| UInt::from_bool(l.clone())).collect();
        self.uint_sum(&ones)
    }

    pub fn uint_mul_const(&mut self, a: &UInt, k: u64) -> UInt {
        let shifted: Vec<UInt> = (0..64).filter(|&i| k >> i & 1 == 1).map(|i| a.shl(i)).collect();
        self.uint_sum(&shifted)
    }

    /// Shift-and-add multiplication.
    pub fn uint_mul(&mut self, a: &UInt, b: &UInt) -> UInt {
        if let Some(k) = b.as_constant() {
            return self.uint_mul_const(a, k);
        }
        if let Some(k) = a.as_constant() {
            return self.uint_mul_const(b, k);
        }
        let partial: Vec<UInt> = b.bits.iter().enumerate().map(|(i, bit)| a.mul_bool(bit).shl(i)).collect();
        self.uint_sum(&partial)
    }

    /// `a - b`. Permanently constrains `a >= b`.
    pub fn uint_sub(&mut self, a: &UInt, b: &UInt) -> Result<UInt> {
        if let (Some(x), Some(y)) = (a.as_constant(), b.as_constant()) {
            if let Some(d) = x.checked_sub(y) {
                return Ok(UInt::constant(d));
            }
        }
        // with the difference held to `a.ub`, `difference + b` fits the adder
        // width and cannot wrap back onto `a`
        if a.ub.checked_add(b.ub).is_none() {
            return Err(Error::InvalidOperation("subtraction of integers with saturated bounds"));
        }
        let difference = self.new_uint(a.ub);
        let total = self.uint_add(&difference, b);
        let balanced = self.uint_eq(&total, a);
        self.add_constr(&balanced)?;
        Ok(difference)
    }

    /// Bitwise `if c { a } else { b }`.
    pub fn uint_ite(&mut self, c: &Expr, a: &UInt, b: &UInt) -> UInt {
        match c.as_constant() {
            Some(true) => return a.clone(),
            Some(false) => return b.clone(),
            None => {}
        }
        let width = a.width().max(b.width());
        UInt {
            bits: (0..width).map(|i| self.ite(c, &a.bit(i), &b.bit(i))).collect(),
            ub: a.ub.max(b.ub),
        }
    }

    pub fn uint_max(&mut self, values: &[UInt]) -> Result<UInt> {
        let (first, rest) = values.split_first().ok_or(Error::EmptyOperands("uint_max"))?;
        Ok(rest.iter().fold(first.clone(), |best, x| {
            let greater = self.uint_gt(x, &best);
            self.uint_ite(&greater, x, &best)
        }))
    }

    pub fn uint_min(&mut self, values: &[UInt]) -> Result<UInt> {
        let (first, rest) = values.split_first().ok_or(Error::EmptyOperands("uint_min"))?;
        Ok(rest.iter().fold(first.clone(), |best, x| {
            let smaller = self.uint_lt(x, &best);
            self.uint_ite(&smaller, x, &best)
        }))
    }

    /// `a > b`, compared from the most significant bit down: some bit is set in
    /// `a` and clear in `b` while every higher bit agrees.
    pub fn uint_gt(&mut self, a: &UInt, b: &UInt) -> Expr {
        if let Some(k) = b.as_constant() {
            return a.gt_const(k);
        }
        if let Some(k) = a.as_constant() {
            return b.lt_const(k);
        }
        let width = a.width().max(b.width());
        let mut higher_equal = Expr::True;
        let mut cases = Vec::with_capacity(width);
        for i in (0..width).rev() {
            let x = self.flatten(&a.bit(i));
            let y = self.flatten(&b.bit(i));
            let here = Expr::and(vec![higher_equal.clone(), x.clone(), !&y]);
            cases.push(self.flatten(&here));
            if i > 0 {
                higher_equal = self.flatten(&(higher_equal & x.iff(&y)));
            }
        }
        Expr::or(cases)
    }

    pub fn uint_lt(&mut self, a: &UInt, b: &UInt) -> Expr {
        self.uint_gt(b, a)
    }

    pub fn uint_ge(&mut self, a: &UInt, b: &UInt) -> Expr {
        match (a.as_constant(), b.as_constant()) {
            (_, Some(k)) => a.ge_const(k),
            (Some(k), None) => b.le_const(k),
            (None, None) => !self.uint_gt(b, a),
        }
    }

    pub fn uint_le(&mut self, a: &UInt, b: &UInt) -> Expr {
        self.uint_ge(b, a)
    }

    pub fn uint_eq(&mut self, a: &UInt, b: &UInt) -> Expr {
        if let Some(k) = b.as_constant() {
            return a.eq_const(k);
        }
        if let Some(k) = a.as_constant() {
            return b.eq_const(k);
        }
        let width = a.width().max(b.width());
        let agree: Vec<Expr> = (0..width)
            .map(|i| {
                let same = a.bit(i).iff(&b.bit(i));
                self.flatten(&same)
            })
            .collect();
        Expr::and(agree)
    }

    pub fn uint_ne(&mut self, a: &UInt, b: &UInt) -> Expr {
        match (a.as_constant(), b.as_constant()) {
            (_, Some(k)) => a.ne_const(k),
            (Some(k), None) => b.ne_const(k),
            (None, None) => !self.uint_eq(a, b),
        }
    }

    pub fn uint_cmp(&mut self, a: &UInt, cmp: Cmp, b: &UInt) -> Expr {
        match cmp {
            Cmp::Eq => self.uint_eq(a, b),
            Cmp::Ne => self.uint_ne(a, b),
            Cmp::Le => self.uint_le(a, b),
            Cmp::Lt => self.uint_lt(a, b),
            Cmp::Ge => self.uint_ge(a, b),
            Cmp::Gt => self.uint_gt(a, b),
        }
    }
}

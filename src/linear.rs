//! Integer-weighted sums of literals and their comparisons.
//!
//! A comparison is first normalized to `S cmp t` where `S` is a sum of
//! literals with positive weights. Targets below
//! [`Config::counter_threshold`](crate::Config) are compiled with a weighted
//! sequential counter whose outputs `S >= j` are reused (and grown) across
//! comparisons on the same expression. Larger targets go through binary
//! adders: literals are grouped by weight, each group is counted, scaled and
//! summed into a [`UInt`].

use crate::error::{Error, Result};
use crate::expr::Expr;
use crate::formula::Variable;
use crate::model::Model;
use crate::uint::UInt;
use log::debug;
use std::collections::BTreeMap;
use std::ops::{Add, Mul, Neg, Sub};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Cmp {
    Eq,
    Ne,
    Le,
    Lt,
    Ge,
    Gt,
}

impl Cmp {
    pub fn holds(self, lhs: i64, rhs: i64) -> bool {
        match self {
            Cmp::Eq => lhs == rhs,
            Cmp::Ne => lhs != rhs,
            Cmp::Le => lhs <= rhs,
            Cmp::Lt => lhs < rhs,
            Cmp::Ge => lhs >= rhs,
            Cmp::Gt => lhs > rhs,
        }
    }
}

/// Encodings built for one expression, valid until the model restores a snapshot.
#[derive(Clone, Debug)]
struct Encoded {
    epoch: u64,
    // counter[i][j - 1] holds iff the first i + 1 terms reach j
    counter: Vec<Vec<Expr>>,
    uint: Option<UInt>,
}

/// `offset + sum(weight * variable)`. Zero weights are never stored.
#[derive(Clone, Debug, Default)]
pub struct LinExpr {
    terms: BTreeMap<Variable, i64>,
    offset: i64,
    encoded: Option<Encoded>,
}

impl PartialEq for LinExpr {
    fn eq(&self, other: &Self) -> bool {
        self.terms == other.terms && self.offset == other.offset
    }
}

impl Eq for LinExpr {}

impl LinExpr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn constant(offset: i64) -> Self {
        LinExpr {
            offset,
            ..Default::default()
        }
    }

    /// Builds `sum(weight * term)` from literal or constant terms.
    pub fn weighted<'a, I: IntoIterator<Item = (&'a Expr, i64)>>(terms: I) -> Result<Self> {
        let mut lin = LinExpr::new();
        for (e, w) in terms {
            lin.add_term(e, w)?;
        }
        Ok(lin)
    }

    /// Number of `terms` that hold.
    pub fn count<'a, I: IntoIterator<Item = &'a Expr>>(terms: I) -> Result<Self> {
        Self::weighted(terms.into_iter().map(|e| (e, 1)))
    }

    /// Adds `weight * e`. A negative literal is stored as `weight - weight * x`.
    pub fn add_term(&mut self, e: &Expr, weight: i64) -> Result<()> {
        match e {
            Expr::True => self.offset += weight,
            Expr::False => {}
            Expr::Lit(l) => {
                let w = if l.is_positive() {
                    weight
                } else {
                    self.offset += weight;
                    -weight
                };
                let entry = self.terms.entry(*l.variable()).or_insert(0);
                *entry += w;
                if *entry == 0 {
                    self.terms.remove(l.variable());
                }
            }
            _ => return Err(Error::NotLiteral(e.to_string())),
        }
        self.encoded = None;
        Ok(())
    }

    pub fn add_constant(&mut self, c: i64) {
        self.offset += c;
        self.encoded = None;
    }

    pub fn terms(&self) -> impl Iterator<Item = (Variable, i64)> + '_ {
        self.terms.iter().map(|(v, w)| (*v, *w))
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn is_constant(&self) -> bool {
        self.terms.is_empty()
    }

    /// Rewrites `w * x` with `w < 0` as `w + |w| * !x`, so every weight is
    /// positive. Returns the terms and the adjusted offset.
    fn normalized(&self) -> (Vec<(Expr, i64)>, i64) {
        let mut offset = self.offset;
        let terms = self
            .terms
            .iter()
            .map(|(v, &w)| {
                if w > 0 {
                    (Expr::var(*v), w)
                } else {
                    offset += w;
                    (Expr::Lit(v.negative()), -w)
                }
            })
            .collect();
        (terms, offset)
    }

    fn encoded(&mut self, epoch: u64) -> &mut Encoded {
        if self.encoded.as_ref().map_or(false, |e| e.epoch != epoch) {
            self.encoded = None;
        }
        self.encoded.get_or_insert_with(|| Encoded {
            epoch,
            counter: vec![],
            uint: None,
        })
    }
}

impl Add for LinExpr {
    type Output = LinExpr;

    fn add(mut self, rhs: LinExpr) -> LinExpr {
        for (v, w) in rhs.terms {
            let entry = self.terms.entry(v).or_insert(0);
            *entry += w;
            if *entry == 0 {
                self.terms.remove(&v);
            }
        }
        self.offset += rhs.offset;
        self.encoded = None;
        self
    }
}

impl Neg for LinExpr {
    type Output = LinExpr;

    fn neg(self) -> LinExpr {
        self * -1
    }
}

impl Sub for LinExpr {
    type Output = LinExpr;

    fn sub(self, rhs: LinExpr) -> LinExpr {
        self + -rhs
    }
}

impl Mul<i64> for LinExpr {
    type Output = LinExpr;

    fn mul(mut self, k: i64) -> LinExpr {
        if k == 0 {
            return LinExpr::new();
        }
        for w in self.terms.values_mut() {
            *w *= k;
        }
        self.offset *= k;
        self.encoded = None;
        self
    }
}

/// `S cmp t` decided from `S` ranging over `0..=total`, if it does not depend on `S`.
fn decided(cmp: Cmp, t: i64, total: i64) -> Option<bool> {
    if total == 0 {
        return Some(cmp.holds(0, t));
    }
    match cmp {
        Cmp::Ge if t <= 0 => Some(true),
        Cmp::Ge if t > total => Some(false),
        Cmp::Gt if t < 0 => Some(true),
        Cmp::Gt if t >= total => Some(false),
        Cmp::Le if t >= total => Some(true),
        Cmp::Le if t < 0 => Some(false),
        Cmp::Lt if t > total => Some(true),
        Cmp::Lt if t <= 0 => Some(false),
        Cmp::Eq | Cmp::Ne if t < 0 || t > total => Some(cmp == Cmp::Ne),
        _ => None,
    }
}

impl Model {
    /// `lin cmp rhs` as an expression over the literals of `lin` and the
    /// auxiliary variables of its encoding. `lin` keeps the encoding for
    /// later comparisons.
    pub fn compare(&mut self, lin: &mut LinExpr, cmp: Cmp, rhs: i64) -> Expr {
        let (terms, offset) = lin.normalized();
        let total = terms.iter().fold(0i64, |acc, (_, w)| acc.saturating_add(*w));
        let t = rhs.saturating_sub(offset);
        if let Some(value) = decided(cmp, t, total) {
            return Expr::constant(value);
        }

        if t < self.config.counter_threshold {
            let at_least = |m: &mut Model, lin: &mut LinExpr, j: i64| m.at_least(lin, &terms, total, j);
            match cmp {
                Cmp::Ge => at_least(self, lin, t),
                Cmp::Gt => at_least(self, lin, t + 1),
                Cmp::Le => !at_least(self, lin, t + 1),
                Cmp::Lt => !at_least(self, lin, t),
                Cmp::Eq | Cmp::Ne => {
                    let reached = at_least(self, lin, t);
                    let passed = at_least(self, lin, t + 1);
                    let eq = reached & !passed;
                    if cmp == Cmp::Eq {
                        eq
                    } else {
                        !eq
                    }
                }
            }
        } else {
            let sum = self.sum_as_uint(lin, &terms);
            sum.cmp_const(cmp, t as u64)
        }
    }

    /// `a cmp b`, compiled as `a - b cmp 0`.
    pub fn compare_lin(&mut self, a: &LinExpr, cmp: Cmp, b: &LinExpr) -> Expr {
        let mut difference = a.clone() - b.clone();
        self.compare(&mut difference, cmp, 0)
    }

    /// `lin` as a bounded integer. Fails if `lin` can be negative.
    pub fn lin_to_uint(&mut self, lin: &mut LinExpr) -> Result<UInt> {
        let (terms, offset) = lin.normalized();
        let offset = u64::try_from(offset)
            .map_err(|_| Error::InvalidOperation("linear expression may be negative"))?;
        let sum = self.sum_as_uint(lin, &terms);
        Ok(self.uint_add(&sum, &UInt::constant(offset)))
    }

    pub fn lin_value(&self, lin: &LinExpr) -> i64 {
        lin.terms().fold(lin.offset, |acc, (v, w)| if self.var_value(v) { acc + w } else { acc })
    }

    /// Output `S >= j` of the weighted sequential counter, growing the cached
    /// counter up to `j` when needed.
    fn at_least(&mut self, lin: &mut LinExpr, terms: &[(Expr, i64)], total: i64, j: i64) -> Expr {
        if j <= 0 {
            return Expr::True;
        }
        if j > total {
            return Expr::False;
        }
        let j = j as usize;
        let epoch = self.epoch;
        let encoded = lin.encoded(epoch);
        let rows = &mut encoded.counter;
        if rows.is_empty() {
            rows.resize(terms.len(), vec![]);
        }
        if rows[0].len() < j {
            debug!("growing counter over {} terms to {}", terms.len(), j);
        }
        for i in 0..terms.len() {
            let (done, rest) = rows.split_at_mut(i);
            let (row, previous) = (&mut rest[0], done.last());
            let before = |k: i64| match (k, previous) {
                (k, _) if k <= 0 => Expr::True,
                (_, None) => Expr::False,
                (k, Some(p)) => p[k as usize - 1].clone(),
            };
            let (literal, w) = &terms[i];
            for k in row.len() + 1..=j {
                let k = k as i64;
                let reached = before(k) | (literal & &before(k - w));
                row.push(self.flatten(&reached));
            }
        }
        rows[terms.len() - 1][j - 1].clone()
    }

    fn sum_as_uint(&mut self, lin: &mut LinExpr, terms: &[(Expr, i64)]) -> UInt {
        let epoch = self.epoch;
        if let Some(sum) = &lin.encoded(epoch).uint {
            return sum.clone();
        }
        let mut groups: BTreeMap<i64, Vec<Expr>> = BTreeMap::new();
        for (literal, w) in terms {
            groups.entry(*w).or_default().push(literal.clone());
        }
        debug!("encoding {} terms in {} weight groups with adders", terms.len(), groups.len());
        let scaled: Vec<UInt> = groups
            .into_iter()
            .map(|(w, literals)| {
                let count = self.uint_count(&literals);
                self.uint_mul_const(&count, w as u64)
            })
            .collect();
        let sum = self.uint_sum(&scaled);
        lin.encoded(epoch).uint = Some(sum.clone());
        sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SatResult;
    use proptest::prelude::*;
    use test_env_log::test;

    const CMPS: [Cmp; 6] = [Cmp::Eq, Cmp::Ne, Cmp::Le, Cmp::Lt, Cmp::Ge, Cmp::Gt];

    /// Checks `lin cmp rhs` against arithmetic under every assignment of `xs`.
    fn check_exhaustively(m: &mut Model, xs: &[Expr], lin: &mut LinExpr, cmp: Cmp, rhs: i64) {
        let e = m.compare(lin, cmp, rhs);
        let z = m.flatten(&e);
        for bits in 0..1u32 << xs.len() {
            let fixed: Vec<Expr> = xs
                .iter()
                .enumerate()
                .map(|(i, x)| if bits >> i & 1 == 1 { x.clone() } else { !x })
                .collect();
            assert_eq!(m.solve_assuming(&fixed).unwrap(), SatResult::Satisfiable);
            let value = m.lin_value(lin);
            assert_eq!(m.value(&z), cmp.holds(value, rhs), "{} {:?} {}", value, cmp, rhs);
        }
    }

    #[test]
    fn terms_merge_and_cancel() {
        let mut m = Model::new();
        let x = m.new_vars(2);
        let mut lin = LinExpr::weighted(vec![(&x[0], 3), (&x[1], 2), (&!&x[0], 3)]).unwrap();
        // 3x + 3(1 - x) = 3
        assert_eq!(lin.terms().collect::<Vec<_>>(), vec![(*x[1].as_literal().unwrap().variable(), 2)]);
        assert_eq!(lin.offset(), 3);
        lin.add_term(&Expr::True, 4).unwrap();
        assert_eq!(lin.offset(), 7);
        assert!(matches!(lin.add_term(&(&x[0] & &x[1]), 1), Err(Error::NotLiteral(_))));

        let lin = (lin.clone() - lin) * 5;
        assert!(lin.is_constant());
        assert_eq!(lin.offset(), 0);
    }

    #[test]
    fn trivial_bounds_emit_nothing() {
        let mut m = Model::new();
        let x = m.new_vars(3);
        let mut lin = LinExpr::weighted(vec![(&x[0], 2), (&x[1], -3), (&x[2], 1)]).unwrap();
        // ranges over -3..=3
        assert_eq!(m.compare(&mut lin, Cmp::Le, 3), Expr::True);
        assert_eq!(m.compare(&mut lin, Cmp::Gt, 3), Expr::False);
        assert_eq!(m.compare(&mut lin, Cmp::Ge, -3), Expr::True);
        assert_eq!(m.compare(&mut lin, Cmp::Eq, 4), Expr::False);
        assert_eq!(m.compare(&mut lin, Cmp::Ne, -4), Expr::True);
        assert_eq!(m.num_clauses(), 0);
    }

    #[test]
    fn counter_is_reused() {
        let mut m = Model::new();
        let x = m.new_vars(6);
        let mut lin = LinExpr::count(&x).unwrap();
        let at_least_3 = m.compare(&mut lin, Cmp::Ge, 3);
        let clauses = m.num_clauses();
        assert_eq!(m.compare(&mut lin, Cmp::Ge, 3), at_least_3);
        assert_eq!(m.compare(&mut lin, Cmp::Lt, 3), !&at_least_3);
        assert_eq!(m.num_clauses(), clauses);

        // growing to a larger target keeps the existing outputs
        m.compare(&mut lin, Cmp::Ge, 5);
        assert_eq!(m.compare(&mut lin, Cmp::Ge, 3), at_least_3);

        m.add_constr(&at_least_3).unwrap();
        let at_most_3 = m.compare(&mut lin, Cmp::Le, 3);
        m.add_constr(&at_most_3).unwrap();
        assert_eq!(m.solve().unwrap(), SatResult::Satisfiable);
        assert_eq!(m.lin_value(&lin), 3);
    }

    #[test]
    fn counter_and_adders_agree() {
        for threshold in [0, 64] {
            let mut m = Model::new();
            m.config_mut().counter_threshold = threshold;
            let x = m.new_vars(4);
            let mut lin = LinExpr::weighted(vec![(&x[0], 5), (&x[1], -2), (&x[2], 3), (&x[3], 3)]).unwrap();
            for cmp in CMPS {
                for rhs in [-1, 0, 3, 4, 6] {
                    check_exhaustively(&mut m, &x, &mut lin, cmp, rhs);
                }
            }
        }
    }

    #[test]
    fn compare_two_expressions() {
        let mut m = Model::new();
        let x = m.new_vars(3);
        let y = m.new_vars(3);
        let a = LinExpr::count(&x).unwrap();
        let b = LinExpr::weighted(y.iter().map(|y| (y, 2))).unwrap();
        let gt = m.compare_lin(&a, Cmp::Gt, &b);
        let gt = m.flatten(&gt);
        m.add_constr(&gt).unwrap();
        let some_y = Expr::or(y.clone());
        m.add_constr(&some_y).unwrap();
        assert_eq!(m.solve().unwrap(), SatResult::Satisfiable);
        assert!(m.lin_value(&a) > m.lin_value(&b));
        assert_eq!(m.lin_value(&b), 2);
        assert_eq!(m.lin_value(&a), 3);
    }

    #[test]
    fn restore_discards_cached_encoding() {
        let mut m = Model::new();
        let x = m.new_vars(4);
        let mut lin = LinExpr::count(&x).unwrap();
        let snapshot = m.snapshot();
        let stale = m.compare(&mut lin, Cmp::Ge, 2);
        m.restore(snapshot);
        let fresh = m.compare(&mut lin, Cmp::Ge, 2);
        // rebuilt from scratch, so it lands on the same fresh variables
        assert_eq!(fresh, stale);
        m.add_constr(&fresh).unwrap();
        m.add_constr(&!&x[0]).unwrap();
        m.add_constr(&!&x[1]).unwrap();
        m.add_constr(&!&x[2]).unwrap();
        assert_eq!(m.solve().unwrap(), SatResult::Unsatisfiable);
    }

    #[test]
    fn linear_expression_as_uint() {
        let mut m = Model::new();
        let x = m.new_vars(3);
        let mut lin = LinExpr::weighted(vec![(&x[0], 4), (&x[1], -1), (&x[2], 2)]).unwrap();
        assert!(m.lin_to_uint(&mut lin).is_err());
        lin.add_constant(1);
        let sum = m.lin_to_uint(&mut lin).unwrap();
        assert_eq!(sum.ub(), 7);
        assert_eq!(m.solve_assuming(&[x[0].clone(), x[1].clone(), !&x[2]]).unwrap(), SatResult::Satisfiable);
        assert_eq!(m.uint_value(&sum), 4);
        assert_eq!(m.lin_value(&lin), 4);
    }

    proptest! {
        #[test]
        fn comparisons_match_arithmetic(
            weights in prop::collection::vec(-6i64..=6, 1..5),
            offset in -4i64..=4,
            rhs in -12i64..=12,
            cmp in prop::sample::select(CMPS.to_vec()),
            threshold in prop::sample::select(vec![0i64, 3, 64]),
        ) {
            let mut m = Model::new();
            m.config_mut().counter_threshold = threshold;
            let x = m.new_vars(weights.len());
            let mut lin = LinExpr::weighted(x.iter().zip(weights.iter().copied())).unwrap();
            lin.add_constant(offset);
            check_exhaustively(&mut m, &x, &mut lin, cmp, rhs);
        }
    }
}

//! Cardinality constraints: at most, at least and exactly `k` of a set of
//! literals, under a choice of encodings.
//!
//! Every entry point first folds constant inputs into the bound and settles
//! the cases that need no encoding at all. Inputs with at most three
//! remaining literals are always encoded pairwise. Auxiliary variables are
//! fully defined, so the returned expression is equivalent to the constraint
//! and may be added, negated or flattened freely.

use crate::expr::Expr;
use crate::formula::Literal;
use crate::model::Model;
use crate::uint::bit_length;
use log::debug;
use std::collections::HashMap;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum CardinalityEncoding {
    /// One clause per forbidden subset; no auxiliaries for `k <= 2`.
    Pairwise,
    /// Unary prefix counter of width `k + 1`.
    Sequential,
    /// Groups of three under commander variables, recursively. `k = 1` only.
    Commander,
    /// Disjunctions over the rows and columns of a square grid. `k = 1` only.
    TwoFactor,
    /// Binary address of the true literal. `k = 1` only.
    OneHot,
    /// Binary count built with adders.
    Binary,
    /// Totalizer outputs.
    SortingNetwork,
}

impl Default for CardinalityEncoding {
    fn default() -> Self {
        CardinalityEncoding::Sequential
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum SortingMethod {
    /// Bailleux-Boufkhad adder tree.
    Totalizer,
    /// Batcher's odd-even merge sort.
    PairwiseMerge,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Bound {
    AtMost,
    AtLeast,
    Exactly,
}

/// Subsets of `0..n` of size `r`, in lexicographic order.
fn subsets(n: usize, r: usize) -> Vec<Vec<usize>> {
    fn extend(start: usize, n: usize, r: usize, current: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
        if current.len() == r {
            out.push(current.clone());
            return;
        }
        for i in start..n {
            current.push(i);
            extend(i + 1, n, r, current, out);
            current.pop();
        }
    }
    let mut out = vec![];
    extend(0, n, r, &mut vec![], &mut out);
    out
}

/// `count >= k` and friends, read off outputs where `outputs[j - 1]` holds iff
/// at least `j` inputs do.
fn threshold(outputs: &[Expr], bound: Bound, k: usize) -> Expr {
    let at_least = |j: usize| match j {
        0 => Expr::True,
        j => outputs.get(j - 1).cloned().unwrap_or(Expr::False),
    };
    match bound {
        Bound::AtMost => !at_least(k + 1),
        Bound::AtLeast => at_least(k),
        Bound::Exactly => at_least(k) & !at_least(k + 1),
    }
}

impl Model {
    pub fn at_most_one(&mut self, literals: &[Expr], encoding: Option<CardinalityEncoding>) -> Expr {
        self.cardinality(literals, Bound::AtMost, 1, encoding)
    }

    pub fn exactly_one(&mut self, literals: &[Expr], encoding: Option<CardinalityEncoding>) -> Expr {
        self.cardinality(literals, Bound::Exactly, 1, encoding)
    }

    pub fn at_most_k(&mut self, literals: &[Expr], k: usize, encoding: Option<CardinalityEncoding>) -> Expr {
        self.cardinality(literals, Bound::AtMost, k, encoding)
    }

    pub fn at_least_k(&mut self, literals: &[Expr], k: usize, encoding: Option<CardinalityEncoding>) -> Expr {
        self.cardinality(literals, Bound::AtLeast, k, encoding)
    }

    pub fn exactly_k(&mut self, literals: &[Expr], k: usize, encoding: Option<CardinalityEncoding>) -> Expr {
        self.cardinality(literals, Bound::Exactly, k, encoding)
    }

    fn cardinality(&mut self, literals: &[Expr], bound: Bound, k: usize, encoding: Option<CardinalityEncoding>) -> Expr {
        let mut ones = 0;
        let mut rest = vec![];
        for l in literals {
            match self.flatten(l) {
                Expr::True => ones += 1,
                Expr::False => {}
                e => rest.push(e),
            }
        }

        match bound {
            Bound::AtMost | Bound::Exactly if ones > k => return Expr::False,
            Bound::AtLeast if ones >= k => return Expr::True,
            _ => {}
        }
        let k = k - ones;
        let n = rest.len();
        let all = |positive: bool| Expr::and(rest.iter().map(|x| if positive { x.clone() } else { !x }));
        match bound {
            Bound::AtMost if k >= n => return Expr::True,
            Bound::AtMost if k == 0 => return all(false),
            Bound::AtLeast | Bound::Exactly if k > n => return Expr::False,
            Bound::AtLeast | Bound::Exactly if k == n => return all(true),
            Bound::Exactly if k == 0 => return all(false),
            Bound::AtLeast if k == 1 => return Expr::or(rest),
            _ => {}
        }

        use CardinalityEncoding::*;
        let requested = encoding.unwrap_or(self.config.cardinality);
        let encoding = match requested {
            _ if n <= 3 => Pairwise,
            Commander | TwoFactor | OneHot if k > 1 => Sequential,
            e => e,
        };
        debug!("{:?} {} of {} literals: {:?} (requested {:?})", bound, k, n, encoding, requested);

        match encoding {
            Pairwise => self.pairwise(&rest, bound, k),
            Sequential => {
                let outputs = self.unary_counter(&rest, (k + 1).min(n));
                threshold(&outputs, bound, k)
            }
            SortingNetwork => {
                let outputs = self.sort(&rest, SortingMethod::Totalizer);
                threshold(&outputs, bound, k)
            }
            Binary => {
                let count = self.uint_count(&rest);
                let k = k as u64;
                match bound {
                    Bound::AtMost => count.le_const(k),
                    Bound::AtLeast => count.ge_const(k),
                    Bound::Exactly => count.eq_const(k),
                }
            }
            Commander | TwoFactor | OneHot => {
                let at_most_one = match encoding {
                    Commander => self.commander_amo(&rest),
                    TwoFactor => self.two_factor_amo(&rest),
                    _ => self.one_hot_amo(&rest),
                };
                match bound {
                    Bound::Exactly => at_most_one & Expr::or(rest),
                    _ => at_most_one,
                }
            }
        }
    }

    fn pairwise(&mut self, literals: &[Expr], bound: Bound, k: usize) -> Expr {
        match bound {
            Bound::AtMost => self.pairwise_at_most(literals, k),
            Bound::AtLeast if k == 1 => Expr::or(literals.to_vec()),
            Bound::AtLeast => {
                let negated: Vec<Expr> = literals.iter().map(|l| !l).collect();
                self.pairwise_at_most(&negated, literals.len() - k)
            }
            Bound::Exactly => {
                let at_most = self.pairwise(literals, Bound::AtMost, k);
                let at_least = self.pairwise(literals, Bound::AtLeast, k);
                at_most & at_least
            }
        }
    }

    /// Forbids every subset of `k + 1` literals for `k <= 2`; larger bounds
    /// are decomposed on the first literal, sharing equal suffix subproblems.
    fn pairwise_at_most(&mut self, literals: &[Expr], k: usize) -> Expr {
        match k {
            _ if k >= literals.len() => Expr::True,
            0 => Expr::and(literals.iter().map(|l| !l)),
            1 | 2 => Expr::and(
                subsets(literals.len(), k + 1)
                    .into_iter()
                    .map(|subset| Expr::or(subset.into_iter().map(|i| !&literals[i]))),
            ),
            _ => self.shannon_at_most(literals, k, &mut HashMap::new()),
        }
    }

    fn shannon_at_most(&mut self, literals: &[Expr], k: usize, memo: &mut HashMap<(usize, usize), Expr>) -> Expr {
        if literals.len() <= k {
            return Expr::True;
        }
        if k == 0 {
            return Expr::and(literals.iter().map(|l| !l));
        }
        let key = (literals.len(), k);
        if let Some(e) = memo.get(&key) {
            return e.clone();
        }
        let with = self.shannon_at_most(&literals[1..], k - 1, memo);
        let without = self.shannon_at_most(&literals[1..], k, memo);
        let e = self.ite(&literals[0], &with, &without);
        memo.insert(key, e.clone());
        e
    }

    /// `outputs[j - 1]` holds iff at least `j` of `literals` do, for `j <= limit`.
    fn unary_counter(&mut self, literals: &[Expr], limit: usize) -> Vec<Expr> {
        let mut previous: Vec<Expr> = vec![Expr::False; limit];
        for x in literals {
            let mut row = Vec::with_capacity(limit);
            for j in 0..limit {
                let carried = if j == 0 { Expr::True } else { previous[j - 1].clone() };
                let reached = &previous[j] | &(x & &carried);
                row.push(self.flatten(&reached));
            }
            previous = row;
        }
        previous
    }

    fn commander_amo(&mut self, literals: &[Expr]) -> Expr {
        if literals.len() <= 3 {
            return self.pairwise_at_most(literals, 1);
        }
        let mut parts = vec![];
        let mut commanders = vec![];
        for group in literals.chunks(3) {
            parts.push(self.pairwise_at_most(group, 1));
            commanders.push(self.flatten(&Expr::or(group.to_vec())));
        }
        parts.push(self.commander_amo(&commanders));
        Expr::and(parts)
    }

    /// Lays the literals out row by row in a square grid: at most one is true
    /// iff at most one row and at most one column contain a true literal.
    fn two_factor_amo(&mut self, literals: &[Expr]) -> Expr {
        let n = literals.len();
        if n <= 3 {
            return self.pairwise_at_most(literals, 1);
        }
        let mut width = 1;
        while width * width < n {
            width += 1;
        }
        let rows: Vec<Expr> = literals
            .chunks(width)
            .map(|row| self.flatten(&Expr::or(row.to_vec())))
            .collect();
        let columns: Vec<Expr> = (0..width)
            .map(|c| {
                let column: Vec<Expr> = literals.iter().skip(c).step_by(width).cloned().collect();
                self.flatten(&Expr::or(column))
            })
            .collect();
        let rows = self.two_factor_amo(&rows);
        let columns = self.two_factor_amo(&columns);
        rows & columns
    }

    /// Address bit `j` is true iff some literal whose index has bit `j` set is
    /// true. Each literal forces the zero bits of its own index, so two true
    /// literals always disagree on some bit.
    fn one_hot_amo(&mut self, literals: &[Expr]) -> Expr {
        let width = bit_length(literals.len() as u64 - 1);
        let address: Vec<Expr> = (0..width)
            .map(|j| {
                let members: Vec<Expr> = literals
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| i >> j & 1 == 1)
                    .map(|(_, l)| l.clone())
                    .collect();
                self.flatten(&Expr::or(members))
            })
            .collect();
        let address = &address;
        Expr::and(literals.iter().enumerate().flat_map(|(i, l)| {
            (0..width)
                .filter(move |j| i >> j & 1 == 0)
                .map(move |j| !l | !&address[j])
        }))
    }

    /// Outputs in descending order: the `j`-th holds iff at least `j + 1`
    /// inputs do. Networks are cached per input set.
    pub fn sort(&mut self, literals: &[Expr], method: SortingMethod) -> Vec<Expr> {
        let mut ones = 0;
        let mut zeros = 0;
        let mut rest = vec![];
        for l in literals {
            match self.flatten(l) {
                Expr::True => ones += 1,
                Expr::False => zeros += 1,
                e => rest.push(e),
            }
        }
        rest.sort();

        let key = (method == SortingMethod::PairwiseMerge, rest);
        let sorted = if let Some(outputs) = self.networks.get(&key) {
            outputs.clone()
        } else {
            debug!("building {:?} network over {} literals", method, key.1.len());
            let outputs = match method {
                SortingMethod::Totalizer => {
                    let inputs: Vec<Literal> = key.1.iter().filter_map(Expr::as_literal).collect();
                    self.totalizer(&inputs).into_iter().map(Expr::Lit).collect()
                }
                SortingMethod::PairwiseMerge => self.odd_even_merge_sort(&key.1),
            };
            self.networks.insert(key, outputs.clone());
            outputs
        };

        let mut outputs = vec![Expr::True; ones];
        outputs.extend(sorted);
        outputs.extend(std::iter::repeat(Expr::False).take(zeros));
        outputs
    }

    fn totalizer(&mut self, inputs: &[Literal]) -> Vec<Literal> {
        if inputs.len() <= 1 {
            return inputs.to_vec();
        }
        let (left, right) = inputs.split_at(inputs.len() / 2);
        let a = self.totalizer(left);
        let b = self.totalizer(right);
        let n = inputs.len();
        let outputs: Vec<Literal> = (0..n).map(|_| self.new_variable().positive()).collect();
        for i in 0..=a.len() {
            for j in 0..=b.len() {
                // i from the left and j from the right reach i + j
                if i + j > 0 {
                    let clause = (i > 0)
                        .then(|| !a[i - 1])
                        .into_iter()
                        .chain((j > 0).then(|| !b[j - 1]))
                        .chain(Some(outputs[i + j - 1]));
                    self.add_clause(clause.collect::<Vec<_>>());
                }
                // at most i on the left and j on the right stay below i + j + 1
                if i + j < n {
                    let clause = a
                        .get(i)
                        .copied()
                        .into_iter()
                        .chain(b.get(j).copied())
                        .chain(Some(!outputs[i + j]));
                    self.add_clause(clause.collect::<Vec<_>>());
                }
            }
        }
        outputs
    }

    fn odd_even_merge_sort(&mut self, literals: &[Expr]) -> Vec<Expr> {
        let n = literals.len();
        let mut v = literals.to_vec();
        v.resize(n.next_power_of_two(), Expr::False);
        let size = v.len();
        self.merge_sort_range(&mut v, 0, size);
        v.truncate(n);
        v
    }

    fn merge_sort_range(&mut self, v: &mut [Expr], lo: usize, n: usize) {
        if n > 1 {
            let m = n / 2;
            self.merge_sort_range(v, lo, m);
            self.merge_sort_range(v, lo + m, m);
            self.odd_even_merge(v, lo, n, 1);
        }
    }

    fn odd_even_merge(&mut self, v: &mut [Expr], lo: usize, n: usize, r: usize) {
        let m = r * 2;
        if m < n {
            self.odd_even_merge(v, lo, n, m);
            self.odd_even_merge(v, lo + r, n, m);
            let mut i = lo + r;
            while i + r < lo + n {
                self.comparator(v, i, i + r);
                i += m;
            }
        } else {
            self.comparator(v, lo, lo + r);
        }
    }

    fn comparator(&mut self, v: &mut [Expr], i: usize, j: usize) {
        let high = self.flatten(&(&v[i] | &v[j]));
        let low = self.flatten(&(&v[i] & &v[j]));
        v[i] = high;
        v[j] = low;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SatResult;
    use test_env_log::test;
    use CardinalityEncoding::*;

    const ALL: [CardinalityEncoding; 7] = [Pairwise, Sequential, Commander, TwoFactor, OneHot, Binary, SortingNetwork];

    /// Every assignment of `xs` the model allows.
    fn projected_solutions(m: &mut Model, xs: &[Expr]) -> Vec<Vec<bool>> {
        let mut seen = vec![];
        m.enumerate_solutions(xs, |m| {
            seen.push(xs.iter().map(|x| m.value(x)).collect());
            Ok(())
        })
        .unwrap();
        seen
    }

    fn binomial(n: usize, k: usize) -> usize {
        (0..k).fold(1, |acc, i| acc * (n - i) / (i + 1))
    }

    #[test]
    fn exactly_one_has_one_solution_per_literal() {
        for encoding in ALL {
            for n in 1..=12 {
                let mut m = Model::new();
                let xs = m.new_vars(n);
                let e = m.exactly_one(&xs, Some(encoding));
                m.add_constr(&e).unwrap();
                let solutions = projected_solutions(&mut m, &xs);
                assert_eq!(solutions.len(), n, "{:?} over {}", encoding, n);
                for s in solutions {
                    assert_eq!(s.iter().filter(|b| **b).count(), 1);
                }
            }
        }
    }

    #[test]
    fn k_bounds_count_subsets() {
        let n = 5;
        for encoding in ALL {
            for k in 0..=n {
                let expected = [
                    (0..=k).map(|i| binomial(n, i)).sum::<usize>(),
                    (k..=n).map(|i| binomial(n, i)).sum::<usize>(),
                    binomial(n, k),
                ];
                for (bound, expected) in [Bound::AtMost, Bound::AtLeast, Bound::Exactly].into_iter().zip(expected) {
                    let mut m = Model::new();
                    let xs = m.new_vars(n);
                    let e = m.cardinality(&xs, bound, k, Some(encoding));
                    m.add_constr(&e).unwrap();
                    let solutions = projected_solutions(&mut m, &xs);
                    assert_eq!(solutions.len(), expected, "{:?} {:?} {}", encoding, bound, k);
                    for s in solutions {
                        let count = s.iter().filter(|b| **b).count();
                        let ok = match bound {
                            Bound::AtMost => count <= k,
                            Bound::AtLeast => count >= k,
                            Bound::Exactly => count == k,
                        };
                        assert!(ok);
                    }
                }
            }
        }
    }

    fn pigeonhole(pigeons: usize, holes: usize, encoding: CardinalityEncoding) -> SatResult {
        let mut m = Model::new();
        let x: Vec<Vec<Expr>> = (0..pigeons).map(|_| m.new_vars(holes)).collect();
        for row in &x {
            let e = m.exactly_one(row, Some(encoding));
            m.add_constr(&e).unwrap();
        }
        for j in 0..holes {
            let column: Vec<Expr> = x.iter().map(|row| row[j].clone()).collect();
            let e = m.at_most_one(&column, Some(encoding));
            m.add_constr(&e).unwrap();
        }
        m.solve().unwrap()
    }

    #[test]
    fn pigeonhole_with_every_encoding() {
        for encoding in ALL {
            for (pigeons, holes) in [(2, 2), (3, 2), (4, 4), (5, 4), (6, 5), (5, 6)] {
                let expected = if holes >= pigeons { SatResult::Satisfiable } else { SatResult::Unsatisfiable };
                assert_eq!(pigeonhole(pigeons, holes, encoding), expected, "{:?} {}->{}", encoding, pigeons, holes);
            }
        }
    }

    #[test]
    fn cost_does_not_depend_on_polarity() {
        for encoding in ALL {
            for n in [3, 4, 7, 13] {
                let mut plain = Model::new();
                let xs = plain.new_vars(n);
                let e = plain.exactly_one(&xs, Some(encoding));
                plain.add_constr(&e).unwrap();

                let mut mixed = Model::new();
                let ys: Vec<Expr> = mixed
                    .new_vars(n)
                    .into_iter()
                    .enumerate()
                    .map(|(i, y)| if i % 3 == 1 { !y } else { y })
                    .collect();
                let e = mixed.exactly_one(&ys, Some(encoding));
                mixed.add_constr(&e).unwrap();

                assert_eq!(plain.num_clauses(), mixed.num_clauses(), "{:?} over {}", encoding, n);
                assert_eq!(plain.num_variables(), mixed.num_variables());
            }
        }
    }

    #[test]
    fn small_inputs_are_pairwise_for_every_encoding() {
        let counts: Vec<(usize, usize)> = ALL
            .iter()
            .map(|&encoding| {
                let mut m = Model::new();
                let xs = m.new_vars(3);
                let e = m.exactly_one(&xs, Some(encoding));
                m.add_constr(&e).unwrap();
                (m.num_clauses(), m.num_variables())
            })
            .collect();
        assert!(counts.iter().all(|c| *c == (4, 3)), "{:?}", counts);
    }

    #[test]
    fn constants_are_decided_directly() {
        let mut m = Model::new();
        let x = m.new_vars(2);
        let (t, f) = (Expr::True, Expr::False);
        for encoding in ALL {
            let e = Some(encoding);
            assert_eq!(m.at_most_one(&[t.clone(), t.clone(), x[0].clone()], e), Expr::False);
            assert_eq!(m.exactly_one(&[f.clone(), f.clone()], e), Expr::False);
            assert_eq!(m.at_most_one(&[], e), Expr::True);
            assert_eq!(m.exactly_one(&[t.clone(), x[0].clone(), x[1].clone()], e), !&x[0] & !&x[1]);
            assert_eq!(m.at_least_k(&[t.clone(), x[0].clone()], 1, e), Expr::True);
            assert_eq!(m.at_least_k(&[f.clone(), x[0].clone(), x[1].clone()], 2, e), &x[0] & &x[1]);
            assert_eq!(m.exactly_k(&[t.clone(), t.clone()], 2, e), Expr::True);
            assert_eq!(m.at_most_k(&x, 2, e), Expr::True);
        }
        assert_eq!(m.num_clauses(), 0);
        assert_eq!(m.num_variables(), 2);
    }

    #[test]
    fn sorting_networks_count() {
        for method in [SortingMethod::Totalizer, SortingMethod::PairwiseMerge] {
            let mut m = Model::new();
            let xs = m.new_vars(5);
            let inputs: Vec<Expr> = xs.iter().cloned().chain([Expr::True, Expr::False]).collect();
            let outputs = m.sort(&inputs, method);
            assert_eq!(outputs.len(), 7);
            assert_eq!(outputs[0], Expr::True);
            assert_eq!(outputs[6], Expr::False);

            let clauses = m.num_clauses();
            let mut reversed = inputs.clone();
            reversed.reverse();
            assert_eq!(m.sort(&reversed, method), outputs);
            assert_eq!(m.num_clauses(), clauses);

            for bits in 0..32u32 {
                let fixed: Vec<Expr> = xs
                    .iter()
                    .enumerate()
                    .map(|(i, x)| if bits >> i & 1 == 1 { x.clone() } else { !x })
                    .collect();
                assert_eq!(m.solve_assuming(&fixed).unwrap(), SatResult::Satisfiable);
                let count = bits.count_ones() as usize + 1;
                for (j, o) in outputs.iter().enumerate() {
                    assert_eq!(m.value(o), count > j, "{:?} bits {:05b} output {}", method, bits, j);
                }
            }
        }
    }

    #[test]
    fn default_encoding_comes_from_config() {
        let mut m = Model::new();
        m.config_mut().cardinality = Binary;
        let xs = m.new_vars(6);
        let e = m.at_most_k(&xs, 2, None);
        let vars = m.num_variables();
        // a binary count needs adders, a pairwise encoding would not
        assert!(vars > 6);
        m.add_constr(&e).unwrap();
        let all_three = &xs[0] & &xs[1] & xs[2].clone();
        assert_eq!(m.solve_assuming(&[all_three]).unwrap(), SatResult::Unsatisfiable);
    }
}

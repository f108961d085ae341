pub mod dimacs;

use std::cmp::Ordering;
use std::fmt::{self, Debug, Display, Formatter};
use std::ops::Not;

/// A boolean variable. Identifiers are positive and dense within one model.
#[derive(Clone, Copy, PartialOrd, Ord, PartialEq, Eq, Hash, Debug)]
pub struct Variable(pub usize);

impl Variable {
    pub fn positive(self) -> Literal {
        Literal::Positive(self)
    }

    pub fn negative(self) -> Literal {
        Literal::Negative(self)
    }
}

impl Display for Variable {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "x{}", self.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Literal {
    Positive(Variable),
    Negative(Variable),
}

impl Literal {
    pub fn variable(&self) -> &Variable {
        match self {
            Literal::Positive(v) => v,
            Literal::Negative(v) => v,
        }
    }

    pub fn is_positive(&self) -> bool {
        match self {
            Literal::Positive(_) => true,
            Literal::Negative(_) => false,
        }
    }

    pub fn idx(&self) -> usize {
        self.variable().0
    }

    pub fn negated(&self) -> Self {
        match self {
            Literal::Positive(v) => Literal::Negative(*v),
            Literal::Negative(v) => Literal::Positive(*v),
        }
    }

    /// Dense index for per-literal tables: `2 * var` for the positive literal, `2 * var + 1` for the negative one.
    pub fn code(&self) -> usize {
        2 * self.idx() + if self.is_positive() { 0 } else { 1 }
    }

    /// Truth value of this literal under a variable assignment indexed by variable id.
    pub fn value_in(&self, assignment: &[bool]) -> bool {
        assignment[self.idx()] == self.is_positive()
    }

    pub fn to_dimacs(&self) -> i64 {
        match self {
            Literal::Positive(Variable(x)) => *x as i64,
            Literal::Negative(Variable(x)) => -(*x as i64),
        }
    }

    pub fn from_dimacs(l: i64) -> Option<Self> {
        if l > 0 {
            Some(Literal::Positive(Variable(l as usize)))
        } else if l < 0 {
            Some(Literal::Negative(Variable(l.unsigned_abs() as usize)))
        } else {
            None
        }
    }
}

// Ordered by variable first so that complementary literals sort next to each other.
impl Ord for Literal {
    fn cmp(&self, other: &Self) -> Ordering {
        self.variable()
            .cmp(other.variable())
            .then_with(|| other.is_positive().cmp(&self.is_positive()))
    }
}

impl PartialOrd for Literal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Not for Literal {
    type Output = Literal;

    fn not(self) -> Literal {
        self.negated()
    }
}

impl Display for Literal {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Literal::Positive(Variable(x)) => write!(f, "{}", x),
            Literal::Negative(Variable(x)) => write!(f, "!{}", x),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Clause {
    literals: Vec<Literal>,
}

impl Clause {
    pub fn new(disjuncts: impl IntoIterator<Item = Literal>) -> Self {
        Self {
            literals: disjuncts.into_iter().collect(),
        }
    }

    pub fn literals(&self) -> impl Iterator<Item = &Literal> {
        self.literals.iter()
    }

    pub fn as_slice(&self) -> &[Literal] {
        &self.literals
    }

    pub fn len(&self) -> usize {
        self.literals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.literals.is_empty()
    }

    pub fn is_satisfied_by(&self, assignment: &[bool]) -> bool {
        self.literals.iter().any(|l| l.value_in(assignment))
    }
}

impl Display for Clause {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        if self.literals.len() > 1 {
            f.write_str("(")?;
        }
        let mut first_literal = true;
        for literal in &self.literals {
            if first_literal {
                first_literal = false;
            } else {
                f.write_str(" | ")?;
            }
            write!(f, "{}", literal)?;
        }
        if self.literals.len() > 1 {
            f.write_str(")")?;
        }
        Ok(())
    }
}

/// A CNF formula over variables `1..=num_variables`.
#[derive(Clone, Default)]
pub struct Formula {
    num_variables: usize,
    clauses: Vec<Clause>,
}

impl Formula {
    pub fn new(conjuncts: impl IntoIterator<Item = Clause>) -> Self {
        let clauses: Vec<Clause> = conjuncts.into_iter().collect();
        let num_variables = clauses
            .iter()
            .flat_map(|clause| clause.literals().map(|l| l.idx()))
            .max()
            .unwrap_or(0);
        Self { num_variables, clauses }
    }

    pub fn with_variables(num_variables: usize, conjuncts: impl IntoIterator<Item = Clause>) -> Self {
        let mut formula = Self::new(conjuncts);
        formula.num_variables = formula.num_variables.max(num_variables);
        formula
    }

    pub fn num_variables(&self) -> usize {
        self.num_variables
    }

    pub fn clauses(&self) -> impl Iterator<Item = &Clause> {
        self.clauses.iter()
    }

    pub fn num_clauses(&self) -> usize {
        self.clauses.len()
    }

    pub fn into_clauses(self) -> Vec<Clause> {
        self.clauses
    }
}

impl Debug for Formula {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl Display for Formula {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let mut first_clause = true;
        for clause in &self.clauses {
            if first_clause {
                first_clause = false;
            } else {
                f.write_str(" & ")?;
            }
            write!(f, "{}", clause)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn p(x: usize) -> Literal {
    Literal::Positive(Variable(x))
}

#[cfg(test)]
pub(crate) fn n(x: usize) -> Literal {
    Literal::Negative(Variable(x))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_env_log::test;

    #[test]
    fn literal_order_groups_complements() {
        let mut lits = vec![n(2), p(3), p(2), n(1)];
        lits.sort();
        assert_eq!(lits, vec![n(1), p(2), n(2), p(3)]);
    }

    #[test]
    fn dimacs_literal_conversion() {
        assert_eq!(p(4).to_dimacs(), 4);
        assert_eq!(n(4).to_dimacs(), -4);
        assert_eq!(Literal::from_dimacs(-7), Some(n(7)));
        assert_eq!(Literal::from_dimacs(0), None);
    }

    #[test]
    fn formula_counts_variables() {
        let f = Formula::new(vec![Clause::new(vec![p(1), n(5)]), Clause::new(vec![p(2)])]);
        assert_eq!(f.num_variables(), 5);
        assert_eq!(f.num_clauses(), 2);
        assert_eq!(format!("{}", f), "(1 | !5) & 2");
    }
}

//! Boolean expressions in negation normal form.
//!
//! Expressions are simplified as they are built: nested conjunctions (and
//! disjunctions) are merged, identity elements are dropped, absorbing elements
//! and complementary literals collapse the node, and duplicate children are
//! removed. Children are kept sorted, so equality and hashing do not depend on
//! the order operands were given in.

use crate::formula::{Literal, Variable};
use std::fmt::{self, Display, Formatter};
use std::ops::{BitAnd, BitOr, BitXor, Not};
use std::rc::Rc;

#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub enum Expr {
    False,
    True,
    /// A variable, or its negation.
    Lit(Literal),
    /// Never directly contains another `And`, a constant, or fewer than two children.
    And(Rc<[Expr]>),
    /// Never directly contains another `Or`, a constant, or fewer than two children.
    Or(Rc<[Expr]>),
}

impl Expr {
    pub fn constant(value: bool) -> Expr {
        if value {
            Expr::True
        } else {
            Expr::False
        }
    }

    pub fn var(v: Variable) -> Expr {
        Expr::Lit(v.positive())
    }

    pub fn and<I: IntoIterator<Item = Expr>>(operands: I) -> Expr {
        Self::junction(operands, true)
    }

    pub fn or<I: IntoIterator<Item = Expr>>(operands: I) -> Expr {
        Self::junction(operands, false)
    }

    fn junction<I: IntoIterator<Item = Expr>>(operands: I, conjunctive: bool) -> Expr {
        let (identity, absorbing) = if conjunctive {
            (Expr::True, Expr::False)
        } else {
            (Expr::False, Expr::True)
        };

        let mut children = vec![];
        for operand in operands {
            match operand {
                e if e == identity => {}
                e if e == absorbing => return absorbing,
                Expr::And(cs) if conjunctive => children.extend(cs.iter().cloned()),
                Expr::Or(cs) if !conjunctive => children.extend(cs.iter().cloned()),
                e => children.push(e),
            }
        }
        children.sort();
        children.dedup();

        // literals sort by variable, so `x` and `!x` end up adjacent
        let complementary = children.windows(2).any(|w| match (&w[0], &w[1]) {
            (Expr::Lit(a), Expr::Lit(b)) => a.variable() == b.variable(),
            _ => false,
        });
        if complementary {
            return absorbing;
        }

        match children.len() {
            0 => identity,
            1 => children.swap_remove(0),
            _ if conjunctive => Expr::And(children.into()),
            _ => Expr::Or(children.into()),
        }
    }

    /// Negation, pushed through conjunctions and disjunctions by De Morgan's law.
    pub fn negate(&self) -> Expr {
        match self {
            Expr::False => Expr::True,
            Expr::True => Expr::False,
            Expr::Lit(l) => Expr::Lit(l.negated()),
            Expr::And(cs) => Expr::or(cs.iter().map(Expr::negate)),
            Expr::Or(cs) => Expr::and(cs.iter().map(Expr::negate)),
        }
    }

    pub fn implies(&self, other: &Expr) -> Expr {
        Expr::or(vec![self.negate(), other.clone()])
    }

    pub fn iff(&self, other: &Expr) -> Expr {
        match (self.as_constant(), other.as_constant()) {
            (Some(true), _) => other.clone(),
            (Some(false), _) => other.negate(),
            (_, Some(true)) => self.clone(),
            (_, Some(false)) => self.negate(),
            (None, None) => Expr::or(vec![
                Expr::and(vec![self.clone(), other.clone()]),
                Expr::and(vec![self.negate(), other.negate()]),
            ]),
        }
    }

    pub fn xor(&self, other: &Expr) -> Expr {
        match (self.as_constant(), other.as_constant()) {
            (Some(true), _) => other.negate(),
            (Some(false), _) => other.clone(),
            (_, Some(true)) => self.negate(),
            (_, Some(false)) => self.clone(),
            (None, None) => Expr::or(vec![
                Expr::and(vec![self.clone(), other.negate()]),
                Expr::and(vec![self.negate(), other.clone()]),
            ]),
        }
    }

    /// `if self { then } else { otherwise }`
    pub fn ite(&self, then: &Expr, otherwise: &Expr) -> Expr {
        match self.as_constant() {
            Some(true) => then.clone(),
            Some(false) => otherwise.clone(),
            None if then == otherwise => then.clone(),
            None => Expr::or(vec![
                Expr::and(vec![self.clone(), then.clone()]),
                Expr::and(vec![self.negate(), otherwise.clone()]),
            ]),
        }
    }

    pub fn as_constant(&self) -> Option<bool> {
        match self {
            Expr::True => Some(true),
            Expr::False => Some(false),
            _ => None,
        }
    }

    pub fn as_literal(&self) -> Option<Literal> {
        match self {
            Expr::Lit(l) => Some(*l),
            _ => None,
        }
    }

    /// True for constants and literals, the expressions flatten leaves alone.
    pub fn is_atom(&self) -> bool {
        !matches!(self, Expr::And(_) | Expr::Or(_))
    }

    pub fn children(&self) -> &[Expr] {
        match self {
            Expr::And(cs) | Expr::Or(cs) => &cs[..],
            _ => &[],
        }
    }

    pub fn eval<F: Fn(Variable) -> bool>(&self, value: &F) -> bool {
        match self {
            Expr::False => false,
            Expr::True => true,
            Expr::Lit(l) => value(*l.variable()) == l.is_positive(),
            Expr::And(cs) => cs.iter().all(|c| c.eval(value)),
            Expr::Or(cs) => cs.iter().any(|c| c.eval(value)),
        }
    }

    pub fn variables(&self) -> Vec<Variable> {
        fn collect(e: &Expr, out: &mut Vec<Variable>) {
            match e {
                Expr::Lit(l) => out.push(*l.variable()),
                Expr::And(cs) | Expr::Or(cs) => cs.iter().for_each(|c| collect(c, out)),
                _ => {}
            }
        }
        let mut vars = vec![];
        collect(self, &mut vars);
        vars.sort();
        vars.dedup();
        vars
    }
}

impl From<bool> for Expr {
    fn from(value: bool) -> Expr {
        Expr::constant(value)
    }
}

impl From<Literal> for Expr {
    fn from(l: Literal) -> Expr {
        Expr::Lit(l)
    }
}

impl From<Variable> for Expr {
    fn from(v: Variable) -> Expr {
        Expr::var(v)
    }
}

impl Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        self.negate()
    }
}

impl Not for &Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        self.negate()
    }
}

impl BitAnd for Expr {
    type Output = Expr;

    fn bitand(self, rhs: Expr) -> Expr {
        Expr::and(vec![self, rhs])
    }
}

impl BitAnd for &Expr {
    type Output = Expr;

    fn bitand(self, rhs: &Expr) -> Expr {
        Expr::and(vec![self.clone(), rhs.clone()])
    }
}

impl BitOr for Expr {
    type Output = Expr;

    fn bitor(self, rhs: Expr) -> Expr {
        Expr::or(vec![self, rhs])
    }
}

impl BitOr for &Expr {
    type Output = Expr;

    fn bitor(self, rhs: &Expr) -> Expr {
        Expr::or(vec![self.clone(), rhs.clone()])
    }
}

impl BitXor for Expr {
    type Output = Expr;

    fn bitxor(self, rhs: Expr) -> Expr {
        self.xor(&rhs)
    }
}

impl BitXor for &Expr {
    type Output = Expr;

    fn bitxor(self, rhs: &Expr) -> Expr {
        self.xor(rhs)
    }
}

// owned/borrowed mixes forward to the `&Expr` impls
macro_rules! mixed_operands {
    ($($trait:ident :: $method:ident),*) => {$(
        impl $trait<&Expr> for Expr {
            type Output = Expr;

            fn $method(self, rhs: &Expr) -> Expr {
                (&self).$method(rhs)
            }
        }

        impl $trait<Expr> for &Expr {
            type Output = Expr;

            fn $method(self, rhs: Expr) -> Expr {
                self.$method(&rhs)
            }
        }
    )*};
}

mixed_operands!(BitAnd::bitand, BitOr::bitor, BitXor::bitxor);

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let (children, sep) = match self {
            Expr::False => return f.write_str("false"),
            Expr::True => return f.write_str("true"),
            Expr::Lit(l) => return write!(f, "{}", l),
            Expr::And(cs) => (cs, " & "),
            Expr::Or(cs) => (cs, " | "),
        };
        f.write_str("(")?;
        for (i, c) in children.iter().enumerate() {
            if i > 0 {
                f.write_str(sep)?;
            }
            write!(f, "{}", c)?;
        }
        f.write_str(")")
    }
}

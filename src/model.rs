use crate::backend::Backend;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::expr::Expr;
use crate::formula::{dimacs, Clause, Formula, Literal, Variable};
use crate::optimize::CallbackState;
use crate::SatResult;
use log::{debug, trace};
use std::collections::HashMap;
use std::io::Write;
use std::time::Instant;

/// What is known about the model's clause set.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ModelStatus {
    Unknown,
    Satisfiable,
    Unsatisfiable,
}

/// Owns the variables and clauses of one problem and mediates every
/// interaction with the backend.
pub struct Model {
    pub(crate) config: Config,
    num_variables: usize,
    clauses: Vec<Clause>,
    // `false` was added; every later constraint is a no-op
    inconsistent: bool,
    pub(crate) status: ModelStatus,
    values: Vec<bool>,
    // Tseitin memo: expression -> literal equivalent to it
    flattened: HashMap<Expr, Literal>,
    pub(crate) networks: HashMap<(bool, Vec<Expr>), Vec<Expr>>,
    backend: Option<Box<dyn Backend>>,
    // clauses[..synced] have been handed to the backend
    synced: usize,
    pub(crate) callback: CallbackState,
    pub(crate) objective_value: Option<u64>,
    pub(crate) optimal: bool,
    // bumped by every restore; encodings cached outside the model check it
    pub(crate) epoch: u64,
}

/// Enough of the model's state to discard everything created afterwards.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Snapshot {
    num_variables: usize,
    num_clauses: usize,
    inconsistent: bool,
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

impl Model {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            num_variables: 0,
            clauses: vec![],
            inconsistent: false,
            status: ModelStatus::Unknown,
            values: vec![false],
            flattened: HashMap::new(),
            networks: HashMap::new(),
            backend: None,
            synced: 0,
            callback: CallbackState::Idle,
            objective_value: None,
            optimal: false,
            epoch: 0,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Drops the instantiated backend so the changed options are applied on the next solve.
    pub fn config_mut(&mut self) -> &mut Config {
        self.backend = None;
        self.synced = 0;
        &mut self.config
    }

    pub fn new_variable(&mut self) -> Variable {
        self.num_variables += 1;
        self.values.push(false);
        Variable(self.num_variables)
    }

    pub fn new_var(&mut self) -> Expr {
        Expr::var(self.new_variable())
    }

    pub fn new_vars(&mut self, n: usize) -> Vec<Expr> {
        (0..n).map(|_| self.new_var()).collect()
    }

    pub fn num_variables(&self) -> usize {
        self.num_variables
    }

    pub fn num_clauses(&self) -> usize {
        self.clauses.len()
    }

    pub fn clauses(&self) -> impl Iterator<Item = &Clause> {
        self.clauses.iter()
    }

    pub fn status(&self) -> ModelStatus {
        self.status
    }

    pub fn formula(&self) -> Formula {
        Formula::with_variables(self.num_variables, self.clauses.iter().cloned())
    }

    pub fn write_dimacs<W: Write>(&self, writer: W) -> Result<()> {
        dimacs::write(writer, self.num_variables, self.clauses.iter())
    }

    /// Value of a variable in the last solution. Only meaningful after a satisfiable solve.
    pub fn var_value(&self, v: Variable) -> bool {
        self.values.get(v.0).copied().unwrap_or(false)
    }

    pub fn value(&self, e: &Expr) -> bool {
        e.eval(&|v| self.var_value(v))
    }

    pub(crate) fn values(&self) -> &[bool] {
        &self.values
    }

    pub(crate) fn set_values(&mut self, mut values: Vec<bool>) {
        values.resize(self.num_variables + 1, false);
        self.values = values;
    }

    /// Adds a constraint that is already in clausal form: a constant, a literal,
    /// a disjunction of literals, or a conjunction of those. The model is left
    /// untouched when the expression has any other shape.
    pub fn add_constr(&mut self, e: &Expr) -> Result<()> {
        if self.inconsistent {
            return Ok(());
        }
        let clauses = match clausify(e)? {
            Some(clauses) => clauses,
            None => {
                debug!("constraint is false, model is unsatisfiable");
                self.inconsistent = true;
                self.status = ModelStatus::Unsatisfiable;
                return Ok(());
            }
        };
        for clause in clauses {
            self.push_clause(clause);
        }
        Ok(())
    }

    /// Adds each constraint in turn, stopping at the first malformed one.
    pub fn add_constrs<'a, I: IntoIterator<Item = &'a Expr>>(&mut self, es: I) -> Result<()> {
        es.into_iter().try_for_each(|e| self.add_constr(e))
    }

    pub fn add_clause<I: IntoIterator<Item = Literal>>(&mut self, literals: I) {
        if !self.inconsistent {
            self.push_clause(literals.into_iter().collect());
        }
    }

    pub(crate) fn push_clause(&mut self, literals: Vec<Literal>) {
        if self.status == ModelStatus::Satisfiable {
            self.status = ModelStatus::Unknown;
        }
        let threshold = match self.config.clause_split {
            0 => usize::MAX,
            t => t.max(3),
        };
        if literals.len() <= threshold {
            trace!("clause {}", Clause::new(literals.iter().copied()));
            self.clauses.push(Clause::new(literals));
            return;
        }

        // (a | b | c | d | e) becomes (a | b | z) & (!z | c | d | e) and so on
        debug!("splitting clause of {} literals", literals.len());
        let mut rest = &literals[..];
        let mut carry: Option<Literal> = None;
        loop {
            let used = carry.is_some() as usize;
            if rest.len() + used <= threshold {
                self.clauses.push(Clause::new(carry.into_iter().chain(rest.iter().copied())));
                break;
            }
            let take = threshold - used - 1;
            let z = self.new_variable();
            self.clauses.push(Clause::new(
                carry
                    .into_iter()
                    .chain(rest[..take].iter().copied())
                    .chain(Some(z.positive())),
            ));
            rest = &rest[take..];
            carry = Some(z.negative());
        }
    }

    /// Tseitin transform: returns a literal equivalent to `e`, adding the
    /// defining clauses the first time `e` (or its negation) is seen.
    /// Constants and literals are returned unchanged.
    pub fn flatten(&mut self, e: &Expr) -> Expr {
        if e.is_atom() {
            e.clone()
        } else {
            Expr::Lit(self.define(e))
        }
    }

    /// Like [`Model::flatten`] but always yields a literal, even for constants.
    pub fn literal_of(&mut self, e: &Expr) -> Literal {
        match e {
            Expr::Lit(l) => *l,
            Expr::True | Expr::False => {
                let v = self.new_variable();
                let l = if e == &Expr::True { v.positive() } else { v.negative() };
                self.push_clause(vec![l]);
                l
            }
            _ => self.define(e),
        }
    }

    fn define(&mut self, e: &Expr) -> Literal {
        if let Some(l) = self.cached(e) {
            return l;
        }

        let children: Vec<Literal> = e
            .children()
            .iter()
            .map(|c| match c {
                Expr::Lit(l) => *l,
                Expr::And(_) | Expr::Or(_) => self.define(c),
                Expr::True | Expr::False => unreachable!("constants never appear as children"),
            })
            .collect();

        let z = self.new_variable().positive();
        let conjunctive = matches!(e, Expr::And(_));
        // for an Or: c_i -> z and z -> (c_1 | ... | c_n); an And is the dual
        let (z, children) = if conjunctive {
            (z.negated(), children.iter().map(Literal::negated).collect::<Vec<_>>())
        } else {
            (z, children)
        };
        for c in &children {
            self.push_clause(vec![c.negated(), z]);
        }
        self.push_clause(children.into_iter().chain(Some(z.negated())).collect());

        let z = if conjunctive { z.negated() } else { z };
        self.flattened.insert(e.clone(), z);
        z
    }

    /// Literal already defined as equivalent to `e` (or the negation of one defined as `!e`).
    pub(crate) fn cached(&self, e: &Expr) -> Option<Literal> {
        match self.flattened.get(e) {
            Some(l) => Some(*l),
            None => self.flattened.get(&e.negate()).map(Literal::negated),
        }
    }

    pub(crate) fn remember(&mut self, e: Expr, l: Literal) {
        self.flattened.insert(e, l);
    }

    /// `if c { t } else { e }` as a single literal.
    pub fn ite(&mut self, c: &Expr, t: &Expr, e: &Expr) -> Expr {
        let c = self.flatten(c);
        let t = self.flatten(t);
        let e = self.flatten(e);
        let ite = c.ite(&t, &e);
        if ite.is_atom() {
            return ite;
        }
        if let Some(l) = self.cached(&ite) {
            return Expr::Lit(l);
        }
        // only literal operands remain; mixed constants simplify to and/or
        let (c, t, e) = match (c.as_literal(), t.as_literal(), e.as_literal()) {
            (Some(c), Some(t), Some(e)) => (c, t, e),
            _ => return self.flatten(&ite),
        };
        let z = self.new_variable().positive();
        self.push_clause(vec![c.negated(), t.negated(), z]);
        self.push_clause(vec![c.negated(), t, z.negated()]);
        self.push_clause(vec![c, e.negated(), z]);
        self.push_clause(vec![c, e, z.negated()]);
        if self.config.ite_arc_consistency {
            self.push_clause(vec![t.negated(), e.negated(), z]);
            self.push_clause(vec![t, e, z.negated()]);
        }
        self.flattened.insert(ite, z);
        Expr::Lit(z)
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        Snapshot {
            num_variables: self.num_variables,
            num_clauses: self.clauses.len(),
            inconsistent: self.inconsistent,
        }
    }

    /// Forgets every variable and clause created since `snapshot` was taken.
    pub(crate) fn restore(&mut self, snapshot: Snapshot) {
        let n = snapshot.num_variables;
        debug!(
            "restoring snapshot: {} -> {} variables, {} -> {} clauses",
            self.num_variables,
            n,
            self.clauses.len(),
            snapshot.num_clauses
        );
        self.num_variables = n;
        self.epoch += 1;
        self.values.truncate(n + 1);
        self.clauses.truncate(snapshot.num_clauses);
        self.inconsistent = snapshot.inconsistent;
        // a definition's literal is always newer than the variables it defines over
        self.flattened.retain(|_, l| l.idx() <= n);
        self.networks
            .retain(|_, outputs| outputs.iter().all(|o| o.variables().iter().all(|v| v.0 <= n)));
        if self.synced > self.clauses.len() {
            // backends cannot forget clauses, start over on the next solve
            self.backend = None;
            self.synced = 0;
        }
    }

    /// `None` when there is no limit, or the limit lies beyond what `Instant` can represent.
    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.config.time_limit.and_then(|limit| Instant::now().checked_add(limit))
    }

    pub fn solve(&mut self) -> Result<SatResult> {
        let deadline = self.deadline();
        self.solve_under(deadline, &[])
    }

    /// Solves with `assumptions` holding for this query only.
    pub fn solve_assuming(&mut self, assumptions: &[Expr]) -> Result<SatResult> {
        let assumptions: Vec<Literal> = assumptions.iter().map(|a| self.literal_of(a)).collect();
        let deadline = self.deadline();
        self.solve_under(deadline, &assumptions)
    }

    pub(crate) fn solve_under(&mut self, deadline: Option<Instant>, assumptions: &[Literal]) -> Result<SatResult> {
        if self.inconsistent {
            self.status = ModelStatus::Unsatisfiable;
            return Ok(SatResult::Unsatisfiable);
        }

        let backend = match self.backend.take() {
            Some(backend) => backend,
            None => {
                let mut backend = self.config.backend.create();
                backend.configure(&self.config.backend_options())?;
                self.synced = 0;
                backend
            }
        };
        let backend = self.backend.insert(backend);
        let new_clauses = self.clauses.len() - self.synced;
        for clause in &self.clauses[self.synced..] {
            backend.add_clause(clause.as_slice());
        }
        self.synced = self.clauses.len();

        let result = backend.solve(self.num_variables, deadline, assumptions);
        debug!(
            "{}: {} variables, {} clauses ({} new), {} assumptions -> {:?}",
            backend.name(),
            self.num_variables,
            self.clauses.len(),
            new_clauses,
            assumptions.len(),
            result.status()
        );

        let status = result.status();
        match result {
            crate::backend::BackendResult::Satisfiable(values) => {
                self.set_values(values);
                self.status = ModelStatus::Satisfiable;
            }
            crate::backend::BackendResult::Unsatisfiable if assumptions.is_empty() => {
                self.status = ModelStatus::Unsatisfiable;
            }
            _ => self.status = ModelStatus::Unknown,
        }
        Ok(status)
    }
}

/// Splits a clausal expression into clauses; `None` means the expression is `false`.
fn clausify(e: &Expr) -> Result<Option<Vec<Vec<Literal>>>> {
    fn literals(e: &Expr) -> Result<Vec<Literal>> {
        match e {
            Expr::Lit(l) => Ok(vec![*l]),
            Expr::Or(cs) => cs
                .iter()
                .map(|c| c.as_literal().ok_or_else(|| Error::NotClausal(e.to_string())))
                .collect(),
            _ => Err(Error::NotClausal(e.to_string())),
        }
    }

    match e {
        Expr::True => Ok(Some(vec![])),
        Expr::False => Ok(None),
        Expr::Lit(_) | Expr::Or(_) => Ok(Some(vec![literals(e)?])),
        Expr::And(cs) => cs.iter().map(literals).collect::<Result<Vec<_>>>().map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendKind;
    use crate::expr::tests::expr_strategy;
    use proptest::prelude::*;
    use test_env_log::test;

    #[test]
    fn add_constr_splits_top_level_conjunction() {
        let mut m = Model::new();
        let x = m.new_vars(3);
        m.add_constr(&((&x[0] | &x[1]) & !&x[2])).unwrap();
        assert_eq!(m.num_clauses(), 2);
        assert_eq!(m.solve().unwrap(), SatResult::Satisfiable);
        assert!(!m.value(&x[2]));
        assert!(m.value(&x[0]) || m.value(&x[1]));
    }

    #[test]
    fn add_constr_rejects_nested_structure_without_mutating() {
        let mut m = Model::new();
        let x = m.new_vars(4);
        let e = (&x[0] & &x[1]) | (&x[2] & &x[3]);
        assert!(matches!(m.add_constr(&e), Err(Error::NotClausal(_))));
        let e = (&x[0] | &x[1]) & ((&x[2] & &x[3]) | &x[0]);
        assert!(matches!(m.add_constr(&e), Err(Error::NotClausal(_))));
        assert_eq!(m.num_clauses(), 0);

        let flat = m.flatten(&e);
        m.add_constr(&flat).unwrap();
        assert_eq!(m.solve().unwrap(), SatResult::Satisfiable);
        assert!(m.value(&e));
    }

    #[test]
    fn adding_false_is_permanent() {
        let mut m = Model::new();
        let x = m.new_var();
        m.add_constr(&Expr::False).unwrap();
        assert_eq!(m.status(), ModelStatus::Unsatisfiable);
        m.add_constr(&x).unwrap();
        assert_eq!(m.num_clauses(), 0);
        assert_eq!(m.solve().unwrap(), SatResult::Unsatisfiable);
    }

    #[test]
    fn flatten_is_memoized() {
        let mut m = Model::new();
        let x = m.new_vars(3);
        let e = (&x[0] & &x[1]) | &x[2];
        let a = m.flatten(&e);
        let clauses = m.num_clauses();
        let vars = m.num_variables();
        assert_eq!(m.flatten(&e), a);
        assert_eq!(m.flatten(&(&x[2] | (&x[1] & &x[0]))), a);
        assert_eq!(m.flatten(&!&e), !&a);
        assert_eq!(m.num_clauses(), clauses);
        assert_eq!(m.num_variables(), vars);
        assert_eq!(m.flatten(&x[1]), x[1]);
        assert_eq!(m.flatten(&Expr::True), Expr::True);
    }

    #[test]
    fn long_clauses_are_split() {
        let mut m = Model::new();
        m.config_mut().clause_split = 4;
        let x = m.new_vars(10);
        m.add_constr(&Expr::or(x.clone())).unwrap();
        assert!(m.clauses().all(|c| c.len() <= 4));
        assert!(m.num_clauses() > 1);
        for i in 0..9 {
            m.add_constr(&!&x[i]).unwrap();
        }
        assert_eq!(m.solve().unwrap(), SatResult::Satisfiable);
        assert!(m.value(&x[9]));
        m.add_constr(&!&x[9]).unwrap();
        assert_eq!(m.solve().unwrap(), SatResult::Unsatisfiable);
    }

    #[test]
    fn ite_selects_branch() {
        for arc in [false, true] {
            let mut m = Model::new();
            m.config_mut().ite_arc_consistency = arc;
            let x = m.new_vars(3);
            let z = m.ite(&x[0], &x[1], &x[2]);
            for bits in 0..8u32 {
                let fixed: Vec<Expr> = (0..3)
                    .map(|i| if bits & (1 << i) != 0 { x[i].clone() } else { !&x[i] })
                    .collect();
                assert_eq!(m.solve_assuming(&fixed).unwrap(), SatResult::Satisfiable);
                let expected = if bits & 1 != 0 { bits & 2 != 0 } else { bits & 4 != 0 };
                assert_eq!(m.value(&z), expected);
            }
        }
    }

    #[test]
    fn assumptions_are_temporary() {
        let mut m = Model::new();
        let x = m.new_vars(2);
        m.add_constr(&(&x[0] | &x[1])).unwrap();
        assert_eq!(m.solve_assuming(&[!&x[0], !&x[1]]).unwrap(), SatResult::Unsatisfiable);
        assert_eq!(m.status(), ModelStatus::Unknown);
        assert_eq!(m.solve().unwrap(), SatResult::Satisfiable);
    }

    #[test]
    fn snapshot_restore_discards_new_state() {
        let mut m = Model::new();
        let x = m.new_vars(2);
        m.add_constr(&(&x[0] | &x[1])).unwrap();
        assert_eq!(m.solve().unwrap(), SatResult::Satisfiable);

        let snapshot = m.snapshot();
        let y = m.flatten(&(&x[0] & &x[1]));
        m.add_constr(&!&y).unwrap();
        m.add_constr(&x[0]).unwrap();
        assert_eq!(m.solve().unwrap(), SatResult::Satisfiable);
        m.restore(snapshot);

        assert_eq!(m.num_variables(), 2);
        assert_eq!(m.num_clauses(), 1);
        m.add_constr(&(&x[0] & &x[1])).unwrap();
        assert_eq!(m.solve().unwrap(), SatResult::Satisfiable);
        // the definition of `y` is gone, so flattening again allocates afresh
        let y2 = m.flatten(&(&x[0] & &x[1]));
        assert_eq!(y2.as_literal().unwrap().idx(), 3);
    }

    #[test]
    fn huge_time_limit_means_no_deadline() {
        let mut m = Model::new();
        m.config_mut().time_limit = Some(std::time::Duration::MAX);
        assert_eq!(m.deadline(), None);
        let x = m.new_var();
        m.add_constr(&x).unwrap();
        assert_eq!(m.solve().unwrap(), SatResult::Satisfiable);
    }

    #[test]
    fn dimacs_export() {
        let mut m = Model::new();
        let x = m.new_vars(3);
        m.add_constr(&((&x[0] | !&x[2]) & &x[1])).unwrap();
        let mut out = vec![];
        m.write_dimacs(&mut out).unwrap();
        // conjuncts are kept sorted, literals before disjunctions
        assert_eq!(String::from_utf8(out).unwrap(), "p cnf 3 2\n2 0\n1 -3 0\n");
    }

    #[test]
    fn brute_force_backend_rejects_seed_before_solving() {
        let mut m = Model::new();
        m.config_mut().backend = BackendKind::BruteForce;
        m.config_mut().seed = Some(1);
        let x = m.new_var();
        m.add_constr(&x).unwrap();
        assert!(matches!(m.solve(), Err(Error::Unsupported { .. })));
        m.config_mut().seed = None;
        assert_eq!(m.solve().unwrap(), SatResult::Satisfiable);
        assert!(m.value(&x));
    }

    #[test]
    fn portfolio_backend_solves_model() {
        let mut m = Model::new();
        m.config_mut().backend = BackendKind::Portfolio;
        m.config_mut().threads = 3;
        let x = m.new_vars(3);
        m.add_constr(&((&x[0] | &x[1]) & (!&x[0] | &x[2]) & (!&x[1] | !&x[2]))).unwrap();
        assert_eq!(m.solve().unwrap(), SatResult::Satisfiable);
        assert!(m.value(&((&x[0] | &x[1]) & (!&x[0] | &x[2]) & (!&x[1] | !&x[2]))));
    }

    proptest! {
        #[test]
        fn flatten_preserves_semantics(e in expr_strategy(4)) {
            let mut m = Model::new();
            m.new_vars(4);
            let z = m.flatten(&e);
            for bits in 0..16u32 {
                let fixed: Vec<Expr> = (1..=4)
                    .map(|v| {
                        let x = Expr::var(Variable(v));
                        if bits & (1 << (v - 1)) != 0 { x } else { !x }
                    })
                    .collect();
                let expected = e.eval(&|v: Variable| bits & (1 << (v.0 - 1)) != 0);
                prop_assert_eq!(m.solve_assuming(&fixed).unwrap(), SatResult::Satisfiable);
                prop_assert_eq!(m.value(&z), expected);
                prop_assert_eq!(m.value(&e), expected);
            }
        }
    }
}

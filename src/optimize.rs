//! Branch-and-bound optimization over a [`UInt`] objective, and enumeration
//! of solutions projected onto a set of literals.
//!
//! Both drive the model through repeated incremental solves and hand every
//! solution they find to a caller-supplied callback. The callback may add
//! constraints or call [`Model::abort`] to stop the search.

use crate::config::OptimizationFocus;
use crate::error::{Error, Result};
use crate::expr::Expr;
use crate::formula::Literal;
use crate::model::{Model, ModelStatus};
use crate::uint::UInt;
use crate::SatResult;
use log::{debug, info};
use std::time::Instant;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum CallbackState {
    Idle,
    Running,
    Aborted,
}

/// How the next bound to probe is chosen once an incumbent `lb` is known
/// and the objective is known not to exceed `ub`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SearchStrategy {
    /// Probe the middle of `(lb, ub]`.
    Binary,
    /// Probe `ub`, lowering it after every failure.
    Decreasing,
    /// Probe `lb + 1`. Every improvement is kept as a permanent lower bound,
    /// so the clauses built during the search stay in the model.
    Increasing,
    /// Choose per [`Config::focus`](crate::Config).
    Focused,
}

impl Default for SearchStrategy {
    fn default() -> Self {
        SearchStrategy::Binary
    }
}

/// How a search loop ended.
enum Stop {
    Finished,
    Aborted,
    Undecided,
}

impl Model {
    pub fn maximize(&mut self, objective: &UInt, strategy: SearchStrategy) -> Result<SatResult> {
        self.maximize_with(objective, strategy, |_| Ok(()))
    }

    /// Maximizes `objective`, calling `callback` on every improving solution.
    /// Afterwards the model holds the best solution found and, unless the
    /// strategy is [`SearchStrategy::Increasing`], no trace of the search.
    pub fn maximize_with<F>(&mut self, objective: &UInt, strategy: SearchStrategy, callback: F) -> Result<SatResult>
    where
        F: FnMut(&mut Model) -> Result<()>,
    {
        self.optimize(objective, strategy, false, callback)
    }

    pub fn minimize(&mut self, objective: &UInt, strategy: SearchStrategy) -> Result<SatResult> {
        self.minimize_with(objective, strategy, |_| Ok(()))
    }

    /// Minimizes `objective` by maximizing `ub - objective`.
    pub fn minimize_with<F>(&mut self, objective: &UInt, strategy: SearchStrategy, callback: F) -> Result<SatResult>
    where
        F: FnMut(&mut Model) -> Result<()>,
    {
        self.optimize(objective, strategy, true, callback)
    }

    /// Objective value of the incumbent: the one last handed to a callback,
    /// or the best one once the search has returned.
    pub fn objective_value(&self) -> Option<u64> {
        self.objective_value
    }

    /// Whether the last optimization proved its incumbent optimal.
    pub fn is_optimal(&self) -> bool {
        self.optimal
    }

    /// Stops the running search after the current callback returns. Only
    /// valid from inside a solution callback.
    pub fn abort(&mut self) -> Result<()> {
        match self.callback {
            CallbackState::Running => {
                debug!("search aborted from callback");
                self.callback = CallbackState::Aborted;
                Ok(())
            }
            CallbackState::Aborted => Err(Error::InvalidOperation("search was already aborted")),
            CallbackState::Idle => Err(Error::InvalidOperation("abort called outside a solution callback")),
        }
    }

    /// Returns whether the search should go on.
    fn run_callback<F>(&mut self, callback: &mut F) -> Result<bool>
    where
        F: FnMut(&mut Model) -> Result<()>,
    {
        self.callback = CallbackState::Running;
        let result = callback(self);
        let aborted = self.callback == CallbackState::Aborted;
        self.callback = CallbackState::Idle;
        result.map(|_| !aborted)
    }

    fn optimize<F>(&mut self, objective: &UInt, strategy: SearchStrategy, minimizing: bool, mut callback: F) -> Result<SatResult>
    where
        F: FnMut(&mut Model) -> Result<()>,
    {
        if objective.is_unbounded() {
            return Err(Error::UnboundedObjective);
        }
        let deadline = self.deadline();
        let snapshot = self.snapshot();
        self.objective_value = None;
        self.optimal = false;

        let outcome = if minimizing {
            match self.uint_sub(&UInt::constant(objective.ub()), objective) {
                Ok(slack) => self.branch_and_bound(objective, &slack, strategy, deadline, &mut callback),
                Err(e) => Err((e, None)),
            }
        } else {
            self.branch_and_bound(objective, objective, strategy, deadline, &mut callback)
        };

        let best = match &outcome {
            Ok((_, best)) | Err((_, best)) => best.clone(),
        };
        if strategy != SearchStrategy::Increasing {
            self.restore(snapshot);
        }
        if let Some(values) = best {
            self.set_values(values);
            self.status = ModelStatus::Satisfiable;
            self.objective_value = Some(self.uint_value(objective));
        }

        let stop = outcome.map_err(|(e, _)| e)?.0;
        let result = match (stop, self.objective_value) {
            (_, Some(value)) => {
                info!("objective {}{}", value, if self.optimal { " (optimal)" } else { "" });
                SatResult::Satisfiable
            }
            (Stop::Undecided, None) => SatResult::Undecided,
            (_, None) => SatResult::Unsatisfiable,
        };
        Ok(result)
    }

    /// Searches for the largest value of `target`. `objective` is what gets
    /// reported; it differs from `target` when minimizing. Returns how the
    /// search ended and the best assignment, which is also returned alongside
    /// any error so the caller can still install it.
    #[allow(clippy::type_complexity)]
    fn branch_and_bound<F>(
        &mut self,
        objective: &UInt,
        target: &UInt,
        strategy: SearchStrategy,
        deadline: Option<Instant>,
        callback: &mut F,
    ) -> std::result::Result<(Stop, Option<Vec<bool>>), (Error, Option<Vec<bool>>)>
    where
        F: FnMut(&mut Model) -> Result<()>,
    {
        match self.solve_under(deadline, &[]).map_err(|e| (e, None))? {
            SatResult::Satisfiable => {}
            SatResult::Unsatisfiable => return Ok((Stop::Finished, None)),
            SatResult::Undecided => return Ok((Stop::Undecided, None)),
        }
        let mut best = self.values().to_vec();
        let mut lb = self.uint_value(target);
        let mut ub = target.ub();
        self.objective_value = Some(self.uint_value(objective));
        info!("first solution: objective {:?}, searching ({}, {}]", self.objective_value, lb, ub);
        match self.run_callback(callback) {
            Ok(true) => {}
            Ok(false) => return Ok((Stop::Aborted, Some(best))),
            Err(e) => return Err((e, Some(best))),
        }

        while lb < ub {
            let middle = lb + (ub - lb + 1) / 2;
            let cur = match strategy {
                SearchStrategy::Binary => middle,
                SearchStrategy::Decreasing => ub,
                SearchStrategy::Increasing => lb + 1,
                SearchStrategy::Focused => match self.config.focus {
                    OptimizationFocus::Bisection => middle,
                    OptimizationFocus::Incumbent => lb + 1,
                    OptimizationFocus::Bound => ub,
                },
            };
            let probe = target.ge_const(cur);
            let probe = self.literal_of(&probe);
            debug!("probing objective >= {} in [{}, {}]", cur, lb, ub);

            match self.solve_under(deadline, &[probe]) {
                Ok(SatResult::Satisfiable) => {
                    best = self.values().to_vec();
                    lb = self.uint_value(target);
                    self.objective_value = Some(self.uint_value(objective));
                    info!("improved: objective {:?}, searching ({}, {}]", self.objective_value, lb, ub);
                    if strategy == SearchStrategy::Increasing {
                        let lower = target.ge_const(lb);
                        let lower = self.flatten(&lower);
                        if let Err(e) = self.add_constr(&lower) {
                            return Err((e, Some(best)));
                        }
                    }
                    match self.run_callback(callback) {
                        Ok(true) => {}
                        Ok(false) => return Ok((Stop::Aborted, Some(best))),
                        Err(e) => return Err((e, Some(best))),
                    }
                }
                Ok(SatResult::Unsatisfiable) => ub = cur - 1,
                Ok(SatResult::Undecided) => {
                    info!("deadline reached, keeping objective {:?}", self.objective_value);
                    return Ok((Stop::Undecided, Some(best)));
                }
                Err(e) => return Err((e, Some(best))),
            }
        }
        self.optimal = true;
        Ok((Stop::Finished, Some(best)))
    }

    /// Calls `callback` once per distinct assignment of `literals` the model
    /// allows, blocking each one after the callback returns unless the
    /// callback added clauses of its own. Everything added during the
    /// enumeration is discarded afterwards; the model keeps the values of the
    /// last solution. Returns the number of solutions seen.
    pub fn enumerate_solutions<F>(&mut self, literals: &[Expr], mut callback: F) -> Result<usize>
    where
        F: FnMut(&mut Model) -> Result<()>,
    {
        let deadline = self.deadline();
        let snapshot = self.snapshot();
        let literals: Vec<Literal> = literals.iter().map(|l| self.literal_of(l)).collect();

        let mut count = 0;
        let mut last: Option<Vec<bool>> = None;
        let outcome = loop {
            match self.solve_under(deadline, &[]) {
                Ok(SatResult::Satisfiable) => {}
                Ok(_) => break Ok(()),
                Err(e) => break Err(e),
            }
            count += 1;
            let values = self.values().to_vec();
            let clauses = self.num_clauses();
            let keep_going = self.run_callback(&mut callback);
            last = Some(values);
            match keep_going {
                Ok(true) => {}
                Ok(false) => break Ok(()),
                Err(e) => break Err(e),
            }
            if self.num_clauses() == clauses {
                if let Some(values) = &last {
                    let block: Vec<Literal> = literals
                        .iter()
                        .map(|l| if l.value_in(values) { l.negated() } else { *l })
                        .collect();
                    self.add_clause(block);
                }
            }
        };
        debug!("enumerated {} solutions", count);

        self.restore(snapshot);
        if let Some(values) = last {
            self.set_values(values);
            self.status = ModelStatus::Satisfiable;
        }
        outcome.map(|_| count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;
    use std::time::Duration;
    use test_env_log::test;

    /// `x + 7y` with `x <= 1000`, `y <= 200` and `x < 512 | y < 100`.
    fn knapsack() -> (Model, UInt, UInt, UInt) {
        let mut m = Model::new();
        let x = m.new_uint(1000);
        let y = m.new_uint(200);
        let either = x.lt_const(512) | y.lt_const(100);
        let either = m.flatten(&either);
        m.add_constr(&either).unwrap();
        let seven_y = m.uint_mul_const(&y, 7);
        let objective = m.uint_add(&x, &seven_y);
        (m, x, y, objective)
    }

    #[test]
    fn maximize_with_every_strategy() {
        let focused = [OptimizationFocus::Bisection, OptimizationFocus::Incumbent, OptimizationFocus::Bound];
        let runs = [
            (SearchStrategy::Binary, None),
            (SearchStrategy::Decreasing, None),
            (SearchStrategy::Increasing, None),
        ]
        .into_iter()
        .chain(focused.iter().map(|&f| (SearchStrategy::Focused, Some(f))));

        for (strategy, focus) in runs {
            let (mut m, x, y, objective) = knapsack();
            if let Some(focus) = focus {
                m.config_mut().focus = focus;
            }
            assert_eq!(m.maximize(&objective, strategy).unwrap(), SatResult::Satisfiable);
            assert_eq!(m.objective_value(), Some(1911), "{:?} {:?}", strategy, focus);
            assert!(m.is_optimal());
            assert_eq!(m.uint_value(&x), 511);
            assert_eq!(m.uint_value(&y), 200);
            assert_eq!(m.uint_value(&objective), 1911);
            assert_eq!(m.status(), ModelStatus::Satisfiable);
        }
    }

    #[test]
    fn probes_are_discarded_except_when_increasing() {
        for strategy in [SearchStrategy::Binary, SearchStrategy::Increasing] {
            let (mut m, _, _, objective) = knapsack();
            let clauses = m.num_clauses();
            m.maximize(&objective, strategy).unwrap();
            let below_optimum = objective.le_const(1910);
            let below_optimum = m.flatten(&below_optimum);
            m.add_constr(&below_optimum).unwrap();
            if strategy == SearchStrategy::Increasing {
                assert!(m.num_clauses() > clauses);
                assert_eq!(m.solve().unwrap(), SatResult::Unsatisfiable);
            } else {
                assert_eq!(m.solve().unwrap(), SatResult::Satisfiable);
                assert!(m.uint_value(&objective) <= 1910);
            }
        }
    }

    #[test]
    fn minimize_sum() {
        let mut m = Model::new();
        let x = m.new_uint(10);
        let y = m.new_uint(10);
        let doubled = m.uint_mul_const(&x, 2);
        let weighted = m.uint_add(&doubled, &y);
        let enough = weighted.ge_const(13);
        let enough = m.flatten(&enough);
        m.add_constr(&enough).unwrap();
        let total = m.uint_add(&x, &y);
        let clauses = m.num_clauses();
        let variables = m.num_variables();

        assert_eq!(m.minimize(&total, SearchStrategy::Binary).unwrap(), SatResult::Satisfiable);
        assert_eq!(m.objective_value(), Some(7));
        assert_eq!(m.uint_value(&total), 7);
        assert!(2 * m.uint_value(&x) + m.uint_value(&y) >= 13);
        assert_eq!(m.num_clauses(), clauses);
        assert_eq!(m.num_variables(), variables);
    }

    #[test]
    fn abort_keeps_the_last_reported_solution() {
        let mut m = Model::new();
        let x = m.new_uint(100);
        let mut calls = 0;
        let mut seen = None;
        let result = m
            .maximize_with(&x, SearchStrategy::Increasing, |m| {
                calls += 1;
                seen = m.objective_value();
                m.abort()?;
                assert!(matches!(m.abort(), Err(Error::InvalidOperation(_))));
                Ok(())
            })
            .unwrap();
        assert_eq!(result, SatResult::Satisfiable);
        assert_eq!(calls, 1);
        assert_eq!(m.objective_value(), seen);
        assert_eq!(Some(m.uint_value(&x)), seen);
        assert!(!m.is_optimal());
        assert!(matches!(m.abort(), Err(Error::InvalidOperation(_))));
    }

    #[test]
    fn callback_sees_improving_values() {
        let (mut m, _, _, objective) = knapsack();
        let mut seen = vec![];
        m.maximize_with(&objective, SearchStrategy::Increasing, |m| {
            seen.push(m.objective_value().unwrap());
            Ok(())
        })
        .unwrap();
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(seen.last(), Some(&1911));
    }

    #[test]
    fn callback_errors_propagate() {
        let (mut m, _, _, objective) = knapsack();
        let clauses = m.num_clauses();
        let result = m.maximize_with(&objective, SearchStrategy::Binary, |_| Err(Error::InvalidOperation("stop")));
        assert!(matches!(result, Err(Error::InvalidOperation("stop"))));
        assert_eq!(m.num_clauses(), clauses);
        assert_eq!(m.status(), ModelStatus::Satisfiable);
    }

    #[test]
    fn rejects_unbounded_objective() {
        let mut m = Model::new();
        let x = m.new_uint(3).shl(63);
        assert!(matches!(m.maximize(&x, SearchStrategy::Binary), Err(Error::UnboundedObjective)));
        assert!(matches!(m.minimize(&x, SearchStrategy::Binary), Err(Error::UnboundedObjective)));
    }

    #[test]
    fn unsatisfiable_model_has_no_objective() {
        let mut m = Model::new();
        let x = m.new_uint(9);
        m.add_constr(&Expr::False).unwrap();
        assert_eq!(m.maximize(&x, SearchStrategy::Binary).unwrap(), SatResult::Unsatisfiable);
        assert_eq!(m.objective_value(), None);
        assert_eq!(m.status(), ModelStatus::Unsatisfiable);
    }

    #[test]
    fn expired_deadline_leaves_nothing_decided() {
        let mut m = Model::new();
        m.config_mut().time_limit = Some(Duration::ZERO);
        let x = m.new_uint(100);
        let mut calls = 0;
        let result = m
            .maximize_with(&x, SearchStrategy::Binary, |_| {
                calls += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(result, SatResult::Undecided);
        assert_eq!(m.status(), ModelStatus::Unknown);
        assert_eq!(m.objective_value(), None);
        assert!(!m.is_optimal());
        assert_eq!(calls, 0);

        let xs = m.new_vars(3);
        assert_eq!(m.enumerate_solutions(&xs, |_| Ok(())).unwrap(), 0);
        assert_eq!(m.status(), ModelStatus::Unknown);
    }

    #[test]
    fn deadline_during_search_keeps_the_incumbent() {
        let limit = Duration::from_millis(300);
        let mut m = Model::new();
        m.config_mut().time_limit = Some(limit);
        m.config_mut().initial_phase = Some(false);
        let x = m.new_uint(100);
        let mut seen = vec![];
        let result = m
            .maximize_with(&x, SearchStrategy::Increasing, |m| {
                seen.push(m.objective_value());
                thread::sleep(limit + Duration::from_millis(100));
                Ok(())
            })
            .unwrap();
        assert_eq!(result, SatResult::Satisfiable);
        assert_eq!(seen.len(), 1);
        assert_eq!(m.objective_value(), seen[0]);
        assert_eq!(Some(m.uint_value(&x)), seen[0]);
        assert!(!m.is_optimal());
        assert_eq!(m.status(), ModelStatus::Satisfiable);

        let xs = m.new_vars(3);
        let count = m
            .enumerate_solutions(&xs, |_| {
                thread::sleep(limit + Duration::from_millis(100));
                Ok(())
            })
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(m.status(), ModelStatus::Satisfiable);
    }

    #[test]
    fn enumerate_free_variables() {
        let mut m = Model::new();
        let xs = m.new_vars(3);
        let mut seen = HashSet::new();
        let count = m
            .enumerate_solutions(&xs, |m| {
                let assignment: Vec<bool> = xs.iter().map(|x| m.value(x)).collect();
                assert!(seen.insert(assignment));
                Ok(())
            })
            .unwrap();
        assert_eq!(count, 8);
        assert_eq!(seen.len(), 8);
        assert_eq!(m.num_clauses(), 0);
        assert_eq!(m.status(), ModelStatus::Satisfiable);
        assert_eq!(m.solve().unwrap(), SatResult::Satisfiable);
    }

    #[test]
    fn enumerate_respects_callback_blocking_and_abort() {
        let mut m = Model::new();
        let xs = m.new_vars(2);
        // blocking only the first variable leaves two solutions instead of four
        let count = m
            .enumerate_solutions(&xs, |m| {
                let x0 = m.value(&xs[0]);
                let block = if x0 { !&xs[0] } else { xs[0].clone() };
                m.add_constr(&block)
            })
            .unwrap();
        assert_eq!(count, 2);

        let mut calls = 0;
        let count = m
            .enumerate_solutions(&xs, |m| {
                calls += 1;
                if calls == 3 {
                    m.abort()?;
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(calls, 3);
    }

    #[test]
    fn enumerate_projects_onto_given_literals() {
        let mut m = Model::new();
        let xs = m.new_vars(4);
        let e = &xs[0] | &xs[1];
        m.add_constr(&e).unwrap();
        let count = m.enumerate_solutions(&[e.clone(), xs[2].clone()], |_| Ok(())).unwrap();
        assert_eq!(count, 2);
        assert_eq!(m.num_variables(), 4);
    }
}

use crate::backend::{single_threaded, Backend, BackendOptions, BackendResult, ExpectedOutcome};
use crate::error::Result;
use crate::formula::{Clause, Literal, Variable};
use log::{log, trace, Level};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Assignment {
    True,
    False,
    Undecided,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ClauseIdx(usize);

#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Debug)]
struct DecisionLevel(usize);

#[derive(Debug, Clone)]
struct VariableState {
    assignment: Assignment,
    reason: Option<ClauseIdx>,
    decision_level: DecisionLevel,
    activity: f64,
    // last polarity this variable held, reused on the next decision
    phase: bool,
}

impl VariableState {
    fn new(phase: bool) -> Self {
        VariableState {
            assignment: Assignment::Undecided,
            reason: None,
            decision_level: DecisionLevel(0),
            activity: 0.0,
            phase,
        }
    }

    fn clear(&mut self) {
        self.assignment = Assignment::Undecided;
        self.reason = None;
        self.decision_level = DecisionLevel(0);
    }
}

#[derive(Debug, Default)]
struct SolverState {
    // index 0 is unused so that variable ids index directly
    variables: Vec<VariableState>,
    trail: Vec<Literal>,
    // trail position at which each decision level starts
    trail_lim: Vec<usize>,
    qhead: usize,
}

impl SolverState {
    fn decision_level(&self) -> DecisionLevel {
        DecisionLevel(self.trail_lim.len())
    }

    fn level_of(&self, literal: &Literal) -> DecisionLevel {
        self.variables[literal.idx()].decision_level
    }

    fn assignment_for(&self, literal: &Literal) -> Assignment {
        match self.variables[literal.idx()].assignment {
            Assignment::True => {
                if literal.is_positive() {
                    Assignment::True
                } else {
                    Assignment::False
                }
            }
            Assignment::False => {
                if literal.is_positive() {
                    Assignment::False
                } else {
                    Assignment::True
                }
            }
            Assignment::Undecided => Assignment::Undecided,
        }
    }

    fn new_decision_level(&mut self) {
        self.trail_lim.push(self.trail.len());
    }

    fn assign(&mut self, literal: Literal, reason: Option<ClauseIdx>) {
        debug_assert_eq!(self.assignment_for(&literal), Assignment::Undecided);

        trace!(
            "{} {} at level {}",
            match reason {
                Some(c) => format!("implied({})", c.0),
                None => "decision".to_string(),
            },
            literal,
            self.decision_level().0
        );

        let level = self.decision_level();
        self.trail.push(literal);
        let var = &mut self.variables[literal.idx()];
        var.assignment = if literal.is_positive() {
            Assignment::True
        } else {
            Assignment::False
        };
        var.reason = reason;
        var.decision_level = level;
    }
}

#[derive(Debug, Clone, Copy)]
struct ClauseInfo {
    learnt: bool,
    // took part in conflict analysis since the last reduction
    used: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct Stats {
    decisions: u64,
    conflicts: u64,
    propagations: u64,
    restarts: u64,
    reductions: u64,
}

/// Incremental CDCL engine with two watched literals, first-UIP learning,
/// an activity-ordered decision heuristic with phase saving, and geometric
/// restarts. Assumptions are decided first, one per decision level.
pub struct Cdcl {
    // original and learned clauses of length >= 2; literals 0 and 1 are watched
    clauses: Vec<Vec<Literal>>,
    info: Vec<ClauseInfo>,
    num_learnts: usize,
    // learnt clauses tolerated before the next reduction at a restart
    max_learnts: usize,
    units: Vec<Literal>,
    watches: Vec<Vec<ClauseIdx>>,
    // an empty clause was added or derived at level 0
    inconsistent: bool,
    state: SolverState,
    activity_inc: f64,
    rng: StdRng,
    options: BackendOptions,
    stats: Stats,
}

const ACTIVITY_DECAY: f64 = 0.95;
const DEADLINE_CHECK_INTERVAL: u64 = 64;
const LEARNT_BASE: usize = 2000;
const LEARNT_GROWTH: f64 = 1.1;
// learnt clauses this short are never dropped
const KEPT_LEARNT_LEN: usize = 3;

impl Default for Cdcl {
    fn default() -> Self {
        Self::new()
    }
}

impl Cdcl {
    pub fn new() -> Self {
        Self {
            clauses: vec![],
            info: vec![],
            num_learnts: 0,
            max_learnts: LEARNT_BASE,
            units: vec![],
            watches: vec![vec![], vec![]],
            inconsistent: false,
            state: SolverState {
                variables: vec![VariableState::new(false)],
                ..Default::default()
            },
            activity_inc: 1.0,
            rng: StdRng::seed_from_u64(0),
            options: BackendOptions::default(),
            stats: Stats::default(),
        }
    }

    fn default_phase(&self) -> bool {
        match (self.options.initial_phase, self.options.expected) {
            (Some(phase), _) => phase,
            (None, ExpectedOutcome::LikelySat) => true,
            (None, _) => false,
        }
    }

    fn restart_base(&self) -> u64 {
        match self.options.expected {
            ExpectedOutcome::LikelyUnsat => 50,
            ExpectedOutcome::LikelySat => 200,
            ExpectedOutcome::Unknown => 100,
        }
    }

    fn grow(&mut self, num_variables: usize) {
        let phase = self.default_phase();
        while self.state.variables.len() <= num_variables {
            let mut var = VariableState::new(phase);
            if self.options.seed.is_some() {
                var.activity = self.rng.gen::<f64>() * 1e-5;
            }
            self.state.variables.push(var);
            self.watches.push(vec![]);
            self.watches.push(vec![]);
        }
    }

    fn num_variables(&self) -> usize {
        self.state.variables.len() - 1
    }

    /// Level for a report that should surface once `verbosity` reaches `threshold`.
    fn report_level(&self, threshold: u32) -> Level {
        if self.options.verbosity >= threshold {
            Level::Info
        } else {
            Level::Trace
        }
    }

    fn push_clause(&mut self, literals: Vec<Literal>, learnt: bool) -> ClauseIdx {
        let idx = ClauseIdx(self.clauses.len());
        self.watches[literals[0].code()].push(idx);
        self.watches[literals[1].code()].push(idx);
        self.clauses.push(literals);
        self.info.push(ClauseInfo { learnt, used: false });
        if learnt {
            self.num_learnts += 1;
        }
        idx
    }

    /// Drops the long learnt clauses that took no part in conflict analysis
    /// since the previous reduction. Only called at decision level 0 with
    /// propagation complete: the surviving clauses keep their watched
    /// literals in front, so rebuilding the watch lists preserves the watch
    /// invariant, and level-0 reasons are never consulted by analysis.
    fn reduce_learnts(&mut self) {
        debug_assert_eq!(self.state.decision_level(), DecisionLevel(0));
        let before = self.num_learnts;
        let clauses = std::mem::take(&mut self.clauses);
        let info = std::mem::take(&mut self.info);
        self.num_learnts = 0;
        for (clause, info) in clauses.into_iter().zip(info) {
            if info.learnt && !info.used && clause.len() > KEPT_LEARNT_LEN {
                continue;
            }
            self.clauses.push(clause);
            self.info.push(ClauseInfo { used: false, ..info });
            if info.learnt {
                self.num_learnts += 1;
            }
        }
        for watchers in &mut self.watches {
            watchers.clear();
        }
        for (i, clause) in self.clauses.iter().enumerate() {
            self.watches[clause[0].code()].push(ClauseIdx(i));
            self.watches[clause[1].code()].push(ClauseIdx(i));
        }
        for literal in &self.state.trail {
            self.state.variables[literal.idx()].reason = None;
        }
        self.max_learnts = (self.max_learnts as f64 * LEARNT_GROWTH) as usize;
        self.stats.reductions += 1;
        log!(
            self.report_level(2),
            "cdcl: reduced learnt clauses {} -> {}, next limit {}",
            before,
            self.num_learnts,
            self.max_learnts
        );
    }

    /// Unassigns everything, including level 0, so that clauses added since
    /// the last query are seen by propagation from scratch.
    fn reset(&mut self) {
        for literal in self.state.trail.drain(..) {
            self.state.variables[literal.idx()].clear();
        }
        self.state.trail_lim.clear();
        self.state.qhead = 0;
    }

    pub(crate) fn solve_with_stop(
        &mut self,
        num_variables: usize,
        deadline: Option<Instant>,
        assumptions: &[Literal],
        stop: &AtomicBool,
    ) -> BackendResult {
        self.grow(num_variables);
        if let Some(max) = assumptions.iter().map(|l| l.idx()).max() {
            self.grow(max);
        }
        self.reset();
        if self.inconsistent {
            return BackendResult::Unsatisfiable;
        }
        for i in 0..self.units.len() {
            let unit = self.units[i];
            match self.state.assignment_for(&unit) {
                Assignment::True => {}
                Assignment::False => {
                    self.inconsistent = true;
                    return BackendResult::Unsatisfiable;
                }
                Assignment::Undecided => self.state.assign(unit, None),
            }
        }

        let start = self.stats;
        let mut restart_limit = self.restart_base();
        let mut conflicts_since_restart = 0;
        let mut iterations = 0u64;
        let result = loop {
            if iterations % DEADLINE_CHECK_INTERVAL == 0 {
                let expired = deadline.map_or(false, |d| Instant::now() >= d);
                if expired || stop.load(Ordering::Relaxed) {
                    break BackendResult::Undecided;
                }
            }
            iterations += 1;

            if let Some(conflict) = self.propagate() {
                self.stats.conflicts += 1;
                conflicts_since_restart += 1;
                if self.state.decision_level() == DecisionLevel(0) {
                    self.inconsistent = true;
                    break BackendResult::Unsatisfiable;
                }
                let (learnt, level) = self.analyze_conflict(conflict);
                self.backtrack(level);
                self.learn(learnt);
                self.activity_inc /= ACTIVITY_DECAY;
                continue;
            }

            if conflicts_since_restart >= restart_limit {
                self.stats.restarts += 1;
                self.backtrack(DecisionLevel(0));
                conflicts_since_restart = 0;
                restart_limit += restart_limit / 2;
                log!(
                    self.report_level(2),
                    "cdcl: restart {}, next after {} conflicts",
                    self.stats.restarts,
                    restart_limit
                );
                if self.num_learnts > self.max_learnts {
                    self.reduce_learnts();
                }
            }

            let level = self.state.decision_level().0;
            if level < assumptions.len() {
                let assumption = assumptions[level];
                match self.state.assignment_for(&assumption) {
                    Assignment::True => self.state.new_decision_level(),
                    Assignment::False => break BackendResult::Unsatisfiable,
                    Assignment::Undecided => {
                        self.state.new_decision_level();
                        self.state.assign(assumption, None);
                    }
                }
                continue;
            }

            match self.decide() {
                None => break BackendResult::Satisfiable(self.model()),
                Some(literal) => {
                    self.stats.decisions += 1;
                    self.state.new_decision_level();
                    self.state.assign(literal, None);
                }
            }
        };

        let level = if self.options.verbosity >= 1 { Level::Info } else { Level::Debug };
        log!(
            level,
            "cdcl: {:?} after {} decisions, {} conflicts, {} propagations, {} restarts, {} learnt clauses",
            result.status(),
            self.stats.decisions - start.decisions,
            self.stats.conflicts - start.conflicts,
            self.stats.propagations - start.propagations,
            self.stats.restarts - start.restarts,
            self.num_learnts,
        );
        result
    }

    fn model(&self) -> Vec<bool> {
        self.state
            .variables
            .iter()
            .map(|v| v.assignment == Assignment::True)
            .collect()
    }

    fn propagate(&mut self) -> Option<ClauseIdx> {
        while self.state.qhead < self.state.trail.len() {
            let p = self.state.trail[self.state.qhead];
            self.state.qhead += 1;
            self.stats.propagations += 1;

            let false_lit = p.negated();
            let mut watchers = std::mem::take(&mut self.watches[false_lit.code()]);
            let mut conflict = None;
            let mut i = 0;
            'watchers: while i < watchers.len() {
                let ci = watchers[i];
                let clause = &mut self.clauses[ci.0];
                if clause[0] == false_lit {
                    clause.swap(0, 1);
                }
                let first = clause[0];
                // true => this clause is satisfied
                if self.state.assignment_for(&first) == Assignment::True {
                    i += 1;
                    continue;
                }
                // look for another literal to watch instead of the false one
                for k in 2..clause.len() {
                    if self.state.assignment_for(&clause[k]) != Assignment::False {
                        clause.swap(1, k);
                        self.watches[clause[1].code()].push(ci);
                        watchers.swap_remove(i);
                        continue 'watchers;
                    }
                }
                // every other literal is false => unit or conflict
                if self.state.assignment_for(&first) == Assignment::False {
                    conflict = Some(ci);
                    break;
                }
                self.state.assign(first, Some(ci));
                i += 1;
            }
            self.watches[false_lit.code()] = watchers;

            if conflict.is_some() {
                self.state.qhead = self.state.trail.len();
                return conflict;
            }
        }
        None
    }

    fn decide(&self) -> Option<Literal> {
        let mut best: Option<(usize, f64)> = None;
        for (i, state) in self.state.variables.iter().enumerate().skip(1) {
            if state.assignment == Assignment::Undecided && best.map_or(true, |(_, a)| state.activity > a) {
                best = Some((i, state.activity));
            }
        }
        best.map(|(i, _)| {
            let v = Variable(i);
            if self.state.variables[i].phase {
                Literal::Positive(v)
            } else {
                Literal::Negative(v)
            }
        })
    }

    fn bump(&mut self, var: usize) {
        let activity = &mut self.state.variables[var].activity;
        *activity += self.activity_inc;
        if *activity > 1e100 {
            for v in &mut self.state.variables {
                v.activity *= 1e-100;
            }
            self.activity_inc *= 1e-100;
        }
    }

    /// First-UIP conflict analysis. Returns the learned clause with the
    /// asserting literal first and the literal of the backtrack level second.
    fn analyze_conflict(&mut self, conflict: ClauseIdx) -> (Vec<Literal>, DecisionLevel) {
        let current = self.state.decision_level();
        let mut seen = vec![false; self.state.variables.len()];
        let mut learnt = vec![];
        let mut frontier = 0;
        let mut trail_end = self.state.trail.len();
        let mut reason = conflict;
        let mut implied: Option<Literal> = None;

        let asserting = loop {
            self.info[reason.0].used = true;
            for k in 0..self.clauses[reason.0].len() {
                let l = self.clauses[reason.0][k];
                if Some(l) == implied {
                    continue;
                }
                let v = l.idx();
                if seen[v] || self.state.level_of(&l) == DecisionLevel(0) {
                    continue;
                }
                seen[v] = true;
                self.bump(v);
                if self.state.level_of(&l) >= current {
                    frontier += 1;
                } else {
                    learnt.push(l);
                }
            }

            let uip = loop {
                trail_end -= 1;
                let l = self.state.trail[trail_end];
                if seen[l.idx()] {
                    break l;
                }
            };
            seen[uip.idx()] = false;
            frontier -= 1;
            if frontier == 0 {
                break uip.negated();
            }
            implied = Some(uip);
            reason = match self.state.variables[uip.idx()].reason {
                Some(r) => r,
                None => unreachable!("only the first UIP can be a decision"),
            };
        };

        let level = match (0..learnt.len()).max_by_key(|&i| self.state.level_of(&learnt[i])) {
            Some(i) => {
                learnt.swap(0, i);
                self.state.level_of(&learnt[0])
            }
            None => DecisionLevel(0),
        };
        learnt.insert(0, asserting);

        trace!(
            "conflict clause {}, backtrack to level {}",
            Clause::new(learnt.iter().copied()),
            level.0
        );
        (learnt, level)
    }

    fn learn(&mut self, learnt: Vec<Literal>) {
        let asserting = learnt[0];
        if learnt.len() == 1 {
            self.units.push(asserting);
            self.state.assign(asserting, None);
        } else {
            let idx = self.push_clause(learnt, true);
            self.state.assign(asserting, Some(idx));
        }
    }

    fn backtrack(&mut self, level: DecisionLevel) {
        if self.state.decision_level() <= level {
            return;
        }
        let start = self.state.trail_lim[level.0];
        log::trace!(
            "backtrack: dropping to {} from {}",
            start,
            self.state.trail.len()
        );
        for literal in self.state.trail.split_off(start) {
            let var = &mut self.state.variables[literal.idx()];
            var.phase = literal.is_positive();
            var.clear();
        }
        self.state.trail_lim.truncate(level.0);
        self.state.qhead = start;
    }
}

impl Backend for Cdcl {
    fn name(&self) -> &'static str {
        "cdcl"
    }

    fn configure(&mut self, options: &BackendOptions) -> Result<()> {
        single_threaded(self.name(), options)?;
        self.options = options.clone();
        if let Some(seed) = options.seed {
            self.rng = StdRng::seed_from_u64(seed);
        }
        let phase = self.default_phase();
        for var in &mut self.state.variables {
            var.phase = phase;
        }
        Ok(())
    }

    fn add_clause(&mut self, literals: &[Literal]) {
        let mut literals = literals.to_vec();
        literals.sort();
        literals.dedup();
        // duplicates are gone, so two adjacent literals on one variable are complementary
        if literals.windows(2).any(|w| w[0].variable() == w[1].variable()) {
            return;
        }
        if let Some(max) = literals.iter().map(|l| l.idx()).max() {
            if max > self.num_variables() {
                self.grow(max);
            }
        }
        match literals.len() {
            0 => self.inconsistent = true,
            1 => self.units.push(literals[0]),
            _ => {
                self.push_clause(literals, false);
            }
        }
    }

    fn solve(&mut self, num_variables: usize, deadline: Option<Instant>, assumptions: &[Literal]) -> BackendResult {
        self.solve_with_stop(num_variables, deadline, assumptions, &AtomicBool::new(false))
    }
}

use crate::backend::{BackendKind, BackendOptions, ExpectedOutcome};
use crate::card::CardinalityEncoding;
use std::time::Duration;

/// How [`crate::SearchStrategy::Focused`] picks the next bound to probe.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OptimizationFocus {
    /// Probe the middle of the open range.
    Bisection,
    /// Probe just above the incumbent, looking for any improvement.
    Incumbent,
    /// Probe the top of the range, trying to prove the bound.
    Bound,
}

impl Default for OptimizationFocus {
    fn default() -> Self {
        OptimizationFocus::Bisection
    }
}

/// Knobs read by a [`crate::Model`]. They are applied to the backend when it is
/// instantiated, so changes only take effect from the next solve onwards.
#[derive(Clone, Debug)]
pub struct Config {
    pub backend: BackendKind,
    pub threads: usize,
    pub seed: Option<u64>,
    pub initial_phase: Option<bool>,
    pub verbosity: u32,
    pub time_limit: Option<Duration>,
    pub focus: OptimizationFocus,
    pub expected: ExpectedOutcome,
    /// Encoding used by cardinality helpers called without an explicit one.
    pub cardinality: CardinalityEncoding,
    /// Clauses longer than this are split with chaining auxiliaries; 0 disables.
    pub clause_split: usize,
    /// Linear comparisons against targets below this use a sequential counter,
    /// larger ones go through binary adders.
    pub counter_threshold: i64,
    /// Emit the redundant `t & e -> z` / `!t & !e -> !z` clauses for if-then-else.
    pub ite_arc_consistency: bool,
    /// Emit the redundant propagation clause per full-adder bit.
    pub arith_arc_consistency: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            backend: BackendKind::default(),
            threads: 1,
            seed: None,
            initial_phase: None,
            verbosity: 0,
            time_limit: None,
            focus: OptimizationFocus::default(),
            expected: ExpectedOutcome::default(),
            cardinality: CardinalityEncoding::Sequential,
            clause_split: 1000,
            counter_threshold: 64,
            ite_arc_consistency: true,
            arith_arc_consistency: true,
        }
    }
}

impl Config {
    pub fn backend_options(&self) -> BackendOptions {
        BackendOptions {
            threads: self.threads,
            seed: self.seed,
            initial_phase: self.initial_phase,
            verbosity: self.verbosity,
            expected: self.expected,
        }
    }
}

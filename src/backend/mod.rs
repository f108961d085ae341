//! The narrow contract between the encoding layer and a SAT engine.
//!
//! A backend accepts clauses, is told how many variables exist, and answers one
//! query at a time under an optional absolute deadline and a list of assumption
//! literals. Engines keep their clause database between calls, so the model only
//! ever sends clauses it has not sent before.

pub mod brute_force;
pub mod cdcl;
pub mod portfolio;

use crate::error::Result;
use crate::formula::Literal;
use crate::SatResult;
use std::time::Instant;

/// Which engine a [`crate::Model`] instantiates.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BackendKind {
    Cdcl,
    BruteForce,
    Portfolio,
}

impl Default for BackendKind {
    fn default() -> Self {
        BackendKind::Cdcl
    }
}

impl BackendKind {
    pub fn create(&self) -> Box<dyn Backend> {
        match self {
            BackendKind::Cdcl => Box::new(cdcl::Cdcl::new()),
            BackendKind::BruteForce => Box::new(brute_force::BruteForce::new()),
            BackendKind::Portfolio => Box::new(portfolio::Portfolio::new()),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "cdcl" => Ok(BackendKind::Cdcl),
            "brute-force" => Ok(BackendKind::BruteForce),
            "portfolio" => Ok(BackendKind::Portfolio),
            _ => Err(format!("unknown backend '{}'", s)),
        }
    }
}

/// Hint about the likely answer, which engines may use to tune their search.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ExpectedOutcome {
    Unknown,
    LikelySat,
    LikelyUnsat,
}

impl Default for ExpectedOutcome {
    fn default() -> Self {
        ExpectedOutcome::Unknown
    }
}

/// Engine-specific knobs, applied once before the first query.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BackendOptions {
    pub threads: usize,
    pub seed: Option<u64>,
    pub initial_phase: Option<bool>,
    pub verbosity: u32,
    pub expected: ExpectedOutcome,
}

pub enum BackendResult {
    /// Satisfying assignment indexed by variable id (index 0 is unused).
    Satisfiable(Vec<bool>),
    Unsatisfiable,
    Undecided,
}

impl BackendResult {
    pub fn status(&self) -> SatResult {
        match self {
            BackendResult::Satisfiable(_) => SatResult::Satisfiable,
            BackendResult::Unsatisfiable => SatResult::Unsatisfiable,
            BackendResult::Undecided => SatResult::Undecided,
        }
    }
}

pub trait Backend: Send {
    fn name(&self) -> &'static str;

    /// Fails with [`crate::Error::Unsupported`] when the engine cannot honour an option.
    fn configure(&mut self, options: &BackendOptions) -> Result<()>;

    fn add_clause(&mut self, literals: &[Literal]);

    /// Must return [`BackendResult::Undecided`] once `deadline` has passed.
    fn solve(&mut self, num_variables: usize, deadline: Option<Instant>, assumptions: &[Literal]) -> BackendResult;
}

pub(crate) fn single_threaded(backend: &'static str, options: &BackendOptions) -> Result<()> {
    if options.threads > 1 {
        return Err(crate::Error::Unsupported {
            backend,
            option: format!("{} threads", options.threads),
        });
    }
    Ok(())
}

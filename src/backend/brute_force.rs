use crate::backend::{single_threaded, Backend, BackendOptions, BackendResult};
use crate::error::{Error, Result};
use crate::formula::{Clause, Literal};
use log::warn;
use std::time::Instant;

/// Exhaustive search over every assignment. Only usable for tiny instances,
/// which makes it a convenient reference engine in tests.
#[derive(Default)]
pub struct BruteForce {
    clauses: Vec<Clause>,
}

pub const MAX_VARIABLES: usize = 24;

impl BruteForce {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for BruteForce {
    fn name(&self) -> &'static str {
        "brute-force"
    }

    fn configure(&mut self, options: &BackendOptions) -> Result<()> {
        single_threaded(self.name(), options)?;
        if options.seed.is_some() {
            return Err(Error::Unsupported {
                backend: self.name(),
                option: "random seed".into(),
            });
        }
        Ok(())
    }

    fn add_clause(&mut self, literals: &[Literal]) {
        self.clauses.push(Clause::new(literals.iter().copied()));
    }

    fn solve(&mut self, num_variables: usize, deadline: Option<Instant>, assumptions: &[Literal]) -> BackendResult {
        let num_variables = self
            .clauses
            .iter()
            .flat_map(|c| c.literals().map(|l| l.idx()))
            .chain(assumptions.iter().map(|l| l.idx()))
            .fold(num_variables, usize::max);
        if num_variables > MAX_VARIABLES {
            warn!("brute-force: {} variables is too many to enumerate", num_variables);
            return BackendResult::Undecided;
        }

        let mut assignment = vec![false; num_variables + 1];
        'search: for bits in 0..1u64 << num_variables {
            if bits % 4096 == 0 && deadline.map_or(false, |d| Instant::now() >= d) {
                return BackendResult::Undecided;
            }
            for (x, value) in assignment.iter_mut().enumerate().skip(1) {
                *value = bits & (1 << (x - 1)) != 0;
            }
            if !assumptions.iter().all(|l| l.value_in(&assignment)) {
                continue 'search;
            }
            for clause in &self.clauses {
                if !clause.is_satisfied_by(&assignment) {
                    // this assignment is bogus
                    continue 'search;
                }
            }
            // if we got here, every clause was satisfied
            return BackendResult::Satisfiable(assignment);
        }
        // no assignment is valid
        BackendResult::Unsatisfiable
    }
}

use crate::backend::cdcl::Cdcl;
use crate::backend::{Backend, BackendOptions, BackendResult};
use crate::error::Result;
use crate::formula::Literal;
use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Instant;

/// Races several differently seeded CDCL workers on the same clauses and
/// reports whichever decides first. Every worker keeps its own clause
/// database, so incremental queries stay incremental per worker.
pub struct Portfolio {
    workers: Vec<Cdcl>,
}

impl Default for Portfolio {
    fn default() -> Self {
        Self::new()
    }
}

impl Portfolio {
    pub fn new() -> Self {
        Self {
            workers: vec![Cdcl::new()],
        }
    }
}

impl Backend for Portfolio {
    fn name(&self) -> &'static str {
        "portfolio"
    }

    fn configure(&mut self, options: &BackendOptions) -> Result<()> {
        let threads = options.threads.max(1);
        let base_seed = options.seed.unwrap_or(0);
        self.workers = (0..threads)
            .map(|i| {
                let mut worker = Cdcl::new();
                let worker_options = BackendOptions {
                    threads: 1,
                    // worker 0 keeps the caller's exact configuration
                    seed: if i == 0 { options.seed } else { Some(base_seed.wrapping_add(i as u64)) },
                    initial_phase: if i == 0 { options.initial_phase } else { Some(i % 2 == 1) },
                    ..options.clone()
                };
                worker.configure(&worker_options).map(|_| worker)
            })
            .collect::<Result<_>>()?;
        Ok(())
    }

    fn add_clause(&mut self, literals: &[Literal]) {
        for worker in &mut self.workers {
            worker.add_clause(literals);
        }
    }

    fn solve(&mut self, num_variables: usize, deadline: Option<Instant>, assumptions: &[Literal]) -> BackendResult {
        if self.workers.len() == 1 {
            return self.workers[0].solve(num_variables, deadline, assumptions);
        }

        let stop = AtomicBool::new(false);
        let (sender, receiver) = mpsc::channel();
        thread::scope(|scope| {
            for (i, worker) in self.workers.iter_mut().enumerate() {
                let sender = sender.clone();
                let stop = &stop;
                scope.spawn(move || {
                    let result = worker.solve_with_stop(num_variables, deadline, assumptions, stop);
                    let _ = sender.send((i, result));
                });
            }
            drop(sender);

            let mut outcome = BackendResult::Undecided;
            for (i, result) in receiver.iter() {
                if let BackendResult::Undecided = result {
                    continue;
                }
                debug!("portfolio: worker {} decided {:?}", i, result.status());
                stop.store(true, Ordering::Relaxed);
                outcome = result;
                break;
            }
            outcome
        })
    }
}

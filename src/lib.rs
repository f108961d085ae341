//! Compiles boolean expressions, weighted sums and bounded integers into CNF
//! and drives a pluggable SAT backend over the result, including
//! branch-and-bound optimization and solution enumeration.

pub mod backend;
mod card;
mod config;
mod error;
mod expr;
pub mod formula;
mod linear;
mod model;
mod optimize;
mod uint;

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum SatResult {
    Satisfiable,
    Unsatisfiable,
    /// The deadline passed, or the engine gave up, before an answer was found.
    Undecided,
}

pub use card::{CardinalityEncoding, SortingMethod};
pub use config::{Config, OptimizationFocus};
pub use error::{Error, Result};
pub use expr::Expr;
pub use formula::{Clause, Formula, Literal, Variable};
pub use linear::{Cmp, LinExpr};
pub use model::{Model, ModelStatus};
pub use optimize::SearchStrategy;
pub use uint::UInt;

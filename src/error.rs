use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("expression is not in clausal form: {0}")]
    NotClausal(String),
    #[error("expected a literal or constant, got {0}")]
    NotLiteral(String),
    #[error("{0} requires at least one operand")]
    EmptyOperands(&'static str),
    #[error("backend {backend} does not support {option}")]
    Unsupported { backend: &'static str, option: String },
    #[error("invalid operation: {0}")]
    InvalidOperation(&'static str),
    #[error("objective has no finite upper bound")]
    UnboundedObjective,
    #[error("dimacs: {0}")]
    Dimacs(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

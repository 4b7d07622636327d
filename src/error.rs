use thiserror::Error;

/// Everything is fatal: a program either compiles wholesale or is rejected,
/// and no error is retried. Each variant carries enough source text to locate
/// the fault.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("badly formed program: {0}")]
    NotWellFormed(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("no consistent origin binding for {var} in rule: {rule}")]
    UnresolvedPolymorphism { var: String, rule: String },

    #[error("parse error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, Error>;

use thiserror::Error;

use crate::ir::ProgramPoint;

/// Failures surfaced by IR construction, analysis and queries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    /// Ill-typed or inconsistent IR. Rejected when the program is built.
    #[error("malformed IR: {0}")]
    MalformedIr(String),
    /// A language feature outside the modelled subset.
    #[error("unsupported construct: {0}")]
    UnsupportedConstruct(String),
    #[error("unknown program point: {0:?}")]
    UnknownProgramPoint(ProgramPoint),
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    /// The fixpoint did not settle within the configured number of steps.
    /// Well-formed input never hits this, so it signals an internal error.
    #[error("fixpoint for `{function}` exceeded {limit} iterations")]
    IterationLimit { function: String, limit: usize },
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;

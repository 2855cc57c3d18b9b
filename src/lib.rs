//! Must-alias and escape analysis for a small C-like IR.
//!
//! Build a `Program` with `ir::ProgramBuilder`, then run `Analysis::new` and
//! query it:
//!
//! * `must_alias_groups` / `must_alias_names`: pointer lvalues that hold the
//!   same address at a program point,
//! * `escaping_allocations` / `escaping_variables`: heap objects that outlive
//!   the function allocating them.
//!
//! Diagnostics go through the `log` facade; set `RUST_LOG=debug` with any
//! `log` backend to follow the transfer decisions.
pub mod callgraph;
pub mod config;
pub mod error;
pub mod escape_analysis;
pub mod ir;
pub mod location;
pub mod pointer_analysis;
pub mod query;
mod util;

pub use config::AnalysisConfig;
pub use error::{AnalysisError, Result};
pub use escape_analysis::{EscapeRecord, EscapeRoute};
pub use ir::{FuncId, Location, Program, ProgramBuilder, ProgramPoint, SiteId, VarId};
pub use location::{LocId, PointsToSet};
pub use query::{Analysis, Lvalue};

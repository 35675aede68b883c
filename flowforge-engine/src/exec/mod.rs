//! Script execution
//!
//! Materializes script bodies to temp files, launches them under the host
//! interpreter with injected environment, streams line-buffered output, and
//! enforces wall-clock timeouts. Also owns the registry of builtin recipe
//! scripts the pipeline engine references by name.

pub mod executor;
pub mod recipes;

pub use executor::{
    ExecuteOptions, ExecuteResult, LineCallback, ScriptError, ScriptExecutor, ScriptKind,
    StreamKind,
};

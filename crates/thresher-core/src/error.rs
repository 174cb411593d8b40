//! Error types for thresher-core.

use thiserror::Error;

/// Result type for thresher-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building or running a scan graph.
#[derive(Debug, Error)]
pub enum Error {
    /// Deferred expression compilation failed; carries the compiler's diagnostic.
    #[error("compilation failed: {0}")]
    Compilation(String),

    /// A node referenced a column that is neither booked nor provided by the source.
    #[error("column not found: {0}")]
    ColumnNotFound(String),

    /// Cyclic dependency detected between booked columns.
    #[error("cyclic column dependency: {0}")]
    CyclicDependency(String),

    /// A booking referenced an invalid node or carried invalid parameters.
    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    /// The entry store failed while streaming entries to a worker.
    #[error("source error: {0}")]
    Source(String),

    /// An action or filter failed while processing an entry.
    #[error("execution error: {0}")]
    Execution(String),
}

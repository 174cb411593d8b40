//! Expression-compilation collaborator.

/// Service that materializes user-supplied source fragments into callable
/// code.
///
/// The manager accumulates fragments while the graph is being booked and
/// flushes them in one batch at the start of a run; how a fragment is
/// compiled (and what it books as a side effect) is entirely the
/// collaborator's business. A failed fragment aborts the pending run before
/// any node touches data.
pub trait ExpressionCompiler: Send + Sync {
    /// Compile one source fragment. `Err` carries the diagnostic text
    /// surfaced to the caller as a run-level failure.
    fn compile(&self, fragment: &str) -> Result<(), String>;
}

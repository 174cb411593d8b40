//! Core engine for thresher scan graphs.
//!
//! This crate provides:
//! - Booking of derived columns, filters, actions, and range limiters into a
//!   declarative scan graph
//! - Sequential and multi-threaded loops over synthetic or store-backed
//!   entry sequences, partitioned across a fixed pool of worker slots
//! - Exact per-filter pass/reject bookkeeping and reporting
//! - Clean-up and re-booking so one graph can run repeatedly

pub mod compile;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod slot;
pub mod source;
pub mod value;

pub use compile::ExpressionCompiler;
pub use config::EngineConfig;
pub use engine::{FilterSummary, LoopManager, Report, Row};
pub use error::{Error, Result};
pub use graph::{ActionId, ActionOp, ColumnEval, ColumnId, FilterId, FilterPredicate, Gate, RangeId};
pub use slot::SlotPool;
pub use source::{EntryReader, EntrySource, EntryStore, PartitionVisitor, partition_entries};
pub use value::Value;

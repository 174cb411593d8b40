//! Entry-store collaborator traits.
//!
//! The engine never opens files or decodes storage formats itself; a backing
//! store hands it readers that stream entries, and the engine drives the
//! graph once per streamed entry.

use crate::error::Result;
use crate::value::Value;

/// Cursor over one partition of entries.
///
/// `next` advances to the next entry and returns `false` once the partition
/// is exhausted; `entry_index` and `read` are only meaningful after `next`
/// returned `true`.
pub trait EntryReader {
    fn next(&mut self) -> bool;

    /// Index of the current entry within this partition's container.
    fn entry_index(&self) -> i64;

    /// Whether the store provides a column under this name.
    fn has_column(&self, name: &str) -> bool;

    /// Read a column value at the current entry.
    fn read(&self, name: &str) -> Result<Value>;
}

/// Per-partition visitor handed to [`EntryStore::process_parallel`].
pub type PartitionVisitor<'a> = dyn Fn(&mut dyn EntryReader) -> Result<()> + Sync + 'a;

/// A backing store of entries, possibly spanning multiple physical
/// containers transparently.
pub trait EntryStore: Send + Sync {
    /// A reader over every entry, for sequential scans.
    fn reader(&self) -> Result<Box<dyn EntryReader + '_>>;

    /// Partition the store and invoke `visit` once per partition reader,
    /// possibly concurrently. Every entry must be delivered to exactly one
    /// partition, and at most `n_partitions` visits may be in flight at once
    /// (the caller sizes its slot pool to that). The first visitor error
    /// aborts the scan and is returned.
    fn process_parallel(&self, n_partitions: usize, visit: &PartitionVisitor<'_>) -> Result<()>;
}

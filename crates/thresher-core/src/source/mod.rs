//! Entry sources and partitioned iteration.
//!
//! An [`EntrySource`] produces the entries a loop runs over: either a
//! synthetic count with no backing data, or entries streamed from an
//! [`EntryStore`] collaborator. Both variants expose sequential iteration on
//! the calling thread (slot 0) and partitioned-parallel iteration where each
//! partition task checks a slot id out of a [`SlotPool`] for its lifetime.

mod reader;

pub use reader::{EntryReader, EntryStore, PartitionVisitor};

use std::ops::Range;

use rayon::prelude::*;

use crate::error::Result;
use crate::slot::SlotPool;

/// Where a loop's entries come from.
pub enum EntrySource {
    /// A bare count of entries with no backing store.
    Synthetic { entries: u64 },
    /// Entries drawn from a backing store.
    Backed { store: Box<dyn EntryStore> },
}

/// One worker's share of a run: either a synthetic index range or a reader
/// streaming a store partition.
pub(crate) enum Partition<'a> {
    Range(Range<u64>),
    Reader(&'a mut dyn EntryReader),
}

impl EntrySource {
    pub fn synthetic(entries: u64) -> Self {
        EntrySource::Synthetic { entries }
    }

    pub fn backed(store: Box<dyn EntryStore>) -> Self {
        EntrySource::Backed { store }
    }

    /// Visit all entries on the calling thread as a single partition using
    /// slot 0.
    pub(crate) fn run_sequential(
        &self,
        body: &mut dyn FnMut(usize, Partition<'_>) -> Result<()>,
    ) -> Result<()> {
        match self {
            EntrySource::Synthetic { entries } => body(0, Partition::Range(0..*entries)),
            EntrySource::Backed { store } => {
                let mut reader = store.reader()?;
                body(0, Partition::Reader(&mut *reader))
            }
        }
    }

    /// Visit all entries across `n_slots` partition tasks.
    ///
    /// Each task pops a slot id, hands its partition to `body`, and pushes
    /// the id back. Every entry is delivered to exactly one task. Task
    /// failures are collected after the pool join and the first one is
    /// returned.
    pub(crate) fn run_parallel(
        &self,
        n_slots: usize,
        body: &(dyn Fn(usize, Partition<'_>) -> Result<()> + Sync),
    ) -> Result<()> {
        let slots = SlotPool::new(n_slots);
        match self {
            EntrySource::Synthetic { entries } => {
                let chunks = partition_entries(*entries, n_slots);
                let results: Vec<Result<()>> = chunks
                    .into_par_iter()
                    .map(|chunk| {
                        let slot = slots.pop();
                        let result = body(slot, Partition::Range(chunk));
                        slots.push(slot);
                        result
                    })
                    .collect();
                for result in results {
                    result?;
                }
                Ok(())
            }
            EntrySource::Backed { store } => store.process_parallel(n_slots, &|reader| {
                let slot = slots.pop();
                let result = body(slot, Partition::Reader(reader));
                slots.push(slot);
                result
            }),
        }
    }
}

/// Split `[0, count)` into up to `n_chunks` contiguous, near-equal ranges.
///
/// The first `count % n_chunks` ranges get one extra entry, so the ranges
/// cover every entry exactly once with no gaps or overlaps. Fewer than
/// `n_chunks` ranges are produced when there are not enough entries to go
/// around.
pub fn partition_entries(count: u64, n_chunks: usize) -> Vec<Range<u64>> {
    assert!(n_chunks > 0, "partitioning requires at least one chunk");
    let per_chunk = count / n_chunks as u64;
    let mut remainder = count % n_chunks as u64;
    let mut chunks = Vec::with_capacity(n_chunks);
    let mut start = 0;
    while start < count {
        let mut end = start + per_chunk;
        if remainder > 0 {
            end += 1;
            remainder -= 1;
        }
        chunks.push(start..end);
        start = end;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_exact_cover(count: u64, n_chunks: usize) {
        let chunks = partition_entries(count, n_chunks);
        let mut expected = 0;
        for chunk in &chunks {
            assert_eq!(chunk.start, expected, "gap or overlap at {expected}");
            assert!(chunk.start < chunk.end, "empty chunk");
            expected = chunk.end;
        }
        assert_eq!(expected, count);
    }

    #[test]
    fn test_partitions_cover_exactly() {
        for count in [0, 1, 2, 7, 10, 100, 101, 1023] {
            for n_chunks in [1, 2, 3, 4, 7, 16] {
                assert_exact_cover(count, n_chunks);
            }
        }
    }

    #[test]
    fn test_remainder_spread_over_leading_chunks() {
        let chunks = partition_entries(10, 4);
        let sizes: Vec<u64> = chunks.iter().map(|c| c.end - c.start).collect();
        assert_eq!(sizes, vec![3, 3, 2, 2]);
    }

    #[test]
    fn test_fewer_entries_than_chunks() {
        let chunks = partition_entries(2, 5);
        assert_eq!(chunks, vec![0..1, 1..2]);
    }

    #[test]
    fn test_zero_entries_yields_no_chunks() {
        assert!(partition_entries(0, 3).is_empty());
    }

    #[test]
    fn test_single_chunk_takes_everything() {
        assert_eq!(partition_entries(9, 1), vec![0..9]);
    }

    #[test]
    fn test_parallel_synthetic_visits_every_entry_once() {
        use std::sync::Mutex;

        let source = EntrySource::synthetic(100);
        let seen = Mutex::new(vec![0u32; 100]);
        source
            .run_parallel(4, &|_slot, partition| {
                let Partition::Range(range) = partition else {
                    panic!("synthetic source must hand out ranges");
                };
                let mut seen = seen.lock().unwrap();
                for entry in range {
                    seen[entry as usize] += 1;
                }
                Ok(())
            })
            .unwrap();
        assert!(seen.into_inner().unwrap().iter().all(|&n| n == 1));
    }
}

//! Per-slot mutable state.
//!
//! Everything a node mutates while processing entries lives here, one frame
//! per worker slot. A partition task locks its slot's frame once for the
//! whole partition, so the per-entry hot path touches no synchronization.

use crate::value::Value;

/// Memo cell of a derived column for one slot.
pub(crate) struct ColumnSlot {
    pub last_entry: i64,
    pub value: Value,
}

impl ColumnSlot {
    pub fn cached(&self, entry: i64) -> Option<Value> {
        (self.last_entry == entry).then(|| self.value.clone())
    }
}

/// Memo cell and pass/reject counters of a filter for one slot.
pub(crate) struct FilterSlot {
    pub last_entry: i64,
    pub last_result: bool,
    pub accepted: u64,
    pub rejected: u64,
}

impl FilterSlot {
    pub fn cached(&self, entry: i64) -> Option<bool> {
        (self.last_entry == entry).then_some(self.last_result)
    }
}

/// Cursor state of a range limiter for one slot.
pub(crate) struct RangeSlot {
    pub last_entry: i64,
    pub last_result: bool,
    /// Partition-relative position among entries whose upstream gates passed.
    pub position: u64,
    pub exhausted: bool,
}

impl RangeSlot {
    pub fn cached(&self, entry: i64) -> Option<bool> {
        (self.last_entry == entry).then_some(self.last_result)
    }
}

/// One worker slot's state for every booked node, plus the stop-signal tally
/// sequential loops use for early termination.
pub(crate) struct SlotFrame {
    pub columns: Vec<ColumnSlot>,
    pub filters: Vec<FilterSlot>,
    pub ranges: Vec<RangeSlot>,
    pub stops_received: u64,
}

impl SlotFrame {
    /// A fresh frame with zeroed counters, sized to the booked graph.
    pub fn new(n_columns: usize, n_filters: usize, n_ranges: usize) -> Self {
        Self {
            columns: (0..n_columns)
                .map(|_| ColumnSlot {
                    last_entry: -1,
                    value: Value::Null,
                })
                .collect(),
            filters: (0..n_filters)
                .map(|_| FilterSlot {
                    last_entry: -1,
                    last_result: false,
                    accepted: 0,
                    rejected: 0,
                })
                .collect(),
            ranges: (0..n_ranges)
                .map(|_| RangeSlot {
                    last_entry: -1,
                    last_result: false,
                    position: 0,
                    exhausted: false,
                })
                .collect(),
            stops_received: 0,
        }
    }

    /// Reset cursor state ahead of a partition, leaving counters untouched.
    pub fn reset_cursors(&mut self) {
        for column in &mut self.columns {
            column.last_entry = -1;
            column.value = Value::Null;
        }
        for filter in &mut self.filters {
            filter.last_entry = -1;
            filter.last_result = false;
        }
        for range in &mut self.ranges {
            range.last_entry = -1;
            range.last_result = false;
            range.position = 0;
            range.exhausted = false;
        }
    }
}

//! Per-entry evaluation context and the dispatch protocol.

use crate::error::{Error, Result};
use crate::graph::{ActionId, ColumnId, FilterId, Gate, NodeRegistry, RangeId};
use crate::source::EntryReader;
use crate::value::Value;

use super::frame::SlotFrame;

/// View of one entry on one slot, handed to column, predicate, and action
/// closures.
///
/// Column reads are memoized per (slot, entry): evaluating the same column
/// twice during one entry's dispatch runs its closure once. Filter checks
/// are memoized the same way, and their pass/reject counters move exactly
/// once per distinct entry no matter how many consumers ask.
pub struct Row<'a> {
    nodes: &'a NodeRegistry,
    frame: &'a mut SlotFrame,
    reader: Option<&'a dyn EntryReader>,
    slot: usize,
    entry: i64,
}

impl<'a> Row<'a> {
    pub(crate) fn new(
        nodes: &'a NodeRegistry,
        frame: &'a mut SlotFrame,
        reader: Option<&'a dyn EntryReader>,
        slot: usize,
        entry: i64,
    ) -> Self {
        Self {
            nodes,
            frame,
            reader,
            slot,
            entry,
        }
    }

    /// The entry index within the current partition's container.
    pub fn entry(&self) -> i64 {
        self.entry
    }

    /// The worker slot processing this entry.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Current value of a column: a booked derived column if the name
    /// resolves to one, otherwise a column provided by the partition's
    /// reader.
    pub fn value(&mut self, name: &str) -> Result<Value> {
        if let Some(id) = self.nodes.column_id(name) {
            return self.column_value(id);
        }
        if let Some(reader) = self.reader {
            if reader.has_column(name) {
                return reader.read(name);
            }
        }
        Err(Error::ColumnNotFound(name.to_string()))
    }

    pub(crate) fn column_value(&mut self, id: ColumnId) -> Result<Value> {
        if let Some(value) = self.frame.columns[id.0].cached(self.entry) {
            return Ok(value);
        }
        let nodes = self.nodes;
        let column = nodes.column(id);
        let value = (column.eval)(self)?;
        let state = &mut self.frame.columns[id.0];
        state.last_entry = self.entry;
        state.value = value.clone();
        Ok(value)
    }

    /// Evaluate a filter for this (slot, entry), memoized.
    ///
    /// The predicate only runs when the filter's upstream gate chain passes;
    /// a failing chain yields `false` without moving the counters.
    pub(crate) fn check_filter(&mut self, id: FilterId) -> Result<bool> {
        if let Some(result) = self.frame.filters[id.0].cached(self.entry) {
            return Ok(result);
        }
        let nodes = self.nodes;
        let filter = nodes.filter(id);
        let result = if self.gate_passes(filter.parent)? {
            let passed = (filter.predicate)(self)?;
            let state = &mut self.frame.filters[id.0];
            if passed {
                state.accepted += 1;
            } else {
                state.rejected += 1;
            }
            passed
        } else {
            false
        };
        let state = &mut self.frame.filters[id.0];
        state.last_entry = self.entry;
        state.last_result = result;
        Ok(result)
    }

    /// Range-limiter membership for this (slot, entry), memoized.
    ///
    /// The limiter's position advances once per entry that reaches it (i.e.
    /// whose upstream gates passed). When the position reaches `stop` the
    /// limiter is exhausted: it contributes its children count to the
    /// frame's stop tally once and answers `false` from then on.
    pub(crate) fn check_range(&mut self, id: RangeId) -> Result<bool> {
        if let Some(result) = self.frame.ranges[id.0].cached(self.entry) {
            return Ok(result);
        }
        let nodes = self.nodes;
        let range = nodes.range(id);
        let result = if self.frame.ranges[id.0].exhausted {
            false
        } else if self.gate_passes(range.parent)? {
            let state = &mut self.frame.ranges[id.0];
            let position = state.position;
            state.position += 1;
            let passes = position >= range.start
                && (position - range.start) % range.stride == 0
                && (range.stop == 0 || position < range.stop);
            if range.stop != 0 && state.position >= range.stop {
                state.exhausted = true;
                self.frame.stops_received += u64::from(range.children);
            }
            passes
        } else {
            false
        };
        let state = &mut self.frame.ranges[id.0];
        state.last_entry = self.entry;
        state.last_result = result;
        Ok(result)
    }

    pub(crate) fn run_action(&mut self, id: ActionId) -> Result<()> {
        let nodes = self.nodes;
        let action = nodes.action(id);
        if self.gate_passes(action.parent)? {
            (action.op)(self)?;
        }
        Ok(())
    }

    fn gate_passes(&mut self, gate: Option<Gate>) -> Result<bool> {
        match gate {
            None => Ok(true),
            Some(Gate::Filter(id)) => self.check_filter(id),
            Some(Gate::Range(id)) => self.check_range(id),
        }
    }
}

/// Run one entry through the graph: every booked action in registration
/// order, then every *named* filter in registration order, unconditionally,
/// so reported statistics reflect true per-entry evaluation rather than
/// whatever the actions happened to pull.
pub(crate) fn dispatch_entry(
    nodes: &NodeRegistry,
    frame: &mut SlotFrame,
    reader: Option<&dyn EntryReader>,
    slot: usize,
    entry: i64,
) -> Result<()> {
    let mut row = Row::new(nodes, frame, reader, slot, entry);
    for id in nodes.action_ids() {
        row.run_action(id)?;
    }
    for id in nodes.named_filter_ids() {
        row.check_filter(id)?;
    }
    Ok(())
}

/// Prepare one slot for a partition: verify that every declared dependency
/// resolves, either to a booked column or to a column of the partition's
/// reader, and reset the frame's cursors. Columns are checked before actions
/// and filters, since consumers bind against them.
pub(crate) fn init_slot(
    nodes: &NodeRegistry,
    reader: Option<&dyn EntryReader>,
    frame: &mut SlotFrame,
) -> Result<()> {
    for column in nodes.columns() {
        require_deps(nodes, reader, &column.deps, &format!("column '{}'", column.name))?;
    }
    for (i, action) in nodes.actions().enumerate() {
        require_deps(nodes, reader, &action.deps, &format!("action #{i}"))?;
    }
    for filter in nodes.filters() {
        let what = if filter.has_name() {
            format!("filter '{}'", filter.name)
        } else {
            "anonymous filter".to_string()
        };
        require_deps(nodes, reader, &filter.deps, &what)?;
    }
    frame.reset_cursors();
    Ok(())
}

fn require_deps(
    nodes: &NodeRegistry,
    reader: Option<&dyn EntryReader>,
    deps: &[String],
    what: &str,
) -> Result<()> {
    for dep in deps {
        let resolved =
            nodes.column_id(dep).is_some() || reader.is_some_and(|r| r.has_column(dep));
        if !resolved {
            return Err(Error::ColumnNotFound(format!("{dep} (required by {what})")));
        }
    }
    Ok(())
}

//! Manager-owned registry of booked nodes.

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};

use super::node::{
    ActionId, ActionNode, ActionOp, ColumnEval, ColumnId, ColumnNode, FilterId, FilterNode,
    FilterPredicate, Gate, RangeId, RangeNode,
};

/// Owns every booked node and the ordered views the dispatch loop needs.
///
/// Nodes are held in per-kind arenas and addressed by typed ids, so graph
/// structure (who gates whom) is expressed as ids into the registry rather
/// than back-references between nodes.
pub(crate) struct NodeRegistry {
    columns: Vec<ColumnNode>,
    /// Column name -> id. Booking a second column under the same name
    /// rebinds the name; the newer column shadows the older one.
    column_ids: FxHashMap<String, ColumnId>,
    filters: Vec<FilterNode>,
    /// The reported subset of `filters`, in registration order.
    named_filters: Vec<FilterId>,
    actions: Vec<ActionNode>,
    ranges: Vec<RangeNode>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            columns: Vec::new(),
            column_ids: FxHashMap::default(),
            filters: Vec::new(),
            named_filters: Vec::new(),
            actions: Vec::new(),
            ranges: Vec::new(),
        }
    }

    pub fn add_column(
        &mut self,
        name: String,
        deps: Vec<String>,
        eval: Box<ColumnEval>,
    ) -> ColumnId {
        let id = ColumnId(self.columns.len());
        self.columns.push(ColumnNode {
            name: name.clone(),
            deps,
            eval,
        });
        self.column_ids.insert(name, id);
        id
    }

    pub fn add_filter(
        &mut self,
        name: String,
        deps: Vec<String>,
        parent: Option<Gate>,
        predicate: Box<FilterPredicate>,
    ) -> Result<(FilterId, bool)> {
        self.validate_gate(parent)?;
        let range_gated = self.bump_chain(parent, true);
        let id = FilterId(self.filters.len());
        let node = FilterNode {
            name,
            deps,
            parent,
            predicate,
            children: 0,
            structural_children: 0,
        };
        if node.has_name() {
            self.named_filters.push(id);
        }
        self.filters.push(node);
        Ok((id, range_gated))
    }

    pub fn add_action(
        &mut self,
        deps: Vec<String>,
        parent: Option<Gate>,
        op: Box<ActionOp>,
    ) -> Result<(ActionId, bool)> {
        self.validate_gate(parent)?;
        let range_gated = self.bump_chain(parent, false);
        let id = ActionId(self.actions.len());
        self.actions.push(ActionNode { deps, parent, op });
        Ok((id, range_gated))
    }

    pub fn add_range(
        &mut self,
        parent: Option<Gate>,
        start: u64,
        stop: u64,
        stride: u64,
    ) -> Result<RangeId> {
        if stride == 0 {
            return Err(Error::InvalidGraph("range stride must be at least 1".into()));
        }
        if stop != 0 && stop <= start {
            return Err(Error::InvalidGraph(format!(
                "range stop {stop} must be 0 (unbounded) or greater than start {start}"
            )));
        }
        self.validate_gate(parent)?;
        self.bump_chain(parent, true);
        let id = RangeId(self.ranges.len());
        self.ranges.push(RangeNode {
            parent,
            start,
            stop,
            stride,
            children: 0,
            structural_children: 0,
        });
        Ok(id)
    }

    fn validate_gate(&self, gate: Option<Gate>) -> Result<()> {
        match gate {
            Some(Gate::Filter(id)) if id.0 >= self.filters.len() => Err(Error::InvalidGraph(
                format!("unknown filter id {} in gate chain", id.0),
            )),
            Some(Gate::Range(id)) if id.0 >= self.ranges.len() => Err(Error::InvalidGraph(
                format!("unknown range id {} in gate chain", id.0),
            )),
            _ => Ok(()),
        }
    }

    /// Register a new downstream node on every ancestor of `gate`.
    ///
    /// Returns whether the chain contains a range limiter, i.e. whether the
    /// new node counts toward sequential early-termination bookkeeping.
    fn bump_chain(&mut self, gate: Option<Gate>, structural: bool) -> bool {
        let mut saw_range = false;
        let mut cursor = gate;
        while let Some(link) = cursor {
            match link {
                Gate::Filter(id) => {
                    let filter = &mut self.filters[id.0];
                    filter.children += 1;
                    if structural {
                        filter.structural_children += 1;
                    }
                    cursor = filter.parent;
                }
                Gate::Range(id) => {
                    saw_range = true;
                    let range = &mut self.ranges[id.0];
                    range.children += 1;
                    if structural {
                        range.structural_children += 1;
                    }
                    cursor = range.parent;
                }
            }
        }
        saw_range
    }

    pub fn column_id(&self, name: &str) -> Option<ColumnId> {
        self.column_ids.get(name).copied()
    }

    pub fn column(&self, id: ColumnId) -> &ColumnNode {
        &self.columns[id.0]
    }

    pub fn filter(&self, id: FilterId) -> &FilterNode {
        &self.filters[id.0]
    }

    pub fn action(&self, id: ActionId) -> &ActionNode {
        &self.actions[id.0]
    }

    pub fn range(&self, id: RangeId) -> &RangeNode {
        &self.ranges[id.0]
    }

    pub fn columns(&self) -> impl Iterator<Item = &ColumnNode> {
        self.columns.iter()
    }

    pub fn filters(&self) -> impl Iterator<Item = &FilterNode> {
        self.filters.iter()
    }

    pub fn actions(&self) -> impl Iterator<Item = &ActionNode> {
        self.actions.iter()
    }

    pub fn action_ids(&self) -> impl Iterator<Item = ActionId> + '_ {
        (0..self.actions.len()).map(ActionId)
    }

    pub fn named_filter_ids(&self) -> impl Iterator<Item = FilterId> + '_ {
        self.named_filters.iter().copied()
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn n_filters(&self) -> usize {
        self.filters.len()
    }

    pub fn n_ranges(&self) -> usize {
        self.ranges.len()
    }

    /// Forget the booked actions. Their ids become invalid; filters, columns,
    /// and ranges persist.
    pub fn clear_actions(&mut self) {
        self.actions.clear();
    }

    /// Restore children counts to the values registered by persistent graph
    /// structure, dropping the contributions of cleared actions.
    pub fn reset_children(&mut self) {
        for filter in &mut self.filters {
            debug_assert!(filter.children >= filter.structural_children);
            filter.children = filter.structural_children;
        }
        for range in &mut self.ranges {
            debug_assert!(range.children >= range.structural_children);
            range.children = range.structural_children;
        }
    }

    /// Reject cyclic dependencies between booked columns before any loop
    /// runs. Dependencies that are not booked columns are left to the
    /// per-slot init check, where the reader can still resolve them.
    pub fn validate_columns(&self) -> Result<()> {
        let mut graph = DiGraph::<ColumnId, ()>::with_capacity(self.columns.len(), 0);
        let indices: Vec<_> = (0..self.columns.len())
            .map(|i| graph.add_node(ColumnId(i)))
            .collect();
        for (i, column) in self.columns.iter().enumerate() {
            for dep in &column.deps {
                if let Some(&dep_id) = self.column_ids.get(dep) {
                    graph.add_edge(indices[dep_id.0], indices[i], ());
                }
            }
        }
        toposort(&graph, None).map_err(|cycle| {
            let id = graph[cycle.node_id()];
            Error::CyclicDependency(self.columns[id.0].name.clone())
        })?;
        Ok(())
    }
}

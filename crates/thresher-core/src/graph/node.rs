//! Node kinds of the scan graph.
//!
//! The set of kinds is closed: derived columns, filters, actions, and range
//! limiters. Nodes are plain configuration (user closures plus declared
//! upstream column names) owned by the registry and addressed through typed
//! ids; all mutable per-slot state lives in the per-slot frames.

use crate::engine::Row;
use crate::error::Result;
use crate::value::Value;

/// Id of a booked derived column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColumnId(pub(crate) usize);

/// Id of a booked filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterId(pub(crate) usize);

/// Id of a booked action. Invalidated when the manager's clean-up clears the
/// booked actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionId(pub(crate) usize);

/// Id of a booked range limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RangeId(pub(crate) usize);

/// A link in a node's upstream gate chain.
///
/// Only filters and range limiters gate downstream evaluation; `None` as a
/// parent means the node hangs directly off the entry source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Filter(FilterId),
    Range(RangeId),
}

impl From<FilterId> for Gate {
    fn from(id: FilterId) -> Self {
        Gate::Filter(id)
    }
}

impl From<RangeId> for Gate {
    fn from(id: RangeId) -> Self {
        Gate::Range(id)
    }
}

/// Evaluation closure of a derived column.
pub type ColumnEval = dyn Fn(&mut Row<'_>) -> Result<Value> + Send + Sync;

/// Predicate closure of a filter.
pub type FilterPredicate = dyn Fn(&mut Row<'_>) -> Result<bool> + Send + Sync;

/// Side-effecting closure of an action.
pub type ActionOp = dyn Fn(&mut Row<'_>) -> Result<()> + Send + Sync;

pub(crate) struct ColumnNode {
    pub(crate) name: String,
    pub(crate) deps: Vec<String>,
    pub(crate) eval: Box<ColumnEval>,
}

pub(crate) struct FilterNode {
    /// Empty name marks the filter anonymous: it gates downstream evaluation
    /// but is excluded from reporting.
    pub(crate) name: String,
    pub(crate) deps: Vec<String>,
    pub(crate) parent: Option<Gate>,
    pub(crate) predicate: Box<FilterPredicate>,
    /// Downstream nodes still needing this loop's traversal signal.
    pub(crate) children: u32,
    /// The children contributed by persistent graph structure; clean-up
    /// restores `children` to this value when the one-shot actions go away.
    pub(crate) structural_children: u32,
}

impl FilterNode {
    pub(crate) fn has_name(&self) -> bool {
        !self.name.is_empty()
    }
}

pub(crate) struct ActionNode {
    pub(crate) deps: Vec<String>,
    pub(crate) parent: Option<Gate>,
    pub(crate) op: Box<ActionOp>,
}

pub(crate) struct RangeNode {
    pub(crate) parent: Option<Gate>,
    pub(crate) start: u64,
    /// 0 means unbounded.
    pub(crate) stop: u64,
    pub(crate) stride: u64,
    pub(crate) children: u32,
    pub(crate) structural_children: u32,
}

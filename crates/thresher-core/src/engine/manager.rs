//! Loop orchestration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::compile::ExpressionCompiler;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::graph::{ActionId, ColumnId, FilterId, Gate, NodeRegistry, RangeId};
use crate::source::{EntrySource, EntryStore, Partition};
use crate::value::Value;

use super::frame::SlotFrame;
use super::report::{FilterSummary, Report};
use super::row::{Row, dispatch_entry, init_slot};

/// Maps a poisoned frame lock (a worker panicked mid-partition) to our error
/// type, the only way a frame lock can fail.
fn lock_error<T>(e: PoisonError<T>) -> Error {
    Error::Execution(format!("slot frame lock poisoned (worker panicked): {e}"))
}

/// Owns the scan graph and drives it over an entry source.
///
/// Callers book derived columns, filters, actions, and range limiters, then
/// call [`run`](LoopManager::run). One run resolves deferred expression
/// compilation, prepares per-slot state, selects a looping strategy
/// (sequential or parallel, synthetic or store-backed), dispatches every
/// entry through the graph, and cleans up so the same graph can be re-booked
/// with fresh actions and run again.
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicI64, Ordering};
/// use thresher_core::{EngineConfig, LoopManager, Value};
///
/// let mut manager = LoopManager::synthetic(10, EngineConfig::default());
/// manager.book_column("x", &[], |row| Ok(Value::Int(row.entry())));
/// let even = manager
///     .book_filter("even", &["x"], None, |row| {
///         Ok(row.value("x")?.as_i64().unwrap_or(0) % 2 == 0)
///     })
///     .unwrap();
/// let sum = Arc::new(AtomicI64::new(0));
/// let acc = Arc::clone(&sum);
/// manager
///     .book_action(&["x"], Some(even.into()), move |row| {
///         let x = row.value("x")?.as_i64().unwrap_or(0);
///         acc.fetch_add(x, Ordering::Relaxed);
///         Ok(())
///     })
///     .unwrap();
/// manager.run().unwrap();
/// assert_eq!(sum.load(Ordering::Relaxed), 20);
/// ```
pub struct LoopManager {
    registry: NodeRegistry,
    source: EntrySource,
    config: EngineConfig,
    compiler: Option<Arc<dyn ExpressionCompiler>>,
    pending_fragments: Vec<String>,
    readiness: Vec<Arc<AtomicBool>>,
    frames: Vec<Mutex<SlotFrame>>,
    /// Booked consumers sitting below a range limiter; the sequential loops
    /// stop early once this many stop signals arrive.
    stop_consumers: u32,
    structural_stop_consumers: u32,
    parallel_requested: bool,
    has_run: bool,
}

impl LoopManager {
    pub fn new(source: EntrySource, config: EngineConfig) -> Self {
        Self {
            registry: NodeRegistry::new(),
            source,
            config,
            compiler: None,
            pending_fragments: Vec::new(),
            readiness: Vec::new(),
            frames: Vec::new(),
            stop_consumers: 0,
            structural_stop_consumers: 0,
            parallel_requested: false,
            has_run: false,
        }
    }

    /// A manager over `entries` synthetic entries with no backing store.
    pub fn synthetic(entries: u64, config: EngineConfig) -> Self {
        Self::new(EntrySource::synthetic(entries), config)
    }

    /// A manager over entries streamed from a backing store.
    pub fn backed(store: Box<dyn EntryStore>, config: EngineConfig) -> Self {
        Self::new(EntrySource::backed(store), config)
    }

    /// Attach the expression-compilation service used to resolve deferred
    /// fragments at the start of a run.
    pub fn with_compiler(mut self, compiler: Arc<dyn ExpressionCompiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    /// Request multi-threaded loops. Parallel execution happens only when
    /// both this is set and the configuration's implicit-parallelism flag is
    /// on.
    pub fn request_parallelism(&mut self, enabled: bool) {
        self.parallel_requested = enabled;
    }

    /// Whether at least one loop has completed.
    pub fn has_run(&self) -> bool {
        self.has_run
    }

    /// The number of worker slots the next run will use.
    pub fn n_slots(&self) -> usize {
        if self.parallel_enabled() {
            self.config.resolved_workers()
        } else {
            1
        }
    }

    fn parallel_enabled(&self) -> bool {
        self.parallel_requested && self.config.implicit_parallelism
    }

    /// Queue a source fragment for the compilation service. Fragments
    /// accumulate across bookings and are compiled in one batch when the
    /// next run starts.
    pub fn defer_compilation(&mut self, fragment: impl Into<String>) {
        self.pending_fragments.push(fragment.into());
    }

    /// Book a derived column under a unique name. Booking a second column
    /// under the same name rebinds it: the newer column shadows the older.
    pub fn book_column<F>(&mut self, name: impl Into<String>, deps: &[&str], eval: F) -> ColumnId
    where
        F: Fn(&mut Row<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        self.registry
            .add_column(name.into(), to_owned_names(deps), Box::new(eval))
    }

    /// Book a filter. An empty name marks it anonymous: it gates downstream
    /// evaluation but is excluded from reporting.
    pub fn book_filter<F>(
        &mut self,
        name: impl Into<String>,
        deps: &[&str],
        parent: Option<Gate>,
        predicate: F,
    ) -> Result<FilterId>
    where
        F: Fn(&mut Row<'_>) -> Result<bool> + Send + Sync + 'static,
    {
        let (id, range_gated) =
            self.registry
                .add_filter(name.into(), to_owned_names(deps), parent, Box::new(predicate))?;
        if range_gated {
            self.stop_consumers += 1;
            self.structural_stop_consumers += 1;
        }
        Ok(id)
    }

    /// Book an action: a side-effecting consumer run once per entry its gate
    /// chain admits. Actions accumulate slot-locally; merging across slots
    /// is the caller's business, after the run. Actions are one-shot: the
    /// run's clean-up clears them while columns, filters, and ranges stay
    /// booked.
    pub fn book_action<F>(&mut self, deps: &[&str], parent: Option<Gate>, op: F) -> Result<ActionId>
    where
        F: Fn(&mut Row<'_>) -> Result<()> + Send + Sync + 'static,
    {
        let (id, range_gated) = self
            .registry
            .add_action(to_owned_names(deps), parent, Box::new(op))?;
        if range_gated {
            self.stop_consumers += 1;
        }
        Ok(id)
    }

    /// Book a range limiter admitting entries at positions `start`,
    /// `start + stride`, ... up to (excluding) `stop`; `stop == 0` means
    /// unbounded.
    pub fn book_range(
        &mut self,
        parent: Option<Gate>,
        start: u64,
        stop: u64,
        stride: u64,
    ) -> Result<RangeId> {
        self.registry.add_range(parent, start, stop, stride)
    }

    /// Book a readiness flag. The run's clean-up sets it, notifying a
    /// deferred consumer that its result is materialized.
    pub fn book_readiness_flag(&mut self, flag: Arc<AtomicBool>) {
        self.readiness.push(flag);
    }

    /// Run the loop: compile deferred fragments, validate the column graph,
    /// prepare per-slot state, dispatch every entry, and clean up.
    pub fn run(&mut self) -> Result<()> {
        let result = self.run_loop();
        if let Err(e) = &result {
            tracing::error!("scan loop aborted: {e}");
        }
        result
    }

    fn run_loop(&mut self) -> Result<()> {
        self.compile_pending()?;
        self.registry.validate_columns()?;
        let parallel = self.parallel_enabled();
        let n_slots = if parallel {
            self.config.resolved_workers()
        } else {
            1
        };
        tracing::debug!(n_slots, parallel, "starting scan loop");
        self.create_slots(n_slots);
        if parallel {
            self.run_parallel_loop(n_slots)?;
        } else {
            self.run_sequential_loop()?;
        }
        self.clean_up();
        Ok(())
    }

    /// Aggregate named-filter statistics across slots, in registration
    /// order. Only meaningful after the workers have joined.
    pub fn report(&self) -> Result<Report> {
        let mut summaries = Vec::new();
        for id in self.registry.named_filter_ids() {
            let mut accepted = 0;
            let mut rejected = 0;
            for frame in &self.frames {
                let frame = frame.lock().map_err(lock_error)?;
                if let Some(state) = frame.filters.get(id.0) {
                    accepted += state.accepted;
                    rejected += state.rejected;
                }
            }
            summaries.push(FilterSummary {
                name: self.registry.filter(id).name.clone(),
                passed: accepted,
                all: accepted + rejected,
            });
        }
        Ok(Report::new(summaries))
    }

    /// Emit the report through the logging layer, one line per named filter.
    pub fn log_report(&self) -> Result<()> {
        for summary in self.report()?.summaries() {
            tracing::info!(target: "thresher::report", "{summary}");
        }
        Ok(())
    }

    fn compile_pending(&mut self) -> Result<()> {
        if self.pending_fragments.is_empty() {
            return Ok(());
        }
        let compiler = self.compiler.as_ref().ok_or_else(|| {
            Error::Compilation("deferred fragments booked but no compiler configured".into())
        })?;
        let fragments = std::mem::take(&mut self.pending_fragments);
        tracing::debug!(count = fragments.len(), "compiling deferred expressions");
        for fragment in &fragments {
            compiler.compile(fragment).map_err(Error::Compilation)?;
        }
        Ok(())
    }

    /// Build fresh per-slot frames for every booked node. Counters start at
    /// zero, so statistics always describe exactly one run cycle.
    fn create_slots(&mut self, n_slots: usize) {
        let (n_columns, n_filters, n_ranges) = (
            self.registry.n_columns(),
            self.registry.n_filters(),
            self.registry.n_ranges(),
        );
        self.frames = (0..n_slots)
            .map(|_| Mutex::new(SlotFrame::new(n_columns, n_filters, n_ranges)))
            .collect();
    }

    fn run_sequential_loop(&self) -> Result<()> {
        let registry = &self.registry;
        let frames = &self.frames;
        let stop_consumers = u64::from(self.stop_consumers);
        self.source.run_sequential(&mut |slot, partition| {
            let mut frame = frames[slot].lock().map_err(lock_error)?;
            match partition {
                Partition::Range(range) => {
                    init_slot(registry, None, &mut frame)?;
                    for entry in range {
                        dispatch_entry(registry, &mut frame, None, slot, entry as i64)?;
                        if stop_consumers > 0 && frame.stops_received >= stop_consumers {
                            tracing::debug!(entry, "all range consumers exhausted, stopping early");
                            break;
                        }
                    }
                }
                Partition::Reader(reader) => {
                    init_slot(registry, Some(&*reader), &mut frame)?;
                    while reader.next() {
                        let entry = reader.entry_index();
                        dispatch_entry(registry, &mut frame, Some(&*reader), slot, entry)?;
                        if stop_consumers > 0 && frame.stops_received >= stop_consumers {
                            tracing::debug!(entry, "all range consumers exhausted, stopping early");
                            break;
                        }
                    }
                }
            }
            Ok(())
        })
    }

    fn run_parallel_loop(&self, n_slots: usize) -> Result<()> {
        let registry = &self.registry;
        let frames = &self.frames;
        self.source.run_parallel(n_slots, &|slot, partition| {
            let mut frame = frames[slot].lock().map_err(lock_error)?;
            match partition {
                Partition::Range(range) => {
                    init_slot(registry, None, &mut frame)?;
                    for entry in range {
                        dispatch_entry(registry, &mut frame, None, slot, entry as i64)?;
                    }
                }
                Partition::Reader(reader) => {
                    init_slot(registry, Some(&*reader), &mut frame)?;
                    while reader.next() {
                        let entry = reader.entry_index();
                        dispatch_entry(registry, &mut frame, Some(&*reader), slot, entry)?;
                    }
                }
            }
            Ok(())
        })
    }

    /// End-of-loop bookkeeping: forget the one-shot actions, notify deferred
    /// consumers, and restore children counts so the persistent graph can be
    /// re-booked and re-run.
    fn clean_up(&mut self) {
        self.has_run = true;
        self.registry.clear_actions();
        for flag in self.readiness.drain(..) {
            flag.store(true, Ordering::Release);
        }
        self.registry.reset_children();
        self.stop_consumers = self.structural_stop_consumers;
        for frame in &mut self.frames {
            if let Ok(frame) = frame.get_mut() {
                frame.stops_received = 0;
            }
        }
        tracing::debug!("scan loop cleaned up");
    }
}

fn to_owned_names(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

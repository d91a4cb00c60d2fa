//! Tick orchestrator: owns the canonical heat buffer and schedules batches.
//!
//! At most one batch is in flight. A request that arrives while one is
//! running replaces any request already queued, so a burst of requests
//! collapses into the most recent one:
//!
//! ```text
//! Idle --request--> Running(a) --request--> Queued(a, b) --request--> Queued(a, c)
//!   ^                   |                        |
//!   +----complete(a)----+        complete(a) --> Running(c)
//! ```
//!
//! Results are applied in completion order. A failed batch leaves the heat
//! buffer and reactor scalars untouched and is reported as
//! [`TickEvent::Failed`].

use crate::config::{ConfigError, ExecutionMode, MAX_GRID_CELLS, RuntimeConfig};
use crate::protocol::WorkerReply;
use crate::reactor::ReactorState;
use crate::tick::{TickBuffers, TickError, TickRequest, TickResult, TicksUpdate, run_ticks};
use crate::worker::{HeatWorker, WorkerError};
use heatnet_core::id::{CellCoord, CellIndex, GridDims, RequestId};
use heatnet_core::layout::{LayoutError, LayoutSnapshot};
use heatnet_core::part::PartTable;
use heatnet_core::segment::SegmentTracker;
use heatnet_core::step::Transfer;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Running { in_flight: RequestId },
    /// A batch is running and a newer request waits behind it.
    Queued {
        in_flight: RequestId,
        queued: RequestId,
    },
}

/// An applied batch, minus the heat buffer (read it with
/// [`Orchestrator::heat`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickSummary {
    pub id: RequestId,
    pub ticks_run: u32,
    pub reactor_heat: f64,
    pub reactor_power: f64,
    pub heat_delta: f64,
    pub power_delta: f64,
    pub money_earned: f64,
    pub heat_from_inlets: f64,
    pub explosion_indices: Vec<CellIndex>,
    pub depletion_indices: Vec<CellIndex>,
    pub tile_updates: Vec<TicksUpdate>,
    pub transfers: Vec<Transfer>,
}

impl TickSummary {
    fn split(result: TickResult) -> (Vec<f64>, Self) {
        let summary = Self {
            id: result.id,
            ticks_run: result.ticks_run,
            reactor_heat: result.reactor_heat,
            reactor_power: result.reactor_power,
            heat_delta: result.heat_delta,
            power_delta: result.power_delta,
            money_earned: result.money_earned,
            heat_from_inlets: result.heat_from_inlets,
            explosion_indices: result.explosion_indices,
            depletion_indices: result.depletion_indices,
            tile_updates: result.tile_updates,
            transfers: result.transfers,
        };
        (result.heat, summary)
    }
}

/// Why a requested batch was not applied.
#[derive(Debug, thiserror::Error)]
pub enum TickFailure {
    #[error("layout rejected: {0}")]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    Computation(#[from] TickError),
    #[error(transparent)]
    Worker(#[from] WorkerError),
}

#[derive(Debug)]
pub enum TickEvent {
    Applied(TickSummary),
    Failed { id: RequestId, error: TickFailure },
}

impl TickEvent {
    pub fn id(&self) -> RequestId {
        match self {
            Self::Applied(summary) => summary.id,
            Self::Failed { id, .. } => *id,
        }
    }
}

// ---------------------------------------------------------------------------
// Internal bookkeeping
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct PendingTick {
    id: RequestId,
    layout: LayoutSnapshot,
    multiplier: f64,
    tick_count: u32,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    id: RequestId,
    /// Grid shape the batch was dispatched with.
    dims: GridDims,
}

enum Dispatch {
    /// Handed to the worker; completion arrives through `poll`/`wait`.
    Remote,
    /// Finished (or failed) on the calling thread.
    Done,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    parts: PartTable,
    config: RuntimeConfig,
    heat: Vec<f64>,
    /// Active grid; `stride` is the column capacity of `heat`.
    dims: GridDims,
    row_capacity: u32,
    reactor: ReactorState,
    money_earned: f64,
    next_id: u64,
    in_flight: Option<InFlight>,
    queued: Option<PendingTick>,
    worker: Option<HeatWorker>,
    inline_buffers: TickBuffers,
    segments: SegmentTracker,
    events: VecDeque<TickEvent>,
}

impl Orchestrator {
    /// Allocate the heat buffer at the configured capacity and, in worker
    /// mode, start the worker. A worker that fails to start degrades to
    /// inline execution.
    pub fn new(parts: PartTable, config: RuntimeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let rows = config.grid.max_rows;
        let cols = config.grid.max_cols;
        let dims = GridDims::with_stride(rows, cols, cols);
        let worker = match config.execution {
            ExecutionMode::Inline => None,
            ExecutionMode::Worker => match HeatWorker::spawn(&parts) {
                Ok(worker) => Some(worker),
                Err(e) => {
                    tracing::warn!(error = %e, "worker unavailable, running inline");
                    None
                }
            },
        };
        Ok(Self {
            parts,
            heat: vec![0.0; dims.buffer_len()],
            dims,
            row_capacity: rows,
            reactor: ReactorState::default(),
            money_earned: 0.0,
            next_id: 0,
            in_flight: None,
            queued: None,
            worker,
            inline_buffers: TickBuffers::new(config.limits),
            segments: SegmentTracker::new(),
            events: VecDeque::new(),
            config,
        })
    }

    // -- accessors ---------------------------------------------------------

    pub fn state(&self) -> OrchestratorState {
        match (self.in_flight, &self.queued) {
            (None, _) => OrchestratorState::Idle,
            (Some(f), None) => OrchestratorState::Running { in_flight: f.id },
            (Some(f), Some(q)) => OrchestratorState::Queued {
                in_flight: f.id,
                queued: q.id,
            },
        }
    }

    /// Execution mode actually in use; a failed worker reports `Inline`.
    pub fn execution(&self) -> ExecutionMode {
        if self.worker.is_some() {
            ExecutionMode::Worker
        } else {
            ExecutionMode::Inline
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn dims(&self) -> GridDims {
        self.dims
    }

    /// The canonical heat buffer, indexed with [`dims`](Self::dims).
    pub fn heat(&self) -> &[f64] {
        &self.heat
    }

    pub fn cell_heat(&self, coord: CellCoord) -> Option<f64> {
        let idx = self.dims.index(coord)?;
        self.heat.get(idx as usize).copied()
    }

    pub fn set_cell_heat(&mut self, coord: CellCoord, value: f64) -> bool {
        match self.dims.index(coord).and_then(|i| self.heat.get_mut(i as usize)) {
            Some(cell) => {
                *cell = value.max(0.0);
                true
            }
            None => false,
        }
    }

    pub fn reactor(&self) -> &ReactorState {
        &self.reactor
    }

    /// Reactor settings are sampled when a batch starts, not when it is requested.
    pub fn reactor_mut(&mut self) -> &mut ReactorState {
        &mut self.reactor
    }

    /// Money earned by auto-sell across every applied batch.
    pub fn money_earned(&self) -> f64 {
        self.money_earned
    }

    pub fn parts(&self) -> &PartTable {
        &self.parts
    }

    /// Replace the part table. The worker receives the new table before any
    /// later request.
    pub fn set_parts(&mut self, parts: PartTable) {
        let sent = self.worker.as_ref().map(|w| w.set_parts(&parts));
        if let Some(Err(e)) = sent {
            tracing::warn!(error = %e, "worker rejected part table, running inline");
            self.worker = None;
        }
        self.parts = parts;
        self.segments.mark_dirty();
    }

    // -- scheduling ----------------------------------------------------------

    /// Request `tick_count` ticks over `layout`.
    ///
    /// Starts immediately when idle (and, inline, completes before
    /// returning). Otherwise replaces whatever request was queued.
    pub fn request_tick(&mut self, mut layout: LayoutSnapshot, multiplier: f64, tick_count: u32) -> RequestId {
        self.next_id += 1;
        let id = RequestId(self.next_id);

        if let Err(e) = self.fit_layout(&mut layout) {
            tracing::warn!(id = id.0, error = %e, "tick request rejected");
            self.events.push_back(TickEvent::Failed { id, error: e.into() });
            return id;
        }

        let pending = PendingTick {
            id,
            layout,
            multiplier,
            tick_count,
        };
        if self.in_flight.is_some() {
            if let Some(dropped) = self.queued.replace(pending) {
                tracing::debug!(dropped = dropped.id.0, queued = id.0, "coalesced tick request");
            }
            return id;
        }
        self.launch(pending);
        id
    }

    /// Adopt the current stride and reject layouts larger than the active grid.
    ///
    /// Runs again when a queued request starts, since a resize in between
    /// may have changed the stride or shrunk the grid.
    fn fit_layout(&self, layout: &mut LayoutSnapshot) -> Result<(), LayoutError> {
        let dims = layout.dims;
        if dims.rows > self.dims.rows || dims.cols > self.dims.cols {
            return Err(LayoutError::GridTooLarge {
                rows: dims.rows,
                cols: dims.cols,
                max_rows: self.dims.rows,
                max_cols: self.dims.cols,
            });
        }
        layout.dims = GridDims::with_stride(dims.rows, dims.cols, self.dims.stride);
        Ok(())
    }

    /// Start `next`, and keep starting queued work while batches finish inline.
    fn launch(&mut self, mut next: PendingTick) {
        loop {
            match self.dispatch(next) {
                Dispatch::Remote => return,
                Dispatch::Done => match self.queued.take() {
                    Some(queued) => next = queued,
                    None => return,
                },
            }
        }
    }

    fn dispatch(&mut self, pending: PendingTick) -> Dispatch {
        let PendingTick {
            id,
            mut layout,
            multiplier,
            tick_count,
        } = pending;
        if let Err(e) = self.fit_layout(&mut layout) {
            tracing::warn!(id = id.0, error = %e, "layout no longer fits the grid");
            self.events.push_back(TickEvent::Failed { id, error: e.into() });
            return Dispatch::Done;
        }
        let request = TickRequest {
            id,
            heat: self.heat.clone(),
            layout,
            reactor: self.reactor.clone(),
            multiplier,
            tick_count,
            auto_sell: self.config.auto_sell,
            record_transfers: self.config.record_transfers,
            limits: self.config.limits,
        };
        self.in_flight = Some(InFlight { id, dims: self.dims });

        match self.worker.as_ref().map(|w| w.submit(request.clone())) {
            Some(Ok(())) => {
                tracing::debug!(id = id.0, "dispatched to worker");
                return Dispatch::Remote;
            }
            Some(Err(e)) => {
                tracing::warn!(id = id.0, error = %e, "worker unavailable, falling back to inline");
                self.worker = None;
            }
            None => {}
        }

        tracing::debug!(id = id.0, "running inline");
        let outcome = run_ticks(request, &self.parts, &mut self.inline_buffers).map_err(TickFailure::from);
        self.complete(id, outcome);
        Dispatch::Done
    }

    /// Apply or report the in-flight batch and clear it.
    fn complete(&mut self, id: RequestId, outcome: Result<TickResult, TickFailure>) {
        let Some(flight) = self.in_flight.take() else {
            return;
        };
        match outcome {
            Ok(result) => {
                let (heat, summary) = TickSummary::split(result);
                if flight.dims == self.dims && heat.len() == self.heat.len() {
                    self.heat = heat;
                } else {
                    // The grid was resized while the batch ran.
                    let mut fresh = vec![0.0; self.heat.len()];
                    remap(&heat, flight.dims, &mut fresh, self.dims);
                    self.heat = fresh;
                }
                self.reactor.current_heat = summary.reactor_heat;
                self.reactor.current_power = summary.reactor_power;
                self.money_earned += summary.money_earned;
                tracing::debug!(id = id.0, ticks = summary.ticks_run, "applied tick result");
                self.events.push_back(TickEvent::Applied(summary));
            }
            Err(error) => {
                tracing::warn!(id = id.0, error = %error, "tick failed, state left unchanged");
                self.events.push_back(TickEvent::Failed { id, error });
            }
        }
    }

    /// Handle one worker reply. Returns `true` when it completed the
    /// in-flight batch.
    fn on_reply(&mut self, reply: WorkerReply) -> bool {
        let Some(flight) = self.in_flight else {
            tracing::warn!("worker reply with nothing in flight");
            return false;
        };
        let (id, outcome) = match reply {
            WorkerReply::Done(result) => (Some(result.id), Ok(result)),
            WorkerReply::Failed { id, error } => (id, Err(TickFailure::from(error))),
        };
        if id.is_some_and(|id| id != flight.id) {
            tracing::warn!(
                stale = id.map(|i| i.0),
                in_flight = flight.id.0,
                "ignoring stale worker reply"
            );
            return false;
        }
        self.complete(flight.id, outcome);
        true
    }

    /// The worker channel broke: fail the in-flight batch and go inline.
    fn on_worker_lost(&mut self, error: WorkerError) {
        tracing::warn!(error = %error, "worker lost, falling back to inline");
        self.worker = None;
        if let Some(flight) = self.in_flight {
            self.complete(flight.id, Err(TickFailure::Worker(error)));
        }
    }

    fn start_queued(&mut self) {
        if self.in_flight.is_none() {
            if let Some(next) = self.queued.take() {
                self.launch(next);
            }
        }
    }

    /// Collect finished work without blocking.
    pub fn poll(&mut self) -> Vec<TickEvent> {
        while self.in_flight.is_some() {
            let Some(worker) = &self.worker else {
                break;
            };
            match worker.try_recv() {
                Ok(Some(reply)) => {
                    if self.on_reply(reply) {
                        self.start_queued();
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    self.on_worker_lost(e);
                    self.start_queued();
                }
            }
        }
        self.events.drain(..).collect()
    }

    /// Block until nothing is in flight or queued.
    pub fn wait(&mut self) -> Vec<TickEvent> {
        self.settle();
        self.events.drain(..).collect()
    }

    fn settle(&mut self) {
        while self.in_flight.is_some() {
            let Some(worker) = &self.worker else {
                break;
            };
            match worker.recv() {
                Ok(reply) => {
                    if self.on_reply(reply) {
                        self.start_queued();
                    }
                }
                Err(e) => {
                    self.on_worker_lost(e);
                    self.start_queued();
                }
            }
        }
    }

    /// Switch execution mode. Outstanding work finishes first; its events
    /// are returned by the next `poll` or `wait`.
    pub fn set_execution(&mut self, mode: ExecutionMode) {
        self.settle();
        self.config.execution = mode;
        match mode {
            ExecutionMode::Inline => {
                self.worker = None;
            }
            ExecutionMode::Worker if self.worker.is_none() => match HeatWorker::spawn(&self.parts) {
                Ok(worker) => self.worker = Some(worker),
                Err(e) => tracing::warn!(error = %e, "worker unavailable, running inline"),
            },
            ExecutionMode::Worker => {}
        }
        tracing::debug!(execution = ?self.execution(), "execution mode changed");
    }

    // -- segments ------------------------------------------------------------

    /// Segments for `layout`, rebuilt if its topology changed.
    pub fn segments(&mut self, layout: &LayoutSnapshot) -> &SegmentTracker {
        self.refresh_segments(layout);
        &self.segments
    }

    pub fn segments_mut(&mut self) -> &mut SegmentTracker {
        &mut self.segments
    }

    fn refresh_segments(&mut self, layout: &LayoutSnapshot) {
        let mut layout = layout.clone();
        if let Err(e) = self.fit_layout(&mut layout) {
            tracing::warn!(error = %e, "segments not refreshed");
            return;
        }
        self.segments.observe(&layout);
        self.segments.update_if_dirty(&layout, &self.parts, &self.heat);
    }

    /// Vent every segment against the canonical heat buffer. Returns the heat
    /// removed.
    pub fn vent_segments(&mut self, layout: &LayoutSnapshot, multiplier: f64) -> f64 {
        if self.in_flight.is_some() {
            tracing::debug!("venting while a batch is in flight; its result will overwrite this");
        }
        self.refresh_segments(layout);
        self.segments.vent(&mut self.heat, multiplier)
    }

    // -- resizing --------------------------------------------------------------

    /// Change the active grid size.
    ///
    /// Within capacity the buffer is kept and cells leaving the active area
    /// are cleared. Beyond capacity the buffer is reallocated and existing
    /// values are carried over by `(row, col)`.
    pub fn resize(&mut self, rows: u32, cols: u32) -> Result<(), LayoutError> {
        let too_large = LayoutError::GridTooLarge {
            rows,
            cols,
            max_rows: self.row_capacity.max(rows),
            max_cols: self.dims.stride.max(cols),
        };
        if rows as u64 * self.dims.stride.max(cols) as u64 > MAX_GRID_CELLS {
            return Err(too_large);
        }
        let old = self.dims;
        if rows <= self.row_capacity && cols <= old.stride {
            let new = GridDims::with_stride(rows, cols, old.stride);
            for r in 0..self.row_capacity {
                for c in 0..old.stride {
                    if r >= rows || c >= cols {
                        let idx = (r * old.stride + c) as usize;
                        if let Some(cell) = self.heat.get_mut(idx) {
                            *cell = 0.0;
                        }
                    }
                }
            }
            self.dims = new;
        } else {
            let row_capacity = self.row_capacity.max(rows);
            let new = GridDims::with_stride(rows, cols, old.stride.max(cols));
            let mut fresh = vec![0.0; row_capacity as usize * new.stride as usize];
            remap(&self.heat, old, &mut fresh, new);
            self.heat = fresh;
            self.row_capacity = row_capacity;
            self.dims = new;
            tracing::debug!(rows, cols, stride = new.stride, "heat buffer reallocated");
        }
        self.segments.mark_dirty();
        Ok(())
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("state", &self.state())
            .field("execution", &self.execution())
            .field("dims", &self.dims)
            .field("row_capacity", &self.row_capacity)
            .field("reactor", &self.reactor)
            .finish_non_exhaustive()
    }
}

/// Copy every cell active in both shapes from `src` to `dst`.
fn remap(src: &[f64], from: GridDims, dst: &mut [f64], to: GridDims) {
    for r in 0..from.rows.min(to.rows) {
        for c in 0..from.cols.min(to.cols) {
            let coord = CellCoord::new(r, c);
            if let (Some(a), Some(b)) = (from.index(coord), to.index(coord)) {
                if let (Some(v), Some(slot)) = (src.get(a as usize), dst.get_mut(b as usize)) {
                    *slot = *v;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heatnet_core::test_utils::*;

    fn small_config(mode: ExecutionMode) -> RuntimeConfig {
        let mut config = RuntimeConfig {
            execution: mode,
            ..RuntimeConfig::default()
        };
        config.grid.max_rows = 4;
        config.grid.max_cols = 4;
        config
    }

    fn fuel_row() -> LayoutSnapshot {
        layout_from_map(&standard_parts(), &["CFC"])
    }

    #[test]
    fn inline_request_completes_immediately() {
        let mut orch = Orchestrator::new(standard_parts(), small_config(ExecutionMode::Inline)).unwrap();
        let id = orch.request_tick(fuel_row(), 1.0, 1);
        assert_eq!(orch.state(), OrchestratorState::Idle);
        let events = orch.poll();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id(), id);
        assert!(matches!(events[0], TickEvent::Applied(_)));
        assert_eq!(orch.cell_heat(CellCoord::new(0, 0)), Some(0.5));
        assert_eq!(orch.reactor().current_power, 1.0);
    }

    #[test]
    fn requests_coalesce_behind_in_flight_batch() {
        let mut orch = Orchestrator::new(standard_parts(), small_config(ExecutionMode::Worker)).unwrap();
        assert_eq!(orch.execution(), ExecutionMode::Worker);
        let a = orch.request_tick(fuel_row(), 1.0, 1);
        assert_eq!(orch.state(), OrchestratorState::Running { in_flight: a });
        let _b = orch.request_tick(fuel_row(), 1.0, 1);
        let c = orch.request_tick(fuel_row(), 1.0, 1);
        assert_eq!(orch.state(), OrchestratorState::Queued { in_flight: a, queued: c });

        let ids: Vec<_> = orch.wait().iter().map(TickEvent::id).collect();
        assert_eq!(ids, vec![a, c]);
        assert_eq!(orch.state(), OrchestratorState::Idle);
        // Two batches ran, each adding half a unit to both neighbors.
        assert_eq!(orch.cell_heat(CellCoord::new(0, 2)), Some(1.0));
    }

    #[test]
    fn oversized_layout_fails_without_touching_state() {
        let mut orch = Orchestrator::new(standard_parts(), small_config(ExecutionMode::Inline)).unwrap();
        orch.set_cell_heat(CellCoord::new(0, 0), 12.0);
        let before = orch.heat().to_vec();
        let big = layout_from_map(&standard_parts(), &["CFCCC"]);
        let id = orch.request_tick(big, 1.0, 1);
        let events = orch.poll();
        match &events[..] {
            [TickEvent::Failed { id: failed, error: TickFailure::Layout(_) }] => assert_eq!(*failed, id),
            other => panic!("unexpected events: {other:?}"),
        }
        assert_eq!(orch.heat(), &before[..]);
        assert_eq!(orch.reactor().current_heat, 0.0);
    }

    #[test]
    fn switching_modes_keeps_results() {
        let mut orch = Orchestrator::new(standard_parts(), small_config(ExecutionMode::Worker)).unwrap();
        let a = orch.request_tick(fuel_row(), 1.0, 1);
        orch.set_execution(ExecutionMode::Inline);
        assert_eq!(orch.execution(), ExecutionMode::Inline);
        let b = orch.request_tick(fuel_row(), 1.0, 1);
        let ids: Vec<_> = orch.poll().iter().map(TickEvent::id).collect();
        assert_eq!(ids, vec![a, b]);
        assert_eq!(orch.reactor().current_power, 2.0);
    }

    #[test]
    fn resize_within_capacity_keeps_buffer() {
        let mut orch = Orchestrator::new(standard_parts(), small_config(ExecutionMode::Inline)).unwrap();
        orch.set_cell_heat(CellCoord::new(0, 0), 3.0);
        orch.set_cell_heat(CellCoord::new(3, 3), 9.0);
        orch.resize(2, 2).unwrap();
        assert_eq!(orch.heat().len(), 16);
        assert_eq!(orch.dims().stride, 4);
        assert_eq!(orch.cell_heat(CellCoord::new(0, 0)), Some(3.0));
        assert_eq!(orch.heat()[15], 0.0);
    }

    #[test]
    fn resize_beyond_capacity_reindexes() {
        let mut orch = Orchestrator::new(standard_parts(), small_config(ExecutionMode::Inline)).unwrap();
        orch.set_cell_heat(CellCoord::new(1, 2), 7.0);
        orch.resize(6, 8).unwrap();
        assert_eq!(orch.dims().stride, 8);
        assert_eq!(orch.heat().len(), 48);
        assert_eq!(orch.cell_heat(CellCoord::new(1, 2)), Some(7.0));
        assert_eq!(orch.heat()[10], 7.0);
    }

    #[test]
    fn queued_layout_follows_stride_change() {
        let parts = standard_parts();
        let mut orch = Orchestrator::new(parts.clone(), small_config(ExecutionMode::Worker)).unwrap();
        let first = orch.request_tick(layout_from_map(&parts, &["..."]), 1.0, 1);
        let second = orch.request_tick(layout_from_map(&parts, &["...", "CFC"]), 1.0, 1);
        assert_eq!(orch.state(), OrchestratorState::Queued { in_flight: first, queued: second });

        orch.resize(6, 8).unwrap();
        let ids: Vec<_> = orch.wait().iter().map(TickEvent::id).collect();
        assert_eq!(ids, vec![first, second]);
        assert_eq!(orch.cell_heat(CellCoord::new(1, 0)), Some(0.5));
        assert_eq!(orch.cell_heat(CellCoord::new(1, 2)), Some(0.5));
        assert_eq!(orch.cell_heat(CellCoord::new(0, 4)), Some(0.0));
        assert_eq!(orch.cell_heat(CellCoord::new(0, 6)), Some(0.0));
    }

    #[test]
    fn queued_layout_rejected_after_shrink() {
        let parts = standard_parts();
        let mut orch = Orchestrator::new(parts.clone(), small_config(ExecutionMode::Worker)).unwrap();
        let first = orch.request_tick(fuel_row(), 1.0, 1);
        let second = orch.request_tick(layout_from_map(&parts, &["CCC", "CFC", "CCC"]), 1.0, 1);
        orch.resize(2, 2).unwrap();
        let events = orch.wait();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id(), first);
        assert!(matches!(
            &events[1],
            TickEvent::Failed { id, error: TickFailure::Layout(_) } if *id == second
        ));
        assert_eq!(orch.state(), OrchestratorState::Idle);
    }

    #[test]
    fn layout_larger_than_active_grid_is_rejected() {
        let parts = standard_parts();
        let mut orch = Orchestrator::new(parts.clone(), small_config(ExecutionMode::Inline)).unwrap();
        orch.resize(2, 2).unwrap();
        let id = orch.request_tick(layout_from_map(&parts, &["CCC", "CFC", "CCC"]), 1.0, 1);
        let events = orch.poll();
        assert!(matches!(
            &events[..],
            [TickEvent::Failed { id: failed, error: TickFailure::Layout(_) }] if *failed == id
        ));
        assert!(orch.heat().iter().all(|h| *h == 0.0));
    }

    fn result_with_id(id: RequestId, len: usize) -> TickResult {
        TickResult {
            id,
            heat: vec![99.0; len],
            reactor_heat: 500.0,
            reactor_power: 50.0,
            heat_delta: 500.0,
            power_delta: 50.0,
            money_earned: 7.0,
            heat_from_inlets: 0.0,
            explosion_indices: Vec::new(),
            depletion_indices: Vec::new(),
            tile_updates: Vec::new(),
            transfers: Vec::new(),
            ticks_run: 1,
        }
    }

    /// Put an inline orchestrator into `Queued` with a fake remote batch in flight.
    fn with_remote_in_flight(orch: &mut Orchestrator, id: RequestId) -> RequestId {
        orch.in_flight = Some(InFlight { id, dims: orch.dims });
        let queued = orch.request_tick(fuel_row(), 1.0, 1);
        assert_eq!(orch.state(), OrchestratorState::Queued { in_flight: id, queued });
        queued
    }

    #[test]
    fn stale_reply_is_ignored() {
        let mut orch = Orchestrator::new(standard_parts(), small_config(ExecutionMode::Inline)).unwrap();
        orch.set_cell_heat(CellCoord::new(0, 0), 12.0);
        orch.reactor_mut().current_heat = 30.0;
        let before = orch.heat().to_vec();
        let running = RequestId(900);
        let queued = with_remote_in_flight(&mut orch, running);

        let len = orch.heat().len();
        assert!(!orch.on_reply(WorkerReply::Done(result_with_id(RequestId(899), len))));
        assert_eq!(orch.heat(), &before[..]);
        assert_eq!(orch.reactor().current_heat, 30.0);
        assert_eq!(orch.money_earned(), 0.0);
        assert_eq!(orch.state(), OrchestratorState::Queued { in_flight: running, queued });
        assert!(orch.poll().is_empty());
    }

    #[test]
    fn failed_reply_leaves_state_and_starts_queued() {
        let mut orch = Orchestrator::new(standard_parts(), small_config(ExecutionMode::Inline)).unwrap();
        orch.set_cell_heat(CellCoord::new(3, 3), 40.0);
        orch.reactor_mut().current_heat = 30.0;
        orch.reactor_mut().current_power = 5.0;
        let before = orch.heat().to_vec();
        let running = RequestId(900);
        let queued = with_remote_in_flight(&mut orch, running);

        let failed = WorkerReply::Failed {
            id: Some(running),
            error: TickError::Panicked("boom".into()),
        };
        assert!(orch.on_reply(failed));
        assert_eq!(orch.heat(), &before[..]);
        assert_eq!(orch.reactor().current_heat, 30.0);
        assert_eq!(orch.reactor().current_power, 5.0);
        assert_eq!(orch.state(), OrchestratorState::Idle);

        orch.start_queued();
        let events = orch.poll();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            TickEvent::Failed { id, error: TickFailure::Computation(TickError::Panicked(_)) } if *id == running
        ));
        assert!(matches!(&events[1], TickEvent::Applied(s) if s.id == queued));
        assert_eq!(orch.cell_heat(CellCoord::new(0, 0)), Some(0.5));
        assert_eq!(orch.reactor().current_power, 6.0);
    }

    #[test]
    fn lost_worker_fails_in_flight_and_runs_queued_inline() {
        let mut orch = Orchestrator::new(standard_parts(), small_config(ExecutionMode::Worker)).unwrap();
        orch.set_cell_heat(CellCoord::new(3, 3), 40.0);
        let before = orch.heat().to_vec();
        let first = orch.request_tick(fuel_row(), 1.0, 1);
        let second = orch.request_tick(fuel_row(), 1.0, 1);
        assert_eq!(orch.state(), OrchestratorState::Queued { in_flight: first, queued: second });

        orch.on_worker_lost(WorkerError::Disconnected);
        assert_eq!(orch.execution(), ExecutionMode::Inline);
        assert_eq!(orch.heat(), &before[..]);
        assert_eq!(orch.reactor().current_power, 0.0);

        orch.start_queued();
        let events = orch.poll();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            TickEvent::Failed { id, error: TickFailure::Worker(WorkerError::Disconnected) } if *id == first
        ));
        assert!(matches!(&events[1], TickEvent::Applied(s) if s.id == second));
        // Only the queued batch was applied.
        assert_eq!(orch.cell_heat(CellCoord::new(0, 0)), Some(0.5));
        assert_eq!(orch.reactor().current_power, 1.0);
    }

    #[test]
    fn result_is_remapped_after_mid_flight_resize() {
        let mut orch = Orchestrator::new(standard_parts(), small_config(ExecutionMode::Worker)).unwrap();
        orch.request_tick(fuel_row(), 1.0, 1);
        orch.resize(6, 8).unwrap();
        assert_eq!(orch.wait().len(), 1);
        assert_eq!(orch.heat().len(), 48);
        assert_eq!(orch.cell_heat(CellCoord::new(0, 0)), Some(0.5));
        assert_eq!(orch.heat()[2], 0.5);
    }

    #[test]
    fn resize_rejects_absurd_grids() {
        let mut orch = Orchestrator::new(standard_parts(), small_config(ExecutionMode::Inline)).unwrap();
        assert!(matches!(
            orch.resize(1 << 12, 1 << 12),
            Err(LayoutError::GridTooLarge { .. })
        ));
    }

    #[test]
    fn segments_follow_topology() {
        let parts = standard_parts();
        let mut orch = Orchestrator::new(parts.clone(), small_config(ExecutionMode::Inline)).unwrap();
        let mut layout = layout_from_map(&parts, &["CCCC"]);
        assert_eq!(orch.segments(&layout).len(), 1);
        layout.placements[1].activated = false;
        assert_eq!(orch.segments(&layout).len(), 2);
    }

    #[test]
    fn segment_venting_uses_canonical_heat() {
        let parts = standard_parts();
        let mut orch = Orchestrator::new(parts.clone(), small_config(ExecutionMode::Inline)).unwrap();
        let layout = layout_from_map(&parts, &["CV"]);
        orch.set_cell_heat(CellCoord::new(0, 0), 6.0);
        orch.set_cell_heat(CellCoord::new(0, 1), 2.0);
        let vented = orch.vent_segments(&layout, 1.0);
        assert_eq!(vented, 4.0);
        let total: f64 = orch.heat().iter().sum();
        assert!((total - 4.0).abs() < 1e-9);
    }
}

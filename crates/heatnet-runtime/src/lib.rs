//! Heatnet Runtime -- scheduling and execution of heat-network ticks.
//!
//! The core crate computes one step; this crate turns steps into a running
//! reactor. It owns the canonical heat buffer, folds several logical ticks
//! into one batch, and runs batches either inline or on a worker thread.
//!
//! # Batch Flow
//!
//! 1. **Request** -- [`orchestrator::Orchestrator::request_tick`] records a
//!    layout, multiplier and tick count. Requests made while a batch is
//!    running coalesce into the newest one.
//! 2. **Dispatch** -- The orchestrator copies its heat buffer and reactor
//!    scalars into a [`tick::TickRequest`].
//! 3. **Run** -- [`tick::run_ticks`] builds, steps and settles each tick,
//!    either on the calling thread or inside [`worker::HeatWorker`], which
//!    receives the request as a framed `bitcode` message
//!    ([`protocol`]).
//! 4. **Apply** -- The result replaces the heat buffer and reactor scalars,
//!    and a [`orchestrator::TickEvent`] is queued for the caller.
//!
//! ```rust,ignore
//! let mut orch = Orchestrator::new(parts, RuntimeConfig::worker())?;
//! orch.request_tick(layout, 1.0, 4);
//! for event in orch.wait() {
//!     println!("{event:?}");
//! }
//! ```

pub mod config;
pub mod orchestrator;
pub mod protocol;
pub mod reactor;
pub mod tick;
pub mod worker;

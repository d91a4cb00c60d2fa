//! Heatnet Core -- the heat-network simulation engine for reactor grids.
//!
//! This crate owns everything that happens inside one tick of heat flow:
//! the part table, the layout snapshot, the packed network builder, the heat
//! step function and the segment tracker. It does no I/O and spawns no
//! threads; the runtime crate decides where and when a step runs.
//!
//! # Tick Pipeline
//!
//! 1. **Capacity** -- [`layout::LayoutSnapshot::fill_capacity`] writes each
//!    cell's containment into a flat buffer.
//! 2. **Build** -- [`network::NetworkBuilder`] packs inlets, valves, exchangers
//!    and outlets into fixed-capacity buffers, gating valves against the
//!    current heat.
//! 3. **Step** -- [`step::StepScratch::step`] runs inlets, valves, exchangers
//!    and outlets in that order, then snaps residue to zero.
//! 4. **Report** -- [`step::overloaded_cells`] lists cells above containment.
//!
//! Segments are consulted outside the step, for venting and statistics:
//!
//! ```rust,ignore
//! tracker.observe(&layout);
//! tracker.update_if_dirty(&layout, &parts, &heat);
//! let vented = tracker.vent(&mut heat, 1.0);
//! ```
//!
//! # Indexing
//!
//! Every flat buffer is indexed by `row * stride + col`, where `stride` is
//! the column capacity rather than the active column count (see
//! [`id::GridDims`]).
//!
//! # Key Types
//!
//! - [`part::PartTable`] -- Immutable part definitions, strings resolved once.
//! - [`layout::LayoutSnapshot`] -- Occupied cells handed in by the game model.
//! - [`network::PackedNetwork`] -- Per-tick packed component records.
//! - [`step::StepScratch`] -- Reusable scratch space for the step function.
//! - [`segment::SegmentTracker`] -- Union-find grouping with a dirty flag.
//! - [`hash::StateHash`] -- FNV-1a hashing for fingerprints and determinism.

#[cfg(feature = "data-loader")]
pub mod data_loader;
pub mod dirty;
pub mod hash;
pub mod id;
pub mod layout;
pub mod network;
pub mod numeric;
pub mod part;
pub mod segment;
pub mod step;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

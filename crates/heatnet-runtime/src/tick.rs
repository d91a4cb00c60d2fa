//! The unit of work the orchestrator dispatches: a batch of reactor ticks.
//!
//! [`run_ticks`] is the only place a tick is computed. The inline path and the
//! worker thread both call it, so the two paths cannot drift apart.

use crate::reactor::ReactorState;
use heatnet_core::id::{CellIndex, RequestId};
use heatnet_core::layout::{CellLookup, LayoutSnapshot};
use heatnet_core::network::{NetworkBuilder, NetworkLimits, PackedNetwork};
use heatnet_core::numeric::{non_negative, read, snap_to_zero};
use heatnet_core::part::{PartCategory, PartTable};
use heatnet_core::step::{StepScratch, Transfer, TransferLog, overloaded_cells};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything one batch needs apart from the part table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickRequest {
    pub id: RequestId,
    /// Heat buffer indexed by `row * stride + col`.
    pub heat: Vec<f64>,
    pub layout: LayoutSnapshot,
    pub reactor: ReactorState,
    pub multiplier: f64,
    /// Logical ticks to fold into this batch. 0 is treated as 1.
    pub tick_count: u32,
    pub auto_sell: bool,
    pub record_transfers: bool,
    pub limits: NetworkLimits,
}

/// Latest remaining fuel for one tile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TicksUpdate {
    pub row: u32,
    pub col: u32,
    pub ticks: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickResult {
    pub id: RequestId,
    pub heat: Vec<f64>,
    pub reactor_heat: f64,
    pub reactor_power: f64,
    pub heat_delta: f64,
    pub power_delta: f64,
    pub money_earned: f64,
    pub heat_from_inlets: f64,
    /// Cells above containment after any tick of the batch, sorted, no duplicates.
    pub explosion_indices: Vec<CellIndex>,
    /// Fuel cells that ran out during the batch, sorted, no duplicates.
    pub depletion_indices: Vec<CellIndex>,
    pub tile_updates: Vec<TicksUpdate>,
    pub transfers: Vec<Transfer>,
    pub ticks_run: u32,
}

/// Why a batch produced no result. Serializable so the worker can report it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum TickError {
    #[error("heat buffer holds {actual} cells but the layout needs {expected}")]
    BufferTooSmall { expected: usize, actual: usize },
    #[error("tick computation panicked: {0}")]
    Panicked(String),
    #[error("worker could not read the request: {0}")]
    Protocol(String),
}

/// Scratch space reused across batches.
#[derive(Debug, Clone)]
pub struct TickBuffers {
    builder: NetworkBuilder,
    network: PackedNetwork,
    limits: NetworkLimits,
    scratch: StepScratch,
    lookup: CellLookup,
    capacity: Vec<f64>,
    fuel_ticks: Vec<f64>,
    overloaded: Vec<CellIndex>,
}

impl TickBuffers {
    pub fn new(limits: NetworkLimits) -> Self {
        Self {
            builder: NetworkBuilder::new(),
            network: PackedNetwork::new(limits),
            limits,
            scratch: StepScratch::new(),
            lookup: CellLookup::new(),
            capacity: Vec::new(),
            fuel_ticks: Vec::new(),
            overloaded: Vec::new(),
        }
    }

    /// Reallocate the packed network only when the limits change.
    fn ensure_limits(&mut self, limits: NetworkLimits) {
        if self.limits != limits {
            tracing::debug!(?limits, "reallocating packed network");
            self.network = PackedNetwork::new(limits);
            self.limits = limits;
        }
    }
}

impl Default for TickBuffers {
    fn default() -> Self {
        Self::new(NetworkLimits::default())
    }
}

/// Run `tick_count` logical ticks and return the final state.
///
/// The packed network is rebuilt every tick, so valve gating follows the
/// heat as it moves. Fuel ticks count down inside the batch from the values
/// in the layout.
pub fn run_ticks(
    request: TickRequest,
    parts: &PartTable,
    buffers: &mut TickBuffers,
) -> Result<TickResult, TickError> {
    let TickRequest {
        id,
        mut heat,
        layout,
        mut reactor,
        multiplier,
        tick_count,
        auto_sell,
        record_transfers,
        limits,
    } = request;

    let dims = layout.dims;
    if heat.len() < dims.buffer_len() {
        return Err(TickError::BufferTooSmall {
            expected: dims.buffer_len(),
            actual: heat.len(),
        });
    }
    let ticks = tick_count.max(1);
    let multiplier = non_negative(multiplier);
    buffers.ensure_limits(limits);
    buffers.lookup.rebuild(&layout);
    buffers.fuel_ticks.clear();
    buffers
        .fuel_ticks
        .extend(layout.placements.iter().map(|p| p.ticks));

    let heat_before = reactor.current_heat;
    let power_before = reactor.current_power;
    let mut money_earned = 0.0;
    let mut heat_from_inlets = 0.0;
    let mut explosions = Vec::new();
    let mut depletions = Vec::new();
    let mut fuel_updates: BTreeMap<usize, f64> = BTreeMap::new();
    let mut transfers = TransferLog::new();

    for _ in 0..ticks {
        layout.fill_capacity(parts, &mut buffers.capacity, heat.len());
        buffers
            .builder
            .build(&layout, parts, &heat, &mut buffers.network);
        let log = record_transfers.then_some(&mut transfers);
        let outcome = buffers.scratch.step(
            &mut heat,
            &buffers.capacity,
            &buffers.network,
            reactor.current_heat,
            multiplier,
            log,
        );
        reactor.current_heat = outcome.reactor_heat;
        heat_from_inlets += outcome.heat_from_inlets;

        // Fuel cells.
        let mut power_gain = 0.0;
        let mut unabsorbed = 0.0;
        for (slot, p) in layout.placements.iter().enumerate() {
            let Some(def) = parts.get(p.part_index) else {
                continue;
            };
            if def.category != PartCategory::Cell || buffers.fuel_ticks[slot] <= 0.0 {
                continue;
            }
            let Some(index) = dims.index(p.coord()) else {
                continue;
            };
            power_gain += def.power * multiplier;
            let generated = def.heat * multiplier;

            let sinks = || {
                buffers
                    .lookup
                    .occupied_neighbors(p.coord())
                    .filter_map(|(coord, nslot)| {
                        let ndef = parts.get(layout.placements[nslot].part_index)?;
                        (ndef.containment > 0.0).then(|| dims.index(coord)).flatten()
                    })
            };
            let count = sinks().count();
            if count > 0 {
                let share = generated / count as f64;
                for nidx in sinks() {
                    heat[nidx as usize] += share;
                }
            } else {
                unabsorbed += generated;
            }

            buffers.fuel_ticks[slot] -= multiplier;
            fuel_updates.insert(slot, buffers.fuel_ticks[slot]);
            if buffers.fuel_ticks[slot] <= 0.0 {
                depletions.push(index);
            }
        }
        reactor.current_heat += unabsorbed;

        buffers.overloaded.clear();
        overloaded_cells(&heat, &buffers.capacity, &mut buffers.overloaded);
        explosions.extend_from_slice(&buffers.overloaded);

        // Per-tile venting.
        for p in &layout.placements {
            let is_vent = parts
                .get(p.part_index)
                .is_some_and(|d| d.category == PartCategory::Vent);
            let rate = non_negative(p.vent_rate) * multiplier;
            if !is_vent || rate <= 0.0 {
                continue;
            }
            let Some(index) = dims.index(p.coord()) else {
                continue;
            };
            let h = read(&heat, index);
            let vented = rate.min(h);
            heat[index as usize] = snap_to_zero(h - vented);
            if reactor.stirling_multiplier > 0.0 && vented > 0.0 {
                power_gain += vented * reactor.stirling_multiplier;
            }
        }

        // Power, with overflow turning into heat.
        reactor.current_power += power_gain;
        reactor.spill_power();
        let power_multiplier = reactor.effective_power_multiplier();
        if power_multiplier != 1.0 {
            reactor.current_power += power_gain * (power_multiplier - 1.0);
            reactor.spill_power();
        }

        if auto_sell && reactor.auto_sell_multiplier > 0.0 {
            let cap = reactor.max_power * reactor.auto_sell_multiplier * multiplier;
            let sold = reactor.current_power.min(cap);
            if sold > 0.0 {
                reactor.current_power -= sold;
                money_earned += sold * reactor.sell_price();
            }
        }
        if reactor.current_power > reactor.max_power {
            reactor.current_power = reactor.max_power;
        }

        let reduction = reactor.heat_control_rate() * multiplier;
        if reduction > 0.0 {
            reactor.current_heat = (reactor.current_heat - reduction).max(0.0);
        }
        reactor.clamp_heat();
    }

    explosions.sort_unstable();
    explosions.dedup();
    depletions.sort_unstable();
    depletions.dedup();
    let tile_updates = fuel_updates
        .into_iter()
        .map(|(slot, ticks)| {
            let p = &layout.placements[slot];
            TicksUpdate {
                row: p.row,
                col: p.col,
                ticks,
            }
        })
        .collect();

    tracing::debug!(
        id = id.0,
        ticks,
        reactor_heat = reactor.current_heat,
        reactor_power = reactor.current_power,
        "tick batch complete"
    );

    Ok(TickResult {
        id,
        heat,
        reactor_heat: reactor.current_heat,
        reactor_power: reactor.current_power,
        heat_delta: reactor.current_heat - heat_before,
        power_delta: reactor.current_power - power_before,
        money_earned,
        heat_from_inlets,
        explosion_indices: explosions,
        depletion_indices: depletions,
        tile_updates,
        transfers,
        ticks_run: ticks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use heatnet_core::test_utils::*;

    fn request(layout: LayoutSnapshot, reactor: ReactorState) -> TickRequest {
        TickRequest {
            id: RequestId(1),
            heat: heat_buffer(layout.dims),
            layout,
            reactor,
            multiplier: 1.0,
            tick_count: 1,
            auto_sell: false,
            record_transfers: false,
            limits: NetworkLimits::default(),
        }
    }

    fn run(req: TickRequest) -> TickResult {
        run_ticks(req, &standard_parts(), &mut TickBuffers::default()).unwrap()
    }

    #[test]
    fn fuel_heat_spreads_to_containment_neighbors() {
        let parts = standard_parts();
        let result = run(request(layout_from_map(&parts, &["CFC"]), ReactorState::default()));
        assert_eq!(result.heat, vec![0.5, 0.0, 0.5]);
        assert_eq!(result.reactor_power, 1.0);
        assert_eq!(result.reactor_heat, 0.0);
        assert_eq!(result.tile_updates, vec![TicksUpdate { row: 0, col: 1, ticks: 99.0 }]);
    }

    #[test]
    fn isolated_fuel_heats_the_reactor() {
        let parts = standard_parts();
        let result = run(request(layout_from_map(&parts, &["F"]), ReactorState::default()));
        assert_eq!(result.reactor_heat, 1.0);
        assert_eq!(result.heat_delta, 1.0);
    }

    #[test]
    fn depleted_fuel_stops_producing() {
        let parts = standard_parts();
        let mut layout = layout_from_map(&parts, &["F"]);
        layout.placements[0].ticks = 1.0;
        let mut req = request(layout, ReactorState::default());
        req.tick_count = 3;
        let result = run(req);
        assert_eq!(result.depletion_indices, vec![0]);
        assert_eq!(result.reactor_power, 1.0);
        assert_eq!(result.ticks_run, 3);
    }

    #[test]
    fn vents_feed_stirling_power() {
        let parts = standard_parts();
        let layout = layout_from_map(&parts, &["V"]);
        let reactor = ReactorState {
            stirling_multiplier: 0.5,
            ..ReactorState::default()
        };
        let mut req = request(layout, reactor);
        req.heat = vec![10.0];
        let result = run(req);
        assert_eq!(result.heat, vec![6.0]);
        assert_eq!(result.reactor_power, 2.0);
    }

    #[test]
    fn power_overflow_turns_into_heat() {
        let parts = standard_parts();
        let reactor = ReactorState {
            current_power: 100.0,
            max_power: 100.0,
            ..ReactorState::default()
        };
        let result = run(request(layout_from_map(&parts, &["CF"]), reactor));
        assert_eq!(result.reactor_power, 100.0);
        assert_eq!(result.reactor_heat, 0.5);
    }

    #[test]
    fn auto_sell_converts_power_to_money() {
        let parts = standard_parts();
        let reactor = ReactorState {
            current_power: 50.0,
            max_power: 100.0,
            auto_sell_multiplier: 0.1,
            sell_price_multiplier: 2.0,
            ..ReactorState::default()
        };
        let mut req = request(layout_from_map(&parts, &["."]), reactor);
        req.auto_sell = true;
        let result = run(req);
        assert_eq!(result.reactor_power, 40.0);
        assert_eq!(result.money_earned, 20.0);
        assert_eq!(result.power_delta, -10.0);
    }

    #[test]
    fn reactor_heat_clamped_to_max() {
        let parts = standard_parts();
        let reactor = ReactorState {
            current_heat: 999.5,
            max_heat: 1000.0,
            ..ReactorState::default()
        };
        let result = run(request(layout_from_map(&parts, &["F"]), reactor));
        assert_eq!(result.reactor_heat, 1000.0);
    }

    #[test]
    fn overloads_are_reported_once() {
        let parts = standard_parts();
        let mut req = request(layout_from_map(&parts, &["V"]), ReactorState::default());
        req.layout.placements[0].vent_rate = 0.0;
        req.heat = vec![500.0];
        req.tick_count = 4;
        let result = run(req);
        assert_eq!(result.explosion_indices, vec![0]);
    }

    #[test]
    fn short_buffer_is_rejected() {
        let parts = standard_parts();
        let mut req = request(layout_from_map(&parts, &["CC"]), ReactorState::default());
        req.heat = vec![0.0];
        let err = run_ticks(req, &parts, &mut TickBuffers::default()).unwrap_err();
        assert_eq!(err, TickError::BufferTooSmall { expected: 2, actual: 1 });
    }

    #[test]
    fn batch_matches_repeated_single_ticks() {
        let parts = standard_parts();
        let layout = layout_from_map(&parts, &["VXCF", "IX|C", "CWXV"]);
        let mut start = request(layout, ReactorState { current_heat: 200.0, ..ReactorState::default() });
        start.heat.iter_mut().enumerate().for_each(|(i, h)| *h = (i * 53 % 170) as f64);

        let mut batch = start.clone();
        batch.tick_count = 5;
        let batched = run(batch);

        let mut single = start;
        let mut buffers = TickBuffers::default();
        let mut last = None;
        for _ in 0..5 {
            let result = run_ticks(single.clone(), &parts, &mut buffers).unwrap();
            single.heat = result.heat.clone();
            single.reactor.current_heat = result.reactor_heat;
            single.reactor.current_power = result.reactor_power;
            for update in &result.tile_updates {
                if let Some(p) = single
                    .layout
                    .placements
                    .iter_mut()
                    .find(|p| p.row == update.row && p.col == update.col)
                {
                    p.ticks = update.ticks;
                }
            }
            last = Some(result);
        }
        let last = last.unwrap();
        assert_eq!(batched.heat, last.heat);
        assert_eq!(batched.reactor_heat, last.reactor_heat);
        assert_eq!(batched.reactor_power, last.reactor_power);
    }
}

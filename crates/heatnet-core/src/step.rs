//! The heat step: one tick of transfers over a [`PackedNetwork`].
//!
//! Passes run in a fixed order, and the order is part of the contract:
//!
//! 1. inlets drain neighbors into the reactor,
//! 2. valves move heat input -> output against a snapshot, then zero their own cell,
//! 3. exchangers diffuse in two phases (push, then pull), applied atomically,
//! 4. outlets push reactor heat into neighbors,
//! 5. residue below [`HEAT_EPSILON`](crate::numeric::HEAT_EPSILON) snaps to zero.
//!
//! The function is pure apart from the `heat` slice it is handed: it never
//! touches `capacity`, never allocates once its scratch space is warm, and
//! gives bit-identical results for identical inputs.

use crate::id::CellIndex;
use crate::network::{ExchangerRecord, PackedNetwork, ValveRecord};
use crate::numeric::{headroom, non_negative, read, snap_to_zero};
use crate::part::{NeighborCategory, ValveType};
use serde::{Deserialize, Serialize};

/// Top-up valves never move more than this share of the output capacity per tick.
pub const TOPUP_RATE_SHARE: f64 = 0.2;

/// One heat movement between two cells.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub from: CellIndex,
    pub to: CellIndex,
    pub amount: f64,
}

/// Ordered record of every transfer made by valves and exchangers.
pub type TransferLog = Vec<Transfer>;

/// Scalars produced by one step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub reactor_heat: f64,
    /// Heat the inlets moved into the reactor this step.
    pub heat_from_inlets: f64,
}

/// Reusable scratch buffers for [`StepScratch::step`].
///
/// Every buffer is sized to the heat slice on first use and reused afterwards.
#[derive(Debug, Clone, Default)]
pub struct StepScratch {
    snapshot: Vec<f64>,
    sent: Vec<f64>,
    received: Vec<f64>,
    valve_neighbor: Vec<bool>,
    planned: Vec<Transfer>,
}

/// Run one step with freshly allocated scratch space.
///
/// Prefer keeping a [`StepScratch`] around when stepping repeatedly.
pub fn step(
    heat: &mut [f64],
    capacity: &[f64],
    network: &PackedNetwork,
    reactor_heat: f64,
    multiplier: f64,
    log: Option<&mut TransferLog>,
) -> StepOutcome {
    StepScratch::default().step(heat, capacity, network, reactor_heat, multiplier, log)
}

impl StepScratch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one step, mutating `heat` in place.
    ///
    /// `multiplier` scales every transfer rate; negative or NaN multipliers
    /// are treated as 0. When `log` is given, valve and exchanger transfers
    /// are appended to it in application order.
    pub fn step(
        &mut self,
        heat: &mut [f64],
        capacity: &[f64],
        network: &PackedNetwork,
        reactor_heat: f64,
        multiplier: f64,
        mut log: Option<&mut TransferLog>,
    ) -> StepOutcome {
        let multiplier = non_negative(multiplier);
        let mut reactor_heat = non_negative(reactor_heat);

        let heat_from_inlets = run_inlets(heat, network, multiplier, &mut reactor_heat);
        self.run_valves(heat, capacity, network.valves.as_slice(), multiplier, log.as_deref_mut());
        self.run_exchangers(heat, network, multiplier, log.as_deref_mut());
        reactor_heat = run_outlets(heat, network, multiplier, reactor_heat);

        for cell in heat.iter_mut() {
            *cell = snap_to_zero(*cell);
        }
        let outcome = StepOutcome {
            reactor_heat: snap_to_zero(reactor_heat),
            heat_from_inlets,
        };
        tracing::trace!(
            reactor_heat = outcome.reactor_heat,
            heat_from_inlets = outcome.heat_from_inlets,
            components = network.component_count(),
            "heat step"
        );
        outcome
    }

    fn reset_ledgers(&mut self, len: usize) {
        self.sent.clear();
        self.sent.resize(len, 0.0);
        self.received.clear();
        self.received.resize(len, 0.0);
        self.planned.clear();
    }

    /// Valves are planned against a snapshot and applied together.
    ///
    /// Two valves sharing an input cannot jointly take more than the input's
    /// snapshot heat, and two valves sharing an output cannot jointly exceed
    /// its headroom.
    fn run_valves(
        &mut self,
        heat: &mut [f64],
        capacity: &[f64],
        valves: &[ValveRecord],
        multiplier: f64,
        mut log: Option<&mut TransferLog>,
    ) {
        if valves.is_empty() {
            return;
        }
        self.snapshot.clear();
        self.snapshot.extend_from_slice(heat);
        self.reset_ledgers(heat.len());

        for valve in valves {
            let (input, output) = (valve.input as usize, valve.output as usize);
            if input >= heat.len() || output >= heat.len() {
                continue;
            }
            let out_cap = match read(capacity, valve.output) {
                c if c > 0.0 => c,
                _ => 1.0,
            };
            let mut max_transfer = non_negative(valve.rate) * multiplier;
            if valve.valve_type == ValveType::Topup {
                max_transfer = max_transfer.min(out_cap * TOPUP_RATE_SHARE);
            }
            let available = non_negative(read(&self.snapshot, valve.input) - self.sent[input]);
            let room = headroom(out_cap, read(&self.snapshot, valve.output) + self.received[output]);
            let transfer = max_transfer.min(available).min(room);
            if transfer > 0.0 {
                self.sent[input] += transfer;
                self.received[output] += transfer;
                self.planned.push(Transfer {
                    from: valve.input,
                    to: valve.output,
                    amount: transfer,
                });
            }
        }

        apply(heat, &self.planned, log.as_deref_mut());
        for valve in valves {
            if let Some(cell) = heat.get_mut(valve.index as usize) {
                *cell = 0.0;
            }
        }
    }

    fn run_exchangers(
        &mut self,
        heat: &mut [f64],
        network: &PackedNetwork,
        multiplier: f64,
        log: Option<&mut TransferLog>,
    ) {
        let exchangers = network.exchangers.as_slice();
        if exchangers.is_empty() {
            return;
        }
        self.snapshot.clear();
        self.snapshot.extend_from_slice(heat);
        self.valve_neighbor.clear();
        self.valve_neighbor.resize(heat.len(), false);
        for &idx in network.valve_neighbors.as_slice() {
            if let Some(mark) = self.valve_neighbor.get_mut(idx as usize) {
                *mark = true;
            }
        }
        self.reset_ledgers(heat.len());

        for ex in exchangers {
            self.plan_push(heat, ex, multiplier);
        }
        for ex in exchangers {
            self.plan_pull(heat, ex, multiplier);
        }
        apply(heat, &self.planned, log);
    }

    /// Start-of-phase heat. Valve neighbors read the live buffer, everything
    /// else reads the snapshot. Nothing is written during planning, so the two
    /// agree until the plan is applied.
    fn start_heat(&self, live: &[f64], index: CellIndex) -> f64 {
        if self.valve_neighbor.get(index as usize).copied().unwrap_or(false) {
            read(live, index)
        } else {
            read(&self.snapshot, index)
        }
    }

    fn plan_push(&mut self, live: &[f64], ex: &ExchangerRecord, multiplier: f64) {
        let own = self.start_heat(live, ex.index);
        let transfer_val = non_negative(ex.rate) * multiplier;
        let count = ex.neighbor_count as usize;

        let mut total_headroom = 0.0;
        for n in 0..count {
            total_headroom += headroom(ex.neighbor_caps[n], self.start_heat(live, ex.neighbors[n]));
        }
        if total_headroom == 0.0 {
            total_headroom = 1.0;
        }

        let mut remaining = own;
        for n in 0..count {
            if remaining <= 0.0 {
                break;
            }
            let nidx = ex.neighbors[n];
            let neighbor = self.start_heat(live, nidx);
            let diff = match own - neighbor {
                d if d > 0.0 => d,
                _ => 1.0,
            };
            let bias = headroom(ex.neighbor_caps[n], neighbor) / total_headroom;
            let amount = (transfer_val * bias)
                .floor()
                .max(1.0)
                .min((diff / 2.0).ceil())
                .min(remaining);
            let downhill = own > neighbor;
            let into_sink = ex.neighbor_cats[n] == NeighborCategory::VentOrCoolant
                && own == neighbor
                && own > 0.0;
            if amount > 0.0 && (downhill || into_sink) {
                self.planned.push(Transfer {
                    from: ex.index,
                    to: nidx,
                    amount,
                });
                remaining -= amount;
                if let Some(sent) = self.sent.get_mut(ex.index as usize) {
                    *sent += amount;
                }
            }
        }
    }

    /// Neighbors hotter than the exchanger push back toward it. The `sent`
    /// ledger already holds push-phase outflows, so no cell gives away more
    /// than its start heat across both phases.
    fn plan_pull(&mut self, live: &[f64], ex: &ExchangerRecord, multiplier: f64) {
        let own = self.start_heat(live, ex.index);
        let transfer_val = non_negative(ex.rate) * multiplier;

        for &nidx in ex.neighbors() {
            let neighbor = self.start_heat(live, nidx);
            let already = self.sent.get(nidx as usize).copied().unwrap_or(0.0);
            let available = non_negative(neighbor - already);
            if available <= 0.0 || neighbor <= own {
                continue;
            }
            let amount = transfer_val
                .min(((neighbor - own) / 2.0).ceil())
                .min(available);
            if amount > 0.0 {
                self.planned.push(Transfer {
                    from: nidx,
                    to: ex.index,
                    amount,
                });
                if let Some(sent) = self.sent.get_mut(nidx as usize) {
                    *sent += amount;
                }
            }
        }
    }
}

fn run_inlets(heat: &mut [f64], network: &PackedNetwork, multiplier: f64, reactor_heat: &mut f64) -> f64 {
    let mut from_inlets = 0.0;
    for inlet in network.inlets.as_slice() {
        let rate = non_negative(inlet.rate) * multiplier;
        for &idx in inlet.neighbors() {
            let Some(cell) = heat.get_mut(idx as usize) else {
                continue;
            };
            let h = non_negative(*cell);
            if h <= 0.0 {
                continue;
            }
            let transfer = rate.min(h);
            *cell = h - transfer;
            *reactor_heat += transfer;
            from_inlets += transfer;
        }
    }
    from_inlets
}

fn run_outlets(heat: &mut [f64], network: &PackedNetwork, multiplier: f64, mut reactor_heat: f64) -> f64 {
    for outlet in network.outlets.as_slice() {
        if !outlet.activated || reactor_heat <= 0.0 {
            continue;
        }
        let to_transfer = (non_negative(outlet.rate) * multiplier).min(reactor_heat);
        if to_transfer <= 0.0 {
            continue;
        }
        let neighbors = outlet.neighbors();
        if neighbors.is_empty() {
            if let Some(cell) = heat.get_mut(outlet.index as usize) {
                *cell = non_negative(*cell) + to_transfer;
                reactor_heat -= to_transfer;
            }
            continue;
        }
        let per_neighbor = to_transfer / neighbors.len() as f64;
        for (n, &nidx) in neighbors.iter().enumerate() {
            let Some(cell) = heat.get_mut(nidx as usize) else {
                continue;
            };
            let current = non_negative(*cell);
            let cap = outlet.neighbor_caps[n];
            let mut add = per_neighbor;
            if outlet.wide && cap > 0.0 {
                add = add.min(headroom(cap, current));
            }
            add = add.min(reactor_heat);
            if add > 0.0 {
                *cell = current + add;
                reactor_heat -= add;
            }
        }
    }
    non_negative(reactor_heat)
}

fn apply(heat: &mut [f64], planned: &[Transfer], mut log: Option<&mut TransferLog>) {
    for t in planned {
        let (from, to) = (t.from as usize, t.to as usize);
        if from >= heat.len() || to >= heat.len() {
            continue;
        }
        heat[from] = non_negative(heat[from] - t.amount);
        heat[to] += t.amount;
        if let Some(log) = log.as_deref_mut() {
            log.push(*t);
        }
    }
}

/// Append every index whose heat exceeds a positive capacity.
///
/// The core only reports the condition; consequences belong to the caller.
pub fn overloaded_cells(heat: &[f64], capacity: &[f64], out: &mut Vec<CellIndex>) {
    out.extend(
        heat.iter()
            .zip(capacity)
            .enumerate()
            .filter(|(_, (h, c))| **c > 0.0 && **h > **c)
            .map(|(i, _)| i as CellIndex),
    );
}

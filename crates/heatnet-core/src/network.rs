//! Packed heat network: fixed-capacity record buffers rebuilt from a layout.
//!
//! The builder scans a [`LayoutSnapshot`] once per tick and writes the four
//! conducting component kinds (inlets, valves, exchangers, outlets) into
//! pre-sized buffers, together with the set of cells adjacent to a valve.
//! Buffers are allocated once from [`NetworkLimits`] and reused, so a rebuild
//! never grows them; components beyond a limit are dropped for that tick.
//!
//! # Classification
//!
//! - Inlet: every occupied, known 4-neighbor.
//! - Valve: needs two or more known neighbors. The orientation digit picks the
//!   sort axis (1, 3: column; otherwise row) and 3/4 swap input and output.
//!   Overflow valves need the input at >= 80% fill, top-up valves need the
//!   output at <= 20% fill. Failing valves are omitted for this tick only.
//! - Exchanger: heat exchangers and conductive plating. Neighbors carry their
//!   containment and a [`NeighborCategory`].
//! - Outlet: neighbors exclude valves.

use crate::id::{CellCoord, CellIndex};
use crate::layout::{CellLookup, LayoutSnapshot, TilePlacement, resolve};
use crate::numeric::{fill_ratio, read};
use crate::part::{ComponentKind, NeighborCategory, PartCategory, PartDef, PartTable, ValveType};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Neighbor slots per record. The grid is 4-connected.
pub const MAX_NEIGHBORS: usize = 4;

/// Overflow valves open at or above this input fill ratio.
pub const OVERFLOW_OPEN_RATIO: f64 = 0.8;

/// Top-up valves open at or below this output fill ratio.
pub const TOPUP_OPEN_RATIO: f64 = 0.2;

/// Upper bound on decoded buffer capacity, so a corrupt frame cannot request
/// an arbitrary allocation.
const MAX_DECODED_CAPACITY: usize = 1 << 16;

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Per-kind record capacity of a [`PackedNetwork`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkLimits {
    pub max_inlets: usize,
    pub max_valves: usize,
    pub max_valve_neighbors: usize,
    pub max_exchangers: usize,
    pub max_outlets: usize,
}

impl Default for NetworkLimits {
    fn default() -> Self {
        Self {
            max_inlets: 32,
            max_valves: 32,
            max_valve_neighbors: 256,
            max_exchangers: 64,
            max_outlets: 32,
        }
    }
}

// ---------------------------------------------------------------------------
// Fixed-capacity buffer
// ---------------------------------------------------------------------------

/// A buffer allocated once at a fixed capacity with a tracked fill count.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedBuffer<T> {
    slots: Box<[T]>,
    len: usize,
}

impl<T: Copy + Default> PackedBuffer<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![T::default(); capacity].into_boxed_slice(),
            len: 0,
        }
    }

    /// Append a record. Returns `false` (and drops the record) when full.
    pub fn push(&mut self, value: T) -> bool {
        match self.slots.get_mut(self.len) {
            Some(slot) => {
                *slot = value;
                self.len += 1;
                true
            }
            None => false,
        }
    }
}

impl<T> PackedBuffer<T> {
    /// Forget all records without touching the allocation.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn as_slice(&self) -> &[T] {
        &self.slots[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

#[derive(Serialize)]
struct BufferFrame<'a, T> {
    capacity: usize,
    items: &'a [T],
}

#[derive(Deserialize)]
struct OwnedBufferFrame<T> {
    capacity: usize,
    items: Vec<T>,
}

impl<T: Serialize> Serialize for PackedBuffer<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        BufferFrame {
            capacity: self.slots.len(),
            items: &self.slots[..self.len],
        }
        .serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for PackedBuffer<T>
where
    T: Deserialize<'de> + Copy + Default,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let frame = OwnedBufferFrame::<T>::deserialize(deserializer)?;
        let capacity = frame
            .capacity
            .min(MAX_DECODED_CAPACITY)
            .max(frame.items.len());
        let mut buf = Self::with_capacity(capacity);
        for item in frame.items {
            buf.push(item);
        }
        Ok(buf)
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Pulls heat from neighbors into the reactor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InletRecord {
    pub index: CellIndex,
    pub rate: f64,
    pub neighbor_count: u8,
    pub neighbors: [CellIndex; MAX_NEIGHBORS],
}

impl InletRecord {
    pub fn neighbors(&self) -> &[CellIndex] {
        &self.neighbors[..self.neighbor_count as usize]
    }
}

/// Moves heat from `input` to `output` under a type-specific rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ValveRecord {
    pub index: CellIndex,
    pub valve_type: ValveType,
    pub orientation: u8,
    pub rate: f64,
    pub input: CellIndex,
    pub output: CellIndex,
}

/// Diffuses heat with its neighbors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ExchangerRecord {
    pub index: CellIndex,
    pub rate: f64,
    pub containment: f64,
    pub neighbor_count: u8,
    pub neighbors: [CellIndex; MAX_NEIGHBORS],
    pub neighbor_caps: [f64; MAX_NEIGHBORS],
    pub neighbor_cats: [NeighborCategory; MAX_NEIGHBORS],
}

impl ExchangerRecord {
    pub fn neighbors(&self) -> &[CellIndex] {
        &self.neighbors[..self.neighbor_count as usize]
    }
}

/// Pushes reactor heat out into neighbors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OutletRecord {
    pub index: CellIndex,
    pub rate: f64,
    pub activated: bool,
    /// Per-neighbor delivery is capped by the neighbor's headroom.
    pub wide: bool,
    pub neighbor_count: u8,
    pub neighbors: [CellIndex; MAX_NEIGHBORS],
    pub neighbor_caps: [f64; MAX_NEIGHBORS],
}

impl OutletRecord {
    pub fn neighbors(&self) -> &[CellIndex] {
        &self.neighbors[..self.neighbor_count as usize]
    }
}

// ---------------------------------------------------------------------------
// Packed network
// ---------------------------------------------------------------------------

/// The input of [`step`](crate::step::step): every conducting component of
/// one tick, packed into fixed-capacity buffers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackedNetwork {
    pub inlets: PackedBuffer<InletRecord>,
    pub valves: PackedBuffer<ValveRecord>,
    pub exchangers: PackedBuffer<ExchangerRecord>,
    pub outlets: PackedBuffer<OutletRecord>,
    /// Non-valve cells adjacent to any valve, in discovery order.
    pub valve_neighbors: PackedBuffer<CellIndex>,
}

impl PackedNetwork {
    pub fn new(limits: NetworkLimits) -> Self {
        Self {
            inlets: PackedBuffer::with_capacity(limits.max_inlets),
            valves: PackedBuffer::with_capacity(limits.max_valves),
            exchangers: PackedBuffer::with_capacity(limits.max_exchangers),
            outlets: PackedBuffer::with_capacity(limits.max_outlets),
            valve_neighbors: PackedBuffer::with_capacity(limits.max_valve_neighbors),
        }
    }

    pub fn clear(&mut self) {
        self.inlets.clear();
        self.valves.clear();
        self.exchangers.clear();
        self.outlets.clear();
        self.valve_neighbors.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.inlets.is_empty()
            && self.valves.is_empty()
            && self.exchangers.is_empty()
            && self.outlets.is_empty()
    }

    /// Total component records across the four kinds.
    pub fn component_count(&self) -> usize {
        self.inlets.len() + self.valves.len() + self.exchangers.len() + self.outlets.len()
    }
}

impl Default for PackedNetwork {
    fn default() -> Self {
        Self::new(NetworkLimits::default())
    }
}

/// Counters from one rebuild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    /// Valves omitted because their gating condition failed.
    pub gated_valves: usize,
    /// Components dropped because a buffer was full.
    pub dropped: usize,
    /// Neighbor lists cut at [`MAX_NEIGHBORS`].
    pub truncated_neighbors: usize,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Rebuilds a [`PackedNetwork`] from a layout, reusing its scratch space.
#[derive(Debug, Clone, Default)]
pub struct NetworkBuilder {
    lookup: CellLookup,
    valve_neighbor_marks: Vec<bool>,
    candidates: Vec<ValveCandidate>,
}

#[derive(Debug, Clone, Copy)]
struct ValveCandidate {
    coord: CellCoord,
    index: CellIndex,
    heat: f64,
    capacity: f64,
}

impl NetworkBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite `out` with the network described by `layout`.
    ///
    /// `heat` is read only for valve gating. Placements outside the grid and
    /// placements whose part is missing from `parts` are skipped.
    pub fn build(
        &mut self,
        layout: &LayoutSnapshot,
        parts: &PartTable,
        heat: &[f64],
        out: &mut PackedNetwork,
    ) -> BuildStats {
        let mut stats = BuildStats::default();
        out.clear();
        self.lookup.rebuild(layout);
        self.valve_neighbor_marks.clear();
        self.valve_neighbor_marks
            .resize(layout.dims.buffer_len(), false);

        // Valve neighbors first; every later pass may consult them.
        for (slot, placement) in layout.placements.iter().enumerate() {
            let Some((_, def)) = resolve(layout, parts, slot) else {
                continue;
            };
            if def.category != PartCategory::Valve || layout.dims.index(placement.coord()).is_none() {
                continue;
            }
            for (coord, nslot) in self.lookup.occupied_neighbors(placement.coord()) {
                let Some((_, ndef)) = resolve(layout, parts, nslot) else {
                    continue;
                };
                if ndef.category == PartCategory::Valve {
                    continue;
                }
                let Some(idx) = layout.dims.index(coord) else {
                    continue;
                };
                let mark = &mut self.valve_neighbor_marks[idx as usize];
                if !*mark {
                    *mark = true;
                    if !out.valve_neighbors.push(idx) {
                        stats.dropped += 1;
                    }
                }
            }
        }

        for (slot, placement) in layout.placements.iter().enumerate() {
            let Some((_, def)) = resolve(layout, parts, slot) else {
                tracing::trace!(row = placement.row, col = placement.col, "unknown part skipped");
                continue;
            };
            let Some(kind) = def.component_kind() else {
                continue;
            };
            let Some(index) = layout.dims.index(placement.coord()) else {
                continue;
            };
            let pushed = match kind {
                ComponentKind::Inlet => {
                    let record = self.inlet(layout, parts, placement, index, &mut stats);
                    out.inlets.push(record)
                }
                ComponentKind::Valve => {
                    match self.valve(layout, parts, placement, def, index, heat, &mut stats) {
                        Some(record) => out.valves.push(record),
                        None => continue,
                    }
                }
                ComponentKind::Exchanger => {
                    let record = self.exchanger(layout, parts, placement, def, index, &mut stats);
                    out.exchangers.push(record)
                }
                ComponentKind::Outlet => {
                    let record = self.outlet(layout, parts, placement, def, index, &mut stats);
                    out.outlets.push(record)
                }
            };
            if !pushed {
                stats.dropped += 1;
            }
        }

        if stats.dropped > 0 || stats.truncated_neighbors > 0 {
            tracing::debug!(
                dropped = stats.dropped,
                truncated = stats.truncated_neighbors,
                "packed network hit a capacity limit"
            );
        }
        stats
    }

    /// Known, occupied neighbors of a placement accepted by `keep`.
    fn known_neighbors<'a>(
        &'a self,
        layout: &'a LayoutSnapshot,
        parts: &'a PartTable,
        placement: &TilePlacement,
        keep: impl Fn(&PartDef) -> bool + 'a,
    ) -> impl Iterator<Item = (CellCoord, CellIndex, &'a PartDef)> + 'a {
        self.lookup
            .occupied_neighbors(placement.coord())
            .filter_map(move |(coord, nslot)| {
                let (_, ndef) = resolve(layout, parts, nslot)?;
                if !keep(ndef) {
                    return None;
                }
                let idx = layout.dims.index(coord)?;
                Some((coord, idx, ndef))
            })
    }

    fn inlet(
        &self,
        layout: &LayoutSnapshot,
        parts: &PartTable,
        placement: &TilePlacement,
        index: CellIndex,
        stats: &mut BuildStats,
    ) -> InletRecord {
        let mut record = InletRecord {
            index,
            rate: placement.transfer_rate.max(0.0),
            ..InletRecord::default()
        };
        for (_, idx, _) in self.known_neighbors(layout, parts, placement, |_| true) {
            let n = record.neighbor_count as usize;
            if n == MAX_NEIGHBORS {
                stats.truncated_neighbors += 1;
                break;
            }
            record.neighbors[n] = idx;
            record.neighbor_count += 1;
        }
        record
    }

    #[allow(clippy::too_many_arguments)]
    fn valve(
        &mut self,
        layout: &LayoutSnapshot,
        parts: &PartTable,
        placement: &TilePlacement,
        def: &PartDef,
        index: CellIndex,
        heat: &[f64],
        stats: &mut BuildStats,
    ) -> Option<ValveRecord> {
        let valve_type = def.valve_type?;
        let mut candidates = std::mem::take(&mut self.candidates);
        candidates.clear();
        candidates.extend(
            self.known_neighbors(layout, parts, placement, |_| true)
                .map(|(coord, idx, ndef)| ValveCandidate {
                    coord,
                    index: idx,
                    heat: read(heat, idx),
                    capacity: ndef.containment,
                }),
        );
        let record = gate_valve(&mut candidates, valve_type, def.valve_orientation()).map(
            |(input, output)| ValveRecord {
                index,
                valve_type,
                orientation: def.valve_orientation(),
                rate: placement.transfer_rate.max(0.0),
                input,
                output,
            },
        );
        self.candidates = candidates;
        if record.is_none() {
            stats.gated_valves += 1;
        }
        record
    }

    fn exchanger(
        &self,
        layout: &LayoutSnapshot,
        parts: &PartTable,
        placement: &TilePlacement,
        def: &PartDef,
        index: CellIndex,
        stats: &mut BuildStats,
    ) -> ExchangerRecord {
        let mut record = ExchangerRecord {
            index,
            rate: placement.transfer_rate.max(0.0),
            containment: if def.containment > 0.0 { def.containment } else { 1.0 },
            ..ExchangerRecord::default()
        };
        for (_, idx, ndef) in self.known_neighbors(layout, parts, placement, |_| true) {
            let n = record.neighbor_count as usize;
            if n == MAX_NEIGHBORS {
                stats.truncated_neighbors += 1;
                break;
            }
            record.neighbors[n] = idx;
            record.neighbor_caps[n] = ndef.containment.max(0.0);
            record.neighbor_cats[n] = NeighborCategory::of(ndef.category);
            record.neighbor_count += 1;
        }
        record
    }

    fn outlet(
        &self,
        layout: &LayoutSnapshot,
        parts: &PartTable,
        placement: &TilePlacement,
        def: &PartDef,
        index: CellIndex,
        stats: &mut BuildStats,
    ) -> OutletRecord {
        let mut record = OutletRecord {
            index,
            rate: placement.transfer_rate.max(0.0),
            activated: placement.activated,
            wide: def.is_wide_outlet(),
            ..OutletRecord::default()
        };
        let not_valve = |d: &PartDef| d.category != PartCategory::Valve;
        for (_, idx, ndef) in self.known_neighbors(layout, parts, placement, not_valve) {
            let n = record.neighbor_count as usize;
            if n == MAX_NEIGHBORS {
                stats.truncated_neighbors += 1;
                break;
            }
            record.neighbors[n] = idx;
            record.neighbor_caps[n] = ndef.containment.max(0.0);
            record.neighbor_count += 1;
        }
        record
    }
}

/// Resolve input and output neighbors and apply the gating rule.
///
/// Returns `(input, output)` when the valve is open this tick.
fn gate_valve(
    candidates: &mut [ValveCandidate],
    valve_type: ValveType,
    orientation: u8,
) -> Option<(CellIndex, CellIndex)> {
    if candidates.len() < 2 {
        return None;
    }
    if orientation == 1 || orientation == 3 {
        candidates.sort_by_key(|c| c.coord.col);
    } else {
        candidates.sort_by_key(|c| c.coord.row);
    }
    let first = candidates[0];
    let last = candidates[candidates.len() - 1];
    let (input, output) = if orientation == 3 || orientation == 4 {
        (last, first)
    } else {
        (first, last)
    };
    let open = match valve_type {
        ValveType::Overflow => fill_ratio(input.heat, input.capacity) >= OVERFLOW_OPEN_RATIO,
        ValveType::Topup => fill_ratio(output.heat, output.capacity) <= TOPUP_OPEN_RATIO,
        ValveType::Check => true,
    };
    open.then_some((input.index, output.index))
}

impl PackedNetwork {
    /// Convenience: allocate a network and build it in one call.
    pub fn build(
        layout: &LayoutSnapshot,
        parts: &PartTable,
        heat: &[f64],
        limits: NetworkLimits,
    ) -> (Self, BuildStats) {
        let mut network = Self::new(limits);
        let stats = NetworkBuilder::new().build(layout, parts, heat, &mut network);
        (network, stats)
    }
}

//! Segment tracker: groups connected heat-conducting tiles.
//!
//! A segment is a maximal 4-connected set of activated tiles whose part either
//! has containment or is a vent, exchanger, inlet or outlet. Segments are
//! rebuilt in full, and only when the [`DirtyTracker`] says the topology
//! changed. Aggregates are snapshots taken at the last rebuild.

use crate::dirty::DirtyTracker;
use crate::hash::topology_hash;
use crate::id::{CellIndex, SegmentId};
use crate::layout::{CellLookup, LayoutSnapshot};
use crate::numeric::{fill_ratio, non_negative, read, snap_to_zero};
use crate::part::{PartCategory, PartTable};
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

/// A member tile together with its effective rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatedCell {
    pub index: CellIndex,
    pub rate: f64,
}

/// One connected group of conducting tiles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Members in layout order.
    pub members: Vec<CellIndex>,
    pub vents: Vec<RatedCell>,
    pub inlets: Vec<RatedCell>,
    pub outlets: Vec<RatedCell>,
    pub total_heat: f64,
    pub total_containment: f64,
}

impl Segment {
    /// `total_heat / total_containment`, or 0 without containment.
    pub fn fullness_ratio(&self) -> f64 {
        fill_ratio(self.total_heat, self.total_containment)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, index: CellIndex) -> bool {
        self.members.contains(&index)
    }
}

/// Aggregate rates across all segments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentStats {
    pub segment_count: usize,
    pub total_vent: f64,
    pub total_inlet: f64,
    pub total_outlet: f64,
}

/// Union-find segment grouping with a lazy rebuild.
#[derive(Debug, Clone, Default)]
pub struct SegmentTracker {
    dirty: DirtyTracker,
    segments: SlotMap<SegmentId, Segment>,
    by_cell: Vec<Option<SegmentId>>,
    lookup: CellLookup,
    // Union-find scratch, indexed by dense id.
    parent: Vec<u32>,
    dense: Vec<Option<u32>>,
    tiles: Vec<usize>,
}

impl SegmentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_dirty(&mut self) {
        self.dirty.mark_topology();
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.is_dirty()
    }

    /// Compare the layout's topology fingerprint with the last one seen and
    /// mark dirty when it changed.
    pub fn observe(&mut self, layout: &LayoutSnapshot) -> bool {
        self.dirty.observe(topology_hash(layout))
    }

    /// Rebuild when dirty. Returns `true` when a rebuild happened.
    pub fn update_if_dirty(&mut self, layout: &LayoutSnapshot, parts: &PartTable, heat: &[f64]) -> bool {
        if !self.dirty.is_dirty() {
            return false;
        }
        self.rebuild(layout, parts, heat);
        true
    }

    /// Recompute every segment from scratch and mark the tracker clean.
    pub fn rebuild(&mut self, layout: &LayoutSnapshot, parts: &PartTable, heat: &[f64]) {
        let dims = layout.dims;
        self.segments.clear();
        self.by_cell.clear();
        self.by_cell.resize(dims.buffer_len(), None);
        self.lookup.rebuild(layout);
        self.dense.clear();
        self.dense.resize(dims.buffer_len(), None);
        self.parent.clear();
        self.tiles.clear();

        // Dense ids for qualifying tiles. Later duplicates on one cell win,
        // matching the cell lookup.
        for (slot, p) in layout.placements.iter().enumerate() {
            let Some(idx) = dims.index(p.coord()) else {
                continue;
            };
            if self.lookup.slot(idx) != Some(slot) || !qualifies(layout, parts, slot) {
                continue;
            }
            self.dense[idx as usize] = Some(self.parent.len() as u32);
            self.parent.push(self.parent.len() as u32);
            self.tiles.push(slot);
        }

        for id in 0..self.tiles.len() {
            let coord = layout.placements[self.tiles[id]].coord();
            for (ncoord, _) in self.lookup.occupied_neighbors(coord) {
                let Some(nidx) = dims.index(ncoord) else {
                    continue;
                };
                if let Some(other) = self.dense[nidx as usize] {
                    union(&mut self.parent, id as u32, other);
                }
            }
        }

        let mut root_segment: Vec<Option<SegmentId>> = vec![None; self.tiles.len()];
        for id in 0..self.tiles.len() {
            let root = find(&mut self.parent, id as u32) as usize;
            let seg_id = match root_segment[root] {
                Some(s) => s,
                None => {
                    let s = self.segments.insert(Segment::default());
                    root_segment[root] = Some(s);
                    s
                }
            };
            let p = &layout.placements[self.tiles[id]];
            let Some(idx) = dims.index(p.coord()) else {
                continue;
            };
            let Some(def) = parts.get(p.part_index) else {
                continue;
            };
            let Some(segment) = self.segments.get_mut(seg_id) else {
                continue;
            };
            segment.members.push(idx);
            segment.total_heat += read(heat, idx);
            segment.total_containment += def.containment.max(0.0);
            match def.category {
                PartCategory::Vent => segment.vents.push(RatedCell {
                    index: idx,
                    rate: non_negative(p.vent_rate),
                }),
                PartCategory::HeatInlet => segment.inlets.push(RatedCell {
                    index: idx,
                    rate: non_negative(p.transfer_rate),
                }),
                PartCategory::HeatOutlet => segment.outlets.push(RatedCell {
                    index: idx,
                    rate: non_negative(p.transfer_rate),
                }),
                _ => {}
            }
            self.by_cell[idx as usize] = Some(seg_id);
        }

        tracing::debug!(
            segments = self.segments.len(),
            tiles = self.tiles.len(),
            "segments rebuilt"
        );
        self.dirty.mark_clean();
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn get(&self, id: SegmentId) -> Option<&Segment> {
        self.segments.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SegmentId, &Segment)> {
        self.segments.iter()
    }

    /// Segment containing a cell, as of the last rebuild.
    pub fn segment_for(&self, index: CellIndex) -> Option<SegmentId> {
        self.by_cell.get(index as usize).copied().flatten()
    }

    /// Vent every segment against the live heat buffer.
    ///
    /// Each segment loses `min(live heat, sum of vent rates * multiplier)`,
    /// taken from members in proportion to their heat. Returns the total
    /// removed.
    pub fn vent(&self, heat: &mut [f64], multiplier: f64) -> f64 {
        let multiplier = non_negative(multiplier);
        let mut vented = 0.0;
        for segment in self.segments.values() {
            let capacity: f64 = segment.vents.iter().map(|v| v.rate * multiplier).sum();
            if capacity <= 0.0 {
                continue;
            }
            let live: f64 = segment.members.iter().map(|&i| non_negative(read(heat, i))).sum();
            if live <= 0.0 {
                continue;
            }
            let amount = capacity.min(live);
            let keep = 1.0 - amount / live;
            for &i in &segment.members {
                if let Some(cell) = heat.get_mut(i as usize) {
                    *cell = snap_to_zero(non_negative(*cell) * keep);
                }
            }
            vented += amount;
        }
        vented
    }

    /// Aggregate rates as of the last rebuild.
    pub fn stats(&self) -> SegmentStats {
        let mut stats = SegmentStats {
            segment_count: self.segments.len(),
            ..SegmentStats::default()
        };
        for segment in self.segments.values() {
            stats.total_vent += segment.vents.iter().map(|v| v.rate).sum::<f64>();
            stats.total_inlet += segment.inlets.iter().map(|v| v.rate).sum::<f64>();
            stats.total_outlet += segment.outlets.iter().map(|v| v.rate).sum::<f64>();
        }
        stats
    }
}

fn qualifies(layout: &LayoutSnapshot, parts: &PartTable, slot: usize) -> bool {
    let Some(p) = layout.placements.get(slot) else {
        return false;
    };
    p.activated && parts.get(p.part_index).is_some_and(|d| d.conducts_heat())
}

fn find(parent: &mut [u32], mut x: u32) -> u32 {
    let mut root = x;
    while parent[root as usize] != root {
        root = parent[root as usize];
    }
    while parent[x as usize] != root {
        let next = parent[x as usize];
        parent[x as usize] = root;
        x = next;
    }
    root
}

fn union(parent: &mut [u32], a: u32, b: u32) {
    let ra = find(parent, a);
    let rb = find(parent, b);
    if ra != rb {
        parent[rb as usize] = ra;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{GridDims, PartIndex};
    use crate::layout::TilePlacement;
    use crate::part::PartDef;

    fn parts() -> PartTable {
        PartTable::new(vec![
            PartDef::new("coolant_cell1", PartCategory::CoolantCell).with_containment(100.0),
            PartDef::new("vent1", PartCategory::Vent).with_containment(50.0),
            PartDef::new("uranium1", PartCategory::Cell),
        ])
        .unwrap()
    }

    const COOLANT: PartIndex = PartIndex(0);
    const VENT: PartIndex = PartIndex(1);
    const FUEL: PartIndex = PartIndex(2);

    fn row_of_four(middle_active: bool) -> LayoutSnapshot {
        let mut placements: Vec<_> = (0..4).map(|c| TilePlacement::new(0, c, COOLANT)).collect();
        if !middle_active {
            placements[1] = placements[1].clone().deactivated();
        }
        LayoutSnapshot::new(GridDims::new(1, 4), placements)
    }

    #[test]
    fn uninterrupted_row_is_one_segment() {
        let mut tracker = SegmentTracker::new();
        tracker.rebuild(&row_of_four(true), &parts(), &[0.0; 4]);
        assert_eq!(tracker.len(), 1);
        let (_, seg) = tracker.iter().next().unwrap();
        assert_eq!(seg.members, vec![0, 1, 2, 3]);
        assert_eq!(seg.total_containment, 400.0);
    }

    #[test]
    fn deactivated_middle_splits_the_row() {
        let mut tracker = SegmentTracker::new();
        tracker.rebuild(&row_of_four(false), &parts(), &[0.0; 4]);
        let mut sizes: Vec<_> = tracker.iter().map(|(_, s)| s.len()).collect();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![1, 2]);
        assert_eq!(tracker.segment_for(1), None);
        assert_eq!(tracker.segment_for(2), tracker.segment_for(3));
        assert_ne!(tracker.segment_for(0), tracker.segment_for(2));
    }

    #[test]
    fn fuel_cells_break_segments() {
        let layout = LayoutSnapshot::new(
            GridDims::new(1, 3),
            vec![
                TilePlacement::new(0, 0, COOLANT),
                TilePlacement::new(0, 1, FUEL),
                TilePlacement::new(0, 2, VENT),
            ],
        );
        let mut tracker = SegmentTracker::new();
        tracker.rebuild(&layout, &parts(), &[0.0; 3]);
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn rebuild_only_when_dirty() {
        let layout = row_of_four(true);
        let mut tracker = SegmentTracker::new();
        assert!(tracker.is_dirty());
        assert!(tracker.update_if_dirty(&layout, &parts(), &[0.0; 4]));
        assert!(!tracker.update_if_dirty(&layout, &parts(), &[0.0; 4]));

        // First fingerprint always counts as a change.
        assert!(tracker.observe(&layout));
        assert!(tracker.update_if_dirty(&layout, &parts(), &[0.0; 4]));
        assert!(!tracker.observe(&layout));
        assert!(!tracker.is_dirty());

        assert!(tracker.observe(&row_of_four(false)));
        assert!(tracker.update_if_dirty(&row_of_four(false), &parts(), &[0.0; 4]));
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn stats_are_snapshots() {
        let mut tracker = SegmentTracker::new();
        let mut heat = vec![10.0, 20.0, 30.0, 40.0];
        tracker.rebuild(&row_of_four(true), &parts(), &heat);
        let (id, _) = tracker.iter().next().unwrap();
        heat[0] = 100.0;
        let seg = tracker.get(id).unwrap();
        assert_eq!(seg.total_heat, 100.0);
        assert_eq!(seg.fullness_ratio(), 0.25);
    }

    #[test]
    fn vent_removes_proportionally() {
        let layout = LayoutSnapshot::new(
            GridDims::new(1, 2),
            vec![
                TilePlacement::new(0, 0, COOLANT),
                TilePlacement::new(0, 1, VENT).with_vent(6.0),
            ],
        );
        let mut tracker = SegmentTracker::new();
        let mut heat = vec![30.0, 10.0];
        tracker.rebuild(&layout, &parts(), &heat);
        let vented = tracker.vent(&mut heat, 2.0);
        assert_eq!(vented, 12.0);
        assert!((heat[0] - 21.0).abs() < 1e-9);
        assert!((heat[1] - 7.0).abs() < 1e-9);

        let stats = tracker.stats();
        assert_eq!(stats.segment_count, 1);
        assert_eq!(stats.total_vent, 6.0);
    }

    #[test]
    fn vent_never_goes_negative() {
        let layout = LayoutSnapshot::new(
            GridDims::new(1, 1),
            vec![TilePlacement::new(0, 0, VENT).with_vent(100.0)],
        );
        let mut tracker = SegmentTracker::new();
        let mut heat = vec![5.0];
        tracker.rebuild(&layout, &parts(), &heat);
        assert_eq!(tracker.vent(&mut heat, 1.0), 5.0);
        assert_eq!(heat, vec![0.0]);
    }
}

//! Tile layout snapshots handed to the core by the game model.

use crate::id::{CellCoord, CellIndex, GridDims, PartIndex};
use crate::part::{PartDef, PartTable};
use serde::{Deserialize, Serialize};

/// Problems a strict layout check can find.
///
/// The network builder tolerates all of these by skipping the offending cell;
/// callers that want to reject bad input up front use
/// [`LayoutSnapshot::validate`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LayoutError {
    #[error("placement at ({row}, {col}) is outside a {rows}x{cols} grid")]
    OutOfBounds { row: u32, col: u32, rows: u32, cols: u32 },
    #[error("placement at ({row}, {col}) references unknown part {part}")]
    UnknownPart { row: u32, col: u32, part: u32 },
    #[error("two placements occupy ({row}, {col})")]
    Overlap { row: u32, col: u32 },
    #[error("grid {rows}x{cols} exceeds the configured maximum {max_rows}x{max_cols}")]
    GridTooLarge { rows: u32, cols: u32, max_rows: u32, max_cols: u32 },
}

/// One occupied cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TilePlacement {
    pub row: u32,
    pub col: u32,
    pub part_index: PartIndex,
    /// Effective transfer rate after upgrades.
    #[serde(default)]
    pub transfer_rate: f64,
    /// Effective vent rate after upgrades.
    #[serde(default)]
    pub vent_rate: f64,
    #[serde(default = "default_activated")]
    pub activated: bool,
    /// Remaining fuel ticks for cells; unused for other parts.
    #[serde(default)]
    pub ticks: f64,
}

fn default_activated() -> bool {
    true
}

impl TilePlacement {
    pub fn new(row: u32, col: u32, part_index: PartIndex) -> Self {
        Self {
            row,
            col,
            part_index,
            transfer_rate: 0.0,
            vent_rate: 0.0,
            activated: true,
            ticks: 0.0,
        }
    }

    pub fn with_transfer(mut self, rate: f64) -> Self {
        self.transfer_rate = rate;
        self
    }

    pub fn with_vent(mut self, rate: f64) -> Self {
        self.vent_rate = rate;
        self
    }

    pub fn with_ticks(mut self, ticks: f64) -> Self {
        self.ticks = ticks;
        self
    }

    pub fn deactivated(mut self) -> Self {
        self.activated = false;
        self
    }

    pub fn coord(&self) -> CellCoord {
        CellCoord::new(self.row, self.col)
    }
}

/// Every occupied cell plus the grid dimensions they were placed on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutSnapshot {
    pub dims: GridDims,
    pub placements: Vec<TilePlacement>,
}

impl LayoutSnapshot {
    pub fn new(dims: GridDims, placements: Vec<TilePlacement>) -> Self {
        Self { dims, placements }
    }

    /// Reject out-of-bounds placements, unknown parts and overlaps.
    pub fn validate(&self, parts: &PartTable) -> Result<(), LayoutError> {
        let mut seen = std::collections::HashSet::with_capacity(self.placements.len());
        for p in &self.placements {
            let Some(idx) = self.dims.index(p.coord()) else {
                return Err(LayoutError::OutOfBounds {
                    row: p.row,
                    col: p.col,
                    rows: self.dims.rows,
                    cols: self.dims.cols,
                });
            };
            if parts.get(p.part_index).is_none() {
                return Err(LayoutError::UnknownPart {
                    row: p.row,
                    col: p.col,
                    part: p.part_index.0,
                });
            }
            if !seen.insert(idx) {
                return Err(LayoutError::Overlap { row: p.row, col: p.col });
            }
        }
        Ok(())
    }

    /// Build the per-cell capacity vector from part containment.
    ///
    /// `out` is resized to `len`; cells without a part (or whose part is
    /// unknown) get capacity 0.
    pub fn fill_capacity(&self, parts: &PartTable, out: &mut Vec<f64>, len: usize) {
        out.clear();
        out.resize(len, 0.0);
        for p in &self.placements {
            let Some(idx) = self.dims.index(p.coord()) else {
                continue;
            };
            if let (Some(def), Some(slot)) = (parts.get(p.part_index), out.get_mut(idx as usize)) {
                *slot = def.containment.max(0.0);
            }
        }
    }
}

/// Dense cell-to-placement lookup keyed by linear index.
///
/// Replaces per-tick `"row,col"` string maps with a flat array.
#[derive(Debug, Clone, Default)]
pub struct CellLookup {
    dims: Option<GridDims>,
    slots: Vec<Option<u32>>,
}

impl CellLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every in-bounds placement. Later duplicates overwrite earlier ones.
    pub fn rebuild(&mut self, layout: &LayoutSnapshot) {
        let dims = layout.dims;
        self.dims = Some(dims);
        self.slots.clear();
        self.slots.resize(dims.buffer_len(), None);
        for (i, p) in layout.placements.iter().enumerate() {
            match dims.index(p.coord()) {
                Some(idx) => self.slots[idx as usize] = Some(i as u32),
                None => tracing::trace!(row = p.row, col = p.col, "placement outside grid skipped"),
            }
        }
    }

    /// Placement position (into `layout.placements`) at a coordinate.
    pub fn at(&self, coord: CellCoord) -> Option<usize> {
        let idx = self.dims?.index(coord)?;
        self.slot(idx)
    }

    pub fn slot(&self, index: CellIndex) -> Option<usize> {
        self.slots
            .get(index as usize)
            .copied()
            .flatten()
            .map(|v| v as usize)
    }

    /// Occupied in-bounds 4-neighbors of `coord`, in up/down/left/right order.
    pub fn occupied_neighbors(&self, coord: CellCoord) -> impl Iterator<Item = (CellCoord, usize)> + '_ {
        coord
            .neighbors()
            .into_iter()
            .flatten()
            .filter_map(move |n| self.at(n).map(|slot| (n, slot)))
    }
}

/// A placement resolved against the part table.
pub(crate) fn resolve<'a>(
    layout: &'a LayoutSnapshot,
    parts: &'a PartTable,
    slot: usize,
) -> Option<(&'a TilePlacement, &'a PartDef)> {
    let placement = layout.placements.get(slot)?;
    let def = parts.get(placement.part_index)?;
    Some((placement, def))
}

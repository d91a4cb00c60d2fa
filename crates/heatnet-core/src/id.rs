use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Identifies a segment produced by the most recent segment rebuild.
    pub struct SegmentId;
}

/// Identifies a part definition in the [`PartTable`](crate::part::PartTable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartIndex(pub u32);

/// Correlates a dispatched tick computation with its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

/// Flat index of a cell: `row * stride + col`.
pub type CellIndex = u32;

/// A `(row, col)` position on the reactor grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellCoord {
    pub row: u32,
    pub col: u32,
}

impl CellCoord {
    pub const fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// The four orthogonal neighbors in up, down, left, right order.
    ///
    /// Coordinates that would underflow are returned as `None`; callers
    /// still need to bounds-check the upper edges against [`GridDims`].
    pub fn neighbors(self) -> [Option<CellCoord>; 4] {
        [
            self.row.checked_sub(1).map(|r| CellCoord::new(r, self.col)),
            self.row.checked_add(1).map(|r| CellCoord::new(r, self.col)),
            self.col.checked_sub(1).map(|c| CellCoord::new(self.row, c)),
            self.col.checked_add(1).map(|c| CellCoord::new(self.row, c)),
        ]
    }
}

/// Active grid size plus the stride used for linear indexing.
///
/// `stride` is the column capacity of the backing buffers, so indices stay
/// stable when the active column count changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridDims {
    pub rows: u32,
    pub cols: u32,
    pub stride: u32,
}

impl GridDims {
    /// Dimensions whose stride equals the column count.
    pub const fn new(rows: u32, cols: u32) -> Self {
        Self {
            rows,
            cols,
            stride: cols,
        }
    }

    /// Dimensions with an explicit stride. A stride below `cols` is raised to `cols`.
    pub fn with_stride(rows: u32, cols: u32, stride: u32) -> Self {
        Self {
            rows,
            cols,
            stride: stride.max(cols),
        }
    }

    pub fn contains(&self, coord: CellCoord) -> bool {
        coord.row < self.rows && coord.col < self.cols
    }

    /// Linear index of an in-bounds coordinate.
    pub fn index(&self, coord: CellCoord) -> Option<CellIndex> {
        if !self.contains(coord) {
            return None;
        }
        coord
            .row
            .checked_mul(self.stride)
            .and_then(|base| base.checked_add(coord.col))
    }

    /// Inverse of [`index`](Self::index).
    pub fn coord(&self, index: CellIndex) -> CellCoord {
        let stride = self.stride.max(1);
        CellCoord::new(index / stride, index % stride)
    }

    /// Length a flat buffer needs to address every active cell.
    pub fn buffer_len(&self) -> usize {
        self.rows as usize * self.stride as usize
    }
}

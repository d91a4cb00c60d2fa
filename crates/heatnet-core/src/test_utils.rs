//! Shared test helpers for integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).

use crate::id::{GridDims, PartIndex};
use crate::layout::{LayoutSnapshot, TilePlacement};
use crate::part::{PartCategory, PartDef, PartTable, ValveType};

// ===========================================================================
// Part indices into `standard_parts()`
// ===========================================================================

pub const FUEL: PartIndex = PartIndex(0);
pub const VENT: PartIndex = PartIndex(1);
pub const COOLANT: PartIndex = PartIndex(2);
pub const EXCHANGER: PartIndex = PartIndex(3);
pub const INLET: PartIndex = PartIndex(4);
pub const OUTLET: PartIndex = PartIndex(5);
pub const WIDE_OUTLET: PartIndex = PartIndex(6);
pub const OVERFLOW_VALVE: PartIndex = PartIndex(7);
pub const TOPUP_VALVE: PartIndex = PartIndex(8);
pub const CHECK_VALVE: PartIndex = PartIndex(9);
pub const PLATING: PartIndex = PartIndex(10);

/// A small part table covering every category the heat core handles.
pub fn standard_parts() -> PartTable {
    let parts = vec![
        PartDef::new("uranium1", PartCategory::Cell).with_output(1.0, 1.0),
        PartDef::new("vent1", PartCategory::Vent)
            .with_containment(80.0)
            .with_vent(4.0),
        PartDef::new("coolant_cell1", PartCategory::CoolantCell).with_containment(2000.0),
        PartDef::new("heat_exchanger1", PartCategory::HeatExchanger)
            .with_containment(320.0)
            .with_transfer(16.0),
        PartDef::new("heat_inlet1", PartCategory::HeatInlet).with_transfer(16.0),
        PartDef::new("heat_outlet1", PartCategory::HeatOutlet).with_transfer(16.0),
        PartDef::new("heat_outlet6", PartCategory::HeatOutlet).with_transfer(16.0),
        PartDef::new("overflow_valve", PartCategory::Valve).with_valve_type(ValveType::Overflow),
        PartDef::new("topup_valve2", PartCategory::Valve).with_valve_type(ValveType::Topup),
        PartDef::new("check_valve", PartCategory::Valve).with_valve_type(ValveType::Check),
        PartDef::new("reactor_plating1", PartCategory::ReactorPlating).with_containment(100.0),
    ];
    match PartTable::new(parts) {
        Ok(table) => table,
        Err(e) => panic!("standard part table is invalid: {e}"),
    }
}

/// A placement with the part's base transfer and vent rates applied.
pub fn place(parts: &PartTable, row: u32, col: u32, part: PartIndex) -> TilePlacement {
    let def = parts.get(part);
    TilePlacement::new(row, col, part)
        .with_transfer(def.map_or(0.0, |d| d.transfer))
        .with_vent(def.map_or(0.0, |d| d.vent))
}

/// Build a layout from a character map, one string per row.
///
/// `F` fuel, `V` vent, `C` coolant, `X` exchanger, `I` inlet, `O` outlet,
/// `W` wide outlet, `>` overflow valve, `^` top-up valve, `|` check valve,
/// `P` plating. Anything else is empty.
pub fn layout_from_map(parts: &PartTable, rows: &[&str]) -> LayoutSnapshot {
    let cols = rows.iter().map(|r| r.chars().count()).max().unwrap_or(0) as u32;
    let dims = GridDims::new(rows.len() as u32, cols);
    let mut placements = Vec::new();
    for (r, line) in rows.iter().enumerate() {
        for (c, ch) in line.chars().enumerate() {
            let part = match ch {
                'F' => FUEL,
                'V' => VENT,
                'C' => COOLANT,
                'X' => EXCHANGER,
                'I' => INLET,
                'O' => OUTLET,
                'W' => WIDE_OUTLET,
                '>' => OVERFLOW_VALVE,
                '^' => TOPUP_VALVE,
                '|' => CHECK_VALVE,
                'P' => PLATING,
                _ => continue,
            };
            let mut placement = place(parts, r as u32, c as u32, part);
            if part == FUEL {
                placement = placement.with_ticks(100.0);
            }
            placements.push(placement);
        }
    }
    LayoutSnapshot::new(dims, placements)
}

/// A zeroed heat buffer sized for `dims`.
pub fn heat_buffer(dims: GridDims) -> Vec<f64> {
    vec![0.0; dims.buffer_len()]
}

/// Assert that two floats agree to within `1e-9`.
pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

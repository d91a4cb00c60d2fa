//! Part definitions and the immutable part table.
//!
//! Category and valve-type strings are resolved into closed enums when a part
//! is registered, so the per-tick code never compares strings.

use crate::id::PartIndex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Functional category of a part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartCategory {
    Cell,
    Vent,
    CoolantCell,
    HeatExchanger,
    HeatInlet,
    HeatOutlet,
    Valve,
    ReactorPlating,
    Capacitor,
    Reflector,
    #[serde(other)]
    Other,
}

impl PartCategory {
    /// Parse a category string. Unknown categories map to [`PartCategory::Other`].
    pub fn parse(s: &str) -> Self {
        match s {
            "cell" => Self::Cell,
            "vent" => Self::Vent,
            "coolant_cell" => Self::CoolantCell,
            "heat_exchanger" => Self::HeatExchanger,
            "heat_inlet" => Self::HeatInlet,
            "heat_outlet" => Self::HeatOutlet,
            "valve" => Self::Valve,
            "reactor_plating" => Self::ReactorPlating,
            "capacitor" => Self::Capacitor,
            "reflector" => Self::Reflector,
            _ => Self::Other,
        }
    }
}

/// Behaviour of a valve part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ValveType {
    /// Opens once the input side is at least 80% full.
    Overflow,
    /// Opens while the output side is at most 20% full; rate capped to 20% of output capacity.
    Topup,
    /// Always open, one direction only.
    #[default]
    Check,
}

impl ValveType {
    /// Parse a part `type` string such as `"overflow_valve"`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "overflow_valve" => Some(Self::Overflow),
            "topup_valve" => Some(Self::Topup),
            "check_valve" => Some(Self::Check),
            _ => None,
        }
    }
}

/// The four heat-conducting component kinds the packed network carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentKind {
    Inlet,
    Valve,
    Exchanger,
    Outlet,
}

/// How an exchanger sees one of its neighbors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NeighborCategory {
    Exchanger,
    #[default]
    Other,
    VentOrCoolant,
}

impl NeighborCategory {
    pub fn of(category: PartCategory) -> Self {
        match category {
            PartCategory::Vent | PartCategory::CoolantCell => Self::VentOrCoolant,
            PartCategory::HeatExchanger => Self::Exchanger,
            _ => Self::Other,
        }
    }
}

/// Id of the outlet variant whose per-neighbor delivery is capped by headroom.
pub const WIDE_OUTLET_ID: &str = "heat_outlet6";

/// A part definition as consumed by the heat core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartDef {
    pub id: String,
    pub category: PartCategory,
    #[serde(default)]
    pub valve_type: Option<ValveType>,
    /// Maximum heat before the part is overloaded. 0 means no containment.
    #[serde(default)]
    pub containment: f64,
    #[serde(default)]
    pub transfer: f64,
    #[serde(default)]
    pub vent: f64,
    #[serde(default)]
    pub power: f64,
    #[serde(default)]
    pub heat: f64,
}

impl PartDef {
    pub fn new(id: &str, category: PartCategory) -> Self {
        Self {
            id: id.to_string(),
            category,
            valve_type: None,
            containment: 0.0,
            transfer: 0.0,
            vent: 0.0,
            power: 0.0,
            heat: 0.0,
        }
    }

    pub fn with_containment(mut self, containment: f64) -> Self {
        self.containment = containment;
        self
    }

    pub fn with_transfer(mut self, transfer: f64) -> Self {
        self.transfer = transfer;
        self
    }

    pub fn with_vent(mut self, vent: f64) -> Self {
        self.vent = vent;
        self
    }

    pub fn with_valve_type(mut self, valve_type: ValveType) -> Self {
        self.valve_type = Some(valve_type);
        self
    }

    pub fn with_output(mut self, power: f64, heat: f64) -> Self {
        self.power = power;
        self.heat = heat;
        self
    }

    /// Which packed-network list this part belongs to, if any.
    ///
    /// Reactor plating only conducts when it declares a positive transfer rate.
    pub fn component_kind(&self) -> Option<ComponentKind> {
        match self.category {
            PartCategory::HeatInlet => Some(ComponentKind::Inlet),
            PartCategory::Valve => Some(ComponentKind::Valve),
            PartCategory::HeatExchanger => Some(ComponentKind::Exchanger),
            PartCategory::ReactorPlating if self.transfer > 0.0 => Some(ComponentKind::Exchanger),
            PartCategory::HeatOutlet => Some(ComponentKind::Outlet),
            _ => None,
        }
    }

    /// Orientation parsed from the trailing digits of the id, defaulting to 1.
    pub fn valve_orientation(&self) -> u8 {
        valve_orientation(&self.id)
    }

    pub fn is_wide_outlet(&self) -> bool {
        self.id == WIDE_OUTLET_ID
    }

    /// Whether a tile of this part takes part in segment grouping.
    ///
    /// Fuel cells never join a segment even with positive containment, and
    /// vents always do, so segment venting has every vent rate to draw on.
    pub fn conducts_heat(&self) -> bool {
        if self.category == PartCategory::Cell {
            return false;
        }
        self.containment > 0.0
            || matches!(
                self.category,
                PartCategory::HeatExchanger
                    | PartCategory::Vent
                    | PartCategory::HeatOutlet
                    | PartCategory::HeatInlet
            )
    }
}

/// Parse the trailing decimal digits of an id. Missing or unparsable digits give 1.
pub fn valve_orientation(id: &str) -> u8 {
    let digits = id.len() - id.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return 1;
    }
    id[id.len() - digits..].parse::<u8>().unwrap_or(1)
}

/// Errors raised while building a part table.
#[derive(Debug, thiserror::Error)]
pub enum PartTableError {
    #[error("duplicate part id: {0}")]
    DuplicateId(String),
    #[error("valve part {0} has no valve type")]
    MissingValveType(String),
}

/// Immutable lookup from [`PartIndex`] to [`PartDef`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartTable {
    parts: Vec<PartDef>,
    #[serde(skip)]
    by_id: HashMap<String, PartIndex>,
}

// The id map is derived from `parts` and may be absent after deserialization.
impl PartialEq for PartTable {
    fn eq(&self, other: &Self) -> bool {
        self.parts == other.parts
    }
}

impl PartTable {
    /// Build a table from definitions in index order.
    pub fn new(parts: Vec<PartDef>) -> Result<Self, PartTableError> {
        let mut by_id = HashMap::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            if part.category == PartCategory::Valve && part.valve_type.is_none() {
                return Err(PartTableError::MissingValveType(part.id.clone()));
            }
            if by_id.insert(part.id.clone(), PartIndex(i as u32)).is_some() {
                return Err(PartTableError::DuplicateId(part.id.clone()));
            }
        }
        Ok(Self { parts, by_id })
    }

    /// Look up a part. A missing entry excludes the cell from every pass.
    pub fn get(&self, index: PartIndex) -> Option<&PartDef> {
        self.parts.get(index.0 as usize)
    }

    pub fn index_of(&self, id: &str) -> Option<PartIndex> {
        if self.by_id.is_empty() && !self.parts.is_empty() {
            // Deserialized tables skip the id map.
            return self
                .parts
                .iter()
                .position(|p| p.id == id)
                .map(|i| PartIndex(i as u32));
        }
        self.by_id.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PartIndex, &PartDef)> {
        self.parts
            .iter()
            .enumerate()
            .map(|(i, p)| (PartIndex(i as u32), p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orientation_from_trailing_digits() {
        assert_eq!(valve_orientation("overflow_valve3"), 3);
        assert_eq!(valve_orientation("check_valve"), 1);
        assert_eq!(valve_orientation("topup_valve4"), 4);
        assert_eq!(valve_orientation("x999"), 1);
    }

    #[test]
    fn category_strings_parse_once() {
        assert_eq!(PartCategory::parse("heat_exchanger"), PartCategory::HeatExchanger);
        assert_eq!(PartCategory::parse("coolant_cell"), PartCategory::CoolantCell);
        assert_eq!(PartCategory::parse("particle_accelerator"), PartCategory::Other);
    }

    #[test]
    fn plating_conducts_only_with_transfer() {
        let plain = PartDef::new("reactor_plating1", PartCategory::ReactorPlating);
        let conductive = plain.clone().with_transfer(4.0);
        assert_eq!(plain.component_kind(), None);
        assert_eq!(conductive.component_kind(), Some(ComponentKind::Exchanger));
    }

    #[test]
    fn cells_never_conduct() {
        let cell = PartDef::new("uranium1", PartCategory::Cell).with_containment(10.0);
        assert!(!cell.conducts_heat());
        let vent = PartDef::new("vent1", PartCategory::Vent);
        assert!(vent.conducts_heat());
    }

    #[test]
    fn duplicate_ids_rejected() {
        let parts = vec![
            PartDef::new("vent1", PartCategory::Vent),
            PartDef::new("vent1", PartCategory::Vent),
        ];
        assert!(matches!(
            PartTable::new(parts),
            Err(PartTableError::DuplicateId(id)) if id == "vent1"
        ));
    }

    #[test]
    fn valves_need_a_type() {
        let parts = vec![PartDef::new("overflow_valve", PartCategory::Valve)];
        assert!(matches!(
            PartTable::new(parts),
            Err(PartTableError::MissingValveType(_))
        ));
    }

    #[test]
    fn lookup_by_id() {
        let table = PartTable::new(vec![
            PartDef::new("vent1", PartCategory::Vent),
            PartDef::new("heat_outlet6", PartCategory::HeatOutlet),
        ])
        .unwrap();
        let idx = table.index_of("heat_outlet6").unwrap();
        assert_eq!(idx, PartIndex(1));
        assert!(table.get(idx).unwrap().is_wide_outlet());
        assert!(table.get(PartIndex(7)).is_none());
    }
}

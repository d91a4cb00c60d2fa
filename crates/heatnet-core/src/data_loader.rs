//! Part table loading from JSON.
//!
//! Feature-gated behind `data-loader`. Accepts the loose shape the game model
//! exports (string categories, a free-form `type`) and resolves it into typed
//! [`PartDef`]s once, at load time.

use crate::part::{PartCategory, PartDef, PartTable, PartTableError, ValveType};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur while loading a part table.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("part table error: {0}")]
    PartTable(#[from] PartTableError),
    #[error("valve part {id} has unknown type {part_type:?}")]
    UnknownValveType { id: String, part_type: String },
}

// ---------------------------------------------------------------------------
// Data structures
// ---------------------------------------------------------------------------

/// Serialized form of a part, as exported by the game model.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PartData {
    pub id: String,
    pub category: String,
    #[serde(rename = "type", default)]
    pub part_type: String,
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

impl PartData {
    /// Resolve the category and valve type strings.
    pub fn into_def(self) -> Result<PartDef, DataLoadError> {
        let category = PartCategory::parse(&self.category);
        let valve_type = match category {
            PartCategory::Valve => Some(ValveType::parse(&self.part_type).ok_or_else(|| {
                DataLoadError::UnknownValveType {
                    id: self.id.clone(),
                    part_type: self.part_type.clone(),
                }
            })?),
            _ => None,
        };
        Ok(PartDef {
            id: self.id,
            category,
            valve_type,
            containment: self.containment,
            transfer: self.transfer,
            vent: self.vent,
            power: self.power,
            heat: self.heat,
        })
    }
}

/// Build a [`PartTable`] from already-deserialized entries, keeping their order.
pub fn part_table_from_data(data: Vec<PartData>) -> Result<PartTable, DataLoadError> {
    let defs = data
        .into_iter()
        .map(PartData::into_def)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(PartTable::new(defs)?)
}

/// Parse a JSON array of parts into a [`PartTable`].
pub fn load_parts_json(json: &str) -> Result<PartTable, DataLoadError> {
    let data: Vec<PartData> = serde_json::from_str(json)?;
    part_table_from_data(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::PartIndex;

    #[test]
    fn load_mixed_parts() {
        let json = r#"[
            {"id": "vent1", "category": "vent", "containment": 80, "vent": 4},
            {"id": "overflow_valve2", "category": "valve", "type": "overflow_valve"},
            {"id": "heat_outlet6", "category": "heat_outlet", "transfer": 12}
        ]"#;
        let table = load_parts_json(json).unwrap();
        assert_eq!(table.len(), 3);
        let valve = table.get(PartIndex(1)).unwrap();
        assert_eq!(valve.valve_type, Some(ValveType::Overflow));
        assert_eq!(valve.valve_orientation(), 2);
        assert!(table.get(PartIndex(2)).unwrap().is_wide_outlet());
    }

    #[test]
    fn unknown_valve_type_rejected() {
        let json = r#"[{"id": "odd_valve", "category": "valve", "type": "spin_valve"}]"#;
        assert!(matches!(
            load_parts_json(json),
            Err(DataLoadError::UnknownValveType { .. })
        ));
    }

    #[test]
    fn unknown_category_is_other() {
        let json = r#"[{"id": "widget", "category": "particle_accelerator"}]"#;
        let table = load_parts_json(json).unwrap();
        assert_eq!(table.get(PartIndex(0)).unwrap().category, PartCategory::Other);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(
            load_parts_json("[{"),
            Err(DataLoadError::JsonParse(_))
        ));
    }
}

//! Runtime configuration.
//!
//! Every field has a default, so a config file only needs to name what it
//! changes. Loading from disk lives in `heatnet-data`.

use heatnet_core::network::NetworkLimits;
use serde::{Deserialize, Serialize};

/// Where tick batches run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// On the calling thread, inside `request_tick`.
    Inline,
    /// On a background worker thread, falling back to inline if it fails.
    #[default]
    Worker,
}

/// Capacity of the canonical heat buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub max_rows: u32,
    pub max_cols: u32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            max_rows: 32,
            max_cols: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub execution: ExecutionMode,
    pub limits: NetworkLimits,
    pub grid: GridConfig,
    /// Collect valve and exchanger transfers into each tick summary.
    pub record_transfers: bool,
    pub auto_sell: bool,
}

/// Invalid configuration values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("grid capacity must be non-zero, got {rows}x{cols}")]
    EmptyGrid { rows: u32, cols: u32 },
    #[error("grid capacity {rows}x{cols} exceeds {max} cells")]
    GridTooLarge { rows: u32, cols: u32, max: u64 },
    #[error("network limit `{0}` must be non-zero")]
    ZeroLimit(&'static str),
}

/// Upper bound on cells in one heat buffer.
pub const MAX_GRID_CELLS: u64 = 1 << 20;

impl RuntimeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let GridConfig { max_rows, max_cols } = self.grid;
        if max_rows == 0 || max_cols == 0 {
            return Err(ConfigError::EmptyGrid {
                rows: max_rows,
                cols: max_cols,
            });
        }
        if max_rows as u64 * max_cols as u64 > MAX_GRID_CELLS {
            return Err(ConfigError::GridTooLarge {
                rows: max_rows,
                cols: max_cols,
                max: MAX_GRID_CELLS,
            });
        }
        let limits = [
            ("max_inlets", self.limits.max_inlets),
            ("max_valves", self.limits.max_valves),
            ("max_valve_neighbors", self.limits.max_valve_neighbors),
            ("max_exchangers", self.limits.max_exchangers),
            ("max_outlets", self.limits.max_outlets),
        ];
        for (name, value) in limits {
            if value == 0 {
                return Err(ConfigError::ZeroLimit(name));
            }
        }
        Ok(())
    }

    pub fn inline() -> Self {
        Self {
            execution: ExecutionMode::Inline,
            ..Self::default()
        }
    }

    pub fn worker() -> Self {
        Self {
            execution: ExecutionMode::Worker,
            ..Self::default()
        }
    }
}

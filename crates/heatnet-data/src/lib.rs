//! Heatnet Data -- loads part tables and runtime configuration from disk.
//!
//! A data directory holds `parts.{ron,toml,json}` and, optionally,
//! `config.{ron,toml,json}`. Exactly one format per base name is allowed.

pub mod loader;

pub use loader::{DataLoadError, Format, load_config, load_parts};

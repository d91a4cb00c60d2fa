//! Format detection, file discovery and deserialization for data directories.

use heatnet_core::data_loader::{self, PartData};
use heatnet_core::part::PartTable;
use heatnet_runtime::config::{ConfigError, RuntimeConfig};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Base name of the part table file.
pub const PARTS_FILE: &str = "parts";
/// Base name of the runtime configuration file.
pub const CONFIG_FILE: &str = "config";

// ===========================================================================
// Errors
// ===========================================================================

#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    /// A required data file was not found in the given directory.
    #[error("required file '{file}' not found in {dir}")]
    MissingRequired { file: &'static str, dir: PathBuf },

    #[error("unsupported format for file: {file}")]
    UnsupportedFormat { file: PathBuf },

    /// Two files with the same base name but different formats exist.
    #[error("conflicting formats: {a} and {b}")]
    ConflictingFormats { a: PathBuf, b: PathBuf },

    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// The entries parsed but do not form a valid part table.
    #[error("invalid part table in {file}: {source}")]
    Parts {
        file: PathBuf,
        #[source]
        source: data_loader::DataLoadError,
    },

    #[error("invalid configuration in {file}: {source}")]
    Config {
        file: PathBuf,
        #[source]
        source: ConfigError,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Format detection
// ===========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

impl Format {
    const ALL: [Format; 3] = [Format::Ron, Format::Toml, Format::Json];

    pub fn extension(self) -> &'static str {
        match self {
            Format::Ron => "ron",
            Format::Toml => "toml",
            Format::Json => "json",
        }
    }
}

/// Detect the format of a file from its extension.
pub fn detect_format(path: &Path) -> Result<Format, DataLoadError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => Ok(Format::Ron),
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        _ => Err(DataLoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        }),
    }
}

// ===========================================================================
// File discovery
// ===========================================================================

/// Look for `{base_name}.ron`, `.toml` and `.json` in `dir`.
///
/// Returns `Ok(None)` when none exists and `ConflictingFormats` when more
/// than one does.
pub fn find_data_file(dir: &Path, base_name: &str) -> Result<Option<PathBuf>, DataLoadError> {
    let mut found: Option<PathBuf> = None;
    for format in Format::ALL {
        let candidate = dir.join(format!("{base_name}.{}", format.extension()));
        if !candidate.exists() {
            continue;
        }
        if let Some(existing) = found {
            return Err(DataLoadError::ConflictingFormats {
                a: existing,
                b: candidate,
            });
        }
        found = Some(candidate);
    }
    Ok(found)
}

// ===========================================================================
// Deserialization
// ===========================================================================

fn parse_error(path: &Path, detail: impl ToString) -> DataLoadError {
    DataLoadError::Parse {
        file: path.to_path_buf(),
        detail: detail.to_string(),
    }
}

/// Read a file and deserialize it according to its extension.
pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    match format {
        Format::Ron => ron::from_str(&content).map_err(|e| parse_error(path, e)),
        Format::Json => serde_json::from_str(&content).map_err(|e| parse_error(path, e)),
        Format::Toml => toml::from_str(&content).map_err(|e| parse_error(path, e)),
    }
}

/// Deserialize a list. TOML has no top-level arrays, so there the list is
/// read from the array under `toml_key`.
pub fn deserialize_list<T: DeserializeOwned>(path: &Path, toml_key: &str) -> Result<Vec<T>, DataLoadError> {
    if detect_format(path)? != Format::Toml {
        return deserialize_file(path);
    }
    let content = std::fs::read_to_string(path)?;
    let table: toml::Table = toml::from_str(&content).map_err(|e| parse_error(path, e))?;
    let array = table
        .get(toml_key)
        .cloned()
        .ok_or_else(|| parse_error(path, format!("missing key '{toml_key}' in TOML file")))?;
    array.try_into().map_err(|e: toml::de::Error| parse_error(path, e))
}

// ===========================================================================
// Loading
// ===========================================================================

/// Load `parts.{ron,toml,json}` from `dir`. The file is required.
///
/// Entries keep their file order, which fixes each part's index.
pub fn load_parts(dir: &Path) -> Result<PartTable, DataLoadError> {
    let path = find_data_file(dir, PARTS_FILE)?.ok_or_else(|| DataLoadError::MissingRequired {
        file: PARTS_FILE,
        dir: dir.to_path_buf(),
    })?;
    let data: Vec<PartData> = deserialize_list(&path, "parts")?;
    let table = data_loader::part_table_from_data(data).map_err(|source| DataLoadError::Parts {
        file: path.clone(),
        source,
    })?;
    tracing::debug!(file = %path.display(), parts = table.len(), "part table loaded");
    Ok(table)
}

/// Load `config.{ron,toml,json}` from `dir`, or the defaults when absent.
/// The loaded configuration is validated.
pub fn load_config(dir: &Path) -> Result<RuntimeConfig, DataLoadError> {
    let Some(path) = find_data_file(dir, CONFIG_FILE)? else {
        tracing::debug!(dir = %dir.display(), "no config file, using defaults");
        return Ok(RuntimeConfig::default());
    };
    let config: RuntimeConfig = deserialize_file(&path)?;
    config
        .validate()
        .map_err(|source| DataLoadError::Config { file: path.clone(), source })?;
    tracing::debug!(file = %path.display(), execution = ?config.execution, "config loaded");
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================

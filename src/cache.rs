//! JSON file persistence for documents, observed-state caches and provider snapshots.

use crate::error::ReconcileError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Default observed-state cache file name, one per topology per day.
pub fn default_cache_file(topology_id: &str) -> String {
    let now = chrono::Utc::now();
    format!("observed_cache_{topology_id}_{}.json", now.format("%Y-%m-%d"))
}

/// Read and parse a JSON file, reporting the JSON path of any parse failure.
pub fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ReconcileError> {
    let path = path.as_ref();
    let display = path.display().to_string();
    let json = std::fs::read_to_string(path).map_err(|source| ReconcileError::Io {
        path: display.clone(),
        source,
    })?;
    log::debug!("Reading JSON file: {display} ({} bytes)", json.len());
    parse_json(&json, &display)
}

/// Parse JSON text; `origin` names the source in error messages.
pub fn parse_json<T: DeserializeOwned>(json: &str, origin: &str) -> Result<T, ReconcileError> {
    let mut deserializer = serde_json::Deserializer::from_str(json);
    serde_path_to_error::deserialize(&mut deserializer).map_err(|e| {
        log::error!("Failed to parse {origin} at path={}", e.path());
        ReconcileError::Json {
            path: origin.to_string(),
            at: e.path().to_string(),
            message: e.inner().to_string(),
        }
    })
}

/// Serialise `value` as pretty JSON and write it to `path`.
pub fn write_json_file<T: Serialize>(
    path: impl AsRef<Path>,
    value: &T,
) -> Result<(), ReconcileError> {
    let path = path.as_ref();
    let display = path.display().to_string();
    let json = serde_json::to_string_pretty(value).map_err(|e| ReconcileError::Json {
        path: display.clone(),
        at: ".".to_string(),
        message: e.to_string(),
    })?;
    log::info!("Writing JSON file: {display}");
    std::fs::write(path, json).map_err(|source| ReconcileError::Io {
        path: display,
        source,
    })
}

//! Loading mappings and body files from a fixture directory

use std::path::{Component, Path, PathBuf};

use base64::Engine;
use bytes::Bytes;
use serde::Deserialize;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::message::MockResponse;
use crate::{FixtureError, Result};

use super::mapping::{ResponseDefinition, StubMapping};

/// Subdirectory holding mapping files
pub const MAPPINGS_DIR: &str = "mappings";

/// Subdirectory holding extracted bodies
pub const FILES_DIR: &str = "__files";

#[derive(Deserialize)]
#[serde(untagged)]
enum MappingFile {
    Many { mappings: Vec<StubMapping> },
    One(Box<StubMapping>),
}

/// Read every `*.json` mapping under `<files_root>/mappings`.
///
/// A missing directory yields no mappings. Files are read in path order.
///
/// # Errors
///
/// Returns error if a file cannot be read or is not a valid mapping
pub fn load_mappings(files_root: &Path) -> Result<Vec<StubMapping>> {
    let dir = files_root.join(MAPPINGS_DIR);
    if !dir.is_dir() {
        debug!("No mappings directory at {}", dir.display());
        return Ok(Vec::new());
    }

    let mut mappings = Vec::new();
    for entry in WalkDir::new(&dir).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().map_or(true, |ext| ext != "json") {
            continue;
        }

        let content = std::fs::read_to_string(path)?;
        let file: MappingFile = serde_json::from_str(&content).map_err(|e| {
            FixtureError::InvalidMapping(format!("{}: {e}", path.display()))
        })?;

        match file {
            MappingFile::Many { mappings: many } => mappings.extend(many),
            MappingFile::One(one) => mappings.push(*one),
        }
    }

    info!("Loaded {} mapping(s) from {}", mappings.len(), dir.display());
    Ok(mappings)
}

/// Build the response a static mapping describes.
///
/// Body sources are tried in order: `body`, `jsonBody`, `base64Body`, `bodyFileName`.
///
/// # Errors
///
/// Returns error if the body file cannot be read or the base64 body is invalid
pub async fn render_response(
    definition: &ResponseDefinition,
    files_root: &Path,
) -> Result<MockResponse> {
    let body = if let Some(body) = &definition.body {
        Bytes::from(body.clone())
    } else if let Some(json) = &definition.json_body {
        Bytes::from(serde_json::to_vec(json)?)
    } else if let Some(encoded) = &definition.base64_body {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| FixtureError::InvalidMapping(format!("invalid base64Body: {e}")))?;
        Bytes::from(decoded)
    } else if let Some(name) = &definition.body_file_name {
        let path = body_file_path(files_root, name)?;
        Bytes::from(tokio::fs::read(&path).await.map_err(|e| {
            FixtureError::InvalidMapping(format!("body file {}: {e}", path.display()))
        })?)
    } else {
        Bytes::new()
    };

    let headers = definition
        .headers
        .iter()
        .flat_map(|(name, values)| values.iter().map(move |v| (name.clone(), v.to_string())))
        .collect();

    Ok(MockResponse {
        status: definition.status,
        headers,
        body,
    })
}

/// Resolve a `bodyFileName` inside `__files`, refusing paths that escape it
///
/// # Errors
///
/// Returns error if the name is absolute or contains `..`
pub fn body_file_path(files_root: &Path, name: &str) -> Result<PathBuf> {
    let relative = Path::new(name);
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(FixtureError::InvalidMapping(format!(
            "bodyFileName must be a relative path inside {FILES_DIR}: {name}"
        )));
    }
    Ok(files_root.join(FILES_DIR).join(relative))
}

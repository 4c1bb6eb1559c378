//! Writes proxied interactions out as stub mappings

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use base64::Engine;
use tracing::{debug, info};

use crate::config::SnapshotConfig;
use crate::fingerprint::{captured_header_values, fingerprint_request, short_id};
use crate::message::{is_hop_by_hop, MockRequest, MockResponse};
use crate::stub::{
    BodyPattern, HeaderPattern, HeaderValues, RequestPattern, ResponseDefinition, StubMapping,
    FILES_DIR, MAPPINGS_DIR, SCENARIO_STARTED,
};
use crate::Result;

use super::journal::ServeEvent;

/// Longest slug used in file names
const MAX_SLUG_LEN: usize = 100;

/// What a snapshot wrote
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotSummary {
    /// Mapping files written
    pub mappings_written: usize,
    /// Bodies written to `__files/`
    pub bodies_extracted: usize,
    /// Events skipped because the same request got the same response just before
    pub duplicates_skipped: usize,
    /// Requests recorded as a scenario because their responses changed
    pub scenarios: usize,
}

/// Persists recorded interactions under a fixture root
pub struct SnapshotWriter<'a> {
    files_root: &'a Path,
    config: &'a SnapshotConfig,
}

struct Step<'e> {
    event: &'e ServeEvent,
    scenario: Option<(String, String, Option<String>)>,
    suffix: Option<usize>,
}

impl<'a> SnapshotWriter<'a> {
    /// Create a writer rooted at `files_root`
    #[must_use]
    pub fn new(files_root: &'a Path, config: &'a SnapshotConfig) -> Self {
        Self { files_root, config }
    }

    /// Write the mappings for a session.
    ///
    /// Events are grouped by request fingerprint. A request answered the same
    /// way every time becomes one mapping. A request whose response changed
    /// becomes a scenario with one mapping per distinct consecutive response,
    /// replayed in recording order.
    ///
    /// Text bodies longer than `extract_text_bodies_over` bytes and all binary
    /// bodies go to `__files/`; shorter text bodies are kept inline.
    ///
    /// # Errors
    ///
    /// Returns error if a directory or file cannot be written
    pub fn write(&self, events: &[ServeEvent]) -> Result<SnapshotSummary> {
        std::fs::create_dir_all(self.files_root.join(MAPPINGS_DIR))?;

        let mut summary = SnapshotSummary::default();

        let mut groups: Vec<([u8; 32], Vec<&ServeEvent>)> = Vec::new();
        let mut index: HashMap<[u8; 32], usize> = HashMap::new();
        for event in events {
            let hash = fingerprint_request(&event.request, &self.config.captured_headers);
            if let Some(&i) = index.get(&hash) {
                groups[i].1.push(event);
            } else {
                index.insert(hash, groups.len());
                groups.push((hash, vec![event]));
            }
        }

        for (hash, group) in &groups {
            let mut distinct: Vec<&ServeEvent> = Vec::with_capacity(group.len());
            for event in group {
                match distinct.last() {
                    Some(previous) if same_response(&previous.response, &event.response) => {
                        summary.duplicates_skipped += 1;
                    }
                    _ => distinct.push(event),
                }
            }

            let id = short_id(hash);
            let stem = format!("{}-{id}", slug(&distinct[0].request.path));
            let request = self.request_pattern(&distinct[0].request);

            if distinct.len() == 1 {
                let step = Step {
                    event: distinct[0],
                    scenario: None,
                    suffix: None,
                };
                self.write_step(&stem, &id, request, step, &mut summary)?;
                continue;
            }

            let scenario = format!("scenario-{stem}");
            let last = distinct.len() - 1;
            for (i, event) in distinct.into_iter().enumerate() {
                let required = if i == 0 {
                    SCENARIO_STARTED.to_string()
                } else {
                    format!("{scenario}-{}", i + 1)
                };
                let next = (i < last).then(|| format!("{scenario}-{}", i + 2));
                let step = Step {
                    event,
                    scenario: Some((scenario.clone(), required, next)),
                    suffix: Some(i + 1),
                };
                self.write_step(&stem, &id, request.clone(), step, &mut summary)?;
            }
            summary.scenarios += 1;
        }

        info!(
            "Snapshot wrote {} mapping(s), {} body file(s), {} scenario(s) to {}",
            summary.mappings_written,
            summary.bodies_extracted,
            summary.scenarios,
            self.files_root.display()
        );
        Ok(summary)
    }

    fn write_step(
        &self,
        stem: &str,
        id: &str,
        request: RequestPattern,
        step: Step<'_>,
        summary: &mut SnapshotSummary,
    ) -> Result<()> {
        let (stem, id) = match step.suffix {
            Some(n) => (format!("{stem}-{n}"), format!("{id}-{n}")),
            None => (stem.to_string(), id.to_string()),
        };

        let (response, extracted) = self.response_definition(&step.event.response, &stem);
        if let Some((file_name, body)) = extracted {
            let files_dir = self.files_root.join(FILES_DIR);
            std::fs::create_dir_all(&files_dir)?;
            std::fs::write(files_dir.join(&file_name), body)?;
            summary.bodies_extracted += 1;
        }

        let mut mapping = StubMapping::new(request, response).named(stem.clone());
        mapping.id = Some(id);
        if let Some((scenario, required, next)) = step.scenario {
            mapping = mapping.in_scenario(scenario, required, next);
        }

        let path = self.files_root.join(MAPPINGS_DIR).join(format!("{stem}.json"));
        std::fs::write(&path, serde_json::to_string_pretty(&mapping)?)?;
        debug!("Wrote {}", path.display());
        summary.mappings_written += 1;
        Ok(())
    }

    fn request_pattern(&self, request: &MockRequest) -> RequestPattern {
        let mut pattern = RequestPattern::url(&request.method, request.url());
        for (name, value) in captured_header_values(request, &self.config.captured_headers) {
            pattern = pattern.with_header(
                canonical_name(&self.config.captured_headers, &name),
                HeaderPattern::equal_to(value),
            );
        }
        if let Some(body) = body_pattern(&request.body) {
            pattern = pattern.with_body(body);
        }
        pattern
    }

    fn response_definition(
        &self,
        response: &MockResponse,
        stem: &str,
    ) -> (ResponseDefinition, Option<(PathBuf, Vec<u8>)>) {
        let mut headers: BTreeMap<String, HeaderValues> = BTreeMap::new();
        for (name, value) in &response.headers {
            if is_hop_by_hop(name) || name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            headers
                .entry(name.clone())
                .and_modify(|existing| existing.push(value.clone()))
                .or_insert_with(|| HeaderValues::One(value.clone()));
        }

        let mut definition = ResponseDefinition {
            status: response.status,
            headers,
            ..ResponseDefinition::default()
        };

        if response.body.is_empty() {
            return (definition, None);
        }

        let text = std::str::from_utf8(&response.body).ok();
        let extract = match text {
            Some(text) => text.len() > self.config.extract_text_bodies_over,
            None => true,
        };

        if !extract {
            definition.body = text.map(str::to_string);
            return (definition, None);
        }

        let file_name = PathBuf::from(format!("{stem}.{}", extension(response, text.is_some())));
        definition.body_file_name = Some(file_name.to_string_lossy().into_owned());
        (definition, Some((file_name, response.body.to_vec())))
    }
}

fn same_response(a: &MockResponse, b: &MockResponse) -> bool {
    a.status == b.status && a.body == b.body
}

/// Match condition for a recorded request body: JSON, then text, then bytes
fn body_pattern(body: &[u8]) -> Option<BodyPattern> {
    if body.is_empty() {
        return None;
    }
    let pattern = match std::str::from_utf8(body) {
        Ok(text) => match serde_json::from_str::<serde_json::Value>(text) {
            Ok(json) => BodyPattern::equal_to_json(json),
            Err(_) => BodyPattern::equal_to(text),
        },
        Err(_) => BodyPattern::binary_equal_to(
            base64::engine::general_purpose::STANDARD.encode(body),
        ),
    };
    Some(pattern)
}

fn extension(response: &MockResponse, is_text: bool) -> &'static str {
    let mime = response.mime_type().unwrap_or_default();
    if mime.ends_with("json") {
        "json"
    } else if mime.ends_with("html") {
        "html"
    } else if mime.ends_with("xml") {
        "xml"
    } else if is_text {
        "txt"
    } else {
        "bin"
    }
}

fn canonical_name(captured: &[String], lowered: &str) -> String {
    captured
        .iter()
        .find(|name| name.eq_ignore_ascii_case(lowered))
        .cloned()
        .unwrap_or_else(|| lowered.to_string())
}

/// File-name friendly form of a request path
fn slug(path: &str) -> String {
    let decoded = urlencoding::decode(path).map_or_else(|_| path.to_string(), |p| p.into_owned());

    let mut slug = String::with_capacity(decoded.len());
    for c in decoded.trim_matches('/').chars() {
        if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }

    let slug = slug.trim_matches('_');
    if slug.is_empty() {
        return "root".to_string();
    }
    slug.chars().take(MAX_SLUG_LEN).collect()
}

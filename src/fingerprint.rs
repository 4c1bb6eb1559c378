//! Request fingerprinting for snapshot de-duplication and fixture file ids

use sha2::{Digest, Sha256};

use crate::message::MockRequest;

/// Compute SHA-256 fingerprint of a request
///
/// The fingerprint includes:
/// 1. Method (uppercase normalized)
/// 2. Path
/// 3. Raw query string
/// 4. Captured headers (sorted, names lowercased, values trimmed)
/// 5. Body
///
/// Headers outside `captured_headers` do not contribute, so two requests that
/// differ only in e.g. `User-Agent` map to the same fixture.
#[must_use]
pub fn fingerprint_request(request: &MockRequest, captured_headers: &[String]) -> [u8; 32] {
    let mut hasher = Sha256::new();

    // 1. Method
    let method = request.method.to_uppercase();
    hasher.update((method.len() as u32).to_le_bytes());
    hasher.update(method.as_bytes());

    // 2. Path
    hasher.update((request.path.len() as u32).to_le_bytes());
    hasher.update(request.path.as_bytes());

    // 3. Query
    let query = request.query.as_deref().unwrap_or("");
    hasher.update((query.len() as u32).to_le_bytes());
    hasher.update(query.as_bytes());

    // 4. Captured headers
    for (name, value) in captured_header_values(request, captured_headers) {
        hasher.update((name.len() as u32).to_le_bytes());
        hasher.update(name.as_bytes());
        hasher.update((value.len() as u32).to_le_bytes());
        hasher.update(value.as_bytes());
    }

    // 5. Body
    hasher.update((request.body.len() as u32).to_le_bytes());
    hasher.update(&request.body);

    hasher.finalize().into()
}

/// Captured headers present on the request, as sorted `(lowercase name, trimmed value)` pairs
#[must_use]
pub fn captured_header_values(
    request: &MockRequest,
    captured_headers: &[String],
) -> Vec<(String, String)> {
    let mut values: Vec<(String, String)> = captured_headers
        .iter()
        .filter_map(|name| {
            request
                .header(name)
                .map(|value| (name.to_lowercase(), value.trim().to_string()))
        })
        .collect();
    values.sort();
    values.dedup();
    values
}

/// Short hex id for file names
#[must_use]
pub fn short_id(hash: &[u8; 32]) -> String {
    hex::encode(&hash[..8])
}

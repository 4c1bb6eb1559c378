//! Request/response values passed between the server, stubs and transformers

use bytes::Bytes;

/// Request as received by the mock server
#[derive(Debug, Clone)]
pub struct MockRequest {
    /// HTTP method (e.g., "GET", "POST")
    pub method: String,
    /// Request path
    pub path: String,
    /// Raw query string, without the leading `?`
    pub query: Option<String>,
    /// Request headers in arrival order
    pub headers: Vec<(String, String)>,
    /// Request body
    pub body: Bytes,
    /// Local port the request was received on
    pub local_port: u16,
}

impl MockRequest {
    /// Path and query as sent by the client
    #[must_use]
    pub fn url(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{query}", self.path),
            None => self.path.clone(),
        }
    }

    /// First value of a header (case-insensitive)
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Short description used in logs and error reports
    #[must_use]
    pub fn describe(&self) -> String {
        format!("{} {}", self.method, self.url())
    }
}

/// Response produced by a stub, the upstream or a transformer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: Bytes,
}

impl MockResponse {
    /// Plain-text response
    #[must_use]
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: vec![(
                "Content-Type".to_string(),
                "text/plain; charset=utf-8".to_string(),
            )],
            body: Bytes::from(body.into()),
        }
    }

    /// First value of a header (case-insensitive)
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// All values of a header, splitting comma-separated lists
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .flat_map(|(_, v)| v.split(','))
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// Mime part of the `Content-Type` header, lowercased
    #[must_use]
    pub fn mime_type(&self) -> Option<String> {
        self.header("content-type")
            .and_then(|ct| ct.split(';').next())
            .map(|mime| mime.trim().to_ascii_lowercase())
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Headers that belong to a single connection and are never copied across
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Whether a header must be dropped when relaying or storing a message
#[must_use]
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

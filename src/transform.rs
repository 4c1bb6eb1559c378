//! Response transformers applied to every served response

use bytes::Bytes;
use tracing::debug;

use crate::message::{MockRequest, MockResponse};

/// Post-processing step run on each response before it is written out.
///
/// Transformers are shared between connections and must not hold mutable state.
pub trait ResponseTransformer: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Produce the response to send for `request`
    fn transform(&self, request: &MockRequest, response: MockResponse) -> MockResponse;
}

/// Rewrites upstream URLs in JSON bodies so they point back at the mock server
#[derive(Debug, Clone)]
pub struct UrlRewriteTransformer {
    upstream_base: String,
}

impl UrlRewriteTransformer {
    /// Name the transformer registers under
    pub const NAME: &'static str = "github-api-url-rewrite";

    /// Create a transformer replacing `upstream_base` (e.g. `https://api.github.com/`)
    #[must_use]
    pub fn new(upstream_base: impl Into<String>) -> Self {
        Self {
            upstream_base: upstream_base.into(),
        }
    }

    /// Whether the response is uncompressed JSON
    #[must_use]
    pub fn applies_to(response: &MockResponse) -> bool {
        response.mime_type().as_deref() == Some("application/json")
            && !response
                .header_values("content-encoding")
                .any(|v| v.eq_ignore_ascii_case("gzip"))
    }
}

impl ResponseTransformer for UrlRewriteTransformer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn transform(&self, request: &MockRequest, mut response: MockResponse) -> MockResponse {
        if !Self::applies_to(&response) {
            return response;
        }

        let Ok(body) = std::str::from_utf8(&response.body) else {
            debug!("Skipping URL rewrite for non UTF-8 JSON body");
            return response;
        };

        if !body.contains(&self.upstream_base) {
            return response;
        }

        let local_base = format!("http://localhost:{}/", request.local_port);
        let rewritten = body.replace(&self.upstream_base, &local_base);
        response.body = Bytes::from(rewritten);
        response
    }
}

/// Run `response` through each transformer in registration order
pub fn apply_all(
    transformers: &[std::sync::Arc<dyn ResponseTransformer>],
    request: &MockRequest,
    response: MockResponse,
) -> MockResponse {
    transformers
        .iter()
        .fold(response, |response, t| t.transform(request, response))
}

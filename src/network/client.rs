//! HTTP(S) client for forwarding unmatched requests to the upstream

use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request, Uri};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::{debug, warn};

use crate::message::{is_hop_by_hop, MockRequest, MockResponse};
use crate::{FixtureError, Result};

use super::CONNECT_TIMEOUT_MS;

/// Client used by proxy stubs
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    max_response_size: usize,
}

impl UpstreamClient {
    /// Create a client accepting both `http` and `https` upstreams
    #[must_use]
    pub fn new(max_response_size: usize) -> Self {
        let mut http_connector = HttpConnector::new();
        http_connector.set_connect_timeout(Some(Duration::from_millis(CONNECT_TIMEOUT_MS)));
        http_connector.enforce_http(false);

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build(https_connector);

        Self {
            client,
            max_response_size,
        }
    }

    /// Forward `request` to `base_url`, keeping its path and query
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::Upstream`] if the request fails or the response
    /// is larger than `max_response_size`
    pub async fn forward(&self, base_url: &str, request: &MockRequest) -> Result<MockResponse> {
        let uri = build_uri(base_url, &request.url())?;

        debug!("Forwarding {} to {}", request.method, uri);

        let method = request.method.parse::<Method>().map_err(|e| {
            FixtureError::Upstream(format!("Invalid HTTP method '{}': {e}", request.method))
        })?;

        let mut request_builder = Request::builder().method(method).uri(uri);
        for (name, value) in &request.headers {
            if is_hop_by_hop(name)
                || name.eq_ignore_ascii_case("host")
                || name.eq_ignore_ascii_case("content-length")
            {
                continue;
            }
            request_builder = request_builder.header(name.as_str(), value.as_str());
        }

        let http_request = request_builder
            .body(Full::new(request.body.clone()))
            .map_err(|e| FixtureError::Upstream(format!("Failed to build request: {e}")))?;

        let response = self.client.request(http_request).await.map_err(|e| {
            warn!("Request failed: {e}");
            FixtureError::Upstream(e.to_string())
        })?;

        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
            .map(|(name, value)| {
                (
                    name.to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| FixtureError::Upstream(format!("Failed to read response body: {e}")))?
            .to_bytes();

        if body.len() > self.max_response_size {
            return Err(FixtureError::Upstream(format!(
                "response of {} bytes exceeds limit of {} bytes",
                body.len(),
                self.max_response_size
            )));
        }

        Ok(MockResponse {
            status,
            headers,
            body,
        })
    }
}

/// Join a base URL and an origin-form path
fn build_uri(base_url: &str, path_and_query: &str) -> Result<Uri> {
    let uri = format!("{}{path_and_query}", base_url.trim_end_matches('/'));

    uri.parse::<Uri>()
        .map_err(|e| FixtureError::Upstream(format!("Invalid URI '{uri}': {e}")))
}

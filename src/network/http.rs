//! Conversions between hyper messages and mock values

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Request, Response, StatusCode};
use tracing::warn;

use crate::config::LimitsConfig;
use crate::message::{is_hop_by_hop, MockRequest, MockResponse};
use crate::{FixtureError, Result};

/// HTTP helpers for the server side of a connection
pub struct HttpHandler;

impl HttpHandler {
    /// Read an incoming request into a [`MockRequest`]
    ///
    /// # Errors
    ///
    /// Returns error if the request breaks a limit or its body cannot be read
    pub async fn read_request<B>(
        request: Request<B>,
        local_port: u16,
        limits: &LimitsConfig,
    ) -> Result<MockRequest>
    where
        B: hyper::body::Body,
        B::Error: std::fmt::Display,
    {
        Self::validate_request(&request, limits)?;

        let (parts, body) = request.into_parts();
        let body = Self::read_body(body, limits.max_request_size).await?;

        let headers = parts
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        Ok(MockRequest {
            method: parts.method.to_string(),
            path: parts.uri.path().to_string(),
            query: parts.uri.query().map(str::to_string),
            headers,
            body,
            local_port,
        })
    }

    /// Convert a [`MockResponse`] into a hyper response.
    ///
    /// Hop-by-hop headers and `Content-Length` are dropped; hyper sets the
    /// length from the body.
    #[must_use]
    pub fn into_response(response: MockResponse) -> Response<Full<Bytes>> {
        let status = StatusCode::from_u16(response.status).unwrap_or_else(|_| {
            warn!("Invalid status {} in response, sending 500", response.status);
            StatusCode::INTERNAL_SERVER_ERROR
        });

        let mut builder = Response::builder().status(status);
        for (name, value) in &response.headers {
            if is_hop_by_hop(name) || name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }

        match builder.body(Full::new(response.body)) {
            Ok(built) => built,
            Err(e) => {
                warn!("Dropping response with invalid headers: {e}");
                Self::create_response(StatusCode::INTERNAL_SERVER_ERROR, &format!("Error: {e}"))
            }
        }
    }

    /// Create a simple text response
    #[must_use]
    pub fn create_response(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
        *response.status_mut() = status;
        response
    }

    /// Map an error to the response the client sees
    #[must_use]
    pub fn error_response(error: &FixtureError) -> MockResponse {
        let status = match error {
            FixtureError::DataTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            FixtureError::Upstream(_) => StatusCode::BAD_GATEWAY,
            FixtureError::TooManyHeaders { .. } => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        MockResponse::text(status.as_u16(), format!("Error: {error}"))
    }

    /// Check declared size and header count
    ///
    /// # Errors
    ///
    /// Returns error if request is too large or has too many headers
    pub fn validate_request<B>(request: &Request<B>, limits: &LimitsConfig) -> Result<()> {
        if let Some(length) = request
            .headers()
            .get(hyper::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok())
        {
            if length > limits.max_request_size {
                return Err(FixtureError::DataTooLarge {
                    size: length,
                    limit: limits.max_request_size,
                });
            }
        }

        let header_count = request.headers().len();
        if header_count > limits.max_headers {
            return Err(FixtureError::TooManyHeaders {
                count: header_count,
                limit: limits.max_headers,
            });
        }

        Ok(())
    }

    /// Read a body with size limit
    ///
    /// # Errors
    ///
    /// Returns error if body is too large or read fails
    pub async fn read_body<B>(body: B, max_size: usize) -> Result<Bytes>
    where
        B: hyper::body::Body,
        B::Error: std::fmt::Display,
    {
        let collected = body
            .collect()
            .await
            .map_err(|e| FixtureError::Other(format!("Failed to read body: {e}")))?;

        let bytes = collected.to_bytes();

        if bytes.len() > max_size {
            return Err(FixtureError::DataTooLarge {
                size: bytes.len(),
                limit: max_size,
            });
        }

        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Empty;

    fn limits() -> LimitsConfig {
        LimitsConfig {
            max_request_size: 1024,
            max_headers: 4,
            ..LimitsConfig::default()
        }
    }

    #[tokio::test]
    async fn test_read_request() {
        let request = Request::builder()
            .method("POST")
            .uri("/repos/hub4j/github-api/issues?state=open")
            .header("If-None-Match", "\"abc\"")
            .body(Full::new(Bytes::from("{\"title\":\"x\"}")))
            .unwrap();

        let mock = HttpHandler::read_request(request, 8089, &limits())
            .await
            .unwrap();
        assert_eq!(mock.method, "POST");
        assert_eq!(mock.path, "/repos/hub4j/github-api/issues");
        assert_eq!(mock.query.as_deref(), Some("state=open"));
        assert_eq!(mock.header("if-none-match"), Some("\"abc\""));
        assert_eq!(mock.body, Bytes::from("{\"title\":\"x\"}"));
        assert_eq!(mock.local_port, 8089);
    }

    #[test]
    fn test_validate_request_too_large() {
        let request = Request::builder()
            .method("POST")
            .uri("/test")
            .header(hyper::header::CONTENT_LENGTH, "10000")
            .body(Empty::<Bytes>::new())
            .unwrap();

        let err = HttpHandler::validate_request(&request, &limits()).unwrap_err();
        assert_eq!(
            HttpHandler::error_response(&err).status,
            StatusCode::PAYLOAD_TOO_LARGE.as_u16()
        );
    }

    #[test]
    fn test_validate_request_too_many_headers() {
        let mut builder = Request::builder().uri("/test");
        for i in 0..5 {
            builder = builder.header(format!("x-h{i}"), "v");
        }
        let request = builder.body(Empty::<Bytes>::new()).unwrap();

        let err = HttpHandler::validate_request(&request, &limits()).unwrap_err();
        assert_eq!(
            HttpHandler::error_response(&err).status,
            StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE.as_u16()
        );
    }

    #[tokio::test]
    async fn test_read_body_too_large() {
        let body = Full::new(Bytes::from("test data that is too long"));

        let result = HttpHandler::read_body(body, 5).await;
        assert!(matches!(result, Err(FixtureError::DataTooLarge { .. })));
    }

    #[test]
    fn test_into_response_drops_framing_headers() {
        let mock = MockResponse {
            status: 201,
            headers: vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                ("Content-Length".to_string(), "999".to_string()),
                ("Transfer-Encoding".to_string(), "chunked".to_string()),
                ("Vary".to_string(), "Accept".to_string()),
                ("Vary".to_string(), "Accept-Encoding".to_string()),
            ],
            body: Bytes::from("{}"),
        };

        let response = HttpHandler::into_response(mock);
        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(response.headers().get("content-length").is_none());
        assert!(response.headers().get("transfer-encoding").is_none());
        assert_eq!(response.headers().get_all("vary").iter().count(), 2);
    }

    #[test]
    fn test_into_response_invalid_status() {
        let response = HttpHandler::into_response(MockResponse::text(1000, "x"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

//! Compiled request matchers

use base64::Engine;
use bytes::Bytes;
use regex::Regex;
use serde_json::Value;

use crate::message::MockRequest;
use crate::{FixtureError, Result};

use super::mapping::{BodyPattern, HeaderPattern, RequestPattern};

#[derive(Debug)]
enum UrlMatcher {
    Any,
    Url(String),
    UrlPath(String),
    UrlPattern(Regex),
    UrlPathPattern(Regex),
}

#[derive(Debug)]
enum HeaderMatcher {
    EqualTo(String),
    Contains(String),
    Matches(Regex),
    Absent,
    Present,
}

#[derive(Debug)]
enum BodyMatcher {
    EqualTo(String),
    EqualToJson(Value),
    Binary(Bytes),
    Contains(String),
    Matches(Regex),
}

impl BodyMatcher {
    fn matches(&self, body: &[u8]) -> bool {
        match self {
            Self::Binary(expected) => body == expected.as_ref(),
            Self::EqualToJson(expected) => {
                serde_json::from_slice::<Value>(body).is_ok_and(|actual| actual == *expected)
            }
            Self::EqualTo(expected) => body == expected.as_bytes(),
            Self::Contains(part) => {
                std::str::from_utf8(body).is_ok_and(|text| text.contains(part.as_str()))
            }
            Self::Matches(re) => std::str::from_utf8(body).is_ok_and(|text| re.is_match(text)),
        }
    }
}

/// A `RequestPattern` with its regexes compiled
#[derive(Debug)]
pub struct RequestMatcher {
    method: Option<String>,
    url: UrlMatcher,
    headers: Vec<(String, HeaderMatcher)>,
    body: Vec<BodyMatcher>,
}

impl RequestMatcher {
    /// Compile a pattern
    ///
    /// # Errors
    ///
    /// Returns error if more than one URL condition is set or a regex is invalid
    pub fn compile(pattern: &RequestPattern) -> Result<Self> {
        let method = pattern
            .method
            .as_deref()
            .map(str::to_uppercase)
            .filter(|m| m != "ANY");

        let url_conditions = [
            pattern.url.is_some(),
            pattern.url_path.is_some(),
            pattern.url_pattern.is_some(),
            pattern.url_path_pattern.is_some(),
        ];
        if url_conditions.iter().filter(|set| **set).count() > 1 {
            return Err(FixtureError::InvalidMapping(
                "only one of url, urlPath, urlPattern, urlPathPattern may be set".to_string(),
            ));
        }

        let url = if let Some(url) = &pattern.url {
            UrlMatcher::Url(url.clone())
        } else if let Some(path) = &pattern.url_path {
            UrlMatcher::UrlPath(path.clone())
        } else if let Some(re) = &pattern.url_pattern {
            UrlMatcher::UrlPattern(anchored(re)?)
        } else if let Some(re) = &pattern.url_path_pattern {
            UrlMatcher::UrlPathPattern(anchored(re)?)
        } else {
            UrlMatcher::Any
        };

        let headers = pattern
            .headers
            .iter()
            .map(|(name, p)| Ok((name.clone(), compile_header(name, p)?)))
            .collect::<Result<Vec<_>>>()?;

        let body = pattern
            .body_patterns
            .iter()
            .map(compile_body)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            method,
            url,
            headers,
            body,
        })
    }

    /// Whether `request` satisfies every condition
    #[must_use]
    pub fn matches(&self, request: &MockRequest) -> bool {
        if let Some(method) = &self.method {
            if !request.method.eq_ignore_ascii_case(method) {
                return false;
            }
        }

        let url_ok = match &self.url {
            UrlMatcher::Any => true,
            UrlMatcher::Url(url) => request.url() == *url,
            UrlMatcher::UrlPath(path) => request.path == *path,
            UrlMatcher::UrlPattern(re) => re.is_match(&request.url()),
            UrlMatcher::UrlPathPattern(re) => re.is_match(&request.path),
        };
        if !url_ok {
            return false;
        }

        let headers_ok = self.headers.iter().all(|(name, matcher)| {
            let value = request.header(name);
            match matcher {
                HeaderMatcher::Absent => value.is_none(),
                HeaderMatcher::Present => value.is_some(),
                HeaderMatcher::EqualTo(expected) => value == Some(expected.as_str()),
                HeaderMatcher::Contains(part) => value.is_some_and(|v| v.contains(part.as_str())),
                HeaderMatcher::Matches(re) => value.is_some_and(|v| re.is_match(v)),
            }
        });

        headers_ok && self.body.iter().all(|matcher| matcher.matches(&request.body))
    }
}

fn compile_body(pattern: &BodyPattern) -> Result<BodyMatcher> {
    let matcher = if let Some(value) = &pattern.equal_to_json {
        BodyMatcher::EqualToJson(value.clone())
    } else if let Some(value) = &pattern.equal_to {
        BodyMatcher::EqualTo(value.clone())
    } else if let Some(encoded) = &pattern.binary_equal_to {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| FixtureError::InvalidMapping(format!("invalid binaryEqualTo: {e}")))?;
        BodyMatcher::Binary(Bytes::from(decoded))
    } else if let Some(value) = &pattern.contains {
        BodyMatcher::Contains(value.clone())
    } else if let Some(re) = &pattern.matches {
        BodyMatcher::Matches(anchored(re)?)
    } else {
        return Err(FixtureError::InvalidMapping(
            "body pattern has no condition".to_string(),
        ));
    };
    Ok(matcher)
}

fn compile_header(name: &str, pattern: &HeaderPattern) -> Result<HeaderMatcher> {
    let matcher = if pattern.absent == Some(true) {
        HeaderMatcher::Absent
    } else if let Some(value) = &pattern.equal_to {
        HeaderMatcher::EqualTo(value.clone())
    } else if let Some(value) = &pattern.contains {
        HeaderMatcher::Contains(value.clone())
    } else if let Some(re) = &pattern.matches {
        HeaderMatcher::Matches(anchored(re)?)
    } else if pattern.absent == Some(false) {
        HeaderMatcher::Present
    } else {
        return Err(FixtureError::InvalidMapping(format!(
            "header '{name}' has no condition"
        )));
    };
    Ok(matcher)
}

fn anchored(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{pattern})$"))
        .map_err(|e| FixtureError::InvalidMapping(format!("invalid regex '{pattern}': {e}")))
}

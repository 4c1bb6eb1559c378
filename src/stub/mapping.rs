//! Stub mapping file format

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Priority of stubs that do not set one
pub const DEFAULT_PRIORITY: u32 = 5;

/// Priority of the proxy / default-deny fallback rule
pub const FALLBACK_PRIORITY: u32 = 100;

/// State every scenario starts in
pub const SCENARIO_STARTED: &str = "Started";

/// Body returned when no fixture matches and proxying is off
pub const STUB_NOT_FOUND_BODY: &str =
    "Stubbed data not found. Set test.github.use-proxy to have WireMock proxy to github";

/// A request pattern paired with the response to serve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StubMapping {
    /// Stable identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Human-readable name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Lower values are evaluated first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
    /// Scenario this stub takes part in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario_name: Option<String>,
    /// State the scenario must be in for this stub to match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_scenario_state: Option<String>,
    /// State the scenario moves to once this stub has answered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_scenario_state: Option<String>,
    /// What to match
    pub request: RequestPattern,
    /// What to answer
    pub response: ResponseDefinition,
}

/// Request side of a mapping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPattern {
    /// Method, or `ANY` / absent for every method
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Exact path and query
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Exact path, query ignored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_path: Option<String>,
    /// Regex over path and query
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_pattern: Option<String>,
    /// Regex over the path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_path_pattern: Option<String>,
    /// Header conditions
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, HeaderPattern>,
    /// Body conditions, all of which must hold
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub body_patterns: Vec<BodyPattern>,
}

/// One header condition; exactly one field is expected to be set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderPattern {
    /// Value equals
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equal_to: Option<String>,
    /// Value contains
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,
    /// Value matches regex
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matches: Option<String>,
    /// Header must be missing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub absent: Option<bool>,
}

impl HeaderPattern {
    /// `equalTo` condition
    #[must_use]
    pub fn equal_to(value: impl Into<String>) -> Self {
        Self {
            equal_to: Some(value.into()),
            ..Self::default()
        }
    }
}

/// One body condition; exactly one field is expected to be set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyPattern {
    /// Body equals this text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equal_to: Option<String>,
    /// Body parses to this JSON value (object key order ignored)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equal_to_json: Option<serde_json::Value>,
    /// Body bytes equal this base64 value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_equal_to: Option<String>,
    /// Body contains this text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,
    /// Body matches this regex
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matches: Option<String>,
}

impl BodyPattern {
    /// `equalTo` condition
    #[must_use]
    pub fn equal_to(value: impl Into<String>) -> Self {
        Self {
            equal_to: Some(value.into()),
            ..Self::default()
        }
    }

    /// `equalToJson` condition
    #[must_use]
    pub fn equal_to_json(value: serde_json::Value) -> Self {
        Self {
            equal_to_json: Some(value),
            ..Self::default()
        }
    }

    /// `binaryEqualTo` condition, `encoded` being base64
    #[must_use]
    pub fn binary_equal_to(encoded: impl Into<String>) -> Self {
        Self {
            binary_equal_to: Some(encoded.into()),
            ..Self::default()
        }
    }
}

/// Response side of a mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseDefinition {
    /// HTTP status
    #[serde(default = "default_status")]
    pub status: u16,
    /// Response headers
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, HeaderValues>,
    /// Inline text body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Inline JSON body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_body: Option<serde_json::Value>,
    /// Inline binary body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64_body: Option<String>,
    /// Body stored under `__files/`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_file_name: Option<String>,
    /// Forward to this base URL instead of answering
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_base_url: Option<String>,
}

fn default_status() -> u16 {
    200
}

impl Default for ResponseDefinition {
    fn default() -> Self {
        Self {
            status: default_status(),
            headers: BTreeMap::new(),
            body: None,
            json_body: None,
            base64_body: None,
            body_file_name: None,
            proxy_base_url: None,
        }
    }
}

/// Single or repeated header value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValues {
    /// `"name": "value"`
    One(String),
    /// `"name": ["a", "b"]`
    Many(Vec<String>),
}

impl HeaderValues {
    /// Iterate the values
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let values: &[String] = match self {
            Self::One(value) => std::slice::from_ref(value),
            Self::Many(values) => values,
        };
        values.iter().map(String::as_str)
    }

    /// Append a value, turning a single value into a list
    pub fn push(&mut self, value: String) {
        match self {
            Self::One(first) => *self = Self::Many(vec![std::mem::take(first), value]),
            Self::Many(values) => values.push(value),
        }
    }
}

impl StubMapping {
    /// Answer requests matching `request` with `response`
    #[must_use]
    pub fn new(request: RequestPattern, response: ResponseDefinition) -> Self {
        Self {
            id: None,
            name: None,
            priority: None,
            scenario_name: None,
            required_scenario_state: None,
            new_scenario_state: None,
            request,
            response,
        }
    }

    /// Set the priority
    #[must_use]
    pub fn at_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Set the name
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Only match while `scenario` is in `required`, optionally moving it to `next`
    #[must_use]
    pub fn in_scenario(
        mut self,
        scenario: impl Into<String>,
        required: impl Into<String>,
        next: Option<String>,
    ) -> Self {
        self.scenario_name = Some(scenario.into());
        self.required_scenario_state = Some(required.into());
        self.new_scenario_state = next;
        self
    }

    /// Forward every request to `base_url`
    #[must_use]
    pub fn proxy_all_to(base_url: impl Into<String>) -> Self {
        Self::new(
            RequestPattern::any(),
            ResponseDefinition {
                proxy_base_url: Some(base_url.into()),
                ..ResponseDefinition::default()
            },
        )
        .named("proxy-all")
        .at_priority(FALLBACK_PRIORITY)
    }

    /// Answer every request with 500 and a hint to enable proxying
    #[must_use]
    pub fn stub_not_found() -> Self {
        Self::new(
            RequestPattern {
                url_path_pattern: Some(".*".to_string()),
                ..RequestPattern::any()
            },
            ResponseDefinition {
                status: 500,
                body: Some(STUB_NOT_FOUND_BODY.to_string()),
                ..ResponseDefinition::default()
            },
        )
        .named("stub-not-found")
        .at_priority(FALLBACK_PRIORITY)
    }

    /// Effective priority
    #[must_use]
    pub fn effective_priority(&self) -> u32 {
        self.priority.unwrap_or(DEFAULT_PRIORITY)
    }
}

impl RequestPattern {
    /// Matches every request
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Matches `method` on an exact path and query
    #[must_use]
    pub fn url(method: &str, url: impl Into<String>) -> Self {
        Self {
            method: Some(method.to_string()),
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Add a header condition
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, pattern: HeaderPattern) -> Self {
        self.headers.insert(name.into(), pattern);
        self
    }

    /// Add a body condition
    #[must_use]
    pub fn with_body(mut self, pattern: BodyPattern) -> Self {
        self.body_patterns.push(pattern);
        self
    }
}

impl ResponseDefinition {
    /// Status with an inline text body
    #[must_use]
    pub fn with_body(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: Some(body.into()),
            ..Self::default()
        }
    }

    /// Add a header
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into(), HeaderValues::One(value.into()));
        self
    }
}

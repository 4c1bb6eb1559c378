//! Configuration types for ghfixture

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use hyper::Uri;
use serde::{Deserialize, Serialize};

use crate::{FixtureError, Result};

/// Upstream the fixtures are recorded from
pub const DEFAULT_UPSTREAM_URL: &str = "https://api.github.com/";

/// Environment variable enabling snapshot recording
pub const TAKE_SNAPSHOT_ENV: &str = "TEST_GITHUB_TAKE_SNAPSHOT";

/// Environment variable enabling proxying to the upstream
pub const USE_PROXY_ENV: &str = "TEST_GITHUB_USE_PROXY";

/// Proxy/snapshot switches.
///
/// Snapshotting always implies proxying: every constructor, including
/// deserialization, forces `use_proxy` on when `take_snapshot` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "RawModeFlags")]
pub struct ModeFlags {
    use_proxy: bool,
    take_snapshot: bool,
}

#[derive(Deserialize)]
struct RawModeFlags {
    #[serde(default)]
    use_proxy: bool,
    #[serde(default)]
    take_snapshot: bool,
}

impl From<RawModeFlags> for ModeFlags {
    fn from(raw: RawModeFlags) -> Self {
        Self::new(raw.use_proxy, raw.take_snapshot)
    }
}

impl ModeFlags {
    /// Build flags, forcing proxy mode on when snapshotting
    #[must_use]
    pub fn new(use_proxy: bool, take_snapshot: bool) -> Self {
        Self {
            use_proxy: use_proxy || take_snapshot,
            take_snapshot,
        }
    }

    /// Read flags from the process environment
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read flags through an arbitrary variable lookup.
    ///
    /// A variable enables its flag when it is set to anything other than `"false"`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let take_snapshot = flag_enabled(lookup(TAKE_SNAPSHOT_ENV));
        let use_proxy = flag_enabled(lookup(USE_PROXY_ENV));
        Self::new(use_proxy, take_snapshot)
    }

    /// Flags enabled in either set
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self::new(
            self.use_proxy || other.use_proxy,
            self.take_snapshot || other.take_snapshot,
        )
    }

    /// Forward unmatched requests to the upstream
    #[must_use]
    pub fn use_proxy(&self) -> bool {
        self.use_proxy
    }

    /// Persist proxied interactions on stop
    #[must_use]
    pub fn take_snapshot(&self) -> bool {
        self.take_snapshot
    }
}

fn flag_enabled(value: Option<String>) -> bool {
    value.is_some_and(|v| v != "false")
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureConfig {
    /// Address to listen on
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    /// Port to listen on, 0 for an ephemeral port
    #[serde(default)]
    pub port: u16,
    /// Directory holding `mappings/` and `__files/`
    #[serde(default = "default_files_root")]
    pub files_root: PathBuf,
    /// Upstream base URL, rewritten in JSON bodies and used for proxying
    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,
    /// Fail `stop` when requests hit the default-deny rule
    #[serde(default = "default_true")]
    pub fail_on_unmatched_requests: bool,
    /// Proxy/snapshot switches
    #[serde(default)]
    pub mode: ModeFlags,
    /// Snapshot options
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    /// Resource limits
    #[serde(default)]
    pub limits: LimitsConfig,
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_files_root() -> PathBuf {
    PathBuf::from("tests/fixtures")
}

fn default_upstream_url() -> String {
    DEFAULT_UPSTREAM_URL.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for FixtureConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: 0,
            files_root: default_files_root(),
            upstream_url: default_upstream_url(),
            fail_on_unmatched_requests: true,
            mode: ModeFlags::default(),
            snapshot: SnapshotConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

/// Snapshot options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Target whose proxied interactions are recorded; defaults to the upstream
    #[serde(default)]
    pub target: Option<String>,
    /// Request headers stored as match conditions
    #[serde(default = "default_captured_headers")]
    pub captured_headers: Vec<String>,
    /// Text bodies longer than this are extracted into `__files/`
    #[serde(default = "default_extract_threshold")]
    pub extract_text_bodies_over: usize,
    /// Pretty-print the written fixtures afterwards
    #[serde(default)]
    pub reformat_output: bool,
}

fn default_captured_headers() -> Vec<String> {
    vec!["If-None-Match".to_string()]
}

fn default_extract_threshold() -> usize {
    255
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            target: None,
            captured_headers: default_captured_headers(),
            extract_text_bodies_over: default_extract_threshold(),
            reformat_output: false,
        }
    }
}

/// Resource limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Maximum request size in bytes
    pub max_request_size: usize,
    /// Maximum response size in bytes
    pub max_response_size: usize,
    /// Maximum headers per request
    pub max_headers: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: 256,
            max_request_size: 16 * 1024 * 1024,   // 16 MB
            max_response_size: 64 * 1024 * 1024, // 64 MB
            max_headers: 128,
        }
    }
}

impl FixtureConfig {
    /// Default configuration with mode flags taken from the environment
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            mode: ModeFlags::from_env(),
            ..Self::default()
        }
    }

    /// Load configuration from TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FixtureError::ConfigError(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| FixtureError::ConfigError(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Upstream base URL, always ending in `/`
    #[must_use]
    pub fn upstream_base(&self) -> String {
        with_trailing_slash(&self.upstream_url)
    }

    /// Target recorded by snapshots, always ending in `/`
    #[must_use]
    pub fn snapshot_target(&self) -> String {
        self.snapshot
            .target
            .as_deref()
            .map_or_else(|| self.upstream_base(), with_trailing_slash)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<()> {
        validate_base_url("upstream_url", &self.upstream_url)?;
        if let Some(target) = &self.snapshot.target {
            validate_base_url("snapshot.target", target)?;
        }

        if self.files_root.as_os_str().is_empty() {
            return Err(FixtureError::ConfigError(
                "files_root cannot be empty".to_string(),
            ));
        }

        if self.snapshot.captured_headers.iter().any(String::is_empty) {
            return Err(FixtureError::ConfigError(
                "snapshot.captured_headers cannot contain empty names".to_string(),
            ));
        }

        let limits = [
            ("max_connections", self.limits.max_connections),
            ("max_request_size", self.limits.max_request_size),
            ("max_response_size", self.limits.max_response_size),
            ("max_headers", self.limits.max_headers),
        ];
        for (name, value) in limits {
            if value == 0 {
                return Err(FixtureError::ConfigError(format!(
                    "limits.{name} must be > 0"
                )));
            }
        }

        Ok(())
    }
}

fn with_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{url}/")
    }
}

fn validate_base_url(field: &str, url: &str) -> Result<()> {
    let uri = url
        .parse::<Uri>()
        .map_err(|e| FixtureError::ConfigError(format!("{field}: invalid URL '{url}': {e}")))?;

    match uri.scheme_str() {
        Some("http" | "https") => {}
        _ => {
            return Err(FixtureError::ConfigError(format!(
                "{field}: '{url}' must use http or https"
            )))
        }
    }

    if uri.host().is_none() {
        return Err(FixtureError::ConfigError(format!(
            "{field}: '{url}' has no host"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_flags_default_off() {
        let flags = ModeFlags::from_lookup(lookup(&[]));
        assert!(!flags.use_proxy());
        assert!(!flags.take_snapshot());
    }

    #[test]
    fn test_flag_literal_false_is_off() {
        let flags = ModeFlags::from_lookup(lookup(&[
            (USE_PROXY_ENV, "false"),
            (TAKE_SNAPSHOT_ENV, "false"),
        ]));
        assert_eq!(flags, ModeFlags::default());
    }

    #[test]
    fn test_flag_any_other_value_is_on() {
        for value in ["true", "1", "", "FALSE", "yes"] {
            let flags = ModeFlags::from_lookup(lookup(&[(USE_PROXY_ENV, value)]));
            assert!(flags.use_proxy(), "value {value:?} should enable proxy");
            assert!(!flags.take_snapshot());
        }
    }

    #[test]
    fn test_snapshot_forces_proxy() {
        let flags = ModeFlags::from_lookup(lookup(&[(TAKE_SNAPSHOT_ENV, "true")]));
        assert!(flags.take_snapshot());
        assert!(flags.use_proxy());

        let flags = ModeFlags::new(false, true);
        assert!(flags.use_proxy());
    }

    #[test]
    fn test_snapshot_forces_proxy_when_deserialized() {
        let config: FixtureConfig = toml::from_str(
            r#"
            [mode]
            take_snapshot = true
            "#,
        )
        .unwrap();
        assert!(config.mode.use_proxy());
        assert!(config.mode.take_snapshot());
    }

    #[test]
    fn test_union() {
        let merged = ModeFlags::new(true, false).union(ModeFlags::default());
        assert!(merged.use_proxy());
        assert!(!merged.take_snapshot());
    }

    #[test]
    fn test_config_parse() {
        let config_toml = r#"
            port = 8089
            files_root = "src/test/resources"
            fail_on_unmatched_requests = false

            [snapshot]
            extract_text_bodies_over = 1024
        "#;

        let config: FixtureConfig = toml::from_str(config_toml).unwrap();
        assert_eq!(config.port, 8089);
        assert_eq!(config.upstream_url, DEFAULT_UPSTREAM_URL);
        assert!(!config.fail_on_unmatched_requests);
        assert_eq!(config.snapshot.extract_text_bodies_over, 1024);
        assert_eq!(config.snapshot.captured_headers, vec!["If-None-Match"]);
        assert!(!config.mode.use_proxy());
    }

    #[test]
    fn test_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        let config_toml = r#"
            upstream_url = "http://127.0.0.1:9000"

            [mode]
            use_proxy = true
        "#;
        file.write_all(config_toml.as_bytes()).unwrap();

        let config = FixtureConfig::from_file(file.path()).unwrap();
        assert!(config.mode.use_proxy());
        assert_eq!(config.upstream_base(), "http://127.0.0.1:9000/");
        assert_eq!(config.snapshot_target(), "http://127.0.0.1:9000/");
    }

    #[test]
    fn test_invalid_upstream_scheme() {
        let config = FixtureConfig {
            upstream_url: "ftp://api.github.com/".to_string(),
            ..FixtureConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_zero_limit() {
        let mut config = FixtureConfig::default();
        config.limits.max_connections = 0;
        assert!(matches!(
            config.validate(),
            Err(FixtureError::ConfigError(_))
        ));
    }
}

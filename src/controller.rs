//! Fixture controller: lifecycle of the mock server used by a test run

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::FixtureConfig;
use crate::format::format_json_files;
use crate::network::{MockServer, ServerState, UpstreamClient};
use crate::recording::{Journal, SnapshotSummary, SnapshotWriter};
use crate::stub::{load_mappings, StubMapping, StubRegistry, StubRule};
use crate::transform::{ResponseTransformer, UrlRewriteTransformer};
use crate::{FixtureError, Result};

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Created, not started
    Initialized,
    /// Server is accepting requests
    Running,
    /// Server was shut down
    Stopped,
}

impl ControllerState {
    fn as_str(self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}

/// Owns the mock server for one test run.
///
/// Replays fixtures from `files_root`; requests no fixture answers are either
/// proxied to the upstream or answered with a 500, depending on the mode flags.
pub struct FixtureController {
    config: Arc<FixtureConfig>,
    registry: Arc<StubRegistry>,
    journal: Arc<Journal>,
    transformers: Vec<Arc<dyn ResponseTransformer>>,
    server: Option<MockServer>,
    state: ControllerState,
}

impl FixtureController {
    /// Create a controller and register the upstream URL rewrite
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid
    pub fn new(config: FixtureConfig) -> Result<Self> {
        config.validate()?;

        let rewrite: Arc<dyn ResponseTransformer> =
            Arc::new(UrlRewriteTransformer::new(config.upstream_base()));

        // Bodies are only read back when snapshotting
        let journal = if config.mode.take_snapshot() {
            Journal::new()
        } else {
            Journal::without_bodies()
        };

        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(StubRegistry::new()),
            journal: Arc::new(journal),
            transformers: vec![rewrite],
            server: None,
            state: ControllerState::Initialized,
        })
    }

    /// Register an additional transformer, run after the ones already registered
    #[must_use]
    pub fn with_transformer(mut self, transformer: Arc<dyn ResponseTransformer>) -> Self {
        self.transformers.push(transformer);
        self
    }

    /// Start the server, load fixtures and install the fallback rule
    ///
    /// # Errors
    ///
    /// Returns error if the controller was already started, a mapping is
    /// invalid, or the port cannot be bound
    pub async fn start(&mut self) -> Result<()> {
        self.expect_state(ControllerState::Initialized)?;

        for mapping in load_mappings(&self.config.files_root)? {
            self.registry.add(mapping)?;
        }

        let state = Arc::new(ServerState {
            registry: Arc::clone(&self.registry),
            transformers: self.transformers.clone(),
            journal: Arc::clone(&self.journal),
            client: UpstreamClient::new(self.config.limits.max_response_size),
            files_root: self.config.files_root.clone(),
            limits: self.config.limits.clone(),
        });

        let addr = SocketAddr::new(self.config.bind_address, self.config.port);
        let server = match MockServer::bind(addr, state).await {
            Ok(server) => server,
            Err(e) => {
                self.registry.clear();
                return Err(e);
            }
        };

        if self.is_use_proxy() {
            info!("Proxying unmatched requests to {}", self.config.upstream_url);
            self.registry
                .set_fallback(StubMapping::proxy_all_to(self.config.upstream_base()))?;
        } else {
            self.registry.set_fallback(StubMapping::stub_not_found())?;
        }

        info!(
            "Fixture server ready at {} ({} stub(s), proxy={}, snapshot={})",
            server.local_addr(),
            self.registry.len(),
            self.is_use_proxy(),
            self.is_take_snapshot()
        );

        self.server = Some(server);
        self.state = ControllerState::Running;
        Ok(())
    }

    /// Snapshot if enabled, then shut the server down.
    ///
    /// Returns what the snapshot wrote, if one was taken.
    ///
    /// # Errors
    ///
    /// Returns error if the controller is not running, the snapshot cannot be
    /// written, or `fail_on_unmatched_requests` is set and some request matched
    /// no rule at all. Requests answered by the default-deny rule are reported
    /// to the caller as 500 responses and do not fail `stop`.
    pub async fn stop(&mut self) -> Result<Option<SnapshotSummary>> {
        self.expect_state(ControllerState::Running)?;

        let snapshot = if self.is_take_snapshot() {
            Some(self.take_snapshot().await)
        } else {
            None
        };

        if let Some(server) = self.server.take() {
            server.shutdown().await;
        }
        self.state = ControllerState::Stopped;

        let snapshot = snapshot.transpose()?;

        let not_found = self.journal.stub_not_found();
        if !not_found.is_empty() {
            warn!(
                "{} request(s) answered with stubbed data not found: {}",
                not_found.len(),
                not_found.join(", ")
            );
        }

        if self.config.fail_on_unmatched_requests {
            let unmatched = self.journal.unmatched();
            if !unmatched.is_empty() {
                warn!("{} request(s) had no fixture", unmatched.len());
                return Err(FixtureError::UnmatchedRequests(unmatched));
            }
        }

        Ok(snapshot)
    }

    async fn take_snapshot(&self) -> Result<SnapshotSummary> {
        let target = self.config.snapshot_target();
        let events = self.journal.proxied_to(&target);
        info!("Recording {} interaction(s) proxied to {}", events.len(), target);

        let config = Arc::clone(&self.config);
        tokio::task::spawn_blocking(move || -> Result<SnapshotSummary> {
            let summary =
                SnapshotWriter::new(&config.files_root, &config.snapshot).write(&events)?;
            if config.snapshot.reformat_output {
                format_json_files(&config.files_root)?;
            }
            Ok(summary)
        })
        .await
        .map_err(|e| FixtureError::Other(format!("Snapshot task failed: {e}")))?
    }

    /// Register a fixture stub
    ///
    /// # Errors
    ///
    /// Returns error if the mapping's request pattern is invalid
    pub fn stub_for(&self, mapping: StubMapping) -> Result<Arc<StubRule>> {
        self.registry.add(mapping)
    }

    /// Put every scenario back in its starting state
    pub fn reset_scenarios(&self) {
        self.registry.reset_scenarios();
    }

    /// Whether unmatched requests go to the upstream
    #[must_use]
    pub fn is_use_proxy(&self) -> bool {
        self.config.mode.use_proxy()
    }

    /// Whether proxied interactions are persisted on stop
    #[must_use]
    pub fn is_take_snapshot(&self) -> bool {
        self.config.mode.take_snapshot()
    }

    /// Port the server listens on, once started
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.server.as_ref().map(|s| s.local_addr().port())
    }

    /// `http://localhost:<port>/`, once started
    #[must_use]
    pub fn base_url(&self) -> Option<String> {
        self.port().map(|port| format!("http://localhost:{port}/"))
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Stubs in evaluation order
    #[must_use]
    pub fn registry(&self) -> &StubRegistry {
        &self.registry
    }

    /// Served requests
    #[must_use]
    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &FixtureConfig {
        &self.config
    }

    /// Names of the registered transformers, in run order
    #[must_use]
    pub fn transformer_names(&self) -> Vec<String> {
        self.transformers
            .iter()
            .map(|t| t.name().to_string())
            .collect()
    }

    fn expect_state(&self, expected: ControllerState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(FixtureError::InvalidState {
                expected: expected.as_str(),
                actual: self.state.as_str(),
            })
        }
    }
}

impl Drop for FixtureController {
    fn drop(&mut self) {
        if let Some(server) = &self.server {
            server.signal_shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModeFlags;
    use crate::stub::{FALLBACK_PRIORITY, STUB_NOT_FOUND_BODY};
    use tempfile::TempDir;

    fn config(temp_dir: &TempDir, mode: ModeFlags) -> FixtureConfig {
        FixtureConfig {
            files_root: temp_dir.path().to_path_buf(),
            mode,
            ..FixtureConfig::default()
        }
    }

    #[test]
    fn test_new_registers_url_rewrite() {
        let temp_dir = TempDir::new().unwrap();
        let controller = FixtureController::new(config(&temp_dir, ModeFlags::default())).unwrap();

        assert_eq!(controller.state(), ControllerState::Initialized);
        assert_eq!(controller.transformer_names(), vec!["github-api-url-rewrite"]);
        assert!(controller.port().is_none());
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = config(&temp_dir, ModeFlags::default());
        config.upstream_url = "api.github.com".to_string();
        assert!(FixtureController::new(config).is_err());
    }

    #[tokio::test]
    async fn test_start_installs_deny_fallback() {
        let temp_dir = TempDir::new().unwrap();
        let mut controller =
            FixtureController::new(config(&temp_dir, ModeFlags::default())).unwrap();
        controller.start().await.unwrap();

        let ordered = controller.registry().ordered();
        let fallback = ordered.last().unwrap();
        assert!(fallback.is_fallback());
        assert_eq!(fallback.mapping().priority, Some(FALLBACK_PRIORITY));
        assert_eq!(fallback.mapping().response.status, 500);
        assert_eq!(
            fallback.mapping().response.body.as_deref(),
            Some(STUB_NOT_FOUND_BODY)
        );

        controller.stop().await.unwrap();
        assert_eq!(controller.state(), ControllerState::Stopped);
    }

    #[tokio::test]
    async fn test_start_installs_proxy_fallback() {
        let temp_dir = TempDir::new().unwrap();
        let mut controller =
            FixtureController::new(config(&temp_dir, ModeFlags::new(true, false))).unwrap();
        controller.start().await.unwrap();

        let ordered = controller.registry().ordered();
        assert_eq!(ordered.len(), 1);
        assert_eq!(
            ordered[0].mapping().response.proxy_base_url.as_deref(),
            Some("https://api.github.com/")
        );

        controller.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_lifecycle_is_enforced() {
        let temp_dir = TempDir::new().unwrap();
        let mut controller =
            FixtureController::new(config(&temp_dir, ModeFlags::default())).unwrap();

        assert!(matches!(
            controller.stop().await,
            Err(FixtureError::InvalidState { .. })
        ));

        controller.start().await.unwrap();
        assert!(controller.start().await.is_err());
        assert!(controller.base_url().unwrap().starts_with("http://localhost:"));

        controller.stop().await.unwrap();
        assert!(controller.start().await.is_err());
        assert!(controller.port().is_none());
    }

    #[tokio::test]
    async fn test_snapshot_without_traffic_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let mut controller =
            FixtureController::new(config(&temp_dir, ModeFlags::new(false, true))).unwrap();
        assert!(controller.is_use_proxy());

        controller.start().await.unwrap();
        let summary = controller.stop().await.unwrap().unwrap();
        assert_eq!(summary.mappings_written, 0);
    }

    #[test]
    fn test_journal_keeps_bodies_only_when_snapshotting() {
        let temp_dir = TempDir::new().unwrap();

        let replaying = FixtureController::new(config(&temp_dir, ModeFlags::default())).unwrap();
        assert!(!replaying.journal().keeps_bodies());

        let proxying =
            FixtureController::new(config(&temp_dir, ModeFlags::new(true, false))).unwrap();
        assert!(!proxying.journal().keeps_bodies());

        let recording =
            FixtureController::new(config(&temp_dir, ModeFlags::new(false, true))).unwrap();
        assert!(recording.journal().keeps_bodies());
    }

    #[tokio::test]
    async fn test_snapshot_reformats_output() {
        let temp_dir = TempDir::new().unwrap();
        let mapping_path = temp_dir.path().join("mappings/user.json");
        std::fs::create_dir_all(mapping_path.parent().unwrap()).unwrap();
        std::fs::write(
            &mapping_path,
            r#"{"request":{"url":"/user","method":"GET"},"response":{"status":200}}"#,
        )
        .unwrap();

        let mut config = config(&temp_dir, ModeFlags::new(false, true));
        config.snapshot.reformat_output = true;
        let mut controller = FixtureController::new(config).unwrap();
        controller.start().await.unwrap();
        assert_eq!(controller.registry().len(), 2);
        controller.stop().await.unwrap();

        let written = std::fs::read_to_string(&mapping_path).unwrap();
        assert!(written.starts_with("{\n  \"request\": {"));
    }
}

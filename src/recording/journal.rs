//! Request journal

use std::sync::{Mutex, PoisonError};

use bytes::Bytes;

use crate::message::{MockRequest, MockResponse};

/// How a request was answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServeOutcome {
    /// Answered by a fixture stub
    Stubbed {
        /// Label of the stub
        stub: String,
    },
    /// Forwarded to an upstream, which answered
    Proxied {
        /// Base URL the request went to
        target: String,
    },
    /// Forwarding failed; the response was generated locally
    ProxyFailed {
        /// Base URL the request was meant for
        target: String,
    },
    /// Answered by the default-deny rule
    StubNotFound,
    /// No rule matched at all
    Unmatched,
}

/// One served request
#[derive(Debug, Clone)]
pub struct ServeEvent {
    /// Request as received
    pub request: MockRequest,
    /// Response before transformers ran
    pub response: MockResponse,
    /// How it was answered
    pub outcome: ServeOutcome,
}

/// Append-only log of served requests
#[derive(Debug, Default)]
pub struct Journal {
    events: Mutex<Vec<ServeEvent>>,
    drop_bodies: bool,
}

impl Journal {
    /// Create an empty journal keeping full messages
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty journal that discards request and response bodies
    #[must_use]
    pub fn without_bodies() -> Self {
        Self {
            drop_bodies: true,
            ..Self::default()
        }
    }

    /// Whether recorded events keep their bodies
    #[must_use]
    pub fn keeps_bodies(&self) -> bool {
        !self.drop_bodies
    }

    /// Append an event
    pub fn record(&self, mut event: ServeEvent) {
        if self.drop_bodies {
            event.request.body = Bytes::new();
            event.response.body = Bytes::new();
        }
        self.lock().push(event);
    }

    /// Copy of all events in arrival order
    #[must_use]
    pub fn events(&self) -> Vec<ServeEvent> {
        self.lock().clone()
    }

    /// Events proxied to `target`
    #[must_use]
    pub fn proxied_to(&self, target: &str) -> Vec<ServeEvent> {
        self.lock()
            .iter()
            .filter(|e| matches!(&e.outcome, ServeOutcome::Proxied { target: t } if t == target))
            .cloned()
            .collect()
    }

    /// Descriptions of requests answered by the default-deny rule
    #[must_use]
    pub fn stub_not_found(&self) -> Vec<String> {
        self.describe_where(&ServeOutcome::StubNotFound)
    }

    /// Descriptions of requests no rule matched
    #[must_use]
    pub fn unmatched(&self) -> Vec<String> {
        self.describe_where(&ServeOutcome::Unmatched)
    }

    fn describe_where(&self, outcome: &ServeOutcome) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|e| e.outcome == *outcome)
            .map(|e| e.request.describe())
            .collect()
    }

    /// Number of recorded events
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing was recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop all events
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ServeEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(path: &str, outcome: ServeOutcome) -> ServeEvent {
        ServeEvent {
            request: MockRequest {
                method: "GET".to_string(),
                path: path.to_string(),
                query: None,
                headers: vec![],
                body: Bytes::new(),
                local_port: 8080,
            },
            response: MockResponse::text(200, "ok"),
            outcome,
        }
    }

    #[test]
    fn test_filters() {
        let journal = Journal::new();
        journal.record(event(
            "/a",
            ServeOutcome::Stubbed {
                stub: "a".to_string(),
            },
        ));
        journal.record(event(
            "/b",
            ServeOutcome::Proxied {
                target: "https://api.github.com/".to_string(),
            },
        ));
        journal.record(event(
            "/c",
            ServeOutcome::Proxied {
                target: "http://other/".to_string(),
            },
        ));
        journal.record(event(
            "/e",
            ServeOutcome::ProxyFailed {
                target: "https://api.github.com/".to_string(),
            },
        ));
        journal.record(event("/d", ServeOutcome::Unmatched));
        journal.record(event("/f", ServeOutcome::StubNotFound));

        assert_eq!(journal.len(), 6);
        assert_eq!(journal.proxied_to("https://api.github.com/").len(), 1);
        assert_eq!(journal.unmatched(), vec!["GET /d".to_string()]);
        assert_eq!(journal.stub_not_found(), vec!["GET /f".to_string()]);

        journal.clear();
        assert!(journal.is_empty());
    }

    #[test]
    fn test_without_bodies_drops_payloads() {
        let journal = Journal::without_bodies();
        assert!(!journal.keeps_bodies());

        let mut posted = event("/user/repos", ServeOutcome::StubNotFound);
        posted.request.body = Bytes::from_static(b"{\"name\":\"x\"}");
        journal.record(posted);

        let events = journal.events();
        assert!(events[0].request.body.is_empty());
        assert!(events[0].response.body.is_empty());
        assert_eq!(events[0].response.status, 200);

        assert!(Journal::new().keeps_bodies());
    }
}

//! Ordered stub registry

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tracing::debug;

use crate::message::MockRequest;
use crate::Result;

use super::mapping::{StubMapping, SCENARIO_STARTED};
use super::matcher::RequestMatcher;

/// A registered mapping with its compiled matcher
#[derive(Debug)]
pub struct StubRule {
    mapping: StubMapping,
    matcher: RequestMatcher,
    seq: u64,
    fallback: bool,
}

impl StubRule {
    /// The mapping as registered
    #[must_use]
    pub fn mapping(&self) -> &StubMapping {
        &self.mapping
    }

    /// Whether this is the catch-all rule installed on start
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    /// Identifier for logs: id, then name, then sequence number
    #[must_use]
    pub fn label(&self) -> String {
        self.mapping
            .id
            .clone()
            .or_else(|| self.mapping.name.clone())
            .unwrap_or_else(|| format!("#{}", self.seq))
    }

    fn in_required_state(&self, scenarios: &HashMap<String, String>) -> bool {
        match (
            &self.mapping.scenario_name,
            &self.mapping.required_scenario_state,
        ) {
            (Some(name), Some(required)) => {
                scenarios.get(name).map_or(SCENARIO_STARTED, String::as_str) == required
            }
            _ => true,
        }
    }

    fn sort_key(&self) -> (bool, u32, Reverse<u64>) {
        (
            self.fallback,
            self.mapping.effective_priority(),
            Reverse(self.seq),
        )
    }
}

/// Stubs kept in evaluation order.
///
/// Order: regular rules before the fallback, then ascending priority, then the
/// most recently added rule first. Rules bound to a scenario only match
/// while the scenario is in their required state.
#[derive(Debug, Default)]
pub struct StubRegistry {
    rules: RwLock<Vec<Arc<StubRule>>>,
    scenarios: Mutex<HashMap<String, String>>,
    next_seq: AtomicU64,
}

impl StubRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stub
    ///
    /// # Errors
    ///
    /// Returns error if the mapping's request pattern does not compile
    pub fn add(&self, mapping: StubMapping) -> Result<Arc<StubRule>> {
        self.insert(mapping, false)
    }

    /// Register the catch-all rule, replacing any previous one
    ///
    /// # Errors
    ///
    /// Returns error if the mapping's request pattern does not compile
    pub fn set_fallback(&self, mapping: StubMapping) -> Result<Arc<StubRule>> {
        self.write().retain(|rule| !rule.fallback);
        self.insert(mapping, true)
    }

    fn insert(&self, mapping: StubMapping, fallback: bool) -> Result<Arc<StubRule>> {
        let matcher = RequestMatcher::compile(&mapping.request)?;
        let rule = Arc::new(StubRule {
            mapping,
            matcher,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            fallback,
        });

        let mut rules = self.write();
        rules.push(Arc::clone(&rule));
        rules.sort_by_key(|r| r.sort_key());
        drop(rules);

        debug!("Registered stub {}", rule.label());
        Ok(rule)
    }

    /// First rule matching the request, advancing its scenario if it has one
    #[must_use]
    pub fn find(&self, request: &MockRequest) -> Option<Arc<StubRule>> {
        let rules = self.read();
        let mut scenarios = self.scenarios();

        let rule = rules
            .iter()
            .find(|rule| rule.in_required_state(&scenarios) && rule.matcher.matches(request))?;

        if let (Some(name), Some(next)) = (
            &rule.mapping.scenario_name,
            &rule.mapping.new_scenario_state,
        ) {
            debug!("Scenario {} -> {}", name, next);
            scenarios.insert(name.clone(), next.clone());
        }
        Some(Arc::clone(rule))
    }

    /// Current state of a scenario
    #[must_use]
    pub fn scenario_state(&self, name: &str) -> String {
        self.scenarios()
            .get(name)
            .map_or_else(|| SCENARIO_STARTED.to_string(), Clone::clone)
    }

    /// Put every scenario back in its starting state
    pub fn reset_scenarios(&self) {
        self.scenarios().clear();
    }

    /// Rules in evaluation order
    #[must_use]
    pub fn ordered(&self) -> Vec<Arc<StubRule>> {
        self.read().clone()
    }

    /// Number of registered rules
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no rule is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Remove every rule and reset scenarios
    pub fn clear(&self) {
        self.write().clear();
        self.reset_scenarios();
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<StubRule>>> {
        self.rules.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Arc<StubRule>>> {
        self.rules.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn scenarios(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.scenarios.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

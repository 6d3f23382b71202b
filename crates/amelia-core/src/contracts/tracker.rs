//! The `Tracker` contract: "the core sees `Tracker.get_issue(id) -> Issue`"
//! (spec §1). Jira/GitHub/noop fetching logic lives entirely outside this
//! crate.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An issue fetched from a tracker (or synthesized inline, e.g. for a
/// `brainstorm-<session>` pseudo-issue).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub title: String,
    pub description: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("issue {0} not found")]
    NotFound(String),
    #[error("tracker error: {0}")]
    Other(String),
}

/// Adapter interface for an issue tracker.
#[async_trait]
pub trait Tracker: Send + Sync {
    fn name(&self) -> &str;

    async fn get_issue(&self, id: &str) -> Result<Issue, TrackerError>;
}

/// A named collection of available [`Tracker`] implementations, keyed by
/// name, so a profile can bind `tracker = "jira"` without the core knowing
/// concrete tracker types.
#[derive(Default)]
pub struct TrackerRegistry {
    trackers: HashMap<String, std::sync::Arc<dyn Tracker>>,
}

impl TrackerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        tracker: std::sync::Arc<dyn Tracker>,
    ) -> Option<std::sync::Arc<dyn Tracker>> {
        let name = tracker.name().to_string();
        self.trackers.insert(name, tracker)
    }

    pub fn get(&self, name: &str) -> Option<std::sync::Arc<dyn Tracker>> {
        self.trackers.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        self.trackers.keys().map(|s| s.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }
}

impl std::fmt::Debug for TrackerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerRegistry")
            .field("trackers", &self.trackers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopTracker;

    #[async_trait]
    impl Tracker for NoopTracker {
        fn name(&self) -> &str {
            "noop"
        }

        async fn get_issue(&self, id: &str) -> Result<Issue, TrackerError> {
            Ok(Issue {
                id: id.to_string(),
                title: "inline task".into(),
                description: String::new(),
            })
        }
    }

    #[tokio::test]
    async fn register_and_fetch() {
        let mut registry = TrackerRegistry::new();
        registry.register(std::sync::Arc::new(NoopTracker));

        let tracker = registry.get("noop").expect("registered");
        let issue = tracker.get_issue("A-1").await.unwrap();
        assert_eq!(issue.id, "A-1");
    }

    #[test]
    fn missing_tracker_returns_none() {
        let registry = TrackerRegistry::new();
        assert!(registry.get("jira").is_none());
    }
}

//! Long-term insight store
//!
//! Insights are topic-keyed facts distilled from past tasks. They are kept in
//! a JSON object at `<dir>/<agent>_insights.json` and written through on every
//! update. Persistence is best effort: failures are logged and never reach
//! the caller.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Error type for insight persistence (never surfaced outside this module)
#[derive(Debug, thiserror::Error)]
enum InsightError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid insight file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Topic → knowledge mapping with optional write-through persistence
#[derive(Debug, Clone, Default)]
pub struct InsightStore {
    path: Option<PathBuf>,
    insights: BTreeMap<String, String>,
}

impl InsightStore {
    /// Open the store for `agent` under `dir`, loading any saved insights
    ///
    /// A missing or unreadable file yields an empty store.
    pub fn open(dir: impl AsRef<Path>, agent: &str) -> Self {
        let path = dir.as_ref().join(format!("{}_insights.json", agent));
        let mut store = Self {
            path: Some(path),
            insights: BTreeMap::new(),
        };
        store.reload();
        store
    }

    /// A store that is never persisted
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, topic: &str) -> Option<&str> {
        self.insights.get(topic).map(String::as_str)
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.insights
    }

    pub fn len(&self) -> usize {
        self.insights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insights.is_empty()
    }

    /// Upsert an insight and persist the whole mapping
    pub fn record(&mut self, topic: impl Into<String>, knowledge: impl Into<String>) {
        self.insights.insert(topic.into(), knowledge.into());
        if let Err(e) = self.persist() {
            warn!(path = ?self.path, error = %e, "Failed to persist insights");
        }
    }

    /// Replace the in-memory mapping with what is on disk
    pub fn reload(&mut self) {
        let Some(path) = &self.path else {
            return;
        };
        self.insights = match load(path) {
            Ok(Some(insights)) => {
                debug!(path = %path.display(), count = insights.len(), "Loaded insights");
                insights
            }
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable insight file");
                BTreeMap::new()
            }
        };
    }

    /// Render as `- topic: knowledge` lines, or `None` when empty
    pub fn render(&self) -> Option<String> {
        if self.insights.is_empty() {
            return None;
        }
        let lines: Vec<String> = self
            .insights
            .iter()
            .map(|(topic, knowledge)| format!("- {}: {}", topic, knowledge))
            .collect();
        Some(lines.join("\n"))
    }

    fn persist(&self) -> Result<(), InsightError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(&self.insights)?;
        // Write then rename so a crash never leaves a truncated file behind
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn load(path: &Path) -> Result<Option<BTreeMap<String, String>>, InsightError> {
    if !path.exists() {
        return Ok(None);
    }
    let json = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&json)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = InsightStore::open(dir.path(), "CodeAgent");
        assert!(store.is_empty());

        store.record("x", "y");

        let reloaded = InsightStore::open(dir.path(), "CodeAgent");
        let expected: BTreeMap<String, String> =
            [("x".to_string(), "y".to_string())].into_iter().collect();
        assert_eq!(reloaded.as_map(), &expected);
        assert!(dir.path().join("CodeAgent_insights.json").exists());
    }

    #[test]
    fn test_upsert_overwrites_topic() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = InsightStore::open(dir.path(), "agent");
        store.record("pip", "use --user");
        store.record("pip", "use a venv");
        assert_eq!(store.len(), 1);

        let reloaded = InsightStore::open(dir.path(), "agent");
        assert_eq!(reloaded.get("pip"), Some("use a venv"));
    }

    #[test]
    fn test_corrupt_file_yields_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("agent_insights.json"), "{not json").unwrap();
        let store = InsightStore::open(dir.path(), "agent");
        assert!(store.is_empty());
    }

    #[test]
    fn test_persist_failure_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the directory should be makes create_dir_all fail
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, "").unwrap();

        let mut store = InsightStore::open(&blocker, "agent");
        store.record("topic", "knowledge");
        assert_eq!(store.get("topic"), Some("knowledge"));
    }

    #[test]
    fn test_render() {
        let mut store = InsightStore::in_memory();
        assert!(store.render().is_none());
        store.record("b", "second");
        store.record("a", "first");
        assert_eq!(store.render().unwrap(), "- a: first\n- b: second");
    }
}

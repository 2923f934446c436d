//! Per-source crawl cursors persisted as JSON.
//!
//! The file maps source name to `{page, total_collected, total_alternatives}`.
//! Saves go to a temp file in the same directory that is renamed over the
//! target, so a crash mid-write leaves the previous checkpoint intact.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceProgress {
    /// Next page to fetch.
    #[serde(default = "first_page")]
    pub page: u32,
    #[serde(default)]
    pub total_collected: u64,
    #[serde(default)]
    pub total_alternatives: u64,
}

fn first_page() -> u32 {
    1
}

impl Default for SourceProgress {
    fn default() -> Self {
        Self {
            page: first_page(),
            total_collected: 0,
            total_alternatives: 0,
        }
    }
}

pub type ProgressState = BTreeMap<String, SourceProgress>;

pub struct ProgressTracker {
    path: PathBuf,
    sources: Vec<String>,
}

impl ProgressTracker {
    pub fn new(path: impl Into<PathBuf>, sources: Vec<String>) -> Self {
        Self {
            path: path.into(),
            sources,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current cursors. Every configured source is present; cursors stored for
    /// sources no longer configured are kept. A missing or unreadable file
    /// yields defaults.
    pub fn load(&self) -> ProgressState {
        let mut state = match std::fs::read_to_string(&self.path) {
            Ok(content) => match serde_json::from_str::<ProgressState>(&content) {
                Ok(state) => state,
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "Progress file is corrupt, starting from defaults");
                    ProgressState::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No progress file yet");
                ProgressState::new()
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Progress file unreadable, starting from defaults");
                ProgressState::new()
            }
        };

        for source in &self.sources {
            state.entry(source.clone()).or_default();
        }
        state
    }

    /// Atomically replace the progress file with `state`.
    pub fn save(&self, state: &ProgressState) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let json = serde_json::to_string_pretty(state).context("Failed to serialize progress")?;

        let mut tmp = NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        tmp.write_all(json.as_bytes())
            .context("Failed to write progress")?;
        tmp.as_file().sync_all().context("Failed to sync progress")?;
        tmp.persist(&self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources() -> Vec<String> {
        vec!["Extra".into(), "G1".into()]
    }

    #[test]
    fn fresh_tracker_defaults_every_source() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = ProgressTracker::new(dir.path().join("progress.json"), sources());

        let state = tracker.load();
        assert_eq!(state.len(), 2);
        assert_eq!(state["Extra"], SourceProgress::default());
        assert_eq!(state["G1"].page, 1);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = ProgressTracker::new(dir.path().join("progress.json"), sources());

        let mut state = tracker.load();
        state.insert(
            "G1".into(),
            SourceProgress {
                page: 7,
                total_collected: 42,
                total_alternatives: 3,
            },
        );
        tracker.save(&state).unwrap();

        assert_eq!(tracker.load(), state);
        // No temp files left next to the checkpoint.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn partial_cursor_fills_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        std::fs::write(&path, r#"{"G1": {"page": 5, "total_collected": 120}}"#).unwrap();

        let state = ProgressTracker::new(&path, sources()).load();
        assert_eq!(
            state["G1"],
            SourceProgress {
                page: 5,
                total_collected: 120,
                total_alternatives: 0,
            }
        );
        assert_eq!(state["Extra"], SourceProgress::default());
    }

    #[test]
    fn corrupt_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        std::fs::write(&path, "{not json").unwrap();

        let state = ProgressTracker::new(&path, sources()).load();
        assert_eq!(state.len(), 2);
        assert!(state.values().all(|p| *p == SourceProgress::default()));
    }

    #[test]
    fn unconfigured_sources_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        std::fs::write(&path, r#"{"Retired": {"page": 9}}"#).unwrap();

        let tracker = ProgressTracker::new(&path, sources());
        let state = tracker.load();
        assert_eq!(state["Retired"].page, 9);
        assert_eq!(state.len(), 3);

        tracker.save(&state).unwrap();
        assert_eq!(tracker.load()["Retired"].page, 9);
    }

    #[test]
    fn save_overwrites_previous_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = ProgressTracker::new(dir.path().join("progress.json"), sources());

        let mut state = tracker.load();
        tracker.save(&state).unwrap();
        state.get_mut("Extra").unwrap().page = 2;
        tracker.save(&state).unwrap();

        assert_eq!(tracker.load()["Extra"].page, 2);
    }
}

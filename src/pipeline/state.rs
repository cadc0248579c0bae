//! Persisted pipeline progress (`.cardstock/state.json`).
//!
//! Records, per completed stage, the checksum of the inputs that stage
//! consumed, so an interrupted run can resume and skip stages whose
//! inputs have not changed. The format tolerates unknown fields so an
//! older binary can read state written by a newer one.
//!
//! Unreadable state is [`CardstockError::StateCorruption`]: the pipeline
//! refuses to resume rather than guess, and a fresh start must be
//! explicit.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::CardstockError;

// ---------------------------------------------------------------------------
// PipelineState
// ---------------------------------------------------------------------------

/// On-disk record of pipeline progress.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineState {
    /// The upstream pin this state was recorded against. A change of pin
    /// invalidates every recorded stage.
    #[serde(default)]
    pub upstream: String,

    /// Completed stages, keyed by stage name.
    #[serde(default)]
    pub stages: BTreeMap<String, StageRecord>,
}

/// One completed stage.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    /// Checksum of the stage's inputs at completion time.
    pub input_checksum: String,

    /// Unix timestamp (seconds) of completion.
    #[serde(default)]
    pub completed_at: u64,
}

impl PipelineState {
    /// Fresh state pinned to `upstream`.
    #[must_use]
    pub fn new(upstream: impl Into<String>) -> Self {
        Self {
            upstream: upstream.into(),
            stages: BTreeMap::new(),
        }
    }

    /// Load state from `path`. A missing file means no prior run.
    ///
    /// # Errors
    /// Returns [`CardstockError::StateCorruption`] when the file exists
    /// but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Option<Self>, CardstockError> {
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path).map_err(|e| CardstockError::StateCorruption {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| CardstockError::StateCorruption {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })
    }

    /// Write state to `path` atomically (temp file, then rename).
    ///
    /// # Errors
    /// Returns an I/O error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), CardstockError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        let mut text = serde_json::to_string_pretty(self).map_err(|e| {
            CardstockError::StateCorruption {
                path: path.to_path_buf(),
                detail: e.to_string(),
            }
        })?;
        text.push('\n');
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Record a completed stage.
    pub fn record(&mut self, stage: &str, input_checksum: String) {
        let completed_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.stages.insert(
            stage.to_owned(),
            StageRecord {
                input_checksum,
                completed_at,
            },
        );
    }

    /// The record for `stage`, if it ever completed.
    #[must_use]
    pub fn stage(&self, stage: &str) -> Option<&StageRecord> {
        self.stages.get(stage)
    }

    /// True when `stage` completed with exactly this input checksum.
    #[must_use]
    pub fn is_current(&self, stage: &str, input_checksum: &str) -> bool {
        self.stages
            .get(stage)
            .is_some_and(|r| r.input_checksum == input_checksum)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = PipelineState::load(&dir.path().join("state.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut state = PipelineState::new("paper/1.20.1");
        state.record("fetch-base", "abc123".to_owned());
        state.save(&path).unwrap();

        let loaded = PipelineState::load(&path).unwrap().unwrap();
        assert_eq!(loaded.upstream, "paper/1.20.1");
        assert!(loaded.is_current("fetch-base", "abc123"));
        assert!(!loaded.is_current("fetch-base", "other"));
        assert!(!loaded.is_current("remap", "abc123"));
    }

    #[test]
    fn save_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("work/.cardstock/state.json");
        PipelineState::new("x").save(&path).unwrap();
        assert!(path.is_file());
    }

    #[test]
    fn corrupt_state_refuses_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ truncated").unwrap();
        let err = PipelineState::load(&path).unwrap_err();
        assert!(matches!(err, CardstockError::StateCorruption { .. }));
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(
            &path,
            r#"{"upstream":"paper/main","stages":{},"future_field":true}"#,
        )
        .unwrap();
        let loaded = PipelineState::load(&path).unwrap().unwrap();
        assert_eq!(loaded.upstream, "paper/main");
    }

    #[test]
    fn record_overwrites_prior_run() {
        let mut state = PipelineState::new("p");
        state.record("remap", "old".to_owned());
        state.record("remap", "new".to_owned());
        assert!(state.is_current("remap", "new"));
        assert_eq!(state.stages.len(), 1);
    }
}

//! Conflict records surfaced by the materializer and rebase coordinator.

use std::fmt;
use std::path::PathBuf;

use super::patch::{Hunk, PatchId};

/// A hunk that could not be applied cleanly.
///
/// Created during materialization or rebase; resolved by regenerating the
/// offending patch from a manually fixed working tree, then discarded.
/// Conflicts always surface to the caller — nothing is silently skipped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Conflict {
    /// The patch whose hunk failed.
    pub patch: PatchId,
    /// File the hunk targets.
    pub path: PathBuf,
    /// The unresolved hunk, with its surrounding context lines.
    pub hunk: Hunk,
    /// What went wrong (e.g. "context not found within drift window").
    pub detail: String,
}

impl Conflict {
    /// Build a conflict record.
    #[must_use]
    pub fn new(patch: PatchId, path: PathBuf, hunk: Hunk, detail: impl Into<String>) -> Self {
        Self {
            patch,
            path,
            hunk,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} {}: {}",
            self.patch,
            self.path.display(),
            self.hunk.header(),
            self.detail
        )
    }
}

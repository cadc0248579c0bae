//! Patch stacks — ordered patch sequences per domain.
//!
//! A [`PatchStack`] is append/pop only. There is deliberately no reorder
//! operation: stack order is the stack's identity, and applying it to a
//! base must stay reproducible. History is rewritten only by regenerating
//! the trailing patch (see `extract::amend_trailing`) or by a full rebase.
//!
//! On disk a stack is a directory of `NNNN-<id>.patch` files under
//! `patches/<domain>/`, mirroring the fork layout this engine builds
//! (`patches/api`, `patches/server`).

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use sha2::{Digest, Sha256};

use crate::error::CardstockError;
use crate::model::patch::{Patch, parse_patch_file_name, patch_file_name};

// ---------------------------------------------------------------------------
// Domain
// ---------------------------------------------------------------------------

/// The logical domain a patch stack belongs to.
///
/// The fork carries two: the `api` patches (public API additions) and the
/// `server` patches (implementation changes).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Domain {
    /// API surface patches (`patches/api` → `cardstock-api`).
    Api,
    /// Server implementation patches (`patches/server` → `cardstock-server`).
    Server,
}

impl Domain {
    /// Both domains in canonical application order (API before server).
    pub const ALL: [Self; 2] = [Self::Api, Self::Server];

    /// Kebab-case name, as used in paths and the CLI.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Server => "server",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a domain name is not recognized.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DomainError {
    /// The unrecognized value.
    pub value: String,
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown domain {:?}: expected 'api' or 'server'",
            self.value
        )
    }
}

impl std::error::Error for DomainError {}

impl FromStr for Domain {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "api" => Ok(Self::Api),
            "server" => Ok(Self::Server),
            other => Err(DomainError {
                value: other.to_owned(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// PatchStack
// ---------------------------------------------------------------------------

/// An ordered sequence of patches over one domain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatchStack {
    domain: Domain,
    patches: Vec<Patch>,
}

impl PatchStack {
    /// An empty stack for `domain`.
    #[must_use]
    pub const fn new(domain: Domain) -> Self {
        Self {
            domain,
            patches: Vec::new(),
        }
    }

    /// The stack's domain.
    #[must_use]
    pub const fn domain(&self) -> Domain {
        self.domain
    }

    /// Append a patch at the top of the stack.
    pub fn append(&mut self, patch: Patch) {
        self.patches.push(patch);
    }

    /// Pop the trailing patch, if any.
    pub fn remove_last(&mut self) -> Option<Patch> {
        self.patches.pop()
    }

    /// Iterate patches bottom-up.
    pub fn iter(&self) -> std::slice::Iter<'_, Patch> {
        self.patches.iter()
    }

    /// Patch at stack position `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Patch> {
        self.patches.get(index)
    }

    /// Mutable patch access — used by the materializer to record status.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Patch> {
        self.patches.get_mut(index)
    }

    /// Number of patches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.patches.len()
    }

    /// `true` if the stack holds no patches.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    /// SHA-256 over the serialized patch sequence, lowercase hex.
    ///
    /// Order-sensitive by construction: the same patches in a different
    /// order are a different stack.
    #[must_use]
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        for patch in &self.patches {
            let text = patch.serialize();
            hasher.update(text.len().to_le_bytes());
            hasher.update(text.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    /// Load a stack from its `patches/<domain>` directory.
    ///
    /// Files are ordered by their `NNNN` prefix. A missing directory is an
    /// empty stack (a fresh fork has no patches yet). Stray files that do
    /// not match the naming scheme are ignored.
    ///
    /// # Errors
    /// [`CardstockError::MalformedPatch`] if a patch file fails to parse,
    /// carries an id that disagrees with its file name, or two files claim
    /// the same position.
    pub fn load(domain: Domain, dir: &Path) -> Result<Self, CardstockError> {
        let mut stack = Self::new(domain);
        if !dir.exists() {
            return Ok(stack);
        }

        let mut entries: Vec<(usize, std::path::PathBuf)> = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if let Some((index, _)) = parse_patch_file_name(&path) {
                entries.push((index, path));
            }
        }
        entries.sort();

        let mut last_index = None;
        for (index, path) in entries {
            if last_index == Some(index) {
                return Err(CardstockError::MalformedPatch {
                    path: path.clone(),
                    line: 0,
                    reason: format!("duplicate stack position {:04}", index + 1),
                });
            }
            last_index = Some(index);

            let text = fs::read_to_string(&path)?;
            let patch = Patch::parse(&text).map_err(|e| CardstockError::MalformedPatch {
                path: path.clone(),
                line: e.line,
                reason: e.reason,
            })?;
            let expected = parse_patch_file_name(&path).map(|(_, id)| id);
            if expected.as_ref() != Some(&patch.id) {
                return Err(CardstockError::MalformedPatch {
                    path,
                    line: 1,
                    reason: format!(
                        "patch id '{}' does not match its file name",
                        patch.id
                    ),
                });
            }
            stack.append(patch);
        }
        Ok(stack)
    }

    /// Persist the stack to `dir`, replacing its previous contents.
    ///
    /// The new content is written to a `<dir>.new` staging directory and
    /// swapped in with a rename, so a crash mid-save never leaves a
    /// half-written stack where the old one was.
    ///
    /// # Errors
    /// Propagates I/O failures.
    pub fn save(&self, dir: &Path) -> Result<(), CardstockError> {
        let staging = dir.with_extension("new");
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;
        for (index, patch) in self.patches.iter().enumerate() {
            let name = patch_file_name(index, &patch.id);
            fs::write(staging.join(name), patch.serialize())?;
        }
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        fs::rename(&staging, dir)?;
        Ok(())
    }
}

impl<'a> IntoIterator for &'a PatchStack {
    type Item = &'a Patch;
    type IntoIter = std::slice::Iter<'a, Patch>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

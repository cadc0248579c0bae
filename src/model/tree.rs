//! Tree model — immutable base snapshots and derived working trees.
//!
//! A [`BaseTree`] is a read-only snapshot of upstream sources at a pinned
//! version; it is produced by the fetch/remap stages and never mutated.
//! A [`WorkingTree`] is the materialized result of applying patches on top
//! of a base. Patching never mutates files in place: every apply derives a
//! fresh working tree, which makes retries deterministic and abort cheap.
//!
//! Trees are line-oriented. File content is normalized to end with a final
//! newline when written back to disk.
//!
//! Both tree types use a `BTreeMap` keyed by relative path so iteration,
//! checksums and serialization are deterministic.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Checksums
// ---------------------------------------------------------------------------

/// SHA-256 over `(path, length, content)` triples in path order, rendered
/// as lowercase hex. Equal trees always hash equal; the length field keeps
/// `("ab", "c")` distinct from `("a", "bc")`.
fn checksum_files(files: &BTreeMap<PathBuf, String>) -> String {
    let mut hasher = Sha256::new();
    for (path, content) in files {
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update([0]);
        hasher.update(content.len().to_le_bytes());
        hasher.update(content.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Recursively collect relative-path → content under `root`.
///
/// Dot-prefixed entries (`.git`, lock files) are skipped.
fn collect_files(
    root: &Path,
    dir: &Path,
    out: &mut BTreeMap<PathBuf, String>,
) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_files(root, &path, out)?;
        } else {
            let rel = path
                .strip_prefix(root)
                .map_err(|e| io::Error::other(e.to_string()))?
                .to_path_buf();
            let content = fs::read_to_string(&path)?;
            out.insert(rel, content);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// BaseTree
// ---------------------------------------------------------------------------

/// An immutable snapshot of source files at a specific upstream version.
///
/// Created by the fetch/remap stages; read-only afterward. There is no
/// mutating API on purpose.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BaseTree {
    version: String,
    files: BTreeMap<PathBuf, String>,
}

impl BaseTree {
    /// Wrap an in-memory file map as a base snapshot.
    #[must_use]
    pub fn new(version: impl Into<String>, files: BTreeMap<PathBuf, String>) -> Self {
        Self {
            version: version.into(),
            files,
        }
    }

    /// Load a snapshot from a directory on disk.
    ///
    /// # Errors
    /// Propagates I/O failures; non-UTF-8 files are rejected (the engine is
    /// a source patcher, not a binary differ).
    pub fn load(version: impl Into<String>, root: &Path) -> io::Result<Self> {
        let mut files = BTreeMap::new();
        collect_files(root, root, &mut files)?;
        Ok(Self::new(version, files))
    }

    /// The upstream version tag or commit this snapshot was taken at.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// All files, keyed by relative path.
    #[must_use]
    pub const fn files(&self) -> &BTreeMap<PathBuf, String> {
        &self.files
    }

    /// Content of a single file, if present.
    #[must_use]
    pub fn file(&self, path: &Path) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    /// Deterministic content hash of the snapshot.
    #[must_use]
    pub fn checksum(&self) -> String {
        checksum_files(&self.files)
    }

    /// Derive a mutable working tree seeded with this snapshot's files.
    #[must_use]
    pub fn to_working(&self) -> WorkingTree {
        WorkingTree {
            files: self.files.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkingTree
// ---------------------------------------------------------------------------

/// The materialized file set produced by applying patches to a base.
///
/// Owned by the materializer during application; handed to the caller once
/// stable.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkingTree {
    files: BTreeMap<PathBuf, String>,
}

impl WorkingTree {
    /// An empty tree.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            files: BTreeMap::new(),
        }
    }

    /// Wrap an in-memory file map.
    #[must_use]
    pub const fn from_files(files: BTreeMap<PathBuf, String>) -> Self {
        Self { files }
    }

    /// Load a working tree from a directory on disk.
    ///
    /// # Errors
    /// Propagates I/O failures.
    pub fn load(root: &Path) -> io::Result<Self> {
        let mut files = BTreeMap::new();
        collect_files(root, root, &mut files)?;
        Ok(Self { files })
    }

    /// All files, keyed by relative path.
    #[must_use]
    pub const fn files(&self) -> &BTreeMap<PathBuf, String> {
        &self.files
    }

    /// Content of a single file, if present.
    #[must_use]
    pub fn file(&self, path: &Path) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    /// Insert or replace a file.
    pub fn set_file(&mut self, path: PathBuf, content: String) {
        self.files.insert(path, content);
    }

    /// Remove a file, returning its previous content.
    pub fn remove_file(&mut self, path: &Path) -> Option<String> {
        self.files.remove(path)
    }

    /// `true` if the tree holds no files.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Number of files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Deterministic content hash of the tree.
    #[must_use]
    pub fn checksum(&self) -> String {
        checksum_files(&self.files)
    }

    /// Write the tree to `root`, replacing whatever was there.
    ///
    /// The target directory is removed and recreated so the result is
    /// exactly this tree — stale files from earlier runs cannot survive.
    ///
    /// # Errors
    /// Propagates I/O failures.
    pub fn write_to(&self, root: &Path) -> io::Result<()> {
        if root.exists() {
            fs::remove_dir_all(root)?;
        }
        fs::create_dir_all(root)?;
        for (path, content) in &self.files {
            let full = root.join(path);
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent)?;
            }
            if content.is_empty() || content.ends_with('\n') {
                fs::write(&full, content)?;
            } else {
                fs::write(&full, format!("{content}\n"))?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TreeLock
// ---------------------------------------------------------------------------

/// Scoped single-writer guard for an on-disk tree directory.
///
/// Acquiring creates `<dir>.lock` next to the directory (not inside it, so
/// a full rewrite of the directory cannot clobber the lock). The lock is
/// released on drop, on every exit path including abort and panic unwind.
#[derive(Debug)]
pub struct TreeLock {
    lock_path: PathBuf,
}

impl TreeLock {
    /// Acquire the lock for `dir`.
    ///
    /// # Errors
    /// Returns `ErrorKind::AlreadyExists` if another holder has the lock,
    /// or any other I/O error from creating the lock file.
    pub fn acquire(dir: &Path) -> io::Result<Self> {
        let mut name = dir
            .file_name()
            .map_or_else(|| "tree".into(), |n| n.to_string_lossy().into_owned());
        name.push_str(".lock");
        let lock_path = dir.with_file_name(name);
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)?;
        Ok(Self { lock_path })
    }

    /// Path of the lock file (mainly for diagnostics).
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for TreeLock {
    fn drop(&mut self) {
        // Releasing a lock that something already removed is not an error.
        let _ = fs::remove_file(&self.lock_path);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::cell::Cell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use cardstock::config::CardstockConfig;
use cardstock::error::CardstockError;
use cardstock::extract::diff_trees;
use cardstock::model::patch::{Patch, PatchId};
use cardstock::model::tree::{BaseTree, WorkingTree};
use cardstock::tools::{Compiler, Decompiler, Remapper};

/// Build a file map from (path, content) pairs.
pub fn files(entries: &[(&str, &str)]) -> BTreeMap<PathBuf, String> {
    entries
        .iter()
        .map(|(p, c)| (PathBuf::from(p), (*c).to_owned()))
        .collect()
}

/// Base tree from (path, content) pairs.
pub fn base(version: &str, entries: &[(&str, &str)]) -> BaseTree {
    BaseTree::new(version, files(entries))
}

/// Working tree from (path, content) pairs.
pub fn working(entries: &[(&str, &str)]) -> WorkingTree {
    WorkingTree::from_files(files(entries))
}

/// A patch that transforms `old` into `new`. Panics if the trees are
/// identical; fixtures should always change something.
pub fn patch_between(
    id: &str,
    message: &str,
    old: &BTreeMap<PathBuf, String>,
    new: &BTreeMap<PathBuf, String>,
) -> Patch {
    diff_trees(old, new, PatchId::new(id).unwrap(), message)
        .expect("fixture trees must differ")
}

/// Config rooted in `root`, with every path under the temp directory.
pub fn config_at(root: &Path, upstream_ref: &str) -> CardstockConfig {
    let mut config = CardstockConfig::default();
    config.upstream.upstream_ref = upstream_ref.to_owned();
    config.upstream.artifact = root.join("server.jar");
    config.upstream.mappings = root.join("mappings.tiny");
    config.paths.patches_dir = root.join("patches");
    config.paths.work_dir = root.join(".cardstock");
    config.paths.api_output = root.join("cardstock-api");
    config.paths.server_output = root.join("cardstock-server");
    config
}

// ---------------------------------------------------------------------------
// Fake external tools
// ---------------------------------------------------------------------------

/// Decompiler fake: writes a fixed tree, counts invocations.
pub struct FakeDecompiler {
    pub output: BTreeMap<PathBuf, String>,
    pub calls: Cell<usize>,
}

impl FakeDecompiler {
    pub fn new(entries: &[(&str, &str)]) -> Self {
        Self {
            output: files(entries),
            calls: Cell::new(0),
        }
    }
}

impl Decompiler for FakeDecompiler {
    fn decompile(&self, _artifact: &Path, out_dir: &Path) -> Result<(), CardstockError> {
        self.calls.set(self.calls.get() + 1);
        WorkingTree::from_files(self.output.clone()).write_to(out_dir)?;
        Ok(())
    }
}

/// Remapper fake: rewrites `obf` to `mapped` in every file, counts
/// invocations.
pub struct FakeRemapper {
    pub calls: Cell<usize>,
}

impl FakeRemapper {
    pub fn new() -> Self {
        Self {
            calls: Cell::new(0),
        }
    }
}

impl Remapper for FakeRemapper {
    fn remap(&self, input: &Path, _mappings: &Path, out_dir: &Path) -> Result<(), CardstockError> {
        self.calls.set(self.calls.get() + 1);
        let tree = WorkingTree::load(input)?;
        let mapped: BTreeMap<PathBuf, String> = tree
            .files()
            .iter()
            .map(|(p, c)| (p.clone(), c.replace("obf", "mapped")))
            .collect();
        WorkingTree::from_files(mapped).write_to(out_dir)?;
        Ok(())
    }
}

/// Compiler fake that always rejects the tree.
pub struct FailingCompiler;

impl Compiler for FailingCompiler {
    fn compile(&self, tree: &Path) -> Result<(), CardstockError> {
        Err(CardstockError::ExternalToolFailure {
            tool: "compiler".to_owned(),
            command: format!("fake-javac {}", tree.display()),
            exit_code: Some(1),
            stderr: "cannot find symbol".to_owned(),
        })
    }
}

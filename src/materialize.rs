//! Tree materializer — applies a patch stack onto a base snapshot.
//!
//! Application is strictly in stack order: hunks of patch `i+1` are allowed
//! to depend on patch `i`'s output. Each patch is applied to a scratch copy
//! of the tree and committed only if every hunk lands, so a conflicted
//! patch never leaves a file half-patched.
//!
//! Hunk matching uses bounded fuzzy context matching: context lines compare
//! equal under whitespace normalization (upstream reformatting does not
//! count as drift), removed lines must match exactly (that is content
//! drift, which is a conflict). A hunk may slide up to [`MAX_DRIFT`] lines
//! from its recorded position; the nearest match wins.
//!
//! By default materialization halts at the first conflicted patch, because
//! later patches usually depend on its output. Continuing past conflicts
//! is an explicit opt-in.

use std::path::Path;

use tracing::{debug, warn};

use crate::error::CardstockError;
use crate::model::conflict::Conflict;
use crate::model::patch::{FileOp, FilePatch, Hunk, HunkLine, Patch, PatchStatus};
use crate::model::stack::PatchStack;
use crate::model::tree::{BaseTree, TreeLock, WorkingTree};

/// Maximum distance (in lines) a hunk may drift from its recorded position.
pub const MAX_DRIFT: usize = 64;

// ---------------------------------------------------------------------------
// Policy and outcome
// ---------------------------------------------------------------------------

/// What to do when a patch conflicts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ApplyPolicy {
    /// Stop at the first conflicted patch; later patches stay `unapplied`.
    #[default]
    Halt,
    /// Keep applying subsequent patches against the last good tree.
    Continue,
}

/// Result of materializing a stack.
#[derive(Clone, Debug)]
pub struct ApplyOutcome {
    /// The materialized tree: output of every cleanly applied patch.
    pub tree: WorkingTree,
    /// Conflicts, in application order. Empty means a clean run.
    pub conflicts: Vec<Conflict>,
    /// Number of patches that applied cleanly.
    pub applied: usize,
}

impl ApplyOutcome {
    /// `true` if every attempted patch applied cleanly.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Apply `stack` (or its first `up_to` patches) onto `base`.
///
/// Patch statuses are updated in place: `clean` for applied patches,
/// `conflicted` for failures, `unapplied` for patches never attempted.
/// Two runs over the same inputs yield byte-identical trees.
#[must_use]
pub fn apply(
    base: &BaseTree,
    stack: &mut PatchStack,
    up_to: Option<usize>,
    policy: ApplyPolicy,
) -> ApplyOutcome {
    let limit = up_to.map_or(stack.len(), |n| n.min(stack.len()));

    for i in 0..stack.len() {
        if let Some(p) = stack.get_mut(i) {
            p.status = PatchStatus::Unapplied;
        }
    }

    let mut tree = base.to_working();
    let mut conflicts = Vec::new();
    let mut applied = 0;

    for i in 0..limit {
        // Clone so the scratch application cannot alias the stack borrow.
        let Some(patch) = stack.get(i).cloned() else {
            break;
        };
        match apply_patch(&tree, &patch) {
            Ok(next) => {
                debug!(patch = %patch.id, "applied cleanly");
                tree = next;
                applied += 1;
                if let Some(p) = stack.get_mut(i) {
                    p.status = PatchStatus::Clean;
                }
            }
            Err(mut patch_conflicts) => {
                warn!(
                    patch = %patch.id,
                    conflicts = patch_conflicts.len(),
                    "patch did not apply"
                );
                if let Some(p) = stack.get_mut(i) {
                    p.status = PatchStatus::Conflicted;
                }
                conflicts.append(&mut patch_conflicts);
                if policy == ApplyPolicy::Halt {
                    break;
                }
            }
        }
    }

    ApplyOutcome {
        tree,
        conflicts,
        applied,
    }
}

/// Apply a stack and write the result under `out_dir`.
///
/// Takes the tree lock for the duration of the write (single-writer
/// discipline; released on all exit paths). The tree is written even when
/// conflicts occurred — a partial tree is the raw material for manual
/// resolution.
///
/// # Errors
/// I/O failures, including a held lock (`ErrorKind::AlreadyExists`).
pub fn materialize_to_dir(
    base: &BaseTree,
    stack: &mut PatchStack,
    out_dir: &Path,
    policy: ApplyPolicy,
) -> Result<ApplyOutcome, CardstockError> {
    let lock = TreeLock::acquire(out_dir)?;
    let outcome = apply(base, stack, None, policy);
    outcome.tree.write_to(out_dir)?;
    drop(lock);
    Ok(outcome)
}

// ---------------------------------------------------------------------------
// Single-patch application
// ---------------------------------------------------------------------------

/// Apply one patch to a scratch copy of `tree`.
///
/// Returns the new tree, or every conflict the patch produced. The input
/// tree is never modified. Also used by the rebase coordinator, which
/// steps patch by patch instead of running a whole stack.
pub fn apply_patch(tree: &WorkingTree, patch: &Patch) -> Result<WorkingTree, Vec<Conflict>> {
    let mut scratch = tree.clone();
    let mut conflicts = Vec::new();

    for file in &patch.files {
        if let Err(c) = apply_file_patch(&mut scratch, patch, file) {
            conflicts.push(c);
        }
    }

    if conflicts.is_empty() {
        Ok(scratch)
    } else {
        Err(conflicts)
    }
}

fn apply_file_patch(
    tree: &mut WorkingTree,
    patch: &Patch,
    file: &FilePatch,
) -> Result<(), Conflict> {
    let conflict = |hunk: &Hunk, detail: &str| {
        Conflict::new(patch.id.clone(), file.path.clone(), hunk.clone(), detail)
    };

    match file.op {
        FileOp::Create => {
            if tree.file(&file.path).is_some() {
                return Err(conflict(&file.hunks[0], "file already exists"));
            }
            let mut lines = Vec::new();
            for hunk in &file.hunks {
                for line in &hunk.lines {
                    match line {
                        HunkLine::Add(s) => lines.push(s.clone()),
                        _ => {
                            return Err(conflict(
                                hunk,
                                "created file carries old-image lines",
                            ));
                        }
                    }
                }
            }
            tree.set_file(file.path.clone(), join_lines(&lines));
            Ok(())
        }
        FileOp::Delete => {
            let Some(content) = tree.file(&file.path) else {
                return Err(conflict(&file.hunks[0], "file already deleted"));
            };
            // Every hunk must still match before the file goes away.
            let lines = split_lines(content);
            let mut offset = 0_isize;
            for hunk in &file.hunks {
                if find_hunk_position(&lines, hunk, offset).is_none() {
                    return Err(conflict(hunk, "content differs from deleted image"));
                }
                offset += hunk.new_count as isize - hunk.old_count as isize;
            }
            tree.remove_file(&file.path);
            Ok(())
        }
        FileOp::Modify => {
            let Some(content) = tree.file(&file.path) else {
                return Err(conflict(&file.hunks[0], "file does not exist"));
            };
            let mut lines = split_lines(content);
            let mut offset = 0_isize;
            for hunk in &file.hunks {
                let Some(pos) = find_hunk_position(&lines, hunk, offset) else {
                    return Err(conflict(hunk, "context not found within drift window"));
                };
                splice_hunk(&mut lines, hunk, pos);
                offset += hunk.new_count as isize - hunk.old_count as isize;
            }
            tree.set_file(file.path.clone(), join_lines(&lines));
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Hunk matching
// ---------------------------------------------------------------------------

/// Collapse whitespace runs and trim. Context lines that differ only in
/// whitespace are still a match; anything else is content drift.
fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn line_matches(file_line: &str, hunk_line: &HunkLine) -> bool {
    match hunk_line {
        HunkLine::Context(s) => normalize_ws(file_line) == normalize_ws(s),
        HunkLine::Remove(s) => file_line == s,
        HunkLine::Add(_) => true,
    }
}

fn matches_at(lines: &[String], pos: usize, old_image: &[&HunkLine]) -> bool {
    if pos + old_image.len() > lines.len() {
        return false;
    }
    old_image
        .iter()
        .zip(&lines[pos..])
        .all(|(hl, fl)| line_matches(fl, hl))
}

/// Find where `hunk` applies in `lines`, given the cumulative line-count
/// `offset` from earlier hunks. Searches outward from the expected
/// position, nearest candidate first, within [`MAX_DRIFT`].
///
/// For a pure insertion (`old_count == 0`) the returned position is the
/// insertion index; it must simply be in bounds.
fn find_hunk_position(lines: &[String], hunk: &Hunk, offset: isize) -> Option<usize> {
    if hunk.old_count == 0 {
        // Unified-diff convention: insert after old_start.
        let at = isize::try_from(hunk.old_start).ok()? + offset;
        let at = usize::try_from(at).ok()?;
        return (at <= lines.len()).then_some(at);
    }

    let old_image = hunk.old_image();
    let expected = isize::try_from(hunk.old_start).ok()? - 1 + offset;

    for drift in 0..=isize::try_from(MAX_DRIFT).ok()? {
        for candidate in [expected - drift, expected + drift] {
            let Ok(pos) = usize::try_from(candidate) else {
                continue;
            };
            if matches_at(lines, pos, &old_image) {
                return Some(pos);
            }
            if drift == 0 {
                break;
            }
        }
    }
    None
}

/// Replace the old image at `pos` with the hunk's new image. Context lines
/// keep the file's actual text, so whitespace-only drift in context is
/// preserved rather than overwritten.
fn splice_hunk(lines: &mut Vec<String>, hunk: &Hunk, pos: usize) {
    let mut replacement = Vec::with_capacity(hunk.new_count);
    let mut cursor = pos;
    for line in &hunk.lines {
        match line {
            HunkLine::Context(_) => {
                replacement.push(lines[cursor].clone());
                cursor += 1;
            }
            HunkLine::Remove(_) => cursor += 1,
            HunkLine::Add(s) => replacement.push(s.clone()),
        }
    }
    lines.splice(pos..cursor, replacement);
}

fn split_lines(content: &str) -> Vec<String> {
    content.lines().map(ToOwned::to_owned).collect()
}

fn join_lines(lines: &[String]) -> String {
    if lines.is_empty() {
        String::new()
    } else {
        let mut s = lines.join("\n");
        s.push('\n');
        s
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Diff extractor — computes patches from tree pairs.
//!
//! [`extract`] diffs a base snapshot against a working tree and captures
//! the delta as a single named patch; [`amend_trailing`] regenerates only
//! the last patch of an existing stack, which is how an engineer amends
//! one historical patch without touching earlier ones.
//!
//! The line diff is longest-common-subsequence based, with common
//! prefix/suffix trimming before the LCS table is built. Output is
//! deterministic down to the byte: files in lexicographic path order,
//! hunks in ascending line order, [`CONTEXT`] lines of context with
//! nearby hunks merged. Re-running extraction on an unchanged pair yields
//! byte-identical patch text.
//!
//! Per-file diffing is embarrassingly parallel; work fans out across up to
//! [`MAX_WORKERS`] threads and results land in a pre-indexed slot per
//! file, so parallelism never affects ordering or content.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::thread;

use tracing::debug;

use crate::error::CardstockError;
use crate::materialize::{self, ApplyPolicy};
use crate::model::patch::{FileOp, FilePatch, Hunk, HunkLine, Patch, PatchId, PatchStatus};
use crate::model::stack::PatchStack;
use crate::model::tree::{BaseTree, WorkingTree};

/// Context lines kept around each hunk.
pub const CONTEXT: usize = 3;

/// Upper bound on diff worker threads.
pub const MAX_WORKERS: usize = 8;

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Extract the delta between `base` and `working` as a single-patch stack.
///
/// An empty delta produces an empty stack — no patch records "nothing".
#[must_use]
pub fn extract(
    base: &BaseTree,
    working: &WorkingTree,
    domain: crate::model::stack::Domain,
    id: PatchId,
    message: &str,
) -> PatchStack {
    let mut stack = PatchStack::new(domain);
    if let Some(patch) = diff_trees(base.files(), working.files(), id, message) {
        stack.append(patch);
    }
    stack
}

/// Regenerate the trailing patch of `stack` from an updated working tree.
///
/// The working tree produced by applying all *prior* patches is the diff
/// base, so every earlier patch stays byte-identical; only the trailing
/// patch's text changes. The regenerated patch keeps its id and message.
///
/// # Errors
/// - `EmptyStack` if there is no trailing patch to amend.
/// - `ApplyConflict` if the prior patches no longer apply to `base` —
///   the stack is broken earlier than its tail, and amending the tail
///   would hide that.
pub fn amend_trailing(
    base: &BaseTree,
    stack: &PatchStack,
    working: &WorkingTree,
) -> Result<PatchStack, CardstockError> {
    let Some(trailing) = stack.get(stack.len().wrapping_sub(1)) else {
        return Err(CardstockError::EmptyStack {
            domain: stack.domain(),
        });
    };
    let (id, message) = (trailing.id.clone(), trailing.message.clone());

    let mut prior = stack.clone();
    let outcome = materialize::apply(base, &mut prior, Some(stack.len() - 1), ApplyPolicy::Halt);
    if !outcome.is_clean() {
        return Err(CardstockError::ApplyConflict {
            conflicts: outcome.conflicts,
        });
    }

    let mut amended = stack.clone();
    amended.remove_last();
    if let Some(patch) = diff_trees(outcome.tree.files(), working.files(), id, &message) {
        amended.append(patch);
    }
    debug!(stack = %amended.domain(), "amended trailing patch");
    Ok(amended)
}

/// Diff two file maps into a patch. `None` when nothing changed.
#[must_use]
pub fn diff_trees(
    old: &BTreeMap<PathBuf, String>,
    new: &BTreeMap<PathBuf, String>,
    id: PatchId,
    message: &str,
) -> Option<Patch> {
    // Union of paths, already sorted: both maps are BTreeMaps.
    let mut paths: Vec<&PathBuf> = old.keys().collect();
    for p in new.keys() {
        if !old.contains_key(p) {
            paths.push(p);
        }
    }
    paths.sort();

    let jobs: Vec<(&PathBuf, Option<&String>, Option<&String>)> = paths
        .into_iter()
        .map(|p| (p, old.get(p), new.get(p)))
        .collect();

    let mut slots: Vec<Option<FilePatch>> = vec![None; jobs.len()];
    let workers = thread::available_parallelism()
        .map_or(1, std::num::NonZeroUsize::get)
        .min(MAX_WORKERS)
        .min(jobs.len().max(1));
    let chunk = jobs.len().div_ceil(workers).max(1);

    thread::scope(|scope| {
        for (job_chunk, slot_chunk) in jobs.chunks(chunk).zip(slots.chunks_mut(chunk)) {
            scope.spawn(move || {
                for ((path, old_c, new_c), slot) in job_chunk.iter().zip(slot_chunk) {
                    *slot = diff_file(path, *old_c, *new_c);
                }
            });
        }
    });

    let files: Vec<FilePatch> = slots.into_iter().flatten().collect();
    if files.is_empty() {
        return None;
    }
    Some(Patch {
        id,
        message: message.to_owned(),
        files,
        status: PatchStatus::Unapplied,
    })
}

// ---------------------------------------------------------------------------
// Per-file diff
// ---------------------------------------------------------------------------

fn split_lines(content: &str) -> Vec<String> {
    content.lines().map(ToOwned::to_owned).collect()
}

fn diff_file(path: &PathBuf, old: Option<&String>, new: Option<&String>) -> Option<FilePatch> {
    match (old, new) {
        (None, None) => None,
        (None, Some(content)) => {
            let adds: Vec<HunkLine> = split_lines(content)
                .into_iter()
                .map(HunkLine::Add)
                .collect();
            let new_start = usize::from(!adds.is_empty());
            Some(FilePatch {
                path: path.clone(),
                op: FileOp::Create,
                hunks: vec![Hunk::from_lines(0, new_start, adds)],
            })
        }
        (Some(content), None) => {
            let removes: Vec<HunkLine> = split_lines(content)
                .into_iter()
                .map(HunkLine::Remove)
                .collect();
            let old_start = usize::from(!removes.is_empty());
            Some(FilePatch {
                path: path.clone(),
                op: FileOp::Delete,
                hunks: vec![Hunk::from_lines(old_start, 0, removes)],
            })
        }
        (Some(old_c), Some(new_c)) => {
            if old_c == new_c {
                return None;
            }
            let hunks = diff_lines(&split_lines(old_c), &split_lines(new_c));
            if hunks.is_empty() {
                // Content differs only in trailing-newline presence; the
                // line model treats those as equal.
                return None;
            }
            Some(FilePatch {
                path: path.clone(),
                op: FileOp::Modify,
                hunks,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// LCS line diff
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
enum Op {
    Equal(String),
    Remove(String),
    Add(String),
}

/// Diff `old` against `new` into hunks with [`CONTEXT`] context lines.
fn diff_lines(old: &[String], new: &[String]) -> Vec<Hunk> {
    ops_to_hunks(&diff_ops(old, new))
}

/// Classic LCS edit script with common prefix/suffix trimming.
fn diff_ops(old: &[String], new: &[String]) -> Vec<Op> {
    let mut prefix = 0;
    while prefix < old.len() && prefix < new.len() && old[prefix] == new[prefix] {
        prefix += 1;
    }
    let mut suffix = 0;
    while suffix < old.len() - prefix
        && suffix < new.len() - prefix
        && old[old.len() - 1 - suffix] == new[new.len() - 1 - suffix]
    {
        suffix += 1;
    }

    let old_mid = &old[prefix..old.len() - suffix];
    let new_mid = &new[prefix..new.len() - suffix];

    // LCS length table over the trimmed middle.
    let (n, m) = (old_mid.len(), new_mid.len());
    let mut table = vec![0_u32; (n + 1) * (m + 1)];
    let idx = |i: usize, j: usize| i * (m + 1) + j;
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[idx(i, j)] = if old_mid[i] == new_mid[j] {
                table[idx(i + 1, j + 1)] + 1
            } else {
                table[idx(i + 1, j)].max(table[idx(i, j + 1)])
            };
        }
    }

    let mut ops = Vec::with_capacity(old.len() + new.len());
    ops.extend(old[..prefix].iter().cloned().map(Op::Equal));

    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old_mid[i] == new_mid[j] {
            ops.push(Op::Equal(old_mid[i].clone()));
            i += 1;
            j += 1;
        } else if table[idx(i + 1, j)] >= table[idx(i, j + 1)] {
            ops.push(Op::Remove(old_mid[i].clone()));
            i += 1;
        } else {
            ops.push(Op::Add(new_mid[j].clone()));
            j += 1;
        }
    }
    ops.extend(old_mid[i..].iter().cloned().map(Op::Remove));
    ops.extend(new_mid[j..].iter().cloned().map(Op::Add));

    ops.extend(old[old.len() - suffix..].iter().cloned().map(Op::Equal));
    ops
}

/// Group an edit script into hunks, attaching context and merging hunks
/// whose gap is at most `2 * CONTEXT` equal lines.
fn ops_to_hunks(ops: &[Op]) -> Vec<Hunk> {
    // Indices of non-Equal ops.
    let change_idxs: Vec<usize> = ops
        .iter()
        .enumerate()
        .filter(|(_, op)| !matches!(op, Op::Equal(_)))
        .map(|(i, _)| i)
        .collect();
    if change_idxs.is_empty() {
        return Vec::new();
    }

    // Group changes separated by more than 2*CONTEXT equal lines.
    let mut groups: Vec<(usize, usize)> = Vec::new();
    let mut start = change_idxs[0];
    let mut end = change_idxs[0];
    for &i in &change_idxs[1..] {
        if i - end > 2 * CONTEXT {
            groups.push((start, end));
            start = i;
        }
        end = i;
    }
    groups.push((start, end));

    // Old/new line numbers consumed before each op index.
    let mut old_before = vec![0_usize; ops.len() + 1];
    let mut new_before = vec![0_usize; ops.len() + 1];
    for (i, op) in ops.iter().enumerate() {
        old_before[i + 1] = old_before[i] + usize::from(!matches!(op, Op::Add(_)));
        new_before[i + 1] = new_before[i] + usize::from(!matches!(op, Op::Remove(_)));
    }

    let mut hunks = Vec::with_capacity(groups.len());
    for (first, last) in groups {
        let lo = first.saturating_sub(CONTEXT);
        let hi = (last + CONTEXT + 1).min(ops.len());

        let lines: Vec<HunkLine> = ops[lo..hi]
            .iter()
            .map(|op| match op {
                Op::Equal(s) => HunkLine::Context(s.clone()),
                Op::Remove(s) => HunkLine::Remove(s.clone()),
                Op::Add(s) => HunkLine::Add(s.clone()),
            })
            .collect();

        let old_count = lines.iter().filter(|l| l.in_old()).count();
        let new_count = lines.iter().filter(|l| l.in_new()).count();
        let old_start = if old_count == 0 {
            old_before[lo]
        } else {
            old_before[lo] + 1
        };
        let new_start = if new_count == 0 {
            new_before[lo]
        } else {
            new_before[lo] + 1
        };

        hunks.push(Hunk {
            old_start,
            old_count,
            new_start,
            new_count,
            lines,
        });
    }
    hunks
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

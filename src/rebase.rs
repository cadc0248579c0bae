//! Rebase coordinator — moves a patch stack onto a new base version.
//!
//! A rebase is a state machine over the stack:
//!
//! ```text
//! Pending ──> Applying(0) ──clean──> Applying(1) ──> ... ──> Complete
//!                 │
//!              conflict
//!                 v
//!           Conflicted(i) ──resolve(fixed tree)──> Resolved(i) ──> Applying(i+1)
//! ```
//!
//! Any state can move to `Aborted` by consuming the coordinator with
//! [`RebaseCoordinator::abort`], which hands back the pre-rebase stack
//! untouched. From the stack's perspective a rebase is all-or-nothing:
//! nothing is persisted until the caller takes the `Complete` result and
//! saves it, and the staged-directory save in `PatchStack::save` makes
//! that replacement atomic.
//!
//! Conflict resolution is batch-shaped: the coordinator pauses in
//! `Conflicted(i)`, the caller fixes the working tree by hand (or through
//! whatever interactive hook sits above this crate) and feeds it back via
//! [`RebaseCoordinator::resolve`]; the diff extractor regenerates patch
//! `i` from the fixed tree.

use tracing::{debug, info, warn};

use crate::error::CardstockError;
use crate::extract::diff_trees;
use crate::materialize::apply_patch;
use crate::model::conflict::Conflict;
use crate::model::patch::PatchStatus;
use crate::model::stack::PatchStack;
use crate::model::tree::{BaseTree, WorkingTree};

// ---------------------------------------------------------------------------
// RebaseState
// ---------------------------------------------------------------------------

/// Where a rebase currently stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RebaseState {
    /// Not started.
    Pending,
    /// Patch `i` is being applied against the new base.
    Applying(usize),
    /// Patch `i` failed to apply; waiting for a fixed tree.
    Conflicted(usize),
    /// Patch `i` was regenerated from a fixed tree.
    Resolved(usize),
    /// Every patch applied; the rebased stack is ready to take.
    Complete,
    /// Rebase was cancelled; the original stack was returned.
    Aborted,
}

// ---------------------------------------------------------------------------
// RebaseCoordinator
// ---------------------------------------------------------------------------

/// Drives one patch stack from its old base onto `new_base`.
#[derive(Debug)]
pub struct RebaseCoordinator<'a> {
    new_base: &'a BaseTree,
    /// Pre-rebase stack, kept pristine for abort.
    snapshot: PatchStack,
    /// Stack being rebuilt patch by patch.
    rebased: PatchStack,
    /// Output of every patch accepted so far, on the new base.
    tree: WorkingTree,
    /// Index of the next snapshot patch to apply.
    next: usize,
    state: RebaseState,
    conflicts: Vec<Conflict>,
}

impl<'a> RebaseCoordinator<'a> {
    /// Set up a rebase of `stack` onto `new_base`. No work happens until
    /// [`Self::run`].
    #[must_use]
    pub fn new(new_base: &'a BaseTree, stack: PatchStack) -> Self {
        let rebased = PatchStack::new(stack.domain());
        let tree = new_base.to_working();
        Self {
            new_base,
            snapshot: stack,
            rebased,
            tree,
            next: 0,
            state: RebaseState::Pending,
            conflicts: Vec::new(),
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> RebaseState {
        self.state
    }

    /// Conflicts of the currently conflicted patch (empty otherwise).
    #[must_use]
    pub fn conflicts(&self) -> &[Conflict] {
        &self.conflicts
    }

    /// The tree all accepted patches produce on the new base. In
    /// `Conflicted(i)` this is the output of patches `0..i` — the starting
    /// point for manual resolution.
    #[must_use]
    pub const fn working_tree(&self) -> &WorkingTree {
        &self.tree
    }

    /// Apply patches until a conflict pauses the rebase or it completes.
    ///
    /// Valid from `Pending`, `Resolved(_)`, or as a no-op from `Complete`.
    /// Calling from `Conflicted(_)` keeps waiting — the conflict must be
    /// resolved first.
    pub fn run(&mut self) -> RebaseState {
        match self.state {
            RebaseState::Pending | RebaseState::Resolved(_) | RebaseState::Applying(_) => {}
            RebaseState::Conflicted(_) | RebaseState::Complete | RebaseState::Aborted => {
                return self.state;
            }
        }

        while self.next < self.snapshot.len() {
            let i = self.next;
            self.state = RebaseState::Applying(i);
            // The snapshot stays pristine; work on a copy.
            let Some(patch) = self.snapshot.get(i).cloned() else {
                break;
            };
            match apply_patch(&self.tree, &patch) {
                Ok(next_tree) => {
                    debug!(patch = %patch.id, index = i, "rebase: applied cleanly");
                    self.tree = next_tree;
                    let mut accepted = patch;
                    accepted.status = PatchStatus::Clean;
                    self.rebased.append(accepted);
                    self.next = i + 1;
                }
                Err(conflicts) => {
                    warn!(
                        patch = %patch.id,
                        index = i,
                        conflicts = conflicts.len(),
                        "rebase: patch conflicts on new base"
                    );
                    self.conflicts = conflicts;
                    self.state = RebaseState::Conflicted(i);
                    return self.state;
                }
            }
        }

        info!(
            domain = %self.rebased.domain(),
            patches = self.rebased.len(),
            version = self.new_base.version(),
            "rebase complete"
        );
        self.state = RebaseState::Complete;
        self.state
    }

    /// Accept a manually fixed working tree for the conflicted patch.
    ///
    /// The patch is regenerated by diffing the pre-conflict tree against
    /// `fixed`, keeping its id and message. A patch whose fix turns out to
    /// change nothing is dropped — it dissolved into the new upstream.
    ///
    /// # Errors
    /// `EmptyStack`-free by construction; fails only when the coordinator
    /// is not in `Conflicted(_)`, reported as `ApplyConflict` with the
    /// current conflicts (or none).
    pub fn resolve(&mut self, fixed: WorkingTree) -> Result<(), CardstockError> {
        let RebaseState::Conflicted(i) = self.state else {
            return Err(CardstockError::ApplyConflict {
                conflicts: self.conflicts.clone(),
            });
        };
        // Unwrap-free: Conflicted(i) implies patch i exists.
        let (id, message) = self.snapshot.get(i).map_or_else(
            || unreachable!("conflicted index out of range"),
            |p| (p.id.clone(), p.message.clone()),
        );

        if let Some(patch) = diff_trees(self.tree.files(), fixed.files(), id, &message) {
            self.rebased.append(patch);
        } else {
            debug!(index = i, "rebase: resolved patch became empty, dropping");
        }
        self.tree = fixed;
        self.conflicts.clear();
        self.next = i + 1;
        self.state = RebaseState::Resolved(i);
        Ok(())
    }

    /// Cancel the rebase. The partial working tree is discarded and the
    /// original, untouched stack is returned.
    #[must_use]
    pub fn abort(mut self) -> PatchStack {
        self.state = RebaseState::Aborted;
        info!(domain = %self.snapshot.domain(), "rebase aborted");
        self.snapshot
    }

    /// Take the rebased stack. Only valid in `Complete`.
    ///
    /// # Errors
    /// `ApplyConflict` with the outstanding conflicts when the rebase has
    /// not finished.
    pub fn finish(self) -> Result<PatchStack, CardstockError> {
        if self.state == RebaseState::Complete {
            Ok(self.rebased)
        } else {
            Err(CardstockError::ApplyConflict {
                conflicts: self.conflicts,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::extract;
    use crate::materialize::{self, ApplyPolicy};
    use crate::model::patch::PatchId;
    use crate::model::stack::Domain;
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};

    fn base(version: &str, entries: &[(&str, &str)]) -> BaseTree {
        let files: BTreeMap<PathBuf, String> = entries
            .iter()
            .map(|(p, c)| (PathBuf::from(p), (*c).to_owned()))
            .collect();
        BaseTree::new(version, files)
    }

    fn pid(s: &str) -> PatchId {
        PatchId::new(s).unwrap()
    }

    /// Stack of two patches over `old`: p1 edits a.txt, p2 edits b.txt.
    fn build_stack(old: &BaseTree) -> PatchStack {
        let mut wt1 = old.to_working();
        wt1.set_file(PathBuf::from("a.txt"), "a patched\n".to_owned());
        let s1 = extract(old, &wt1, Domain::Server, pid("p1"), "patch a");

        let inter = BaseTree::new("inter", wt1.files().clone());
        let mut wt2 = wt1.clone();
        wt2.set_file(PathBuf::from("b.txt"), "b patched\n".to_owned());
        let s2 = extract(&inter, &wt2, Domain::Server, pid("p2"), "patch b");

        let mut stack = PatchStack::new(Domain::Server);
        stack.append(s1.get(0).unwrap().clone());
        stack.append(s2.get(0).unwrap().clone());
        stack
    }

    #[test]
    fn clean_rebase_runs_to_complete() {
        let old = base("v1", &[("a.txt", "a\n"), ("b.txt", "b\n")]);
        let stack = build_stack(&old);

        // New base adds an unrelated file; both patches still apply.
        let new = base(
            "v2",
            &[("a.txt", "a\n"), ("b.txt", "b\n"), ("c.txt", "new upstream\n")],
        );
        let mut rb = RebaseCoordinator::new(&new, stack);
        assert_eq!(rb.state(), RebaseState::Pending);

        assert_eq!(rb.run(), RebaseState::Complete);
        let rebased = rb.finish().unwrap();
        assert_eq!(rebased.len(), 2);

        let mut check = rebased;
        let out = materialize::apply(&new, &mut check, None, ApplyPolicy::Halt);
        assert!(out.is_clean());
        assert_eq!(out.tree.file(Path::new("a.txt")), Some("a patched\n"));
        assert_eq!(out.tree.file(Path::new("c.txt")), Some("new upstream\n"));
    }

    #[test]
    fn conflict_pauses_at_offending_patch() {
        let old = base("v1", &[("a.txt", "a\n"), ("b.txt", "b\n")]);
        let stack = build_stack(&old);

        // Upstream rewrote a.txt: p1 can no longer find its context.
        let new = base("v2", &[("a.txt", "upstream rewrote this\n"), ("b.txt", "b\n")]);
        let mut rb = RebaseCoordinator::new(&new, stack);

        assert_eq!(rb.run(), RebaseState::Conflicted(0));
        assert_eq!(rb.conflicts().len(), 1);
        assert_eq!(rb.conflicts()[0].patch, pid("p1"));
        // The working tree is the pre-conflict state: the new base itself.
        assert_eq!(
            rb.working_tree().file(Path::new("a.txt")),
            Some("upstream rewrote this\n")
        );
        // Running again while conflicted stays put.
        assert_eq!(rb.run(), RebaseState::Conflicted(0));
    }

    #[test]
    fn resolve_regenerates_patch_and_continues() {
        let old = base("v1", &[("a.txt", "a\n"), ("b.txt", "b\n")]);
        let stack = build_stack(&old);
        let new = base("v2", &[("a.txt", "upstream rewrote this\n"), ("b.txt", "b\n")]);

        let mut rb = RebaseCoordinator::new(&new, stack);
        assert_eq!(rb.run(), RebaseState::Conflicted(0));

        // Manual fix: reconcile the patch's intent with the new upstream.
        let mut fixed = rb.working_tree().clone();
        fixed.set_file(PathBuf::from("a.txt"), "a patched on new upstream\n".to_owned());
        rb.resolve(fixed).unwrap();
        assert_eq!(rb.state(), RebaseState::Resolved(0));

        assert_eq!(rb.run(), RebaseState::Complete);
        let rebased = rb.finish().unwrap();
        assert_eq!(rebased.len(), 2);
        // Patch 0 was regenerated but keeps its identity.
        assert_eq!(rebased.get(0).unwrap().id, pid("p1"));
        assert_eq!(rebased.get(0).unwrap().message, "patch a");

        let mut check = rebased;
        let out = materialize::apply(&new, &mut check, None, ApplyPolicy::Halt);
        assert!(out.is_clean());
        assert_eq!(
            out.tree.file(Path::new("a.txt")),
            Some("a patched on new upstream\n")
        );
        assert_eq!(out.tree.file(Path::new("b.txt")), Some("b patched\n"));
    }

    #[test]
    fn resolve_drops_dissolved_patch() {
        let old = base("v1", &[("a.txt", "a\n"), ("b.txt", "b\n")]);
        let stack = build_stack(&old);
        // Upstream already contains exactly what p1 wanted... almost: the
        // context differs, so p1 conflicts, and the fix is "change nothing".
        let new = base("v2", &[("a.txt", "upstream did it differently\n"), ("b.txt", "b\n")]);

        let mut rb = RebaseCoordinator::new(&new, stack);
        assert_eq!(rb.run(), RebaseState::Conflicted(0));

        let fixed = rb.working_tree().clone();
        rb.resolve(fixed).unwrap();
        assert_eq!(rb.run(), RebaseState::Complete);

        let rebased = rb.finish().unwrap();
        // p1 dissolved; only p2 remains.
        assert_eq!(rebased.len(), 1);
        assert_eq!(rebased.get(0).unwrap().id, pid("p2"));
    }

    #[test]
    fn abort_returns_pristine_stack() {
        let old = base("v1", &[("a.txt", "a\n"), ("b.txt", "b\n")]);
        let stack = build_stack(&old);
        let before: Vec<String> = stack.iter().map(crate::model::patch::Patch::serialize).collect();

        let new = base("v2", &[("a.txt", "rewritten\n"), ("b.txt", "b\n")]);
        let mut rb = RebaseCoordinator::new(&new, stack);
        let _ = rb.run();
        let restored = rb.abort();

        let after: Vec<String> = restored.iter().map(crate::model::patch::Patch::serialize).collect();
        assert_eq!(after, before, "aborted rebase must leave the stack byte-identical");
    }

    #[test]
    fn finish_before_complete_is_an_error() {
        let old = base("v1", &[("a.txt", "a\n"), ("b.txt", "b\n")]);
        let stack = build_stack(&old);
        let new = base("v2", &[("a.txt", "rewritten\n"), ("b.txt", "b\n")]);

        let mut rb = RebaseCoordinator::new(&new, stack);
        let _ = rb.run();
        assert!(matches!(rb.state(), RebaseState::Conflicted(0)));
        let err = rb.finish().unwrap_err();
        assert!(matches!(err, CardstockError::ApplyConflict { .. }));
    }

    #[test]
    fn resolve_outside_conflicted_is_an_error() {
        let old = base("v1", &[("a.txt", "a\n")]);
        let mut wt = old.to_working();
        wt.set_file(PathBuf::from("a.txt"), "A\n".to_owned());
        let stack = extract(&old, &wt, Domain::Api, pid("only"), "m");

        let new = base("v2", &[("a.txt", "a\n")]);
        let mut rb = RebaseCoordinator::new(&new, stack);
        assert!(rb.resolve(WorkingTree::new()).is_err());
    }
}

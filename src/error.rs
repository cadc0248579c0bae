//! Unified error type for the patch engine.
//!
//! Defines [`CardstockError`], the error surface of every library
//! operation. Messages are designed to be actionable: each variant says
//! what went wrong and what to do next, because the typical reader is an
//! operator mid-rebase, not a stack trace collector.
//!
//! Recoverability follows the engine's rules:
//! - `MalformedPatch` is fatal to that patch only — fix the file, retry.
//! - `ApplyConflict` is recoverable by manual resolution, never fatal to
//!   the stack.
//! - `ChecksumMismatch` forces a re-run of one stage.
//! - `ExternalToolFailure` halts the pipeline run; stderr is carried
//!   verbatim.
//! - `StateCorruption` refuses to resume; a fresh start must be explicit.
//!
//! Nothing is retried automatically.

use std::fmt;
use std::path::PathBuf;

use crate::model::conflict::Conflict;
use crate::model::stack::Domain;

// ---------------------------------------------------------------------------
// CardstockError
// ---------------------------------------------------------------------------

/// Unified error type for patch-stack and pipeline operations.
#[derive(Debug)]
pub enum CardstockError {
    /// A patch file could not be parsed.
    MalformedPatch {
        /// Path of the offending patch file.
        path: PathBuf,
        /// 1-based line where parsing failed (0 when not line-specific).
        line: usize,
        /// Human-readable explanation.
        reason: String,
    },

    /// One or more hunks failed to match during application.
    ApplyConflict {
        /// Every unresolved conflict, in application order.
        conflicts: Vec<Conflict>,
    },

    /// A pipeline stage's input changed since its recorded run.
    ChecksumMismatch {
        /// The stage whose input drifted.
        stage: String,
        /// Checksum recorded when the stage last completed.
        expected: String,
        /// Checksum of the current input.
        actual: String,
    },

    /// An external collaborator (decompiler, remapper, compiler) exited
    /// nonzero.
    ExternalToolFailure {
        /// Tool role (e.g. "remapper").
        tool: String,
        /// The full command line that was run.
        command: String,
        /// Exit code, if the process exited at all.
        exit_code: Option<i32>,
        /// Captured stderr, verbatim.
        stderr: String,
    },

    /// An operation needed a trailing patch but the stack is empty.
    EmptyStack {
        /// The domain whose stack was empty.
        domain: Domain,
    },

    /// Persisted pipeline state is unreadable.
    StateCorruption {
        /// Path of the state file.
        path: PathBuf,
        /// What made it unreadable.
        detail: String,
    },

    /// A configuration file could not be loaded or parsed.
    Config {
        /// Path to the configuration file.
        path: PathBuf,
        /// Human-readable description of the problem.
        detail: String,
    },

    /// An I/O error during an engine operation.
    Io(std::io::Error),
}

impl fmt::Display for CardstockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedPatch { path, line, reason } => {
                write!(f, "malformed patch '{}'", path.display())?;
                if *line > 0 {
                    write!(f, " (line {line})")?;
                }
                write!(
                    f,
                    ": {reason}\n  To fix: edit the patch file, or regenerate it:\n    cardstock extract <domain> --amend"
                )
            }
            Self::ApplyConflict { conflicts } => {
                write!(f, "conflict in {} hunk(s):", conflicts.len())?;
                for c in conflicts {
                    write!(f, "\n  - {c}")?;
                }
                write!(
                    f,
                    "\n  To fix: resolve the working tree by hand, then regenerate the patch:\n    cardstock extract <domain> --amend"
                )
            }
            Self::ChecksumMismatch {
                stage,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "input for stage '{stage}' changed since its last run\n  recorded {expected}\n  current  {actual}\n  To fix: re-run the pipeline; the stage will execute again."
                )
            }
            Self::ExternalToolFailure {
                tool,
                command,
                exit_code,
                stderr,
            } => {
                write!(f, "{tool} failed: {command}")?;
                if let Some(code) = exit_code {
                    write!(f, " (exit {code})")?;
                }
                if !stderr.is_empty() {
                    write!(f, "\n  stderr: {stderr}")?;
                }
                write!(
                    f,
                    "\n  To fix: check the tool configuration in cardstock.toml and re-invoke."
                )
            }
            Self::EmptyStack { domain } => {
                write!(
                    f,
                    "the '{domain}' stack has no patches to amend.\n  To fix: extract a first patch:\n    cardstock extract {domain}"
                )
            }
            Self::StateCorruption { path, detail } => {
                write!(
                    f,
                    "pipeline state '{}' is unreadable: {detail}\n  Refusing to resume. To start fresh, delete the state file and re-run.",
                    path.display()
                )
            }
            Self::Config { path, detail } => {
                write!(
                    f,
                    "configuration error in '{}': {detail}\n  To fix: edit the config file and correct the issue.",
                    path.display()
                )
            }
            Self::Io(err) => {
                write!(
                    f,
                    "I/O error: {err}\n  To fix: check file permissions and disk space."
                )
            }
        }
    }
}

impl std::error::Error for CardstockError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CardstockError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::patch::{Hunk, HunkLine, PatchId};

    fn sample_conflict() -> Conflict {
        Conflict::new(
            PatchId::new("0003-fix-tick").unwrap(),
            PathBuf::from("src/Server.java"),
            Hunk::from_lines(
                10,
                10,
                vec![
                    HunkLine::Context("a".into()),
                    HunkLine::Remove("b".into()),
                    HunkLine::Add("c".into()),
                ],
            ),
            "context not found within drift window",
        )
    }

    #[test]
    fn display_malformed_patch_with_line() {
        let err = CardstockError::MalformedPatch {
            path: PathBuf::from("patches/api/0001-x.patch"),
            line: 7,
            reason: "bad hunk header".to_owned(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("0001-x.patch"));
        assert!(msg.contains("line 7"));
        assert!(msg.contains("bad hunk header"));
        assert!(msg.contains("extract"));
    }

    #[test]
    fn display_malformed_patch_without_line() {
        let err = CardstockError::MalformedPatch {
            path: PathBuf::from("p.patch"),
            line: 0,
            reason: "duplicate stack position".to_owned(),
        };
        assert!(!format!("{err}").contains("line 0"));
    }

    #[test]
    fn display_apply_conflict_lists_each_conflict() {
        let err = CardstockError::ApplyConflict {
            conflicts: vec![sample_conflict()],
        };
        let msg = format!("{err}");
        assert!(msg.contains("1 hunk(s)"));
        assert!(msg.contains("0003-fix-tick"));
        assert!(msg.contains("src/Server.java"));
        assert!(msg.contains("resolve the working tree"));
    }

    #[test]
    fn display_checksum_mismatch() {
        let err = CardstockError::ChecksumMismatch {
            stage: "remap".to_owned(),
            expected: "aaa".to_owned(),
            actual: "bbb".to_owned(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("remap"));
        assert!(msg.contains("aaa"));
        assert!(msg.contains("bbb"));
    }

    #[test]
    fn display_external_tool_failure() {
        let err = CardstockError::ExternalToolFailure {
            tool: "decompiler".to_owned(),
            command: "java -jar forgeflower.jar".to_owned(),
            exit_code: Some(2),
            stderr: "class file truncated".to_owned(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("decompiler"));
        assert!(msg.contains("exit 2"));
        assert!(msg.contains("class file truncated"));
        assert!(msg.contains("cardstock.toml"));
    }

    #[test]
    fn display_external_tool_failure_no_stderr() {
        let err = CardstockError::ExternalToolFailure {
            tool: "compiler".to_owned(),
            command: "javac".to_owned(),
            exit_code: None,
            stderr: String::new(),
        };
        let msg = format!("{err}");
        assert!(!msg.contains("stderr:"));
        assert!(!msg.contains("exit "));
    }

    #[test]
    fn display_state_corruption_refuses_resume() {
        let err = CardstockError::StateCorruption {
            path: PathBuf::from(".cardstock/state.json"),
            detail: "unexpected end of JSON".to_owned(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("Refusing to resume"));
        assert!(msg.contains("state.json"));
    }

    #[test]
    fn io_error_carries_source() {
        let err = CardstockError::Io(std::io::Error::other("disk full"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn non_io_errors_have_no_source() {
        let err = CardstockError::ChecksumMismatch {
            stage: "remap".to_owned(),
            expected: String::new(),
            actual: String::new(),
        };
        assert!(std::error::Error::source(&err).is_none());
    }
}

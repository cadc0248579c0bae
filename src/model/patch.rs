//! Patch model — a named, ordered unit of textual change.
//!
//! A [`Patch`] is the unit the whole engine moves around: a validated
//! identifier, a one-line message, and a list of per-file hunk sets. The
//! on-disk form is a unified-diff dialect with a small header block:
//!
//! ```text
//! patch: 0001-rename-branding
//! message: Rename upstream branding to Cardstock
//!
//! --- a/src/main/java/Main.java
//! +++ b/src/main/java/Main.java
//! @@ -3,3 +3,4 @@
//!  context
//! -old line
//! +new line
//!  context
//! ```
//!
//! [`Patch::parse`] and [`Patch::serialize`] round-trip: for any patch `p`
//! obtained from `parse`, `parse(serialize(p)) == p`. The format stays
//! human-editable on purpose — conflict resolution often ends in a text
//! editor.
//!
//! Line offsets inside a patch are relative to the output of the
//! immediately preceding patch in its stack, not to the original base.

use std::fmt;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// PatchId
// ---------------------------------------------------------------------------

/// Validated patch identifier.
///
/// Lowercase alphanumeric plus hyphens, 1–64 characters. Doubles as the
/// file-name stem under `patches/<domain>/`, so anything the filesystem
/// would mangle is rejected up front.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatchId(String);

impl PatchId {
    /// Validate and wrap a patch identifier.
    ///
    /// # Errors
    /// Returns [`PatchIdError`] if the name is empty, longer than 64
    /// characters, or contains anything other than `a-z`, `0-9` and `-`.
    pub fn new(name: &str) -> Result<Self, PatchIdError> {
        if name.is_empty() || name.len() > 64 {
            return Err(PatchIdError {
                value: name.to_owned(),
                reason: format!("must be 1-64 characters, got {}", name.len()),
            });
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(PatchIdError {
                value: name.to_owned(),
                reason: "must contain only lowercase alphanumerics and hyphens".to_owned(),
            });
        }
        Ok(Self(name.to_owned()))
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for PatchId {
    type Err = PatchIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Error returned when a patch identifier fails validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatchIdError {
    /// The invalid value.
    pub value: String,
    /// Human-readable explanation.
    pub reason: String,
}

impl fmt::Display for PatchIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid patch id {:?}: {}", self.value, self.reason)
    }
}

impl std::error::Error for PatchIdError {}

// ---------------------------------------------------------------------------
// Hunk lines
// ---------------------------------------------------------------------------

/// A single line within a [`Hunk`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HunkLine {
    /// Unchanged line, present on both sides. Matched with whitespace
    /// tolerance during application.
    Context(String),
    /// Line added by the patch.
    Add(String),
    /// Line removed by the patch. Matched exactly during application.
    Remove(String),
}

impl HunkLine {
    /// `true` if this line is part of the old (pre-patch) image.
    #[must_use]
    pub const fn in_old(&self) -> bool {
        matches!(self, Self::Context(_) | Self::Remove(_))
    }

    /// `true` if this line is part of the new (post-patch) image.
    #[must_use]
    pub const fn in_new(&self) -> bool {
        matches!(self, Self::Context(_) | Self::Add(_))
    }

    /// The line text, regardless of kind.
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Context(s) | Self::Add(s) | Self::Remove(s) => s,
        }
    }
}

// ---------------------------------------------------------------------------
// Hunk
// ---------------------------------------------------------------------------

/// A contiguous block of context/added/removed lines within one file.
///
/// `old_start`/`new_start` are 1-based line numbers. A zero `old_count`
/// follows the unified-diff convention: the hunk inserts *after* line
/// `old_start` (and `old_start` may be 0 for an empty file).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hunk {
    /// 1-based first line of the old image (0 when `old_count` is 0 and
    /// the file was empty).
    pub old_start: usize,
    /// Number of old-image lines (context + removed).
    pub old_count: usize,
    /// 1-based first line of the new image.
    pub new_start: usize,
    /// Number of new-image lines (context + added).
    pub new_count: usize,
    /// The lines, in order.
    pub lines: Vec<HunkLine>,
}

impl Hunk {
    /// Build a hunk from its lines, deriving the counts.
    #[must_use]
    pub fn from_lines(old_start: usize, new_start: usize, lines: Vec<HunkLine>) -> Self {
        let old_count = lines.iter().filter(|l| l.in_old()).count();
        let new_count = lines.iter().filter(|l| l.in_new()).count();
        Self {
            old_start,
            old_count,
            new_start,
            new_count,
            lines,
        }
    }

    /// The old-image lines (context + removed) in order.
    #[must_use]
    pub fn old_image(&self) -> Vec<&HunkLine> {
        self.lines.iter().filter(|l| l.in_old()).collect()
    }

    /// Render the `@@ -a,b +c,d @@` header.
    #[must_use]
    pub fn header(&self) -> String {
        format!(
            "@@ -{},{} +{},{} @@",
            self.old_start, self.old_count, self.new_start, self.new_count
        )
    }
}

// ---------------------------------------------------------------------------
// FilePatch
// ---------------------------------------------------------------------------

/// How a [`FilePatch`] affects its path.
///
/// Renames are not a first-class operation; a moved file is expressed as a
/// `Delete` plus a `Create`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileOp {
    /// File is created (`--- /dev/null`).
    Create,
    /// File is removed (`+++ /dev/null`).
    Delete,
    /// File content changes in place.
    Modify,
}

/// All hunks a patch carries for a single file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilePatch {
    /// Path relative to the tree root.
    pub path: PathBuf,
    /// Create / delete / modify.
    pub op: FileOp,
    /// Hunks in ascending `old_start` order.
    pub hunks: Vec<Hunk>,
}

// ---------------------------------------------------------------------------
// PatchStatus
// ---------------------------------------------------------------------------

/// Runtime application status of a patch.
///
/// Never serialized — patch text on disk carries no status, and
/// [`Patch::parse`] always yields `Unapplied`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PatchStatus {
    /// Not yet attempted against the current tree.
    #[default]
    Unapplied,
    /// Applied without conflicts.
    Clean,
    /// At least one hunk failed to match.
    Conflicted,
}

impl fmt::Display for PatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unapplied => "unapplied",
            Self::Clean => "clean",
            Self::Conflicted => "conflicted",
        })
    }
}

// ---------------------------------------------------------------------------
// Patch
// ---------------------------------------------------------------------------

/// A named, ordered unit of change against the preceding stack output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Patch {
    /// Validated identifier; also the on-disk file-name stem.
    pub id: PatchId,
    /// One-line human-readable message.
    pub message: String,
    /// Per-file hunk sets.
    pub files: Vec<FilePatch>,
    /// Runtime status; not part of the serialized form.
    pub status: PatchStatus,
}

/// Error produced when patch text cannot be parsed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatchParseError {
    /// 1-based line number where parsing failed.
    pub line: usize,
    /// Human-readable explanation.
    pub reason: String,
}

impl fmt::Display for PatchParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed patch at line {}: {}", self.line, self.reason)
    }
}

impl std::error::Error for PatchParseError {}

impl Patch {
    /// Create an empty patch with the given id and message.
    #[must_use]
    pub fn new(id: PatchId, message: impl Into<String>) -> Self {
        Self {
            id,
            message: message.into(),
            files: Vec::new(),
            status: PatchStatus::Unapplied,
        }
    }

    /// `true` if the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Parse patch text into a [`Patch`].
    ///
    /// Accepts blank lines between file sections (humans add them); the
    /// serializer never emits them, so `parse(serialize(p)) == p` holds for
    /// every parsed patch.
    ///
    /// # Errors
    /// Returns [`PatchParseError`] with a 1-based line number on any
    /// structural problem: missing header, bad hunk range, a hunk body that
    /// does not add up to its declared counts, or out-of-order hunks.
    pub fn parse(text: &str) -> Result<Self, PatchParseError> {
        let mut parser = Parser::new(text);
        parser.parse()
    }

    /// Serialize to the canonical on-disk text form.
    #[must_use]
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        out.push_str("patch: ");
        out.push_str(self.id.as_str());
        out.push('\n');
        out.push_str("message: ");
        out.push_str(&self.message);
        out.push('\n');
        out.push('\n');

        for file in &self.files {
            let path = file.path.to_string_lossy();
            match file.op {
                FileOp::Create => {
                    out.push_str("--- /dev/null\n");
                    out.push_str(&format!("+++ b/{path}\n"));
                }
                FileOp::Delete => {
                    out.push_str(&format!("--- a/{path}\n"));
                    out.push_str("+++ /dev/null\n");
                }
                FileOp::Modify => {
                    out.push_str(&format!("--- a/{path}\n"));
                    out.push_str(&format!("+++ b/{path}\n"));
                }
            }
            for hunk in &file.hunks {
                out.push_str(&hunk.header());
                out.push('\n');
                for line in &hunk.lines {
                    let (prefix, text) = match line {
                        HunkLine::Context(s) => (' ', s),
                        HunkLine::Add(s) => ('+', s),
                        HunkLine::Remove(s) => ('-', s),
                    };
                    out.push(prefix);
                    out.push_str(text);
                    out.push('\n');
                }
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    lines: Vec<&'a str>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines().collect(),
            pos: 0,
        }
    }

    fn err(&self, reason: impl Into<String>) -> PatchParseError {
        PatchParseError {
            line: self.pos + 1,
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<&'a str> {
        self.lines.get(self.pos).copied()
    }

    fn next_line(&mut self) -> Option<&'a str> {
        let line = self.peek()?;
        self.pos += 1;
        Some(line)
    }

    fn expect_prefixed(&mut self, prefix: &str) -> Result<&'a str, PatchParseError> {
        let line = self
            .next_line()
            .ok_or_else(|| self.err(format!("expected `{prefix}...`, found end of text")))?;
        line.strip_prefix(prefix).ok_or_else(|| PatchParseError {
            line: self.pos,
            reason: format!("expected `{prefix}...`, found {line:?}"),
        })
    }

    fn parse(&mut self) -> Result<Patch, PatchParseError> {
        let id_raw = self.expect_prefixed("patch: ")?;
        let id = PatchId::new(id_raw.trim()).map_err(|e| PatchParseError {
            line: self.pos,
            reason: e.to_string(),
        })?;
        let message = self.expect_prefixed("message: ")?.to_owned();

        let mut files = Vec::new();
        while let Some(line) = self.peek() {
            if line.is_empty() {
                self.pos += 1;
                continue;
            }
            files.push(self.parse_file_section()?);
        }

        Ok(Patch {
            id,
            message,
            files,
            status: PatchStatus::Unapplied,
        })
    }

    fn parse_file_section(&mut self) -> Result<FilePatch, PatchParseError> {
        let old_name = self.expect_prefixed("--- ")?;
        let new_name = self.expect_prefixed("+++ ")?;

        let (op, path) = match (old_name, new_name) {
            ("/dev/null", new) => {
                let p = new
                    .strip_prefix("b/")
                    .ok_or_else(|| self.err(format!("expected `+++ b/<path>`, found {new:?}")))?;
                (FileOp::Create, PathBuf::from(p))
            }
            (old, "/dev/null") => {
                let p = old
                    .strip_prefix("a/")
                    .ok_or_else(|| self.err(format!("expected `--- a/<path>`, found {old:?}")))?;
                (FileOp::Delete, PathBuf::from(p))
            }
            (old, new) => {
                let old_p = old
                    .strip_prefix("a/")
                    .ok_or_else(|| self.err(format!("expected `--- a/<path>`, found {old:?}")))?;
                let new_p = new
                    .strip_prefix("b/")
                    .ok_or_else(|| self.err(format!("expected `+++ b/<path>`, found {new:?}")))?;
                if old_p != new_p {
                    return Err(self.err(format!(
                        "path mismatch {old_p:?} vs {new_p:?}; renames are expressed as delete + create"
                    )));
                }
                (FileOp::Modify, PathBuf::from(new_p))
            }
        };

        let mut hunks = Vec::new();
        while let Some(line) = self.peek() {
            if !line.starts_with("@@ ") {
                break;
            }
            hunks.push(self.parse_hunk()?);
        }
        if hunks.is_empty() {
            return Err(self.err("file section with no hunks"));
        }
        // Hunks must be ordered and non-overlapping within one file.
        for pair in hunks.windows(2) {
            if pair[1].old_start <= pair[0].old_start {
                return Err(self.err(format!(
                    "hunks out of order: old_start {} after {}",
                    pair[1].old_start, pair[0].old_start
                )));
            }
        }

        Ok(FilePatch { path, op, hunks })
    }

    fn parse_hunk(&mut self) -> Result<Hunk, PatchParseError> {
        let header = self
            .next_line()
            .ok_or_else(|| self.err("expected hunk header"))?;
        let (old_start, old_count, new_start, new_count) =
            parse_hunk_header(header).ok_or_else(|| PatchParseError {
                line: self.pos,
                reason: format!("bad hunk header {header:?}"),
            })?;

        let mut lines = Vec::new();
        let mut remaining_old = old_count;
        let mut remaining_new = new_count;
        while remaining_old > 0 || remaining_new > 0 {
            let raw = self
                .next_line()
                .ok_or_else(|| self.err("hunk body ended before declared counts were met"))?;
            let mut chars = raw.chars();
            let line = match chars.next() {
                // Editors that trim trailing whitespace turn an empty
                // context line (` `) into a fully empty line. Accept it.
                None => {
                    if remaining_old == 0 || remaining_new == 0 {
                        return Err(self.err("context line exceeds declared hunk counts"));
                    }
                    remaining_old -= 1;
                    remaining_new -= 1;
                    HunkLine::Context(String::new())
                }
                Some(' ') => {
                    if remaining_old == 0 || remaining_new == 0 {
                        return Err(self.err("context line exceeds declared hunk counts"));
                    }
                    remaining_old -= 1;
                    remaining_new -= 1;
                    HunkLine::Context(chars.as_str().to_owned())
                }
                Some('-') => {
                    if remaining_old == 0 {
                        return Err(self.err("removed line exceeds declared old count"));
                    }
                    remaining_old -= 1;
                    HunkLine::Remove(chars.as_str().to_owned())
                }
                Some('+') => {
                    if remaining_new == 0 {
                        return Err(self.err("added line exceeds declared new count"));
                    }
                    remaining_new -= 1;
                    HunkLine::Add(chars.as_str().to_owned())
                }
                other => {
                    return Err(self.err(format!(
                        "hunk line must start with ' ', '+' or '-', found {other:?}"
                    )));
                }
            };
            lines.push(line);
        }

        Ok(Hunk {
            old_start,
            old_count,
            new_start,
            new_count,
            lines,
        })
    }
}

/// Parse `@@ -a,b +c,d @@` into `(a, b, c, d)`. A missing count means 1.
fn parse_hunk_header(line: &str) -> Option<(usize, usize, usize, usize)> {
    let rest = line.strip_prefix("@@ -")?;
    let (old_part, rest) = rest.split_once(" +")?;
    let (new_part, _) = rest.split_once(" @@")?;

    let parse_range = |part: &str| -> Option<(usize, usize)> {
        match part.split_once(',') {
            Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
            None => Some((part.parse().ok()?, 1)),
        }
    };

    let (old_start, old_count) = parse_range(old_part)?;
    let (new_start, new_count) = parse_range(new_part)?;
    Some((old_start, old_count, new_start, new_count))
}

/// Derive the `NNNN-<id>.patch` file name for a patch at stack position
/// `index` (0-based; file names are numbered from 1).
#[must_use]
pub fn patch_file_name(index: usize, id: &PatchId) -> PathBuf {
    PathBuf::from(format!("{:04}-{}.patch", index + 1, id))
}

/// Split a `NNNN-<id>.patch` file name back into its index and id.
#[must_use]
pub fn parse_patch_file_name(name: &Path) -> Option<(usize, PatchId)> {
    let stem = name.file_name()?.to_str()?.strip_suffix(".patch")?;
    let (num, id) = stem.split_once('-')?;
    if num.len() != 4 {
        return None;
    }
    let index: usize = num.parse().ok()?;
    let id = PatchId::new(id).ok()?;
    Some((index.checked_sub(1)?, id))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(s: &str) -> PatchId {
        PatchId::new(s).unwrap()
    }

    const SAMPLE: &str = "\
patch: 0001-rename-branding
message: Rename upstream branding

--- a/src/Main.java
+++ b/src/Main.java
@@ -1,3 +1,3 @@
 line one
-old name
+new name
 line three
";

    // -----------------------------------------------------------------------
    // PatchId
    // -----------------------------------------------------------------------

    #[test]
    fn patch_id_accepts_kebab() {
        assert!(PatchId::new("0001-rename-branding").is_ok());
    }

    #[test]
    fn patch_id_rejects_empty() {
        assert!(PatchId::new("").is_err());
    }

    #[test]
    fn patch_id_rejects_uppercase() {
        assert!(PatchId::new("Rename").is_err());
    }

    #[test]
    fn patch_id_rejects_slash() {
        assert!(PatchId::new("a/b").is_err());
    }

    #[test]
    fn patch_id_rejects_over_64_chars() {
        assert!(PatchId::new(&"a".repeat(65)).is_err());
        assert!(PatchId::new(&"a".repeat(64)).is_ok());
    }

    // -----------------------------------------------------------------------
    // Parse / serialize
    // -----------------------------------------------------------------------

    #[test]
    fn parse_sample() {
        let p = Patch::parse(SAMPLE).unwrap();
        assert_eq!(p.id, pid("0001-rename-branding"));
        assert_eq!(p.message, "Rename upstream branding");
        assert_eq!(p.status, PatchStatus::Unapplied);
        assert_eq!(p.files.len(), 1);
        let file = &p.files[0];
        assert_eq!(file.path, PathBuf::from("src/Main.java"));
        assert_eq!(file.op, FileOp::Modify);
        assert_eq!(file.hunks.len(), 1);
        let hunk = &file.hunks[0];
        assert_eq!((hunk.old_start, hunk.old_count), (1, 3));
        assert_eq!((hunk.new_start, hunk.new_count), (1, 3));
        assert_eq!(hunk.lines.len(), 4);
    }

    #[test]
    fn round_trip_is_exact() {
        let p = Patch::parse(SAMPLE).unwrap();
        let text = p.serialize();
        let again = Patch::parse(&text).unwrap();
        assert_eq!(again, p);
        // And the second serialization is byte-identical.
        assert_eq!(again.serialize(), text);
    }

    #[test]
    fn parse_create_file() {
        let text = "\
patch: 0002-add-file
message: Add a file

--- /dev/null
+++ b/new.txt
@@ -0,0 +1,2 @@
+alpha
+beta
";
        let p = Patch::parse(text).unwrap();
        assert_eq!(p.files[0].op, FileOp::Create);
        assert_eq!(p.files[0].path, PathBuf::from("new.txt"));
        assert_eq!(p.serialize(), text);
    }

    #[test]
    fn parse_delete_file() {
        let text = "\
patch: 0003-drop-file
message: Drop a file

--- a/gone.txt
+++ /dev/null
@@ -1,1 +0,0 @@
-goodbye
";
        let p = Patch::parse(text).unwrap();
        assert_eq!(p.files[0].op, FileOp::Delete);
        assert_eq!(p.serialize(), text);
    }

    #[test]
    fn parse_multiple_files_and_hunks() {
        let text = "\
patch: 0004-two-files
message: Touch two files

--- a/a.txt
+++ b/a.txt
@@ -1,2 +1,2 @@
-one
+uno
 two
@@ -9,2 +9,2 @@
 nine
-ten
+diez
--- a/b.txt
+++ b/b.txt
@@ -1,1 +1,1 @@
-x
+y
";
        let p = Patch::parse(text).unwrap();
        assert_eq!(p.files.len(), 2);
        assert_eq!(p.files[0].hunks.len(), 2);
        assert_eq!(p.serialize(), text);
    }

    #[test]
    fn parse_tolerates_blank_lines_between_sections() {
        let spaced = SAMPLE.replace("--- a/", "\n--- a/");
        let p = Patch::parse(&spaced).unwrap();
        assert_eq!(p, Patch::parse(SAMPLE).unwrap());
    }

    #[test]
    fn parse_preserves_empty_context_lines() {
        let text = "\
patch: 0005-empty-context
message: Hunk spanning a blank line

--- a/a.txt
+++ b/a.txt
@@ -1,3 +1,3 @@
 before

-after
+after!
";
        // The blank line lost its leading space (editor trimmed it); the
        // parser still reads it as an empty context line.
        let p = Patch::parse(text).unwrap();
        assert_eq!(
            p.files[0].hunks[0].lines[1],
            HunkLine::Context(String::new())
        );
        let canonical = p.serialize();
        assert_eq!(Patch::parse(&canonical).unwrap(), p);
    }

    // -----------------------------------------------------------------------
    // Malformed input
    // -----------------------------------------------------------------------

    #[test]
    fn parse_rejects_missing_header() {
        let err = Patch::parse("--- a/x\n+++ b/x\n").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.reason.contains("patch: "));
    }

    #[test]
    fn parse_rejects_bad_id() {
        let text = "patch: NOT VALID\nmessage: m\n";
        assert!(Patch::parse(text).is_err());
    }

    #[test]
    fn parse_rejects_truncated_hunk() {
        let text = "\
patch: 0006-short
message: m

--- a/a.txt
+++ b/a.txt
@@ -1,3 +1,3 @@
 only one line
";
        let err = Patch::parse(text).unwrap_err();
        assert!(err.reason.contains("declared counts"));
    }

    #[test]
    fn parse_rejects_overfull_hunk() {
        let text = "\
patch: 0007-overfull
message: m

--- a/a.txt
+++ b/a.txt
@@ -1,1 +1,1 @@
 ctx
+extra
";
        assert!(Patch::parse(text).is_err());
    }

    #[test]
    fn parse_rejects_bad_hunk_line_prefix() {
        let text = "\
patch: 0008-bad-prefix
message: m

--- a/a.txt
+++ b/a.txt
@@ -1,2 +1,2 @@
 ctx
*what
";
        let err = Patch::parse(text).unwrap_err();
        assert!(err.reason.contains("must start with"));
    }

    #[test]
    fn parse_rejects_rename_sections() {
        let text = "\
patch: 0009-rename
message: m

--- a/old.txt
+++ b/new.txt
@@ -1,1 +1,1 @@
-x
+y
";
        let err = Patch::parse(text).unwrap_err();
        assert!(err.reason.contains("delete + create"));
    }

    #[test]
    fn parse_rejects_out_of_order_hunks() {
        let text = "\
patch: 0010-disorder
message: m

--- a/a.txt
+++ b/a.txt
@@ -9,1 +9,1 @@
-n
+m
@@ -1,1 +1,1 @@
-x
+y
";
        let err = Patch::parse(text).unwrap_err();
        assert!(err.reason.contains("out of order"));
    }

    #[test]
    fn parse_rejects_file_section_without_hunks() {
        let text = "\
patch: 0011-no-hunks
message: m

--- a/a.txt
+++ b/a.txt
";
        assert!(Patch::parse(text).is_err());
    }

    // -----------------------------------------------------------------------
    // Hunk helpers
    // -----------------------------------------------------------------------

    #[test]
    fn hunk_header_parses_short_form() {
        assert_eq!(parse_hunk_header("@@ -3 +4 @@"), Some((3, 1, 4, 1)));
    }

    #[test]
    fn hunk_header_rejects_garbage() {
        assert_eq!(parse_hunk_header("@@ nonsense @@"), None);
        assert_eq!(parse_hunk_header("@@ -a,b +c,d @@"), None);
    }

    #[test]
    fn hunk_from_lines_derives_counts() {
        let h = Hunk::from_lines(
            5,
            5,
            vec![
                HunkLine::Context("a".into()),
                HunkLine::Remove("b".into()),
                HunkLine::Add("c".into()),
                HunkLine::Add("d".into()),
            ],
        );
        assert_eq!(h.old_count, 2);
        assert_eq!(h.new_count, 3);
        assert_eq!(h.header(), "@@ -5,2 +5,3 @@");
    }

    // -----------------------------------------------------------------------
    // File names
    // -----------------------------------------------------------------------

    #[test]
    fn patch_file_name_round_trip() {
        let id = pid("fix-chat");
        let name = patch_file_name(6, &id);
        assert_eq!(name, PathBuf::from("0007-fix-chat.patch"));
        assert_eq!(parse_patch_file_name(&name), Some((6, id)));
    }

    #[test]
    fn parse_patch_file_name_rejects_strays() {
        assert_eq!(parse_patch_file_name(Path::new("README.md")), None);
        assert_eq!(parse_patch_file_name(Path::new("1-x.patch")), None);
        assert_eq!(parse_patch_file_name(Path::new("0001.patch")), None);
    }
}

//! External collaborators: decompiler, remapper, compiler.
//!
//! The pipeline treats each tool as a black box behind a trait, so tests
//! can substitute cheap fakes and the real build can plug in whatever the
//! fork uses (ForgeFlower, tiny-remapper, javac). The process-backed
//! implementations run an argv template from `cardstock.toml` with
//! `{input}`, `{output}` and `{mappings}` placeholders substituted.
//!
//! A tool that exits nonzero (or cannot be spawned) becomes
//! [`CardstockError::ExternalToolFailure`] with its stderr carried
//! verbatim. Stdout is discarded; tools talk through the filesystem.

use std::path::Path;
use std::process::Command;

use tracing::debug;

use crate::error::CardstockError;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Turns an upstream artifact into a source tree.
pub trait Decompiler {
    /// Decompile `artifact` into `out_dir`.
    ///
    /// # Errors
    /// Returns [`CardstockError::ExternalToolFailure`] when the tool fails.
    fn decompile(&self, artifact: &Path, out_dir: &Path) -> Result<(), CardstockError>;
}

/// Rewrites symbols in a source tree according to a mapping file.
pub trait Remapper {
    /// Remap `input` using `mappings`, writing the result to `out_dir`.
    ///
    /// # Errors
    /// Returns [`CardstockError::ExternalToolFailure`] when the tool fails.
    fn remap(&self, input: &Path, mappings: &Path, out_dir: &Path) -> Result<(), CardstockError>;
}

/// Verifies that a materialized tree actually builds.
pub trait Compiler {
    /// Compile-check the tree rooted at `tree`.
    ///
    /// # Errors
    /// Returns [`CardstockError::ExternalToolFailure`] when the build fails.
    fn compile(&self, tree: &Path) -> Result<(), CardstockError>;
}

// ---------------------------------------------------------------------------
// Argv templates
// ---------------------------------------------------------------------------

/// An argv template with `{placeholder}` substitution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    argv: Vec<String>,
}

impl CommandSpec {
    /// Build a spec from a configured argv vector.
    #[must_use]
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }

    /// True when no command line was configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.argv.is_empty()
    }

    /// Substitute `vars` (placeholder name without braces, value) into
    /// every argument. Unknown placeholders are left untouched so a tool
    /// can use its own `{...}` syntax.
    fn render(&self, vars: &[(&str, &Path)]) -> Vec<String> {
        self.argv
            .iter()
            .map(|arg| {
                let mut out = arg.clone();
                for (name, value) in vars {
                    out = out.replace(
                        &format!("{{{name}}}"),
                        &value.to_string_lossy(),
                    );
                }
                out
            })
            .collect()
    }
}

/// Run a rendered command line, mapping failure to `ExternalToolFailure`.
fn run_tool(role: &str, argv: &[String]) -> Result<(), CardstockError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(CardstockError::ExternalToolFailure {
            tool: role.to_owned(),
            command: String::new(),
            exit_code: None,
            stderr: "no command line configured in cardstock.toml".to_owned(),
        });
    };
    let command = argv.join(" ");
    debug!(tool = role, %command, "running external tool");

    let output = Command::new(program).args(args).output().map_err(|e| {
        CardstockError::ExternalToolFailure {
            tool: role.to_owned(),
            command: command.clone(),
            exit_code: None,
            stderr: e.to_string(),
        }
    })?;

    if output.status.success() {
        return Ok(());
    }
    Err(CardstockError::ExternalToolFailure {
        tool: role.to_owned(),
        command,
        exit_code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_owned(),
    })
}

// ---------------------------------------------------------------------------
// Process-backed implementations
// ---------------------------------------------------------------------------

/// Decompiler that shells out to a configured command line.
#[derive(Clone, Debug)]
pub struct ProcessDecompiler {
    spec: CommandSpec,
}

impl ProcessDecompiler {
    #[must_use]
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            spec: CommandSpec::new(argv),
        }
    }
}

impl Decompiler for ProcessDecompiler {
    fn decompile(&self, artifact: &Path, out_dir: &Path) -> Result<(), CardstockError> {
        std::fs::create_dir_all(out_dir)?;
        let argv = self
            .spec
            .render(&[("input", artifact), ("output", out_dir)]);
        run_tool("decompiler", &argv)
    }
}

/// Remapper that shells out to a configured command line.
#[derive(Clone, Debug)]
pub struct ProcessRemapper {
    spec: CommandSpec,
}

impl ProcessRemapper {
    #[must_use]
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            spec: CommandSpec::new(argv),
        }
    }
}

impl Remapper for ProcessRemapper {
    fn remap(&self, input: &Path, mappings: &Path, out_dir: &Path) -> Result<(), CardstockError> {
        std::fs::create_dir_all(out_dir)?;
        let argv = self.spec.render(&[
            ("input", input),
            ("output", out_dir),
            ("mappings", mappings),
        ]);
        run_tool("remapper", &argv)
    }
}

/// Compiler that shells out to a configured command line.
#[derive(Clone, Debug)]
pub struct ProcessCompiler {
    spec: CommandSpec,
}

impl ProcessCompiler {
    #[must_use]
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            spec: CommandSpec::new(argv),
        }
    }
}

impl Compiler for ProcessCompiler {
    fn compile(&self, tree: &Path) -> Result<(), CardstockError> {
        let argv = self.spec.render(&[("input", tree)]);
        run_tool("compiler", &argv)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

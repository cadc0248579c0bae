//! Repository configuration (`cardstock.toml`).
//!
//! Defines the typed configuration for the fork build: the pinned
//! upstream, the directory layout, and the external tool command lines.
//! Missing fields use defaults that mirror the fork's conventional layout
//! (`patches/api`, `patches/server`, `cardstock-api`, `cardstock-server`).
//! A missing file means all defaults (no error).

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::model::stack::Domain;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level configuration, parsed from `cardstock.toml`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct CardstockConfig {
    /// Upstream pin and input artifacts.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Directory layout.
    #[serde(default)]
    pub paths: PathsConfig,

    /// External collaborator command lines.
    #[serde(default)]
    pub tools: ToolsConfig,
}

impl CardstockConfig {
    /// Load configuration from `path`. A missing file yields all defaults.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the file exists but cannot be read or
    /// parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError {
            path: Some(path.to_path_buf()),
            message: e.to_string(),
        })?;
        toml::from_str(&text).map_err(|e| ConfigError {
            path: Some(path.to_path_buf()),
            message: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// UpstreamConfig
// ---------------------------------------------------------------------------

/// The pinned upstream version and the input artifacts the pipeline
/// consumes.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Upstream version pin (tag, branch, or commit) the whole build is
    /// keyed on. Changing it invalidates pipeline state.
    #[serde(rename = "ref", default = "default_upstream_ref")]
    pub upstream_ref: String,

    /// Path to the upstream server artifact handed to the decompiler.
    #[serde(default = "default_artifact")]
    pub artifact: PathBuf,

    /// Path to the symbol mapping file handed to the remapper.
    #[serde(default = "default_mappings")]
    pub mappings: PathBuf,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            upstream_ref: default_upstream_ref(),
            artifact: default_artifact(),
            mappings: default_mappings(),
        }
    }
}

fn default_upstream_ref() -> String {
    "paper/main".to_owned()
}

fn default_artifact() -> PathBuf {
    PathBuf::from(".cardstock/server.jar")
}

fn default_mappings() -> PathBuf {
    PathBuf::from(".cardstock/mappings.tiny")
}

// ---------------------------------------------------------------------------
// PathsConfig
// ---------------------------------------------------------------------------

/// Where patches, work state and output trees live.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsConfig {
    /// Root of the per-domain patch directories.
    #[serde(default = "default_patches_dir")]
    pub patches_dir: PathBuf,

    /// Scratch/state directory for intermediate trees and pipeline state.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Output tree for the API domain.
    #[serde(default = "default_api_output")]
    pub api_output: PathBuf,

    /// Output tree for the server domain.
    #[serde(default = "default_server_output")]
    pub server_output: PathBuf,
}

impl PathsConfig {
    /// `patches/<domain>` for a domain's stack.
    #[must_use]
    pub fn stack_dir(&self, domain: Domain) -> PathBuf {
        self.patches_dir.join(domain.as_str())
    }

    /// The materialized output tree for a domain.
    #[must_use]
    pub fn output_dir(&self, domain: Domain) -> &Path {
        match domain {
            Domain::Api => &self.api_output,
            Domain::Server => &self.server_output,
        }
    }

    /// Persisted pipeline state file.
    #[must_use]
    pub fn state_file(&self) -> PathBuf {
        self.work_dir.join("state.json")
    }

    /// Where the decompiler writes its tree.
    #[must_use]
    pub fn decompiled_dir(&self) -> PathBuf {
        self.work_dir.join("decompiled")
    }

    /// Where the remapper writes the base tree patches apply onto.
    #[must_use]
    pub fn base_dir(&self) -> PathBuf {
        self.work_dir.join("base")
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            patches_dir: default_patches_dir(),
            work_dir: default_work_dir(),
            api_output: default_api_output(),
            server_output: default_server_output(),
        }
    }
}

fn default_patches_dir() -> PathBuf {
    PathBuf::from("patches")
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(".cardstock")
}

fn default_api_output() -> PathBuf {
    PathBuf::from("cardstock-api")
}

fn default_server_output() -> PathBuf {
    PathBuf::from("cardstock-server")
}

// ---------------------------------------------------------------------------
// ToolsConfig
// ---------------------------------------------------------------------------

/// Command lines for the external collaborators.
///
/// Each entry is an argv vector; `{input}`, `{output}` and `{mappings}`
/// placeholders are substituted at invocation time. An empty vector means
/// the tool is not configured (the compiler is optional; the decompiler
/// and remapper are required to run the full pipeline).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ToolsConfig {
    /// Decompiler argv, e.g. `["java", "-jar", "forgeflower.jar", "{input}", "{output}"]`.
    #[serde(default)]
    pub decompiler: Vec<String>,

    /// Remapper argv, e.g. `["java", "-jar", "tiny-remapper.jar", "{input}", "{output}", "{mappings}"]`.
    #[serde(default)]
    pub remapper: Vec<String>,

    /// Compiler argv used to verify output trees; empty disables the check.
    #[serde(default)]
    pub compiler: Vec<String>,
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Error loading or parsing the configuration file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigError {
    /// The config file path, when known.
    pub path: Option<PathBuf>,
    /// Human-readable description.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(p) => write!(f, "config error in '{}': {}", p.display(), self.message),
            None => write!(f, "config error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for crate::error::CardstockError {
    fn from(err: ConfigError) -> Self {
        Self::Config {
            path: err.path.unwrap_or_default(),
            detail: err.message,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Build pipeline orchestration.
//!
//! Drives the four stages that turn a pinned upstream artifact into the
//! fork's two materialized source trees:
//!
//! 1. `fetch-base`  — decompile the upstream artifact,
//! 2. `remap`       — rewrite symbols with the mapping file,
//! 3. `apply-api`   — materialize the API domain's patch stack,
//! 4. `apply-server` — materialize the server domain's patch stack.
//!
//! Each stage records a checksum of its inputs in [`state::PipelineState`]
//! when it completes; a later run skips stages whose inputs are unchanged
//! and whose outputs still exist. A failed stage halts the run with the
//! stage identified — nothing is retried automatically, and state is only
//! committed after a stage's outputs are verified.
//!
//! Changing the upstream pin invalidates everything: the run refuses to
//! resume against old state and requires an explicit fresh start.

pub mod state;

use std::fmt;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::config::CardstockConfig;
use crate::error::CardstockError;
use crate::materialize::{materialize_to_dir, ApplyPolicy};
use crate::model::stack::{Domain, PatchStack};
use crate::model::tree::BaseTree;
use crate::tools::{Compiler, Decompiler, Remapper};

use self::state::{PipelineState, StageRecord};

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// The pipeline's stages, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    FetchBase,
    Remap,
    ApplyApi,
    ApplyServer,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Self; 4] = [Self::FetchBase, Self::Remap, Self::ApplyApi, Self::ApplyServer];

    /// Stable stage name, used as the state-file key.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FetchBase => "fetch-base",
            Self::Remap => "remap",
            Self::ApplyApi => "apply-api",
            Self::ApplyServer => "apply-server",
        }
    }

    /// Process exit code identifying a failure in this stage.
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::FetchBase => 10,
            Self::Remap => 11,
            Self::ApplyApi => 12,
            Self::ApplyServer => 13,
        }
    }

    /// The domain a patch-application stage serves, if any.
    #[must_use]
    pub const fn domain(self) -> Option<Domain> {
        match self {
            Self::ApplyApi => Some(Domain::Api),
            Self::ApplyServer => Some(Domain::Server),
            Self::FetchBase | Self::Remap => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PipelineError
// ---------------------------------------------------------------------------

/// A pipeline failure, attributed to a stage when one was running.
#[derive(Debug)]
pub struct PipelineError {
    /// The stage that failed, when the failure happened inside one.
    pub stage: Option<Stage>,
    /// The underlying error.
    pub error: CardstockError,
}

impl PipelineError {
    fn in_stage(stage: Stage, error: CardstockError) -> Self {
        Self {
            stage: Some(stage),
            error,
        }
    }

    fn setup(error: CardstockError) -> Self {
        Self { stage: None, error }
    }

    /// Exit code for the process: stage-identifying when attributable.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.stage.map_or(1, Stage::exit_code)
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stage {
            Some(stage) => write!(f, "stage '{stage}' failed: {}", self.error),
            None => write!(f, "{}", self.error),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

// ---------------------------------------------------------------------------
// Run report
// ---------------------------------------------------------------------------

/// What happened to one stage during a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageOutcome {
    /// Inputs unchanged and outputs present; the stage was skipped.
    Skipped,
    /// The stage executed and completed.
    Ran,
}

/// Per-stage outcomes of a completed run, in execution order.
#[derive(Clone, Debug, Default)]
pub struct RunReport {
    pub stages: Vec<(Stage, StageOutcome)>,
}

impl RunReport {
    /// Outcome of a single stage, if it was reached.
    #[must_use]
    pub fn outcome(&self, stage: Stage) -> Option<StageOutcome> {
        self.stages
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, o)| *o)
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Orchestrates a full (or resumed) build run.
pub struct Pipeline<'a> {
    config: &'a CardstockConfig,
    decompiler: &'a dyn Decompiler,
    remapper: &'a dyn Remapper,
    compiler: Option<&'a dyn Compiler>,
}

impl<'a> Pipeline<'a> {
    #[must_use]
    pub fn new(
        config: &'a CardstockConfig,
        decompiler: &'a dyn Decompiler,
        remapper: &'a dyn Remapper,
        compiler: Option<&'a dyn Compiler>,
    ) -> Self {
        Self {
            config,
            decompiler,
            remapper,
            compiler,
        }
    }

    /// Run the pipeline end to end, resuming from recorded state.
    ///
    /// `fresh` discards any prior state first; it is required after the
    /// upstream pin changes.
    ///
    /// # Errors
    /// Returns [`PipelineError`] identifying the failed stage. State is
    /// committed per stage, so a later run resumes after the last stage
    /// that completed.
    pub fn run(&self, fresh: bool) -> Result<RunReport, PipelineError> {
        let paths = &self.config.paths;
        let pin = self.config.upstream.upstream_ref.as_str();
        let state_path = paths.state_file();

        if fresh && state_path.exists() {
            std::fs::remove_file(&state_path)
                .map_err(|e| PipelineError::setup(e.into()))?;
        }

        let mut state = match PipelineState::load(&state_path).map_err(PipelineError::setup)? {
            Some(prior) if prior.upstream != pin => {
                return Err(PipelineError::in_stage(
                    Stage::FetchBase,
                    CardstockError::ChecksumMismatch {
                        stage: Stage::FetchBase.as_str().to_owned(),
                        expected: prior.upstream,
                        actual: pin.to_owned(),
                    },
                ));
            }
            Some(prior) => prior,
            None => PipelineState::new(pin),
        };

        let mut report = RunReport::default();
        for stage in Stage::ALL {
            let input = self
                .stage_input_checksum(stage)
                .map_err(|e| PipelineError::in_stage(stage, e))?;
            if state.is_current(stage.as_str(), &input) && self.stage_output_exists(stage) {
                info!(%stage, "inputs unchanged, skipping");
                report.stages.push((stage, StageOutcome::Skipped));
                continue;
            }
            if state.stage(stage.as_str()).is_some() {
                warn!(%stage, "inputs changed since last run, re-running");
            }

            self.run_stage(stage)
                .map_err(|e| PipelineError::in_stage(stage, e))?;
            state.record(stage.as_str(), input);
            state
                .save(&state_path)
                .map_err(|e| PipelineError::in_stage(stage, e))?;
            report.stages.push((stage, StageOutcome::Ran));
            info!(%stage, "stage complete");
        }
        Ok(report)
    }

    /// Checksum of everything a stage consumes.
    fn stage_input_checksum(&self, stage: Stage) -> Result<String, CardstockError> {
        let upstream = &self.config.upstream;
        let paths = &self.config.paths;
        match stage {
            Stage::FetchBase => {
                let artifact = read_if_present(&upstream.artifact)?;
                Ok(combine_checksums(&[
                    upstream.upstream_ref.as_bytes(),
                    &artifact,
                ]))
            }
            Stage::Remap => {
                let decompiled = tree_checksum_or_empty(
                    &upstream.upstream_ref,
                    &paths.decompiled_dir(),
                )?;
                let mappings = read_if_present(&upstream.mappings)?;
                Ok(combine_checksums(&[decompiled.as_bytes(), &mappings]))
            }
            Stage::ApplyApi | Stage::ApplyServer => {
                let domain = stage.domain().unwrap_or(Domain::Api);
                let base = tree_checksum_or_empty(&upstream.upstream_ref, &paths.base_dir())?;
                let stack = PatchStack::load(domain, &paths.stack_dir(domain))?;
                Ok(combine_checksums(&[
                    base.as_bytes(),
                    stack.checksum().as_bytes(),
                ]))
            }
        }
    }

    /// True when the stage's output is still on disk.
    fn stage_output_exists(&self, stage: Stage) -> bool {
        let paths = &self.config.paths;
        match stage {
            Stage::FetchBase => paths.decompiled_dir().is_dir(),
            Stage::Remap => paths.base_dir().is_dir(),
            Stage::ApplyApi | Stage::ApplyServer => stage
                .domain()
                .is_some_and(|d| paths.output_dir(d).is_dir()),
        }
    }

    fn run_stage(&self, stage: Stage) -> Result<(), CardstockError> {
        let upstream = &self.config.upstream;
        let paths = &self.config.paths;
        match stage {
            Stage::FetchBase => self
                .decompiler
                .decompile(&upstream.artifact, &paths.decompiled_dir()),
            Stage::Remap => self.remapper.remap(
                &paths.decompiled_dir(),
                &upstream.mappings,
                &paths.base_dir(),
            ),
            Stage::ApplyApi | Stage::ApplyServer => {
                let domain = stage.domain().unwrap_or(Domain::Api);
                self.apply_stage(domain)
            }
        }
    }

    /// Materialize one domain's stack onto the remapped base, then
    /// compile-check the result when a compiler is configured. Any
    /// conflict fails the stage; the partial tree is left on disk for
    /// inspection but the stage is not recorded as complete.
    fn apply_stage(&self, domain: Domain) -> Result<(), CardstockError> {
        let paths = &self.config.paths;
        let base = BaseTree::load(&self.config.upstream.upstream_ref, &paths.base_dir())?;
        let mut stack = PatchStack::load(domain, &paths.stack_dir(domain))?;
        let out_dir = paths.output_dir(domain);

        let outcome = materialize_to_dir(&base, &mut stack, out_dir, ApplyPolicy::Halt)?;
        if !outcome.is_clean() {
            return Err(CardstockError::ApplyConflict {
                conflicts: outcome.conflicts,
            });
        }
        info!(%domain, applied = outcome.applied, "stack applied cleanly");

        if let Some(compiler) = self.compiler {
            compiler.compile(out_dir)?;
            info!(%domain, "output tree compiles");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// One domain's stack, summarized.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackSummary {
    pub domain: Domain,
    pub patches: usize,
    pub checksum: String,
}

/// A read-only snapshot of pipeline and stack state for reporting.
#[derive(Clone, Debug)]
pub struct StatusReport {
    /// The configured upstream pin.
    pub upstream: String,
    /// The pin the recorded state was taken against, if state exists.
    pub recorded_upstream: Option<String>,
    /// Per-stage completion records, in execution order.
    pub stages: Vec<(Stage, Option<StageRecord>)>,
    /// Per-domain stack summaries.
    pub stacks: Vec<StackSummary>,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "upstream: {}", self.upstream)?;
        if let Some(recorded) = &self.recorded_upstream {
            if recorded != &self.upstream {
                writeln!(f, "  state recorded against {recorded} (fresh run required)")?;
            }
        }
        for stack in &self.stacks {
            writeln!(
                f,
                "{}: {} patch(es) ({})",
                stack.domain,
                stack.patches,
                &stack.checksum[..12.min(stack.checksum.len())]
            )?;
        }
        for (stage, record) in &self.stages {
            match record {
                Some(r) => writeln!(f, "{stage}: complete ({})", &r.input_checksum[..12.min(r.input_checksum.len())])?,
                None => writeln!(f, "{stage}: not run")?,
            }
        }
        Ok(())
    }
}

/// Gather pipeline and stack status without running anything.
///
/// # Errors
/// Fails on unreadable state or malformed patch stacks.
pub fn status(config: &CardstockConfig) -> Result<StatusReport, CardstockError> {
    let state = PipelineState::load(&config.paths.state_file())?;
    let mut stages = Vec::with_capacity(Stage::ALL.len());
    for stage in Stage::ALL {
        let record = state
            .as_ref()
            .and_then(|s| s.stage(stage.as_str()))
            .cloned();
        stages.push((stage, record));
    }
    let mut stacks = Vec::with_capacity(Domain::ALL.len());
    for domain in Domain::ALL {
        let stack = PatchStack::load(domain, &config.paths.stack_dir(domain))?;
        stacks.push(StackSummary {
            domain,
            patches: stack.len(),
            checksum: stack.checksum(),
        });
    }
    Ok(StatusReport {
        upstream: config.upstream.upstream_ref.clone(),
        recorded_upstream: state.map(|s| s.upstream),
        stages,
        stacks,
    })
}

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// File bytes, or empty when the file does not exist yet.
fn read_if_present(path: &Path) -> Result<Vec<u8>, CardstockError> {
    if path.exists() {
        Ok(std::fs::read(path)?)
    } else {
        Ok(Vec::new())
    }
}

/// Tree checksum, or a fixed marker when the directory does not exist yet.
fn tree_checksum_or_empty(version: &str, dir: &Path) -> Result<String, CardstockError> {
    if dir.is_dir() {
        Ok(BaseTree::load(version, dir)?.checksum())
    } else {
        Ok("absent".to_owned())
    }
}

/// SHA-256 over length-prefixed parts, hex encoded.
fn combine_checksums(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(u64::try_from(part.len()).unwrap_or(u64::MAX).to_le_bytes());
        hasher.update(part);
    }
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_are_in_execution_order() {
        assert_eq!(
            Stage::ALL.map(Stage::as_str),
            ["fetch-base", "remap", "apply-api", "apply-server"]
        );
    }

    #[test]
    fn exit_codes_are_distinct() {
        let mut codes: Vec<i32> = Stage::ALL.iter().map(|s| s.exit_code()).collect();
        codes.dedup();
        assert_eq!(codes.len(), Stage::ALL.len());
        assert!(codes.iter().all(|&c| c >= 10));
    }

    #[test]
    fn only_apply_stages_have_domains() {
        assert_eq!(Stage::FetchBase.domain(), None);
        assert_eq!(Stage::Remap.domain(), None);
        assert_eq!(Stage::ApplyApi.domain(), Some(Domain::Api));
        assert_eq!(Stage::ApplyServer.domain(), Some(Domain::Server));
    }

    #[test]
    fn combine_checksums_is_order_sensitive() {
        let ab = combine_checksums(&[b"a", b"b"]);
        let ba = combine_checksums(&[b"b", b"a"]);
        assert_ne!(ab, ba);
    }

    #[test]
    fn combine_checksums_distinguishes_boundaries() {
        // "ab" + "" must not collide with "a" + "b".
        let joined = combine_checksums(&[b"ab", b""]);
        let split = combine_checksums(&[b"a", b"b"]);
        assert_ne!(joined, split);
    }

    #[test]
    fn pipeline_error_exit_codes() {
        let staged = PipelineError::in_stage(
            Stage::Remap,
            CardstockError::Io(std::io::Error::other("x")),
        );
        assert_eq!(staged.exit_code(), 11);
        let setup = PipelineError::setup(CardstockError::Io(std::io::Error::other("x")));
        assert_eq!(setup.exit_code(), 1);
    }
}

//! cardstock command-line interface.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use cardstock::config::CardstockConfig;
use cardstock::error::CardstockError;
use cardstock::extract::{amend_trailing, diff_trees};
use cardstock::materialize::{self, materialize_to_dir, ApplyPolicy};
use cardstock::model::patch::PatchId;
use cardstock::model::stack::{Domain, PatchStack};
use cardstock::model::tree::{BaseTree, WorkingTree};
use cardstock::pipeline::{self, Pipeline, PipelineError, StageOutcome};
use cardstock::rebase::{RebaseCoordinator, RebaseState};
use cardstock::telemetry;
use cardstock::tools::{Compiler, ProcessCompiler, ProcessDecompiler, ProcessRemapper};

/// Patch-layer build tool for the cardstock fork.
///
/// Maintains the fork's changes as ordered patch stacks per domain and
/// drives the decompile → remap → apply pipeline that turns the pinned
/// upstream into the fork's source trees.
#[derive(Debug, Parser)]
#[command(name = "cardstock", version, about, max_term_width = 100)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true, default_value = "cardstock.toml", env = "CARDSTOCK_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Materialize a domain's patch stack onto the remapped base tree.
    ///
    /// Applies every patch in order and writes the result to the domain's
    /// output directory. By default the run halts at the first conflicted
    /// patch; later patches are left unapplied so the operator faces one
    /// problem at a time.
    Apply {
        /// Domain to materialize (api or server).
        domain: Domain,

        /// Keep applying later patches after a conflict instead of
        /// halting. The partial tree and every conflict are still
        /// reported.
        #[arg(long)]
        keep_going: bool,
    },

    /// Capture edits made to an output tree as a patch.
    ///
    /// Diffs the domain's output tree against what the current stack
    /// produces and appends the difference as a new trailing patch — or,
    /// with --amend, folds it into the existing trailing patch.
    Extract {
        /// Domain to extract from (api or server).
        domain: Domain,

        /// Fold the edits into the trailing patch instead of creating a
        /// new one.
        #[arg(long, conflicts_with_all = ["id", "message"])]
        amend: bool,

        /// Identifier for the new patch (lowercase, digits, hyphens).
        #[arg(long, required_unless_present = "amend")]
        id: Option<PatchId>,

        /// One-line description recorded in the patch header.
        #[arg(long, default_value = "")]
        message: String,
    },

    /// Rebase a domain's stack onto a new base tree.
    ///
    /// Replays each patch in order against the new base, regenerating
    /// drifted hunks. On conflict the run stops, reports the failing
    /// patch, and leaves the stack on disk untouched; the partially
    /// rebased tree is written to the output directory for inspection.
    /// The stack is replaced only when every patch lands.
    Rebase {
        /// Domain to rebase (api or server).
        domain: Domain,

        /// Directory containing the new base tree.
        new_base: PathBuf,
    },

    /// Show pipeline progress and stack sizes.
    Status,

    /// Run the build pipeline, resuming from recorded state.
    ///
    /// Stages whose inputs are unchanged since their last completed run
    /// are skipped. A failure halts the run with an exit code naming the
    /// stage (10 fetch-base, 11 remap, 12 apply-api, 13 apply-server).
    Run {
        /// Discard recorded state and run every stage. Required after the
        /// upstream pin changes.
        #[arg(long)]
        fresh: bool,
    },
}

fn main() -> ExitCode {
    telemetry::init("cardstock=info");
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

/// Map errors to process exit codes: pipeline failures identify their
/// stage, conflicts are 2, everything else is 1.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(pipeline_err) = err.downcast_ref::<PipelineError>() {
        return u8::try_from(pipeline_err.exit_code()).unwrap_or(1);
    }
    match err.downcast_ref::<CardstockError>() {
        Some(CardstockError::ApplyConflict { .. }) => 2,
        _ => 1,
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = CardstockConfig::load(&cli.config).map_err(CardstockError::from)?;
    match cli.command {
        Command::Apply { domain, keep_going } => cmd_apply(&config, domain, keep_going),
        Command::Extract {
            domain,
            amend,
            id,
            message,
        } => cmd_extract(&config, domain, amend, id, &message),
        Command::Rebase { domain, new_base } => cmd_rebase(&config, domain, &new_base),
        Command::Status => cmd_status(&config),
        Command::Run { fresh } => cmd_run(&config, fresh),
    }
}

/// Load the remapped base tree, with a hint when the pipeline has not
/// produced one yet.
fn load_base(config: &CardstockConfig) -> Result<BaseTree> {
    let base_dir = config.paths.base_dir();
    if !base_dir.is_dir() {
        bail!(
            "no base tree at '{}'; run the pipeline first:\n    cardstock run",
            base_dir.display()
        );
    }
    BaseTree::load(&config.upstream.upstream_ref, &base_dir)
        .with_context(|| format!("loading base tree from '{}'", base_dir.display()))
}

fn load_stack(config: &CardstockConfig, domain: Domain) -> Result<PatchStack> {
    let dir = config.paths.stack_dir(domain);
    Ok(PatchStack::load(domain, &dir)?)
}

fn cmd_apply(config: &CardstockConfig, domain: Domain, keep_going: bool) -> Result<()> {
    let base = load_base(config)?;
    let mut stack = load_stack(config, domain)?;
    let policy = if keep_going {
        ApplyPolicy::Continue
    } else {
        ApplyPolicy::Halt
    };
    let out_dir = config.paths.output_dir(domain);

    let outcome = materialize_to_dir(&base, &mut stack, out_dir, policy)?;
    if !outcome.is_clean() {
        return Err(CardstockError::ApplyConflict {
            conflicts: outcome.conflicts,
        }
        .into());
    }
    println!(
        "{domain}: {} patch(es) applied to {}",
        outcome.applied,
        out_dir.display()
    );
    Ok(())
}

fn cmd_extract(
    config: &CardstockConfig,
    domain: Domain,
    amend: bool,
    id: Option<PatchId>,
    message: &str,
) -> Result<()> {
    let base = load_base(config)?;
    let out_dir = config.paths.output_dir(domain);
    if !out_dir.is_dir() {
        bail!(
            "no output tree at '{}'; apply the stack first:\n    cardstock apply {domain}",
            out_dir.display()
        );
    }
    let working = WorkingTree::load(out_dir)?;
    let mut stack = load_stack(config, domain)?;
    let stack_dir = config.paths.stack_dir(domain);

    if amend {
        let amended = amend_trailing(&base, &stack, &working)?;
        amended.save(&stack_dir)?;
        println!("{domain}: trailing patch regenerated ({} patch(es))", amended.len());
        return Ok(());
    }

    // The diff baseline is what the current stack already produces; the
    // new patch captures only the edits beyond it.
    let outcome = materialize::apply(&base, &mut stack, None, ApplyPolicy::Halt);
    if !outcome.is_clean() {
        return Err(CardstockError::ApplyConflict {
            conflicts: outcome.conflicts,
        }
        .into());
    }
    let id = id.context("--id is required when not amending")?;
    match diff_trees(outcome.tree.files(), working.files(), id, message) {
        Some(patch) => {
            info!(%domain, id = %patch.id, files = patch.files.len(), "extracted patch");
            stack.append(patch);
            stack.save(&stack_dir)?;
            println!("{domain}: patch extracted ({} patch(es) in stack)", stack.len());
        }
        None => println!("{domain}: no changes to extract"),
    }
    Ok(())
}

fn cmd_rebase(config: &CardstockConfig, domain: Domain, new_base_dir: &std::path::Path) -> Result<()> {
    if !new_base_dir.is_dir() {
        bail!("new base '{}' is not a directory", new_base_dir.display());
    }
    let new_base = BaseTree::load(&config.upstream.upstream_ref, new_base_dir)
        .with_context(|| format!("loading new base from '{}'", new_base_dir.display()))?;
    let stack = load_stack(config, domain)?;
    let total = stack.len();

    let mut coordinator = RebaseCoordinator::new(&new_base, stack);
    match coordinator.run() {
        RebaseState::Complete => {
            let rebased = coordinator.finish()?;
            rebased.save(&config.paths.stack_dir(domain))?;
            println!(
                "{domain}: {total} patch(es) rebased, {} survived",
                rebased.len()
            );
            Ok(())
        }
        RebaseState::Conflicted(i) => {
            // Leave the stack untouched; write the partial tree so the
            // operator can see where replay stopped.
            let conflicts = coordinator.conflicts().to_vec();
            let out_dir = config.paths.output_dir(domain);
            coordinator.working_tree().write_to(out_dir)?;
            eprintln!(
                "{domain}: patch {} of {total} did not apply; partial tree written to {}",
                i + 1,
                out_dir.display()
            );
            Err(CardstockError::ApplyConflict { conflicts }.into())
        }
        state => bail!("rebase stopped unexpectedly in state {state:?}"),
    }
}

fn cmd_status(config: &CardstockConfig) -> Result<()> {
    let report = pipeline::status(config)?;
    print!("{report}");
    Ok(())
}

fn cmd_run(config: &CardstockConfig, fresh: bool) -> Result<()> {
    let decompiler = ProcessDecompiler::new(config.tools.decompiler.clone());
    let remapper = ProcessRemapper::new(config.tools.remapper.clone());
    let compiler = (!config.tools.compiler.is_empty())
        .then(|| ProcessCompiler::new(config.tools.compiler.clone()));

    let pipeline = Pipeline::new(
        config,
        &decompiler,
        &remapper,
        compiler.as_ref().map(|c| c as &dyn Compiler),
    );
    let report = pipeline.run(fresh)?;
    for (stage, outcome) in &report.stages {
        let verb = match outcome {
            StageOutcome::Ran => "ran",
            StageOutcome::Skipped => "skipped (inputs unchanged)",
        };
        println!("{stage}: {verb}");
    }
    Ok(())
}

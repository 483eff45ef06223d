/// # tis-extract CLI Interface (Module)
///
/// Command parsing and orchestration for the `tis-extract` binary.
///
/// All traversal, extraction and validation logic lives in the
/// [`tis-extract-core`] crate. This module loads the config, wires the HTTP
/// client into a [`Traversal`], turns Ctrl-C into cancellation and writes the
/// results to disk.
///
/// ## Subcommands
/// - `run`: traverse the tree and write the JSON result snapshot. With
///   `--resume` the projects a checkpoint marks as finished are taken over
///   instead of traversed again.
/// - `check-config`: compile all filters and conventions without touching the API.
///
/// For programmatic and integration use call [`run`] with a constructed [`Cli`].
///
/// [`tis-extract-core`]: ../../tis-extract-core/
use crate::load_config::load_config;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tis_extract_core::checkpoint::Checkpoint;
use tis_extract_core::http::HttpTreeApi;
use tis_extract_core::traverse::{compile_config, RunState, Traversal, TraversalOutcome};

/// CLI for tis-extract: collect and check the latest TIS artifacts.
#[derive(Parser)]
#[clap(
    name = "tis-extract",
    version,
    about = "Traverse the TIS component tree and extract the latest artifact of every software line"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Traverse the tree and write the result snapshot
    Run {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Output file for the JSON snapshot, overrides `output.path`
        #[clap(long)]
        output: Option<PathBuf>,
        /// Checkpoint written by an earlier run to continue from
        #[clap(long)]
        resume: Option<PathBuf>,
    },
    /// Validate the config file without contacting the API
    CheckConfig {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Run {
            config,
            output,
            resume,
        } => {
            let config = load_config(config)?;
            tracing::info!(command = "run", resume = ?resume, "Starting traversal");

            let api = HttpTreeApi::new(&config.extractor.api)
                .map_err(|e| anyhow::anyhow!("Failed to construct TIS client: {e}"))?;
            let mut traversal = Traversal::from_config(Arc::new(api), &config.extractor)?;
            if let Some(path) = &resume {
                let checkpoint = Checkpoint::read_json(path)
                    .map_err(|e| anyhow::anyhow!("Failed to read checkpoint {:?}: {e}", path))?;
                traversal = traversal.resume_from(checkpoint);
            }

            let handle = traversal.handle();
            let interrupt = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupt received, cancelling traversal");
                    handle.cancel();
                }
            });
            let result = traversal.run().await;
            interrupt.abort();
            let outcome = result?;

            let output_path = output.unwrap_or_else(|| config.output.path.clone());
            outcome.result.write_json(&output_path)?;
            tracing::info!(command = "run", output = ?output_path, "Result snapshot written");
            if let Some(report_path) = &config.output.report {
                write_report(&outcome, report_path)?;
            }
            if let Some(checkpoint_path) = &config.output.checkpoint {
                outcome.checkpoint().write_json(checkpoint_path)?;
            }

            report(&outcome);
            outcome.check()?;
            Ok(())
        }
        Commands::CheckConfig { config } => {
            let config = load_config(config)?;
            match compile_config(&config.extractor) {
                Ok((filter, registry)) => {
                    tracing::info!(
                        command = "check-config",
                        reference_time = %filter.reference_time(),
                        components = ?registry.component_names().collect::<Vec<_>>(),
                        naming = registry.naming_enabled(),
                        paths = registry.path_enabled(),
                        "Config is valid"
                    );
                    Ok(())
                }
                Err(e) => {
                    tracing::error!(command = "check-config", error = %e, "Config is invalid");
                    Err(e.into())
                }
            }
        }
    }
}

fn write_report(outcome: &TraversalOutcome, path: &Path) -> Result<()> {
    let json = serde_json::to_vec_pretty(outcome)?;
    fs::write(path, json)
        .map_err(|e| anyhow::anyhow!("Failed to write run report {:?}: {}", path, e))?;
    tracing::info!(report = ?path, "Run report written");
    Ok(())
}

fn report(outcome: &TraversalOutcome) {
    for failure in &outcome.failures {
        tracing::warn!(
            node_id = %failure.node_id,
            path = %failure.path,
            kind = ?failure.kind,
            message = %failure.message,
            "Branch not traversed"
        );
    }
    for ambiguity in &outcome.ambiguities {
        tracing::info!(
            project = %ambiguity.project,
            software_line = %ambiguity.software_line,
            pver = %ambiguity.pver,
            artifacts = ?ambiguity.artifact_rids,
            "Several artifacts share a PVER"
        );
    }
    let summary = outcome.result.deviation_summary();
    tracing::info!(
        run_id = %outcome.run_id,
        state = ?outcome.state,
        projects = outcome.result.projects.len(),
        artifacts = outcome.result.artifact_count(),
        deviations = ?summary.by_type,
        cache_efficiency = outcome.stats.cache_efficiency,
        "Run summary"
    );
    if outcome.state == RunState::Aborted {
        tracing::warn!(
            levels_completed = outcome.levels_completed,
            completed_projects = outcome.completed_projects.len(),
            "Run was cancelled, only the completed levels and projects are whole"
        );
    }
}

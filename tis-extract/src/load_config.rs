/// `load_config` module: reads the YAML run configuration for the CLI.
///
/// The file has two sections:
/// - `extractor`: passed unchanged to the core as [`ExtractorConfig`]. Every key
///   has a default, so an empty section is a valid (if unfiltered) run.
/// - `output`: where the CLI writes the result snapshot, the run report and
///   the checkpoint a later `run --resume` continues from.
///
/// Secrets never live in the file. The API token is read from the environment
/// variable named by `extractor.api.token_env`, and `.env` files are loaded by
/// `main` before this runs.
///
/// # Errors
/// Read and parse failures are returned as `anyhow::Error` with the path or
/// the YAML error in the message, and are surfaced at the CLI boundary.
use anyhow::Result;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tis_extract_core::config::ExtractorConfig;
use tracing::{error, info};

#[derive(Debug, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub output: OutputSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputSection {
    /// JSON snapshot of the result model.
    #[serde(default = "default_output_path")]
    pub path: PathBuf,
    /// Optional JSON report with run id, state, failures, ambiguities and statistics.
    #[serde(default)]
    pub report: Option<PathBuf>,
    /// Optional checkpoint: the snapshot plus the ids of fully traversed projects.
    #[serde(default)]
    pub checkpoint: Option<PathBuf>,
}

impl Default for OutputSection {
    fn default() -> Self {
        OutputSection {
            path: default_output_path(),
            report: None,
            checkpoint: None,
        }
    }
}

fn default_output_path() -> PathBuf {
    PathBuf::from("tis_artifacts.json")
}

/// Loads the YAML config file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let config: CliConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    if config.extractor.api.root_id.is_empty() {
        error!(config_path = ?path_ref, "extractor.api.root_id is not set");
        return Err(anyhow::anyhow!(
            "Config {:?} does not set extractor.api.root_id",
            path_ref
        ));
    }

    config.extractor.trace_loaded();
    Ok(config)
}

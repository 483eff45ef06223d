//! Configuration surface consumed by the engine.
//!
//! Parsing the file is the entry layer's job. These types only carry the
//! semantics, with defaults for every section so a minimal config only has to
//! name the API base URL and the root node.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub api: ApiConfig,
    pub retry: RetryConfig,
    pub traversal: TraversalConfig,
    pub artifact_filters: ArtifactFilterConfig,
    pub branch_pruning: BranchPruningConfig,
    pub naming_convention: NamingConventionConfig,
    pub path_convention: PathConventionConfig,
}

impl ExtractorConfig {
    pub fn trace_loaded(&self) {
        info!(
            base_url = %self.api.base_url,
            root_id = %self.api.root_id,
            workers = self.traversal.workers,
            max_retries = self.retry.max_retries,
            skip_patterns = self.branch_pruning.skip_patterns.len(),
            naming_patterns = self.naming_convention.patterns.len(),
            path_templates = self.path_convention.expected_structure.len(),
            "Loaded ExtractorConfig"
        );
        debug!(config = ?self, "ExtractorConfig loaded (full debug)");
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL the node identifier is appended to, usually ending in `/`.
    pub base_url: String,
    pub root_id: String,
    /// How many levels below the requested node a response reaches.
    pub children_level: u32,
    /// Lower `children_level` for a node after it timed out or answered slowly.
    pub adaptive_depth: bool,
    /// Responses slower than this count as slow for `adaptive_depth`.
    pub slow_response_ms: u64,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    /// Name of the environment variable holding a bearer token, if the API needs one.
    pub token_env: Option<String>,
    /// Browsable link for an artifact, `{rid}` is replaced by the artifact id.
    pub link_template: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            root_id: String::new(),
            children_level: 1,
            adaptive_depth: true,
            slow_response_ms: 5_000,
            connect_timeout_secs: 15,
            read_timeout_secs: 60,
            token_env: None,
            link_template: None,
        }
    }
}

impl ApiConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn slow_response(&self) -> Duration {
        Duration::from_millis(self.slow_response_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub retry_status_codes: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            backoff_multiplier: 2.0,
            retry_status_codes: vec![429, 500, 502, 503, 504],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalConfig {
    pub workers: usize,
    pub failure_policy: FailurePolicy,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            failure_policy: FailurePolicy::RootOnly,
        }
    }
}

/// When a branch failure turns the whole run into `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Only a failed root fetch is fatal.
    #[default]
    RootOnly,
    /// The first branch failure is fatal.
    FailFast,
    /// Fatal once more than this many branches have failed.
    Threshold(usize),
}

/// Keep/skip criteria for artifact nodes. Empty lists disable the criterion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactFilterConfig {
    pub component_type: Vec<String>,
    pub component_name: Vec<String>,
    pub component_grp: Option<String>,
    pub life_cycle_status: Vec<String>,
    pub skip_deleted: bool,
}

impl Default for ArtifactFilterConfig {
    fn default() -> Self {
        Self {
            component_type: Vec::new(),
            component_name: Vec::new(),
            component_grp: None,
            life_cycle_status: Vec::new(),
            skip_deleted: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BranchPruningConfig {
    pub include_projects: Vec<String>,
    pub include_software_lines: Vec<String>,
    pub skip_projects: Vec<String>,
    pub skip_folders: Vec<String>,
    pub skip_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConventionConfig {
    pub enabled: bool,
    /// Component name to naming rule. Overrides the built-in rule of the same name.
    pub patterns: BTreeMap<String, NamingPatternConfig>,
}

impl Default for NamingConventionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            patterns: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamingPatternConfig {
    pub pattern: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub example: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConventionConfig {
    pub enabled: bool,
    /// Component name to path template such as `{Project}/{SoftwareLine}/Model/HiL/{CSP_SWB}/.../{artifact}`.
    pub expected_structure: BTreeMap<String, String>,
    /// Component name to the folders allowed directly below `Model`.
    pub model_subfolders: BTreeMap<String, Vec<String>>,
    /// Template variable to the values it may take.
    pub variable_values: BTreeMap<String, AllowedValuesConfig>,
    pub labcar_platforms: Vec<String>,
}

impl Default for PathConventionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            expected_structure: BTreeMap::new(),
            model_subfolders: BTreeMap::new(),
            variable_values: BTreeMap::new(),
            labcar_platforms: vec!["VME".to_string(), "PCIe".to_string()],
        }
    }
}

/// Allowed values of a template variable. `exact` entries must equal the
/// segment, `contains` entries must occur in it. Both compare case-insensitively.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AllowedValuesConfig {
    pub exact: Vec<String>,
    pub contains: Vec<String>,
}

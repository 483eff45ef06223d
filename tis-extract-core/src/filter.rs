//! Keep/skip/prune decisions for tree nodes.
//!
//! [`FilterEngine::classify`] is a pure function of the engine's
//! configuration and the node. The reference time used for deletion checks
//! is fixed when the engine is built, so classifying the same node twice
//! always gives the same answer.

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use tracing::debug;

use crate::config::{ArtifactFilterConfig, BranchPruningConfig};
use crate::error::PatternError;
use crate::model::{NodeKind, TreeNode};
use crate::timestamps;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Keep,
    Skip,
    PruneSubtree,
}

/// Level of project folders below the root.
pub const PROJECT_LEVEL: usize = 1;
/// Level of software line folders below the root.
pub const SOFTWARE_LINE_LEVEL: usize = 2;

#[derive(Debug)]
pub struct FilterEngine {
    component_types: Vec<String>,
    component_names: Vec<String>,
    component_grp: Option<String>,
    life_cycle_statuses: Vec<String>,
    skip_deleted: bool,
    include_projects: Vec<String>,
    include_software_lines: Vec<String>,
    skip_projects: Vec<String>,
    skip_folders: Vec<Regex>,
    reference_time: DateTime<Utc>,
}

impl FilterEngine {
    pub fn new(
        artifacts: &ArtifactFilterConfig,
        pruning: &BranchPruningConfig,
        reference_time: DateTime<Utc>,
    ) -> Result<Self, PatternError> {
        let mut skip_folders = Vec::new();
        for folder in &pruning.skip_folders {
            let pattern = format!("^{}$", regex::escape(folder));
            skip_folders.push(compile(&pattern, "skip_folders")?);
        }
        for pattern in &pruning.skip_patterns {
            skip_folders.push(compile(&format!("^(?:{pattern})"), "skip_patterns")?);
        }

        Ok(FilterEngine {
            component_types: artifacts.component_type.clone(),
            component_names: artifacts.component_name.clone(),
            component_grp: artifacts.component_grp.clone().filter(|g| !g.is_empty()),
            life_cycle_statuses: artifacts
                .life_cycle_status
                .iter()
                .map(|s| s.to_ascii_lowercase())
                .collect(),
            skip_deleted: artifacts.skip_deleted,
            include_projects: pruning.include_projects.clone(),
            include_software_lines: pruning.include_software_lines.clone(),
            skip_projects: pruning.skip_projects.clone(),
            skip_folders,
            reference_time,
        })
    }

    pub fn reference_time(&self) -> DateTime<Utc> {
        self.reference_time
    }

    pub fn classify(&self, node: &TreeNode) -> Decision {
        match node.kind {
            NodeKind::Artifact => self.classify_artifact(node),
            NodeKind::Folder | NodeKind::Component => self.classify_branch(node),
        }
    }

    fn classify_branch(&self, node: &TreeNode) -> Decision {
        if node.level == PROJECT_LEVEL {
            if self
                .skip_projects
                .iter()
                .any(|p| p == &node.id || p == &node.name)
            {
                debug!(project = %node.name, "Project on skip list");
                return Decision::PruneSubtree;
            }
            if !self.include_projects.is_empty() && !self.include_projects.contains(&node.name) {
                debug!(project = %node.name, "Project not on include list");
                return Decision::PruneSubtree;
            }
        }
        if node.level == SOFTWARE_LINE_LEVEL
            && !self.include_software_lines.is_empty()
            && !self.include_software_lines.contains(&node.name)
        {
            debug!(software_line = %node.name, "Software line not on include list");
            return Decision::PruneSubtree;
        }
        if node.level > 0 && self.skip_folders.iter().any(|re| re.is_match(&node.name)) {
            debug!(folder = %node.name, level = node.level, "Folder matches skip pattern");
            return Decision::PruneSubtree;
        }
        Decision::Keep
    }

    fn classify_artifact(&self, node: &TreeNode) -> Decision {
        let component = &node.component;
        if !self.component_types.is_empty()
            && !matches_any(&self.component_types, component.component_type.as_deref())
        {
            return Decision::Skip;
        }
        if !self.component_names.is_empty()
            && !matches_any(&self.component_names, component.component_name.as_deref())
        {
            return Decision::Skip;
        }
        if let Some(grp) = &self.component_grp {
            if component.component_grp.as_deref() != Some(grp.as_str()) {
                return Decision::Skip;
            }
        }
        if !self.life_cycle_statuses.is_empty() {
            let status = node
                .attributes
                .get_str("lifeCycleStatus")
                .map(|s| s.trim().to_ascii_lowercase());
            match status {
                Some(s) if self.life_cycle_statuses.contains(&s) => {}
                _ => return Decision::Skip,
            }
        }
        if self.skip_deleted && self.is_deleted(node) {
            return Decision::Skip;
        }
        Decision::Keep
    }

    fn is_deleted(&self, node: &TreeNode) -> bool {
        node.attributes
            .get("tisFileDeletedDate")
            .and_then(timestamps::parse_value)
            .is_some_and(|deleted| deleted < self.reference_time)
    }
}

fn matches_any(allowed: &[String], value: Option<&str>) -> bool {
    value.is_some_and(|v| allowed.iter().any(|a| a == v))
}

fn compile(pattern: &str, context: &str) -> Result<Regex, PatternError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| PatternError::new(format!("{context} '{pattern}'"), e))
}

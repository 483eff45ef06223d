//! Result aggregation.
//!
//! [`ResultModel`] is the shared, concurrently mutated project → software
//! line → artifact structure populated while a run is in progress. Each
//! project is locked on its own (dashmap shard), so workers filing artifacts
//! into different projects never wait for each other. Once the run ends the
//! model is finalized into an immutable [`ResultSnapshot`], the only thing
//! reporting layers ever see.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::PersistError;
use crate::model::{ArtifactRecord, DeviationType};
use crate::registry::ComponentRegistry;

/// Artifacts of one software line in discovery order, plus the derived latest one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(into = "SoftwareLineWire", from = "SoftwareLineWire")]
pub struct SoftwareLineEntry {
    pub software_line_rid: String,
    artifacts: Vec<ArtifactRecord>,
    latest: Option<usize>,
}

impl SoftwareLineEntry {
    pub fn new(software_line_rid: impl Into<String>) -> Self {
        SoftwareLineEntry {
            software_line_rid: software_line_rid.into(),
            artifacts: Vec::new(),
            latest: None,
        }
    }

    pub fn artifacts(&self) -> &[ArtifactRecord] {
        &self.artifacts
    }

    /// The artifact with the greatest creation timestamp. Ties go to the one discovered last.
    pub fn latest(&self) -> Option<&ArtifactRecord> {
        self.latest.and_then(|i| self.artifacts.get(i))
    }

    pub fn contains(&self, artifact_rid: &str) -> bool {
        self.artifacts.iter().any(|a| a.artifact_rid == artifact_rid)
    }

    /// Appends an artifact, returning whether it became the latest. Duplicate ids are ignored.
    pub fn push(&mut self, record: ArtifactRecord) -> Option<bool> {
        if self.contains(&record.artifact_rid) {
            return None;
        }
        let becomes_latest = match self.latest() {
            Some(current) => record.created >= current.created,
            None => true,
        };
        self.artifacts.push(record);
        if becomes_latest {
            self.latest = Some(self.artifacts.len() - 1);
        }
        Some(becomes_latest)
    }

    pub fn recompute_latest(&mut self) {
        self.latest = self
            .artifacts
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.created.cmp(&b.created))
            .map(|(i, _)| i);
    }
}

#[derive(Serialize, Deserialize)]
struct SoftwareLineWire {
    software_line_rid: String,
    #[serde(default)]
    latest_artifact: Option<ArtifactRecord>,
    #[serde(default)]
    artifacts: Vec<ArtifactRecord>,
}

impl From<SoftwareLineEntry> for SoftwareLineWire {
    fn from(entry: SoftwareLineEntry) -> Self {
        SoftwareLineWire {
            latest_artifact: entry.latest().cloned(),
            software_line_rid: entry.software_line_rid,
            artifacts: entry.artifacts,
        }
    }
}

impl From<SoftwareLineWire> for SoftwareLineEntry {
    fn from(wire: SoftwareLineWire) -> Self {
        let mut entry = SoftwareLineEntry {
            software_line_rid: wire.software_line_rid,
            artifacts: wire.artifacts,
            latest: None,
        };
        entry.recompute_latest();
        entry
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectNode {
    pub project_rid: String,
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub software_lines: BTreeMap<String, SoftwareLineEntry>,
}

/// What happened to an artifact handed to [`ResultModel::insert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted { became_latest: bool },
    /// Already filed under this software line.
    Duplicate,
    /// Already filed under another software line, which keeps it.
    OwnedElsewhere { project: String, software_line: String },
}

#[derive(Debug, Default)]
pub struct ResultModel {
    projects: DashMap<String, ProjectNode>,
    owners: DashMap<String, (String, String)>,
}

impl ResultModel {
    pub fn new() -> Self {
        ResultModel::default()
    }

    pub fn register_project(&self, project_rid: &str, project_name: &str) {
        self.projects
            .entry(project_name.to_string())
            .or_insert_with(|| ProjectNode {
                project_rid: project_rid.to_string(),
                project_name: project_name.to_string(),
                software_lines: BTreeMap::new(),
            });
    }

    pub fn register_software_line(&self, project_name: &str, line_rid: &str, line_name: &str) {
        if let Some(mut project) = self.projects.get_mut(project_name) {
            project
                .software_lines
                .entry(line_name.to_string())
                .or_insert_with(|| SoftwareLineEntry::new(line_rid));
        } else {
            warn!(project = project_name, software_line = line_name, "Software line for unregistered project");
        }
    }

    /// Files an artifact under its software line. The first line to claim an artifact id keeps it.
    pub fn insert(&self, project_name: &str, line_name: &str, record: ArtifactRecord) -> InsertOutcome {
        match self.owners.entry(record.artifact_rid.clone()) {
            Entry::Occupied(owner) => {
                let (project, software_line) = owner.get().clone();
                if project == project_name && software_line == line_name {
                    return InsertOutcome::Duplicate;
                }
                warn!(
                    artifact_rid = %record.artifact_rid,
                    owner_project = %project,
                    owner_line = %software_line,
                    "Artifact already filed under another software line"
                );
                return InsertOutcome::OwnedElsewhere {
                    project,
                    software_line,
                };
            }
            Entry::Vacant(slot) => {
                slot.insert((project_name.to_string(), line_name.to_string()));
            }
        }

        let mut project = self
            .projects
            .entry(project_name.to_string())
            .or_insert_with(|| ProjectNode {
                project_name: project_name.to_string(),
                ..Default::default()
            });
        let line = project
            .software_lines
            .entry(line_name.to_string())
            .or_default();
        match line.push(record) {
            Some(became_latest) => InsertOutcome::Inserted { became_latest },
            None => InsertOutcome::Duplicate,
        }
    }

    /// Takes over a project finished by an earlier run. Returns how many
    /// of its artifacts were filed.
    pub fn restore_project(&self, project: &ProjectNode) -> usize {
        self.register_project(&project.project_rid, &project.project_name);
        let mut restored = 0;
        for (line_name, line) in &project.software_lines {
            self.register_software_line(&project.project_name, &line.software_line_rid, line_name);
            for record in line.artifacts() {
                if let InsertOutcome::Inserted { .. } =
                    self.insert(&project.project_name, line_name, record.clone())
                {
                    restored += 1;
                }
            }
        }
        debug!(project = %project.project_name, restored, "Project restored from checkpoint");
        restored
    }

    pub fn artifact_count(&self) -> usize {
        self.owners.len()
    }

    /// Read-only copy of the current state.
    pub fn snapshot(&self) -> ResultSnapshot {
        ResultSnapshot {
            projects: self
                .projects
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
        }
    }

    pub fn finalize(self) -> ResultSnapshot {
        ResultSnapshot {
            projects: self.projects.into_iter().collect(),
        }
    }
}

/// Software lines holding more than one artifact with the same PVER.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PverAmbiguity {
    pub project: String,
    pub software_line: String,
    pub pver: String,
    pub artifact_rids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviationSummary {
    pub by_type: BTreeMap<DeviationType, usize>,
    pub by_user: BTreeMap<String, BTreeMap<DeviationType, usize>>,
}

/// Finalized project → software line → artifact model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultSnapshot {
    pub projects: BTreeMap<String, ProjectNode>,
}

impl ResultSnapshot {
    pub fn project(&self, name: &str) -> Option<&ProjectNode> {
        self.projects.get(name)
    }

    pub fn software_line(&self, project: &str, line: &str) -> Option<&SoftwareLineEntry> {
        self.projects.get(project)?.software_lines.get(line)
    }

    pub fn latest(&self, project: &str, line: &str) -> Option<&ArtifactRecord> {
        self.software_line(project, line)?.latest()
    }

    /// Every artifact with its project and software line names.
    pub fn artifacts(&self) -> impl Iterator<Item = (&str, &str, &ArtifactRecord)> {
        self.projects.iter().flat_map(|(project, node)| {
            node.software_lines.iter().flat_map(move |(line, entry)| {
                entry
                    .artifacts()
                    .iter()
                    .map(move |a| (project.as_str(), line.as_str(), a))
            })
        })
    }

    pub fn artifact_count(&self) -> usize {
        self.artifacts().count()
    }

    pub fn deviation_summary(&self) -> DeviationSummary {
        let mut summary = DeviationSummary::default();
        for (_, _, artifact) in self.artifacts() {
            let kind = artifact.deviation.kind;
            *summary.by_type.entry(kind).or_default() += 1;
            let user = artifact.user.clone().unwrap_or_else(|| "unknown".to_string());
            *summary.by_user.entry(user).or_default().entry(kind).or_default() += 1;
        }
        summary
    }

    /// Groups of artifacts sharing a PVER within one software line. Never resolved automatically.
    pub fn pver_ambiguities(&self, registry: &ComponentRegistry) -> Vec<PverAmbiguity> {
        let mut ambiguities = Vec::new();
        for (project, node) in &self.projects {
            for (line, entry) in &node.software_lines {
                let mut by_pver: BTreeMap<&str, Vec<String>> = BTreeMap::new();
                for artifact in entry.artifacts() {
                    let pver = registry
                        .lookup(&artifact.component_name)
                        .and_then(|profile| profile.pver_field.as_deref())
                        .and_then(|field| artifact.field(field));
                    if let Some(pver) = pver {
                        by_pver
                            .entry(pver)
                            .or_default()
                            .push(artifact.artifact_rid.clone());
                    }
                }
                ambiguities.extend(by_pver.into_iter().filter(|(_, rids)| rids.len() > 1).map(
                    |(pver, artifact_rids)| PverAmbiguity {
                        project: project.clone(),
                        software_line: line.clone(),
                        pver: pver.to_string(),
                        artifact_rids,
                    },
                ));
            }
        }
        ambiguities
    }

    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<(), PersistError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|source| PersistError::Io {
            path: path.display().to_string(),
            source,
        })?;
        info!(path = %path.display(), projects = self.projects.len(), "Result snapshot written");
        Ok(())
    }

    pub fn read_json<P: AsRef<Path>>(path: P) -> Result<Self, PersistError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| PersistError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let snapshot: ResultSnapshot = serde_json::from_str(&content)?;
        debug!(path = %path.display(), projects = snapshot.projects.len(), "Result snapshot read");
        Ok(snapshot)
    }
}

//! Resume data for an interrupted run.
//!
//! A [`Checkpoint`] is the result snapshot of a run together with the ids of
//! the projects whose subtrees that run expanded completely. A new run seeded
//! with it through [`crate::traverse::Traversal::resume_from`] copies those
//! projects into its own result and never requests anything below them.
//! Every other project is traversed again from scratch.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::aggregate::{ProjectNode, ResultSnapshot};
use crate::error::PersistError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub result: ResultSnapshot,
    /// Project ids whose whole subtree was expanded without a failure.
    pub completed_projects: BTreeSet<String>,
}

impl Checkpoint {
    pub fn is_complete(&self, project_rid: &str) -> bool {
        self.completed_projects.contains(project_rid)
    }

    /// The finished project with id `project_rid`, if this checkpoint holds one.
    pub fn completed_project(&self, project_rid: &str) -> Option<&ProjectNode> {
        if !self.is_complete(project_rid) {
            return None;
        }
        self.result
            .projects
            .values()
            .find(|project| project.project_rid == project_rid)
    }

    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<(), PersistError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|source| PersistError::Io {
            path: path.display().to_string(),
            source,
        })?;
        info!(
            path = %path.display(),
            completed_projects = self.completed_projects.len(),
            "Checkpoint written"
        );
        Ok(())
    }

    pub fn read_json<P: AsRef<Path>>(path: P) -> Result<Self, PersistError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| PersistError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let checkpoint: Checkpoint = serde_json::from_str(&content)?;
        debug!(
            path = %path.display(),
            completed_projects = checkpoint.completed_projects.len(),
            "Checkpoint read"
        );
        Ok(checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn project(rid: &str, name: &str) -> ProjectNode {
        ProjectNode {
            project_rid: rid.into(),
            project_name: name.into(),
            software_lines: BTreeMap::new(),
        }
    }

    #[test]
    fn only_completed_projects_are_handed_out() {
        let mut checkpoint = Checkpoint::default();
        checkpoint.result.projects.insert("ProjA".into(), project("p1", "ProjA"));
        checkpoint.result.projects.insert("ProjB".into(), project("p2", "ProjB"));
        checkpoint.completed_projects.insert("p1".into());

        assert_eq!(checkpoint.completed_project("p1").unwrap().project_name, "ProjA");
        assert!(checkpoint.completed_project("p2").is_none());
        assert!(checkpoint.completed_project("p3").is_none());
    }

    #[test]
    fn survives_a_trip_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        let mut checkpoint = Checkpoint::default();
        checkpoint.result.projects.insert("ProjA".into(), project("p1", "ProjA"));
        checkpoint.completed_projects.insert("p1".into());

        checkpoint.write_json(&path).unwrap();
        assert_eq!(Checkpoint::read_json(&path).unwrap(), checkpoint);
        assert!(matches!(
            Checkpoint::read_json(dir.path().join("missing.json")),
            Err(PersistError::Io { .. })
        ));
    }
}

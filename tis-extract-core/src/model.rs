//! Data model shared by the traversal, extraction and validation stages.
//!
//! [`RawNode`] mirrors the JSON the tree API returns. [`TreeNode`] is the
//! transient view the orchestrator works with during one pass, and
//! [`ArtifactRecord`] is the typed, validated result handed to the aggregator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// A node as returned by the tree API.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawNode {
    #[serde(rename = "rId", default)]
    pub r_id: Value,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub created: Option<Value>,
    #[serde(default)]
    pub component_type: Option<NamedRef>,
    #[serde(default)]
    pub component: Option<NamedRef>,
    #[serde(default)]
    pub component_grp: Option<NamedRef>,
    #[serde(default)]
    pub attributes: Vec<RawAttribute>,
    #[serde(default)]
    pub children: Option<Vec<RawNode>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NamedRef {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawAttribute {
    pub name: String,
    #[serde(default)]
    pub value: Value,
}

impl RawNode {
    pub fn id(&self) -> String {
        value_to_string(&self.r_id).unwrap_or_default()
    }

    /// Forgets child lists more than `depth` levels below this node.
    ///
    /// After this, `children: Some` means the list is complete and `None`
    /// means the node has not been expanded yet.
    pub fn truncate(&mut self, depth: u32) {
        match (&mut self.children, depth) {
            (Some(children), 1..) => children
                .iter_mut()
                .for_each(|child| child.truncate(depth - 1)),
            (children, _) => *children = None,
        }
    }

    /// Converts the direct children into tree nodes one level below `parent_level`.
    pub fn child_nodes(&self, parent_level: usize) -> Vec<TreeNode> {
        let parent_id = self.id();
        self.children
            .iter()
            .flatten()
            .map(|child| TreeNode::from_raw(child, Some(parent_id.clone()), parent_level + 1))
            .collect()
    }
}

/// Declared role of a node in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Folder,
    Component,
    Artifact,
}

/// Component metadata carried by component and artifact nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentRef {
    /// `componentType.name`, e.g. `vVeh`.
    pub component_type: Option<String>,
    /// `component.name`, e.g. `vVeh_LCO`.
    pub component_name: Option<String>,
    /// `componentGrp.name`, e.g. `TIS Artifact Container`.
    pub component_grp: Option<String>,
}

/// Attribute bag of a node, keyed by attribute name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes(BTreeMap<String, Value>);

impl Attributes {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// String form of an attribute, `None` when absent, null or blank.
    pub fn get_str(&self, name: &str) -> Option<String> {
        self.0
            .get(name)
            .and_then(value_to_string)
            .filter(|s| !s.trim().is_empty())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.0.insert(name.into(), value);
    }
}

impl FromIterator<(String, Value)> for Attributes {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Attributes(iter.into_iter().collect())
    }
}

/// A node seen during one traversal pass. Never mutated after fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub id: String,
    pub kind: NodeKind,
    pub name: String,
    pub parent_id: Option<String>,
    /// Number of children the response already listed for this node, if any.
    pub child_count_hint: Option<usize>,
    /// Distance from the root; the root is level 0, projects level 1, software lines level 2.
    pub level: usize,
    pub component: ComponentRef,
    pub attributes: Attributes,
    pub created: Option<Value>,
}

impl TreeNode {
    pub fn from_raw(raw: &RawNode, parent_id: Option<String>, level: usize) -> Self {
        let attributes: Attributes = raw
            .attributes
            .iter()
            .map(|attr| (attr.name.clone(), attr.value.clone()))
            .collect();
        let component = ComponentRef {
            component_type: raw.component_type.as_ref().and_then(|c| c.name.clone()),
            component_name: raw.component.as_ref().and_then(|c| c.name.clone()),
            component_grp: raw.component_grp.as_ref().and_then(|c| c.name.clone()),
        };
        let kind = if attributes.contains("artifact") {
            NodeKind::Artifact
        } else if component.component_name.is_some() {
            NodeKind::Component
        } else {
            NodeKind::Folder
        };
        TreeNode {
            id: raw.id(),
            kind,
            name: raw.name.clone().unwrap_or_default(),
            parent_id,
            child_count_hint: raw.children.as_ref().map(Vec::len),
            level,
            component,
            attributes,
            created: raw.created.clone(),
        }
    }

    /// The root itself, as seen before its first fetch.
    pub fn root(id: impl Into<String>) -> Self {
        TreeNode {
            id: id.into(),
            kind: NodeKind::Folder,
            name: String::new(),
            parent_id: None,
            child_count_hint: None,
            level: 0,
            component: ComponentRef::default(),
            attributes: Attributes::default(),
            created: None,
        }
    }
}

pub(crate) fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Component names the engine knows by heart. Anything else is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ArtifactKind {
    VVehLco,
    TestEcuTest,
    Other(String),
}

impl ArtifactKind {
    pub fn as_str(&self) -> &str {
        match self {
            ArtifactKind::VVehLco => "vVeh_LCO",
            ArtifactKind::TestEcuTest => "test_ECU-TEST",
            ArtifactKind::Other(name) => name,
        }
    }
}

impl From<&str> for ArtifactKind {
    fn from(s: &str) -> Self {
        match s {
            "vVeh_LCO" => ArtifactKind::VVehLco,
            "test_ECU-TEST" => ArtifactKind::TestEcuTest,
            other => ArtifactKind::Other(other.to_string()),
        }
    }
}

impl From<String> for ArtifactKind {
    fn from(s: String) -> Self {
        ArtifactKind::from(s.as_str())
    }
}

impl From<ArtifactKind> for String {
    fn from(kind: ArtifactKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `lifeCycleStatus` attribute. Unknown values survive in [`LifeCycleStatus::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LifeCycleStatus {
    Released,
    Archived,
    Development,
    Other(String),
}

impl LifeCycleStatus {
    pub fn as_str(&self) -> &str {
        match self {
            LifeCycleStatus::Released => "released",
            LifeCycleStatus::Archived => "archived",
            LifeCycleStatus::Development => "development",
            LifeCycleStatus::Other(raw) => raw,
        }
    }
}

impl From<&str> for LifeCycleStatus {
    fn from(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "released" => LifeCycleStatus::Released,
            "archived" => LifeCycleStatus::Archived,
            "development" => LifeCycleStatus::Development,
            _ => LifeCycleStatus::Other(s.trim().to_string()),
        }
    }
}

impl From<String> for LifeCycleStatus {
    fn from(s: String) -> Self {
        LifeCycleStatus::from(s.as_str())
    }
}

impl From<LifeCycleStatus> for String {
    fn from(status: LifeCycleStatus) -> Self {
        status.as_str().to_string()
    }
}

/// Classification of a convention check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviationType {
    Valid,
    NamePatternMismatch,
    PathMismatch,
    InvalidSubfolder,
    TestTypeMismatch,
    #[serde(other)]
    Unknown,
}

impl DeviationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviationType::Valid => "VALID",
            DeviationType::NamePatternMismatch => "NAME_PATTERN_MISMATCH",
            DeviationType::PathMismatch => "PATH_MISMATCH",
            DeviationType::InvalidSubfolder => "INVALID_SUBFOLDER",
            DeviationType::TestTypeMismatch => "TEST_TYPE_MISMATCH",
            DeviationType::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for DeviationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal validation result of one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deviation {
    pub kind: DeviationType,
    pub details: String,
    #[serde(default)]
    pub hint: Option<String>,
}

impl Deviation {
    pub fn valid() -> Self {
        Deviation {
            kind: DeviationType::Valid,
            details: String::new(),
            hint: None,
        }
    }

    pub fn new(kind: DeviationType, details: impl Into<String>, hint: Option<String>) -> Self {
        Deviation {
            kind,
            details: details.into(),
            hint,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.kind == DeviationType::Valid
    }
}

impl Default for Deviation {
    fn default() -> Self {
        Deviation::valid()
    }
}

/// Well-known keys of [`ArtifactRecord::fields`].
pub mod field {
    pub const LCO_VERSION: &str = "lco_version";
    pub const VEMOX_VERSION: &str = "vemox_version";
    pub const TEST_TYPE: &str = "test_type";
    pub const TEST_VERSION: &str = "test_version";
    pub const TEST_CONFIGURATION: &str = "test_configuration";
    pub const TESTBENCH_CONFIGURATION: &str = "testbench_configuration";
    pub const ECU_TEST_VERSION: &str = "ecu_test_version";
    pub const LC_TYPE: &str = "lc_type";
    pub const IS_GENUINE_BUILD: &str = "is_genuine_build";
    pub const SIMULATION_TYPE: &str = "simulation_type";
    pub const SOFTWARE_TYPE: &str = "software_type";
    pub const LABCAR_TYPE: &str = "labcar_type";
}

/// A kept artifact with everything the extractor and validator derived for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub artifact_rid: String,
    pub name: String,
    pub kind: ArtifactKind,
    /// Raw `componentType.name`.
    #[serde(default)]
    pub component_type: Option<String>,
    pub component_name: String,
    #[serde(default)]
    pub component_grp: Option<String>,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user: Option<String>,
    pub life_cycle_status: LifeCycleStatus,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub release_date_time: Option<DateTime<Utc>>,
    /// Folders from the project down to the artifact's parent.
    #[serde(default)]
    pub folder_path: Vec<String>,
    /// Display path: the folders and the artifact name, joined by `/`.
    pub upload_path: String,
    #[serde(default)]
    pub link: Option<String>,
    /// Type-specific fields populated by the extractor.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub deviation: Deviation,
}

impl ArtifactRecord {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn lco_version(&self) -> Option<&str> {
        self.field(field::LCO_VERSION)
    }

    pub fn vemox_version(&self) -> Option<&str> {
        self.field(field::VEMOX_VERSION)
    }

    pub fn test_type(&self) -> Option<&str> {
        self.field(field::TEST_TYPE)
    }

    /// Folder names the conventions are checked against. The artifact name
    /// is not one of them, even when it contains `/`.
    pub fn path_segments(&self) -> Vec<&str> {
        self.folder_path
            .iter()
            .map(String::as_str)
            .filter(|segment| !segment.is_empty())
            .collect()
    }

    /// Attaches the validation outcome, consuming the unvalidated record.
    pub fn with_deviation(mut self, deviation: Deviation) -> Self {
        self.deviation = deviation;
        self
    }
}

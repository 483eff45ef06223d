//! Version and metadata extraction.
//!
//! Nothing in here fails. A name no pattern understands, a malformed JSON
//! attribute or an unparseable date just leaves the corresponding field
//! unset; validation and reporting surface that later.

use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock};
use tracing::debug;

use crate::model::{field, ArtifactKind, ArtifactRecord, Attributes, LifeCycleStatus, TreeNode};
use crate::registry::ComponentRegistry;
use crate::timestamps;

const VEMOX_SEARCH_PATH: &str = "mdl/simulink_vemox/src";

/// Collapses whitespace runs and trims, so incidental spacing never changes a match.
pub fn normalize_name(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub struct Extractor {
    registry: Arc<ComponentRegistry>,
    link_template: Option<String>,
}

impl Extractor {
    pub fn new(registry: Arc<ComponentRegistry>, link_template: Option<String>) -> Self {
        Extractor {
            registry,
            link_template,
        }
    }

    /// Typed fields for one artifact: name captures, then attribute rules, then path-derived fields.
    pub fn extract(
        &self,
        component_name: &str,
        raw_name: &str,
        attributes: &Attributes,
        folder_path: &[String],
    ) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        if let Some(profile) = self.registry.lookup(component_name) {
            let name = normalize_name(raw_name);
            if let Some(captures) = profile
                .extraction_patterns
                .iter()
                .find_map(|pattern| pattern.captures(&name).map(|c| (pattern, c)))
                .map(|(pattern, captures)| named_captures(pattern, &captures))
            {
                fields.extend(captures);
            } else {
                debug!(component = component_name, name = %name, "No extraction pattern matched");
            }
            for extractor in &profile.attribute_extractors {
                extractor.extract(attributes, &mut fields);
            }
        }
        self.path_fields(folder_path, &mut fields);
        fields
    }

    /// Builds the unvalidated record for a kept artifact node below `folder_path`.
    pub fn record(&self, node: &TreeNode, folder_path: Vec<String>) -> ArtifactRecord {
        let component_name = node.component.component_name.clone().unwrap_or_default();
        let attrs = &node.attributes;
        let fields = self.extract(&component_name, &node.name, attrs, &folder_path);
        let upload_path = folder_path
            .iter()
            .chain(std::iter::once(&node.name))
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("/");
        ArtifactRecord {
            artifact_rid: node.id.clone(),
            name: node.name.clone(),
            kind: ArtifactKind::from(component_name.as_str()),
            component_type: node.component.component_type.clone(),
            component_name,
            component_grp: node.component.component_grp.clone(),
            created: node.created.as_ref().and_then(timestamps::parse_value),
            user: attrs.get_str("user").map(|u| u.to_lowercase()),
            life_cycle_status: attrs
                .get_str("lifeCycleStatus")
                .map(LifeCycleStatus::from)
                .unwrap_or_else(|| LifeCycleStatus::Other(String::new())),
            deleted_at: attrs
                .get("tisFileDeletedDate")
                .and_then(timestamps::parse_value),
            release_date_time: attrs
                .get("releaseDateTime")
                .and_then(timestamps::parse_value),
            folder_path,
            upload_path,
            link: self
                .link_template
                .as_ref()
                .map(|template| template.replace("{rid}", &node.id)),
            fields,
            deviation: Default::default(),
        }
    }

    fn path_fields(&self, segments: &[String], fields: &mut BTreeMap<String, String>) {
        if let Some(sim) = segments
            .iter()
            .find(|s| s.eq_ignore_ascii_case("HiL") || s.eq_ignore_ascii_case("SiL"))
        {
            fields
                .entry(field::SIMULATION_TYPE.to_string())
                .or_insert_with(|| sim.to_string());
        }
        if let Some(sw) = segments.iter().find(|s| {
            let upper = s.to_ascii_uppercase();
            upper.contains("CSP") || upper.contains("SWB")
        }) {
            fields
                .entry(field::SOFTWARE_TYPE.to_string())
                .or_insert_with(|| sw.to_string());
        }
        if let Some(labcar) = segments.iter().find(|s| {
            self.registry
                .labcar_platforms()
                .iter()
                .any(|p| p.eq_ignore_ascii_case(s))
        }) {
            fields
                .entry(field::LABCAR_TYPE.to_string())
                .or_insert_with(|| labcar.to_string());
        }
    }
}

fn named_captures(pattern: &Regex, captures: &regex::Captures<'_>) -> BTreeMap<String, String> {
    pattern
        .capture_names()
        .flatten()
        .filter_map(|group| {
            let value = captures.name(group)?.as_str().trim();
            (!value.is_empty()).then(|| (group.to_string(), value.to_string()))
        })
        .collect()
}

fn svn_version_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)vemox(\d+)\.(\d+)\.(\d+)\.(\d+)\.(\d+)").ok())
        .as_ref()
}

fn conan_version_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"VeMoX/(\d+(?:\.\d+)*?)@VeMoX_classic/release#[a-f0-9]+").ok())
        .as_ref()
}

fn format_vemox(parts: &[&str]) -> Option<String> {
    match parts {
        [a, b, c, d, e, ..] => Some(format!("VeMox{a}{b}{c}R{d}{e}")),
        _ => None,
    }
}

/// VeMoX version from a `sources` attribute payload.
///
/// SVN sources contribute the externals mounted at `mdl/Simulink_VeMoX/src`
/// (`.../vemox1.2.3.4.5/...` becomes `VeMox123R45`); Conan sources contribute
/// `VeMoX/<version>@VeMoX_classic/release#<hash>` references. When several
/// versions are found the lexicographically smallest is returned.
pub fn vemox_from_sources(sources: &Value) -> Option<String> {
    let items: Vec<&Value> = match sources {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![sources],
        _ => return None,
    };
    let mut versions = BTreeSet::new();
    for item in items {
        let kind = item
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_ascii_uppercase();
        match kind.as_str() {
            "SVN" => {
                for external in item
                    .get("externals")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                {
                    let path = external
                        .get("path")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_ascii_lowercase()
                        .replace('\\', "/");
                    if !path.ends_with(VEMOX_SEARCH_PATH) {
                        continue;
                    }
                    let url = external.get("url").and_then(Value::as_str).unwrap_or_default();
                    if let Some(caps) = svn_version_regex().and_then(|re| re.captures(url)) {
                        let parts: Vec<&str> = (1..=5)
                            .filter_map(|i| caps.get(i).map(|m| m.as_str()))
                            .collect();
                        versions.extend(format_vemox(&parts));
                    }
                }
            }
            "CONAN" => {
                let package = item.get("package").and_then(Value::as_str).unwrap_or_default();
                let version = conan_version_regex()
                    .and_then(|re| re.captures(package))
                    .and_then(|caps| caps.get(1))
                    .and_then(|m| format_vemox(&m.as_str().split('.').collect::<Vec<_>>()))
                    .filter(|v| is_conan_vemox(v));
                versions.extend(version);
            }
            _ => {}
        }
    }
    versions.into_iter().next()
}

fn is_conan_vemox(version: &str) -> bool {
    let Some(rest) = version.strip_prefix("VeMox") else {
        return false;
    };
    let bytes = rest.as_bytes();
    bytes.len() == 6
        && bytes[..3].iter().all(u8::is_ascii_digit)
        && bytes[3] == b'R'
        && bytes[4..].iter().all(u8::is_ascii_digit)
}

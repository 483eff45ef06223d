//! Component registry: everything type-specific lives here.
//!
//! Each component name maps to a [`ComponentProfile`] holding its naming
//! pattern, name extraction patterns, attribute extractors, path template,
//! allowed model subfolders and bespoke validation rules. The extractor and
//! validator only ever look profiles up. A new component type is one
//! [`ComponentRegistry::register`] call and never touches the evaluation
//! order of the others.
//!
//! Built-in profiles cover `vVeh_LCO` models and `test_ECU-TEST` artifacts.
//! [`ComponentRegistry::from_config`] overlays the configured conventions on
//! top of them.

use regex::{Regex, RegexBuilder};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::{AllowedValuesConfig, NamingConventionConfig, PathConventionConfig};
use crate::error::PatternError;
use crate::model::{field, ArtifactKind, ArtifactRecord, Attributes, Deviation, DeviationType};

/// Result of a bespoke rule. `Skipped` means the rule does not apply and is not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    Pass,
    Fail(Deviation),
    Skipped,
}

/// A component-specific validation rule, evaluated after the structural checks.
pub trait ArtifactRule: Send + Sync {
    fn name(&self) -> &str;
    fn check(&self, artifact: &ArtifactRecord) -> RuleOutcome;
}

/// Fills typed fields from an artifact's attribute bag.
///
/// Extractors only add fields that are still unset, so name captures keep precedence.
pub trait AttributeExtractor: Send + Sync {
    fn name(&self) -> &str;
    fn extract(&self, attributes: &Attributes, fields: &mut BTreeMap<String, String>);
}

/// The naming convention of a component type.
#[derive(Debug, Clone)]
pub struct NamePattern {
    pub regex: Regex,
    pub description: String,
    pub example: String,
}

impl NamePattern {
    pub fn new(pattern: &str, description: &str, example: &str) -> Result<Self, PatternError> {
        Ok(NamePattern {
            regex: compile_name_regex(pattern, "naming pattern")?,
            description: description.to_string(),
            example: example.to_string(),
        })
    }
}

/// Compiles a name regex the way names are matched everywhere: case-insensitively.
pub fn compile_name_regex(pattern: &str, context: &str) -> Result<Regex, PatternError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| PatternError::new(format!("{context} '{pattern}'"), e))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSegment {
    Literal(String),
    Variable(String),
    /// `...`: any number of folders.
    Wildcard,
}

/// A path template such as `{Project}/{SoftwareLine}/Model/.../vVeh/.../{artifact}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<TemplateSegment>,
}

impl PathTemplate {
    pub fn parse(raw: &str) -> Self {
        let segments = raw
            .split('/')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                if s == "..." {
                    TemplateSegment::Wildcard
                } else if let Some(var) = s.strip_prefix('{').and_then(|v| v.strip_suffix('}')) {
                    TemplateSegment::Variable(var.to_string())
                } else {
                    TemplateSegment::Literal(s.to_string())
                }
            })
            .collect();
        PathTemplate {
            raw: raw.to_string(),
            segments,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[TemplateSegment] {
        &self.segments
    }

    /// Literal folders that must appear in every conforming path, in template order.
    pub fn required_folders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            TemplateSegment::Literal(l) => Some(l.as_str()),
            _ => None,
        })
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Values a template variable may take, compared case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowedValues {
    pub exact: Vec<String>,
    pub contains: Vec<String>,
}

impl AllowedValues {
    pub fn permits(&self, value: &str) -> bool {
        let value = value.to_ascii_lowercase();
        self.exact.iter().any(|e| e.to_ascii_lowercase() == value)
            || self
                .contains
                .iter()
                .any(|c| value.contains(&c.to_ascii_lowercase()))
    }

    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if !self.exact.is_empty() {
            parts.push(self.exact.join(", "));
        }
        if !self.contains.is_empty() {
            parts.push(format!("containing {}", self.contains.join(" or ")));
        }
        parts.join("; ")
    }
}

impl From<&AllowedValuesConfig> for AllowedValues {
    fn from(config: &AllowedValuesConfig) -> Self {
        AllowedValues {
            exact: config.exact.clone(),
            contains: config.contains.clone(),
        }
    }
}

/// Everything the engine knows about one component type.
#[derive(Clone, Default)]
pub struct ComponentProfile {
    pub name_pattern: Option<NamePattern>,
    /// Ordered; the first pattern matching the normalised name wins.
    pub extraction_patterns: Vec<Regex>,
    pub attribute_extractors: Vec<Arc<dyn AttributeExtractor>>,
    pub path_template: Option<PathTemplate>,
    /// Folders allowed directly below the `Model` segment. Empty disables the check.
    pub model_subfolders: Vec<String>,
    /// Evaluated in registration order after the structural checks.
    pub rules: Vec<Arc<dyn ArtifactRule>>,
    /// Field whose value identifies the PVER for ambiguity reporting.
    pub pver_field: Option<String>,
}

impl fmt::Debug for ComponentProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentProfile")
            .field("name_pattern", &self.name_pattern.as_ref().map(|p| p.regex.as_str()))
            .field("extraction_patterns", &self.extraction_patterns.len())
            .field(
                "attribute_extractors",
                &self
                    .attribute_extractors
                    .iter()
                    .map(|e| e.name().to_string())
                    .collect::<Vec<_>>(),
            )
            .field("path_template", &self.path_template.as_ref().map(|t| t.as_str()))
            .field("model_subfolders", &self.model_subfolders)
            .field(
                "rules",
                &self.rules.iter().map(|r| r.name().to_string()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ComponentProfile {
    /// Sets the naming convention and makes it the first extraction pattern.
    pub fn with_name_pattern(mut self, pattern: NamePattern) -> Self {
        self.extraction_patterns.insert(0, pattern.regex.clone());
        self.name_pattern = Some(pattern);
        self
    }

    pub fn with_extraction_pattern(mut self, regex: Regex) -> Self {
        self.extraction_patterns.push(regex);
        self
    }

    pub fn with_attribute_extractor(mut self, extractor: Arc<dyn AttributeExtractor>) -> Self {
        self.attribute_extractors.push(extractor);
        self
    }

    pub fn with_path_template(mut self, template: &str) -> Self {
        self.path_template = Some(PathTemplate::parse(template));
        self
    }

    pub fn with_model_subfolders(mut self, folders: &[&str]) -> Self {
        self.model_subfolders = folders.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_rule(mut self, rule: Arc<dyn ArtifactRule>) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_pver_field(mut self, field: &str) -> Self {
        self.pver_field = Some(field.to_string());
        self
    }
}

/// Lookup table from component name to [`ComponentProfile`], plus the
/// settings shared by all profiles.
#[derive(Debug, Clone)]
pub struct ComponentRegistry {
    profiles: BTreeMap<String, ComponentProfile>,
    variable_values: BTreeMap<String, AllowedValues>,
    labcar_platforms: Vec<String>,
    naming_enabled: bool,
    path_enabled: bool,
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        ComponentRegistry {
            profiles: BTreeMap::new(),
            variable_values: BTreeMap::new(),
            labcar_platforms: vec!["VME".to_string(), "PCIe".to_string()],
            naming_enabled: true,
            path_enabled: true,
        }
    }
}

pub const VVEH_LCO_NAME_PATTERN: &str = r"^VW vVeh_LCO : (?P<lco_version>\S+) / (?P<vemox_version>\S+) \[(?P<options>[^\]]*)\] (?P<variant>\S.*)$";
pub const VVEH_LCO_EXAMPLE: &str = "VW vVeh_LCO : DMG1211V07C1935 / M22J71 [] 110kW_OPF_DQ_CANv7";

impl ComponentRegistry {
    pub fn empty() -> Self {
        ComponentRegistry::default()
    }

    /// Registry with the built-in profiles.
    pub fn with_defaults() -> Self {
        let mut registry = ComponentRegistry::default();
        registry.variable_values.insert(
            "CSP_SWB".to_string(),
            AllowedValues {
                exact: Vec::new(),
                contains: vec!["CSP".to_string(), "SWB".to_string()],
            },
        );
        registry.register(ArtifactKind::VVehLco.as_str(), vveh_lco_profile());
        registry.register(ArtifactKind::TestEcuTest.as_str(), ecu_test_profile());
        registry
    }

    /// Built-in profiles with the configured conventions laid over them.
    pub fn from_config(
        naming: &NamingConventionConfig,
        paths: &PathConventionConfig,
    ) -> Result<Self, PatternError> {
        let mut registry = ComponentRegistry::with_defaults();
        registry.naming_enabled = naming.enabled;
        registry.path_enabled = paths.enabled;
        registry.labcar_platforms = paths.labcar_platforms.clone();

        for (component, rule) in &naming.patterns {
            let pattern = NamePattern::new(&rule.pattern, &rule.description, &rule.example)
                .map_err(|e| PatternError::new(format!("naming_convention.{component}"), e.source))?;
            let profile = registry.profiles.remove(component).unwrap_or_default();
            let mut profile = ComponentProfile {
                name_pattern: None,
                extraction_patterns: profile
                    .extraction_patterns
                    .into_iter()
                    .skip(usize::from(profile.name_pattern.is_some()))
                    .collect(),
                ..profile
            };
            profile = profile.with_name_pattern(pattern);
            registry.profiles.insert(component.clone(), profile);
        }
        for (component, template) in &paths.expected_structure {
            let profile = registry.profiles.entry(component.clone()).or_default();
            profile.path_template = Some(PathTemplate::parse(template));
        }
        for (component, folders) in &paths.model_subfolders {
            let profile = registry.profiles.entry(component.clone()).or_default();
            profile.model_subfolders = folders.clone();
        }
        for (variable, allowed) in &paths.variable_values {
            registry
                .variable_values
                .insert(variable.clone(), AllowedValues::from(allowed));
        }
        debug!(profiles = ?registry.profiles.keys().collect::<Vec<_>>(), "Component registry built");
        Ok(registry)
    }

    pub fn register(&mut self, component_name: &str, profile: ComponentProfile) {
        if self
            .profiles
            .insert(component_name.to_string(), profile)
            .is_some()
        {
            warn!(component = component_name, "Replacing registered component profile");
        }
    }

    /// Exact component name first, then the longest registered prefix.
    pub fn lookup(&self, component_name: &str) -> Option<&ComponentProfile> {
        if let Some(profile) = self.profiles.get(component_name) {
            return Some(profile);
        }
        self.profiles
            .iter()
            .filter(|(key, _)| component_name.starts_with(key.as_str()))
            .max_by_key(|(key, _)| key.len())
            .map(|(_, profile)| profile)
    }

    pub fn allowed_values(&self, variable: &str) -> Option<&AllowedValues> {
        self.variable_values.get(variable)
    }

    pub fn labcar_platforms(&self) -> &[String] {
        &self.labcar_platforms
    }

    pub fn naming_enabled(&self) -> bool {
        self.naming_enabled
    }

    pub fn path_enabled(&self) -> bool {
        self.path_enabled
    }

    pub fn component_names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }
}

fn vveh_lco_profile() -> ComponentProfile {
    let mut profile = ComponentProfile::default()
        .with_path_template("{Project}/{SoftwareLine}/Model/.../vVeh/.../{artifact}")
        .with_model_subfolders(&["HiL", "SiL"])
        .with_attribute_extractor(Arc::new(ExecutionDependency::new("LCO", field::LCO_VERSION)))
        .with_attribute_extractor(Arc::new(SourcesVemox))
        .with_attribute_extractor(Arc::new(CopyAttribute::new("lcType", field::LC_TYPE)))
        .with_attribute_extractor(Arc::new(CopyAttribute::new(
            "isGenuineBuild",
            field::IS_GENUINE_BUILD,
        )))
        .with_pver_field(field::LCO_VERSION);
    match NamePattern::new(
        VVEH_LCO_NAME_PATTERN,
        "VW vVeh_LCO : <LCO version> / <VeMoX version> [<options>] <variant>",
        VVEH_LCO_EXAMPLE,
    ) {
        Ok(pattern) => profile = profile.with_name_pattern(pattern),
        Err(e) => warn!(error = %e, "Built-in vVeh_LCO naming pattern rejected"),
    }
    if let Ok(fallback) =
        compile_name_regex(r"vVeh_LCO\s*:\s*(?P<lco_version>[A-Z0-9]+)", "vVeh_LCO fallback")
    {
        profile = profile.with_extraction_pattern(fallback);
    }
    profile
}

fn ecu_test_profile() -> ComponentProfile {
    ComponentProfile::default()
        .with_path_template("{Project}/{SoftwareLine}/Test/{TestType}/.../{artifact}")
        .with_attribute_extractor(Arc::new(CopyAttribute::new("testType", field::TEST_TYPE)))
        .with_attribute_extractor(Arc::new(CopyAttribute::new("testVersion", field::TEST_VERSION)))
        .with_attribute_extractor(Arc::new(CopyAttribute::new(
            "testConfiguration",
            field::TEST_CONFIGURATION,
        )))
        .with_attribute_extractor(Arc::new(CopyAttribute::new(
            "testbenchConfiguration",
            field::TESTBENCH_CONFIGURATION,
        )))
        .with_attribute_extractor(Arc::new(ExecutionDependency::new(
            "ECU-TEST",
            field::ECU_TEST_VERSION,
        )))
        .with_rule(Arc::new(TestTypeMatchesPath))
}

fn set_if_absent(fields: &mut BTreeMap<String, String>, key: &str, value: String) {
    if !value.trim().is_empty() {
        fields.entry(key.to_string()).or_insert(value);
    }
}

/// Copies an attribute verbatim into a field.
pub struct CopyAttribute {
    attribute: String,
    field: String,
}

impl CopyAttribute {
    pub fn new(attribute: &str, field: &str) -> Self {
        CopyAttribute {
            attribute: attribute.to_string(),
            field: field.to_string(),
        }
    }
}

impl AttributeExtractor for CopyAttribute {
    fn name(&self) -> &str {
        &self.attribute
    }

    fn extract(&self, attributes: &Attributes, fields: &mut BTreeMap<String, String>) {
        if let Some(value) = attributes.get_str(&self.attribute) {
            set_if_absent(fields, &self.field, value);
        }
    }
}

/// Reads `version[0]` of a named dependency from the `execution` attribute,
/// a JSON list of `{dependency, version: [...]}` objects.
pub struct ExecutionDependency {
    dependency: String,
    field: String,
}

impl ExecutionDependency {
    pub fn new(dependency: &str, field: &str) -> Self {
        ExecutionDependency {
            dependency: dependency.to_string(),
            field: field.to_string(),
        }
    }
}

impl AttributeExtractor for ExecutionDependency {
    fn name(&self) -> &str {
        "execution"
    }

    fn extract(&self, attributes: &Attributes, fields: &mut BTreeMap<String, String>) {
        let Some(execution) = attributes.get("execution").and_then(json_payload) else {
            return;
        };
        let version = execution
            .as_array()
            .into_iter()
            .flatten()
            .find(|dep| dep.get("dependency").and_then(Value::as_str) == Some(self.dependency.as_str()))
            .and_then(|dep| dep.get("version"))
            .and_then(|versions| versions.as_array()?.first()?.as_str().map(str::to_string));
        if let Some(version) = version {
            set_if_absent(fields, &self.field, version);
        }
    }
}

/// Finds the VeMoX version in the `sources` attribute, from SVN externals or a Conan reference.
pub struct SourcesVemox;

impl AttributeExtractor for SourcesVemox {
    fn name(&self) -> &str {
        "sources"
    }

    fn extract(&self, attributes: &Attributes, fields: &mut BTreeMap<String, String>) {
        let Some(sources) = attributes.get("sources").and_then(json_payload) else {
            return;
        };
        if let Some(version) = crate::extract::vemox_from_sources(&sources) {
            set_if_absent(fields, field::VEMOX_VERSION, version);
        }
    }
}

/// Attribute values holding JSON arrive either as JSON or as a string containing JSON.
fn json_payload(value: &Value) -> Option<Value> {
    match value {
        Value::String(s) => serde_json::from_str(s).ok(),
        Value::Null => None,
        other => Some(other.clone()),
    }
}

/// `testType` must equal the folder that follows `Test` in the upload path.
pub struct TestTypeMatchesPath;

impl ArtifactRule for TestTypeMatchesPath {
    fn name(&self) -> &str {
        "test_type_matches_path"
    }

    fn check(&self, artifact: &ArtifactRecord) -> RuleOutcome {
        let segments = artifact.path_segments();
        let Some(path_type) = segments
            .iter()
            .position(|s| s.eq_ignore_ascii_case("Test"))
            .and_then(|i| segments.get(i + 1))
        else {
            return RuleOutcome::Skipped;
        };
        match artifact.test_type() {
            Some(declared) if declared.eq_ignore_ascii_case(path_type) => RuleOutcome::Pass,
            declared => RuleOutcome::Fail(Deviation::new(
                DeviationType::TestTypeMismatch,
                format!(
                    "testType '{}' does not match path folder 'Test/{}'",
                    declared.unwrap_or("<unset>"),
                    path_type
                ),
                Some(format!(
                    "Expected testType='{}' based on path, or move artifact to Test/{}/",
                    path_type,
                    declared.unwrap_or("<testType>")
                )),
            )),
        }
    }
}

//! Naming and path convention checks.
//!
//! Rules run in a fixed order and the first failure is the artifact's only
//! deviation:
//!
//! 1. naming pattern of the component type
//! 2. path length (at least project and software line)
//! 3. literal folders required by the path template
//! 4. folder directly below `Model` is in the allowed model subfolders
//! 5. template variables take one of their allowed values
//! 6. bespoke rules of the component type, in registration order
//!
//! Component types without a registered profile are trivially valid.

use std::sync::Arc;
use tracing::debug;

use crate::extract::normalize_name;
use crate::model::{ArtifactRecord, Deviation, DeviationType};
use crate::registry::{ComponentProfile, ComponentRegistry, PathTemplate, RuleOutcome, TemplateSegment};

/// Variables bound by the tree position rather than by convention.
const POSITIONAL_VARIABLES: [&str; 3] = ["Project", "SoftwareLine", "artifact"];

pub struct Validator {
    registry: Arc<ComponentRegistry>,
}

impl Validator {
    pub fn new(registry: Arc<ComponentRegistry>) -> Self {
        Validator { registry }
    }

    pub fn validate(&self, artifact: &ArtifactRecord) -> Deviation {
        let Some(profile) = self.registry.lookup(&artifact.component_name) else {
            return Deviation::valid();
        };
        let deviation = self
            .check_name(profile, artifact)
            .or_else(|| self.check_path(profile, artifact))
            .or_else(|| check_rules(profile, artifact))
            .unwrap_or_else(Deviation::valid);
        if !deviation.is_valid() {
            debug!(
                artifact_rid = %artifact.artifact_rid,
                deviation = %deviation.kind,
                details = %deviation.details,
                "Convention deviation"
            );
        }
        deviation
    }

    fn check_name(&self, profile: &ComponentProfile, artifact: &ArtifactRecord) -> Option<Deviation> {
        if !self.registry.naming_enabled() {
            return None;
        }
        let pattern = profile.name_pattern.as_ref()?;
        if pattern.regex.is_match(&normalize_name(&artifact.name)) {
            return None;
        }
        Some(Deviation::new(
            DeviationType::NamePatternMismatch,
            format!(
                "Name '{}' does not match the {} naming convention",
                artifact.name, artifact.component_name
            ),
            Some(if pattern.example.is_empty() {
                format!("Expected format: {}", pattern.description)
            } else {
                format!("Expected e.g. '{}'", pattern.example)
            }),
        ))
    }

    fn check_path(&self, profile: &ComponentProfile, artifact: &ArtifactRecord) -> Option<Deviation> {
        if !self.registry.path_enabled() {
            return None;
        }
        let segments = artifact.path_segments();
        let hint = profile
            .path_template
            .as_ref()
            .map(|t| format!("Expected structure: {t}"));

        if segments.len() < 2 {
            return Some(Deviation::new(
                DeviationType::PathMismatch,
                format!("Path too short: '{}'", artifact.upload_path),
                hint,
            ));
        }

        if let Some(template) = &profile.path_template {
            for folder in template.required_folders() {
                if !segments.iter().any(|s| s.eq_ignore_ascii_case(folder)) {
                    return Some(Deviation::new(
                        DeviationType::PathMismatch,
                        format!("Missing required folder '{folder}' in path"),
                        hint,
                    ));
                }
            }
        }

        if !profile.model_subfolders.is_empty() {
            if let Some(sub) = segment_after(&segments, "Model") {
                if !profile
                    .model_subfolders
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(sub))
                {
                    return Some(Deviation::new(
                        DeviationType::InvalidSubfolder,
                        format!("Subfolder '{sub}' is not allowed below 'Model'"),
                        Some(format!(
                            "Use one of: {}",
                            profile.model_subfolders.join(", ")
                        )),
                    ));
                }
            }
        }

        if let Some(template) = &profile.path_template {
            if let Some(deviation) = self.check_variables(template, &segments) {
                return Some(deviation);
            }
        }
        None
    }

    fn check_variables(&self, template: &PathTemplate, segments: &[&str]) -> Option<Deviation> {
        let mut anchor: Option<&str> = None;
        let mut positional = true;
        for (index, segment) in template.segments().iter().enumerate() {
            match segment {
                TemplateSegment::Literal(literal) => anchor = Some(literal.as_str()),
                TemplateSegment::Wildcard => positional = false,
                TemplateSegment::Variable(var) => {
                    if POSITIONAL_VARIABLES.contains(&var.as_str()) {
                        continue;
                    }
                    let Some(allowed) = self.registry.allowed_values(var) else {
                        continue;
                    };
                    let value = match anchor {
                        Some(literal) => segment_after(segments, literal),
                        None if positional => segments.get(index).copied(),
                        None => None,
                    };
                    let Some(value) = value else {
                        continue;
                    };
                    if !allowed.permits(value) {
                        return Some(Deviation::new(
                            DeviationType::InvalidSubfolder,
                            format!("Folder '{value}' is not a valid {{{var}}}"),
                            Some(format!("Expected {{{var}}} to be {}", allowed.describe())),
                        ));
                    }
                }
            }
        }
        None
    }
}

fn check_rules(profile: &ComponentProfile, artifact: &ArtifactRecord) -> Option<Deviation> {
    profile.rules.iter().find_map(|rule| match rule.check(artifact) {
        RuleOutcome::Fail(deviation) => Some(deviation),
        RuleOutcome::Pass => None,
        RuleOutcome::Skipped => {
            debug!(rule = rule.name(), artifact_rid = %artifact.artifact_rid, "Rule not applicable");
            None
        }
    })
}

fn segment_after<'a>(segments: &[&'a str], folder: &str) -> Option<&'a str> {
    segments
        .iter()
        .position(|s| s.eq_ignore_ascii_case(folder))
        .and_then(|i| segments.get(i + 1).copied())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ArtifactKind, LifeCycleStatus};
    use crate::registry::{ArtifactRule, NamePattern, VVEH_LCO_EXAMPLE};
    use std::collections::BTreeMap;

    fn record(component: &str, name: &str, path: &str) -> ArtifactRecord {
        ArtifactRecord {
            artifact_rid: "1".into(),
            name: name.into(),
            kind: ArtifactKind::from(component),
            component_type: None,
            component_name: component.into(),
            component_grp: None,
            created: None,
            user: None,
            life_cycle_status: LifeCycleStatus::Released,
            deleted_at: None,
            release_date_time: None,
            folder_path: path.split('/').map(String::from).collect(),
            upload_path: path.into(),
            link: None,
            fields: BTreeMap::new(),
            deviation: Deviation::valid(),
        }
    }

    fn validator() -> Validator {
        Validator::new(Arc::new(ComponentRegistry::with_defaults()))
    }

    #[test]
    fn conforming_lco_artifact_is_valid() {
        let artifact = record("vVeh_LCO", VVEH_LCO_EXAMPLE, "ProjA/Line1/Model/SiL/vVeh/foo/artifact");
        assert_eq!(validator().validate(&artifact), Deviation::valid());
    }

    #[test]
    fn missing_folder_cites_template() {
        let artifact = record("vVeh_LCO", VVEH_LCO_EXAMPLE, "ProjA/Line1/Model/SiL/foo/artifact");
        let deviation = validator().validate(&artifact);
        assert_eq!(deviation.kind, DeviationType::PathMismatch);
        assert!(deviation.details.contains("vVeh"));
        assert!(deviation
            .hint
            .unwrap()
            .contains("{Project}/{SoftwareLine}/Model/.../vVeh/.../{artifact}"));
    }

    #[test]
    fn naming_is_reported_before_path() {
        let artifact = record("vVeh_LCO", "bad name", "ProjA/Line1/Elsewhere");
        let v = validator();
        let first = v.validate(&artifact);
        assert_eq!(first.kind, DeviationType::NamePatternMismatch);
        assert_eq!(first.hint.as_deref(), Some(format!("Expected e.g. '{VVEH_LCO_EXAMPLE}'").as_str()));
        for _ in 0..5 {
            assert_eq!(v.validate(&artifact), first);
        }
    }

    #[test]
    fn short_path_and_bad_subfolder() {
        let short = record("vVeh_LCO", VVEH_LCO_EXAMPLE, "ProjA");
        assert_eq!(validator().validate(&short).kind, DeviationType::PathMismatch);

        let sub = record("vVeh_LCO", VVEH_LCO_EXAMPLE, "ProjA/Line1/Model/XiL/vVeh/a");
        assert_eq!(validator().validate(&sub).kind, DeviationType::InvalidSubfolder);
    }

    #[test]
    fn artifact_name_never_counts_as_a_folder() {
        let mut artifact = record("vVeh_LCO", "VW vVeh_LCO : A / Line1 [] Model", "ProjA");
        artifact.upload_path = format!("ProjA/{}", artifact.name);
        let deviation = validator().validate(&artifact);
        assert_eq!(deviation.kind, DeviationType::PathMismatch);
        assert!(deviation.details.contains("Path too short"));
    }

    #[test]
    fn template_variables_are_checked_after_anchor() {
        let mut registry = ComponentRegistry::with_defaults();
        registry.register(
            "mdl_X",
            ComponentProfile::default().with_path_template("{Project}/{SoftwareLine}/Model/HiL/{CSP_SWB}/{artifact}"),
        );
        let v = Validator::new(Arc::new(registry));
        let ok = record("mdl_X", "n", "P/L/Model/HiL/CSP_01/a");
        let bad = record("mdl_X", "n", "P/L/Model/HiL/Other/a");
        assert!(v.validate(&ok).is_valid());
        let deviation = v.validate(&bad);
        assert_eq!(deviation.kind, DeviationType::InvalidSubfolder);
        assert!(deviation.details.contains("{CSP_SWB}"));
    }

    #[test]
    fn test_type_rule_applies_to_ecu_test_only() {
        let mut ok = record("test_ECU-TEST", "t", "P/L/Test/HIL_Smoke/run1");
        ok.fields.insert("test_type".into(), "HIL_Smoke".into());
        assert!(validator().validate(&ok).is_valid());

        let mut wrong = ok.clone();
        wrong.fields.insert("test_type".into(), "Regression".into());
        let deviation = validator().validate(&wrong);
        assert_eq!(deviation.kind, DeviationType::TestTypeMismatch);
        assert_eq!(
            deviation.hint.as_deref(),
            Some("Expected testType='HIL_Smoke' based on path, or move artifact to Test/Regression/")
        );

        let unregistered = record("misc_tool", "x", "P");
        assert!(validator().validate(&unregistered).is_valid());
    }

    struct AlwaysFails;

    impl ArtifactRule for AlwaysFails {
        fn name(&self) -> &str {
            "always_fails"
        }

        fn check(&self, _artifact: &ArtifactRecord) -> RuleOutcome {
            RuleOutcome::Fail(Deviation::new(DeviationType::Unknown, "custom", None))
        }
    }

    #[test]
    fn registered_rules_run_after_structure_checks() {
        let mut registry = ComponentRegistry::empty();
        registry.register(
            "custom",
            ComponentProfile::default()
                .with_name_pattern(NamePattern::new("^ok$", "ok", "ok").unwrap())
                .with_rule(Arc::new(AlwaysFails)),
        );
        let v = Validator::new(Arc::new(registry));
        assert_eq!(v.validate(&record("custom", "nope", "P/L")).kind, DeviationType::NamePatternMismatch);
        assert_eq!(v.validate(&record("custom", "ok", "P/L")).kind, DeviationType::Unknown);
    }
}

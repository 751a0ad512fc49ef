//! Last-applied spec snapshot
//!
//! The spec that derived resources were last written from is recorded as
//! JSON in the AppService's [`SPEC_SNAPSHOT_ANNOTATION`] annotation. Drift is
//! a difference between that snapshot and the current spec. Comparison is on
//! typed values, so key order and whitespace in the stored text don't matter.

use std::collections::BTreeMap;

use appservice_common::crd::{AppService, AppServiceSpec};
use appservice_common::{Error, SPEC_SNAPSHOT_ANNOTATION};

/// What the snapshot annotation holds
#[derive(Clone, Debug, PartialEq)]
pub enum Snapshot {
    /// No snapshot has been written yet
    Missing,
    /// The annotation exists but does not decode as a spec
    Corrupt(String),
    /// A decoded snapshot
    Recorded(AppServiceSpec),
}

impl Snapshot {
    /// Read the snapshot from an AppService's annotations
    pub fn read(app: &AppService) -> Self {
        Self::from_annotations(app.metadata.annotations.as_ref())
    }

    /// Read the snapshot from an annotation map
    pub fn from_annotations(annotations: Option<&BTreeMap<String, String>>) -> Self {
        match annotations.and_then(|a| a.get(SPEC_SNAPSHOT_ANNOTATION)) {
            None => Self::Missing,
            Some(raw) => match serde_json::from_str::<AppServiceSpec>(raw) {
                Ok(spec) => Self::Recorded(spec),
                Err(e) => Self::Corrupt(e.to_string()),
            },
        }
    }

    /// True if derived resources may not reflect `spec`
    ///
    /// A missing or corrupt snapshot counts as drift.
    pub fn has_drifted(&self, spec: &AppServiceSpec) -> bool {
        !matches!(self, Self::Recorded(recorded) if recorded == spec)
    }
}

/// Serialize a spec for the snapshot annotation
pub fn encode(spec: &AppServiceSpec) -> Result<String, Error> {
    serde_json::to_string(spec)
        .map_err(|e| Error::serialization_for_kind("AppService", e.to_string()))
}

/// Copy of `app` with its snapshot annotation set to its current spec
///
/// Everything else, including `resourceVersion`, is kept so the write is
/// rejected if the AppService changed since it was read.
pub fn with_snapshot(app: &AppService) -> Result<AppService, Error> {
    let encoded = encode(&app.spec)?;
    let mut updated = app.clone();
    updated
        .metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(SPEC_SNAPSHOT_ANNOTATION.to_string(), encoded);
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use appservice_common::crd::AppServicePort;

    fn web_spec(size: i32) -> AppServiceSpec {
        AppServiceSpec {
            size,
            image: "nginx:1.21".to_string(),
            ports: vec![AppServicePort {
                port: 80,
                target_port: Some(8080),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn annotated(value: &str) -> BTreeMap<String, String> {
        BTreeMap::from([(SPEC_SNAPSHOT_ANNOTATION.to_string(), value.to_string())])
    }

    #[test]
    fn missing_snapshot_is_drift() {
        let snapshot = Snapshot::from_annotations(None);
        assert_eq!(snapshot, Snapshot::Missing);
        assert!(snapshot.has_drifted(&web_spec(2)));

        let other = BTreeMap::from([("team".to_string(), "a".to_string())]);
        assert_eq!(Snapshot::from_annotations(Some(&other)), Snapshot::Missing);
    }

    #[test]
    fn corrupt_snapshot_is_drift() {
        let annotations = annotated("{not json");
        let snapshot = Snapshot::from_annotations(Some(&annotations));
        assert!(matches!(snapshot, Snapshot::Corrupt(_)));
        assert!(snapshot.has_drifted(&web_spec(2)));
    }

    /// Story: A snapshot written by the controller matches the spec it came from
    #[test]
    fn story_written_snapshot_matches_spec() {
        let mut app = AppService::new("web", web_spec(2));
        app.metadata.resource_version = Some("41".to_string());

        let updated = with_snapshot(&app).unwrap();
        assert_eq!(updated.metadata.resource_version.as_deref(), Some("41"));
        assert!(!Snapshot::read(&updated).has_drifted(&app.spec));
    }

    /// Story: Scaling 2 -> 3 shows up as drift against the recorded snapshot
    #[test]
    fn story_changed_spec_drifts() {
        let app = AppService::new("web", web_spec(2));
        let recorded = Snapshot::read(&with_snapshot(&app).unwrap());
        assert!(recorded.has_drifted(&web_spec(3)));
    }

    #[test]
    fn snapshot_comparison_ignores_formatting() {
        let annotations = annotated(
            r#"{ "ports": [ {"targetPort": 8080, "port": 80} ], "image": "nginx:1.21", "size": 2 }"#,
        );
        let snapshot = Snapshot::from_annotations(Some(&annotations));
        assert!(!snapshot.has_drifted(&web_spec(2)));
    }

    #[test]
    fn with_snapshot_keeps_other_annotations() {
        let mut app = AppService::new("web", web_spec(2));
        app.metadata.annotations = Some(BTreeMap::from([(
            "team".to_string(),
            "payments".to_string(),
        )]));

        let updated = with_snapshot(&app).unwrap();
        let annotations = updated.metadata.annotations.unwrap();
        assert_eq!(annotations.get("team").map(String::as_str), Some("payments"));
        assert!(annotations.contains_key(SPEC_SNAPSHOT_ANNOTATION));
    }
}

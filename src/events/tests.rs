//! Event model tests

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;
use test_case::test_case;

use super::*;
use crate::model::{CatalogKind, Tracked};

#[test]
fn test_diff_from_parts_rejects_unequal_lengths() {
    let err = PropertyDiff::from_parts(
        vec!["a".into(), "b".into()],
        vec![json!(1)],
        vec![json!(2), json!(3)],
    )
    .unwrap_err();
    assert_eq!(
        err,
        EventError::LengthMismatch {
            names: 2,
            old_values: 1,
            new_values: 2
        }
    );
}

#[test]
fn test_diff_deserialize_validates_lengths() {
    let bad = r#"{"names":["a"],"old_values":[],"new_values":[1]}"#;
    assert!(serde_json::from_str::<PropertyDiff>(bad).is_err());

    let good = r#"{"names":["a"],"old_values":[0],"new_values":[1]}"#;
    let diff: PropertyDiff = serde_json::from_str(good).unwrap();
    assert_eq!(diff.new_value("a"), Some(&json!(1)));
}

#[test]
fn test_diff_record_merges_repeated_names() {
    let mut diff = PropertyDiff::new();
    diff.record("level", json!("INFO"), json!("DEBUG"));
    diff.record("level", json!("DEBUG"), json!("TRACE"));

    assert_eq!(diff.len(), 1);
    assert_eq!(diff.old_values(), &[json!("INFO")]);
    assert_eq!(diff.new_values(), &[json!("TRACE")]);
}

#[test_case("styles/roads.sld", true ; "nested relative path")]
#[test_case("./styles/roads.sld", true ; "current dir prefix")]
#[test_case("/etc/passwd", false ; "absolute path")]
#[test_case("styles/../../secret", false ; "parent component")]
#[test_case("", false ; "empty path")]
fn test_document_path_validation(path: &str, valid: bool) {
    assert_eq!(DocumentFile::new(path, vec![]).is_ok(), valid);
}

#[test]
fn test_event_json_round_trip_keeps_kind_and_diff() {
    let mut edit = Tracked::new(LoggingSettings::default());
    edit.set("level", "DEBUG").unwrap();

    let event = ClusterEvent::LoggingSettingsChanged {
        source: edit.current().clone(),
        diff: edit.diff().clone(),
    };
    let decoded = ClusterEvent::from_json(&event.to_json().unwrap()).unwrap();

    assert_eq!(decoded.kind(), EventKind::LoggingSettingsChanged);
    assert_eq!(decoded, event);
    assert_eq!(decoded.diff().map(|d| d.len()), Some(1));
}

#[test]
fn test_event_subject() {
    let event = ClusterEvent::CatalogObjectAdded {
        source: CatalogInfo::new("l1", CatalogKind::Layer, "roads"),
    };
    assert_eq!(event.subject(), "layer 'roads' (l1)");
    assert!(event.diff().is_none());
    assert_eq!(event.kind().to_string(), "CatalogObjectAdded");
}

proptest! {
    #[test]
    fn prop_recorded_diff_sequences_have_equal_length(
        changes in prop::collection::vec(("[a-e]", any::<i64>(), any::<i64>()), 0..32)
    ) {
        let mut diff = PropertyDiff::new();
        for (name, old, new) in &changes {
            diff.record(name.clone(), json!(old), json!(new));
        }
        prop_assert_eq!(diff.names().len(), diff.old_values().len());
        prop_assert_eq!(diff.names().len(), diff.new_values().len());

        let encoded = serde_json::to_string(&diff).unwrap();
        let decoded: PropertyDiff = serde_json::from_str(&encoded).unwrap();
        prop_assert_eq!(decoded, diff);
    }
}

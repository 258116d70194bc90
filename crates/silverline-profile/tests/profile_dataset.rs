use std::fs;

use silverline_core::{CardinalityHint, ColumnType, EntityType};
use silverline_profile::{
    HeuristicPiiDetector, InputError, ProfileOptions, load_dataset, profile_batch, reload_dataset,
};

const CUSTOMERS: &str = "\
id,email,phone,full_name,city,age,signup
1,ana@example.com,555-010-0001,Ana Lima,Lisbon,34,2024-01-05
2,bo@example.org,555-010-0002,Bo Chen,Porto,,2024-01-06
3,cy@example.net,555-010-0003,Cy Diaz,Lisbon,51,2024-02-11
4,,555-010-0004,Di Eze,Braga,29,2024-03-01
5,ed@example.com,555-010-0005,Ed Fox,Porto,47,2024-03-19
";

#[test]
fn customers_file_profiles_with_pii_findings() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("customers.csv");
    fs::write(&path, CUSTOMERS).expect("write csv");

    let (handle, batch) = load_dataset(&path).expect("load");
    let profile = profile_batch(
        &handle,
        &batch,
        &ProfileOptions::default(),
        &HeuristicPiiDetector::new(),
    );

    assert_eq!(profile.dataset_id, handle.dataset_id);
    assert_eq!(profile.total_rows, 5);
    assert_eq!(profile.columns.len(), 7);

    let age = profile.column("age").expect("age");
    assert_eq!(age.inferred_type, Some(ColumnType::Integer));
    assert!((age.null_rate - 0.2).abs() < 1e-9);
    assert_eq!(age.min, Some(29.0));
    assert_eq!(age.max, Some(51.0));
    assert_eq!(
        profile.column("signup").and_then(|c| c.inferred_type),
        Some(ColumnType::Date)
    );
    assert_eq!(profile.column("id").map(|c| c.cardinality), Some(CardinalityHint::Unique));

    let found: Vec<(&str, EntityType)> = profile
        .pii_findings
        .iter()
        .map(|finding| (finding.column.as_str(), finding.entity_type.clone()))
        .collect();
    assert_eq!(
        found,
        vec![
            ("email", EntityType::EmailAddress),
            ("phone", EntityType::PhoneNumber),
            ("full_name", EntityType::Person),
            ("city", EntityType::Location),
        ]
    );

    let summary = serde_json::to_value(profile.summary()).expect("summary json");
    assert_eq!(summary["total_rows"], 5);
    assert_eq!(summary["pii_findings"].as_array().map(Vec::len), Some(4));
}

#[test]
fn edited_source_is_refused_on_reload() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("customers.csv");
    fs::write(&path, CUSTOMERS).expect("write csv");
    let (handle, batch) = load_dataset(&path).expect("load");

    let reloaded = reload_dataset(&handle).expect("reload unchanged");
    assert_eq!(reloaded.len(), batch.len());

    fs::write(&path, CUSTOMERS.replace("Lisbon", "Faro")).expect("rewrite");
    assert!(matches!(
        reload_dataset(&handle),
        Err(InputError::FingerprintMismatch { .. })
    ));
}

#[test]
fn header_only_file_profiles_as_empty() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("empty.csv");
    fs::write(&path, "id,email\n").expect("write csv");

    let (handle, batch) = load_dataset(&path).expect("load");
    assert!(batch.is_empty());
    let profile = profile_batch(
        &handle,
        &batch,
        &ProfileOptions::default(),
        &HeuristicPiiDetector::new(),
    );
    assert_eq!(profile.sampled_rows, 0);
    assert!(profile.pii_findings.is_empty());
    assert!(profile.columns.iter().all(|column| column.inferred_type.is_none()));
}

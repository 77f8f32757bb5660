use manisync_core::manifest::{FileEntry, Manifest};

#[test]
fn writes_camel_case_pretty_json() {
    let mf = Manifest::new(
        "1.0",
        vec![FileEntry {
            path: "a.txt".into(),
            size: 4,
            hash: "ab".into(),
            url: "http://h/a.txt".into(),
        }],
    );
    let json = mf.to_json_pretty().unwrap();
    assert!(json.contains("\"generatedAt\""));
    assert!(json.contains("\n  \"version\": \"1.0\""));
    let back = Manifest::from_json_lenient(&json).unwrap();
    assert_eq!(back, mf);
}

#[test]
fn reads_lenient_documents() {
    let src = r#"{
        "VERSION": "2.5",
        "GeneratedAt": "2024-03-01T10:00:00Z",
        "extra": {"nested": [1, 2,],},
        "Files": [
            {"Path": "a.txt", "SIZE": "4", "hash": "00ff", "Url": "http://h/a.txt", "mode": 420,},
            {"path": "b.txt", "size": 10, "hash": "11", "url": "http://h/b.txt"},
        ],
    }"#;
    let mf = Manifest::from_json_lenient(src).unwrap();
    assert_eq!(mf.version, "2.5");
    assert_eq!(mf.generated_at.to_rfc3339(), "2024-03-01T10:00:00+00:00");
    assert_eq!(mf.files.len(), 2);
    assert_eq!(mf.files[0].size, 4);
    assert_eq!(mf.files[0].path, "a.txt");
    assert_eq!(mf.files[1].size, 10);
    assert_eq!(mf.info().version, "2.5");
}

#[test]
fn rejects_malformed_documents() {
    assert!(Manifest::from_json_lenient("").is_err());
    assert!(Manifest::from_json_lenient("   \n").is_err());
    assert!(Manifest::from_json_lenient("{not json").is_err());
    assert!(Manifest::from_json_lenient(r#"{"files": [{"size": "lots"}]}"#).is_err());
    let dup = r#"{"files": [{"path": "a"}, {"path": "a"}]}"#;
    assert!(Manifest::from_json_lenient(dup).is_err());
}

#[test]
fn missing_fields_take_defaults() {
    let mf = Manifest::from_json_lenient("{}").unwrap();
    assert_eq!(mf.version, "1.0");
    assert!(mf.files.is_empty());
}

//! Edge case tests for revsync-engine
//!
//! These tests cover boundary conditions and unusual inputs.

use revsync_engine::{
    Change, ClientSync, ContentHasher, DigestAlgorithm, MdEntry, MemoryAdapter, MemoryStore,
    PrimaryKey, RowData, ServerSync, SyncConfig, TableDef, TableSyncStrategies,
};
use serde_json::{json, Value};

fn row(value: Value) -> RowData {
    serde_json::from_value(value).unwrap()
}

fn setup() -> (
    MemoryStore,
    ServerSync<MemoryAdapter>,
    MemoryStore,
    ClientSync<MemoryAdapter>,
) {
    let config = SyncConfig::new(TableSyncStrategies::default().with_table("items"));
    let server_db = MemoryStore::new();
    let client_db = MemoryStore::new();
    for db in [&server_db, &client_db] {
        db.create_table(TableDef::new("items", "id", ["name", "data"]))
            .unwrap();
    }
    let server = ServerSync::new(server_db.connect(), config.clone(), None).unwrap();
    let client = ClientSync::new(client_db.connect(), config, None).unwrap();
    (server_db, server, client_db, client)
}

// ============================================================================
// String Edge Cases
// ============================================================================

#[test]
fn empty_string_differs_from_null() {
    let hasher = ContentHasher::default();
    let empty = hasher.hash(Some(&row(json!({"id": 1, "name": ""}))));
    let null = hasher.hash(Some(&row(json!({"id": 1, "name": null}))));
    let null_text = hasher.hash(Some(&row(json!({"id": 1, "name": "null"}))));
    assert_ne!(empty, null);
    assert_ne!(null, null_text);
}

#[test]
fn unicode_strings_round_trip() {
    let (server_db, mut server, _client_db, mut client) = setup();

    let names = [
        "日本語テスト",
        "Привет мир",
        "مرحبا بالعالم",
        "🎉🚀💯",
        "Hello\nWorld\tTab",
        "Null\0Test",
        "Unit\u{1f}Sep\u{1e}arators",
    ];
    for (i, name) in names.iter().enumerate() {
        let pk = i as i64;
        client
            .record_local_change("items", PrimaryKey::Int(pk), row(json!({"id": pk, "name": name})))
            .unwrap();
    }
    client.sync(&mut server).unwrap();

    for (i, name) in names.iter().enumerate() {
        let stored = server_db.row("items", &PrimaryKey::Int(i as i64)).unwrap();
        assert_eq!(stored["name"], *name, "Failed for: {}", name);
    }
}

#[test]
fn very_long_strings() {
    let long = "x".repeat(1_000_000);
    let hasher = ContentHasher::new(DigestAlgorithm::Sha256);
    let a = hasher.hash(Some(&row(json!({"id": 1, "name": long}))));
    let b = hasher.hash(Some(&row(json!({"id": 1, "name": format!("{long}y")}))));
    assert_eq!(a.len(), 64);
    assert_ne!(a, b);
}

// ============================================================================
// Numeric Edge Cases
// ============================================================================

#[test]
fn integer_boundaries() {
    let hasher = ContentHasher::default();
    for value in [i64::MIN, -1, 0, 1, i64::MAX] {
        let a = hasher.hash(Some(&row(json!({"id": value}))));
        let b = hasher.hash(Some(&row(json!({"id": value.to_string()}))));
        assert_eq!(a, b, "Failed for: {}", value);
    }
    let big = hasher.hash(Some(&row(json!({"id": u64::MAX}))));
    let max = hasher.hash(Some(&row(json!({"id": i64::MAX}))));
    assert_ne!(big, max);
}

#[test]
fn integral_floats_hash_like_integers() {
    let hasher = ContentHasher::default();
    assert_eq!(
        hasher.hash(Some(&row(json!({"qty": 5.0})))),
        hasher.hash(Some(&row(json!({"qty": 5}))))
    );
    assert_ne!(
        hasher.hash(Some(&row(json!({"qty": 5.5})))),
        hasher.hash(Some(&row(json!({"qty": 5}))))
    );
}

#[test]
fn primary_key_coercion() {
    assert_eq!(PrimaryKey::from("42"), PrimaryKey::Int(42));
    assert_eq!(PrimaryKey::from(" 42 "), PrimaryKey::Text(" 42 ".into()));
    assert_eq!(PrimaryKey::from_value(&json!(42.0)), Some(PrimaryKey::Int(42)));
    assert_eq!(PrimaryKey::from_value(&json!("abc")), Some(PrimaryKey::Text("abc".into())));
    assert_eq!(PrimaryKey::from_value(&json!(null)), None);
    assert_eq!(PrimaryKey::from_value(&json!(true)), None);

    // Integer keys order numerically, text keys after them.
    let mut keys = vec![
        PrimaryKey::Text("b".into()),
        PrimaryKey::Int(10),
        PrimaryKey::Int(9),
        PrimaryKey::Text("a".into()),
    ];
    keys.sort();
    assert_eq!(
        keys,
        vec![
            PrimaryKey::Int(9),
            PrimaryKey::Int(10),
            PrimaryKey::Text("a".into()),
            PrimaryKey::Text("b".into()),
        ]
    );
}

// ============================================================================
// JSON Values
// ============================================================================

#[test]
fn nested_json_key_order_is_irrelevant() {
    let hasher = ContentHasher::default();
    let a: RowData = serde_json::from_str(r#"{"id": 1, "data": {"a": 1, "b": [1, {"c": "x"}]}}"#).unwrap();
    let b: RowData = serde_json::from_str(r#"{"data": {"b": [1, {"c": "x"}], "a": 1}, "id": 1}"#).unwrap();
    assert_eq!(hasher.hash(Some(&a)), hasher.hash(Some(&b)));
}

#[test]
fn json_with_all_types_syncs() {
    let (server_db, mut server, _client_db, mut client) = setup();
    let data = json!({
        "null": null,
        "bool": true,
        "int": -7,
        "float": 3.25,
        "string": "s",
        "array": [1, "two", null],
        "object": {"nested": {"deep": [[]]}}
    });
    client
        .record_local_change("items", PrimaryKey::Int(1), row(json!({"id": 1, "data": data})))
        .unwrap();
    client.sync(&mut server).unwrap();
    assert_eq!(server_db.row("items", &PrimaryKey::Int(1)).unwrap()["data"], data);
}

// ============================================================================
// Rows and Keys
// ============================================================================

#[test]
fn text_primary_keys_with_special_characters() {
    let (server_db, mut server, client_db, mut client) = setup();
    let ids = ["with space", "with/slash", "with'quote", "ümlaut", ""];
    for id in ids {
        client
            .record_local_change("items", PrimaryKey::Text(id.into()), row(json!({"id": id})))
            .unwrap();
    }
    client.sync(&mut server).unwrap();
    for id in ids {
        let key = PrimaryKey::Text(id.into());
        assert!(server_db.row("items", &key).is_some(), "Failed for: {:?}", id);
        assert_eq!(server_db.row("items", &key), client_db.row("items", &key));
    }
}

#[test]
fn row_with_only_primary_key() {
    let (server_db, mut server, _client_db, mut client) = setup();
    client
        .record_local_change("items", PrimaryKey::Int(1), row(json!({"id": 1})))
        .unwrap();
    client.sync(&mut server).unwrap();
    assert_eq!(server_db.row("items", &PrimaryKey::Int(1)).unwrap().len(), 1);
}

#[test]
fn rapid_updates_same_row() {
    let (server_db, mut server, _client_db, mut client) = setup();
    for i in 0..100 {
        client
            .record_local_change("items", PrimaryKey::Int(1), row(json!({"id": 1, "name": format!("v{i}")})))
            .unwrap();
    }
    assert_eq!(client.pending_changes().unwrap().len(), 1);
    client.sync(&mut server).unwrap();
    assert_eq!(server_db.row("items", &PrimaryKey::Int(1)).unwrap()["name"], "v99");
}

#[test]
fn add_then_delete_before_first_sync() {
    let (server_db, mut server, _client_db, mut client) = setup();
    client
        .record_local_change("items", PrimaryKey::Int(1), row(json!({"id": 1})))
        .unwrap();
    assert!(client.record_local_delete("items", PrimaryKey::Int(1)).unwrap());
    client.sync(&mut server).unwrap();
    assert!(server_db.row("items", &PrimaryKey::Int(1)).is_none());
}

#[test]
fn many_pending_changes() {
    let (server_db, mut server, _client_db, mut client) = setup();
    for pk in 0..1000i64 {
        client
            .record_local_change("items", PrimaryKey::Int(pk), row(json!({"id": pk, "name": "n"})))
            .unwrap();
    }
    let report = client.sync(&mut server).unwrap();
    assert_eq!(report.pushed, 1000);
    assert_eq!(server_db.row_count("items"), 1000);
    assert_eq!(server_db.revision(), 1);
}

// ============================================================================
// Protocol Values
// ============================================================================

#[test]
fn empty_server_returns_requested_revision() {
    let (_server_db, mut server, _client_db, _client) = setup();
    let set = server.get_changes(0).unwrap();
    assert!(set.is_empty());
    assert_eq!(set.revision, 0);
}

#[test]
fn change_json_shape() {
    let change = Change::deleted(MdEntry::tombstone("items", PrimaryKey::Text("k".into()), 3));
    let value = serde_json::to_value(&change).unwrap();
    assert_eq!(
        value,
        json!({
            "entry": {
                "primaryKey": "k",
                "exists": false,
                "revision": 3,
                "tableName": "items",
                "mdv": "0"
            }
        })
    );
    let parsed: Change = serde_json::from_value(value).unwrap();
    assert_eq!(parsed, change);
}

mod support;

use recbase::tools::index::parse_index;
use recbase::{Collection, CollectionType, ValidationError, validate_collection};
use support::TestApp;

fn email_index_position(collection: &Collection) -> usize {
    collection
        .indexes
        .iter()
        .position(|raw| {
            let parsed = parse_index(raw);
            parsed.columns.len() == 1 && parsed.columns[0].name == "email"
        })
        .expect("email unique index")
}

fn has_code(errors: &ValidationError, code: &str) -> bool {
    errors.issues.iter().any(|issue| issue.code == code)
}

#[test]
fn system_unique_index_cannot_be_removed() {
    let app = TestApp::new();
    let original = app.db.require_collection("users").unwrap();
    let mut users = original.clone();
    let pos = email_index_position(&users);
    users.indexes.remove(pos);

    let errors = validate_collection(&app.db, &users, Some(&original));
    assert!(errors.has("indexes"));
    assert!(has_code(&errors, "validation_system_index_change"));
}

#[test]
fn system_unique_index_cannot_gain_columns() {
    let app = TestApp::new();
    let original = app.db.require_collection("users").unwrap();
    let mut users = original.clone();
    let pos = email_index_position(&users);
    let mut index = parse_index(&users.indexes[pos]);
    index.columns.push(recbase::tools::index::IndexColumn {
        name: "name".to_string(),
        ..Default::default()
    });
    users.indexes[pos] = index.build();

    let errors = validate_collection(&app.db, &users, Some(&original));
    assert!(has_code(&errors, "validation_system_index_change"));
}

#[test]
fn system_unique_index_accepts_collation_and_where_changes() {
    let app = TestApp::new();
    let original = app.db.require_collection("users").unwrap();
    let mut users = original.clone();
    let pos = email_index_position(&users);
    let mut index = parse_index(&users.indexes[pos]);
    index.columns[0].collate = "NOCASE".to_string();
    index.where_clause = "`email` != '' AND `verified` = TRUE".to_string();
    users.indexes[pos] = index.build();

    let errors = validate_collection(&app.db, &users, Some(&original));
    assert!(errors.is_empty(), "unexpected errors: {errors:?}");

    app.db.save_collection(&mut users).unwrap();
}

#[test]
fn collection_type_is_immutable() {
    let app = TestApp::new();
    let original = app.db.require_collection("demo2").unwrap();
    let mut changed = original.clone();
    changed.collection_type = CollectionType::Auth;
    changed.ensure_auth_fields();

    let errors = validate_collection(&app.db, &changed, Some(&original));
    assert!(errors.has("type"));
}

#[test]
fn duplicated_collection_name_is_rejected() {
    let app = TestApp::new();
    let mut duplicate = Collection::new_base("DEMO1");
    let err = app.db.save_collection(&mut duplicate).unwrap_err();
    let errors = err.as_validation().expect("validation error");
    assert!(errors.has("name"));
}

#[test]
fn invalid_rule_is_reported_under_its_key() {
    let app = TestApp::new();
    let mut demo2 = app.db.require_collection("demo2").unwrap();
    demo2.rules.list_rule = Some("missing_field = 1".to_string());

    let err = app.db.save_collection(&mut demo2).unwrap_err();
    let errors = err.as_validation().expect("validation error");
    assert!(errors.has("listRule"));

    demo2.rules.list_rule = Some("title ~ 'abc' && active = true".to_string());
    app.db.save_collection(&mut demo2).unwrap();
}

#[test]
fn relation_to_missing_collection_is_rejected() {
    let app = TestApp::new();
    let mut broken = Collection::new_base("broken");
    broken
        .fields
        .add(recbase::fields::RelationField::new("rel", "missing_collection_id").into());

    let err = app.db.save_collection(&mut broken).unwrap_err();
    assert!(err.as_validation().is_some());
    assert!(!app.db.has_table("broken").unwrap());
}

#[test]
fn saving_a_known_id_without_timestamps_updates_in_place() {
    let app = TestApp::new();
    let demo2 = app.db.require_collection("demo2").unwrap();
    let created = demo2.created.clone();

    let mut value = demo2.to_json().unwrap();
    let map = value.as_object_mut().unwrap();
    map.remove("created");
    map.remove("updated");
    map.insert("name".into(), "demo2_edit".into());
    let mut edited = Collection::from_json(app.db.registry(), value).unwrap();
    app.db.save_collection(&mut edited).unwrap();

    assert_eq!(edited.id, demo2.id);
    assert_eq!(edited.created, created);
    assert!(!app.db.has_table("demo2").unwrap());
    assert!(app.db.has_table("demo2_edit").unwrap());

    let all = app.db.find_all_collections(&[]).unwrap();
    assert_eq!(all.iter().filter(|c| c.id == demo2.id).count(), 1);
    assert!(!all.iter().any(|c| c.name == "demo2"));
}

#[test]
fn new_collection_with_taken_generated_id_gets_a_suffix() {
    let app = TestApp::new();
    let mut demo2 = app.db.require_collection("demo2").unwrap();
    demo2.name = "demo2_renamed".to_string();
    app.db.save_collection(&mut demo2).unwrap();

    // same type and name as the original demo2, so the same generated id
    let mut fresh = Collection::new_base("demo2");
    assert_eq!(fresh.id, demo2.id);
    app.db.save_collection(&mut fresh).unwrap();

    assert_ne!(fresh.id, demo2.id);
    assert!(fresh.id.starts_with(&demo2.id));
    assert!(app.db.has_table("demo2").unwrap());
    assert!(app.db.has_table("demo2_renamed").unwrap());
}

mod support;

use recbase::fields::{Field, TextField};
use serde_json::json;
use support::TestApp;

fn set_select_max(app: &TestApp, name: &str, max_select: usize) {
    let mut demo1 = app.db.require_collection("demo1").unwrap();
    match demo1.fields.get_by_name_mut(name) {
        Some(Field::Select(select)) => select.max_select = max_select,
        other => panic!("expected select field, got {other:?}"),
    }
    app.db.save_collection(&mut demo1).unwrap();
}

#[test]
fn single_to_multiple_wraps_existing_values() {
    let app = TestApp::new();
    let filled = app.create_record("demo1", json!({"select_one": "a"}));
    let empty = app.create_record("demo1", json!({"text": "no select"}));

    set_select_max(&app, "select_one", 2);

    assert_eq!(app.raw_json("demo1", &filled.id(), "select_one"), json!(["a"]));
    assert_eq!(app.raw_json("demo1", &empty.id(), "select_one"), json!([]));
}

#[test]
fn multiple_to_single_keeps_last_value() {
    let app = TestApp::new();
    let filled = app.create_record("demo1", json!({"select_many": ["a", "b"]}));
    let empty = app.create_record("demo1", json!({"text": "no select"}));

    set_select_max(&app, "select_many", 1);

    assert_eq!(app.raw_json("demo1", &filled.id(), "select_many"), json!("b"));
    assert_eq!(app.raw_value("demo1", &empty.id(), "select_many"), json!(""));
}

#[test]
fn swapped_field_names_keep_their_data() {
    let app = TestApp::new();
    let mut demo2 = app.db.require_collection("demo2").unwrap();
    demo2.fields.add(TextField::new("subtitle").into());
    app.db.save_collection(&mut demo2).unwrap();

    let record = app.create_record("demo2", json!({"title": "first", "subtitle": "second"}));

    let title_id = demo2.fields.get_by_name("title").unwrap().id().to_string();
    let subtitle_id = demo2.fields.get_by_name("subtitle").unwrap().id().to_string();
    demo2.fields.get_by_id_mut(&title_id).unwrap().set_name("subtitle");
    demo2.fields.get_by_id_mut(&subtitle_id).unwrap().set_name("title");
    app.db.save_collection(&mut demo2).unwrap();

    assert_eq!(app.raw_value("demo2", &record.id(), "title"), json!("second"));
    assert_eq!(app.raw_value("demo2", &record.id(), "subtitle"), json!("first"));
}

#[test]
fn removed_and_added_fields_alter_the_table() {
    let app = TestApp::new();
    let mut demo2 = app.db.require_collection("demo2").unwrap();
    demo2.fields.remove_by_name("active");
    demo2.fields.add(TextField::new("slug").into());
    app.db.save_collection(&mut demo2).unwrap();

    let columns: Vec<String> = app
        .db
        .table_columns("demo2")
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert!(columns.contains(&"slug".to_string()));
    assert!(!columns.contains(&"active".to_string()));
}

#[test]
fn renamed_collection_renames_table() {
    let app = TestApp::new();
    let record = app.create_record("demo2", json!({"title": "kept"}));

    let mut demo2 = app.db.require_collection("demo2").unwrap();
    demo2.name = "demo2_renamed".to_string();
    app.db.save_collection(&mut demo2).unwrap();

    assert!(!app.db.has_table("demo2").unwrap());
    assert_eq!(app.raw_value("demo2_renamed", &record.id(), "title"), json!("kept"));
}

#[test]
fn sync_inside_an_outer_transaction_rolls_back_with_it() {
    let app = TestApp::new();
    let result: Result<(), recbase::CoreError> = app.db.run_in_transaction(|db| {
        let mut scratch = recbase::Collection::new_base("scratch");
        scratch.fields.add(TextField::new("title").into());
        db.save_collection(&mut scratch)?;
        assert!(db.has_table("scratch")?);
        Err(recbase::CoreError::invalid("abort"))
    });
    assert!(result.is_err());
    assert!(!app.db.has_table("scratch").unwrap());
    assert!(app.db.find_collection_by_name_or_id("scratch").unwrap().is_none());
}

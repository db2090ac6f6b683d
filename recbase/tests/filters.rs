mod support;

use recbase::fields::Field;
use recbase::search::FieldResolver;
use recbase::{RecordFieldResolver, RequestInfo, SearchQuery};
use serde_json::{Map, json};
use support::{TestApp, sorted};

/// Two demo3 records linked from demo4 through the multiple relation.
fn linked_fixture(app: &TestApp) -> (String, String, String) {
    let linked = app.create_record("demo3", json!({"title": "linked"})).id();
    let lonely = app.create_record("demo3", json!({"title": "lonely"})).id();
    let required = app.create_record("demo3", json!({"title": "required"})).id();

    app.create_record(
        "demo4",
        json!({
            "title": "x",
            "rel_one_no_cascade_required": required,
            "rel_many_no_cascade": [linked],
        }),
    );
    app.create_record(
        "demo4",
        json!({
            "title": "y",
            "rel_one_no_cascade_required": required,
            "rel_many_no_cascade": [linked, lonely],
        }),
    );
    (linked, lonely, required)
}

#[test]
fn plain_field_filters() {
    let app = TestApp::new();
    let a = app.create_record("demo1", json!({"text": "Alpha", "number": 10, "bool": true})).id();
    let b = app.create_record("demo1", json!({"text": "beta", "number": 2})).id();

    assert_eq!(app.find_ids("demo1", "number > 5"), vec![a.clone()]);
    assert_eq!(app.find_ids("demo1", "text ~ 'alp'"), vec![a.clone()]);
    assert_eq!(app.find_ids("demo1", "bool = false"), vec![b.clone()]);
    assert_eq!(app.find_ids("demo1", "text:lower = 'alpha'"), vec![a.clone()]);
    assert_eq!(app.find_ids("demo1", "text != ''"), sorted(vec![a, b]));
    assert!(app.find_ids("demo1", "select_one = 'a'").is_empty());
}

#[test]
fn multiple_field_any_and_each_semantics() {
    let app = TestApp::new();
    let ab = app.create_record("demo1", json!({"select_many": ["a", "b"]})).id();
    let aa = app.create_record("demo1", json!({"select_many": ["a"]})).id();
    let none = app.create_record("demo1", json!({"text": "empty"})).id();

    assert_eq!(app.find_ids("demo1", "select_many ?= 'b'"), vec![ab.clone()]);
    assert_eq!(app.find_ids("demo1", "select_many:each = 'a'"), vec![aa.clone()]);
    assert_eq!(app.find_ids("demo1", "select_many:length = 2"), vec![ab.clone()]);
    // a negated comparison excludes rows where any item matches
    assert_eq!(app.find_ids("demo1", "select_many != 'b'"), sorted(vec![aa, none]));
}

#[test]
fn back_relation_through_multiple_field_matches_any_linked_row() {
    let app = TestApp::new();
    let (linked, lonely, _) = linked_fixture(&app);

    assert_eq!(app.find_ids("demo3", "demo4_via_rel_many_no_cascade.title = 'x'"), vec![linked.clone()]);
    assert_eq!(
        app.find_ids("demo3", "demo4_via_rel_many_no_cascade.title ?= 'y'"),
        sorted(vec![linked.clone(), lonely])
    );
    assert!(app.find_ids("demo3", "demo4_via_rel_many_no_cascade.title = 'z'").is_empty());

    // each is reserved for fields that hold multiple values
    let err = app
        .db
        .find_records_by_filter("demo3", "demo4_via_rel_many_no_cascade.title:each = 'y'", "", 0, 0, &Map::new())
        .unwrap_err();
    assert!(err.to_string().contains("each"), "{err}");
}

#[test]
fn relation_path_filters() {
    let app = TestApp::new();
    let (linked, _, required) = linked_fixture(&app);

    assert_eq!(app.find_ids("demo4", "rel_one_no_cascade_required.title = 'required'").len(), 2);
    assert_eq!(app.find_ids("demo4", "rel_many_no_cascade.title ?= 'lonely'").len(), 1);

    let mut params = Map::new();
    params.insert("id".into(), json!(linked));
    let found = app
        .db
        .find_records_by_filter("demo4", "rel_many_no_cascade ?= {:id}", "title", 0, 0, &params)
        .unwrap();
    assert_eq!(found.iter().map(|r| r.get_string("title")).collect::<Vec<_>>(), vec!["x", "y"]);

    params.insert("id".into(), json!(required));
    assert_eq!(app.db.count_records("demo4", "rel_one_no_cascade_required = {:id}", &params).unwrap(), 2);
}

#[test]
fn single_relation_with_unique_index_is_not_multi_match() {
    let app = TestApp::new();
    let mut demo4 = app.db.require_collection("demo4").unwrap();
    demo4
        .indexes
        .push("CREATE UNIQUE INDEX `idx_demo4_one` ON `demo4` (`rel_one_no_cascade`)".to_string());
    app.db.save_collection(&mut demo4).unwrap();

    let demo3 = app.db.require_collection("demo3").unwrap();
    let mut resolver = RecordFieldResolver::new(&app.db, &demo3, None, true);
    let unique = resolver.resolve("demo4_via_rel_one_no_cascade.title").unwrap();
    assert!(unique.multi_match.is_none());

    let multi = resolver.resolve("demo4_via_rel_many_no_cascade.title").unwrap();
    assert!(multi.multi_match.is_some());
}

#[test]
fn request_auth_fields_resolve_statically() {
    let app = TestApp::new();
    let user = app.create_record(
        "users",
        json!({"email": "test@example.com", "password": "12345678", "name": "tester"}),
    );
    let owned = app.create_record("demo2", json!({"title": "tester"})).id();
    app.create_record("demo2", json!({"title": "other"}));

    let info = RequestInfo {
        auth: Some(user),
        ..RequestInfo::default()
    };
    let query = SearchQuery {
        filter: Some("title = @request.auth.name && @request.auth.id != ''".to_string()),
        ..SearchQuery::default()
    };
    let result = app.db.search_records("demo2", &query, Some(&info)).unwrap();
    assert_eq!(result.items.iter().map(|r| r.id()).collect::<Vec<_>>(), vec![owned]);

    let guest = app.db.search_records("demo2", &query, None).unwrap();
    assert!(guest.items.is_empty());
}

#[test]
fn search_records_paginates_and_hides_hidden_fields() {
    let app = TestApp::new();
    for i in 0..5 {
        app.create_record("demo2", json!({"title": format!("item{i}")}));
    }

    let query = SearchQuery {
        page: Some(2),
        per_page: Some(2),
        sort: Some("-title".to_string()),
        ..SearchQuery::default()
    };
    let result = app.db.search_records("demo2", &query, None).unwrap();
    assert_eq!(result.total, Some(5));
    assert_eq!(result.total_pages(), Some(3));
    assert_eq!(
        result.items.iter().map(|r| r.get_string("title")).collect::<Vec<_>>(),
        vec!["item2", "item1"]
    );

    let hidden = SearchQuery {
        filter: Some("tokenKey != ''".to_string()),
        ..SearchQuery::default()
    };
    assert!(app.db.search_records("users", &hidden, None).is_err());
}

#[test]
fn hidden_field_filters_are_allowed_internally() {
    let app = TestApp::new();
    app.create_record(
        "users",
        json!({"email": "a@example.com", "password": "12345678"}),
    );
    assert_eq!(app.find_ids("users", "tokenKey != ''").len(), 1);

    let users = app.db.require_collection("users").unwrap();
    assert!(matches!(users.fields.get_by_name("tokenKey"), Some(Field::Text(_))));
}

#[test]
fn collection_conditions_with_the_same_alias_match_one_row() {
    let app = TestApp::new();
    let other = app.create_record("demo3", json!({"title": "other"})).id();
    let wanted = app.create_record("demo3", json!({"title": "wanted"})).id();
    app.create_record("demo4", json!({"title": "x", "rel_one_no_cascade_required": other}));
    app.create_record("demo4", json!({"title": "y", "rel_one_no_cascade_required": wanted}));
    let target = app.create_record("demo2", json!({"title": "target"})).id();

    let mut params = Map::new();
    params.insert("wanted".into(), json!(wanted));
    let ids = |filter: &str| {
        app.db
            .find_records_by_filter("demo2", filter, "", 0, 0, &params)
            .unwrap()
            .iter()
            .map(|r| r.id())
            .collect::<Vec<_>>()
    };

    // no single demo4 row has both the title and the relation
    assert!(
        ids("@collection.demo4:m.title ?= 'x' && @collection.demo4:m.rel_one_no_cascade_required ?= {:wanted}")
            .is_empty()
    );
    assert_eq!(
        ids("@collection.demo4:m.title ?= 'y' && @collection.demo4:m.rel_one_no_cascade_required ?= {:wanted}"),
        vec![target.clone()]
    );
    // separate aliases are matched independently
    assert_eq!(
        ids("@collection.demo4:a.title ?= 'x' && @collection.demo4:b.rel_one_no_cascade_required ?= {:wanted}"),
        vec![target.clone()]
    );
    assert_eq!(app.find_ids("demo2", "@collection.demo4.title = 'y'"), vec![target]);
}

#![allow(dead_code)]

use std::sync::Arc;

use recbase::fields::{
    BoolField, FileField, JsonField, NumberField, RelationField, SelectField, TextField,
};
use recbase::filesystem::{MemoryFilesystem, OpContext};
use recbase::{Collection, Db, Record};
use serde_json::{Map, Value};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// In-memory database with the demo collections plus a file store.
pub struct TestApp {
    pub db: Db,
    pub fs: MemoryFilesystem,
    pub ctx: OpContext,
}

impl TestApp {
    pub fn new() -> Self {
        init_logger();
        let db = Db::open_in_memory().expect("in-memory database");
        let app = Self {
            db,
            fs: MemoryFilesystem::new(),
            ctx: OpContext::new(),
        };
        app.create_demo_collections();
        app
    }

    fn save(&self, mut collection: Collection) -> Collection {
        self.db
            .save_collection(&mut collection)
            .unwrap_or_else(|err| panic!("failed to save collection {}: {err}", collection.name));
        collection
    }

    fn create_demo_collections(&self) {
        let mut demo1 = Collection::new_base("demo1");
        demo1.fields.add(TextField::new("text").into());
        demo1.fields.add(NumberField::new("number").into());
        demo1.fields.add(BoolField::new("bool").into());
        demo1.fields.add(SelectField::new("select_one", &["a", "b", "c"]).into());
        demo1.fields.add(SelectField::new("select_many", &["a", "b", "c"]).multiple(3).into());
        demo1.fields.add(JsonField::new("json").into());
        self.save(demo1);

        let mut demo2 = Collection::new_base("demo2");
        demo2.fields.add(TextField::new("title").into());
        demo2.fields.add(BoolField::new("active").into());
        self.save(demo2);

        let mut demo3 = Collection::new_base("demo3");
        demo3.fields.add(TextField::new("title").into());
        let mut files = FileField::new("files");
        files.max_select = 5;
        demo3.fields.add(files.into());
        let demo3 = self.save(demo3);

        let mut demo4 = Collection::new_base("demo4");
        demo4.fields.add(TextField::new("title").into());
        demo4.fields.add(RelationField::new("rel_one_no_cascade", demo3.id.clone()).into());
        let mut required_one = RelationField::new("rel_one_no_cascade_required", demo3.id.clone());
        required_one.required = true;
        demo4.fields.add(required_one.into());
        let mut one_cascade = RelationField::new("rel_one_cascade", demo3.id.clone());
        one_cascade.cascade_delete = true;
        demo4.fields.add(one_cascade.into());
        demo4.fields.add(RelationField::new("rel_many_no_cascade", demo3.id.clone()).multiple(5).into());
        let mut many_cascade = RelationField::new("rel_many_cascade", demo3.id.clone()).multiple(5);
        many_cascade.cascade_delete = true;
        demo4.fields.add(many_cascade.into());
        self.save(demo4);

        let mut users = Collection::new_auth("users");
        users.fields.add(TextField::new("name").into());
        self.save(users);
    }

    pub fn collection(&self, name: &str) -> Arc<Collection> {
        Arc::new(self.db.require_collection(name).expect("existing collection"))
    }

    /// Creates a record assigning `values` (a JSON object) through [`Record::set`].
    pub fn create_record(&self, collection: &str, values: Value) -> Record {
        let mut record = Record::new(self.collection(collection));
        if let Value::Object(map) = values {
            for (key, value) in map {
                record.set(&key, value);
            }
        }
        self.db
            .save_record(&self.fs, &self.ctx, &mut record)
            .unwrap_or_else(|err| panic!("failed to save {collection} record: {err}"));
        record
    }

    pub fn find_ids(&self, collection: &str, filter: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .db
            .find_records_by_filter(collection, filter, "", 0, 0, &Map::new())
            .unwrap_or_else(|err| panic!("filter {filter:?} failed: {err}"))
            .iter()
            .map(Record::id)
            .collect();
        ids.sort();
        ids
    }

    /// Raw stored column value of a record.
    pub fn raw_value(&self, table: &str, id: &str, column: &str) -> Value {
        let rows = self
            .db
            .query_maps(
                &format!("SELECT `{column}` FROM `{table}` WHERE `id` = :id"),
                &[("id".into(), rusqlite::types::Value::Text(id.to_string()))],
            )
            .expect("raw select");
        rows.into_iter()
            .next()
            .and_then(|mut row| row.remove(column))
            .unwrap_or(Value::Null)
    }

    /// Same as [`TestApp::raw_value`] but decodes JSON encoded text columns.
    pub fn raw_json(&self, table: &str, id: &str, column: &str) -> Value {
        match self.raw_value(table, id, column) {
            Value::String(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
            other => other,
        }
    }
}

pub fn sorted(mut ids: Vec<String>) -> Vec<String> {
    ids.sort();
    ids
}

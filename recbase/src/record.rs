//! Record value container.
//!
//! A record holds the raw values of its collection fields plus the snapshot
//! captured at load time. Assignments through [`Record::set`] go through the
//! field setters, so modifier keys such as `tags+` or `password:hash` work
//! without the record knowing about them.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::collection::Collection;
use crate::fields::{
    FIELD_NAME_EMAIL, FIELD_NAME_EMAIL_VISIBILITY, FIELD_NAME_ID, FIELD_NAME_PASSWORD, Field, PasswordState,
    value_to_bool, value_to_f64, value_to_string, verify_password,
};
use crate::filesystem::UploadedFile;
use crate::tools::list::to_unique_string_vec;

#[derive(Debug, Clone)]
pub struct Record {
    collection: Arc<Collection>,
    data: Map<String, Value>,
    original: Map<String, Value>,
    is_new: bool,
    pending_files: BTreeMap<String, Vec<UploadedFile>>,
    passwords: BTreeMap<String, PasswordState>,
    forced_autodates: BTreeSet<String>,
}

impl Record {
    pub fn new(collection: Arc<Collection>) -> Self {
        Self {
            collection,
            data: Map::new(),
            original: Map::new(),
            is_new: true,
            pending_files: BTreeMap::new(),
            passwords: BTreeMap::new(),
            forced_autodates: BTreeSet::new(),
        }
    }

    /// Builds a persisted record from a table row, preparing every value
    /// through its field.
    pub fn load(collection: Arc<Collection>, mut row: Map<String, Value>) -> Self {
        let mut data = Map::new();
        for field in collection.fields.iter() {
            let raw = row.remove(field.name()).unwrap_or(Value::Null);
            data.insert(field.name().to_string(), field.prepare_value(&raw));
        }
        Self {
            original: data.clone(),
            data,
            is_new: false,
            ..Self::new(collection)
        }
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    pub fn collection_arc(&self) -> Arc<Collection> {
        Arc::clone(&self.collection)
    }

    pub fn table_name(&self) -> &str {
        self.collection.table_name()
    }

    pub fn id(&self) -> String {
        self.get_string(FIELD_NAME_ID)
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.data.insert(FIELD_NAME_ID.to_string(), Value::String(id.into()));
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Marks the current state as persisted.
    pub fn mark_as_saved(&mut self) {
        self.is_new = false;
        self.original = self.data.clone();
        self.passwords.clear();
        self.forced_autodates.clear();
    }

    /// Snapshot of the values at load (or last save) time.
    pub fn original(&self) -> &Map<String, Value> {
        &self.original
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    /// Assigns `value` to `key` through the matching field setter, falling
    /// back to a prepared plain assignment.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        let collection = Arc::clone(&self.collection);
        for field in collection.fields.iter() {
            if let Some(setter) = field.find_setter(key) {
                setter(self, value);
                return;
            }
        }
        match collection.fields.get_by_name(key) {
            Some(field) => {
                let prepared = field.prepare_value(&value);
                self.data.insert(field.name().to_string(), prepared);
            }
            None => {
                self.data.insert(key.to_string(), value);
            }
        }
    }

    /// Reads `key` through the matching field getter, falling back to the raw value.
    pub fn get(&self, key: &str) -> Value {
        for field in self.collection.fields.iter() {
            if let Some(getter) = field.find_getter(key) {
                return getter(self);
            }
        }
        self.get_raw(key).cloned().unwrap_or(Value::Null)
    }

    pub fn get_raw(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }

    pub fn set_raw(&mut self, name: &str, value: Value) {
        self.data.insert(name.to_string(), value);
    }

    pub fn get_string(&self, key: &str) -> String {
        value_to_string(&self.get(key))
    }

    pub fn get_f64(&self, key: &str) -> f64 {
        value_to_f64(&self.get(key))
    }

    pub fn get_bool(&self, key: &str) -> bool {
        value_to_bool(&self.get(key))
    }

    pub fn get_string_vec(&self, key: &str) -> Vec<String> {
        to_unique_string_vec(&self.get(key))
    }

    /// Whether the raw value of `name` differs from the original snapshot.
    pub fn changed(&self, name: &str) -> bool {
        self.data.get(name) != self.original.get(name)
    }

    /// Storage prefix of the record files (`<collectionId>/<recordId>`).
    pub fn base_files_path(&self) -> String {
        format!("{}/{}", self.collection.id, self.id())
    }

    /// Queues new files for a file field and appends their generated names to its value.
    pub fn add_files(&mut self, field_name: &str, files: Vec<UploadedFile>) {
        let names: Vec<Value> = files.iter().map(|f| Value::String(f.name.clone())).collect();
        self.pending_files.entry(field_name.to_string()).or_default().extend(files);
        self.set(&format!("{field_name}+"), Value::Array(names));
    }

    pub fn pending_files(&self, field_name: &str) -> &[UploadedFile] {
        self.pending_files.get(field_name).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn clear_pending(&mut self, field_name: &str) {
        self.pending_files.remove(field_name);
    }

    pub fn password_state(&self, field_name: &str) -> Option<&PasswordState> {
        self.passwords.get(field_name)
    }

    pub fn set_password_state(&mut self, field_name: &str, state: PasswordState) {
        self.passwords.insert(field_name.to_string(), state);
    }

    pub fn force_autodate(&mut self, field_name: &str) {
        self.forced_autodates.insert(field_name.to_string());
    }

    pub fn is_autodate_forced(&self, field_name: &str) -> bool {
        self.forced_autodates.contains(field_name)
    }

    /// Checks `plain` against the stored hash of the auth `password` field.
    pub fn validate_password(&self, plain: &str) -> bool {
        let hash = value_to_string(self.get_raw(FIELD_NAME_PASSWORD).unwrap_or(&Value::Null));
        !hash.is_empty() && verify_password(&hash, plain)
    }

    /// Client facing representation.
    ///
    /// Hidden fields are skipped unless `allow_hidden` is set; the auth email is
    /// exported only when `emailVisibility` is on.
    pub fn public_export(&self, allow_hidden: bool) -> Map<String, Value> {
        let mut out = Map::new();
        out.insert("collectionId".into(), Value::String(self.collection.id.clone()));
        out.insert("collectionName".into(), Value::String(self.collection.name.clone()));

        for field in self.collection.fields.iter() {
            if field.is_hidden() && !allow_hidden {
                continue;
            }
            let value = self.get_raw(field.name()).cloned().unwrap_or_else(|| field.prepare_value(&Value::Null));
            out.insert(field.name().to_string(), value);
        }

        if self.collection.is_auth()
            && !allow_hidden
            && !self.get_bool(FIELD_NAME_EMAIL_VISIBILITY)
            && out.contains_key(FIELD_NAME_EMAIL)
        {
            out.remove(FIELD_NAME_EMAIL);
        }
        out
    }

    /// Prepared value of every field, in field order.
    pub(crate) fn prepared_values(&self) -> Vec<(&Field, Value)> {
        self.collection
            .fields
            .iter()
            .map(|field| {
                let raw = self.get_raw(field.name()).unwrap_or(&Value::Null);
                (field, field.prepare_value(raw))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{FileField, RelationField, TextField};
    use serde_json::json;

    fn demo() -> Arc<Collection> {
        let mut collection = Collection::new_auth("users");
        collection.fields.add(TextField::new("name").into());
        collection.fields.add(RelationField::new("friends", "users").multiple(5).into());
        collection.fields.add(FileField { max_select: 2, ..FileField::new("docs") }.into());
        Arc::new(collection)
    }

    #[test]
    fn test_load_prepares_values_and_snapshots() {
        let mut row = Map::new();
        row.insert("id".into(), json!("r1"));
        row.insert("friends".into(), json!("[\"a\",\"b\"]"));
        row.insert("verified".into(), json!(1));
        let mut record = Record::load(demo(), row);

        assert!(!record.is_new());
        assert_eq!(record.get("friends"), json!(["a", "b"]));
        assert_eq!(record.get("verified"), json!(true));
        assert_eq!(record.get("name"), json!(""));
        assert!(!record.changed("name"));

        record.set("name", 12);
        assert_eq!(record.get("name"), json!("12"));
        assert!(record.changed("name"));
        assert_eq!(record.original().get("name"), Some(&json!("")));
    }

    #[test]
    fn test_unknown_keys_are_stored_raw() {
        let mut record = Record::new(demo());
        record.set("custom", json!({"a": 1}));
        assert_eq!(record.get("custom"), json!({"a": 1}));
    }

    #[test]
    fn test_public_export_hides_fields() {
        let mut record = Record::new(demo());
        record.set("email", "a@example.com");
        record.set("password", "1234567890");

        let export = record.public_export(false);
        assert!(!export.contains_key("password"));
        assert!(!export.contains_key("tokenKey"));
        assert!(!export.contains_key("email"));
        assert_eq!(export["collectionName"], json!("users"));

        record.set("emailVisibility", true);
        assert_eq!(record.public_export(false)["email"], json!("a@example.com"));
        assert!(record.public_export(true).contains_key("password"));
        assert!(record.validate_password("1234567890"));
        assert!(!record.validate_password("nope"));
    }

    #[test]
    fn test_add_files_appends_names() {
        let mut record = Record::new(demo());
        record.add_files("docs", vec![UploadedFile::from_bytes("a.txt", b"a".to_vec())]);
        let names = record.get_string_vec("docs");
        assert_eq!(names.len(), 1);
        assert_eq!(record.pending_files("docs")[0].name, names[0]);
        assert_eq!(record.get("docs:unsaved"), json!(names));
    }
}

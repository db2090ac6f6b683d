//! Structural validation of a collection before it is persisted.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use super::Collection;
use crate::db::Db;
use crate::errors::ValidationError;
use crate::fields::{
    FIELD_NAME_EMAIL, FIELD_NAME_EMAIL_VISIBILITY, FIELD_NAME_ID, FIELD_NAME_PASSWORD, FIELD_NAME_TOKEN_KEY,
    FIELD_NAME_VERIFIED, FIELD_TYPE_BOOL, FIELD_TYPE_EMAIL, FIELD_TYPE_PASSWORD, FIELD_TYPE_TEXT, SettingsContext,
};
use crate::resolver::RecordFieldResolver;
use crate::search::FilterData;
use crate::tools::index::{Index, find_single_column_unique_index, parse_index};
use crate::validators::is_valid_name;

const MAX_COLLECTION_NAME_LENGTH: usize = 255;
const MAX_COLLECTION_ID_LENGTH: usize = 100;

static COLLECTION_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_]+$").expect("valid collection id regex"));

const AUTH_RESERVED_NAMES: &[&str] = &["passwordConfirm", "oldPassword"];

const AUTH_REQUIRED_FIELDS: &[(&str, &str)] = &[
    (FIELD_NAME_PASSWORD, FIELD_TYPE_PASSWORD),
    (FIELD_NAME_TOKEN_KEY, FIELD_TYPE_TEXT),
    (FIELD_NAME_EMAIL, FIELD_TYPE_EMAIL),
    (FIELD_NAME_EMAIL_VISIBILITY, FIELD_TYPE_BOOL),
    (FIELD_NAME_VERIFIED, FIELD_TYPE_BOOL),
];

/// Checks `collection` against the persisted `original` (`None` when new).
///
/// All rules run; the returned error collects every issue keyed by its path
/// (`name`, `fields.2.name`, `indexes.0`, `authToken.secret`, ...).
pub fn validate_collection(db: &Db, collection: &Collection, original: Option<&Collection>) -> ValidationError {
    let validator = CollectionValidator { db, new: collection, original };
    let mut errors = ValidationError::default();
    validator.check_id(&mut errors);
    validator.check_system(&mut errors);
    validator.check_type(&mut errors);
    validator.check_name(&mut errors);
    validator.check_fields(&mut errors);
    validator.check_rules(&mut errors);
    validator.check_indexes(&mut errors);
    if collection.is_auth() {
        validator.check_auth_options(&mut errors);
    }
    if collection.is_view() && collection.view.view_query.trim().is_empty() {
        errors.push("viewQuery", "validation_required", "Cannot be blank.");
    }
    errors
}

struct CollectionValidator<'a> {
    db: &'a Db,
    new: &'a Collection,
    original: Option<&'a Collection>,
}

impl CollectionValidator<'_> {
    fn check_id(&self, errors: &mut ValidationError) {
        let id = &self.new.id;
        if id.is_empty() {
            errors.push("id", "validation_required", "Cannot be blank.");
            return;
        }
        if let Some(original) = self.original {
            if original.id != *id {
                errors.push("id", "validation_collection_id_change", "The collection id cannot be changed.");
            }
            return;
        }
        if id.chars().count() > MAX_COLLECTION_ID_LENGTH {
            errors.push("id", "validation_length_too_long", "The collection id is too long.");
        } else if !COLLECTION_ID_RE.is_match(id) {
            errors.push("id", "validation_invalid_format", "Must contain only letters, digits and underscores.");
        }
    }

    fn check_system(&self, errors: &mut ValidationError) {
        if self.original.is_some_and(|o| o.system != self.new.system) {
            errors.push("system", "validation_collection_system_flag_change", "The system flag cannot be changed.");
        }
    }

    fn check_type(&self, errors: &mut ValidationError) {
        if self.original.is_some_and(|o| o.collection_type != self.new.collection_type) {
            errors.push("type", "validation_collection_type_change", "The collection type cannot be changed.");
        }
    }

    fn check_name(&self, errors: &mut ValidationError) {
        let name = &self.new.name;
        if name.is_empty() {
            errors.push("name", "validation_required", "Cannot be blank.");
            return;
        }
        if name.chars().count() > MAX_COLLECTION_NAME_LENGTH {
            errors.push("name", "validation_length_too_long", "The collection name is too long.");
            return;
        }
        if !is_valid_name(name) {
            errors.push("name", "validation_invalid_name", "Must contain only letters, digits and underscores.");
            return;
        }
        if name.contains("_via_") {
            errors.push("name", "validation_invalid_name", "The name cannot contain \"_via_\".");
            return;
        }

        if let Some(original) = self.original {
            if original.system && original.name != *name {
                errors.push("name", "validation_collection_system_name_change", "System collection name cannot be changed.");
                return;
            }
        }

        match self.db.is_collection_name_unique(name, &[self.new.id.as_str()]) {
            Ok(true) => {}
            Ok(false) => {
                errors.push("name", "validation_collection_name_exists", "Collection name must be unique (case insensitive).");
                return;
            }
            Err(err) => {
                errors.push("name", "validation_collection_name_check", err.to_string());
                return;
            }
        }

        // internal and foreign tables share the namespace with collections
        let renamed = self.original.is_none_or(|o| !o.name.eq_ignore_ascii_case(name));
        if renamed && self.db.has_table(name).unwrap_or(true) {
            errors.push("name", "validation_collection_name_invalid", "The name shouldn't match with an existing internal table.");
        }
    }

    fn check_fields(&self, errors: &mut ValidationError) {
        let fields = &self.new.fields;
        if fields.is_empty() {
            errors.push("fields", "validation_required", "Cannot be blank.");
            return;
        }

        let ctx = SettingsContext {
            db: self.db,
            collection: self.new,
            original: self.original,
        };

        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for (i, field) in fields.iter().enumerate() {
            let prefix = format!("fields.{i}");
            if !ids.insert(field.id().to_string()) {
                errors.push(format!("{prefix}.id"), "validation_duplicated_field_id", "Duplicated or invalid field id.");
            }
            if !names.insert(field.name().to_lowercase()) {
                errors.push(format!("{prefix}.name"), "validation_duplicated_field_name", "Duplicated or invalid field name.");
            }
            if self.new.is_auth() && AUTH_RESERVED_NAMES.iter().any(|r| r.eq_ignore_ascii_case(field.name())) {
                errors.push(format!("{prefix}.name"), "validation_reserved_field_name", "The field name is reserved.");
            }

            if let Some(old) = self.original.and_then(|o| o.fields.get_by_id(field.id())) {
                if !self.new.is_view() && old.type_name() != field.type_name() {
                    errors.push(format!("{prefix}.type"), "validation_field_type_change", "Field type cannot be changed.");
                }
                if !self.new.is_view() && old.is_system() && old.name() != field.name() {
                    errors.push(format!("{prefix}.name"), "validation_system_field_name_change", "System field name cannot be changed.");
                }
            }

            errors.extend_prefixed(&prefix, field.validate_settings(&ctx));
        }

        if let Some(original) = self.original.filter(|_| !self.new.is_view()) {
            for old in original.fields.iter().filter(|f| f.is_system()) {
                if fields.get_by_id(old.id()).is_none() {
                    errors.push("fields", "validation_system_field_remove", format!("System field {:?} cannot be removed.", old.name()));
                }
            }
        }

        let primary_keys = fields
            .iter()
            .filter(|f| f.as_text().is_some_and(|t| t.primary_key))
            .count();
        if primary_keys != 1 || fields.get_by_name(FIELD_NAME_ID).and_then(|f| f.as_text()).is_none_or(|t| !t.primary_key) {
            errors.push("fields", "validation_missing_primary_key", "The collection must have exactly one \"id\" primary key field.");
        }

        if self.new.is_auth() {
            for (name, type_name) in AUTH_REQUIRED_FIELDS {
                match fields.get_by_name(name) {
                    Some(f) if f.type_name() == *type_name => {}
                    _ => errors.push(
                        "fields",
                        "validation_missing_auth_field",
                        format!("The auth collection must have a {type_name} field named {name:?}."),
                    ),
                }
            }
        }
    }

    fn check_rule(&self, errors: &mut ValidationError, key: &str, rule: &str) {
        // empty rules only grant access to everyone
        if rule.trim().is_empty() {
            return;
        }
        let mut resolver = RecordFieldResolver::new(self.db, self.new, None, true);
        if let Err(err) = FilterData::new(rule).build_expr_with(&mut resolver, &self.db.config().filter) {
            errors.push(key, "validation_invalid_rule", format!("Invalid rule. Raw error: {err}"));
        }
    }

    fn check_rules(&self, errors: &mut ValidationError) {
        for (key, rule) in self.new.rules.entries() {
            let Some(rule) = rule else {
                continue;
            };
            if self.new.is_view() && matches!(key, "createRule" | "updateRule" | "deleteRule") {
                errors.push(key, "validation_view_rule", "View collections don't support create, update and delete rules.");
                continue;
            }
            self.check_rule(errors, key, rule);
        }

        if self.new.is_auth() {
            let auth = &self.new.auth;
            if let Some(rule) = auth.auth_rule.as_deref() {
                self.check_rule(errors, "authRule", rule);
            }
            if let Some(rule) = auth.manage_rule.as_deref() {
                self.check_rule(errors, "manageRule", rule);
            }
            if !auth.mfa.rule.is_empty() {
                self.check_rule(errors, "mfa.rule", &auth.mfa.rule);
            }
        }
    }

    fn check_indexes(&self, errors: &mut ValidationError) {
        if self.new.is_view() {
            if !self.new.indexes.is_empty() {
                errors.push("indexes", "validation_indexes_not_supported", "View collections don't support indexes.");
            }
            return;
        }

        let mut names = HashSet::new();
        let mut parsed_indexes = Vec::with_capacity(self.new.indexes.len());
        for (i, raw) in self.new.indexes.iter().enumerate() {
            let key = format!("indexes.{i}");
            let parsed = parse_index(raw);
            if !parsed.is_valid() {
                errors.push(key, "validation_invalid_index_expression", "Invalid CREATE INDEX expression.");
                continue;
            }

            if !names.insert(parsed.index_name.to_lowercase()) {
                errors.push(key, "validation_duplicated_index_name", "The index name must be unique.");
                continue;
            }

            match self.db.index_owner(&parsed.index_name) {
                Ok(Some(owner))
                    if !owner.eq_ignore_ascii_case(&self.new.name)
                        && self.original.is_none_or(|o| !owner.eq_ignore_ascii_case(&o.name)) =>
                {
                    errors.push(key, "validation_existing_index_name", "The index name is already used by another table.");
                    continue;
                }
                Ok(_) => {}
                Err(err) => {
                    errors.push(key, "validation_index_check", err.to_string());
                    continue;
                }
            }

            let missing = parsed
                .columns
                .iter()
                .filter(|c| is_valid_name(&c.name))
                .find(|c| self.new.fields.get_by_name(&c.name).is_none());
            if let Some(column) = missing {
                errors.push(key, "validation_missing_index_column", format!("Unknown index column {:?}.", column.name));
                continue;
            }

            parsed_indexes.push(parsed);
        }

        if let Some(original) = self.original {
            self.check_system_indexes(errors, original, &parsed_indexes);
        }

        if self.new.is_auth() {
            for name in [FIELD_NAME_TOKEN_KEY, FIELD_NAME_EMAIL] {
                if find_single_column_unique_index(&self.new.indexes, name).is_none() {
                    errors.push(
                        "indexes",
                        "validation_missing_unique_index",
                        format!("The {name:?} field must have a single column unique index."),
                    );
                }
            }
        }
    }

    /// Unique indexes covering system fields can't be dropped or weakened.
    fn check_system_indexes(&self, errors: &mut ValidationError, original: &Collection, new_indexes: &[Index]) {
        for raw in &original.indexes {
            let old = parse_index(raw);
            if !old.unique {
                continue;
            }
            let covers_system_field = old.columns.iter().any(|c| {
                original
                    .fields
                    .get_by_name(&c.name)
                    .is_some_and(|f| f.is_system())
            });
            if !covers_system_field {
                continue;
            }
            if !new_indexes.iter().any(|new| new.is_equivalent_to(&old)) {
                errors.push(
                    "indexes",
                    "validation_system_index_change",
                    format!("The unique index {:?} of a system field cannot be removed or changed.", old.index_name),
                );
            }
        }
    }

    fn check_auth_options(&self, errors: &mut ValidationError) {
        let auth = &self.new.auth;

        for (key, token) in auth.tokens() {
            errors.extend_prefixed(key, token.validate());
        }

        for (i, name) in auth.password_auth.identity_fields.iter().enumerate() {
            let key = format!("passwordAuth.identityFields.{i}");
            if self.new.fields.get_by_name(name).is_none() {
                errors.push(key, "validation_missing_field", format!("Missing field {name:?}."));
            } else if find_single_column_unique_index(&self.new.indexes, name).is_none() {
                errors.push(key, "validation_missing_unique_index", format!("The identity field {name:?} must have a unique index."));
            }
        }

        for (key, name) in auth.oauth2.mapped_fields.entries() {
            if !name.is_empty() && self.new.fields.get_by_name(name).is_none() {
                errors.push(format!("oauth2.mappedFields.{key}"), "validation_missing_field", format!("Missing field {name:?}."));
            }
        }

        if auth.mfa.enabled && auth.mfa.duration <= 0 {
            errors.push("mfa.duration", "validation_required", "Cannot be blank.");
        }
        if auth.otp.enabled {
            if auth.otp.duration <= 0 {
                errors.push("otp.duration", "validation_required", "Cannot be blank.");
            }
            if auth.otp.length < 4 {
                errors.push("otp.length", "validation_min_greater_equal_than_required", "Must be at least 4.");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{NumberField, TextField};

    fn db() -> Db {
        Db::open_in_memory().unwrap()
    }

    #[test]
    fn test_new_base_collection_is_valid() {
        let db = db();
        let mut collection = Collection::new_base("posts");
        collection.fields.add(TextField::new("title").into());
        collection.rules.list_rule = Some("title != ''".into());
        let errors = validate_collection(&db, &collection, None);
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn test_invalid_names() {
        let db = db();
        for name in ["", "a b", "demo_via_x", "_collections"] {
            let collection = Collection::new_base(name);
            let errors = validate_collection(&db, &collection, None);
            assert!(errors.has("name"), "expected name error for {name:?}");
        }
    }

    #[test]
    fn test_duplicate_field_names() {
        let db = db();
        let mut collection = Collection::new_base("posts");
        collection.fields.add(TextField::new("title").into());
        collection.fields.add(NumberField::new("TITLE").into());
        let errors = validate_collection(&db, &collection, None);
        assert!(errors.has("fields.2.name"), "{errors:?}");
    }

    #[test]
    fn test_invalid_field_name_is_reported_once() {
        let db = db();
        let mut collection = Collection::new_base("posts");
        collection.fields.add(TextField::new("bad name").into());
        let errors = validate_collection(&db, &collection, None);
        let issues: Vec<_> = errors.issues.iter().filter(|issue| issue.field == "fields.1.name").collect();
        assert_eq!(issues.len(), 1, "{errors:?}");
        assert_eq!(issues[0].code, "validation_invalid_name");
    }

    #[test]
    fn test_type_change_is_rejected() {
        let db = db();
        let original = Collection::new_base("posts");
        let mut changed = original.clone();
        changed.collection_type = crate::collection::CollectionType::Auth;
        assert!(validate_collection(&db, &changed, Some(&original)).has("type"));
    }

    #[test]
    fn test_invalid_rule() {
        let db = db();
        let mut collection = Collection::new_base("posts");
        collection.rules.view_rule = Some("missing = 1".into());
        assert!(validate_collection(&db, &collection, None).has("viewRule"));
    }

    #[test]
    fn test_view_rejects_write_rules_and_indexes() {
        let db = db();
        let mut view = Collection::new_view("v", "select 1 as id");
        view.rules.create_rule = Some(String::new());
        view.indexes.push("CREATE INDEX idx_v ON v (id)".into());
        let errors = validate_collection(&db, &view, None);
        assert!(errors.has("createRule"));
        assert!(errors.has("indexes"));
    }

    #[test]
    fn test_auth_reserved_and_unique_indexes() {
        let db = db();
        let mut users = Collection::new_auth("users");
        users.fields.add(TextField::new("oldPassword").into());
        users.indexes.clear();
        let errors = validate_collection(&db, &users, None);
        assert!(errors.issues.iter().any(|i| i.code == "validation_reserved_field_name"));
        assert!(errors.has("indexes"));
    }
}

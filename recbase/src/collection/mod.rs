//! Collection model: typed record schema plus rules, indexes and options.

mod options;
mod validate;

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

pub use options::{
    AuthOptions, MfaConfig, OAuth2Config, OAuth2KnownFields, OAuth2ProviderConfig, OtpConfig, PasswordAuthConfig,
    TOKEN_DURATION_MAX, TOKEN_DURATION_MIN, TOKEN_SECRET_MAX_LENGTH, TOKEN_SECRET_MIN_LENGTH, TokenConfig,
    ViewOptions,
};
pub use validate::validate_collection;

use crate::fields::{
    BoolField, EmailField, FIELD_NAME_EMAIL, FIELD_NAME_EMAIL_VISIBILITY, FIELD_NAME_PASSWORD, FIELD_NAME_TOKEN_KEY,
    FIELD_NAME_VERIFIED, Field, PasswordField, TextField,
};
use crate::fields_list::FieldsList;
use crate::id::collection_id;
use crate::registry::{FieldTypeRegistry, builtin};
use crate::tools::index::{Index, IndexColumn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionType {
    #[default]
    Base,
    Auth,
    View,
}

impl CollectionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::Auth => "auth",
            Self::View => "view",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "base" => Some(Self::Base),
            "auth" => Some(Self::Auth),
            "view" => Some(Self::View),
            _ => None,
        }
    }
}

impl fmt::Display for CollectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The five API rules. `None` restricts the action to superusers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rules {
    pub list_rule: Option<String>,
    pub view_rule: Option<String>,
    pub create_rule: Option<String>,
    pub update_rule: Option<String>,
    pub delete_rule: Option<String>,
}

impl Rules {
    pub fn entries(&self) -> [(&'static str, Option<&str>); 5] {
        [
            ("listRule", self.list_rule.as_deref()),
            ("viewRule", self.view_rule.as_deref()),
            ("createRule", self.create_rule.as_deref()),
            ("updateRule", self.update_rule.as_deref()),
            ("deleteRule", self.delete_rule.as_deref()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    pub id: String,
    pub name: String,
    pub collection_type: CollectionType,
    pub system: bool,
    pub rules: Rules,
    /// Raw `CREATE INDEX` statements.
    pub indexes: Vec<String>,
    pub fields: FieldsList,
    pub created: String,
    pub updated: String,
    pub auth: AuthOptions,
    pub view: ViewOptions,
}

impl Collection {
    fn blank(collection_type: CollectionType, name: &str) -> Self {
        let mut fields = FieldsList::new();
        fields.add(TextField::primary_id().into());
        Self {
            id: collection_id(collection_type.as_str(), name),
            name: name.to_string(),
            collection_type,
            system: false,
            rules: Rules::default(),
            indexes: Vec::new(),
            fields,
            created: String::new(),
            updated: String::new(),
            auth: AuthOptions::default(),
            view: ViewOptions::default(),
        }
    }

    pub fn new_base(name: &str) -> Self {
        Self::blank(CollectionType::Base, name)
    }

    /// Auth collection with the system auth fields and their unique indexes.
    pub fn new_auth(name: &str) -> Self {
        let mut collection = Self::blank(CollectionType::Auth, name);
        collection.ensure_auth_fields();
        collection
    }

    pub fn new_view(name: &str, query: &str) -> Self {
        let mut collection = Self::blank(CollectionType::View, name);
        collection.view.view_query = query.to_string();
        collection
    }

    pub fn is_base(&self) -> bool {
        self.collection_type == CollectionType::Base
    }

    pub fn is_auth(&self) -> bool {
        self.collection_type == CollectionType::Auth
    }

    pub fn is_view(&self) -> bool {
        self.collection_type == CollectionType::View
    }

    pub fn table_name(&self) -> &str {
        &self.name
    }

    pub fn primary_key(&self) -> Option<&TextField> {
        self.fields.iter().filter_map(Field::as_text).find(|f| f.primary_key)
    }

    /// Sum of the body sizes reserved by every field.
    pub fn max_body_size(&self) -> u64 {
        self.fields.iter().map(Field::max_body_size).sum()
    }

    /// Adds the missing auth system fields and indexes.
    pub fn ensure_auth_fields(&mut self) {
        if self.fields.get_by_name(FIELD_NAME_PASSWORD).is_none() {
            let mut password = PasswordField {
                min: 8,
                required: true,
                ..PasswordField::new(FIELD_NAME_PASSWORD)
            };
            password.base.system = true;
            password.base.hidden = true;
            self.fields.add(password.into());
        }
        if self.fields.get_by_name(FIELD_NAME_TOKEN_KEY).is_none() {
            let mut token_key = TextField {
                min: 30,
                max: 60,
                autogenerate_pattern: "[a-zA-Z0-9]{50}".to_string(),
                required: true,
                ..TextField::new(FIELD_NAME_TOKEN_KEY)
            };
            token_key.base.system = true;
            token_key.base.hidden = true;
            self.fields.add(token_key.into());
        }
        if self.fields.get_by_name(FIELD_NAME_EMAIL).is_none() {
            let mut email = EmailField {
                required: true,
                ..EmailField::new(FIELD_NAME_EMAIL)
            };
            email.base.system = true;
            self.fields.add(email.into());
        }
        for name in [FIELD_NAME_EMAIL_VISIBILITY, FIELD_NAME_VERIFIED] {
            if self.fields.get_by_name(name).is_none() {
                let mut flag = BoolField::new(name);
                flag.base.system = true;
                self.fields.add(flag.into());
            }
        }

        self.ensure_unique_index(FIELD_NAME_TOKEN_KEY, "");
        self.ensure_unique_index(FIELD_NAME_EMAIL, "`email` != ''");
    }

    fn ensure_unique_index(&mut self, column: &str, where_clause: &str) {
        let exists = self.indexes.iter().any(|raw| {
            let parsed = crate::tools::index::parse_index(raw);
            parsed.unique && parsed.columns.len() == 1 && parsed.columns[0].name.eq_ignore_ascii_case(column)
        });
        if exists {
            return;
        }
        let index = Index {
            index_name: format!("idx_{column}_{}", self.id),
            table_name: self.name.clone(),
            columns: vec![IndexColumn {
                name: column.to_string(),
                ..IndexColumn::default()
            }],
            unique: true,
            where_clause: where_clause.to_string(),
            ..Index::default()
        };
        self.indexes.push(index.build());
    }

    pub fn to_json(&self) -> serde_json::Result<Value> {
        let mut map = Map::new();
        map.insert("id".into(), Value::String(self.id.clone()));
        map.insert("name".into(), Value::String(self.name.clone()));
        map.insert("type".into(), Value::String(self.collection_type.as_str().into()));
        map.insert("system".into(), Value::Bool(self.system));
        if let Value::Object(rules) = serde_json::to_value(&self.rules)? {
            map.extend(rules);
        }
        map.insert("indexes".into(), serde_json::to_value(&self.indexes)?);
        map.insert("fields".into(), self.fields.to_json()?);
        map.insert("created".into(), Value::String(self.created.clone()));
        map.insert("updated".into(), Value::String(self.updated.clone()));
        if let Value::Object(options) = self.options_json()? {
            map.extend(options);
        }
        Ok(Value::Object(map))
    }

    /// Type specific options only (the persisted `options` column).
    pub fn options_json(&self) -> serde_json::Result<Value> {
        match self.collection_type {
            CollectionType::Base => Ok(Value::Object(Map::new())),
            CollectionType::Auth => serde_json::to_value(&self.auth),
            CollectionType::View => serde_json::to_value(&self.view),
        }
    }

    /// Applies persisted type specific options.
    pub fn load_options(&mut self, options: Value) -> serde_json::Result<()> {
        match self.collection_type {
            CollectionType::Base => {}
            CollectionType::Auth => self.auth = serde_json::from_value(options)?,
            CollectionType::View => self.view = serde_json::from_value(options)?,
        }
        Ok(())
    }

    pub fn from_json(registry: &FieldTypeRegistry, value: Value) -> serde_json::Result<Self> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Raw {
            #[serde(default)]
            id: String,
            #[serde(default)]
            name: String,
            #[serde(rename = "type", default)]
            collection_type: CollectionType,
            #[serde(default)]
            system: bool,
            #[serde(flatten)]
            rules: Rules,
            #[serde(default)]
            indexes: Vec<String>,
            #[serde(default)]
            fields: Value,
            #[serde(default)]
            created: String,
            #[serde(default)]
            updated: String,
            #[serde(flatten)]
            rest: Map<String, Value>,
        }

        let raw: Raw = serde_json::from_value(value)?;
        let mut collection = Self::blank(raw.collection_type, &raw.name);
        if !raw.id.is_empty() {
            collection.id = raw.id;
        }
        collection.system = raw.system;
        collection.rules = raw.rules;
        collection.indexes = raw.indexes;
        collection.created = raw.created;
        collection.updated = raw.updated;
        if !raw.fields.is_null() {
            collection.fields = FieldsList::from_json(registry, raw.fields)?;
        }
        collection.load_options(Value::Object(raw.rest))?;
        Ok(collection)
    }
}

impl Serialize for Collection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::Error as _;
        self.to_json().map_err(S::Error::custom)?.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Collection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_json(builtin(), value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_auth_has_system_fields_and_indexes() {
        let users = Collection::new_auth("users");
        for name in ["id", "password", "tokenKey", "email", "emailVisibility", "verified"] {
            assert!(users.fields.get_by_name(name).unwrap().is_system(), "{name}");
        }
        assert!(users.fields.get_by_name("password").unwrap().is_hidden());
        assert!(users.fields.get_by_name("tokenKey").unwrap().is_hidden());
        assert_eq!(users.indexes.len(), 2);
        assert!(users.indexes[1].contains("WHERE `email` != ''"));
        assert!(users.id.starts_with("pbc_"));
    }

    #[test]
    fn test_json_keeps_options_flat() {
        let view = Collection::new_view("stats", "SELECT id FROM demo");
        let value = view.to_json().unwrap();
        assert_eq!(value["type"], "view");
        assert_eq!(value["viewQuery"], "SELECT id FROM demo");
        assert_eq!(value["listRule"], Value::Null);

        let decoded: Collection = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(decoded.to_json().unwrap(), value);
        assert_eq!(decoded.fields, view.fields);
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(serde_json::from_value::<Collection>(json!({"name": "x", "type": "graph"})).is_err());
    }
}

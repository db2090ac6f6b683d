use std::collections::BTreeMap;
use std::sync::LazyLock;

use serde::de::Error as _;
use serde_json::Value;

use crate::fields::{
    AutodateField, BoolField, ColorField, DateField, EditorField, EmailField, FIELD_TYPE_AUTODATE, FIELD_TYPE_BOOL,
    FIELD_TYPE_COLOR, FIELD_TYPE_DATE, FIELD_TYPE_EDITOR, FIELD_TYPE_EMAIL, FIELD_TYPE_FILE, FIELD_TYPE_GEO_POINT,
    FIELD_TYPE_JSON, FIELD_TYPE_NUMBER, FIELD_TYPE_PASSWORD, FIELD_TYPE_POINT, FIELD_TYPE_RELATION,
    FIELD_TYPE_SELECT, FIELD_TYPE_TEXT, FIELD_TYPE_URL, Field, FileField, GeoPointField, JsonField, NumberField,
    PasswordField, PointField, RelationField, SelectField, TextField, UrlField,
};

/// Constructor of a blank field instance for a type tag.
pub type FieldFactory = fn() -> Field;

static BUILTIN: LazyLock<FieldTypeRegistry> = LazyLock::new(FieldTypeRegistry::with_defaults);

/// Registry with every built-in field type, used when decoding collections.
pub fn builtin() -> &'static FieldTypeRegistry {
    &BUILTIN
}

/// Maps field type tags to factories.
#[derive(Debug, Clone, Default)]
pub struct FieldTypeRegistry {
    factories: BTreeMap<String, FieldFactory>,
}

impl FieldTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(FIELD_TYPE_TEXT, || TextField::new("").into());
        registry.register(FIELD_TYPE_NUMBER, || NumberField::new("").into());
        registry.register(FIELD_TYPE_BOOL, || BoolField::new("").into());
        registry.register(FIELD_TYPE_EMAIL, || EmailField::new("").into());
        registry.register(FIELD_TYPE_URL, || UrlField::new("").into());
        registry.register(FIELD_TYPE_EDITOR, || EditorField::new("").into());
        registry.register(FIELD_TYPE_DATE, || DateField::new("").into());
        registry.register(FIELD_TYPE_AUTODATE, || AutodateField::new("", false, false).into());
        registry.register(FIELD_TYPE_SELECT, || SelectField::new("", &[]).into());
        registry.register(FIELD_TYPE_RELATION, || RelationField::new("", "").into());
        registry.register(FIELD_TYPE_FILE, || FileField::new("").into());
        registry.register(FIELD_TYPE_JSON, || JsonField::new("").into());
        registry.register(FIELD_TYPE_PASSWORD, || PasswordField::new("").into());
        registry.register(FIELD_TYPE_GEO_POINT, || GeoPointField::new("").into());
        registry.register(FIELD_TYPE_POINT, || PointField::new("").into());
        registry.register(FIELD_TYPE_COLOR, || ColorField::new("").into());
        registry
    }

    /// Registers (or replaces) the factory of a type tag.
    pub fn register(&mut self, type_name: impl Into<String>, factory: FieldFactory) {
        self.factories.insert(type_name.into(), factory);
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn new_field(&self, type_name: &str) -> Option<Field> {
        self.factories.get(type_name).map(|factory| factory())
    }

    /// Decodes a field JSON object using its `type` key.
    pub fn load_field(&self, value: Value) -> serde_json::Result<Field> {
        let type_name = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| serde_json::Error::custom("missing field type"))?;
        let mut field = self
            .new_field(type_name)
            .ok_or_else(|| serde_json::Error::custom(format!("unknown field type {type_name:?}")))?;
        field.load_json(value)?;
        Ok(field)
    }

    pub fn load_fields(&self, value: Value) -> serde_json::Result<Vec<Field>> {
        match value {
            Value::Null => Ok(Vec::new()),
            Value::Array(items) => items.into_iter().map(|item| self.load_field(item)).collect(),
            _ => Err(serde_json::Error::custom("fields must be an array")),
        }
    }
}

//! Pluggable field types.
//!
//! Every concrete field implements [`FieldKind`]; [`Field`] is the closed set of
//! supported kinds and dispatches each capability to the selected variant.

use rusqlite::types::Value as SqlValue;
use serde::ser::Error as _;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::collection::Collection;
use crate::db::Db;
use crate::errors::{CoreResult, ValidationError, ValidationIssue};
use crate::filesystem::{Filesystem, OpContext};
use crate::record::Record;
use crate::validators::is_valid_name;

mod autodate;
mod boolean;
mod color;
mod date;
mod editor;
mod email;
mod file;
mod geo_point;
mod json;
mod number;
mod password;
mod point;
mod relation;
mod select;
mod text;
mod url;

pub use autodate::AutodateField;
pub use boolean::BoolField;
pub use color::ColorField;
pub use date::DateField;
pub use editor::EditorField;
pub use email::EmailField;
pub use file::FileField;
pub use geo_point::GeoPointField;
pub use json::JsonField;
pub use number::NumberField;
pub use password::{PasswordField, PasswordState, verify_password};
pub use point::PointField;
pub use relation::RelationField;
pub use select::SelectField;
pub use text::TextField;
pub use url::UrlField;

pub const FIELD_TYPE_TEXT: &str = "text";
pub const FIELD_TYPE_NUMBER: &str = "number";
pub const FIELD_TYPE_BOOL: &str = "bool";
pub const FIELD_TYPE_EMAIL: &str = "email";
pub const FIELD_TYPE_URL: &str = "url";
pub const FIELD_TYPE_EDITOR: &str = "editor";
pub const FIELD_TYPE_DATE: &str = "date";
pub const FIELD_TYPE_AUTODATE: &str = "autodate";
pub const FIELD_TYPE_SELECT: &str = "select";
pub const FIELD_TYPE_RELATION: &str = "relation";
pub const FIELD_TYPE_FILE: &str = "file";
pub const FIELD_TYPE_JSON: &str = "json";
pub const FIELD_TYPE_PASSWORD: &str = "password";
pub const FIELD_TYPE_GEO_POINT: &str = "geoPoint";
pub const FIELD_TYPE_POINT: &str = "point";
pub const FIELD_TYPE_COLOR: &str = "color";

pub const FIELD_NAME_ID: &str = "id";
pub const FIELD_NAME_COLLECTION_ID: &str = "collectionId";
pub const FIELD_NAME_COLLECTION_NAME: &str = "collectionName";
pub const FIELD_NAME_EXPAND: &str = "expand";
pub const FIELD_NAME_EMAIL: &str = "email";
pub const FIELD_NAME_EMAIL_VISIBILITY: &str = "emailVisibility";
pub const FIELD_NAME_VERIFIED: &str = "verified";
pub const FIELD_NAME_TOKEN_KEY: &str = "tokenKey";
pub const FIELD_NAME_PASSWORD: &str = "password";

const MAX_NAME_LENGTH: usize = 100;

/// Field names that can never be used because they clash with record export keys.
const RESERVED_NAMES: &[&str] = &[FIELD_NAME_EXPAND, FIELD_NAME_COLLECTION_ID, FIELD_NAME_COLLECTION_NAME];

/// Identity and visibility flags shared by every field kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldBase {
    pub id: String,
    pub name: String,
    pub system: bool,
    pub hidden: bool,
    pub presentable: bool,
}

impl FieldBase {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Identity rules common to all kinds (issues keyed `id` / `name`).
    pub fn validate(&self) -> ValidationError {
        let mut errors = ValidationError::default();

        if self.id.is_empty() {
            errors.push("id", "validation_required", "Cannot be blank.");
        } else if self.id.chars().count() > MAX_NAME_LENGTH {
            errors.push("id", "validation_length_too_long", "The field id is too long.");
        }

        if self.name.is_empty() {
            errors.push("name", "validation_required", "Cannot be blank.");
        } else if self.name.chars().count() > MAX_NAME_LENGTH {
            errors.push("name", "validation_length_too_long", "The field name is too long.");
        } else if !is_valid_name(&self.name) {
            errors.push("name", "validation_invalid_name", "Must contain only letters, digits and underscores.");
        } else if self.name.contains("_via_") {
            errors.push("name", "validation_invalid_name", "The name cannot contain \"_via_\".");
        } else if RESERVED_NAMES.iter().any(|r| r.eq_ignore_ascii_case(&self.name)) {
            errors.push("name", "validation_not_in_invalid", "The name is reserved.");
        }

        errors
    }
}

/// Lifecycle steps a field may wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptAction {
    Validate,
    Create,
    Update,
    Delete,
}

/// Collaborators available to field interceptors.
pub struct InterceptEnv<'a> {
    pub db: &'a Db,
    pub fs: &'a dyn Filesystem,
    pub ctx: &'a OpContext,
}

/// Continuation invoked by an interceptor to run the wrapped action.
pub type Next<'n> = &'n mut dyn FnMut(&mut Record) -> CoreResult<()>;

/// Custom assignment for a modifier key such as `tags+`.
pub type Setter<'a> = Box<dyn Fn(&mut Record, Value) + 'a>;

/// Custom read for a modifier key such as `password:hash`.
pub type Getter<'a> = Box<dyn Fn(&Record) -> Value + 'a>;

/// Inputs for value validation.
pub struct ValueContext<'a> {
    pub db: &'a Db,
    pub record: &'a Record,
}

static NULL: Value = Value::Null;

impl ValueContext<'_> {
    pub fn value(&self, name: &str) -> &Value {
        self.record.get_raw(name).unwrap_or(&NULL)
    }
}

/// Inputs for settings validation.
pub struct SettingsContext<'a> {
    pub db: &'a Db,
    pub collection: &'a Collection,
    /// Persisted state of the collection, `None` for new collections.
    pub original: Option<&'a Collection>,
}

impl SettingsContext<'_> {
    pub fn original_field(&self, id: &str) -> Option<&Field> {
        self.original.and_then(|c| c.fields.get_by_id(id))
    }
}

/// Capability set implemented by every field kind.
pub trait FieldKind {
    const TYPE: &'static str;

    fn base(&self) -> &FieldBase;

    fn base_mut(&mut self) -> &mut FieldBase;

    /// Column definition used for `CREATE TABLE` and `ADD COLUMN`.
    fn column_type(&self) -> String;

    /// Normalizes a raw input into the canonical in-memory representation.
    fn prepare_value(&self, raw: &Value) -> Value;

    /// Validates the already prepared record value.
    fn validate_value(&self, ctx: &ValueContext<'_>) -> Result<(), ValidationIssue>;

    /// Validates the field configuration. Issue paths are relative to the field.
    fn validate_settings(&self, ctx: &SettingsContext<'_>) -> ValidationError;

    /// Whether the kind can hold more than one value.
    fn is_multi_valuer(&self) -> bool {
        false
    }

    /// Whether the current settings store a JSON array.
    fn is_multiple(&self) -> bool {
        false
    }

    /// Converts a prepared value into the value bound to SQL.
    fn driver_value(&self, value: &Value) -> SqlValue {
        default_driver_value(value)
    }

    fn find_setter(&self, _key: &str) -> Option<Setter<'_>> {
        None
    }

    fn find_getter(&self, _key: &str) -> Option<Getter<'_>> {
        None
    }

    /// Wraps a record lifecycle action. Implementations must call `next` unless
    /// they deliberately abort the action with an error.
    fn intercept(
        &self,
        _env: &InterceptEnv<'_>,
        record: &mut Record,
        _action: InterceptAction,
        next: Next<'_>,
    ) -> CoreResult<()> {
        next(record)
    }

    /// Upper bound of the request body bytes a value of this field may need.
    fn max_body_size(&self) -> u64 {
        DEFAULT_MAX_BODY_SIZE
    }
}

/// Body size reserved for fields that don't declare their own.
pub const DEFAULT_MAX_BODY_SIZE: u64 = 8 * 1024;

/// Default `maxSize` of file and editor fields (5MB).
pub const DEFAULT_FILE_MAX_SIZE: u64 = 5 << 20;

/// A typed column definition of a collection.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Text(TextField),
    Number(NumberField),
    Bool(BoolField),
    Email(EmailField),
    Url(UrlField),
    Editor(EditorField),
    Date(DateField),
    Autodate(AutodateField),
    Select(SelectField),
    Relation(RelationField),
    File(FileField),
    Json(JsonField),
    Password(PasswordField),
    GeoPoint(GeoPointField),
    Point(PointField),
    Color(ColorField),
}

macro_rules! each_field {
    ($value:expr, $f:ident => $body:expr) => {
        match $value {
            Field::Text($f) => $body,
            Field::Number($f) => $body,
            Field::Bool($f) => $body,
            Field::Email($f) => $body,
            Field::Url($f) => $body,
            Field::Editor($f) => $body,
            Field::Date($f) => $body,
            Field::Autodate($f) => $body,
            Field::Select($f) => $body,
            Field::Relation($f) => $body,
            Field::File($f) => $body,
            Field::Json($f) => $body,
            Field::Password($f) => $body,
            Field::GeoPoint($f) => $body,
            Field::Point($f) => $body,
            Field::Color($f) => $body,
        }
    };
}

macro_rules! field_conversions {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(
            impl From<$ty> for Field {
                fn from(value: $ty) -> Self {
                    Field::$variant(value)
                }
            }
        )*
    };
}

field_conversions!(
    Text(TextField),
    Number(NumberField),
    Bool(BoolField),
    Email(EmailField),
    Url(UrlField),
    Editor(EditorField),
    Date(DateField),
    Autodate(AutodateField),
    Select(SelectField),
    Relation(RelationField),
    File(FileField),
    Json(JsonField),
    Password(PasswordField),
    GeoPoint(GeoPointField),
    Point(PointField),
    Color(ColorField),
);

/// Generic kind accessors (`as_text`, `as_relation`, ...).
macro_rules! field_accessors {
    ($($fn_name:ident => $variant:ident($ty:ty)),* $(,)?) => {
        $(
            pub fn $fn_name(&self) -> Option<&$ty> {
                match self {
                    Field::$variant(f) => Some(f),
                    _ => None,
                }
            }
        )*
    };
}

impl Field {
    field_accessors!(
        as_text => Text(TextField),
        as_number => Number(NumberField),
        as_select => Select(SelectField),
        as_relation => Relation(RelationField),
        as_file => File(FileField),
        as_json => Json(JsonField),
        as_password => Password(PasswordField),
        as_autodate => Autodate(AutodateField),
    );

    pub fn type_name(&self) -> &'static str {
        fn tag<K: FieldKind>(_: &K) -> &'static str {
            K::TYPE
        }
        each_field!(self, f => tag(f))
    }

    pub fn base(&self) -> &FieldBase {
        each_field!(self, f => f.base())
    }

    pub fn base_mut(&mut self) -> &mut FieldBase {
        each_field!(self, f => f.base_mut())
    }

    pub fn id(&self) -> &str {
        &self.base().id
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.base_mut().id = id.into();
    }

    pub fn name(&self) -> &str {
        &self.base().name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.base_mut().name = name.into();
    }

    pub fn is_system(&self) -> bool {
        self.base().system
    }

    pub fn set_system(&mut self, system: bool) {
        self.base_mut().system = system;
    }

    pub fn is_hidden(&self) -> bool {
        self.base().hidden
    }

    pub fn set_hidden(&mut self, hidden: bool) {
        self.base_mut().hidden = hidden;
    }

    pub fn is_presentable(&self) -> bool {
        self.base().presentable
    }

    pub fn column_type(&self) -> String {
        each_field!(self, f => f.column_type())
    }

    pub fn prepare_value(&self, raw: &Value) -> Value {
        each_field!(self, f => f.prepare_value(raw))
    }

    /// Validates the record value, keying the issue by the field name.
    pub fn validate_value(&self, ctx: &ValueContext<'_>) -> Result<(), ValidationIssue> {
        each_field!(self, f => f.validate_value(ctx)).map_err(|issue| ValidationIssue {
            field: self.name().to_string(),
            ..issue
        })
    }

    /// Validates identity rules and the kind specific settings.
    pub fn validate_settings(&self, ctx: &SettingsContext<'_>) -> ValidationError {
        let mut errors = self.base().validate();
        let specific = each_field!(self, f => f.validate_settings(ctx));
        errors.extend_prefixed("", specific);
        errors
    }

    pub fn is_multi_valuer(&self) -> bool {
        each_field!(self, f => f.is_multi_valuer())
    }

    pub fn is_multiple(&self) -> bool {
        each_field!(self, f => f.is_multiple())
    }

    pub fn driver_value(&self, value: &Value) -> SqlValue {
        each_field!(self, f => f.driver_value(value))
    }

    pub fn find_setter(&self, key: &str) -> Option<Setter<'_>> {
        each_field!(self, f => f.find_setter(key))
    }

    pub fn find_getter(&self, key: &str) -> Option<Getter<'_>> {
        each_field!(self, f => f.find_getter(key))
    }

    pub fn intercept(
        &self,
        env: &InterceptEnv<'_>,
        record: &mut Record,
        action: InterceptAction,
        next: Next<'_>,
    ) -> CoreResult<()> {
        each_field!(self, f => f.intercept(env, record, action, next))
    }

    pub fn max_body_size(&self) -> u64 {
        each_field!(self, f => f.max_body_size())
    }

    /// Replaces the settings of this field with the ones decoded from `value`.
    ///
    /// The `type` key is ignored; the variant is chosen by the caller.
    pub fn load_json(&mut self, value: Value) -> serde_json::Result<()> {
        each_field!(self, f => {
            *f = serde_json::from_value(value)?;
            Ok(())
        })
    }

    /// Serializes the field with its `type` discriminator.
    pub fn to_json(&self) -> serde_json::Result<Value> {
        let mut value = each_field!(self, f => serde_json::to_value(f))?;
        if let Value::Object(map) = &mut value {
            map.insert("type".to_string(), Value::String(self.type_name().to_string()));
        }
        Ok(value)
    }
}

impl Serialize for Field {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().map_err(S::Error::custom)?.serialize(serializer)
    }
}

/// Modifier suffix/prefix attached to a field name in setter and getter keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeyModifier<'k> {
    /// `name+`
    Append,
    /// `+name`
    Prepend,
    /// `name-`
    Subtract,
    /// `name:<modifier>`
    Named(&'k str),
}

/// Splits `key` into a modifier for the field `name`, if it addresses that field.
pub(crate) fn match_key<'k>(key: &'k str, name: &str) -> Option<KeyModifier<'k>> {
    if let Some(rest) = key.strip_prefix(name) {
        return match rest {
            "+" => Some(KeyModifier::Append),
            "-" => Some(KeyModifier::Subtract),
            _ => rest.strip_prefix(':').filter(|m| !m.is_empty()).map(KeyModifier::Named),
        };
    }
    if key.strip_prefix('+') == Some(name) {
        return Some(KeyModifier::Prepend);
    }
    None
}

/// Best-effort string cast used by the text-like kinds.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items.last().map(value_to_string).unwrap_or_default(),
        other => other.to_string(),
    }
}

pub fn value_to_f64(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or_default(),
        Value::String(s) => s.trim().parse().unwrap_or_default(),
        Value::Bool(true) => 1.0,
        Value::Array(items) => items.last().map(value_to_f64).unwrap_or_default(),
        _ => 0.0,
    }
}

pub fn value_to_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        Value::String(s) => matches!(s.trim().to_lowercase().as_str(), "true" | "1" | "on" | "yes"),
        _ => false,
    }
}

/// Numbers without fractional part are kept as integers.
pub fn number_value(value: f64) -> Value {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 9.0e15 {
        Value::from(value as i64)
    } else {
        serde_json::Number::from_f64(value).map(Value::Number).unwrap_or_else(|| Value::from(0))
    }
}

/// Scalars are bound directly, arrays and objects as JSON text.
pub fn default_driver_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Converts a column value read from SQLite into JSON.
pub fn sql_to_json(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::from(i),
        SqlValue::Real(r) => number_value(r),
        SqlValue::Text(s) => Value::String(s),
        SqlValue::Blob(b) => Value::String(String::from_utf8_lossy(&b).into_owned()),
    }
}

/// Zero value check used by `required` rules.
pub fn is_zero_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

pub(crate) fn issue(code: &str, message: impl Into<String>) -> ValidationIssue {
    ValidationIssue::new("", code, message)
}

pub(crate) fn required_issue() -> ValidationIssue {
    issue("validation_required", "Cannot be blank.")
}

/// Multi-valued storage helpers shared by select, relation and file fields.
pub(crate) mod multi {
    use serde_json::Value;

    use super::{KeyModifier, Setter, match_key};
    use crate::record::Record;
    use crate::tools::list::{subtract, to_unique_string_vec};

    pub fn prepare(raw: &Value, multiple: bool) -> Value {
        let items = to_unique_string_vec(raw);
        if multiple {
            Value::from(items)
        } else {
            Value::from(items.last().cloned().unwrap_or_default())
        }
    }

    pub fn items(value: Option<&Value>) -> Vec<String> {
        value.map(to_unique_string_vec).unwrap_or_default()
    }

    #[derive(Clone, Copy)]
    enum ListOp {
        Append,
        Prepend,
        Subtract,
    }

    /// `name+`, `+name` and `name-` setters.
    pub fn setter<'a>(key: &str, name: &'a str, multiple: bool) -> Option<Setter<'a>> {
        let op = match match_key(key, name)? {
            KeyModifier::Append => ListOp::Append,
            KeyModifier::Prepend => ListOp::Prepend,
            KeyModifier::Subtract => ListOp::Subtract,
            KeyModifier::Named(_) => return None,
        };
        Some(Box::new(move |record: &mut Record, value: Value| {
            let current = items(record.get_raw(name));
            let incoming = to_unique_string_vec(&value);
            let merged: Vec<String> = match op {
                ListOp::Append => current.into_iter().chain(incoming).collect(),
                ListOp::Prepend => incoming.into_iter().chain(current).collect(),
                ListOp::Subtract => subtract(&current, &incoming),
            };
            record.set_raw(name, prepare(&Value::from(merged), multiple));
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_matching_covers_modifiers() {
        assert_eq!(match_key("tags+", "tags"), Some(KeyModifier::Append));
        assert_eq!(match_key("+tags", "tags"), Some(KeyModifier::Prepend));
        assert_eq!(match_key("tags-", "tags"), Some(KeyModifier::Subtract));
        assert_eq!(match_key("password:hash", "password"), Some(KeyModifier::Named("hash")));
        assert_eq!(match_key("tags", "tags"), None);
        assert_eq!(match_key("tagsx", "tags"), None);
        assert_eq!(match_key("tags:", "tags"), None);
    }

    #[test]
    fn casts_are_lenient() {
        assert_eq!(value_to_string(&json!(12)), "12");
        assert_eq!(value_to_string(&json!(["a", "b"])), "b");
        assert_eq!(value_to_f64(&json!("1.5")), 1.5);
        assert_eq!(value_to_f64(&json!("x")), 0.0);
        assert!(value_to_bool(&json!("true")));
        assert!(!value_to_bool(&json!("false")));
        assert_eq!(number_value(3.0), json!(3));
        assert_eq!(number_value(f64::NAN), json!(0));
    }

    #[test]
    fn field_json_carries_type_discriminator() {
        let field = Field::from(TextField {
            required: true,
            ..TextField::new("title")
        });
        let value = field.to_json().unwrap();
        assert_eq!(value["type"], "text");
        assert_eq!(value["name"], "title");
        assert_eq!(value["required"], true);
    }

    #[test]
    fn base_validation_rejects_bad_names() {
        let mut base = FieldBase::named("a_via_b");
        base.id = "x".into();
        assert!(base.validate().has("name"));
        base.name = "expand".into();
        assert!(base.validate().has("name"));
        base.name = "ok_name".into();
        assert!(base.validate().is_empty());
    }
}

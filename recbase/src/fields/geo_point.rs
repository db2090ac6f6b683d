use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{FieldBase, FieldKind, SettingsContext, ValueContext, issue, required_issue, value_to_f64};
use crate::errors::{ValidationError, ValidationIssue};

/// Reads a `{a, b}` coordinate object (or its JSON string form).
pub(super) fn coordinates(raw: &Value, a: &str, b: &str) -> (f64, f64) {
    let decoded;
    let object = match raw {
        Value::String(s) => {
            decoded = serde_json::from_str::<Value>(s).unwrap_or(Value::Null);
            &decoded
        }
        other => other,
    };
    let read = |key: &str| object.get(key).map(value_to_f64).unwrap_or_default();
    (read(a), read(b))
}

/// Geographic coordinate `{lon, lat}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GeoPointField {
    #[serde(flatten)]
    pub base: FieldBase,
    pub required: bool,
}

impl GeoPointField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            base: FieldBase::named(name),
            ..Self::default()
        }
    }
}

impl FieldKind for GeoPointField {
    const TYPE: &'static str = super::FIELD_TYPE_GEO_POINT;

    fn base(&self) -> &FieldBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FieldBase {
        &mut self.base
    }

    fn column_type(&self) -> String {
        r#"JSON DEFAULT '{"lon":0,"lat":0}' NOT NULL"#.to_string()
    }

    fn prepare_value(&self, raw: &Value) -> Value {
        let (lon, lat) = coordinates(raw, "lon", "lat");
        json!({ "lon": lon, "lat": lat })
    }

    fn driver_value(&self, value: &Value) -> SqlValue {
        SqlValue::Text(self.prepare_value(value).to_string())
    }

    fn validate_value(&self, ctx: &ValueContext<'_>) -> Result<(), ValidationIssue> {
        let (lon, lat) = coordinates(ctx.value(&self.base.name), "lon", "lat");
        if !(-180.0..=180.0).contains(&lon) {
            return Err(issue("validation_invalid_longitude", "Longitude must be between -180 and 180 degrees."));
        }
        if !(-90.0..=90.0).contains(&lat) {
            return Err(issue("validation_invalid_latitude", "Latitude must be between -90 and 90 degrees."));
        }
        if self.required && lon == 0.0 && lat == 0.0 {
            return Err(required_issue());
        }
        Ok(())
    }

    fn validate_settings(&self, _ctx: &SettingsContext<'_>) -> ValidationError {
        ValidationError::default()
    }
}

use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::geo_point::coordinates;
use super::{FieldBase, FieldKind, SettingsContext, ValueContext, issue, required_issue};
use crate::errors::{ValidationError, ValidationIssue};

/// Planar `{x, y}` coordinate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PointField {
    #[serde(flatten)]
    pub base: FieldBase,
    pub required: bool,
}

impl PointField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            base: FieldBase::named(name),
            ..Self::default()
        }
    }
}

impl FieldKind for PointField {
    const TYPE: &'static str = super::FIELD_TYPE_POINT;

    fn base(&self) -> &FieldBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FieldBase {
        &mut self.base
    }

    fn column_type(&self) -> String {
        r#"JSON DEFAULT '{"x":0,"y":0}' NOT NULL"#.to_string()
    }

    fn prepare_value(&self, raw: &Value) -> Value {
        let (x, y) = coordinates(raw, "x", "y");
        json!({ "x": x, "y": y })
    }

    fn driver_value(&self, value: &Value) -> SqlValue {
        SqlValue::Text(self.prepare_value(value).to_string())
    }

    fn validate_value(&self, ctx: &ValueContext<'_>) -> Result<(), ValidationIssue> {
        let (x, y) = coordinates(ctx.value(&self.base.name), "x", "y");
        if !x.is_finite() || !y.is_finite() {
            return Err(issue("validation_invalid_point", "Coordinates must be finite numbers."));
        }
        if self.required && x == 0.0 && y == 0.0 {
            return Err(required_issue());
        }
        Ok(())
    }

    fn validate_settings(&self, _ctx: &SettingsContext<'_>) -> ValidationError {
        ValidationError::default()
    }
}

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    FieldBase, FieldKind, KeyModifier, SettingsContext, Setter, ValueContext, issue, match_key, number_value,
    required_issue, value_to_f64,
};
use crate::errors::{ValidationError, ValidationIssue};
use crate::record::Record;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NumberField {
    #[serde(flatten)]
    pub base: FieldBase,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub only_int: bool,
    pub required: bool,
}

impl NumberField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            base: FieldBase::named(name),
            ..Self::default()
        }
    }
}

impl FieldKind for NumberField {
    const TYPE: &'static str = super::FIELD_TYPE_NUMBER;

    fn base(&self) -> &FieldBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FieldBase {
        &mut self.base
    }

    fn column_type(&self) -> String {
        "NUMERIC DEFAULT 0 NOT NULL".to_string()
    }

    fn prepare_value(&self, raw: &Value) -> Value {
        number_value(value_to_f64(raw))
    }

    fn validate_value(&self, ctx: &ValueContext<'_>) -> Result<(), ValidationIssue> {
        let raw = ctx.value(&self.base.name);
        if let Value::Number(n) = raw {
            if n.as_f64().is_none_or(|v| !v.is_finite()) {
                return Err(issue("validation_not_a_number", "The submitted number is not properly formatted."));
            }
        }
        let value = value_to_f64(raw);

        if value == 0.0 {
            return if self.required { Err(required_issue()) } else { Ok(()) };
        }
        if self.only_int && value.fract() != 0.0 {
            return Err(issue("validation_only_int_constraint", "Decimal numbers are not allowed."));
        }
        if let Some(min) = self.min {
            if value < min {
                return Err(issue("validation_min_number_constraint", format!("Must be larger than {min}.")));
            }
        }
        if let Some(max) = self.max {
            if value > max {
                return Err(issue("validation_max_number_constraint", format!("Must be less than {max}.")));
            }
        }
        Ok(())
    }

    fn validate_settings(&self, _ctx: &SettingsContext<'_>) -> ValidationError {
        let mut errors = ValidationError::default();
        for (key, bound) in [("min", self.min), ("max", self.max)] {
            if let Some(v) = bound {
                if !v.is_finite() {
                    errors.push(key, "validation_not_a_number", "Must be a finite number.");
                } else if self.only_int && v.fract() != 0.0 {
                    errors.push(key, "validation_only_int_constraint", "Decimal numbers are not allowed.");
                }
            }
        }
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                errors.push("max", "validation_min_greater_equal_than_required", "Must be greater than or equal to min.");
            }
        }
        errors
    }

    /// `name+` increments and `name-` decrements the current value.
    fn find_setter(&self, key: &str) -> Option<Setter<'_>> {
        let sign = match match_key(key, &self.base.name)? {
            KeyModifier::Append => 1.0,
            KeyModifier::Subtract => -1.0,
            _ => return None,
        };
        Some(Box::new(move |record: &mut Record, value: Value| {
            let current = record.get_raw(&self.base.name).map(value_to_f64).unwrap_or_default();
            record.set_raw(&self.base.name, number_value(current + sign * value_to_f64(&value)));
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::Collection;
    use crate::db::Db;
    use crate::fields::Field;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn validates_bounds_and_int_flag() {
        let db = Db::open_in_memory().unwrap();
        let field = NumberField {
            min: Some(2.0),
            max: Some(10.0),
            only_int: true,
            ..NumberField::new("qty")
        };
        let mut collection = Collection::new_base("demo");
        collection.fields.add(Field::from(field.clone()));
        let collection = Arc::new(collection);

        for (value, ok) in [(json!(0), true), (json!(1), false), (json!(5), true), (json!(5.5), false), (json!(11), false)] {
            let mut record = Record::new(collection.clone());
            record.set_raw("qty", value.clone());
            let ctx = ValueContext { db: &db, record: &record };
            assert_eq!(field.validate_value(&ctx).is_ok(), ok, "{value}");
        }
    }

    #[test]
    fn increment_and_decrement_setters() {
        let mut collection = Collection::new_base("demo");
        collection.fields.add(Field::from(NumberField::new("total")));
        let mut record = Record::new(Arc::new(collection));
        record.set("total", json!(3));
        record.set("total+", json!(4));
        record.set("total-", json!(2));
        assert_eq!(record.get_f64("total"), 5.0);
    }
}

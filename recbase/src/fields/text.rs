use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    FIELD_NAME_ID, FieldBase, FieldKind, InterceptAction, InterceptEnv, KeyModifier, Next, SettingsContext, Setter,
    ValueContext, issue, match_key, required_issue, value_to_string,
};
use crate::errors::{CoreError, CoreResult, ValidationError, ValidationIssue};
use crate::id::{DEFAULT_ID_AUTOGENERATE_PATTERN, DEFAULT_ID_PATTERN, RECORD_ID_LENGTH, field_id};
use crate::record::Record;
use crate::tools::security::random_string_by_regex;

/// Rune limit applied when `max` is left at zero.
pub const DEFAULT_TEXT_MAX_LENGTH: usize = 5000;

const PRIMARY_KEY_CHARS: &str = r"^[\w-]+$";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TextField {
    #[serde(flatten)]
    pub base: FieldBase,
    pub min: usize,
    pub max: usize,
    pub pattern: String,
    pub autogenerate_pattern: String,
    pub required: bool,
    pub primary_key: bool,
}

impl TextField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            base: FieldBase::named(name),
            ..Self::default()
        }
    }

    /// The default `id` primary key of every collection.
    pub fn primary_id() -> Self {
        let mut base = FieldBase::named(FIELD_NAME_ID);
        base.id = field_id(Self::TYPE, FIELD_NAME_ID);
        base.system = true;
        Self {
            base,
            min: RECORD_ID_LENGTH,
            max: RECORD_ID_LENGTH,
            pattern: DEFAULT_ID_PATTERN.to_string(),
            autogenerate_pattern: DEFAULT_ID_AUTOGENERATE_PATTERN.to_string(),
            required: true,
            primary_key: true,
        }
    }

    fn effective_max(&self) -> usize {
        if self.max == 0 { DEFAULT_TEXT_MAX_LENGTH } else { self.max }
    }

    fn generate(&self) -> CoreResult<String> {
        random_string_by_regex(&self.autogenerate_pattern)
            .map_err(|err| CoreError::invalid(format!("failed to autogenerate {}: {err}", self.base.name)))
    }
}

impl FieldKind for TextField {
    const TYPE: &'static str = super::FIELD_TYPE_TEXT;

    fn base(&self) -> &FieldBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FieldBase {
        &mut self.base
    }

    fn column_type(&self) -> String {
        if self.primary_key {
            "TEXT PRIMARY KEY NOT NULL".to_string()
        } else {
            "TEXT DEFAULT '' NOT NULL".to_string()
        }
    }

    fn prepare_value(&self, raw: &Value) -> Value {
        Value::String(value_to_string(raw))
    }

    fn validate_value(&self, ctx: &ValueContext<'_>) -> Result<(), ValidationIssue> {
        let value = value_to_string(ctx.value(&self.base.name));

        if value.is_empty() {
            return if self.required || self.primary_key { Err(required_issue()) } else { Ok(()) };
        }

        if self.primary_key {
            let chars = Regex::new(PRIMARY_KEY_CHARS).map_err(|e| issue("validation_invalid_regex", e.to_string()))?;
            if !chars.is_match(&value) {
                return Err(issue(
                    "validation_pk_forbidden",
                    "The record primary key may contain only letters, digits, underscores and dashes.",
                ));
            }
        }

        let length = value.chars().count();
        if self.min > 0 && length < self.min {
            return Err(issue(
                "validation_min_text_constraint",
                format!("Must be at least {} character(s).", self.min),
            ));
        }
        let max = self.effective_max();
        if length > max {
            return Err(issue(
                "validation_max_text_constraint",
                format!("Must be less than {max} character(s)."),
            ));
        }

        if !self.pattern.is_empty() {
            let re = Regex::new(&self.pattern).map_err(|e| issue("validation_invalid_regex", e.to_string()))?;
            if !re.is_match(&value) {
                return Err(issue("validation_invalid_format", "Invalid value format."));
            }
        }

        Ok(())
    }

    fn validate_settings(&self, _ctx: &SettingsContext<'_>) -> ValidationError {
        let mut errors = ValidationError::default();

        if self.max > 0 && self.min > self.max {
            errors.push("max", "validation_min_greater_equal_than_required", "Must be greater than or equal to min.");
        }
        if !self.pattern.is_empty() && Regex::new(&self.pattern).is_err() {
            errors.push("pattern", "validation_invalid_regex", "Invalid regular expression.");
        }
        if !self.autogenerate_pattern.is_empty() && random_string_by_regex(&self.autogenerate_pattern).is_err() {
            errors.push("autogeneratePattern", "validation_invalid_regex", "Unsupported autogenerate pattern.");
        }

        let is_id = self.base.name == FIELD_NAME_ID;
        if self.primary_key {
            if !is_id {
                errors.push("primaryKey", "validation_invalid_primary_key", "Only the \"id\" field can be a primary key.");
            }
            if !self.required {
                errors.push("required", "validation_required", "The primary key must be required.");
            }
            if self.base.hidden {
                errors.push("hidden", "validation_pk_hidden", "The primary key cannot be hidden.");
            }
        } else if is_id {
            errors.push("primaryKey", "validation_required", "The \"id\" field must be the primary key.");
        }

        errors
    }

    fn find_setter(&self, key: &str) -> Option<Setter<'_>> {
        match match_key(key, &self.base.name)? {
            KeyModifier::Named("autogenerate") => Some(Box::new(move |record: &mut Record, value: Value| {
                let prefix = value_to_string(&value);
                match self.generate() {
                    Ok(generated) => record.set_raw(&self.base.name, Value::String(prefix + &generated)),
                    Err(err) => log::warn!("{err}"),
                }
            })),
            _ => None,
        }
    }

    fn intercept(
        &self,
        _env: &InterceptEnv<'_>,
        record: &mut Record,
        action: InterceptAction,
        next: Next<'_>,
    ) -> CoreResult<()> {
        if matches!(action, InterceptAction::Validate | InterceptAction::Create)
            && record.is_new()
            && !self.autogenerate_pattern.is_empty()
            && record.get_raw(&self.base.name).map(value_to_string).unwrap_or_default().is_empty()
        {
            let generated = self.generate()?;
            record.set_raw(&self.base.name, Value::String(generated));
        }
        next(record)
    }

    fn max_body_size(&self) -> u64 {
        self.effective_max() as u64 * 4
    }
}

use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    FieldBase, FieldKind, Getter, KeyModifier, SettingsContext, Setter, ValueContext, issue, match_key,
    required_issue, value_to_string,
};
use crate::errors::{ValidationError, ValidationIssue};
use crate::record::Record;

/// Upper bound of the accepted plain password length.
pub const MAX_PASSWORD_LENGTH: usize = 71;

/// Plain value and hashing outcome of the last password assignment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PasswordState {
    pub plain: String,
    pub last_error: Option<String>,
}

pub fn hash_password(plain: &str) -> Result<String, String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| e.to_string())
}

/// Checks `plain` against an encoded argon2 hash.
pub fn verify_password(hash: &str, plain: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default().verify_password(plain.as_bytes(), &parsed).is_ok(),
        Err(_) => false,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PasswordField {
    #[serde(flatten)]
    pub base: FieldBase,
    pub min: usize,
    pub max: usize,
    pub pattern: String,
    pub required: bool,
}

impl PasswordField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            base: FieldBase::named(name),
            ..Self::default()
        }
    }

    fn effective_max(&self) -> usize {
        if self.max == 0 { MAX_PASSWORD_LENGTH } else { self.max.min(MAX_PASSWORD_LENGTH) }
    }
}

impl FieldKind for PasswordField {
    const TYPE: &'static str = super::FIELD_TYPE_PASSWORD;

    fn base(&self) -> &FieldBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FieldBase {
        &mut self.base
    }

    fn column_type(&self) -> String {
        "TEXT DEFAULT '' NOT NULL".to_string()
    }

    fn prepare_value(&self, raw: &Value) -> Value {
        Value::String(value_to_string(raw))
    }

    fn validate_value(&self, ctx: &ValueContext<'_>) -> Result<(), ValidationIssue> {
        let Some(state) = ctx.record.password_state(&self.base.name) else {
            // Untouched since load; only the stored hash matters.
            let hash = value_to_string(ctx.value(&self.base.name));
            return if self.required && hash.is_empty() { Err(required_issue()) } else { Ok(()) };
        };

        if let Some(err) = &state.last_error {
            return Err(issue("validation_password_hash", err.clone()));
        }
        if state.plain.is_empty() {
            return if self.required { Err(required_issue()) } else { Ok(()) };
        }

        let length = state.plain.chars().count();
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
            if !re.is_match(&state.plain) {
                return Err(issue("validation_invalid_format", "Invalid value format."));
            }
        }
        Ok(())
    }

    fn validate_settings(&self, _ctx: &SettingsContext<'_>) -> ValidationError {
        let mut errors = ValidationError::default();
        if self.max > MAX_PASSWORD_LENGTH {
            errors.push("max", "validation_max_password_length", format!("Must be no more than {MAX_PASSWORD_LENGTH}."));
        }
        if self.min > self.effective_max() {
            errors.push("min", "validation_min_greater_equal_than_required", "Must be less than or equal to max.");
        }
        if !self.pattern.is_empty() && Regex::new(&self.pattern).is_err() {
            errors.push("pattern", "validation_invalid_regex", "Invalid regular expression.");
        }
        errors
    }

    /// The plain name hashes its input; `name:hash` stores an existing hash as is.
    fn find_setter(&self, key: &str) -> Option<Setter<'_>> {
        if key == self.base.name {
            return Some(Box::new(move |record: &mut Record, value: Value| {
                let plain = value_to_string(&value);
                let (hash, last_error) = if plain.is_empty() {
                    (String::new(), None)
                } else {
                    match hash_password(&plain) {
                        Ok(hash) => (hash, None),
                        Err(err) => (String::new(), Some(err)),
                    }
                };
                record.set_raw(&self.base.name, Value::String(hash));
                record.set_password_state(&self.base.name, PasswordState { plain, last_error });
            }));
        }
        match match_key(key, &self.base.name)? {
            KeyModifier::Named("hash") => Some(Box::new(move |record: &mut Record, value: Value| {
                record.set_raw(&self.base.name, Value::String(value_to_string(&value)));
            })),
            _ => None,
        }
    }

    fn find_getter(&self, key: &str) -> Option<Getter<'_>> {
        match match_key(key, &self.base.name)? {
            KeyModifier::Named("hash") => Some(Box::new(move |record: &Record| {
                record.get_raw(&self.base.name).cloned().unwrap_or(Value::Null)
            })),
            KeyModifier::Named("plain") => Some(Box::new(move |record: &Record| {
                Value::String(record.password_state(&self.base.name).map(|s| s.plain.clone()).unwrap_or_default())
            })),
            KeyModifier::Named("lastError") => Some(Box::new(move |record: &Record| {
                record
                    .password_state(&self.base.name)
                    .and_then(|s| s.last_error.clone())
                    .map(Value::String)
                    .unwrap_or(Value::Null)
            })),
            _ => None,
        }
    }

    fn max_body_size(&self) -> u64 {
        (MAX_PASSWORD_LENGTH * 4) as u64
    }
}

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    DEFAULT_FILE_MAX_SIZE, FieldBase, FieldKind, Getter, InterceptAction, InterceptEnv, KeyModifier, Next,
    SettingsContext, Setter, ValueContext, issue, match_key, multi, required_issue,
};
use crate::errors::{CoreError, CoreResult, ValidationError, ValidationIssue};
use crate::record::Record;

static THUMB_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)x(\d+)(t|b|f)?$").expect("thumb pattern is valid"));

/// Names of files stored for the record, uploaded through the filesystem collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileField {
    #[serde(flatten)]
    pub base: FieldBase,
    pub max_select: usize,
    /// Per file byte limit; zero means [`DEFAULT_FILE_MAX_SIZE`].
    pub max_size: u64,
    pub mime_types: Vec<String>,
    pub thumbs: Vec<String>,
    pub protected: bool,
    pub required: bool,
}

impl FileField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            base: FieldBase::named(name),
            ..Self::default()
        }
    }

    fn effective_max_size(&self) -> u64 {
        if self.max_size == 0 { DEFAULT_FILE_MAX_SIZE } else { self.max_size }
    }

    fn file_key(record: &Record, file_name: &str) -> String {
        format!("{}/{file_name}", record.base_files_path())
    }

    /// Deletes already written keys, logging the failures only.
    fn cleanup(env: &InterceptEnv<'_>, keys: &[String]) {
        let ctx = env.ctx.for_cleanup();
        for key in keys {
            if let Err(err) = env.fs.delete(&ctx, key) {
                log::warn!("failed to delete file {key}: {err}");
            }
        }
    }
}

impl FieldKind for FileField {
    const TYPE: &'static str = super::FIELD_TYPE_FILE;

    fn base(&self) -> &FieldBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FieldBase {
        &mut self.base
    }

    fn column_type(&self) -> String {
        if self.is_multiple() {
            "JSON DEFAULT '[]' NOT NULL".to_string()
        } else {
            "TEXT DEFAULT '' NOT NULL".to_string()
        }
    }

    fn is_multi_valuer(&self) -> bool {
        true
    }

    fn is_multiple(&self) -> bool {
        self.max_select > 1
    }

    fn prepare_value(&self, raw: &Value) -> Value {
        multi::prepare(raw, self.is_multiple())
    }

    fn validate_value(&self, ctx: &ValueContext<'_>) -> Result<(), ValidationIssue> {
        let names = multi::items(Some(ctx.value(&self.base.name)));
        if names.is_empty() {
            return if self.required { Err(required_issue()) } else { Ok(()) };
        }

        let max = self.max_select.max(1);
        if names.len() > max {
            return Err(issue("validation_too_many_values", format!("Select no more than {max}.")));
        }

        let pending = ctx.record.pending_files(&self.base.name);
        let original = multi::items(ctx.record.original().get(&self.base.name));
        for name in &names {
            if !original.contains(name) && !pending.iter().any(|f| &f.name == name) {
                return Err(issue("validation_invalid_file", format!("Unknown file {name}.")));
            }
        }

        let max_size = self.effective_max_size();
        for file in pending.iter().filter(|f| names.contains(&f.name)) {
            if file.size > max_size {
                return Err(issue(
                    "validation_file_size_limit",
                    format!("Failed to upload {:?} - the maximum allowed file size is {max_size} bytes.", file.original_name),
                ));
            }
            if !self.mime_types.is_empty() {
                let mime = file.mime_type();
                if !self.mime_types.iter().any(|m| m.eq_ignore_ascii_case(&mime)) {
                    return Err(issue(
                        "validation_invalid_mime_type",
                        format!("{:?} mime type must be one of: {}.", file.original_name, self.mime_types.join(", ")),
                    ));
                }
            }
        }
        Ok(())
    }

    fn validate_settings(&self, _ctx: &SettingsContext<'_>) -> ValidationError {
        let mut errors = ValidationError::default();
        for (i, thumb) in self.thumbs.iter().enumerate() {
            let valid = THUMB_RE
                .captures(thumb)
                .map(|caps| &caps[1] != "0" || &caps[2] != "0")
                .unwrap_or(false);
            if !valid {
                errors.push(format!("thumbs.{i}"), "validation_invalid_thumb_format", "Invalid thumb format.");
            }
        }
        errors
    }

    fn find_setter(&self, key: &str) -> Option<Setter<'_>> {
        multi::setter(key, &self.base.name, self.is_multiple())
    }

    fn find_getter(&self, key: &str) -> Option<Getter<'_>> {
        match match_key(key, &self.base.name)? {
            KeyModifier::Named("unsaved") => Some(Box::new(move |record: &Record| {
                let names: Vec<String> =
                    record.pending_files(&self.base.name).iter().map(|f| f.name.clone()).collect();
                Value::from(names)
            })),
            _ => None,
        }
    }

    fn intercept(
        &self,
        env: &InterceptEnv<'_>,
        record: &mut Record,
        action: InterceptAction,
        next: Next<'_>,
    ) -> CoreResult<()> {
        if !matches!(action, InterceptAction::Create | InterceptAction::Update) {
            return next(record);
        }

        let current = multi::items(record.get_raw(&self.base.name));
        let pending: Vec<_> = record
            .pending_files(&self.base.name)
            .iter()
            .filter(|f| current.contains(&f.name))
            .cloned()
            .collect();

        let mut uploaded = Vec::with_capacity(pending.len());
        for file in &pending {
            let key = Self::file_key(record, &file.name);
            if let Err(err) = env.fs.upload_file(env.ctx, file, &key) {
                Self::cleanup(env, &uploaded);
                return Err(CoreError::Files(vec![err]));
            }
            uploaded.push(key);
        }

        if let Err(err) = next(record) {
            Self::cleanup(env, &uploaded);
            return Err(err);
        }

        if action == InterceptAction::Update {
            let replaced: Vec<String> = multi::items(record.original().get(&self.base.name))
                .into_iter()
                .filter(|name| !current.contains(name))
                .map(|name| Self::file_key(record, &name))
                .collect();
            Self::cleanup(env, &replaced);
        }

        record.clear_pending(&self.base.name);
        Ok(())
    }

    fn max_body_size(&self) -> u64 {
        self.effective_max_size() * self.max_select.max(1) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::Collection;
    use crate::db::Db;

    #[test]
    fn thumbs_are_validated() {
        let db = Db::open_in_memory().unwrap();
        let collection = Collection::new_base("demo");
        let ctx = SettingsContext { db: &db, collection: &collection, original: None };
        let field = FileField {
            thumbs: vec!["100x100".into(), "0x50t".into(), "0x0".into(), "abc".into()],
            ..FileField::new("avatar")
        };
        let errors = field.validate_settings(&ctx);
        assert!(!errors.has("thumbs.0"));
        assert!(!errors.has("thumbs.1"));
        assert!(errors.has("thumbs.2"));
        assert!(errors.has("thumbs.3"));
    }

    #[test]
    fn body_size_scales_with_max_select() {
        let field = FileField { max_size: 10, max_select: 3, ..FileField::new("docs") };
        assert_eq!(field.max_body_size(), 30);
    }
}

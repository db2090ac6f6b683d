use std::borrow::Cow;

use thiserror::Error;

use crate::filesystem::FsError;

/// Top-level error type returned by recbase operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Structural validation failed for one or more paths.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Underlying SQLite statement failed. Any open transaction is rolled back.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A filter expression or sort expression could not be compiled.
    #[error("invalid filter: {message}")]
    Filter { message: String },

    /// A collection or record lookup did not match anything.
    #[error("{what} not found")]
    NotFound { what: String },

    /// Invalid input supplied to an operation.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {message}")]
    Config { message: String },

    #[error("filesystem error: {0}")]
    Filesystem(#[from] FsError),

    /// Several file operations failed while persisting a record.
    #[error("{} file operation(s) failed: {}", .0.len(), join_fs_errors(.0))]
    Files(Vec<FsError>),

    #[error("{message}")]
    Other { message: Cow<'static, str> },
}

impl CoreError {
    pub fn filter(message: impl Into<String>) -> Self {
        Self::Filter { message: message.into() }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest { message: message.into() }
    }

    pub fn other(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Other { message: message.into() }
    }

    /// Returns the validation issues when this is a validation failure.
    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            Self::Validation(err) => Some(err),
            _ => None,
        }
    }
}

fn join_fs_errors(errors: &[FsError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Collection of validation issues keyed by field path.
#[derive(Debug, Clone, Default, Error)]
#[error("{}", render_issues(.issues))]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

fn render_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|issue| format!("{}: {}", issue.field, issue.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    pub fn new<I>(issues: I) -> Self
    where
        I: IntoIterator<Item = ValidationIssue>,
    {
        Self {
            issues: issues.into_iter().collect(),
        }
    }

    /// Convenience helper for constructing a single-path validation error.
    pub fn single(field: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new([ValidationIssue::new(field, code, message)])
    }

    pub fn push(&mut self, field: impl Into<String>, code: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue::new(field, code, message));
    }

    /// Merges `other` into this error, prefixing each issue path with `prefix`.
    pub fn extend_prefixed(&mut self, prefix: &str, other: ValidationError) {
        for issue in other.issues {
            let field = if issue.field.is_empty() {
                prefix.to_string()
            } else if prefix.is_empty() {
                issue.field
            } else {
                format!("{prefix}.{}", issue.field)
            };
            self.issues.push(ValidationIssue { field, ..issue });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// Returns `true` if an issue was recorded for `path` or any of its children.
    pub fn has(&self, path: &str) -> bool {
        self.issues
            .iter()
            .any(|issue| issue.field == path || issue.field.starts_with(&format!("{path}.")))
    }

    pub fn get(&self, path: &str) -> Option<&ValidationIssue> {
        self.issues.iter().find(|issue| issue.field == path)
    }

    pub fn into_result(self) -> ValidationResult<()> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

/// Detailed validation failure for a single field or logical path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: String,
    pub code: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code: code.into(),
            message: message.into(),
        }
    }
}

pub type ValidationResult<T> = Result<T, ValidationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixed_merge_builds_nested_paths() {
        let mut root = ValidationError::default();
        let mut inner = ValidationError::single("name", "validation_required", "cannot be blank");
        inner.push("", "validation_invalid", "invalid field");
        root.extend_prefixed("fields.2", inner);

        assert!(root.has("fields"));
        assert!(root.has("fields.2"));
        assert_eq!(root.get("fields.2.name").map(|i| i.code.as_str()), Some("validation_required"));
        assert!(root.get("fields.2").is_some());
        assert!(!root.has("fields.20"));
    }

    #[test]
    fn empty_error_converts_to_ok() {
        assert!(ValidationError::default().into_result().is_ok());
        assert!(ValidationError::single("id", "x", "y").into_result().is_err());
    }
}

//! Storage collaborator used by file fields.
//!
//! Keys are `/`-separated paths such as `<collectionId>/<recordId>/<fileName>`.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::tools::inflector::snakecase;
use crate::tools::security::{LOWER_ALPHANUM, random_string_with_alphabet};

#[derive(Debug, Error)]
pub enum FsError {
    #[error("io error for {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },

    #[error("file {key} not found")]
    NotFound { key: String },

    #[error("invalid storage key {key:?}")]
    InvalidKey { key: String },

    #[error("operation cancelled")]
    Cancelled,
}

/// Cancellable execution context passed to every storage call.
#[derive(Debug, Clone)]
pub struct OpContext {
    cancelled: Arc<AtomicBool>,
    cancellable: bool,
}

impl Default for OpContext {
    fn default() -> Self {
        Self::new()
    }
}

impl OpContext {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            cancellable: true,
        }
    }

    /// A context that can never be cancelled.
    pub fn background() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            cancellable: false,
        }
    }

    pub fn cancel(&self) {
        if self.cancellable {
            self.cancelled.store(true, Ordering::SeqCst);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellable && self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns a context usable for cleanup: `self` while still live, otherwise a background one.
    pub fn for_cleanup(&self) -> OpContext {
        if self.is_cancelled() { Self::background() } else { self.clone() }
    }

    fn check(&self) -> Result<(), FsError> {
        if self.is_cancelled() { Err(FsError::Cancelled) } else { Ok(()) }
    }
}

/// New file content waiting to be persisted by a file field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// Generated storage name.
    pub name: String,
    pub original_name: String,
    pub size: u64,
    pub content: Vec<u8>,
}

impl UploadedFile {
    /// Wraps raw bytes and generates a sanitized, unique storage name
    /// (`<snake_base>_<random>.<ext>`).
    pub fn from_bytes(original_name: impl Into<String>, content: Vec<u8>) -> Self {
        let original_name = original_name.into();
        let path = Path::new(&original_name);
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| snakecase(e))
            .filter(|e| !e.is_empty());
        let base = path.file_stem().and_then(|s| s.to_str()).map(snakecase).unwrap_or_default();
        let mut base: String = base.chars().take(100).collect();
        if base.is_empty() {
            base = "file".to_string();
        }
        let suffix = random_string_with_alphabet(10, LOWER_ALPHANUM);
        let name = match ext {
            Some(ext) => format!("{base}_{suffix}.{ext}"),
            None => format!("{base}_{suffix}"),
        };

        Self {
            name,
            size: content.len() as u64,
            original_name,
            content,
        }
    }

    /// MIME type guessed from the original file name.
    pub fn mime_type(&self) -> String {
        mime_guess::from_path(&self.original_name)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    }
}

/// Storage contract consumed by file fields and record deletion.
pub trait Filesystem {
    fn upload_file(&self, ctx: &OpContext, file: &UploadedFile, key: &str) -> Result<(), FsError>;

    fn delete(&self, ctx: &OpContext, key: &str) -> Result<(), FsError>;

    /// Deletes every key under `prefix`, returning the individual failures.
    fn delete_prefix(&self, ctx: &OpContext, prefix: &str) -> Vec<FsError>;

    fn list(&self, ctx: &OpContext, prefix: &str) -> Result<Vec<String>, FsError>;

    fn is_empty_dir(&self, ctx: &OpContext, dir: &str) -> Result<bool, FsError>;
}

fn validate_key(key: &str) -> Result<(), FsError> {
    let invalid = key.is_empty()
        || Path::new(key)
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
    if invalid {
        return Err(FsError::InvalidKey { key: key.to_string() });
    }
    Ok(())
}

/// Directory backed storage.
#[derive(Debug, Clone)]
pub struct LocalFilesystem {
    root: PathBuf,
}

impl LocalFilesystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, FsError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn collect_files(&self, dir: &Path, out: &mut Vec<String>) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                self.collect_files(&path, out)?;
            } else if let Ok(rel) = path.strip_prefix(&self.root) {
                out.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
        Ok(())
    }
}

impl Filesystem for LocalFilesystem {
    fn upload_file(&self, ctx: &OpContext, file: &UploadedFile, key: &str) -> Result<(), FsError> {
        ctx.check()?;
        let path = self.path_for(key)?;
        let io_err = |source| FsError::Io { key: key.to_string(), source };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(&path, &file.content).map_err(io_err)
    }

    fn delete(&self, ctx: &OpContext, key: &str) -> Result<(), FsError> {
        ctx.check()?;
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(FsError::NotFound { key: key.to_string() }),
            Err(source) => Err(FsError::Io { key: key.to_string(), source }),
        }
    }

    fn delete_prefix(&self, ctx: &OpContext, prefix: &str) -> Vec<FsError> {
        let keys = match self.list(ctx, prefix) {
            Ok(keys) => keys,
            Err(FsError::NotFound { .. }) => return Vec::new(),
            Err(err) => return vec![err],
        };
        let mut failures: Vec<FsError> = keys.iter().filter_map(|key| self.delete(ctx, key).err()).collect();
        if let Ok(dir) = self.path_for(prefix.trim_end_matches('/')) {
            if dir.is_dir() {
                if let Err(source) = fs::remove_dir_all(&dir) {
                    failures.push(FsError::Io { key: prefix.to_string(), source });
                }
            }
        }
        failures
    }

    fn list(&self, ctx: &OpContext, prefix: &str) -> Result<Vec<String>, FsError> {
        ctx.check()?;
        let trimmed = prefix.trim_end_matches('/');
        let mut out = Vec::new();
        let dir = if trimmed.is_empty() { self.root.clone() } else { self.path_for(trimmed)? };
        if !dir.exists() {
            return Ok(out);
        }
        self.collect_files(&dir, &mut out).map_err(|source| FsError::Io { key: prefix.to_string(), source })?;
        out.sort();
        Ok(out)
    }

    fn is_empty_dir(&self, ctx: &OpContext, dir: &str) -> Result<bool, FsError> {
        Ok(self.list(ctx, dir)?.is_empty())
    }
}

/// In-memory storage, mostly useful for tests and tooling.
#[derive(Debug, Default)]
pub struct MemoryFilesystem {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.files.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Filesystem for MemoryFilesystem {
    fn upload_file(&self, ctx: &OpContext, file: &UploadedFile, key: &str) -> Result<(), FsError> {
        ctx.check()?;
        validate_key(key)?;
        self.lock().insert(key.to_string(), file.content.clone());
        Ok(())
    }

    fn delete(&self, ctx: &OpContext, key: &str) -> Result<(), FsError> {
        ctx.check()?;
        match self.lock().remove(key) {
            Some(_) => Ok(()),
            None => Err(FsError::NotFound { key: key.to_string() }),
        }
    }

    fn delete_prefix(&self, ctx: &OpContext, prefix: &str) -> Vec<FsError> {
        if let Err(err) = ctx.check() {
            return vec![err];
        }
        let prefix = format!("{}/", prefix.trim_end_matches('/'));
        self.lock().retain(|key, _| !key.starts_with(&prefix));
        Vec::new()
    }

    fn list(&self, ctx: &OpContext, prefix: &str) -> Result<Vec<String>, FsError> {
        ctx.check()?;
        Ok(self.lock().keys().filter(|key| key.starts_with(prefix)).cloned().collect())
    }

    fn is_empty_dir(&self, ctx: &OpContext, dir: &str) -> Result<bool, FsError> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        Ok(self.list(ctx, &prefix)?.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uploaded_file_names_are_sanitized() {
        let file = UploadedFile::from_bytes("My Report (final).PDF", b"abc".to_vec());
        assert!(file.name.starts_with("my_report_final_"), "{}", file.name);
        assert!(file.name.ends_with(".pdf"));
        assert_eq!(file.size, 3);
        assert_eq!(file.mime_type(), "application/pdf");

        let unnamed = UploadedFile::from_bytes("", Vec::new());
        assert!(unnamed.name.starts_with("file_"));
    }

    #[test]
    fn background_context_ignores_cancel() {
        let ctx = OpContext::new();
        ctx.cancel();
        assert!(ctx.is_cancelled());
        assert!(!ctx.for_cleanup().is_cancelled());

        let bg = OpContext::background();
        bg.cancel();
        assert!(!bg.is_cancelled());
    }

    #[test]
    fn local_filesystem_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFilesystem::new(dir.path());
        let ctx = OpContext::new();
        let file = UploadedFile::from_bytes("a.txt", b"hello".to_vec());

        fs.upload_file(&ctx, &file, "col/rec/a.txt").unwrap();
        fs.upload_file(&ctx, &file, "col/rec/b.txt").unwrap();
        assert_eq!(fs.list(&ctx, "col/rec").unwrap(), vec!["col/rec/a.txt", "col/rec/b.txt"]);
        assert!(!fs.is_empty_dir(&ctx, "col").unwrap());

        fs.delete(&ctx, "col/rec/a.txt").unwrap();
        assert!(matches!(fs.delete(&ctx, "col/rec/a.txt"), Err(FsError::NotFound { .. })));
        assert!(fs.delete_prefix(&ctx, "col/rec").is_empty());
        assert!(fs.is_empty_dir(&ctx, "col").unwrap());
        assert!(matches!(fs.upload_file(&ctx, &file, "../escape"), Err(FsError::InvalidKey { .. })));
    }

    #[test]
    fn cancelled_context_blocks_operations() {
        let fs = MemoryFilesystem::new();
        let ctx = OpContext::new();
        ctx.cancel();
        let file = UploadedFile::from_bytes("a.txt", vec![1]);
        assert!(matches!(fs.upload_file(&ctx, &file, "a/b"), Err(FsError::Cancelled)));
        assert!(fs.keys().is_empty());
    }
}

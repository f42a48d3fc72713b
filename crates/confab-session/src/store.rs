//! Storage for received resources
//!
//! Transports hand finished inbound resources over at a temporary location.
//! A [`ResourceStore`] moves them somewhere stable before the transcript
//! points at them.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::fs;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::StorageError;

/// Destination for finished inbound resources
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Copy the resource at `source` into the store and return its new location
    async fn persist(&self, name: &str, source: &Path) -> Result<PathBuf, StorageError>;
}

/// Build a collision-free file name that keeps the original extension
///
/// Only the final path component of `name` is used, so a peer cannot
/// steer the file outside the store.
pub fn unique_file_name(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "resource".to_string());
    let tag = &Uuid::new_v4().simple().to_string()[..8];

    let path = Path::new(&base);
    match (path.file_stem(), path.extension()) {
        (Some(stem), Some(ext)) => {
            format!("{}-{}.{}", stem.to_string_lossy(), tag, ext.to_string_lossy())
        }
        _ => format!("{}-{}", base, tag),
    }
}

/// Filesystem-backed resource store
pub struct FsResourceStore {
    base_dir: PathBuf,
}

impl FsResourceStore {
    /// Open a store rooted at `base_dir`, creating the directory
    pub async fn new(base_dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).await?;

        info!(path = %base_dir.display(), "Resource store initialized");
        Ok(Self { base_dir })
    }

    /// Directory holding stored resources
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

#[async_trait]
impl ResourceStore for FsResourceStore {
    #[instrument(skip(self), fields(source = %source.display()))]
    async fn persist(&self, name: &str, source: &Path) -> Result<PathBuf, StorageError> {
        if !fs::try_exists(source).await? {
            return Err(StorageError::NotFound(source.display().to_string()));
        }

        let dest = self.base_dir.join(unique_file_name(name));

        // Copy to a temp name first so a half-written file is never visible
        let temp = dest.with_extension("part");
        fs::copy(source, &temp).await?;
        if let Err(e) = fs::rename(&temp, &dest).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }

        debug!(dest = %dest.display(), "Resource stored");
        Ok(dest)
    }
}

/// In-memory resource store for tests
///
/// Records what was persisted and hands back synthetic locations under a
/// fixed base path. Can be told to fail every call.
pub struct MemoryResourceStore {
    base_dir: PathBuf,
    persisted: Mutex<Vec<(String, PathBuf)>>,
    failure: Mutex<Option<String>>,
}

impl MemoryResourceStore {
    /// Create a store that reports locations under `base_dir`
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            persisted: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
        }
    }

    /// Make every subsequent persist fail with `reason`
    pub fn fail_with(&self, reason: impl Into<String>) {
        *self.failure.lock() = Some(reason.into());
    }

    /// Names and sources persisted so far
    pub fn persisted(&self) -> Vec<(String, PathBuf)> {
        self.persisted.lock().clone()
    }
}

impl Default for MemoryResourceStore {
    fn default() -> Self {
        Self::new("/confab/resources")
    }
}

#[async_trait]
impl ResourceStore for MemoryResourceStore {
    async fn persist(&self, name: &str, source: &Path) -> Result<PathBuf, StorageError> {
        if let Some(reason) = self.failure.lock().clone() {
            return Err(StorageError::Io(reason));
        }
        self.persisted
            .lock()
            .push((name.to_string(), source.to_path_buf()));
        Ok(self.base_dir.join(name))
    }
}

//! Storage abstraction - one contract, several backends
//!
//! Every backend emulates the same hierarchical filesystem:
//!
//! | Backend | Directories |
//! |---------|-------------|
//! | [`LocalStorage`] | native directory entries |
//! | [`MemoryStorage`] | nested maps, root always present |
//! | [`BlobStorage`] over [`MemoryBucket`] | inferred from key prefixes + marker objects |
//! | [`BlobStorage`] over [`GcsBucket`] | inferred from key prefixes + marker objects |
//! | [`BlobStorage`] over [`S3Bucket`] | inferred from key prefixes + marker objects |
//!
//! Backends implement the primitive operations; recursive `rm` and `cp` are
//! provided on top of them so every backend walks directories the same way.
//! None of this is atomic: concurrent writers on overlapping paths race.

mod blob;
mod gcs;
mod local;
mod memory;
pub mod path;
mod s3;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::error::{Result, WeirError};
use crate::settings::Settings;

pub use blob::{BlobStorage, Bucket, MemoryBucket};
pub use gcs::GcsBucket;
pub use local::LocalStorage;
pub use memory::MemoryStorage;
pub use path::{StoragePath, SEPARATOR};
pub use s3::S3Bucket;

/// Immediate children of a directory
///
/// Names are relative to the listed directory; directory names end with
/// the separator. Both lists are sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub files: Vec<String>,
    pub dirs: Vec<String>,
}

impl Listing {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.dirs.is_empty()
    }

    /// Child paths joined onto `parent`, files first
    pub fn paths(&self, parent: &str) -> Vec<String> {
        self.files
            .iter()
            .chain(self.dirs.iter())
            .map(|name| path::join(parent, name))
            .collect()
    }
}

/// The storage contract
///
/// Paths are relative to the backend's storage root.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Short backend identifier for logs
    fn backend(&self) -> &'static str;

    fn separator(&self) -> char {
        SEPARATOR
    }

    /// Where `path` lives as the backend sees it, storage root included
    fn abspath(&self, path: &str) -> Result<String>;

    /// Create or overwrite a file. Parent directories are created as needed.
    ///
    /// Fails with `PathConflict` when `path` ends with the separator or
    /// names a directory.
    async fn touch(&self, path: &str, content: &[u8]) -> Result<()>;

    /// Read a whole file
    async fn open(&self, path: &str) -> Result<Bytes>;

    /// Immediate children of a directory
    async fn ls(&self, path: &str) -> Result<Listing>;

    /// Create a directory; logs and does nothing if it already exists
    async fn mkdir(&self, path: &str, make_parents: bool) -> Result<()>;

    async fn isdir(&self, path: &str) -> Result<bool>;

    async fn isfile(&self, path: &str) -> Result<bool>;

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.isfile(path).await? || self.isdir(path).await?)
    }

    /// Delete one file. Building block for [`Storage::rm`].
    async fn remove_file(&self, path: &str) -> Result<()>;

    /// Delete one empty directory. The root is never removed.
    async fn remove_dir(&self, path: &str) -> Result<()>;

    /// Delete a file, or a directory with `recursive`
    async fn rm(&self, path: &str, recursive: bool) -> Result<()> {
        if self.isdir(path).await? {
            let listing = self.ls(path).await?;
            if !listing.is_empty() && !recursive {
                return Err(WeirError::conflict(
                    path,
                    "directory is not empty; set `recursive` to delete it",
                ));
            }
            for child in listing.paths(path) {
                self.rm(&child, true).await?;
            }
            debug!(backend = self.backend(), path, "removing directory");
            self.remove_dir(path).await
        } else if self.isfile(path).await? {
            debug!(backend = self.backend(), path, "removing file");
            self.remove_file(path).await
        } else {
            Err(WeirError::FileNotFound {
                path: path.to_string(),
            })
        }
    }

    /// Copy a file or a directory
    ///
    /// Directories are copied child by child, each child path remapped
    /// under `dest`. Nested directories require `recursive`.
    async fn cp(&self, src: &str, dest: &str, recursive: bool, overwrite: bool) -> Result<()> {
        if !self.exists(src).await? {
            return Err(WeirError::FileNotFound {
                path: src.to_string(),
            });
        }
        if !overwrite && self.exists(dest).await? {
            return Err(WeirError::conflict(
                dest,
                "destination exists; set `overwrite` to replace it",
            ));
        }

        if self.isfile(src).await? {
            let content = self.open(src).await?;
            return self.touch(dest, &content).await;
        }

        let listing = self.ls(src).await?;
        if !listing.dirs.is_empty() && !recursive {
            return Err(WeirError::conflict(
                src,
                "directory contains directories; set `recursive` to copy it",
            ));
        }
        if !self.isdir(dest).await? {
            self.mkdir(dest, true).await?;
        }
        for name in listing.files.iter().chain(listing.dirs.iter()) {
            self.cp(
                &path::join(src, name),
                &path::join(dest, name),
                recursive,
                overwrite,
            )
            .await?;
        }
        Ok(())
    }

    async fn touch_str(&self, path: &str, content: &str) -> Result<()> {
        self.touch(path, content.as_bytes()).await
    }

    async fn open_to_string(&self, path: &str) -> Result<String> {
        let content = self.open(path).await?;
        String::from_utf8(content.to_vec()).map_err(|e| WeirError::InvalidPath {
            path: path.to_string(),
            reason: format!("file is not valid UTF-8: {e}"),
        })
    }
}

impl fmt::Debug for dyn Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("backend", &self.backend())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════
// BACKEND FACTORY REGISTRY
// ═══════════════════════════════════════════════════════════════

/// Constructor for a storage backend
pub type BackendFactory = fn(&Settings) -> Result<Arc<dyn Storage>>;

/// Maps backend identifiers to constructors
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl BackendRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with `local`, `memory`, `memory-bucket`, `gcs` and `s3`
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.factories.insert("local".into(), |s| {
            Ok(Arc::new(LocalStorage::new(&s.storage_root)?) as Arc<dyn Storage>)
        });
        registry.factories.insert("memory".into(), |s| {
            Ok(Arc::new(MemoryStorage::new(&s.storage_root)?) as Arc<dyn Storage>)
        });
        registry.factories.insert("memory-bucket".into(), |s| {
            Ok(Arc::new(BlobStorage::new(MemoryBucket::new(), &s.storage_root)?) as Arc<dyn Storage>)
        });
        registry.factories.insert("gcs".into(), |s| {
            Ok(Arc::new(BlobStorage::new(GcsBucket::from_settings(s)?, &s.storage_root)?)
                as Arc<dyn Storage>)
        });
        registry.factories.insert("s3".into(), |s| {
            Ok(Arc::new(BlobStorage::new(S3Bucket::from_settings(s)?, &s.storage_root)?)
                as Arc<dyn Storage>)
        });
        registry
    }

    /// Add a backend; identifiers are unique
    pub fn register(&mut self, name: impl Into<String>, factory: BackendFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(WeirError::RegistryConflict {
                kind: "Storage backend",
                label: name,
            });
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Build the backend named by `settings.storage_backend`
    pub fn build(&self, settings: &Settings) -> Result<Arc<dyn Storage>> {
        let factory =
            self.factories
                .get(&settings.storage_backend)
                .ok_or_else(|| WeirError::UnknownBackend {
                    name: settings.storage_backend.clone(),
                })?;
        debug!(backend = %settings.storage_backend, root = %settings.storage_root, "building storage");
        factory(settings)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Build storage from settings with the built-in backends
pub fn from_settings(settings: &Settings) -> Result<Arc<dyn Storage>> {
    BackendRegistry::with_builtins().build(settings)
}

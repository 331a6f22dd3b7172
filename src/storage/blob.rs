//! Flat-namespace blob stores presented as a directory tree
//!
//! A bucket only knows keys. Directories are inferred:
//!
//! - a key `a/b/` with no content is a directory marker written by `mkdir`
//! - any key starting with `a/b/` makes `a/b` a directory
//!
//! A key that is both an object and a prefix (`a` and `a/x`) is reported as
//! a directory; reading it as a file fails with `PathConflict`. Writing a
//! file below an existing object is refused, so such keys only appear when
//! another writer shares the bucket.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tracing::warn;

use super::path::{split_segments, StoragePath};
use super::{Listing, Storage, SEPARATOR};
use crate::error::{Result, WeirError};

/// Key/value object store with prefix listing
#[async_trait]
pub trait Bucket: Send + Sync {
    /// Backend identifier reported by the storage built on this bucket
    fn backend(&self) -> &'static str;

    /// Bucket name, for logs
    fn name(&self) -> &str;

    /// URI scheme for object locations, such as `gs`
    fn scheme(&self) -> &'static str;

    async fn put(&self, key: &str, content: Bytes) -> Result<()>;

    /// Fetch an object; `None` when the key does not exist
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Delete an object; `FileNotFound` when the key does not exist
    async fn delete(&self, key: &str) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Keys starting with `prefix`, sorted, at most `limit` of them
    async fn list(&self, prefix: &str, limit: Option<usize>) -> Result<Vec<String>>;
}

// ═══════════════════════════════════════════════════════════════
// IN-PROCESS BUCKET
// ═══════════════════════════════════════════════════════════════

/// Bucket held in process memory
///
/// Clones share the same objects.
#[derive(Debug, Clone, Default)]
pub struct MemoryBucket {
    objects: Arc<DashMap<String, Bytes>>,
}

impl MemoryBucket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects, markers included
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl Bucket for MemoryBucket {
    fn backend(&self) -> &'static str {
        "memory-bucket"
    }

    fn name(&self) -> &str {
        "memory"
    }

    fn scheme(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, key: &str, content: Bytes) -> Result<()> {
        self.objects.insert(key.to_string(), content);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.objects.get(key).map(|entry| entry.value().clone()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| WeirError::FileNotFound {
                path: key.to_string(),
            })
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.contains_key(key))
    }

    async fn list(&self, prefix: &str, limit: Option<usize>) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .objects
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort_unstable();
        if let Some(limit) = limit {
            keys.truncate(limit);
        }
        Ok(keys)
    }
}

// ═══════════════════════════════════════════════════════════════
// TREE VIEW OVER A BUCKET
// ═══════════════════════════════════════════════════════════════

/// [`Storage`] over any [`Bucket`]
#[derive(Debug)]
pub struct BlobStorage<B> {
    bucket: B,
    root: Vec<String>,
}

impl<B: Bucket> BlobStorage<B> {
    /// Wrap `bucket`, keeping every key under the `root` prefix
    pub fn new(bucket: B, root: &str) -> Result<Self> {
        Ok(Self {
            bucket,
            root: split_segments(root)?,
        })
    }

    pub fn bucket(&self) -> &B {
        &self.bucket
    }

    fn key_of(&self, segments: &[String]) -> String {
        self.root
            .iter()
            .chain(segments.iter())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Object key for a file path
    fn key(&self, path: &StoragePath) -> String {
        self.key_of(path.segments())
    }

    /// Prefix shared by everything inside a directory; empty for an empty root
    fn dir_key(&self, path: &StoragePath) -> String {
        let key = self.key(path);
        if key.is_empty() {
            key
        } else {
            format!("{key}{SEPARATOR}")
        }
    }

    async fn is_dir_at(&self, path: &StoragePath) -> Result<bool> {
        if path.is_root() {
            return Ok(true);
        }
        let prefix = self.dir_key(path);
        if self.bucket.exists(&prefix).await? {
            return Ok(true);
        }
        Ok(!self.bucket.list(&prefix, Some(1)).await?.is_empty())
    }

    async fn is_file_at(&self, path: &StoragePath) -> Result<bool> {
        if path.is_dir_only() || !self.bucket.exists(&self.key(path)).await? {
            return Ok(false);
        }
        Ok(!self.is_dir_at(path).await?)
    }

    /// Refuse to create anything below an existing object
    async fn check_ancestors(&self, path: &StoragePath) -> Result<()> {
        for ancestor in path.ancestors() {
            let key = self.key_of(ancestor);
            if self.bucket.exists(&key).await? {
                return Err(WeirError::conflict(
                    path.raw(),
                    format!("'{key}' is a file"),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<B: Bucket> Storage for BlobStorage<B> {
    fn backend(&self) -> &'static str {
        self.bucket.backend()
    }

    fn abspath(&self, path: &str) -> Result<String> {
        let parsed = StoragePath::parse(path)?;
        Ok(format!(
            "{}://{}/{}",
            self.bucket.scheme(),
            self.bucket.name(),
            self.key(&parsed)
        ))
    }

    async fn touch(&self, path: &str, content: &[u8]) -> Result<()> {
        let parsed = StoragePath::parse(path)?;
        if parsed.is_dir_only() {
            return Err(WeirError::conflict(path, "file name cannot end with the separator"));
        }
        if self.is_dir_at(&parsed).await? {
            return Err(WeirError::conflict(path, "a directory exists at this path"));
        }
        self.check_ancestors(&parsed).await?;
        self.bucket
            .put(&self.key(&parsed), Bytes::copy_from_slice(content))
            .await
    }

    async fn open(&self, path: &str) -> Result<Bytes> {
        let parsed = StoragePath::parse(path)?;
        let not_found = || WeirError::FileNotFound {
            path: path.to_string(),
        };
        if parsed.is_dir_only() {
            return Err(not_found());
        }
        let content = self.bucket.get(&self.key(&parsed)).await?.ok_or_else(not_found)?;
        if self.is_dir_at(&parsed).await? {
            return Err(WeirError::conflict(
                path,
                "key is both an object and a directory prefix",
            ));
        }
        Ok(content)
    }

    async fn ls(&self, path: &str) -> Result<Listing> {
        let parsed = StoragePath::parse(path)?;
        if !self.is_dir_at(&parsed).await? {
            if self.is_file_at(&parsed).await? {
                return Err(WeirError::conflict(path, "not a directory"));
            }
            return Err(WeirError::FileNotFound {
                path: path.to_string(),
            });
        }

        let prefix = self.dir_key(&parsed);
        let mut files = Vec::new();
        let mut dirs = BTreeSet::new();
        for key in self.bucket.list(&prefix, None).await? {
            let rest = &key[prefix.len()..];
            match rest.split_once(SEPARATOR) {
                _ if rest.is_empty() => {}
                Some((dir, _)) => {
                    dirs.insert(format!("{dir}{SEPARATOR}"));
                }
                None => files.push(rest.to_string()),
            }
        }
        files.sort();
        Ok(Listing {
            files,
            dirs: dirs.into_iter().collect(),
        })
    }

    async fn mkdir(&self, path: &str, make_parents: bool) -> Result<()> {
        let parsed = StoragePath::parse(path)?;
        if self.is_dir_at(&parsed).await? {
            warn!(path, "directory already exists");
            return Ok(());
        }
        if self.bucket.exists(&self.key(&parsed)).await? {
            return Err(WeirError::conflict(path, "a file exists at this path"));
        }
        self.check_ancestors(&parsed).await?;
        if !make_parents {
            let parent = parsed.parent();
            if !self.is_dir_at(&parent).await? {
                return Err(WeirError::FileNotFound {
                    path: parent.raw().to_string(),
                });
            }
        }
        // One marker is enough: every ancestor is implied by the prefix.
        self.bucket.put(&self.dir_key(&parsed), Bytes::new()).await
    }

    async fn isdir(&self, path: &str) -> Result<bool> {
        let parsed = StoragePath::parse(path)?;
        self.is_dir_at(&parsed).await
    }

    async fn isfile(&self, path: &str) -> Result<bool> {
        let parsed = StoragePath::parse(path)?;
        self.is_file_at(&parsed).await
    }

    async fn remove_file(&self, path: &str) -> Result<()> {
        let parsed = StoragePath::parse(path)?;
        self.bucket.delete(&self.key(&parsed)).await.map_err(|e| match e {
            WeirError::FileNotFound { .. } => WeirError::FileNotFound {
                path: path.to_string(),
            },
            other => other,
        })
    }

    /// Removes the marker. A directory that only existed through its
    /// children's keys disappears with them, so there is nothing left to do.
    async fn remove_dir(&self, path: &str) -> Result<()> {
        let parsed = StoragePath::parse(path)?;
        if parsed.is_root() {
            return Ok(());
        }
        let marker = self.dir_key(&parsed);
        let has_children = self
            .bucket
            .list(&marker, Some(2))
            .await?
            .iter()
            .any(|key| key != &marker);
        if has_children {
            return Err(WeirError::conflict(path, "directory is not empty"));
        }
        if self.bucket.exists(&marker).await? {
            self.bucket.delete(&marker).await?;
        }
        Ok(())
    }
}

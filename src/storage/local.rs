//! Local filesystem backend - directories are native entries

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tracing::warn;

use super::path::StoragePath;
use super::{Listing, Storage};
use crate::error::{Result, WeirError};

#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Open a storage rooted at `root`, creating the directory if needed
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|e| WeirError::io(root.display().to_string(), e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &StoragePath) -> PathBuf {
        path.segments()
            .iter()
            .fold(self.root.clone(), |acc, segment| acc.join(segment))
    }

    async fn metadata(&self, path: &StoragePath) -> Option<std::fs::Metadata> {
        fs::metadata(self.resolve(path)).await.ok()
    }

    async fn is_dir_at(&self, path: &StoragePath) -> bool {
        self.metadata(path).await.is_some_and(|m| m.is_dir())
    }

    async fn is_file_at(&self, path: &StoragePath) -> bool {
        !path.is_dir_only() && self.metadata(path).await.is_some_and(|m| m.is_file())
    }

    /// Refuse to create anything below an existing file
    async fn check_ancestors(&self, path: &StoragePath) -> Result<()> {
        let mut current = self.root.clone();
        for segment in path.ancestors().last().unwrap_or(&[]) {
            current.push(segment);
            if fs::metadata(&current).await.is_ok_and(|m| m.is_file()) {
                return Err(WeirError::conflict(
                    path.raw(),
                    format!("'{}' is a file", current.display()),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for LocalStorage {
    fn backend(&self) -> &'static str {
        "local"
    }

    fn abspath(&self, path: &str) -> Result<String> {
        let parsed = StoragePath::parse(path)?;
        Ok(self.resolve(&parsed).display().to_string())
    }

    async fn touch(&self, path: &str, content: &[u8]) -> Result<()> {
        let parsed = StoragePath::parse(path)?;
        if parsed.is_dir_only() {
            return Err(WeirError::conflict(path, "file name cannot end with the separator"));
        }
        if self.is_dir_at(&parsed).await {
            return Err(WeirError::conflict(path, "a directory exists at this path"));
        }
        self.check_ancestors(&parsed).await?;

        let target = self.resolve(&parsed);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| WeirError::io(path, e))?;
        }
        fs::write(&target, content)
            .await
            .map_err(|e| WeirError::io(path, e))
    }

    async fn open(&self, path: &str) -> Result<Bytes> {
        let parsed = StoragePath::parse(path)?;
        if !self.is_file_at(&parsed).await {
            return Err(WeirError::FileNotFound {
                path: path.to_string(),
            });
        }
        fs::read(self.resolve(&parsed))
            .await
            .map(Bytes::from)
            .map_err(|e| WeirError::io(path, e))
    }

    async fn ls(&self, path: &str) -> Result<Listing> {
        let parsed = StoragePath::parse(path)?;
        if !self.is_dir_at(&parsed).await {
            if self.is_file_at(&parsed).await {
                return Err(WeirError::conflict(path, "not a directory"));
            }
            return Err(WeirError::FileNotFound {
                path: path.to_string(),
            });
        }

        let mut listing = Listing::default();
        let mut entries = fs::read_dir(self.resolve(&parsed))
            .await
            .map_err(|e| WeirError::io(path, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| WeirError::io(path, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let meta = fs::metadata(entry.path())
                .await
                .map_err(|e| WeirError::io(path, e))?;
            if meta.is_dir() {
                listing.dirs.push(format!("{}{}", name, self.separator()));
            } else {
                listing.files.push(name);
            }
        }
        listing.files.sort();
        listing.dirs.sort();
        Ok(listing)
    }

    async fn mkdir(&self, path: &str, make_parents: bool) -> Result<()> {
        let parsed = StoragePath::parse(path)?;
        if self.is_dir_at(&parsed).await {
            warn!(path, "directory already exists");
            return Ok(());
        }
        if self.metadata(&parsed).await.is_some() {
            return Err(WeirError::conflict(path, "a file exists at this path"));
        }

        let target = self.resolve(&parsed);
        let created = if make_parents {
            self.check_ancestors(&parsed).await?;
            fs::create_dir_all(&target).await
        } else {
            let parent = parsed.parent();
            if !self.is_dir_at(&parent).await {
                return Err(WeirError::FileNotFound {
                    path: parent.raw().to_string(),
                });
            }
            fs::create_dir(&target).await
        };
        created.map_err(|e| WeirError::io(path, e))
    }

    async fn isdir(&self, path: &str) -> Result<bool> {
        let parsed = StoragePath::parse(path)?;
        Ok(self.is_dir_at(&parsed).await)
    }

    async fn isfile(&self, path: &str) -> Result<bool> {
        let parsed = StoragePath::parse(path)?;
        Ok(self.is_file_at(&parsed).await)
    }

    async fn remove_file(&self, path: &str) -> Result<()> {
        let parsed = StoragePath::parse(path)?;
        fs::remove_file(self.resolve(&parsed))
            .await
            .map_err(|e| WeirError::io(path, e))
    }

    async fn remove_dir(&self, path: &str) -> Result<()> {
        let parsed = StoragePath::parse(path)?;
        if parsed.is_root() {
            return Ok(());
        }
        fs::remove_dir(self.resolve(&parsed))
            .await
            .map_err(|e| WeirError::io(path, e))
    }
}

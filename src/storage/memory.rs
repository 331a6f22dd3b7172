//! In-memory tree backend
//!
//! The store is a nested map from path segment to either a nested map
//! (directory) or file content. The root map always exists; the storage
//! root prefix is materialized as directories on construction.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tracing::warn;

use super::path::{split_segments, StoragePath};
use super::{Listing, Storage, SEPARATOR};
use crate::error::{Result, WeirError};

#[derive(Debug, Clone)]
enum Node {
    Dir(BTreeMap<String, Node>),
    File(Bytes),
}

#[derive(Clone, Copy)]
enum NodeRef<'a> {
    Dir(&'a BTreeMap<String, Node>),
    File(&'a Bytes),
}

#[derive(Debug)]
pub struct MemoryStorage {
    root: Vec<String>,
    tree: RwLock<BTreeMap<String, Node>>,
}

impl MemoryStorage {
    pub fn new(root: &str) -> Result<Self> {
        let raw = root;
        let root = split_segments(raw)?;
        let mut tree = BTreeMap::new();
        descend_creating(&mut tree, &root, raw)?;
        Ok(Self {
            root,
            tree: RwLock::new(tree),
        })
    }

    fn absolute(&self, path: &StoragePath) -> Vec<String> {
        self.root
            .iter()
            .chain(path.segments().iter())
            .cloned()
            .collect()
    }

    /// Run `f` on the node at `path` under a read lock
    fn with_node<T>(&self, path: &StoragePath, f: impl FnOnce(Option<NodeRef<'_>>) -> T) -> T {
        let tree = self.tree.read();
        let segments = self.absolute(path);
        let mut current = NodeRef::Dir(&*tree);
        for segment in &segments {
            let NodeRef::Dir(children) = current else {
                return f(None);
            };
            current = match children.get(segment) {
                Some(Node::Dir(grandchildren)) => NodeRef::Dir(grandchildren),
                Some(Node::File(content)) => NodeRef::File(content),
                None => return f(None),
            };
        }
        f(Some(current))
    }

    fn is_dir_at(&self, path: &StoragePath) -> bool {
        self.with_node(path, |node| matches!(node, Some(NodeRef::Dir(_))))
    }

    fn is_file_at(&self, path: &StoragePath) -> bool {
        !path.is_dir_only() && self.with_node(path, |node| matches!(node, Some(NodeRef::File(_))))
    }
}

/// Walk to the directory map at `segments`, creating directories on the way
fn descend_creating<'a>(
    mut level: &'a mut BTreeMap<String, Node>,
    segments: &[String],
    raw: &str,
) -> Result<&'a mut BTreeMap<String, Node>> {
    for segment in segments {
        let node = level
            .entry(segment.clone())
            .or_insert_with(|| Node::Dir(BTreeMap::new()));
        level = match node {
            Node::Dir(children) => children,
            Node::File(_) => {
                return Err(WeirError::conflict(raw, format!("'{segment}' is a file")));
            }
        };
    }
    Ok(level)
}

/// Walk to an existing directory map at `segments`
fn descend<'a>(
    mut level: &'a mut BTreeMap<String, Node>,
    segments: &[String],
) -> Option<&'a mut BTreeMap<String, Node>> {
    for segment in segments {
        level = match level.get_mut(segment)? {
            Node::Dir(children) => children,
            Node::File(_) => return None,
        };
    }
    Some(level)
}

#[async_trait]
impl Storage for MemoryStorage {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn abspath(&self, path: &str) -> Result<String> {
        let parsed = StoragePath::parse(path)?;
        Ok(format!("{SEPARATOR}{}", self.absolute(&parsed).join("/")))
    }

    async fn touch(&self, path: &str, content: &[u8]) -> Result<()> {
        let parsed = StoragePath::parse(path)?;
        if parsed.is_dir_only() {
            return Err(WeirError::conflict(path, "file name cannot end with the separator"));
        }
        let segments = self.absolute(&parsed);
        let (name, parents) = segments
            .split_last()
            .ok_or_else(|| WeirError::conflict(path, "empty file name"))?;

        let mut tree = self.tree.write();
        let dir = descend_creating(&mut tree, parents, path)?;
        if let Some(Node::Dir(_)) = dir.get(name) {
            return Err(WeirError::conflict(path, "a directory exists at this path"));
        }
        dir.insert(name.clone(), Node::File(Bytes::copy_from_slice(content)));
        Ok(())
    }

    async fn open(&self, path: &str) -> Result<Bytes> {
        let parsed = StoragePath::parse(path)?;
        let not_found = || WeirError::FileNotFound {
            path: path.to_string(),
        };
        if parsed.is_dir_only() {
            return Err(not_found());
        }
        self.with_node(&parsed, |node| match node {
            Some(NodeRef::File(content)) => Ok(content.clone()),
            _ => Err(not_found()),
        })
    }

    async fn ls(&self, path: &str) -> Result<Listing> {
        let parsed = StoragePath::parse(path)?;
        self.with_node(&parsed, |node| match node {
            Some(NodeRef::Dir(children)) => {
                let mut listing = Listing::default();
                for (name, child) in children {
                    match child {
                        Node::Dir(_) => listing.dirs.push(format!("{name}{SEPARATOR}")),
                        Node::File(_) => listing.files.push(name.clone()),
                    }
                }
                Ok(listing)
            }
            Some(NodeRef::File(_)) if !parsed.is_dir_only() => {
                Err(WeirError::conflict(path, "not a directory"))
            }
            _ => Err(WeirError::FileNotFound {
                path: path.to_string(),
            }),
        })
    }

    async fn mkdir(&self, path: &str, make_parents: bool) -> Result<()> {
        let parsed = StoragePath::parse(path)?;
        if self.is_dir_at(&parsed) {
            warn!(path, "directory already exists");
            return Ok(());
        }
        let segments = self.absolute(&parsed);
        let Some((name, parents)) = segments.split_last() else {
            return Ok(());
        };

        let mut tree = self.tree.write();
        let dir = if make_parents {
            descend_creating(&mut tree, parents, path)?
        } else {
            descend(&mut tree, parents).ok_or_else(|| WeirError::FileNotFound {
                path: parsed.parent().raw().to_string(),
            })?
        };
        if dir.contains_key(name) {
            return Err(WeirError::conflict(path, "a file exists at this path"));
        }
        dir.insert(name.clone(), Node::Dir(BTreeMap::new()));
        Ok(())
    }

    async fn isdir(&self, path: &str) -> Result<bool> {
        let parsed = StoragePath::parse(path)?;
        Ok(self.is_dir_at(&parsed))
    }

    async fn isfile(&self, path: &str) -> Result<bool> {
        let parsed = StoragePath::parse(path)?;
        Ok(self.is_file_at(&parsed))
    }

    async fn remove_file(&self, path: &str) -> Result<()> {
        let parsed = StoragePath::parse(path)?;
        let segments = self.absolute(&parsed);
        let mut tree = self.tree.write();
        if let Some((name, parents)) = segments.split_last() {
            if let Some(dir) = descend(&mut tree, parents) {
                if let Some(Node::File(_)) = dir.get(name) {
                    dir.remove(name);
                    return Ok(());
                }
            }
        }
        Err(WeirError::FileNotFound {
            path: path.to_string(),
        })
    }

    async fn remove_dir(&self, path: &str) -> Result<()> {
        let parsed = StoragePath::parse(path)?;
        if parsed.is_root() {
            return Ok(());
        }
        let segments = self.absolute(&parsed);
        let mut tree = self.tree.write();
        if let Some((name, parents)) = segments.split_last() {
            if let Some(dir) = descend(&mut tree, parents) {
                match dir.get(name) {
                    Some(Node::Dir(children)) if children.is_empty() => {
                        dir.remove(name);
                        return Ok(());
                    }
                    Some(Node::Dir(_)) => {
                        return Err(WeirError::conflict(path, "directory is not empty"));
                    }
                    _ => {}
                }
            }
        }
        Err(WeirError::FileNotFound {
            path: path.to_string(),
        })
    }
}

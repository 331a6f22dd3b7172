//! Context construction and persistence
//!
//! Build order for a fresh run:
//!
//! 1. base document (`context_path` from settings, or empty)
//! 2. storage patches, in order; a missing patch is logged and skipped
//! 3. local patches (inline mappings or local files), in order
//! 4. run identity under the reserved namespace, last
//!
//! Patches never write into the reserved namespace: such keys are dropped
//! with a warning before merging.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use tracing::{debug, info, instrument, warn};

use super::{Context, RunIdentity, CONTEXT_FILE, RESERVED_NAMESPACE};
use crate::error::{Result, WeirError};
use crate::settings::Settings;
use crate::storage::{path, Storage};
use crate::util::{merge, LazyHolder};

/// A patch read from the local filesystem or given inline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LocalPatch {
    Path(PathBuf),
    Inline(Mapping),
}

impl From<Mapping> for LocalPatch {
    fn from(mapping: Mapping) -> Self {
        Self::Inline(mapping)
    }
}

impl From<PathBuf> for LocalPatch {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

/// Owns the current context of this process
pub struct ContextManager {
    settings: Arc<Settings>,
    storage: Arc<dyn Storage>,
    current: LazyHolder<Context>,
}

impl ContextManager {
    /// The current context starts unbuilt; first access builds the default
    /// one (base document plus a fresh run identity).
    pub fn new(settings: Arc<Settings>, storage: Arc<dyn Storage>) -> Self {
        let defaults = Arc::clone(&settings);
        let current = LazyHolder::new(move || {
            let identity = RunIdentity::generate(&defaults.runs_prefix);
            seal(load_base_blocking(&defaults)?, &identity)
        });
        Self {
            settings,
            storage,
            current,
        }
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// The current context, building the default one on first access
    pub fn current(&self) -> Result<Arc<Context>> {
        self.current.get()
    }

    /// The current context, building the default one without blocking the runtime
    pub async fn ensure(&self) -> Result<Arc<Context>> {
        if let Some(context) = self.current.peek() {
            return Ok(context);
        }
        let identity = RunIdentity::generate(&self.settings.runs_prefix);
        let context = seal(load_base(&self.settings).await?, &identity)?;
        debug!(run_id = %identity.run_id, "Built default context");
        Ok(self.current.set(context))
    }

    /// The current context only if one was built
    pub fn peek(&self) -> Option<Arc<Context>> {
        self.current.peek()
    }

    /// Forget the current context; the next access builds a fresh one
    pub fn reset(&self) {
        self.current.reset();
    }

    /// Build a context for a new run and make it current
    #[instrument(skip_all, fields(patches = patches.len(), local_patches = local_patches.len()))]
    pub async fn create(
        &self,
        patches: &[String],
        local_patches: &[LocalPatch],
    ) -> Result<Arc<Context>> {
        let base = load_base(&self.settings).await?;
        let tree = self.apply_patches(base, patches, local_patches).await?;
        let identity = RunIdentity::generate(&self.settings.runs_prefix);
        let context = seal(tree, &identity)?;
        info!(run_id = %identity.run_id, run_folder = %identity.run_folder, "Created context");
        Ok(self.current.set(context))
    }

    /// Rebuild the context persisted in `run_folder`, patch it, keep its identity
    #[instrument(skip(self, patches, local_patches))]
    pub async fn load(
        &self,
        run_folder: &str,
        patches: &[String],
        local_patches: &[LocalPatch],
    ) -> Result<Arc<Context>> {
        let location = path::join(run_folder, CONTEXT_FILE);
        let persisted = Context::from_yaml(&self.storage.open_to_string(&location).await?)?;
        let identity = RunIdentity::of(&persisted).ok_or_else(|| WeirError::ContextValue {
            key: format!("{RESERVED_NAMESPACE}.run_id"),
            reason: format!("'{location}' carries no run identity"),
        })?;

        let tree = self
            .apply_patches(persisted.as_value().clone(), patches, local_patches)
            .await?;
        let context = seal(tree, &identity)?;
        info!(run_id = %identity.run_id, "Loaded context from {}", location);
        Ok(self.current.set(context))
    }

    /// Write `context` to `{run_folder}/context.yaml`, returning that path
    pub async fn persist(&self, context: &Context) -> Result<String> {
        let folder = context.run_folder().ok_or_else(|| WeirError::ContextValue {
            key: format!("{RESERVED_NAMESPACE}.run_folder"),
            reason: "context has no run folder".to_string(),
        })?;
        let location = path::join(folder, CONTEXT_FILE);
        self.storage.touch_str(&location, &context.to_yaml()?).await?;
        debug!(path = %location, "Persisted context");
        Ok(location)
    }

    async fn apply_patches(
        &self,
        mut tree: Value,
        patches: &[String],
        local_patches: &[LocalPatch],
    ) -> Result<Value> {
        for patch in patches {
            match self.storage.open_to_string(patch).await {
                Ok(text) => tree = apply(&tree, parse_patch(&text, patch)?, patch)?,
                Err(e) if e.is_not_found() => {
                    warn!(patch = %patch, "Patch file not found in storage, skipping");
                }
                Err(e) => return Err(e),
            }
        }

        for local in local_patches {
            match local {
                LocalPatch::Inline(mapping) => {
                    tree = apply(&tree, Value::Mapping(mapping.clone()), "<inline>")?;
                }
                LocalPatch::Path(file) => {
                    let name = file.display().to_string();
                    match tokio::fs::read_to_string(file).await {
                        Ok(text) => tree = apply(&tree, parse_patch(&text, &name)?, &name)?,
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {
                            warn!(patch = %name, "Local patch file not found, skipping");
                        }
                        Err(e) => return Err(WeirError::io(name, e)),
                    }
                }
            }
        }

        Ok(tree)
    }
}

impl std::fmt::Debug for ContextManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextManager")
            .field("storage", &self.storage.backend())
            .field("current", &self.current)
            .finish()
    }
}

async fn load_base(settings: &Settings) -> Result<Value> {
    let Some(file) = &settings.context_path else {
        return Ok(Value::Mapping(Mapping::new()));
    };
    let text = tokio::fs::read_to_string(file).await;
    parse_base(file, text)
}

/// Synchronous read for the lazy default, which has no runtime to await on
fn load_base_blocking(settings: &Settings) -> Result<Value> {
    let Some(file) = &settings.context_path else {
        return Ok(Value::Mapping(Mapping::new()));
    };
    parse_base(file, std::fs::read_to_string(file))
}

fn parse_base(file: &Path, text: io::Result<String>) -> Result<Value> {
    let text = text.map_err(|e| WeirError::Settings {
        reason: format!("Failed to read base context '{}': {}", file.display(), e),
    })?;
    parse_patch(&text, &file.display().to_string())
}

fn parse_patch(text: &str, name: &str) -> Result<Value> {
    match serde_yaml::from_str(text)? {
        Value::Null => Ok(Value::Mapping(Mapping::new())),
        value @ Value::Mapping(_) => Ok(value),
        _ => Err(WeirError::InvalidPatch {
            source_name: name.to_string(),
            reason: "document root must be a mapping".to_string(),
        }),
    }
}

fn apply(tree: &Value, mut patch: Value, name: &str) -> Result<Value> {
    if let Value::Mapping(mapping) = &mut patch {
        if mapping.remove(RESERVED_NAMESPACE).is_some() {
            warn!(patch = %name, "Ignoring '{}' keys: run identity is reserved", RESERVED_NAMESPACE);
        }
    }
    debug!(patch = %name, "Applying patch");
    merge(tree, &patch)
}

/// Replace whatever sits in the reserved namespace with `identity`
fn seal(mut tree: Value, identity: &RunIdentity) -> Result<Context> {
    if let Value::Mapping(mapping) = &mut tree {
        mapping.remove(RESERVED_NAMESPACE);
    }
    Context::new(merge(&tree, &identity.to_patch())?)
}

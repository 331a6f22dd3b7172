//! Run context - the read-only configuration tree a run executes against
//!
//! A [`Context`] is built once by [`ContextManager`] from a base document,
//! ordered patches and the run identity, then shared behind an `Arc`. It
//! only ever hands out shared borrows, so no code can write into it at any
//! depth:
//!
//! ```compile_fail
//! # use weir::Context;
//! let context = Context::default();
//! context.as_value()["models"] = serde_yaml::Value::Null;
//! ```
//!
//! ```compile_fail
//! # use weir::Context;
//! let context = Context::default();
//! *context.get("models.forecast.horizon").unwrap() = serde_yaml::Value::Null;
//! ```
//!
//! Changing parameters means building a new context with
//! [`Context::derive`].

mod manager;
mod run;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use serde_yaml::{Mapping, Value};

use crate::error::{Result, WeirError};
use crate::util::{keypath, merge};

pub use manager::{ContextManager, LocalPatch};
pub use run::RunIdentity;

/// Top-level key holding run identity. Patches never write here.
pub const RESERVED_NAMESPACE: &str = "weir";

/// File name of the persisted context inside a run folder
pub const CONTEXT_FILE: &str = "context.yaml";

#[derive(Debug, Clone, PartialEq)]
pub struct Context {
    tree: Arc<Value>,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            tree: Arc::new(Value::Mapping(Mapping::new())),
        }
    }
}

impl Context {
    /// Wrap a tree; the root must be a mapping (null counts as empty)
    pub fn new(tree: Value) -> Result<Self> {
        let tree = match tree {
            Value::Null => Value::Mapping(Mapping::new()),
            Value::Mapping(_) => tree,
            other => {
                return Err(WeirError::InvalidPatch {
                    source_name: "context".to_string(),
                    reason: format!("expected a mapping, found {}", merge::kind_of(&other)),
                })
            }
        };
        Ok(Self {
            tree: Arc::new(tree),
        })
    }

    /// Parse a YAML document
    pub fn from_yaml(text: &str) -> Result<Self> {
        Self::new(serde_yaml::from_str(text)?)
    }

    pub fn as_value(&self) -> &Value {
        &self.tree
    }

    /// Look up a dotted key path such as `models.forecast.horizon`.
    /// Sequence items are addressed as `items[0]` or `items.0`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        keypath::resolve(&self.tree, path).ok().flatten()
    }

    /// Typed lookup; `Ok(None)` when the key is absent
    pub fn get_as<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let Some(value) = keypath::resolve(&self.tree, path)? else {
            return Ok(None);
        };
        serde_yaml::from_value(value.clone())
            .map(Some)
            .map_err(|e| WeirError::ContextValue {
                key: path.to_string(),
                reason: e.to_string(),
            })
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn run_id(&self) -> Option<&str> {
        self.reserved("run_id")
    }

    /// Storage-root-relative folder owned by this run
    pub fn run_folder(&self) -> Option<&str> {
        self.reserved("run_folder")
    }

    fn reserved(&self, key: &str) -> Option<&str> {
        self.tree
            .get(RESERVED_NAMESPACE)
            .and_then(|ns| ns.get(key))
            .and_then(Value::as_str)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&*self.tree)?)
    }

    /// Build a new context with `patch` merged on top
    ///
    /// The run identity is carried over; a patch touching the reserved
    /// namespace fails with `ReadOnly`.
    pub fn derive(&self, patch: &Value) -> Result<Context> {
        if patch.get(RESERVED_NAMESPACE).is_some() {
            return Err(WeirError::ReadOnly {
                key: RESERVED_NAMESPACE.to_string(),
            });
        }
        Self::new(merge(&self.tree, patch)?)
    }
}

impl Serialize for Context {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.tree.serialize(serializer)
    }
}

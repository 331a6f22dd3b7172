//! Run parameters and results
//!
//! The same [`RunRequest`] drives a direct [`Engine::run`](super::Engine::run)
//! call and a queued job, so it serializes cleanly.

use serde::{Deserialize, Serialize};

use crate::context::LocalPatch;
use crate::error::{Result, WeirError};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    /// DAG label
    pub label: String,

    /// Run folder of a prior run to re-execute against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<String>,

    /// Storage paths of patch documents, applied in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patch: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub local_patch: Vec<LocalPatch>,

    /// Run the DAG's task list from this task on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_task: Option<String>,

    /// Run only this task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
}

impl RunRequest {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    pub fn retry(mut self, run_folder: impl Into<String>) -> Self {
        self.retry = Some(run_folder.into());
        self
    }

    pub fn patch(mut self, path: impl Into<String>) -> Self {
        self.patch.push(path.into());
        self
    }

    pub fn local_patch(mut self, patch: impl Into<LocalPatch>) -> Self {
        self.local_patch.push(patch.into());
        self
    }

    pub fn from_task(mut self, label: impl Into<String>) -> Self {
        self.from_task = Some(label.into());
        self
    }

    pub fn task(mut self, label: impl Into<String>) -> Self {
        self.task = Some(label.into());
        self
    }

    pub fn has_patches(&self) -> bool {
        !self.patch.is_empty() || !self.local_patch.is_empty()
    }

    /// `task` and `from_task` are mutually exclusive
    pub fn validate(&self) -> Result<()> {
        if let (Some(task), Some(from_task)) = (&self.task, &self.from_task) {
            return Err(WeirError::ArgumentConflict {
                reason: format!(
                    "only one of `task` ('{}') or `from_task` ('{}') can be set",
                    task, from_task
                ),
            });
        }
        Ok(())
    }
}

/// What a completed run did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub dag: String,
    pub run_id: String,
    pub run_folder: String,
    /// Executed task labels, in order
    pub tasks: Vec<String>,
    pub duration_ms: u64,
}

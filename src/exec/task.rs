//! Task - one labeled unit of work

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Context;
use crate::settings::Settings;
use crate::storage::Storage;

/// A unit of work. Effects are observed through storage, not return values.
///
/// Errors are reported to the caller of the run unchanged.
#[async_trait]
pub trait Task: Send + Sync {
    async fn run(&self, cx: &TaskContext) -> anyhow::Result<()>;
}

/// Builds a fresh task instance for each execution
pub type TaskFactory = Arc<dyn Fn() -> Box<dyn Task> + Send + Sync>;

/// What a running task can see
#[derive(Debug, Clone)]
pub struct TaskContext {
    label: Arc<str>,
    context: Arc<Context>,
    storage: Arc<dyn Storage>,
    settings: Arc<Settings>,
}

impl TaskContext {
    pub(crate) fn new(
        label: Arc<str>,
        context: Arc<Context>,
        storage: Arc<dyn Storage>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            label,
            context,
            storage,
            settings,
        }
    }

    /// Label the task was registered under
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run folder of the current run, empty if the context has none
    pub fn run_folder(&self) -> &str {
        self.context.run_folder().unwrap_or_default()
    }
}

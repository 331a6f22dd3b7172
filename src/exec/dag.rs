//! DAG - a labeled, ordered list of task labels

use crate::context::Context;

pub trait Dag: Send + Sync {
    fn label(&self) -> &str;

    /// Declared task labels, in execution order
    fn tasks(&self) -> Vec<String>;

    /// Final ordering for a run. Override to include or drop tasks based
    /// on the context; the default is the declared list unchanged.
    fn ordered_tasks(&self, context: &Context) -> Vec<String> {
        let _ = context;
        self.tasks()
    }
}

/// A DAG whose task list is fixed at construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticDag {
    label: String,
    tasks: Vec<String>,
}

impl StaticDag {
    pub fn new<I, S>(label: impl Into<String>, tasks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            label: label.into(),
            tasks: tasks.into_iter().map(Into::into).collect(),
        }
    }
}

impl Dag for StaticDag {
    fn label(&self) -> &str {
        &self.label
    }

    fn tasks(&self) -> Vec<String> {
        self.tasks.clone()
    }
}

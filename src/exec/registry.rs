//! Task and DAG registries
//!
//! Populated explicitly during bootstrap, before the engine is built.
//! Labels are unique per registry: a second registration under the same
//! label fails immediately.

use std::collections::HashMap;
use std::sync::Arc;

use super::dag::Dag;
use super::task::{Task, TaskFactory};
use crate::error::{Result, WeirError};

#[derive(Default)]
pub struct Registry {
    tasks: HashMap<String, TaskFactory>,
    dags: HashMap<String, Arc<dyn Dag>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task constructor under `label`
    pub fn register_task<T, F>(&mut self, label: impl Into<String>, factory: F) -> Result<()>
    where
        T: Task + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let label = label.into();
        if self.tasks.contains_key(&label) {
            return Err(WeirError::RegistryConflict { kind: "Task", label });
        }
        let factory: TaskFactory = Arc::new(move || Box::new(factory()) as Box<dyn Task>);
        self.tasks.insert(label, factory);
        Ok(())
    }

    /// Register a task type built with `Default`
    pub fn register_default_task<T>(&mut self, label: impl Into<String>) -> Result<()>
    where
        T: Task + Default + 'static,
    {
        self.register_task(label, T::default)
    }

    /// Register a DAG under its own label
    pub fn register_dag(&mut self, dag: impl Dag + 'static) -> Result<()> {
        let label = dag.label().to_string();
        if self.dags.contains_key(&label) {
            return Err(WeirError::RegistryConflict { kind: "DAG", label });
        }
        self.dags.insert(label, Arc::new(dag));
        Ok(())
    }

    pub fn task(&self, label: &str) -> Result<&TaskFactory> {
        self.tasks.get(label).ok_or_else(|| WeirError::TaskNotFound {
            label: label.to_string(),
        })
    }

    pub fn dag(&self, label: &str) -> Result<Arc<dyn Dag>> {
        self.dags
            .get(label)
            .cloned()
            .ok_or_else(|| WeirError::DagNotFound {
                label: label.to_string(),
            })
    }

    pub fn task_labels(&self) -> Vec<&str> {
        let mut labels: Vec<_> = self.tasks.keys().map(String::as_str).collect();
        labels.sort_unstable();
        labels
    }

    pub fn dag_labels(&self) -> Vec<&str> {
        let mut labels: Vec<_> = self.dags.keys().map(String::as_str).collect();
        labels.sort_unstable();
        labels
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("tasks", &self.task_labels())
            .field("dags", &self.dag_labels())
            .finish()
    }
}

//! Sequential execution engine
//!
//! One [`Engine::run`] call is one run:
//!
//! 1. resolve the DAG by label
//! 2. reject `task` together with `from_task`
//! 3. pick the context: retry (load a prior run), patches (create), or current
//! 4. order tasks through the DAG hook
//! 5. `task` collapses the list to that one task
//! 6. `from_task` keeps the suffix starting at that task
//! 7. run each task in order; the first failure ends the run, unchanged
//!
//! Tasks run one at a time. There is no retry, timeout or cancellation.
//!
//! Each run records into its own [`EventLog`]; [`Engine::events`] returns
//! the log of the latest run.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{error, info, instrument};

use super::registry::Registry;
use super::request::{RunRequest, RunSummary};
use super::task::{TaskContext, TaskFactory};
use crate::context::{Context, ContextManager};
use crate::error::{Result, WeirError};
use crate::event::{EventKind, EventLog};
use crate::settings::Settings;
use crate::storage::{self, Storage};

pub struct Engine {
    registry: Registry,
    contexts: ContextManager,
    events: RwLock<EventLog>,
    run_lock: Mutex<()>,
}

impl Engine {
    pub fn new(registry: Registry, settings: Arc<Settings>, storage: Arc<dyn Storage>) -> Self {
        Self {
            registry,
            contexts: ContextManager::new(settings, storage),
            events: RwLock::new(EventLog::new()),
            run_lock: Mutex::new(()),
        }
    }

    /// Build with the storage backend named in `settings`
    pub fn from_settings(registry: Registry, settings: Arc<Settings>) -> Result<Self> {
        let storage = storage::from_settings(&settings)?;
        Ok(Self::new(registry, settings, storage))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn contexts(&self) -> &ContextManager {
        &self.contexts
    }

    /// Events of the latest run
    pub fn events(&self) -> EventLog {
        self.events.read().clone()
    }

    /// Exclusive access to the run slot of this engine
    ///
    /// [`Engine::run`] replaces the current context. Callers that read the
    /// current context after a run hold this guard across both so another
    /// run cannot swap it in between.
    pub async fn exclusive(&self) -> MutexGuard<'_, ()> {
        self.run_lock.lock().await
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        self.contexts.storage()
    }

    pub fn settings(&self) -> &Arc<Settings> {
        self.contexts.settings()
    }

    /// The context of the latest run, or the default one
    pub fn current_context(&self) -> Result<Arc<Context>> {
        self.contexts.current()
    }

    #[instrument(skip(self, request), fields(dag = %request.label))]
    pub async fn run(&self, request: &RunRequest) -> Result<RunSummary> {
        let events = EventLog::new();
        *self.events.write() = events.clone();

        let dag = self.registry.dag(&request.label)?;
        request.validate()?;

        let context = if let Some(run_folder) = &request.retry {
            self.contexts
                .load(run_folder, &request.patch, &request.local_patch)
                .await?
        } else if request.has_patches() {
            self.contexts
                .create(&request.patch, &request.local_patch)
                .await?
        } else {
            self.contexts.ensure().await?
        };

        let mut labels = dag.ordered_tasks(&context);
        if let Some(task) = &request.task {
            labels = vec![task.clone()];
        }
        if let Some(from_task) = &request.from_task {
            self.registry.task(from_task)?;
            let position = labels
                .iter()
                .position(|label| label == from_task)
                .ok_or_else(|| WeirError::TaskNotInDag {
                    task: from_task.clone(),
                    dag: request.label.clone(),
                })?;
            labels = labels.split_off(position);
        }

        let plan = labels
            .iter()
            .map(|label| {
                let factory = Arc::clone(self.registry.task(label)?);
                Ok((Arc::<str>::from(label.as_str()), factory))
            })
            .collect::<Result<Vec<(Arc<str>, TaskFactory)>>>()?;

        if self.settings().persist_context {
            self.contexts.persist(&context).await?;
        }

        let run_id = context.run_id().unwrap_or_default().to_string();
        let run_folder = context.run_folder().unwrap_or_default().to_string();
        let dag_label: Arc<str> = Arc::from(request.label.as_str());
        events.emit(EventKind::RunStarted {
            dag: Arc::clone(&dag_label),
            run_id: run_id.clone(),
            run_folder: run_folder.clone(),
            task_count: plan.len(),
        });

        let run_start = Instant::now();
        for (label, factory) in &plan {
            let cx = TaskContext::new(
                Arc::clone(label),
                Arc::clone(&context),
                Arc::clone(self.storage()),
                Arc::clone(self.settings()),
            );

            info!("Started task '{}'", label);
            events.emit(EventKind::TaskStarted {
                task: Arc::clone(label),
            });
            let start = Instant::now();
            let outcome = factory().run(&cx).await;
            let elapsed = start.elapsed();

            if let Err(e) = outcome {
                error!(task = %label, error = %e, "Task failed");
                events.emit(EventKind::TaskFailed {
                    task: Arc::clone(label),
                    error: e.to_string(),
                    duration_ms: elapsed.as_millis() as u64,
                });
                events.emit(EventKind::RunFailed {
                    dag: Arc::clone(&dag_label),
                    error: e.to_string(),
                    failed_task: Some(Arc::clone(label)),
                });
                return Err(WeirError::Task(e));
            }

            info!(
                "Completed task '{}' in {:.6} seconds",
                label,
                elapsed.as_secs_f64()
            );
            events.emit(EventKind::TaskCompleted {
                task: Arc::clone(label),
                duration_ms: elapsed.as_millis() as u64,
            });
        }

        let duration_ms = run_start.elapsed().as_millis() as u64;
        events.emit(EventKind::RunCompleted {
            dag: dag_label,
            total_duration_ms: duration_ms,
        });

        Ok(RunSummary {
            dag: request.label.clone(),
            run_id,
            run_folder,
            tasks: plan.into_iter().map(|(label, _)| label.to_string()).collect(),
            duration_ms,
        })
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.registry)
            .field("contexts", &self.contexts)
            .field("events", &*self.events.read())
            .finish()
    }
}

//! Weir - sequential DAG runner with merge-built run contexts
//!
//! ```text
//! settings ──► storage backend ──────────────┐
//!    │                                      ▼
//!    └──► ContextManager ──► Context ──► Engine ──► Task::run ──► Storage
//!              ▲  (base + patches + run id)   │
//!              └── retry: {run_folder}/context.yaml
//!                                            │
//!                         SignalingHandler ──┴──► .dag_success / .dag_failed
//! ```
//!
//! Bootstrap registers tasks and DAGs in a [`Registry`], builds an
//! [`Engine`] over a [`Storage`] backend, then calls [`Engine::run`] directly
//! or submits [`RunRequest`]s to a [`LocalQueue`].

pub mod context;
pub mod error;
pub mod event;
pub mod exec;
pub mod logging;
pub mod queue;
pub mod settings;
pub mod storage;
pub mod util;

pub use context::{Context, ContextManager, LocalPatch, RunIdentity};
pub use error::{FixSuggestion, Result, WeirError};
pub use event::{Event, EventKind, EventLog};
pub use exec::{Dag, Engine, Registry, RunRequest, RunSummary, StaticDag, Task, TaskContext};
pub use queue::{JobHandle, JobOutcome, JobQueue, LocalQueue, SignalingHandler};
pub use settings::Settings;
pub use storage::{BackendRegistry, Listing, Storage};

//! Tasks, DAGs and the engine that runs them
//!
//! Bootstrap fills a [`Registry`], the [`Engine`] takes ownership of it,
//! and [`Engine::run`] executes one [`RunRequest`].

mod dag;
mod engine;
mod registry;
mod request;
mod task;

pub use dag::{Dag, StaticDag};
pub use engine::Engine;
pub use registry::Registry;
pub use request::{RunRequest, RunSummary};
pub use task::{Task, TaskContext, TaskFactory};

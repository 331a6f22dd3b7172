//! Queued runs and completion signals
//!
//! [`SignalingHandler`] wraps [`Engine::run`] for out-of-band execution.
//! After the run returns, success or failure, it reads the run folder from
//! the *current* context (retry and patches may have replaced it) and
//! writes a signal file there:
//!
//! - `{run_folder}/.dag_success` containing `success`
//! - `{run_folder}/.dag_failed` containing the error message
//!
//! A signal that cannot be written is logged and dropped; the run's own
//! result is always what the caller gets back. Jobs sharing an engine are
//! serialised.
//!
//! [`LocalQueue`] is the in-process transport: a bounded channel feeding a
//! single worker task.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Result, WeirError};
use crate::event::EventKind;
use crate::exec::{Engine, RunRequest};
use crate::storage::path;

pub const SUCCESS_SIGNAL: &str = ".dag_success";
pub const FAILURE_SIGNAL: &str = ".dag_failed";

/// Result of a successful queued run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub status: String,
    pub run_id: Option<String>,
    pub run_folder: Option<String>,
}

/// Submission side of a queue
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a run; waits while the queue is full
    async fn submit(&self, request: RunRequest) -> Result<JobHandle>;
}

/// Runs a request and writes the completion signal
#[derive(Debug, Clone)]
pub struct SignalingHandler {
    engine: Arc<Engine>,
}

impl SignalingHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Run `request` and write its signal
    ///
    /// Holds the engine's run slot from the context reset until the signal
    /// is written, so overlapping jobs on one engine execute one after the
    /// other and each signal lands in its own run folder.
    pub async fn handle(&self, request: &RunRequest) -> Result<JobOutcome> {
        let _slot = self.engine.exclusive().await;
        // Each job starts from a fresh default context so runs never share a folder.
        self.engine.contexts().reset();

        let result = self.engine.run(request).await;
        match result {
            Ok(_) => {
                let (run_id, run_folder) = self.current_identity();
                self.signal(run_folder.as_deref(), SUCCESS_SIGNAL, "success")
                    .await;
                Ok(JobOutcome {
                    status: "success".to_string(),
                    run_id,
                    run_folder,
                })
            }
            Err(e) => {
                let (_, run_folder) = self.current_identity();
                self.signal(run_folder.as_deref(), FAILURE_SIGNAL, &e.to_string())
                    .await;
                Err(e)
            }
        }
    }

    fn current_identity(&self) -> (Option<String>, Option<String>) {
        match self.engine.current_context() {
            Ok(context) => (
                context.run_id().map(str::to_string),
                context.run_folder().map(str::to_string),
            ),
            Err(e) => {
                warn!(error = %e, "Could not resolve the current context");
                (None, None)
            }
        }
    }

    async fn signal(&self, run_folder: Option<&str>, name: &str, content: &str) {
        let Some(run_folder) = run_folder else {
            warn!(signal = name, "No run folder, signal not written");
            return;
        };
        let location = path::join(run_folder, name);
        match self.engine.storage().touch_str(&location, content).await {
            Ok(()) => {
                debug!(path = %location, "Wrote signal");
                self.engine.events().emit(EventKind::SignalWritten {
                    path: location,
                    success: name == SUCCESS_SIGNAL,
                });
            }
            Err(e) => error!(path = %location, error = %e, "Failed to write signal"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
// IN-PROCESS QUEUE
// ═══════════════════════════════════════════════════════════════

struct Job {
    id: String,
    request: RunRequest,
    reply: oneshot::Sender<Result<JobOutcome>>,
}

/// Awaitable result of a submitted job
#[derive(Debug)]
pub struct JobHandle {
    id: String,
    receiver: oneshot::Receiver<Result<JobOutcome>>,
}

impl JobHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the run to finish; a failed run returns its original error
    pub async fn wait(self) -> Result<JobOutcome> {
        self.receiver.await.map_err(|_| WeirError::Queue {
            reason: format!("job {} was dropped before completing", self.id),
        })?
    }
}

/// Bounded in-process queue with one worker executing jobs in order
#[derive(Debug)]
pub struct LocalQueue {
    sender: mpsc::Sender<Job>,
    worker: JoinHandle<()>,
}

impl LocalQueue {
    /// Spawn the worker. Must be called inside a tokio runtime.
    pub fn start(handler: SignalingHandler, capacity: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<Job>(capacity.max(1));
        let worker = tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                info!(job = %job.id, dag = %job.request.label, "Running queued job");
                let result = handler.handle(&job.request).await;
                if job.reply.send(result).is_err() {
                    debug!(job = %job.id, "Job handle dropped, result discarded");
                }
            }
            debug!("Queue closed, worker exiting");
        });
        Self { sender, worker }
    }

    /// Worker over `engine`, sized by `queue.capacity` in its settings
    pub fn for_engine(engine: Arc<Engine>) -> Self {
        let capacity = engine.settings().queue.capacity;
        Self::start(SignalingHandler::new(engine), capacity)
    }

    /// Stop accepting jobs and wait for queued ones to finish
    pub async fn shutdown(self) -> Result<()> {
        drop(self.sender);
        self.worker.await.map_err(|e| WeirError::Queue {
            reason: format!("worker panicked: {}", e),
        })
    }
}

#[async_trait]
impl JobQueue for LocalQueue {
    async fn submit(&self, request: RunRequest) -> Result<JobHandle> {
        let id = Uuid::new_v4().simple().to_string();
        let (reply, receiver) = oneshot::channel();
        self.sender
            .send(Job {
                id: id.clone(),
                request,
                reply,
            })
            .await
            .map_err(|_| WeirError::Queue {
                reason: "worker is not running".to_string(),
            })?;
        debug!(job = %id, "Submitted job");
        Ok(JobHandle { id, receiver })
    }
}

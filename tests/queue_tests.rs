//! Completion signals and the in-process queue

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_yaml::Mapping;
use weir::queue::{FAILURE_SIGNAL, SUCCESS_SIGNAL};
use weir::storage::{path, MemoryStorage};
use weir::{
    Engine, EventKind, JobQueue, LocalQueue, Registry, RunRequest, Settings, SignalingHandler,
    StaticDag, Storage, Task, TaskContext, WeirError,
};

#[derive(Default)]
struct Succeed;

#[async_trait]
impl Task for Succeed {
    async fn run(&self, _cx: &TaskContext) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct Explode;

#[async_trait]
impl Task for Explode {
    async fn run(&self, _cx: &TaskContext) -> anyhow::Result<()> {
        anyhow::bail!("upstream table is empty")
    }
}

/// Occupies the success signal's path with a directory
#[derive(Default)]
struct BlockSignal;

#[async_trait]
impl Task for BlockSignal {
    async fn run(&self, cx: &TaskContext) -> anyhow::Result<()> {
        let blocker = path::join(cx.run_folder(), &format!("{SUCCESS_SIGNAL}/keep"));
        cx.storage().touch_str(&blocker, "").await?;
        Ok(())
    }
}

fn engine() -> Arc<Engine> {
    let mut registry = Registry::new();
    registry.register_default_task::<Succeed>("ok").unwrap();
    registry.register_default_task::<Explode>("explode").unwrap();
    registry.register_default_task::<BlockSignal>("block").unwrap();
    registry.register_dag(StaticDag::new("green", ["ok"])).unwrap();
    registry
        .register_dag(StaticDag::new("red", ["ok", "explode", "ok"]))
        .unwrap();
    registry
        .register_dag(StaticDag::new("blocked", ["block"]))
        .unwrap();

    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new("").unwrap());
    Arc::new(Engine::new(registry, Arc::new(Settings::default()), storage))
}

fn mapping(yaml: &str) -> Mapping {
    serde_yaml::from_str(yaml).unwrap()
}

async fn signal(engine: &Engine, run_folder: &str, name: &str) -> Option<String> {
    engine
        .storage()
        .open_to_string(&path::join(run_folder, name))
        .await
        .ok()
}

#[tokio::test]
async fn success_writes_success_signal() {
    let engine = engine();
    let handler = SignalingHandler::new(Arc::clone(&engine));

    let outcome = handler.handle(&RunRequest::new("green")).await.unwrap();
    assert_eq!(outcome.status, "success");
    let run_folder = outcome.run_folder.unwrap();

    assert_eq!(
        signal(&engine, &run_folder, SUCCESS_SIGNAL).await.as_deref(),
        Some("success")
    );
    assert_eq!(signal(&engine, &run_folder, FAILURE_SIGNAL).await, None);
    assert!(engine
        .events()
        .events()
        .iter()
        .any(|e| matches!(e.kind, EventKind::SignalWritten { success: true, .. })));
}

#[tokio::test]
async fn failure_writes_message_and_returns_original_error() {
    let engine = engine();
    let handler = SignalingHandler::new(Arc::clone(&engine));

    let err = handler.handle(&RunRequest::new("red")).await.unwrap_err();
    assert!(matches!(err, WeirError::Task(_)));
    assert_eq!(err.to_string(), "upstream table is empty");

    let run_folder = engine
        .current_context()
        .unwrap()
        .run_folder()
        .unwrap()
        .to_string();
    assert_eq!(
        signal(&engine, &run_folder, FAILURE_SIGNAL).await.as_deref(),
        Some("upstream table is empty")
    );
    assert_eq!(signal(&engine, &run_folder, SUCCESS_SIGNAL).await, None);
}

#[tokio::test]
async fn dispatch_errors_are_signalled_too() {
    let engine = engine();
    let handler = SignalingHandler::new(Arc::clone(&engine));

    let err = handler
        .handle(&RunRequest::new("green").from_task("explode"))
        .await
        .unwrap_err();
    assert!(matches!(err, WeirError::TaskNotInDag { .. }));

    let run_folder = engine
        .current_context()
        .unwrap()
        .run_folder()
        .unwrap()
        .to_string();
    let message = signal(&engine, &run_folder, FAILURE_SIGNAL).await.unwrap();
    assert_eq!(message, err.to_string());
}

#[tokio::test]
async fn signal_write_failure_is_suppressed() {
    let engine = engine();
    let handler = SignalingHandler::new(Arc::clone(&engine));

    let outcome = handler.handle(&RunRequest::new("blocked")).await.unwrap();
    assert_eq!(outcome.status, "success");

    let run_folder = outcome.run_folder.unwrap();
    let location = path::join(&run_folder, SUCCESS_SIGNAL);
    assert!(engine.storage().isdir(&location).await.unwrap());
    assert!(!engine
        .events()
        .events()
        .iter()
        .any(|e| matches!(e.kind, EventKind::SignalWritten { .. })));
}

#[tokio::test]
async fn each_job_gets_its_own_run_folder() {
    let engine = engine();
    let handler = SignalingHandler::new(Arc::clone(&engine));

    let first = handler.handle(&RunRequest::new("green")).await.unwrap();
    let second = handler.handle(&RunRequest::new("green")).await.unwrap();
    assert_ne!(first.run_id, second.run_id);
    assert_ne!(first.run_folder, second.run_folder);
}

#[tokio::test]
async fn local_queue_runs_jobs_in_submission_order() {
    let engine = engine();
    let queue = LocalQueue::for_engine(Arc::clone(&engine));

    let green = queue.submit(RunRequest::new("green")).await.unwrap();
    let red = queue.submit(RunRequest::new("red")).await.unwrap();
    assert_ne!(green.id(), red.id());

    let outcome = green.wait().await.unwrap();
    assert_eq!(outcome.status, "success");
    let err = red.wait().await.unwrap_err();
    assert_eq!(err.to_string(), "upstream table is empty");

    queue.shutdown().await.unwrap();

    // The engine keeps the events of the latest run only
    let started: Vec<_> = engine
        .events()
        .run_events()
        .into_iter()
        .filter_map(|e| match e.kind {
            EventKind::RunStarted { dag, .. } => Some(dag.to_string()),
            _ => None,
        })
        .collect();
    assert_eq!(started, ["red"]);
}

#[tokio::test]
async fn events_do_not_accumulate_across_jobs() {
    let engine = engine();
    let handler = SignalingHandler::new(Arc::clone(&engine));

    handler.handle(&RunRequest::new("green")).await.unwrap();
    let per_job = engine.events().len();
    assert!(per_job > 0);

    for _ in 0..20 {
        handler.handle(&RunRequest::new("green")).await.unwrap();
    }
    assert_eq!(engine.events().len(), per_job);
    assert_eq!(engine.events().events()[0].id, 0);
}

/// Records the run folder it ran in, after an optional delay
struct Traced {
    folders: Arc<Mutex<Vec<String>>>,
    delay: Duration,
    fail: bool,
}

#[async_trait]
impl Task for Traced {
    async fn run(&self, cx: &TaskContext) -> anyhow::Result<()> {
        tokio::time::sleep(self.delay).await;
        self.folders.lock().push(cx.run_folder().to_string());
        if self.fail {
            anyhow::bail!("late partition missing");
        }
        Ok(())
    }
}

#[tokio::test]
async fn overlapping_jobs_signal_their_own_run_folders() {
    let slow_folders = Arc::new(Mutex::new(Vec::new()));
    let fast_folders = Arc::new(Mutex::new(Vec::new()));
    let mut registry = Registry::new();
    let folders = Arc::clone(&slow_folders);
    registry
        .register_task("slow", move || Traced {
            folders: Arc::clone(&folders),
            delay: Duration::from_millis(150),
            fail: false,
        })
        .unwrap();
    let folders = Arc::clone(&fast_folders);
    registry
        .register_task("fast_fail", move || Traced {
            folders: Arc::clone(&folders),
            delay: Duration::from_millis(10),
            fail: true,
        })
        .unwrap();
    registry.register_dag(StaticDag::new("slow", ["slow"])).unwrap();
    registry
        .register_dag(StaticDag::new("fast_fail", ["fast_fail"]))
        .unwrap();
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new("").unwrap());
    let engine = Arc::new(Engine::new(registry, Arc::new(Settings::default()), storage));

    let first = SignalingHandler::new(Arc::clone(&engine));
    let second = SignalingHandler::new(Arc::clone(&engine));
    let slow = RunRequest::new("slow").local_patch(mapping("job: slow"));
    let fast = RunRequest::new("fast_fail").local_patch(mapping("job: fast"));
    let (slow_result, fast_result) = tokio::join!(first.handle(&slow), second.handle(&fast));

    let outcome = slow_result.unwrap();
    assert_eq!(fast_result.unwrap_err().to_string(), "late partition missing");

    let slow_folder = outcome.run_folder.unwrap();
    let fast_folder = fast_folders.lock()[0].clone();
    assert_eq!(*slow_folders.lock(), [slow_folder.clone()]);
    assert_ne!(slow_folder, fast_folder);

    assert_eq!(
        signal(&engine, &slow_folder, SUCCESS_SIGNAL).await.as_deref(),
        Some("success")
    );
    assert_eq!(signal(&engine, &slow_folder, FAILURE_SIGNAL).await, None);
    assert_eq!(
        signal(&engine, &fast_folder, FAILURE_SIGNAL).await.as_deref(),
        Some("late partition missing")
    );
    assert_eq!(signal(&engine, &fast_folder, SUCCESS_SIGNAL).await, None);
}

#[tokio::test]
async fn shutdown_drains_pending_jobs() {
    let engine = engine();
    let queue = LocalQueue::for_engine(Arc::clone(&engine));

    let handles = [
        queue.submit(RunRequest::new("green")).await.unwrap(),
        queue.submit(RunRequest::new("green")).await.unwrap(),
    ];
    queue.shutdown().await.unwrap();

    for handle in handles {
        assert_eq!(handle.wait().await.unwrap().status, "success");
    }
}

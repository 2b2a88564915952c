//! The worker loop.
//!
//! A single worker polls the task queue, dispatches by task type, and
//! guarantees — via a scoped status guard — that every dequeued task reaches
//! exactly one terminal status no matter how its handler exits. Handlers run
//! inside `tokio::spawn` so a panic surfaces as a `JoinError` and becomes a
//! `failed` row instead of a task wedged in `running`. Shutdown is
//! cooperative: the in-flight task finishes, then the loop exits.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::db::{DbError, DbTask, TaskStatus, TaskType};
use crate::error::WorkerError;
use crate::handlers;
use crate::pipeline::{self, ResearchArgs};
use crate::state::AppState;

/// Scoped guard over one task's status lifecycle.
///
/// `begin` marks the task `running`; `complete`/`fail` move it to its
/// terminal state. If the guard is dropped without either (a code path the
/// worker should never take), the task is marked `failed` rather than left
/// `running` forever.
pub struct StatusGuard<'a> {
    state: &'a AppState,
    task_id: String,
    finished: bool,
}

impl<'a> StatusGuard<'a> {
    pub fn begin(state: &'a AppState, task: &DbTask) -> Result<Self, DbError> {
        state
            .write_db()
            .update_task_status(&task.id, TaskStatus::Running, None, None)?;
        log::info!("Task {} ({}) running", task.id, task.task_type.as_str());
        Ok(Self {
            state,
            task_id: task.id.clone(),
            finished: false,
        })
    }

    pub fn complete(mut self, result: Option<serde_json::Value>) {
        self.finished = true;
        if let Err(e) = self.state.write_db().update_task_status(
            &self.task_id,
            TaskStatus::Completed,
            result.as_ref(),
            None,
        ) {
            log::error!("Failed to mark task {} completed: {}", self.task_id, e);
        } else {
            log::info!("Task {} completed", self.task_id);
        }
    }

    pub fn fail(mut self, error: &str) {
        self.finished = true;
        self.mark_failed(error);
    }

    fn mark_failed(&self, error: &str) {
        if let Err(e) = self.state.write_db().update_task_status(
            &self.task_id,
            TaskStatus::Failed,
            None,
            Some(error),
        ) {
            log::error!("Failed to mark task {} failed: {}", self.task_id, e);
        } else {
            log::warn!("Task {} failed: {}", self.task_id, error);
        }
    }
}

impl Drop for StatusGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            log::error!("Task {} dropped without a terminal status", self.task_id);
            self.mark_failed("worker dropped task before completion");
        }
    }
}

/// Poll the queue until shutdown. One task at a time, by design — the
/// system trades throughput for visibility and transactional simplicity.
pub async fn run_worker(state: Arc<AppState>, mut shutdown: watch::Receiver<bool>) {
    let poll = Duration::from_secs(state.config.poll_interval_secs.max(1));
    let backoff = Duration::from_secs(state.config.error_backoff_secs.max(1));
    log::info!("Worker started (poll interval {:?})", poll);

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = shutdown.changed() => continue,
            _ = tokio::time::sleep(poll) => {}
        }

        let next = match state.read_db().and_then(|db| db.get_next_pending_task()) {
            Ok(next) => next,
            Err(e) => {
                log::error!("Queue poll failed: {}", e);
                tokio::time::sleep(backoff).await;
                continue;
            }
        };
        let Some(task) = next else { continue };

        // Shutdown checks happen between tasks only: an in-flight task
        // always runs to its terminal status.
        process_task(&state, task).await;
    }
    log::info!("Worker stopped");
}

/// Run one dequeued task under the status guard.
pub async fn process_task(state: &Arc<AppState>, task: DbTask) {
    let guard = match StatusGuard::begin(state, &task) {
        Ok(guard) => guard,
        Err(e) => {
            log::error!("Failed to mark task {} running: {}", task.id, e);
            return;
        }
    };

    let handler_state = Arc::clone(state);
    let handler_task = task.clone();
    let join = tokio::spawn(async move { dispatch(&handler_state, &handler_task).await });

    match join.await {
        Ok(Ok(result)) => guard.complete(result),
        Ok(Err(err)) => guard.fail(&err.to_string()),
        Err(join_err) => guard.fail(&format!("task handler panicked: {}", join_err)),
    }
}

async fn dispatch(
    state: &Arc<AppState>,
    task: &DbTask,
) -> Result<Option<serde_json::Value>, WorkerError> {
    match task.task_type {
        TaskType::Research => {
            let args: ResearchArgs = serde_json::from_value(task.args.clone())?;
            pipeline::run_research(state, &args).await.map(Some)
        }
        TaskType::GenerateReply => {
            let args: handlers::EntityArgs = serde_json::from_value(task.args.clone())?;
            handlers::generate_reply(state, &args).await.map(Some)
        }
        TaskType::ScanMessages => handlers::scan_messages(state).await.map(Some),
        TaskType::SendAndArchive => {
            let args: handlers::EntityArgs = serde_json::from_value(task.args.clone())?;
            handlers::send_and_archive(state, &args).await.map(Some)
        }
        TaskType::IgnoreAndArchive => {
            let args: handlers::EntityArgs = serde_json::from_value(task.args.clone())?;
            handlers::ignore_and_archive(state, &args).await.map(Some)
        }
        TaskType::BulkImport => handlers::bulk_import(state, &task.id).await.map(Some),
        TaskType::MergeCompanies => {
            let args: handlers::MergeArgs = serde_json::from_value(task.args.clone())?;
            handlers::merge_companies(state, &args).await.map(Some)
        }
    }
}

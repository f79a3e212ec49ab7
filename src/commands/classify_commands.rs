use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::commands::classify_pipeline::{self, PipelineCtx};
use crate::error::AppError;
use crate::models::migration::{MigrationItem, MigrationResult};
use crate::models::task::{Task, TaskStage};
use crate::services::ambiguity_service::{self, AmbiguityPartition};
use crate::services::classifier_service::{self, ApiFailureKind, ClassificationClient};
use crate::services::migration_service;
use crate::services::progress_service::{self, ProgressEstimate};
use crate::services::reconcile_service::{self, ReconciledView};
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    #[serde(flatten)]
    pub task: Task,
    pub progress: ProgressEstimate,
}

impl TaskSnapshot {
    pub fn from_task(task: Task) -> Self {
        let progress = progress_service::estimate(&task);
        Self { task, progress }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassificationView {
    pub task_id: String,
    #[serde(flatten)]
    pub reconciled: ReconciledView,
    pub ambiguity: AmbiguityPartition,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ApiKeyCheck {
    Valid {
        model: String,
        reply: String,
    },
    Invalid {
        kind: ApiFailureKind,
        message: String,
        detail: String,
    },
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Validate the request, record the task in `started` and run the stage
/// pipeline in the background. Returns the new task id.
pub async fn start_classification<C>(
    state: &Arc<AppState>,
    client: Arc<C>,
    source_path: &str,
    target_path: &str,
) -> Result<String, AppError>
where
    C: ClassificationClient + 'static,
{
    let source_path = source_path.trim();
    let target_path = target_path.trim();
    if source_path.is_empty() || target_path.is_empty() {
        return Err(AppError::General(
            "source and target folders are required".to_string(),
        ));
    }
    if !Path::new(source_path).is_dir() {
        return Err(AppError::General(format!(
            "source folder does not exist: {source_path}"
        )));
    }

    let task_id = uuid::Uuid::new_v4().to_string();
    let task = state.publish_task(Task::new(
        task_id.clone(),
        source_path.to_string(),
        target_path.to_string(),
    ))?;
    tracing::info!(%task_id, source_path, target_path, model = client.model_name(), "classification started");

    let ctx = PipelineCtx {
        state: Arc::clone(state),
        client,
        task_id: task_id.clone(),
    };
    tokio::spawn(classify_pipeline::run_classify_pipeline(ctx, task));
    Ok(task_id)
}

pub fn get_classification_status(state: &AppState, task_id: &str) -> Result<TaskSnapshot, AppError> {
    state
        .get_task(task_id)
        .map(TaskSnapshot::from_task)
        .ok_or_else(|| AppError::TaskNotFound(task_id.to_string()))
}

/// Reconciled table, rendered tree and ambiguity partition of a completed
/// task.
pub fn get_classification_view(state: &AppState, task_id: &str) -> Result<ClassificationView, AppError> {
    let task = state
        .get_task(task_id)
        .ok_or_else(|| AppError::TaskNotFound(task_id.to_string()))?;
    let plan = match (task.stage, task.results.as_ref()) {
        (TaskStage::Completed, Some(plan)) => plan,
        (stage, _) => {
            return Err(AppError::General(format!(
                "task {task_id} has no results (stage: {stage})"
            )))
        }
    };
    Ok(ClassificationView {
        task_id: task.task_id.clone(),
        reconciled: reconcile_service::reconcile(plan),
        ambiguity: ambiguity_service::partition(plan, &state.config.ambiguity_marker),
    })
}

// ---------------------------------------------------------------------------
// Migration
// ---------------------------------------------------------------------------

pub async fn migrate_files(items: Vec<MigrationItem>) -> Result<MigrationResult, AppError> {
    if items.is_empty() {
        return Err(AppError::General("no files to migrate".to_string()));
    }
    tokio::task::spawn_blocking(move || migration_service::execute(&items))
        .await
        .map_err(|e| AppError::General(format!("migration worker failed: {e}")))
}

/// Migrate only the unambiguous entries of a completed task.
pub async fn migrate_task(state: &AppState, task_id: &str) -> Result<MigrationResult, AppError> {
    let view = get_classification_view(state, task_id)?;
    let items = view.ambiguity.migration_items();
    tracing::info!(
        task_id,
        migratable = items.len(),
        needs_decision = view.ambiguity.needs_decision.len(),
        "migrating task"
    );
    if items.is_empty() {
        return Ok(MigrationResult::default());
    }
    migrate_files(items).await
}

// ---------------------------------------------------------------------------
// Status polling
// ---------------------------------------------------------------------------

/// Scheduled snapshot reader for one task. Stops on a terminal snapshot,
/// an unknown task, or when cancelled or dropped.
pub struct StatusPoller {
    receiver: watch::Receiver<Option<TaskSnapshot>>,
    cancel: CancellationToken,
}

impl StatusPoller {
    pub fn spawn(state: Arc<AppState>, task_id: String, interval: Duration) -> Self {
        let (sender, receiver) = watch::channel(None);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let snapshot = match get_classification_status(&state, &task_id) {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        tracing::warn!(%task_id, "stopping status poller: {e}");
                        break;
                    }
                };
                let terminal = snapshot.task.is_terminal();
                if sender.send(Some(snapshot)).is_err() || terminal {
                    break;
                }
            }
        });

        Self { receiver, cancel }
    }

    /// Wait for the next published snapshot. `None` once polling stopped.
    pub async fn next(&mut self) -> Option<TaskSnapshot> {
        self.receiver.changed().await.ok()?;
        self.receiver.borrow_and_update().clone()
    }

    /// Wait until polling stops and return the last snapshot seen.
    pub async fn wait_for_terminal(&mut self) -> Option<TaskSnapshot> {
        while self.receiver.changed().await.is_ok() {}
        self.receiver.borrow().clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

pub async fn check_api_key<C: ClassificationClient>(client: &C) -> ApiKeyCheck {
    match client.ping().await {
        Ok(reply) => {
            tracing::info!(model = client.model_name(), "API key verified");
            ApiKeyCheck::Valid {
                model: client.model_name().to_string(),
                reply,
            }
        }
        Err(e) => {
            let kind = classifier_service::classify_api_failure(&e);
            tracing::warn!(?kind, "API key check failed: {e}");
            ApiKeyCheck::Invalid {
                kind,
                message: kind.message().to_string(),
                detail: e.to_string(),
            }
        }
    }
}

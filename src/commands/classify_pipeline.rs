use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::error::AppError;
use crate::models::classification::{ClassificationFragment, ClassificationPlan};
use crate::models::file_entry::FileDescriptor;
use crate::models::task::{Task, TaskStage};
use crate::services::classifier_service::{BatchRequest, ClassificationClient};
use crate::services::plan_service;
use crate::services::progress_service::{
    self, BatchTimer, AI_ANALYZING_START, FIRST_BATCH_ESTIMATE_SECS, PROCESSING_PROGRESS,
    SCANNING_PROGRESS,
};
use crate::services::scan_service;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Pipeline context
// ---------------------------------------------------------------------------

pub struct PipelineCtx<C> {
    pub state: Arc<AppState>,
    pub client: Arc<C>,
    pub task_id: String,
}

pub struct StageAnalyzeResult {
    pub fragments: Vec<ClassificationFragment>,
    pub existing_structure: Vec<(String, Vec<String>)>,
}

impl<C> Clone for PipelineCtx<C> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            client: Arc::clone(&self.client),
            task_id: self.task_id.clone(),
        }
    }
}

/// Replace the stored snapshot with the working copy.
fn publish<C>(ctx: &PipelineCtx<C>, task: &mut Task) -> Result<(), AppError> {
    let stored = ctx.state.publish_task(task.clone())?;
    task.sequence = stored.sequence;
    Ok(())
}

// ---------------------------------------------------------------------------
// Stage producers
// ---------------------------------------------------------------------------

pub fn stage_scan<C>(ctx: &PipelineCtx<C>, task: &mut Task) -> Result<Vec<PathBuf>, AppError> {
    task.advance(TaskStage::Scanning)?;
    task.message = Some("Scanning source folder...".to_string());
    task.stage_progress = Some(SCANNING_PROGRESS);
    publish(ctx, task)?;

    let files = scan_service::enumerate_files(&task.source_path, &ctx.state.config)?;
    task.total_files = files.len();
    task.found_files = files.len();
    task.message = Some(format!("Found {} files", files.len()));
    publish(ctx, task)?;
    tracing::info!(task_id = %ctx.task_id, files = files.len(), "scan finished");
    Ok(files)
}

pub fn stage_collect<C>(
    ctx: &PipelineCtx<C>,
    task: &mut Task,
    paths: &[PathBuf],
) -> Result<Vec<FileDescriptor>, AppError> {
    task.advance(TaskStage::Collecting)?;
    task.processed_files = 0;
    task.message = Some("Collecting file information...".to_string());
    task.stage_progress = Some(progress_service::collecting_progress(0, task.total_files));
    publish(ctx, task)?;

    let mut files = Vec::with_capacity(paths.len());
    for (idx, path) in paths.iter().enumerate() {
        let descriptor = scan_service::describe_file(path, &ctx.state.config)?;
        task.processed_files = idx + 1;
        task.current_file = Some(descriptor.name.clone());
        task.stage_progress = Some(progress_service::collecting_progress(idx + 1, task.total_files));
        publish(ctx, task)?;
        files.push(descriptor);
    }
    tracing::info!(task_id = %ctx.task_id, files = files.len(), "collection finished");
    Ok(files)
}

async fn classify_with_retry<C: ClassificationClient>(
    ctx: &PipelineCtx<C>,
    request: &BatchRequest,
) -> Result<ClassificationFragment, AppError> {
    let attempts = ctx.state.config.max_batch_retries + 1;
    let mut last_error: Option<AppError> = None;

    for attempt in 1..=attempts {
        match ctx.client.classify_batch(request).await {
            Ok(fragment) => return Ok(fragment),
            Err(err) => {
                tracing::warn!(
                    task_id = %ctx.task_id,
                    batch = request.batch_index + 1,
                    attempt,
                    "classifier batch failed: {err}"
                );
                last_error = Some(err);
                if attempt < attempts {
                    tokio::time::sleep(ctx.state.config.retry_delay()).await;
                }
            }
        }
    }

    let detail = match last_error {
        Some(AppError::Classification(message)) => message,
        Some(other) => other.to_string(),
        None => "unknown error".to_string(),
    };
    Err(AppError::Classification(format!(
        "batch {}/{} failed after {attempts} attempts: {detail}",
        request.batch_index + 1,
        request.total_batches
    )))
}

pub async fn stage_ai_analyze<C: ClassificationClient>(
    ctx: &PipelineCtx<C>,
    task: &mut Task,
    files: &[FileDescriptor],
) -> Result<StageAnalyzeResult, AppError> {
    task.advance(TaskStage::AiAnalyzing)?;
    task.current_file = None;
    task.stage_progress = Some(AI_ANALYZING_START);

    if files.is_empty() {
        task.message = Some("No files to analyze".to_string());
        publish(ctx, task)?;
        return Ok(StageAnalyzeResult {
            fragments: Vec::new(),
            existing_structure: Vec::new(),
        });
    }

    let config = &ctx.state.config;
    let existing_structure = plan_service::ensure_para_scaffold(&task.target_path)?;
    let batch_size = config.batch_size_for(files.len());
    let batches: Vec<&[FileDescriptor]> = files.chunks(batch_size).collect();
    let total_batches = batches.len();
    let mut timer = BatchTimer::new();
    let mut fragments = Vec::with_capacity(total_batches);

    for (idx, batch) in batches.into_iter().enumerate() {
        let remaining = timer
            .estimated_remaining(total_batches)
            .unwrap_or(FIRST_BATCH_ESTIMATE_SECS * (total_batches - idx) as f64);
        task.stage_progress = Some(progress_service::ai_batch_progress(idx, total_batches));
        task.average_batch_time = timer.average();
        task.estimated_remaining_time = timer.estimated_remaining(total_batches);
        task.message = Some(format!(
            "Analyzing batch {}/{} ({} files), about {} remaining...",
            idx + 1,
            total_batches,
            batch.len(),
            progress_service::format_duration(remaining)
        ));
        publish(ctx, task)?;

        let request = BatchRequest {
            files: batch.to_vec(),
            target_base_path: task.target_path.clone(),
            existing_structure: existing_structure.clone(),
            ambiguity_marker: config.ambiguity_marker.clone(),
            preview_chars: config.prompt_preview_chars,
            batch_index: idx,
            total_batches,
        };
        let started = Instant::now();
        let result = classify_with_retry(ctx, &request).await;
        timer.record(started.elapsed());
        let fragment = result?;
        tracing::info!(
            task_id = %ctx.task_id,
            batch = idx + 1,
            total_batches,
            rows = fragment.mapping_table.len(),
            "batch classified"
        );
        fragments.push(fragment);
    }

    task.stage_progress = Some(progress_service::ai_batch_progress(total_batches, total_batches));
    task.average_batch_time = timer.average();
    task.estimated_remaining_time = timer.estimated_remaining(total_batches);
    task.message = Some(format!(
        "Analyzed {total_batches} batches in {}",
        progress_service::format_duration(timer.total())
    ));
    publish(ctx, task)?;

    Ok(StageAnalyzeResult {
        fragments,
        existing_structure,
    })
}

pub fn stage_process<C>(
    ctx: &PipelineCtx<C>,
    task: &mut Task,
    analyzed: StageAnalyzeResult,
    files: &[FileDescriptor],
) -> Result<ClassificationPlan, AppError> {
    task.advance(TaskStage::Processing)?;
    task.stage_progress = Some(PROCESSING_PROGRESS);
    task.message = Some("Processing analysis results...".to_string());
    publish(ctx, task)?;

    let union = plan_service::union_fragments(analyzed.fragments);
    Ok(plan_service::build_plan(
        union,
        files,
        &analyzed.existing_structure,
        &task.target_path,
        &ctx.state.config.ambiguity_marker,
    ))
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Run a filesystem-bound stage on the blocking pool. The working copy is
/// moved there and handed back with the stage's result.
async fn on_blocking_pool<C, T, F>(ctx: &PipelineCtx<C>, task: &mut Task, stage: F) -> Result<T, AppError>
where
    C: Send + Sync + 'static,
    T: Send + 'static,
    F: FnOnce(&PipelineCtx<C>, &mut Task) -> Result<T, AppError> + Send + 'static,
{
    let owned_ctx = ctx.clone();
    let mut owned_task = task.clone();
    let (returned, result) = tokio::task::spawn_blocking(move || {
        let result = stage(&owned_ctx, &mut owned_task);
        (owned_task, result)
    })
    .await
    .map_err(|e| AppError::General(format!("filesystem worker failed: {e}")))?;
    *task = returned;
    result
}

async fn classify<C>(ctx: &PipelineCtx<C>, task: &mut Task) -> Result<(), AppError>
where
    C: ClassificationClient + 'static,
{
    let started = Instant::now();
    let files = on_blocking_pool(ctx, task, |ctx, task| {
        let paths = stage_scan(ctx, task)?;
        stage_collect(ctx, task, &paths)
    })
    .await?;
    let analyzed = stage_ai_analyze(ctx, task, &files).await?;
    let plan = stage_process(ctx, task, analyzed, &files)?;

    let classified = plan.mapping_table.len();
    let pending = plan.discussion_points.len();
    let message = if files.is_empty() {
        "No files found to analyze".to_string()
    } else {
        format!("Analysis complete: {classified} files classified, {pending} discussion points")
    };
    task.complete(plan, started.elapsed().as_secs_f64(), message)?;
    publish(ctx, task)
}

/// Drive one task through every stage. Any fatal error moves the task to
/// `error`; the final working copy is returned.
pub async fn run_classify_pipeline<C>(ctx: PipelineCtx<C>, mut task: Task) -> Task
where
    C: ClassificationClient + 'static,
{
    if let Err(err) = classify(&ctx, &mut task).await {
        let err = err.capture();
        if task.fail(&err).is_ok() {
            if let Err(publish_err) = publish(&ctx, &mut task) {
                tracing::warn!(task_id = %ctx.task_id, "could not record failure: {publish_err}");
            }
        }
    }
    tracing::info!(
        task_id = %ctx.task_id,
        stage = %task.stage,
        duration = task.total_duration.unwrap_or_default(),
        "classification pipeline finished"
    );
    task
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::config::ClassifierConfig;
    use crate::services::classifier_service::testing::FakeClient;

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState::new(ClassifierConfig {
            retry_delay_ms: 0,
            ..ClassifierConfig::default()
        }))
    }

    async fn run(
        state: &Arc<AppState>,
        client: &Arc<FakeClient>,
        source: &std::path::Path,
        target: &std::path::Path,
    ) -> Task {
        let task = Task::new(
            "task-1".into(),
            source.to_string_lossy().to_string(),
            target.to_string_lossy().to_string(),
        );
        let task = state.publish_task(task).unwrap();
        let ctx = PipelineCtx {
            state: Arc::clone(state),
            client: Arc::clone(client),
            task_id: "task-1".into(),
        };
        run_classify_pipeline(ctx, task).await
    }

    #[tokio::test]
    async fn pipeline_completes_with_plan_for_every_file() {
        let source = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        fs::create_dir_all(source.path().join("inbox")).unwrap();
        fs::write(source.path().join("inbox/a.md"), "alpha").unwrap();
        fs::write(source.path().join("b.txt"), "beta").unwrap();

        let state = test_state();
        let client = Arc::new(FakeClient::placing_all());
        let task = run(&state, &client, source.path(), target.path()).await;

        assert_eq!(task.stage, TaskStage::Completed);
        assert_eq!(task.stage_progress, Some(100));
        assert_eq!(task.processed_files, 2);
        assert!(task.total_duration.is_some());
        let plan = task.results.as_ref().unwrap();
        assert_eq!(plan.mapping_table.len(), 2);
        assert!(plan.discussion_points.is_empty());
        assert!(target.path().join("01-Projects").is_dir());
        assert_eq!(client.calls(), 1);

        let stored = state.get_task("task-1").unwrap();
        assert_eq!(stored.stage, TaskStage::Completed);
        assert_eq!(stored.sequence, task.sequence);
        assert_eq!(
            stored.message.as_deref(),
            Some("Analysis complete: 2 files classified, 0 discussion points")
        );
    }

    #[tokio::test]
    async fn file_missing_from_responses_becomes_discussion_point() {
        let source = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        fs::write(source.path().join("a.md"), "a").unwrap();
        fs::write(source.path().join("b.md"), "b").unwrap();

        let client = Arc::new(FakeClient::new(|request| {
            let first = &request.files[0];
            Ok(ClassificationFragment {
                mapping_table: vec![crate::models::classification::RawMappingRow {
                    filename: first.name.clone(),
                    original_directory: first.original_directory.clone(),
                    new_directory: format!("{}/02-Areas/{}", request.target_base_path, first.name),
                }],
                ..Default::default()
            })
        }));
        let task = run(&test_state(), &client, source.path(), target.path()).await;

        let plan = task.results.unwrap();
        assert_eq!(plan.mapping_table.len(), 1);
        assert_eq!(plan.discussion_points.len(), 1);
        assert_eq!(plan.discussion_points[0].filename, "b.md");
    }

    #[tokio::test]
    async fn failing_batch_is_retried_then_fails_the_task() {
        let source = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        fs::write(source.path().join("a.md"), "a").unwrap();

        let state = test_state();
        let client = Arc::new(FakeClient::new(|_| {
            Err(AppError::Classification("API returned 500".into()))
        }));
        let task = run(&state, &client, source.path(), target.path()).await;

        assert_eq!(task.stage, TaskStage::Error);
        assert!(task.results.is_none());
        let error = task.error.unwrap();
        assert!(error.starts_with("Classification failed: batch 1/1 failed after 3 attempts"));
        assert_eq!(client.calls(), state.config.max_batch_retries + 1);
        assert_eq!(state.get_task("task-1").unwrap().stage, TaskStage::Error);
    }

    #[tokio::test]
    async fn missing_source_is_an_enumeration_failure() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(FakeClient::placing_all());
        let task = run(&test_state(), &client, &dir.path().join("missing"), dir.path()).await;

        assert_eq!(task.stage, TaskStage::Error);
        assert!(task.error.unwrap().starts_with("Enumeration failed"));
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn empty_source_completes_without_classifier_calls() {
        let source = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        let client = Arc::new(FakeClient::placing_all());
        let task = run(&test_state(), &client, source.path(), target.path()).await;

        assert_eq!(task.stage, TaskStage::Completed);
        assert_eq!(task.results, Some(ClassificationPlan::default()));
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn large_collections_are_batched_sequentially() {
        let source = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        for i in 0..60 {
            fs::write(source.path().join(format!("note-{i:02}.md")), "n").unwrap();
        }

        let client = Arc::new(FakeClient::placing_all());
        let task = run(&test_state(), &client, source.path(), target.path()).await;

        assert_eq!(task.stage, TaskStage::Completed);
        assert_eq!(client.calls(), 2);
        assert!(task.average_batch_time.is_some());
        assert_eq!(task.results.unwrap().mapping_table.len(), 60);
    }

    #[tokio::test]
    async fn filesystem_stages_run_off_the_runtime_thread() {
        let source = tempfile::tempdir().unwrap();
        fs::write(source.path().join("a.md"), "a").unwrap();
        let state = test_state();
        let ctx = PipelineCtx {
            state: Arc::clone(&state),
            client: Arc::new(FakeClient::placing_all()),
            task_id: "task-1".into(),
        };
        let task = Task::new(
            "task-1".into(),
            source.path().to_string_lossy().to_string(),
            "/unused".into(),
        );
        let mut task = state.publish_task(task).unwrap();

        let runtime_thread = std::thread::current().id();
        let (worker_thread, files) = on_blocking_pool(&ctx, &mut task, |ctx, task| {
            let paths = stage_scan(ctx, task)?;
            let files = stage_collect(ctx, task, &paths)?;
            Ok((std::thread::current().id(), files))
        })
        .await
        .unwrap();

        assert_ne!(worker_thread, runtime_thread);
        assert_eq!(files.len(), 1);
        assert_eq!(task.stage, TaskStage::Collecting);
        assert_eq!(task.processed_files, 1);
        assert_eq!(state.get_task("task-1").unwrap().sequence, task.sequence);
    }
}

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::classification::ClassificationPlan;

/// Lifecycle of a classification task. Stages only move forward, one step
/// at a time; `Error` is reachable from any non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStage {
    Started,
    Scanning,
    Collecting,
    AiAnalyzing,
    Processing,
    Completed,
    Error,
}

impl TaskStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// The only stage a producer may advance to from `self`, if any.
    pub fn successor(self) -> Option<Self> {
        match self {
            Self::Started => Some(Self::Scanning),
            Self::Scanning => Some(Self::Collecting),
            Self::Collecting => Some(Self::AiAnalyzing),
            Self::AiAnalyzing => Some(Self::Processing),
            Self::Processing => Some(Self::Completed),
            Self::Completed | Self::Error => None,
        }
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == Self::Error || self.successor() == Some(next)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Scanning => "scanning",
            Self::Collecting => "collecting",
            Self::AiAnalyzing => "ai_analyzing",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for TaskStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.label())
    }
}

impl std::str::FromStr for TaskStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(Self::Started),
            "scanning" => Ok(Self::Scanning),
            "collecting" => Ok(Self::Collecting),
            "ai_analyzing" => Ok(Self::AiAnalyzing),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            _ => Err(format!("unknown task stage: {s}")),
        }
    }
}

/// Snapshot of a classification task as seen by polling clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub stage: TaskStage,
    pub source_path: String,
    pub target_path: String,
    pub message: Option<String>,
    pub total_files: usize,
    pub found_files: usize,
    pub processed_files: usize,
    pub current_file: Option<String>,
    pub stage_progress: Option<u8>,
    pub average_batch_time: Option<f64>,
    pub estimated_remaining_time: Option<f64>,
    pub total_duration: Option<f64>,
    pub results: Option<ClassificationPlan>,
    pub error: Option<String>,
    pub created_at: String,
    #[serde(default)]
    pub sequence: u64,
}

impl Task {
    pub fn new(task_id: String, source_path: String, target_path: String) -> Self {
        Self {
            task_id,
            stage: TaskStage::Started,
            source_path,
            target_path,
            message: Some("Starting analysis...".to_string()),
            total_files: 0,
            found_files: 0,
            processed_files: 0,
            current_file: None,
            stage_progress: Some(0),
            average_batch_time: None,
            estimated_remaining_time: None,
            total_duration: None,
            results: None,
            error: None,
            created_at: chrono::Utc::now().to_rfc3339(),
            sequence: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    fn ensure_mutable(&self) -> Result<(), AppError> {
        if self.is_terminal() {
            return Err(AppError::InvalidTransition(format!(
                "task {} is already {}",
                self.task_id, self.stage
            )));
        }
        Ok(())
    }

    /// Move to the next non-terminal stage. Terminal stages go through
    /// [`Task::complete`] and [`Task::fail`] so their payload is attached
    /// in the same step.
    pub fn advance(&mut self, next: TaskStage) -> Result<(), AppError> {
        self.ensure_mutable()?;
        if next.is_terminal() || !self.stage.can_transition_to(next) {
            return Err(AppError::InvalidTransition(format!(
                "{} -> {next}",
                self.stage
            )));
        }
        if self.stage == TaskStage::Collecting && self.processed_files != self.total_files {
            return Err(AppError::InvalidTransition(format!(
                "collecting -> {next} with {}/{} files collected",
                self.processed_files, self.total_files
            )));
        }
        self.stage = next;
        Ok(())
    }

    /// Final transition; `message` is the last one the task will carry.
    pub fn complete(
        &mut self,
        results: ClassificationPlan,
        total_duration: f64,
        message: String,
    ) -> Result<(), AppError> {
        self.ensure_mutable()?;
        if !self.stage.can_transition_to(TaskStage::Completed) {
            return Err(AppError::InvalidTransition(format!(
                "{} -> completed",
                self.stage
            )));
        }
        self.stage = TaskStage::Completed;
        self.stage_progress = Some(100);
        self.current_file = None;
        self.estimated_remaining_time = Some(0.0);
        self.total_duration = Some(total_duration);
        self.results = Some(results);
        self.error = None;
        self.message = Some(message);
        Ok(())
    }

    pub fn fail(&mut self, error: &AppError) -> Result<(), AppError> {
        self.ensure_mutable()?;
        self.stage = TaskStage::Error;
        self.current_file = None;
        self.results = None;
        self.error = Some(error.to_string());
        self.message = Some(format!("Analysis failed: {error}"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task::new("t-1".into(), "/src".into(), "/dst".into())
    }

    #[test]
    fn stages_advance_in_order_without_skipping() {
        let mut t = task();
        assert!(t.advance(TaskStage::Collecting).is_err());
        t.advance(TaskStage::Scanning).unwrap();
        t.advance(TaskStage::Collecting).unwrap();
        t.advance(TaskStage::AiAnalyzing).unwrap();
        t.advance(TaskStage::Processing).unwrap();
        assert!(t.advance(TaskStage::Scanning).is_err());
        t.complete(ClassificationPlan::default(), 1.5, "done".into()).unwrap();
        assert_eq!(t.stage, TaskStage::Completed);
        assert_eq!(t.message.as_deref(), Some("done"));
        assert_eq!(t.stage_progress, Some(100));
        assert!(t.results.is_some());
    }

    #[test]
    fn collecting_cannot_advance_until_every_file_is_collected() {
        let mut t = task();
        t.advance(TaskStage::Scanning).unwrap();
        t.total_files = 3;
        t.advance(TaskStage::Collecting).unwrap();
        t.processed_files = 2;
        assert!(t.advance(TaskStage::AiAnalyzing).is_err());
        t.processed_files = 3;
        t.advance(TaskStage::AiAnalyzing).unwrap();
    }

    #[test]
    fn completion_requires_processing_stage() {
        let mut t = task();
        t.advance(TaskStage::Scanning).unwrap();
        assert!(t
            .complete(ClassificationPlan::default(), 0.0, "done".into())
            .is_err());
    }

    #[test]
    fn terminal_tasks_reject_further_mutation() {
        let mut t = task();
        t.advance(TaskStage::Scanning).unwrap();
        t.fail(&AppError::Enumeration("missing".into())).unwrap();
        assert_eq!(t.stage, TaskStage::Error);
        assert!(t.error.as_deref().unwrap().contains("Enumeration failed"));
        assert!(t.fail(&AppError::General("again".into())).is_err());
        assert!(t.advance(TaskStage::Collecting).is_err());
        assert!(t.results.is_none());
    }

    #[test]
    fn error_is_reachable_from_every_non_terminal_stage() {
        for stage in [
            TaskStage::Started,
            TaskStage::Scanning,
            TaskStage::Collecting,
            TaskStage::AiAnalyzing,
            TaskStage::Processing,
        ] {
            assert!(stage.can_transition_to(TaskStage::Error), "{stage}");
        }
        assert!(!TaskStage::Completed.can_transition_to(TaskStage::Error));
    }

    #[test]
    fn stage_labels_round_trip_through_from_str() {
        let stage: TaskStage = "ai_analyzing".parse().unwrap();
        assert_eq!(stage, TaskStage::AiAnalyzing);
        assert_eq!(
            serde_json::to_string(&TaskStage::AiAnalyzing).unwrap(),
            "\"ai_analyzing\""
        );
        assert!("bogus".parse::<TaskStage>().is_err());
    }
}

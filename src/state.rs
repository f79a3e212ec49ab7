use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::config::ClassifierConfig;
use crate::error::AppError;
use crate::models::task::Task;

/// Shared application state: configuration plus the in-memory task
/// snapshot store. Each task record is owned by exactly one pipeline.
pub struct AppState {
    pub config: ClassifierConfig,
    tasks: Mutex<HashMap<String, Task>>,
    task_sequence: AtomicU64,
}

impl AppState {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            config,
            tasks: Mutex::new(HashMap::new()),
            task_sequence: AtomicU64::new(0),
        }
    }

    fn next_task_sequence(&self) -> u64 {
        self.task_sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn get_task(&self, task_id: &str) -> Option<Task> {
        let tasks = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        tasks.get(task_id).cloned()
    }

    /// Replace the stored snapshot for `task.task_id` as a whole. Once the
    /// stored snapshot is terminal it is never overwritten.
    pub fn publish_task(&self, mut task: Task) -> Result<Task, AppError> {
        let mut tasks = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = tasks.get(&task.task_id) {
            if previous.is_terminal() {
                return Err(AppError::InvalidTransition(format!(
                    "task {} is already {}",
                    previous.task_id, previous.stage
                )));
            }
        }
        task.sequence = self.next_task_sequence();
        tasks.insert(task.task_id.clone(), task.clone());
        Ok(task)
    }

    #[cfg(test)]
    pub(crate) fn task_ids(&self) -> Vec<String> {
        let tasks = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        tasks.keys().cloned().collect()
    }
}

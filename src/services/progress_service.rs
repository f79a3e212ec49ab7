use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::task::{Task, TaskStage};

pub const SCANNING_PROGRESS: u8 = 10;
const COLLECTING_START: usize = 30;
const COLLECTING_SPAN: usize = 30;
pub const AI_ANALYZING_START: u8 = 70;
const AI_ANALYZING_SPAN: usize = 20;
pub const PROCESSING_PROGRESS: u8 = 90;
/// Per-batch guess used before any batch has finished.
pub const FIRST_BATCH_ESTIMATE_SECS: f64 = 90.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressEstimate {
    pub percentage: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<f64>,
}

pub fn ratio_percent(processed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    ((processed as f64 / total as f64) * 100.0)
        .round()
        .clamp(0.0, 100.0) as u8
}

/// Overall progress for a task snapshot. A producer-supplied
/// `stage_progress` always wins over the file ratio.
pub fn estimate(task: &Task) -> ProgressEstimate {
    let percentage = match task.stage_progress {
        Some(progress) => progress.min(100),
        None => ratio_percent(task.processed_files, task.total_files),
    };
    let eta_seconds = match task.stage {
        TaskStage::AiAnalyzing => task.estimated_remaining_time.map(|eta| eta.max(0.0)),
        _ => None,
    };
    ProgressEstimate {
        percentage,
        eta_seconds,
    }
}

pub fn collecting_progress(processed: usize, total: usize) -> u8 {
    if total == 0 {
        return COLLECTING_START as u8;
    }
    let within = (processed.min(total) * COLLECTING_SPAN) / total;
    (COLLECTING_START + within) as u8
}

pub fn ai_batch_progress(batch_index: usize, total_batches: usize) -> u8 {
    if total_batches == 0 {
        return AI_ANALYZING_START;
    }
    let within = (batch_index.min(total_batches) * AI_ANALYZING_SPAN) / total_batches;
    AI_ANALYZING_START + within as u8
}

/// Durations of finished classifier batches. Derived figures are always
/// recomputed from the full history.
#[derive(Debug, Clone, Default)]
pub struct BatchTimer {
    durations: Vec<f64>,
}

impl BatchTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, elapsed: Duration) {
        self.durations.push(elapsed.as_secs_f64());
    }

    pub fn completed(&self) -> usize {
        self.durations.len()
    }

    pub fn average(&self) -> Option<f64> {
        if self.durations.is_empty() {
            return None;
        }
        Some(self.durations.iter().sum::<f64>() / self.durations.len() as f64)
    }

    pub fn estimated_remaining(&self, total_batches: usize) -> Option<f64> {
        let remaining = total_batches.saturating_sub(self.completed());
        self.average().map(|avg| avg * remaining as f64)
    }

    pub fn total(&self) -> f64 {
        self.durations.iter().sum()
    }
}

/// Human-readable bucketing of a duration in seconds.
pub fn format_duration(secs: f64) -> String {
    let secs = secs.max(0.0) as u64;
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationItem {
    pub source_path: String,
    pub target_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MigrationOutcome {
    Success,
    Skipped { reason: String },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub source: String,
    pub target: String,
    #[serde(flatten)]
    pub outcome: MigrationOutcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationSummary {
    pub total: usize,
    pub success: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Per-item outcomes plus the aggregate counts. The summary is always
/// derived from the records, so it accounts for every input item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationResult {
    pub records: Vec<MigrationRecord>,
    pub summary: MigrationSummary,
}

impl MigrationResult {
    pub fn from_records(records: Vec<MigrationRecord>) -> Self {
        let mut summary = MigrationSummary {
            total: records.len(),
            ..Default::default()
        };
        for record in &records {
            match record.outcome {
                MigrationOutcome::Success => summary.success += 1,
                MigrationOutcome::Skipped { .. } => summary.skipped += 1,
                MigrationOutcome::Failed { .. } => summary.failed += 1,
            }
        }
        Self { records, summary }
    }
}

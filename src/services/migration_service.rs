use std::fs;
use std::path::Path;

use crate::error::AppError;
use crate::models::migration::{MigrationItem, MigrationOutcome, MigrationRecord, MigrationResult};

pub const TARGET_EXISTS: &str = "target exists";

/// Move every item independently. Failures are recorded and never stop the
/// run, so the summary always accounts for each input item.
pub fn execute(items: &[MigrationItem]) -> MigrationResult {
    let mut records = Vec::with_capacity(items.len());
    for item in items {
        let outcome = migrate_one(item);
        match &outcome {
            MigrationOutcome::Success => {
                tracing::info!(source = %item.source_path, target = %item.target_path, "migrated")
            }
            MigrationOutcome::Skipped { reason } => {
                tracing::info!(source = %item.source_path, target = %item.target_path, reason = %reason, "skipped")
            }
            MigrationOutcome::Failed { error } => {
                tracing::warn!(source = %item.source_path, target = %item.target_path, error = %error, "migration failed")
            }
        }
        records.push(MigrationRecord {
            source: item.source_path.clone(),
            target: item.target_path.clone(),
            outcome,
        });
    }

    let result = MigrationResult::from_records(records);
    tracing::info!(
        total = result.summary.total,
        success = result.summary.success,
        skipped = result.summary.skipped,
        failed = result.summary.failed,
        "migration finished"
    );
    result
}

fn migrate_one(item: &MigrationItem) -> MigrationOutcome {
    if item.source_path.trim().is_empty() || item.target_path.trim().is_empty() {
        return MigrationOutcome::Failed {
            error: format!(
                "incomplete paths: source={:?}, target={:?}",
                item.source_path, item.target_path
            ),
        };
    }

    let target = Path::new(&item.target_path);
    if target.exists() {
        return MigrationOutcome::Skipped {
            reason: TARGET_EXISTS.to_string(),
        };
    }

    match move_file(Path::new(&item.source_path), target) {
        Ok(()) => MigrationOutcome::Success,
        Err(e) => MigrationOutcome::Failed {
            error: e.to_string(),
        },
    }
}

fn move_file(source: &Path, target: &Path) -> Result<(), AppError> {
    if !source.exists() {
        return Err(AppError::General(format!(
            "source file does not exist: {}",
            source.display()
        )));
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(source, target)?;
    Ok(())
}

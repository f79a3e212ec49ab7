use std::collections::HashSet;

use serde::Serialize;

use crate::models::classification::{ClassificationPlan, DiscussionPoint, MappingTableEntry};
use crate::models::migration::MigrationItem;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionItem {
    AmbiguousEntry(MappingTableEntry),
    Discussion(DiscussionPoint),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AmbiguityPartition {
    pub migratable: Vec<MappingTableEntry>,
    pub needs_decision: Vec<DecisionItem>,
}

impl AmbiguityPartition {
    pub fn migration_items(&self) -> Vec<MigrationItem> {
        to_migration_items(&self.migratable)
    }
}

fn is_marked(entry: &MappingTableEntry, marker: &str) -> bool {
    entry.is_ambiguous() || (!marker.is_empty() && entry.new_directory.contains(marker))
}

/// Split a plan into entries safe to migrate and items needing a manual
/// decision. Marked entries and entries named by a valid discussion point
/// never reach `migratable`. `needs_decision` holds every marked entry plus
/// every valid discussion point, without de-duplication.
pub fn partition(plan: &ClassificationPlan, marker: &str) -> AmbiguityPartition {
    let discussed: Vec<&DiscussionPoint> = plan
        .discussion_points
        .iter()
        .filter(|point| point.is_valid())
        .collect();
    let discussed_names: HashSet<&str> = discussed
        .iter()
        .map(|point| point.filename.trim())
        .collect();

    let mut out = AmbiguityPartition::default();
    for entry in &plan.mapping_table {
        if is_marked(entry, marker) {
            out.needs_decision
                .push(DecisionItem::AmbiguousEntry(entry.clone()));
        } else if !discussed_names.contains(entry.filename.trim()) {
            out.migratable.push(entry.clone());
        }
    }
    out.needs_decision.extend(
        discussed
            .into_iter()
            .map(|point| DecisionItem::Discussion(point.clone())),
    );
    out
}

pub fn to_migration_items(entries: &[MappingTableEntry]) -> Vec<MigrationItem> {
    entries
        .iter()
        .map(|entry| MigrationItem {
            source_path: entry.source_path.clone(),
            target_path: entry.new_directory.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::classification::{FileInfo, Resolution};

    const MARKER: &str = "(ambiguous)";

    fn entry(filename: &str, new_directory: &str) -> MappingTableEntry {
        MappingTableEntry {
            source_path: format!("/inbox/{filename}"),
            filename: filename.into(),
            original_directory: "inbox".into(),
            new_directory: new_directory.into(),
            file_info: FileInfo::default(),
            status: MappingTableEntry::resolve_status(new_directory, MARKER),
        }
    }

    fn point(filename: &str, suggestion: &str) -> DiscussionPoint {
        DiscussionPoint {
            filename: filename.into(),
            suggestion: suggestion.into(),
        }
    }

    #[test]
    fn marked_entries_need_decision() {
        let plan = ClassificationPlan {
            mapping_table: vec![
                entry("a.txt", "/t/Projects/A/a.txt"),
                entry("b.txt", "/t/Projects/(ambiguous)/b.txt"),
            ],
            ..Default::default()
        };
        let parts = partition(&plan, MARKER);
        assert_eq!(parts.migratable.len(), 1);
        assert_eq!(parts.migratable[0].filename, "a.txt");
        assert_eq!(parts.needs_decision.len(), 1);
        assert!(parts
            .migratable
            .iter()
            .all(|e| !e.new_directory.contains(MARKER)));
    }

    #[test]
    fn untagged_marker_is_still_caught() {
        let mut raw = entry("c.txt", "/t/Areas/(ambiguous)/c.txt");
        raw.status = Resolution::Resolved;
        let plan = ClassificationPlan {
            mapping_table: vec![raw],
            ..Default::default()
        };
        let parts = partition(&plan, MARKER);
        assert!(parts.migratable.is_empty());
        assert_eq!(parts.needs_decision.len(), 1);
    }

    #[test]
    fn discussion_points_are_additive() {
        let plan = ClassificationPlan {
            mapping_table: vec![
                entry("a.txt", "/t/Projects/A/a.txt"),
                entry("b.txt", "/t/Projects/(ambiguous)/b.txt"),
                entry("c.txt", "/t/Areas/C/c.txt"),
            ],
            discussion_points: vec![
                point("b.txt", "Projects or Archive?"),
                point("c.txt", "might be a resource"),
                point("", "no file"),
                point("d.txt", ""),
            ],
            ..Default::default()
        };
        let parts = partition(&plan, MARKER);
        assert_eq!(parts.migratable.len(), 1);
        assert_eq!(parts.migratable[0].filename, "a.txt");
        // one marked entry + two valid discussion points
        assert_eq!(parts.needs_decision.len(), 3);
        assert!(parts.migratable.len() + parts.needs_decision.len() >= plan.mapping_table.len());
    }

    #[test]
    fn migration_items_use_source_and_destination() {
        let plan = ClassificationPlan {
            mapping_table: vec![entry("a.txt", "/t/Projects/A/a.txt")],
            ..Default::default()
        };
        let items = partition(&plan, MARKER).migration_items();
        assert_eq!(
            items,
            vec![MigrationItem {
                source_path: "/inbox/a.txt".into(),
                target_path: "/t/Projects/A/a.txt".into(),
            }]
        );
    }
}

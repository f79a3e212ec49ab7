use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::error::AppError;
use crate::models::classification::{
    directory_portion, ClassificationFragment, ClassificationPlan, DirectoryStructure,
    DiscussionPoint, FileInfo, MappingTableEntry, RawMappingRow, Resolution,
};
use crate::models::file_entry::FileDescriptor;
use crate::services::scan_service;

pub const STANDARD_PARA_DIRS: [&str; 4] = ["01-Projects", "02-Areas", "03-Resources", "04-Archives"];
pub const MISSING_FILE_SUGGESTION: &str =
    "not covered by any classifier response; classify this file manually";

const PROJECT_DIR_HINTS: &[&str] = &["project", "项目", "01-", "10-"];
const AREA_DIR_HINTS: &[&str] = &["area", "领域", "02-", "20-"];
const RESOURCE_DIR_HINTS: &[&str] = &["resource", "资源", "03-", "30-"];
const ARCHIVE_DIR_HINTS: &[&str] = &["archive", "归档", "04-", "40-"];

const PROJECT_FILE_HINTS: &[&str] = &["项目", "project", "复盘", "总结", "经验"];
const RESOURCE_FILE_HINTS: &[&str] = &["教程", "tutorial", "指南", "guide", "模板", "template"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParaCategory {
    Project,
    Area,
    Resource,
    Archive,
}

impl ParaCategory {
    fn dir_hints(self) -> &'static [&'static str] {
        match self {
            Self::Project => PROJECT_DIR_HINTS,
            Self::Area => AREA_DIR_HINTS,
            Self::Resource => RESOURCE_DIR_HINTS,
            Self::Archive => ARCHIVE_DIR_HINTS,
        }
    }
}

// ---------------------------------------------------------------------------
// Target scaffolding
// ---------------------------------------------------------------------------

/// Existing target layout, creating the standard PARA directories first when
/// the target has no sub-directories at all.
pub fn ensure_para_scaffold(target: &str) -> Result<Vec<(String, Vec<String>)>, AppError> {
    let existing = scan_service::scan_target_structure(target);
    if !existing.is_empty() {
        return Ok(existing);
    }
    for name in STANDARD_PARA_DIRS {
        fs::create_dir_all(Path::new(target).join(name))?;
    }
    tracing::info!(target, "created standard PARA directories");
    Ok(scan_service::scan_target_structure(target))
}

// ---------------------------------------------------------------------------
// Union of batch fragments
// ---------------------------------------------------------------------------

/// Fold batch fragments into one. Mapping rows are de-duplicated by file
/// identity with the first occurrence winning; trees are merged and
/// discussion points concatenated.
pub fn union_fragments(fragments: Vec<ClassificationFragment>) -> ClassificationFragment {
    let mut seen = HashSet::new();
    let mut out = ClassificationFragment::default();
    for fragment in fragments {
        for row in fragment.mapping_table {
            if seen.insert((row.filename.clone(), row.original_directory.clone())) {
                out.mapping_table.push(row);
            }
        }
        out.directory_structure.merge(fragment.directory_structure);
        out.discussion_points.extend(fragment.discussion_points);
    }
    out
}

// ---------------------------------------------------------------------------
// Validation and repair
// ---------------------------------------------------------------------------

fn has_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

fn first_dir_for(category: ParaCategory, existing: &[String]) -> Option<&str> {
    existing
        .iter()
        .find(|dir| has_any(&dir.to_lowercase(), category.dir_hints()))
        .map(String::as_str)
}

/// Best existing top-level directory for a file whose proposed top-level
/// directory does not exist. File name hints win over the proposed name.
fn best_top_level<'a>(filename: &str, proposed: &str, existing: &'a [String]) -> Option<&'a str> {
    let filename = filename.to_lowercase();
    let proposed = proposed.to_lowercase();
    let category = if has_any(&filename, PROJECT_FILE_HINTS) {
        Some(ParaCategory::Project)
    } else if has_any(&filename, RESOURCE_FILE_HINTS) {
        Some(ParaCategory::Resource)
    } else if has_any(&proposed, &["project", "项目"]) {
        Some(ParaCategory::Project)
    } else if has_any(&proposed, &["area", "领域"]) {
        Some(ParaCategory::Area)
    } else if has_any(&proposed, &["resource", "资源"]) {
        Some(ParaCategory::Resource)
    } else if has_any(&proposed, &["archive", "归档"]) {
        Some(ParaCategory::Archive)
    } else {
        None
    };
    category
        .and_then(|c| first_dir_for(c, existing))
        .or_else(|| existing.first().map(String::as_str))
}

/// Rewrite a proposed destination so it lives under `base` inside an
/// existing top-level directory and ends with the file name.
pub fn repair_destination(proposed: &str, filename: &str, base: &str, existing: &[String]) -> String {
    let base = base.trim_end_matches('/');
    let proposed = proposed.trim();
    let mut segments: Vec<&str> = match proposed.strip_prefix(base) {
        Some(rest) if !base.is_empty() && (rest.is_empty() || rest.starts_with('/')) => {
            rest.split('/').filter(|s| !s.is_empty()).collect()
        }
        _ => {
            // Outside the target root: keep whatever follows a known
            // top-level directory, otherwise only the file name.
            let all: Vec<&str> = proposed.split('/').filter(|s| !s.is_empty()).collect();
            match all.iter().position(|s| existing.iter().any(|d| d == s)) {
                Some(idx) => all[idx..].to_vec(),
                None => {
                    let hint = all.iter().rev().nth(1).copied().unwrap_or_default();
                    let mut repaired = Vec::new();
                    if let Some(top) = best_top_level(filename, hint, existing) {
                        repaired.push(top);
                    }
                    repaired
                }
            }
        }
    };

    if segments.last().copied() != Some(filename) {
        segments.push(filename);
    }
    if segments.len() == 1 || !existing.iter().any(|d| d == segments[0]) {
        let proposed_top = if segments.len() > 1 { segments[0] } else { "" };
        if let Some(top) = best_top_level(filename, proposed_top, existing) {
            if segments.len() > 1 {
                segments[0] = top;
            } else {
                segments.insert(0, top);
            }
        }
    }

    format!("{base}/{}", segments.join("/"))
}

// ---------------------------------------------------------------------------
// Plan assembly
// ---------------------------------------------------------------------------

fn match_file(row: &RawMappingRow, files: &[FileDescriptor], taken: &[bool]) -> Option<usize> {
    let free = |idx: &usize| !taken[*idx];
    (0..files.len())
        .filter(free)
        .find(|&idx| {
            files[idx].name == row.filename && files[idx].original_directory == row.original_directory
        })
        .or_else(|| (0..files.len()).filter(free).find(|&idx| files[idx].name == row.filename))
}

/// Validate the unioned classifier output into a plan with exactly one row
/// per collected file. Files the classifier never mentioned become
/// discussion points instead of rows.
pub fn build_plan(
    union: ClassificationFragment,
    files: &[FileDescriptor],
    existing: &[(String, Vec<String>)],
    target_base_path: &str,
    ambiguity_marker: &str,
) -> ClassificationPlan {
    let existing_dirs: Vec<String> = existing.iter().map(|(name, _)| name.clone()).collect();
    let base = target_base_path.trim_end_matches('/');
    let mut taken = vec![false; files.len()];
    let mut mapping_table = Vec::with_capacity(files.len());
    let mut repaired = 0usize;

    for row in union.mapping_table {
        let Some(idx) = match_file(&row, files, &taken) else {
            tracing::warn!(filename = %row.filename, "classifier returned a file that was not collected");
            continue;
        };
        taken[idx] = true;
        let file = &files[idx];
        // Marked rows keep their raw destination so the marker survives.
        let status = MappingTableEntry::resolve_status(&row.new_directory, ambiguity_marker);
        let new_directory = match status {
            Resolution::Ambiguous { .. } => row.new_directory.clone(),
            Resolution::Resolved => {
                repair_destination(&row.new_directory, &file.name, base, &existing_dirs)
            }
        };
        if new_directory != row.new_directory {
            repaired += 1;
        }
        mapping_table.push(MappingTableEntry {
            status,
            source_path: file.path.clone(),
            filename: file.name.clone(),
            original_directory: file.original_directory.clone(),
            new_directory,
            file_info: FileInfo {
                name: file.name.clone(),
                extension: file.extension.clone(),
                size: file.size,
            },
        });
    }
    if repaired > 0 {
        tracing::info!(repaired, "repaired classifier destinations");
    }

    let mut discussion_points = union.discussion_points;
    for (file, _) in files.iter().zip(&taken).filter(|(_, taken)| !**taken) {
        tracing::warn!(file = %file.path, "file missing from every classifier response");
        discussion_points.push(DiscussionPoint {
            filename: file.name.clone(),
            suggestion: MISSING_FILE_SUGGESTION.to_string(),
        });
    }

    let directory_structure = derive_structure(&mapping_table, union.directory_structure, base, &existing_dirs);

    ClassificationPlan {
        mapping_table,
        directory_structure,
        discussion_points,
    }
}

/// Tree built from every destination, merged with the classifier's own tree
/// restricted to existing top-level directories.
fn derive_structure(
    entries: &[MappingTableEntry],
    proposed: DirectoryStructure,
    base: &str,
    existing_dirs: &[String],
) -> DirectoryStructure {
    let mut tree = DirectoryStructure::new();
    for (key, node) in proposed.iter() {
        if existing_dirs.iter().any(|d| d == key) {
            tree.insert(key.clone(), node.clone());
        }
    }

    let mut derived = DirectoryStructure::new();
    for entry in entries {
        let directory = directory_portion(&entry.new_directory);
        let Some(relative) = directory.strip_prefix(base) else {
            continue;
        };
        let segments: Vec<&str> = relative.split('/').filter(|s| !s.is_empty()).collect();
        match segments.first() {
            Some(top) if existing_dirs.iter().any(|d| d == top) => {}
            _ => continue,
        }
        derived.insert_file(&segments, &entry.filename);
    }
    tree.merge(derived);
    tree
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::classification::DirectoryNode;
    use serde_json::json;

    const MARKER: &str = "(ambiguous)";

    fn existing() -> Vec<(String, Vec<String>)> {
        STANDARD_PARA_DIRS
            .iter()
            .map(|d| (d.to_string(), Vec::new()))
            .collect()
    }

    fn dirs() -> Vec<String> {
        STANDARD_PARA_DIRS.iter().map(|d| d.to_string()).collect()
    }

    fn file(name: &str, dir: &str) -> FileDescriptor {
        FileDescriptor {
            path: format!("/src/{dir}/{name}"),
            name: name.into(),
            extension: ".md".into(),
            size: 3,
            modified_time: None,
            original_directory: dir.into(),
            content_preview: String::new(),
        }
    }

    fn row(filename: &str, dir: &str, new_directory: &str) -> RawMappingRow {
        RawMappingRow {
            filename: filename.into(),
            original_directory: dir.into(),
            new_directory: new_directory.into(),
        }
    }

    #[test]
    fn scaffold_created_only_for_empty_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().to_string_lossy().to_string();
        let structure = ensure_para_scaffold(&target).unwrap();
        let names: Vec<&str> = structure.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, STANDARD_PARA_DIRS.to_vec());

        let other = tempfile::tempdir().unwrap();
        fs::create_dir_all(other.path().join("Work")).unwrap();
        let structure = ensure_para_scaffold(&other.path().to_string_lossy()).unwrap();
        assert_eq!(structure, vec![("Work".to_string(), Vec::new())]);
        assert!(!other.path().join("01-Projects").exists());
    }

    #[test]
    fn union_keeps_first_row_per_file() {
        let first = ClassificationFragment {
            mapping_table: vec![row("a.md", "in", "/t/01-Projects/X/a.md")],
            directory_structure: serde_json::from_value(json!({"01-Projects": {"X": ["a.md"]}})).unwrap(),
            discussion_points: vec![],
        };
        let second = ClassificationFragment {
            mapping_table: vec![
                row("a.md", "in", "/t/04-Archives/a.md"),
                row("b.md", "in", "/t/02-Areas/b.md"),
            ],
            directory_structure: serde_json::from_value(json!({"01-Projects": {"X": ["b.md"]}})).unwrap(),
            discussion_points: vec![DiscussionPoint {
                filename: "b.md".into(),
                suggestion: "maybe".into(),
            }],
        };
        let union = union_fragments(vec![first, second]);
        assert_eq!(union.mapping_table.len(), 2);
        assert_eq!(union.mapping_table[0].new_directory, "/t/01-Projects/X/a.md");
        assert_eq!(union.discussion_points.len(), 1);
        assert_eq!(
            serde_json::to_value(&union.directory_structure).unwrap(),
            json!({"01-Projects": {"X": ["a.md", "b.md"]}})
        );
    }

    #[test]
    fn valid_destination_is_untouched() {
        let out = repair_destination("/t/01-Projects/Web/a.md", "a.md", "/t", &dirs());
        assert_eq!(out, "/t/01-Projects/Web/a.md");
    }

    #[test]
    fn unknown_top_level_is_repaired_by_keywords() {
        let out = repair_destination("/t/Projects/Web/a.md", "a.md", "/t", &dirs());
        assert_eq!(out, "/t/01-Projects/Web/a.md");
        let out = repair_destination("/t/Stuff/rust-tutorial.md", "rust-tutorial.md", "/t", &dirs());
        assert_eq!(out, "/t/03-Resources/rust-tutorial.md");
        let out = repair_destination("/t/Old/x.md", "x.md", "/t", &dirs());
        assert_eq!(out, "/t/01-Projects/x.md");
    }

    #[test]
    fn destination_outside_root_is_pulled_in() {
        let out = repair_destination("/elsewhere/02-Areas/Health/h.md", "h.md", "/t", &dirs());
        assert_eq!(out, "/t/02-Areas/Health/h.md");
        let out = repair_destination("/elsewhere/archive/h.md", "h.md", "/t", &dirs());
        assert_eq!(out, "/t/04-Archives/h.md");
    }

    #[test]
    fn missing_file_name_is_appended() {
        let out = repair_destination("/t/02-Areas/Health", "h.md", "/t/", &dirs());
        assert_eq!(out, "/t/02-Areas/Health/h.md");
    }

    #[test]
    fn build_plan_covers_every_file() {
        let files = vec![
            file("a.md", "in"),
            file("b.md", "in"),
            file("c.md", "other"),
        ];
        let union = ClassificationFragment {
            mapping_table: vec![
                row("a.md", "in", "/t/01-Projects/Web/a.md"),
                row("b.md", "in", "/t/02-Areas/(ambiguous)/b.md"),
                row("ghost.md", "in", "/t/02-Areas/ghost.md"),
            ],
            directory_structure: serde_json::from_value(json!({
                "01-Projects": {"Web": []},
                "Invented": {"X": []}
            }))
            .unwrap(),
            discussion_points: vec![],
        };

        let plan = build_plan(union, &files, &existing(), "/t", MARKER);
        assert_eq!(plan.mapping_table.len(), 2);
        assert_eq!(plan.mapping_table[0].source_path, "/src/in/a.md");
        assert!(!plan.mapping_table[0].is_ambiguous());
        assert!(plan.mapping_table[1].is_ambiguous());
        assert_eq!(plan.mapping_table[1].file_info.size, 3);

        assert_eq!(plan.discussion_points.len(), 1);
        assert_eq!(plan.discussion_points[0].filename, "c.md");
        assert_eq!(plan.discussion_points[0].suggestion, MISSING_FILE_SUGGESTION);

        assert!(plan.directory_structure.get("Invented").is_none());
        let Some(DirectoryNode::Tree(projects)) = plan.directory_structure.get("01-Projects") else {
            panic!("01-Projects should be a subtree");
        };
        assert_eq!(
            projects.get("Web"),
            Some(&DirectoryNode::Files(vec!["a.md".to_string()]))
        );
    }

    #[test]
    fn duplicate_names_match_by_original_directory() {
        let files = vec![file("notes.md", "work"), file("notes.md", "home")];
        let union = ClassificationFragment {
            mapping_table: vec![
                row("notes.md", "home", "/t/02-Areas/Home/notes.md"),
                row("notes.md", "work", "/t/01-Projects/Work/notes.md"),
            ],
            ..Default::default()
        };
        let plan = build_plan(union, &files, &existing(), "/t", MARKER);
        assert_eq!(plan.mapping_table[0].source_path, "/src/home/notes.md");
        assert_eq!(plan.mapping_table[1].source_path, "/src/work/notes.md");
        assert!(plan.discussion_points.is_empty());
    }

    #[test]
    fn marked_destinations_stay_ambiguous_without_repair() {
        let marker = "(歧义，需讨论)";
        let raw = [
            "/t/(歧义，需讨论)/b.md",
            "02-Areas(歧义，需讨论)/b.md",
            "/other/Health(歧义，需讨论)/b.md",
            "/t/02-Areas/(歧义，需讨论)/b.md",
        ];
        for destination in raw {
            let union = ClassificationFragment {
                mapping_table: vec![row("b.md", "in", destination)],
                ..Default::default()
            };
            let plan = build_plan(union, &[file("b.md", "in")], &existing(), "/t", marker);
            let entry = &plan.mapping_table[0];
            assert!(entry.is_ambiguous(), "{destination} lost its marker");
            assert_eq!(entry.new_directory, destination);
            assert!(plan.directory_structure.get("(歧义，需讨论)").is_none());

            let partition = crate::services::ambiguity_service::partition(&plan, marker);
            assert!(partition.migratable.is_empty(), "{destination} became migratable");
            assert_eq!(partition.needs_decision.len(), 1);
        }
    }
}

//! Reconciles the flat mapping table with the nested directory proposal:
//! infers the common base path, derives per-file category levels and tags
//! tree nodes the classifier invented.

use serde::{Deserialize, Serialize};

use crate::models::classification::{
    directory_portion, ClassificationPlan, DirectoryNode, DirectoryStructure, MappingTableEntry,
    FILES_KEY,
};

/// Canonical PARA category names, matched as substrings so that
/// numbered or suffixed folder names ("01-Projects", "04-Archives") count.
pub const PARA_CATEGORIES: [&str; 4] = ["Projects", "Areas", "Resources", "Archive"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryLevels {
    pub level1: String,
    pub level2: String,
    pub level3: String,
}

impl CategoryLevels {
    fn from_segments<'a>(mut segments: impl Iterator<Item = &'a str>) -> Self {
        Self {
            level1: segments.next().unwrap_or_default().to_string(),
            level2: segments.next().unwrap_or_default().to_string(),
            level3: segments.next().unwrap_or_default().to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.level1.is_empty() && self.level2.is_empty() && self.level3.is_empty()
    }
}

fn normalize(path: &str) -> String {
    path.trim().replace('\\', "/")
}

/// Base path under which `tree` is rooted, inferred from the mapping
/// table. Walking a destination from its deepest directory towards the
/// root, the first segment naming a top-level key of `tree` marks the
/// boundary; everything before it is the base path. Empty when no entry's
/// destination contains a top-level key.
pub fn target_base_path(mapping: &[MappingTableEntry], tree: &DirectoryStructure) -> String {
    if tree.is_empty() {
        return String::new();
    }
    let keys = tree.top_level_keys();
    for entry in mapping {
        let destination = normalize(&entry.new_directory);
        let segments: Vec<&str> = directory_portion(&destination).split('/').collect();
        let boundary = segments
            .iter()
            .rposition(|segment| !segment.is_empty() && keys.contains(segment));
        let Some(idx) = boundary else {
            continue;
        };
        let base = segments[..idx].join("/");
        if base.is_empty() && destination.starts_with('/') {
            return "/".to_string();
        }
        return base;
    }
    String::new()
}

/// Category levels of `file_path` relative to `base_path`. Falls back to a
/// substring search over the tree's top-level keys when `base_path` is
/// empty; never fails, unresolvable input yields empty levels.
pub fn extract_category(
    file_path: &str,
    base_path: &str,
    tree: &DirectoryStructure,
) -> CategoryLevels {
    let path = normalize(file_path);
    if base_path.is_empty() {
        return extract_category_degraded(&path, tree);
    }

    let directory = directory_portion(&path);
    let Some(idx) = directory.find(base_path) else {
        return CategoryLevels::default();
    };
    let relative = &directory[idx + base_path.len()..];
    let relative = relative.strip_prefix('/').unwrap_or(relative);
    CategoryLevels::from_segments(relative.split('/').filter(|s| !s.is_empty()))
}

fn extract_category_degraded(path: &str, tree: &DirectoryStructure) -> CategoryLevels {
    for key in tree.top_level_keys() {
        if key.is_empty() || key == FILES_KEY {
            continue;
        }
        let Some(idx) = path.find(key) else {
            continue;
        };
        let rest = &path[idx + key.len()..];
        let mut tail: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
        // The last segment is the file name.
        tail.pop();
        return CategoryLevels {
            level1: key.to_string(),
            level2: tail.first().copied().unwrap_or_default().to_string(),
            level3: tail.get(1).copied().unwrap_or_default().to_string(),
        };
    }
    CategoryLevels::default()
}

pub fn is_canonical_para(key: &str) -> bool {
    PARA_CATEGORIES.iter().any(|category| key.contains(category))
}

/// Directory and file-list nodes below the top level are presumed new;
/// the tree is generated fresh for every task.
pub fn is_new_folder(key: &str, depth: usize, node: &DirectoryNode) -> bool {
    let top_level_canonical = depth == 0 && is_canonical_para(key);
    let is_folder = matches!(node, DirectoryNode::Tree(_) | DirectoryNode::Files(_));
    !top_level_canonical && depth > 0 && is_folder
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TreeEntry {
    File {
        name: String,
    },
    FileList {
        name: String,
        is_new: bool,
        files: Vec<String>,
    },
    Directory {
        name: String,
        is_new: bool,
        canonical: bool,
        children: Vec<TreeEntry>,
    },
}

/// Render the proposal for display. Loose files kept under the reserved
/// key are emitted next to their sibling sub-directories.
pub fn render_tree(tree: &DirectoryStructure) -> Vec<TreeEntry> {
    render_level(tree, 0)
}

fn render_level(tree: &DirectoryStructure, depth: usize) -> Vec<TreeEntry> {
    let mut out = Vec::with_capacity(tree.len());
    for (key, node) in tree.iter() {
        if key == FILES_KEY {
            continue;
        }
        let is_new = is_new_folder(key, depth, node);
        let entry = match node {
            DirectoryNode::File(name) => TreeEntry::File { name: name.clone() },
            DirectoryNode::Files(files) => TreeEntry::FileList {
                name: key.clone(),
                is_new,
                files: files.clone(),
            },
            DirectoryNode::Tree(child) => {
                let mut children = render_level(child, depth + 1);
                children.extend(
                    child
                        .loose_files()
                        .iter()
                        .map(|name| TreeEntry::File { name: name.clone() }),
                );
                TreeEntry::Directory {
                    name: key.clone(),
                    is_new,
                    canonical: depth == 0 && is_canonical_para(key),
                    children,
                }
            }
        };
        out.push(entry);
    }
    out
}

/// Descend into `tree` along `base_path` when the proposal was rooted at
/// the filesystem root. Returns `tree` itself when the path cannot be
/// followed.
pub fn locate_target_subtree<'a>(
    tree: &'a DirectoryStructure,
    base_path: &str,
) -> &'a DirectoryStructure {
    let mut current = tree;
    for part in base_path.split('/').filter(|p| !p.trim().is_empty()) {
        match current.get(part) {
            Some(DirectoryNode::Tree(child)) => current = child,
            _ => return tree,
        }
    }
    current
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciledRow {
    pub filename: String,
    pub source_path: String,
    pub new_directory: String,
    pub levels: CategoryLevels,
    pub ambiguous: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciledView {
    pub base_path: String,
    pub rows: Vec<ReconciledRow>,
    pub tree: Vec<TreeEntry>,
}

/// Derived, read-only view over a completed plan.
pub fn reconcile(plan: &ClassificationPlan) -> ReconciledView {
    let base_path = target_base_path(&plan.mapping_table, &plan.directory_structure);
    let rows = plan
        .mapping_table
        .iter()
        .map(|entry| ReconciledRow {
            filename: entry.filename.clone(),
            source_path: entry.source_path.clone(),
            new_directory: entry.new_directory.clone(),
            levels: extract_category(&entry.new_directory, &base_path, &plan.directory_structure),
            ambiguous: entry.is_ambiguous(),
        })
        .collect();
    let subtree = locate_target_subtree(&plan.directory_structure, &base_path);
    ReconciledView {
        tree: render_tree(subtree),
        base_path,
        rows,
    }
}

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

/// Reserved key holding the loose files of a directory that also has
/// sub-directories.
pub const FILES_KEY: &str = "__files__";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub extension: String,
    pub size: u64,
}

/// Whether a mapping row is safe to migrate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Resolution {
    Resolved,
    Ambiguous { reason: String },
}

/// One validated classification decision for a single source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingTableEntry {
    pub source_path: String,
    pub filename: String,
    pub original_directory: String,
    pub new_directory: String,
    pub file_info: FileInfo,
    pub status: Resolution,
}

impl MappingTableEntry {
    /// The ambiguity marker embedded in `new_directory` is an
    /// external-format convention; it is lifted into `status` here.
    pub fn resolve_status(new_directory: &str, ambiguity_marker: &str) -> Resolution {
        if !ambiguity_marker.is_empty() && new_directory.contains(ambiguity_marker) {
            Resolution::Ambiguous {
                reason: format!("destination marked {ambiguity_marker}"),
            }
        } else {
            Resolution::Resolved
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self.status, Resolution::Ambiguous { .. })
    }

    /// Directory part of `new_directory` (everything before the last `/`).
    pub fn target_directory(&self) -> &str {
        directory_portion(&self.new_directory)
    }
}

pub fn directory_portion(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// A mapping row exactly as the classifier returned it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMappingRow {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub original_directory: String,
    #[serde(default)]
    pub new_directory: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscussionPoint {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub suggestion: String,
}

impl DiscussionPoint {
    pub fn is_valid(&self) -> bool {
        !self.filename.trim().is_empty() && !self.suggestion.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DirectoryNode {
    Tree(DirectoryStructure),
    Files(Vec<String>),
    File(String),
}

impl DirectoryNode {
    fn from_value(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Object(_) | serde_json::Value::Null => {
                Self::Tree(DirectoryStructure::from_value(value))
            }
            serde_json::Value::Array(items) => Self::Files(
                items
                    .iter()
                    .map(|item| match item {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
            ),
            serde_json::Value::String(s) => Self::File(s.clone()),
            other => Self::File(other.to_string()),
        }
    }
}

/// Nested proposal of the destination hierarchy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DirectoryStructure(BTreeMap<String, DirectoryNode>);

impl<'de> Deserialize<'de> for DirectoryStructure {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(Self::from_value(&value))
    }
}

impl DirectoryStructure {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lenient conversion: non-object input yields an empty tree.
    pub fn from_value(value: &serde_json::Value) -> Self {
        let mut out = BTreeMap::new();
        if let serde_json::Value::Object(map) = value {
            for (key, child) in map {
                out.insert(key.clone(), DirectoryNode::from_value(child));
            }
        }
        Self(out)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, key: &str) -> Option<&DirectoryNode> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, node: DirectoryNode) {
        self.0.insert(key.into(), node);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DirectoryNode)> {
        self.0.iter()
    }

    pub fn top_level_keys(&self) -> Vec<&str> {
        self.0.keys().map(String::as_str).collect()
    }

    /// Loose files stored under [`FILES_KEY`] at this level.
    pub fn loose_files(&self) -> &[String] {
        match self.0.get(FILES_KEY) {
            Some(DirectoryNode::Files(files)) => files,
            _ => &[],
        }
    }

    /// Record `file_name` inside the directory chain `segments`.
    pub fn insert_file(&mut self, segments: &[&str], file_name: &str) {
        let Some((last, parents)) = segments.split_last() else {
            return;
        };
        let mut leaf = DirectoryStructure::new();
        leaf.insert(*last, DirectoryNode::Files(vec![file_name.to_string()]));
        let nested = parents.iter().rev().fold(leaf, |child, parent| {
            let mut wrapper = DirectoryStructure::new();
            wrapper.insert(*parent, DirectoryNode::Tree(child));
            wrapper
        });
        self.merge(nested);
    }

    /// Union `source` into `self`. File lists are unioned; a file list
    /// meeting a subtree is folded into the subtree's [`FILES_KEY`].
    pub fn merge(&mut self, source: DirectoryStructure) {
        for (key, incoming) in source.0 {
            let merged = match (self.0.remove(&key), incoming) {
                (None, incoming) => incoming,
                (Some(DirectoryNode::Tree(mut existing)), DirectoryNode::Tree(incoming)) => {
                    existing.merge(incoming);
                    DirectoryNode::Tree(existing)
                }
                (Some(DirectoryNode::Files(existing)), DirectoryNode::Files(incoming)) => {
                    DirectoryNode::Files(union_files(existing, incoming))
                }
                (Some(DirectoryNode::Tree(mut existing)), DirectoryNode::Files(incoming)) => {
                    existing.add_loose_files(incoming);
                    DirectoryNode::Tree(existing)
                }
                (Some(DirectoryNode::Files(existing)), DirectoryNode::Tree(incoming)) => {
                    let mut tree = DirectoryStructure::new();
                    tree.add_loose_files(existing);
                    tree.merge(incoming);
                    DirectoryNode::Tree(tree)
                }
                (Some(_), incoming) => incoming,
            };
            self.0.insert(key, merged);
        }
    }

    fn add_loose_files(&mut self, files: Vec<String>) {
        let existing = match self.0.remove(FILES_KEY) {
            Some(DirectoryNode::Files(existing)) => existing,
            _ => Vec::new(),
        };
        self.0
            .insert(FILES_KEY.to_string(), DirectoryNode::Files(union_files(existing, files)));
    }
}

fn union_files(mut existing: Vec<String>, incoming: Vec<String>) -> Vec<String> {
    existing.extend(incoming);
    existing.sort();
    existing.dedup();
    existing
}

/// Final, validated result attached to a completed task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationPlan {
    pub mapping_table: Vec<MappingTableEntry>,
    pub directory_structure: DirectoryStructure,
    pub discussion_points: Vec<DiscussionPoint>,
}

/// What a single classifier batch returns. Coverage may be partial.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationFragment {
    #[serde(default)]
    pub mapping_table: Vec<RawMappingRow>,
    #[serde(default)]
    pub directory_structure: DirectoryStructure,
    #[serde(default)]
    pub discussion_points: Vec<DiscussionPoint>,
}

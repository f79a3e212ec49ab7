use serde::{Deserialize, Serialize};

/// One source file as produced by the collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub path: String,
    pub name: String,
    pub extension: String,
    pub size: u64,
    pub modified_time: Option<String>,
    pub original_directory: String,
    pub content_preview: String,
}

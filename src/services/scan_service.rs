use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::ClassifierConfig;
use crate::error::AppError;
use crate::models::file_entry::FileDescriptor;

const TEXT_EXTENSIONS: &[&str] = &[
    ".txt", ".md", ".py", ".js", ".html", ".css", ".json", ".xml", ".csv", ".doc", ".docx",
];
pub const NON_TEXT_PREVIEW: &str = "binary file, no preview available";

/// Enumerate every file under `root`, skipping excluded directory and file
/// names. Paths are returned sorted so enumeration is reproducible.
pub fn enumerate_files(root: &str, config: &ClassifierConfig) -> Result<Vec<PathBuf>, AppError> {
    let root_path = Path::new(root);
    if !root_path.exists() {
        return Err(AppError::Enumeration(format!(
            "source folder does not exist: {root}"
        )));
    }
    if !root_path.is_dir() {
        return Err(AppError::Enumeration(format!(
            "source path is not a directory: {root}"
        )));
    }
    std::fs::read_dir(root_path)
        .map_err(|e| AppError::Enumeration(format!("cannot read source folder {root}: {e}")))?;

    let mut files = Vec::new();
    let walker = WalkDir::new(root_path).into_iter().filter_entry(|entry| {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        !config.excluded_dirs.iter().any(|d| d == name.as_ref())
    });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(root, "skipping unreadable entry: {e}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if config.excluded_files.iter().any(|f| f == name.as_ref()) {
            continue;
        }
        files.push(entry.into_path());
    }
    files.sort();
    Ok(files)
}

/// Collect metadata and a content preview for one enumerated file.
pub fn describe_file(path: &Path, config: &ClassifierConfig) -> Result<FileDescriptor, AppError> {
    let metadata = path.metadata().map_err(|e| {
        AppError::Enumeration(format!("cannot read metadata for {}: {e}", path.display()))
    })?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| AppError::Enumeration(format!("invalid file path: {}", path.display())))?;
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default();
    let original_directory = path
        .parent()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let modified_time = metadata
        .modified()
        .ok()
        .map(|t| chrono::DateTime::<chrono::Utc>::from(t).to_rfc3339());

    Ok(FileDescriptor {
        path: path.to_string_lossy().to_string(),
        content_preview: read_preview(path, &extension, config.preview_chars),
        name,
        extension,
        size: metadata.len(),
        modified_time,
        original_directory,
    })
}

fn read_preview(path: &Path, extension: &str, max_chars: usize) -> String {
    if !TEXT_EXTENSIONS.contains(&extension) {
        return NON_TEXT_PREVIEW.to_string();
    }
    let mut buf = Vec::new();
    let read = File::open(path).and_then(|f| {
        f.take((max_chars as u64).saturating_mul(4))
            .read_to_end(&mut buf)
    });
    match read {
        Ok(_) => String::from_utf8_lossy(&buf).chars().take(max_chars).collect(),
        Err(e) => format!("failed to read content: {e}"),
    }
}

/// Top-level directories of the target root with their immediate
/// sub-directories, sorted by name.
pub fn scan_target_structure(target: &str) -> Vec<(String, Vec<String>)> {
    let Ok(entries) = std::fs::read_dir(target) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for entry in entries.filter_map(|e| e.ok()) {
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let mut children: Vec<String> = match std::fs::read_dir(entry.path()) {
            Ok(sub) => sub
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
                .map(|e| e.file_name().to_string_lossy().to_string())
                .collect(),
            Err(_) => continue,
        };
        children.sort();
        out.push((name, children));
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    out
}

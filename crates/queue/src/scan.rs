//! Input discovery for command line submissions.
//!
//! Explicit file arguments are passed through untouched so the ingestion gate
//! decides what counts as an image. Directories are walked recursively and
//! only files with an accepted image extension are picked up.

use crate::export::RESULT_PREFIX;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Image extensions picked up from directories (case-insensitive matching).
pub const IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".webp"];

/// Checks if a file has an accepted image extension (case-insensitive).
pub fn is_accepted_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext_lower = format!(".{}", ext.to_lowercase());
            IMAGE_EXTENSIONS.contains(&ext_lower.as_str())
        })
        .unwrap_or(false)
}

/// True for files written by a previous export.
pub fn is_exported_result(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with(RESULT_PREFIX))
        .unwrap_or(false)
}

/// Expands the given inputs into a list of files, preserving argument order.
///
/// - Files are kept as given
/// - Directories are walked in name order, skipping hidden directories
/// - Directory entries without an image extension, or that are earlier
///   exports, are left out
/// - Missing paths are skipped
pub fn collect_inputs(inputs: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for input in inputs {
        if input.is_file() {
            files.push(input.clone());
            continue;
        }
        if !input.is_dir() {
            tracing::warn!(path = %input.display(), "input does not exist, skipping");
            continue;
        }

        let walker = WalkDir::new(input)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                if entry.file_type().is_dir() && entry.depth() > 0 {
                    if let Some(name) = entry.file_name().to_str() {
                        if name.starts_with('.') {
                            return false;
                        }
                    }
                }
                true
            });

        for entry in walker.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !entry.file_type().is_file() {
                continue;
            }
            if !is_accepted_image(path) || is_exported_result(path) {
                continue;
            }
            files.push(path.to_path_buf());
        }
    }

    files
}

//! Writing processed results to disk.
//!
//! Results are named `nobg-<stem>.<ext>` after the original file, with the
//! extension of the output format. Existing files are never overwritten; a
//! numeric suffix is appended instead.

use crate::store::ResultFile;
use cutout_config::OutputFormat;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Prefix of every exported file name.
pub const RESULT_PREFIX: &str = "nobg-";

/// Errors that can occur while exporting results.
#[derive(Debug, Error)]
pub enum ExportError {
    /// Output directory could not be created.
    #[error("Failed to create output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Result could not be written.
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Download name for a result, e.g. `photo.jpeg` -> `nobg-photo.png`.
pub fn result_file_name(original: &str, format: OutputFormat) -> String {
    let stem = Path::new(original)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "image".to_string());
    format!("{}{}.{}", RESULT_PREFIX, stem, format.extension())
}

/// First path in `dir` for `file_name` that does not exist yet.
fn unused_path(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let path = Path::new(file_name);
    let stem = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
    let ext = path.extension().map(|e| e.to_string_lossy().to_string());

    (1u32..)
        .map(|n| match ext {
            Some(ref ext) => dir.join(format!("{}-{}.{}", stem, n, ext)),
            None => dir.join(format!("{}-{}", stem, n)),
        })
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

/// Write one result into `dir` through a temp file and rename.
pub fn write_result(
    dir: &Path,
    result: &ResultFile,
    format: OutputFormat,
) -> Result<PathBuf, ExportError> {
    fs::create_dir_all(dir).map_err(|source| ExportError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let target = unused_path(dir, &result_file_name(&result.name, format));
    let mut tmp = target.as_os_str().to_owned();
    tmp.push(".part");
    let tmp = PathBuf::from(tmp);

    let write = fs::write(&tmp, &result.bytes).and_then(|_| fs::rename(&tmp, &target));
    if let Err(source) = write {
        let _ = fs::remove_file(&tmp);
        return Err(ExportError::Write { path: target, source });
    }

    tracing::debug!(item = %result.item_id, path = %target.display(), "result written");
    Ok(target)
}

/// Write every result into `dir`, in order.
pub fn export_results(
    dir: &Path,
    results: &[ResultFile],
    format: OutputFormat,
) -> Result<Vec<PathBuf>, ExportError> {
    results.iter().map(|r| write_result(dir, r, format)).collect()
}

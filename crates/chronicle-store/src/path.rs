//! Chronicle path validation.
//!
//! A chronicle path names exactly one log.  Validation is lexical (nothing
//! is created or canonicalized on disk) and runs before any lock is taken.

use std::path::{Component, Path, PathBuf};

use chronicle_contracts::error::{ChronicleError, ChronicleResult};

use crate::config::ChronicleConfig;

/// Check a chronicle path against the configured root and extensions.
///
/// Rejects: empty paths, embedded NUL bytes, any `..` component, paths
/// without a file name, extensions outside `allowed_extensions`, absolute
/// paths outside `root`, and paths that name an existing directory.
pub fn validate_chronicle_path(path: &Path, config: &ChronicleConfig) -> ChronicleResult<()> {
    resolve_chronicle_path(path, config).map(|_| ())
}

/// Validate `path` and return the location it refers to: relative paths are
/// joined onto `root` when one is configured.
pub fn resolve_chronicle_path(path: &Path, config: &ChronicleConfig) -> ChronicleResult<PathBuf> {
    let raw = path.to_string_lossy();
    if raw.is_empty() {
        return Err(ChronicleError::validation("chronicle path is empty"));
    }
    if raw.contains('\0') {
        return Err(ChronicleError::validation(format!(
            "chronicle path '{}' contains a NUL byte",
            raw.replace('\0', "\\0")
        )));
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(ChronicleError::validation(format!(
            "chronicle path '{}' contains a parent-directory component",
            path.display()
        )));
    }

    let file_name = path.file_name().ok_or_else(|| {
        ChronicleError::validation(format!("chronicle path '{}' has no file name", path.display()))
    })?;

    let extension = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    if !config
        .allowed_extensions
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(extension))
    {
        return Err(ChronicleError::validation(format!(
            "chronicle path '{}' must end in one of: {}",
            path.display(),
            config
                .allowed_extensions
                .iter()
                .map(|e| format!(".{}", e))
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }

    let resolved = match &config.root {
        Some(root) if path.is_relative() => root.join(path),
        Some(root) => {
            if !path.starts_with(root) {
                return Err(ChronicleError::validation(format!(
                    "chronicle path '{}' is outside the allowed root '{}'",
                    path.display(),
                    root.display()
                )));
            }
            path.to_path_buf()
        }
        None => path.to_path_buf(),
    };

    if resolved.is_dir() {
        return Err(ChronicleError::validation(format!(
            "chronicle path '{}' is a directory",
            resolved.display()
        )));
    }

    Ok(resolved)
}

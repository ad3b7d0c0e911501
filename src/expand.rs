/*!
 * Source path expansion
 *
 * Resolves `~` and relative paths, then expands wildcard patterns
 * against the local filesystem. Patterns are grouped by parent directory
 * so each directory is listed once even when several patterns target it.
 * Matching is single-level: subdirectories are not descended.
 */

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use glob::Pattern;
use tracing::debug;

use crate::error::{Result, TransferError};

/// Expand a list of path patterns into canonical absolute file paths.
///
/// Literal paths are accepted without an existence check; missing files
/// are recorded later during metadata initialization.
pub fn expand_file_names(patterns: &[String]) -> Result<BTreeSet<PathBuf>> {
    let mut result = BTreeSet::new();
    let mut dir_patterns: HashMap<PathBuf, Vec<String>> = HashMap::new();

    for raw in patterns {
        let path = resolve_path(raw)?;

        if is_wildcard(&path.to_string_lossy()) {
            let parent = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("/"));
            let file_pattern = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            dir_patterns.entry(parent).or_default().push(file_pattern);
        } else {
            result.insert(path);
        }
    }

    for (dir, patterns) in dir_patterns {
        debug!(dir = %dir.display(), ?patterns, "listing directory for wildcard match");

        let compiled: Vec<Pattern> = patterns
            .iter()
            .filter_map(|p| Pattern::new(p).ok())
            .collect();

        let entries = std::fs::read_dir(&dir).map_err(|e| TransferError::ListFiles {
            dir: dir.clone(),
            patterns: patterns.clone(),
            message: e.to_string(),
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| TransferError::ListFiles {
                dir: dir.clone(),
                patterns: patterns.clone(),
                message: e.to_string(),
            })?;
            let file_type = entry.file_type().map_err(|e| TransferError::ListFiles {
                dir: dir.clone(),
                patterns: patterns.clone(),
                message: e.to_string(),
            })?;
            if !file_type.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if compiled.iter().any(|p| p.matches(&name)) {
                result.insert(entry.path());
            }
        }
    }

    debug!(count = result.len(), "expanded file paths");
    Ok(result)
}

/// Substitute a leading `~` and make the path absolute
fn resolve_path(raw: &str) -> Result<PathBuf> {
    let mut path = raw.to_string();

    if let Some(rest) = path.strip_prefix('~') {
        let home = dirs::home_dir()
            .ok_or_else(|| TransferError::Config("cannot resolve home directory".to_string()))?;
        path = format!("{}{}", home.display(), rest);
    }

    let path = PathBuf::from(path);
    if path.is_absolute() {
        Ok(path)
    } else {
        debug!("adding current working dir to relative file path");
        Ok(std::env::current_dir()?.join(path))
    }
}

fn is_wildcard(path: &str) -> bool {
    path.contains('*') || path.contains('?') || (path.contains('[') && path.contains(']'))
}

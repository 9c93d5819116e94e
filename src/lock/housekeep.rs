use crate::error::Result;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct CleanTokenConfig {
    pub dir: PathBuf,
    pub older_than: Duration,
    pub dry_run: bool,
}

/// Remove atomic-create tokens left behind by crashed holders.
///
/// Only regular files directly inside `dir` whose modification time is
/// older than `older_than` are touched; symlinks and subdirectories are
/// skipped. A token's age is the time since it was acquired, so pick a
/// threshold longer than any legitimate hold. Never call this on a directory
/// used by [`AdvisoryFileMutex`](super::AdvisoryFileMutex).
pub fn clean_stale_tokens(config: &CleanTokenConfig) -> Result<Vec<PathBuf>> {
    let mut cleaned = Vec::new();

    let entries = fs::read_dir(&config.dir)?;

    for entry in entries {
        let entry = entry?;
        let path = entry.path();

        // Get file type WITHOUT following symlinks
        let file_type = entry.file_type()?;
        if !file_type.is_file() {
            debug!("Skipping non-token entry: {}", path.display());
            continue;
        }

        match is_stale(&path, config.older_than) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => {
                warn!("Error checking lock token {}: {}", path.display(), e);
                continue;
            }
        }

        if config.dry_run {
            debug!("Would remove stale token: {}", path.display());
            cleaned.push(path);
            continue;
        }

        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Removed stale token: {}", path.display());
                cleaned.push(path);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // Released by its holder meanwhile
                debug!("Lock token already removed: {}", path.display());
            }
            Err(e) => {
                warn!("Failed to remove lock token {}: {}", path.display(), e);
            }
        }
    }

    Ok(cleaned)
}

fn is_stale(path: &Path, older_than: Duration) -> io::Result<bool> {
    let mtime = fs::symlink_metadata(path)?.modified()?;
    Ok(SystemTime::now()
        .duration_since(mtime)
        .map(|age| age >= older_than)
        .unwrap_or(false))
}

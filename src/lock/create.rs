//! Cross-process lock built on exclusive file creation.
//!
//! Holding the lock means having created `<dir>/<name>` with `O_EXCL`;
//! releasing it means deleting that file. Works anywhere exclusive create is
//! atomic, without kernel lock support.
//!
//! # Crash safety
//!
//! This lock does not survive crashes. If the holder dies between acquire and
//! release the token file stays behind and the key is locked until someone
//! removes it, e.g. with [`CreateFileMutex::clear`] or
//! [`clean_stale_tokens`](super::housekeep::clean_stale_tokens). Dropping a
//! [`CreateFileLock`] does not release it either. Use
//! [`AdvisoryFileMutex`](super::AdvisoryFileMutex) when crash recovery
//! matters.
//!
//! On network filesystems this is only as safe as the server's exclusive
//! create (NFSv3 and later implement it).

use super::housekeep::{clean_stale_tokens, CleanTokenConfig};
use super::path::{default_lock_dir, resolved_path, NameResolver, Resolved};
use crate::cancel::CancelToken;
use crate::error::{BoxError, LockError, Result};
use crate::hash::Hasher;
use crate::locker::{CancellableKeyLocker, CancellableLocker, LockState};
use crate::utils::RetryPolicy;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Factory of [`CreateFileLock`]s rooted in one directory.
///
/// Processes agree on a key's lock only if they share the directory, the
/// hasher and the sanitizer.
#[derive(Debug, Clone)]
pub struct CreateFileMutex {
    resolver: NameResolver,
    retry: RetryPolicy,
}

impl CreateFileMutex {
    /// Lock files go directly into `dir`, which must already exist.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            resolver: NameResolver::new(dir.into()),
            retry: RetryPolicy::default(),
        }
    }

    /// Use the per-user cache directory from [`default_lock_dir`].
    pub fn in_default_dir() -> Result<Self> {
        Ok(Self::new(default_lock_dir()?))
    }

    pub fn with_hasher(mut self, hasher: impl Hasher + 'static) -> Self {
        self.resolver.hasher = Arc::new(hasher);
        self
    }

    /// Name lock files with `sanitizer` instead of the key's fingerprint.
    ///
    /// A key the sanitizer rejects still yields a handle, but every call on
    /// that handle returns the sanitizer's error.
    pub fn with_sanitizer<F>(mut self, sanitizer: F) -> Self
    where
        F: Fn(&str) -> std::result::Result<String, BoxError> + Send + Sync + 'static,
    {
        self.resolver.sanitizer = Some(Arc::new(sanitizer));
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.resolver.dir
    }

    /// The token path `key` resolves to.
    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        self.resolver
            .resolve(key)
            .map_err(|source| LockError::sanitize(key, source))
    }

    /// Forcibly remove the token for `key`, whoever holds it.
    ///
    /// Meant for recovering from a crashed holder. Returns whether a token
    /// was present.
    pub fn clear(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Cleared lock token: {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(LockError::LockReleaseFailed { path, source }),
        }
    }

    /// Remove every token in the directory older than `older_than`.
    pub fn clean_stale(&self, older_than: Duration) -> Result<Vec<PathBuf>> {
        clean_stale_tokens(&CleanTokenConfig {
            dir: self.resolver.dir.clone(),
            older_than,
            dry_run: false,
        })
    }
}

impl CancellableKeyLocker for CreateFileMutex {
    type Lock = CreateFileLock;

    fn get_lock(&self, key: &str) -> CreateFileLock {
        CreateFileLock {
            key: key.to_string(),
            resolved: self.resolver.resolve(key),
            retry: self.retry.clone(),
            state: LockState::Unlocked,
        }
    }
}

/// Handle for one key of a [`CreateFileMutex`].
#[derive(Debug)]
pub struct CreateFileLock {
    key: String,
    resolved: Resolved,
    retry: RetryPolicy,
    state: LockState,
}

impl CreateFileLock {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The token path, or `None` if the sanitizer rejected the key.
    pub fn path(&self) -> Option<&Path> {
        self.resolved.as_deref().ok()
    }
}

/// Create the token. `Ok(false)` if it already exists.
fn create_token(path: &Path) -> io::Result<bool> {
    let mut opts = OpenOptions::new();
    opts.write(true).create_new(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o666);
    }

    match opts.open(path) {
        Ok(_file) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e),
    }
}

impl CancellableLocker for CreateFileLock {
    fn acquire(&mut self, cancel: &CancelToken) -> Result<()> {
        let path = resolved_path(&self.key, &self.resolved)?;
        match self.state {
            LockState::Locked => return Ok(()),
            LockState::Failed => return Err(LockError::HandleFailed(path.to_path_buf())),
            LockState::Unlocked => {}
        }

        debug!("Acquiring lock: {} (retry: {:?})", path.display(), self.retry);

        let mut backoff = self.retry.backoff();
        loop {
            match create_token(path) {
                Ok(true) => break,
                Ok(false) => {
                    let delay = backoff.next_delay();
                    trace!("Lock busy, retrying in {:?}: {}", delay, path.display());
                    if let Err(reason) = cancel.wait(delay) {
                        self.state = LockState::Failed;
                        return Err(LockError::Cancelled {
                            path: path.to_path_buf(),
                            reason,
                        });
                    }
                }
                Err(source) => {
                    self.state = LockState::Failed;
                    return Err(LockError::LockCreationFailed {
                        path: path.to_path_buf(),
                        source,
                    });
                }
            }
        }

        self.state = LockState::Locked;
        debug!("Lock acquired: {}", path.display());
        Ok(())
    }

    fn try_acquire(&mut self) -> Result<bool> {
        let path = resolved_path(&self.key, &self.resolved)?;
        match self.state {
            LockState::Locked => return Ok(true),
            LockState::Failed => return Err(LockError::HandleFailed(path.to_path_buf())),
            LockState::Unlocked => {}
        }

        match create_token(path) {
            Ok(acquired) => {
                if acquired {
                    self.state = LockState::Locked;
                    debug!("Lock acquired: {}", path.display());
                }
                Ok(acquired)
            }
            Err(source) => {
                self.state = LockState::Failed;
                Err(LockError::LockCreationFailed {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
    }

    /// Delete the token if this handle created it.
    ///
    /// A handle that never acquired the lock leaves the token alone, even if
    /// another handle for the same key holds it. If the holder's handle is
    /// gone, remove the token with [`CreateFileMutex::clear`].
    fn release(&mut self, _cancel: &CancelToken) -> Result<()> {
        let path = resolved_path(&self.key, &self.resolved)?;
        if self.state != LockState::Locked {
            return Ok(());
        }

        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Lock token already gone: {}", path.display());
            }
            Err(source) => {
                return Err(LockError::LockReleaseFailed {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }

        self.state = LockState::Unlocked;
        debug!("Lock released: {}", path.display());
        Ok(())
    }

    fn state(&self) -> LockState {
        self.state
    }
}

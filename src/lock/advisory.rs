//! Cross-process lock built on kernel advisory locks.
//!
//! Each key maps to a persistent file in the lock directory. Holding the lock
//! means holding an exclusive `flock` (unix) or `LockFileEx` (windows) on an
//! open handle to that file. The kernel drops the lock when the handle is
//! closed, so a crashed holder never leaves the key stuck.
//!
//! Lock files are reused across lock cycles and never deleted.
//!
//! Advisory locks only exclude processes that also use them. Only unix and
//! windows are supported; elsewhere acquire fails with
//! [`LockError::Unsupported`].

use super::path::{default_lock_dir, resolved_path, NameResolver, Resolved};
use crate::cancel::CancelToken;
use crate::error::{LockError, Result};
use crate::hash::Hasher;
use crate::locker::{CancellableKeyLocker, CancellableLocker, LockState};
use crate::utils::RetryPolicy;
use std::fs::File;
use std::io;
use std::num::NonZeroU64;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};

/// Factory of [`AdvisoryFileLock`]s rooted in one directory.
#[derive(Debug, Clone)]
pub struct AdvisoryFileMutex {
    resolver: NameResolver,
    retry: RetryPolicy,
}

impl AdvisoryFileMutex {
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

    /// Bound the directory to `size` lock files.
    ///
    /// Keys are spread over the files by fingerprint, so unrelated keys may
    /// share a file and contend.
    pub fn with_pool_size(mut self, size: NonZeroU64) -> Self {
        self.resolver.modulus = Some(size);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.resolver.dir
    }

    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        self.resolver
            .resolve(key)
            .map_err(|source| LockError::sanitize(key, source))
    }
}

impl CancellableKeyLocker for AdvisoryFileMutex {
    type Lock = AdvisoryFileLock;

    fn get_lock(&self, key: &str) -> AdvisoryFileLock {
        AdvisoryFileLock {
            key: key.to_string(),
            resolved: self.resolver.resolve(key),
            retry: self.retry.clone(),
            file: None,
            state: LockState::Unlocked,
        }
    }
}

/// Handle for one key of an [`AdvisoryFileMutex`].
///
/// Dropping a locked handle closes its file, which releases the lock.
#[derive(Debug)]
pub struct AdvisoryFileLock {
    key: String,
    resolved: Resolved,
    retry: RetryPolicy,
    file: Option<File>,
    state: LockState,
}

impl AdvisoryFileLock {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn path(&self) -> Option<&Path> {
        self.resolved.as_deref().ok()
    }

    fn begin(&self) -> Result<Option<&Path>> {
        let path = resolved_path(&self.key, &self.resolved)?;
        if !sys::SUPPORTED {
            return Err(LockError::Unsupported(
                "advisory file locks are only available on unix and windows",
            ));
        }
        match self.state {
            LockState::Locked => Ok(None),
            LockState::Failed => Err(LockError::HandleFailed(path.to_path_buf())),
            LockState::Unlocked => Ok(Some(path)),
        }
    }
}

impl CancellableLocker for AdvisoryFileLock {
    fn acquire(&mut self, cancel: &CancelToken) -> Result<()> {
        let path = match self.begin()? {
            Some(path) => path.to_path_buf(),
            None => return Ok(()),
        };

        debug!("Acquiring lock: {} (retry: {:?})", path.display(), self.retry);

        let file = match sys::open(&path) {
            Ok(file) => file,
            Err(source) => {
                self.state = LockState::Failed;
                return Err(LockError::LockCreationFailed { path, source });
            }
        };

        let mut backoff = self.retry.backoff();
        loop {
            match sys::try_lock(&file) {
                Ok(()) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if sys::is_lock_contention(&e) => {
                    let delay = backoff.next_delay();
                    trace!("Lock busy, retrying in {:?}: {}", delay, path.display());
                    if let Err(reason) = cancel.wait(delay) {
                        self.state = LockState::Failed;
                        return Err(LockError::Cancelled { path, reason });
                    }
                }
                Err(source) => {
                    self.state = LockState::Failed;
                    return Err(LockError::LockAcquisitionFailed { path, source });
                }
            }
        }

        self.file = Some(file);
        self.state = LockState::Locked;
        debug!("Lock acquired: {}", path.display());
        Ok(())
    }

    fn try_acquire(&mut self) -> Result<bool> {
        let path = match self.begin()? {
            Some(path) => path.to_path_buf(),
            None => return Ok(true),
        };

        let file = match sys::open(&path) {
            Ok(file) => file,
            Err(source) => {
                self.state = LockState::Failed;
                return Err(LockError::LockCreationFailed { path, source });
            }
        };

        loop {
            match sys::try_lock(&file) {
                Ok(()) => {
                    self.file = Some(file);
                    self.state = LockState::Locked;
                    debug!("Lock acquired: {}", path.display());
                    return Ok(true);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if sys::is_lock_contention(&e) => return Ok(false),
                Err(source) => {
                    self.state = LockState::Failed;
                    return Err(LockError::LockAcquisitionFailed { path, source });
                }
            }
        }
    }

    fn release(&mut self, _cancel: &CancelToken) -> Result<()> {
        let path = resolved_path(&self.key, &self.resolved)?;
        let file = match self.file.take() {
            Some(file) => file,
            None => return Ok(()),
        };

        let unlocked = loop {
            match sys::unlock(&file) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                result => break result,
            }
        };

        // Closing drops the kernel lock even if the unlock call failed.
        drop(file);
        self.state = LockState::Unlocked;
        debug!("Lock released: {}", path.display());

        unlocked.map_err(|source| LockError::LockReleaseFailed {
            path: path.to_path_buf(),
            source,
        })
    }

    fn state(&self) -> LockState {
        self.state
    }
}

impl Drop for AdvisoryFileLock {
    fn drop(&mut self) {
        if let (Some(_), Some(path)) = (&self.file, self.path()) {
            // Lock is released by the kernel when the file handle closes
            debug!("Lock released on drop: {}", path.display());
        }
    }
}

#[cfg(any(unix, windows))]
mod sys {
    use fs2::FileExt;
    use std::fs::{File, OpenOptions};
    use std::io;
    use std::path::Path;

    pub(super) const SUPPORTED: bool = true;

    /// Open or create the lock file. Existing files are reused as is.
    pub(super) fn open(path: &Path) -> io::Result<File> {
        let mut opts = OpenOptions::new();
        opts.read(true).write(true).create(true);

        // On Unix, use O_NOFOLLOW to reject symlinks at OS level
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o666).custom_flags(libc::O_NOFOLLOW);
        }

        opts.open(path)
    }

    pub(super) fn try_lock(file: &File) -> io::Result<()> {
        FileExt::try_lock_exclusive(file)
    }

    pub(super) fn unlock(file: &File) -> io::Result<()> {
        FileExt::unlock(file)
    }

    /// Check if an I/O error indicates lock contention (file locked by another process)
    pub(super) fn is_lock_contention(e: &io::Error) -> bool {
        if e.kind() == io::ErrorKind::WouldBlock {
            return true;
        }
        // ERROR_LOCK_VIOLATION (33) - file region is locked
        // ERROR_SHARING_VIOLATION (32) - file in use by another process
        #[cfg(windows)]
        if let Some(code) = e.raw_os_error() {
            if code == 33 || code == 32 {
                return true;
            }
        }
        false
    }
}

#[cfg(not(any(unix, windows)))]
mod sys {
    use std::fs::File;
    use std::io;
    use std::path::Path;

    pub(super) const SUPPORTED: bool = false;

    fn unsupported() -> io::Error {
        io::Error::new(io::ErrorKind::Unsupported, "advisory file locks")
    }

    pub(super) fn open(_path: &Path) -> io::Result<File> {
        Err(unsupported())
    }

    pub(super) fn try_lock(_file: &File) -> io::Result<()> {
        Err(unsupported())
    }

    pub(super) fn unlock(_file: &File) -> io::Result<()> {
        Err(unsupported())
    }

    pub(super) fn is_lock_contention(_e: &io::Error) -> bool {
        false
    }
}

#[cfg(all(test, any(unix, windows)))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_file_persists_after_release() {
        let temp = TempDir::new().unwrap();
        let mutex = AdvisoryFileMutex::new(temp.path());
        let mut lock = mutex.get_lock("foo");
        let cancel = CancelToken::new();

        assert!(!lock.path().unwrap().exists());
        lock.acquire(&cancel).unwrap();
        assert!(lock.path().unwrap().exists());
        lock.release(&cancel).unwrap();
        assert!(lock.path().unwrap().exists());
        assert_eq!(lock.state(), LockState::Unlocked);

        // Reusable after release
        lock.acquire(&cancel).unwrap();
        assert_eq!(lock.state(), LockState::Locked);
    }

    #[test]
    fn test_release_before_acquire_is_noop() {
        let temp = TempDir::new().unwrap();
        let mutex = AdvisoryFileMutex::new(temp.path());
        let mut lock = mutex.get_lock("foo");

        lock.release(&CancelToken::new()).unwrap();
        assert!(!lock.path().unwrap().exists());
    }

    #[test]
    fn test_handles_in_one_process_contend() {
        let temp = TempDir::new().unwrap();
        let mutex = AdvisoryFileMutex::new(temp.path());
        let mut first = mutex.get_lock("foo");
        let mut second = mutex.get_lock("foo");

        assert!(first.try_acquire().unwrap());
        assert!(!second.try_acquire().unwrap());
        assert_eq!(second.state(), LockState::Unlocked);

        first.release(&CancelToken::new()).unwrap();
        assert!(second.try_acquire().unwrap());
    }

    #[test]
    fn test_pool_size_bounds_file_names() {
        let temp = TempDir::new().unwrap();
        let mutex = AdvisoryFileMutex::new(temp.path()).with_pool_size(NonZeroU64::new(3).unwrap());
        for key in ["alpha", "beta", "gamma", "delta", "epsilon"] {
            let path = mutex.path_for(key).unwrap();
            let name: u64 = path.file_name().unwrap().to_str().unwrap().parse().unwrap();
            assert!(name < 3);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_lock_file_rejected() {
        let temp = TempDir::new().unwrap();
        let mutex = AdvisoryFileMutex::new(temp.path());
        let mut lock = mutex.get_lock("foo");

        let target = temp.path().join("target");
        std::fs::write(&target, b"").unwrap();
        std::os::unix::fs::symlink(&target, lock.path().unwrap()).unwrap();

        let err = lock.acquire(&CancelToken::new()).unwrap_err();
        assert!(matches!(err, LockError::LockCreationFailed { .. }));
        assert_eq!(lock.state(), LockState::Failed);
    }
}

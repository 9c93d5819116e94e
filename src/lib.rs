//! Key-addressable locks for one process or many.
//!
//! Pick a strategy by constructing its factory, then ask it for a lock per
//! key:
//!
//! - [`ShardedMutex`]: in-memory mutexes, keys hashed onto a fixed pool.
//! - [`CreateFileMutex`]: cross-process, one token file created with
//!   `O_EXCL` per held key. Not crash safe.
//! - [`AdvisoryFileMutex`]: cross-process, kernel advisory locks on
//!   persistent files. Released by the kernel if the holder dies.
//!
//! ```no_run
//! use lockd::{CancelToken, CancellableKeyLocker, CancellableLocker, CreateFileMutex};
//! use std::time::Duration;
//!
//! # fn main() -> lockd::Result<()> {
//! let mutex = CreateFileMutex::new("/var/lock/myapp");
//! let mut lock = mutex.get_lock("invoice-42");
//!
//! let cancel = CancelToken::with_timeout(Duration::from_secs(5));
//! lock.acquire(&cancel)?;
//! // critical section
//! lock.release(&cancel)?;
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod error;
pub mod hash;
pub mod lock;
pub mod locker;
pub mod mutex;
pub mod utils;

pub use cancel::{CancelReason, CancelToken};
pub use error::{ErrorKind, LockError, Result};
pub use hash::{default_hash, sha256_hash, Fingerprint, Hasher};
pub use lock::{
    default_lock_dir, safe_filename, AdvisoryFileLock, AdvisoryFileMutex, CreateFileLock,
    CreateFileMutex,
};
pub use locker::{CancellableKeyLocker, CancellableLocker, KeyLocker, LockState, Locker};
pub use mutex::{ShardLock, ShardedMutex};
pub use utils::RetryPolicy;

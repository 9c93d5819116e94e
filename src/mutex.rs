//! In-process sharded mutex pool.
//!
//! Keys are hashed onto a fixed array of mutexes. Distinct keys that land on
//! the same shard contend with each other; a larger pool makes that rarer.

use crate::error::{LockError, Result};
use crate::hash::{default_hash, Hasher};
use crate::locker::{KeyLocker, Locker};
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

#[derive(Clone)]
pub struct ShardedMutex {
    shards: Arc<[Mutex<()>]>,
    hasher: Arc<dyn Hasher>,
}

impl ShardedMutex {
    /// Create a pool of `size` mutexes. `size` must be greater than zero.
    pub fn new(size: usize) -> Result<Self> {
        NonZeroUsize::new(size)
            .map(Self::with_shards)
            .ok_or(LockError::InvalidPoolSize(size))
    }

    pub fn with_shards(size: NonZeroUsize) -> Self {
        let shards: Vec<Mutex<()>> = (0..size.get()).map(|_| Mutex::new(())).collect();
        Self {
            shards: shards.into(),
            hasher: Arc::new(default_hash),
        }
    }

    pub fn with_hasher(mut self, hasher: impl Hasher + 'static) -> Self {
        self.hasher = Arc::new(hasher);
        self
    }

    pub fn size(&self) -> usize {
        self.shards.len()
    }

    /// Shard index `key` maps to.
    pub fn shard_of(&self, key: &str) -> usize {
        (self.hasher.hash(key) % self.shards.len() as u64) as usize
    }
}

impl fmt::Debug for ShardedMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardedMutex")
            .field("size", &self.shards.len())
            .finish()
    }
}

impl KeyLocker for ShardedMutex {
    type Lock = ShardLock;

    fn get_lock(&self, key: &str) -> ShardLock {
        ShardLock {
            shards: Arc::clone(&self.shards),
            shard: self.shard_of(key),
        }
    }
}

/// Handle bound to one shard of a [`ShardedMutex`].
///
/// Keeps the shard array alive on its own, so it may outlive the pool.
#[derive(Clone)]
pub struct ShardLock {
    shards: Arc<[Mutex<()>]>,
    shard: usize,
}

impl ShardLock {
    pub fn shard(&self) -> usize {
        self.shard
    }
}

impl fmt::Debug for ShardLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardLock").field("shard", &self.shard).finish()
    }
}

impl Locker for ShardLock {
    type Guard<'a> = MutexGuard<'a, ()>;

    fn acquire(&self) -> MutexGuard<'_, ()> {
        self.shards[self.shard].lock()
    }

    fn try_acquire(&self) -> Option<MutexGuard<'_, ()>> {
        self.shards[self.shard].try_lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_size_rejected() {
        let err = ShardedMutex::new(0).unwrap_err();
        assert!(matches!(err, LockError::InvalidPoolSize(0)));
    }

    #[test]
    fn test_shard_is_hash_mod_size() {
        let pool = ShardedMutex::new(7).unwrap();
        assert_eq!(pool.shard_of("abc"), (default_hash("abc") % 7) as usize);
        assert_eq!(pool.get_lock("abc").shard(), pool.shard_of("abc"));
    }

    #[test]
    fn test_single_shard_serializes_everything() {
        let pool = ShardedMutex::new(1).unwrap();
        let a = pool.get_lock("a");
        let b = pool.get_lock("b");

        let guard = a.acquire();
        assert!(b.try_acquire().is_none());
        a.release(guard);
        assert!(b.try_acquire().is_some());
    }

    #[test]
    fn test_custom_hasher_picks_shard() {
        let pool = ShardedMutex::new(4).unwrap().with_hasher(|key: &str| key.len() as u64);
        assert_eq!(pool.get_lock("abcdef").shard(), 2);
    }
}

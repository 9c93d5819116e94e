//! Key fingerprinting used to pick shards and lock file names.

use sha2::{Digest, Sha256};

/// Deterministic digest of a key.
pub type Fingerprint = u64;

const SEED: Fingerprint = 1315423911;

/// Maps a key to a [`Fingerprint`].
///
/// File-backed strategies rely on every cooperating process using the same
/// hasher, so implementations must be deterministic across processes.
pub trait Hasher: Send + Sync {
    fn hash(&self, key: &str) -> Fingerprint;
}

impl<F> Hasher for F
where
    F: Fn(&str) -> Fingerprint + Send + Sync,
{
    fn hash(&self, key: &str) -> Fingerprint {
        self(key)
    }
}

/// Seeded rolling xor/shift hash used when no hasher is configured.
pub fn default_hash(key: &str) -> Fingerprint {
    key.bytes().fold(SEED, |hash, byte| {
        hash ^ (hash << 5)
            .wrapping_add(Fingerprint::from(byte))
            .wrapping_add(hash >> 2)
    })
}

/// First eight bytes of the SHA-256 digest of the key, big endian.
pub fn sha256_hash(key: &str) -> Fingerprint {
    let digest = Sha256::digest(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    Fingerprint::from_be_bytes(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(key: &[u8]) -> u64 {
        let mut hash: u64 = 1315423911;
        for &b in key {
            hash ^= (hash << 5).wrapping_add(b as u64).wrapping_add(hash >> 2);
        }
        hash
    }

    #[test]
    fn test_empty_key_is_seed() {
        assert_eq!(default_hash(""), 1315423911);
    }

    #[test]
    fn test_abc_fingerprint() {
        assert_eq!(default_hash("a"), 41589997645);
        assert_eq!(default_hash("ab"), 1313801259608);
        assert_eq!(default_hash("abc"), 43675163498401);
        assert_eq!(default_hash("abc"), reference(b"abc"));
    }

    #[test]
    fn test_long_keys_wrap() {
        let key = "x".repeat(4096);
        assert_eq!(default_hash(&key), reference(key.as_bytes()));
    }

    #[test]
    fn test_closure_is_hasher() {
        let hasher = |key: &str| key.len() as u64;
        assert_eq!(Hasher::hash(&hasher, "four"), 4);
        assert_eq!(Hasher::hash(&default_hash, "abc"), default_hash("abc"));
    }

    #[test]
    fn test_sha256_hash_is_stable() {
        assert_eq!(sha256_hash("foo"), sha256_hash("foo"));
        assert_ne!(sha256_hash("foo"), sha256_hash("bar"));
        // sha256("abc") = ba7816bf8f01cfea...
        assert_eq!(sha256_hash("abc"), 0xba7816bf8f01cfea);
    }
}

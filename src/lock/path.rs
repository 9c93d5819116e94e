use crate::error::{BoxError, LockError, Result};
use crate::hash::{default_hash, Hasher};
use directories::ProjectDirs;
use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::num::NonZeroU64;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Translates a key into a lock file name.
pub type NameSanitizer = dyn Fn(&str) -> std::result::Result<String, BoxError> + Send + Sync;

/// Derives lock file paths for keys inside one directory.
///
/// Every cooperating process must use the same resolver configuration,
/// otherwise the same key maps to different files and does not contend.
#[derive(Clone)]
pub(crate) struct NameResolver {
    pub(crate) dir: PathBuf,
    pub(crate) hasher: Arc<dyn Hasher>,
    pub(crate) sanitizer: Option<Arc<NameSanitizer>>,
    pub(crate) modulus: Option<NonZeroU64>,
}

/// A resolved path, or the sanitizer's refusal kept for later.
pub(crate) type Resolved = std::result::Result<PathBuf, Arc<dyn StdError + Send + Sync>>;

impl NameResolver {
    pub(crate) fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            hasher: Arc::new(default_hash),
            sanitizer: None,
            modulus: None,
        }
    }

    pub(crate) fn file_name(
        &self,
        key: &str,
    ) -> std::result::Result<String, Arc<dyn StdError + Send + Sync>> {
        if let Some(sanitizer) = &self.sanitizer {
            return sanitizer(key).map_err(Arc::from);
        }

        let mut fingerprint = self.hasher.hash(key);
        if let Some(modulus) = self.modulus {
            fingerprint %= modulus.get();
        }
        Ok(fingerprint.to_string())
    }

    pub(crate) fn resolve(&self, key: &str) -> Resolved {
        self.file_name(key).map(|name| self.dir.join(name))
    }
}

impl fmt::Debug for NameResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NameResolver")
            .field("dir", &self.dir)
            .field("sanitized", &self.sanitizer.is_some())
            .field("modulus", &self.modulus)
            .finish()
    }
}

/// Turn a stored resolution into the path to operate on, or the stored error.
pub(crate) fn resolved_path<'a>(key: &str, resolved: &'a Resolved) -> Result<&'a Path> {
    match resolved {
        Ok(path) => Ok(path.as_path()),
        Err(source) => Err(LockError::sanitize(key, Arc::clone(source))),
    }
}

#[derive(Debug)]
pub struct UnsafeName(String);

impl fmt::Display for UnsafeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl StdError for UnsafeName {}

const MAX_FILE_NAME: usize = 255;

/// Stock name sanitizer: passes keys that are already safe file names.
///
/// Accepts non-empty names of at most 255 bytes made of ASCII letters,
/// digits, `.`, `-` and `_`, except `.` and `..`. Anything else is
/// rejected rather than rewritten, so two keys can never share a file.
pub fn safe_filename(key: &str) -> std::result::Result<String, BoxError> {
    if key.is_empty() {
        return Err(Box::new(UnsafeName("empty key".to_string())));
    }
    if key.len() > MAX_FILE_NAME {
        return Err(Box::new(UnsafeName(format!(
            "key is {} bytes, limit is {}",
            key.len(),
            MAX_FILE_NAME
        ))));
    }
    if key == "." || key == ".." {
        return Err(Box::new(UnsafeName(format!("{:?} is a directory reference", key))));
    }
    if let Some(c) = key
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(*c, '.' | '-' | '_')))
    {
        return Err(Box::new(UnsafeName(format!(
            "character {:?} is not allowed in lock names",
            c
        ))));
    }
    Ok(key.to_string())
}

/// Get the per-user directory for lock files, creating it if needed.
///
/// Returns an error if no cache directory can be determined for the
/// current user (e.g. no home directory).
pub fn default_lock_dir() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("", "", "lockd").ok_or(LockError::Unsupported(
        "no cache directory available for the current user",
    ))?;

    let lock_dir = proj_dirs.cache_dir().join("locks");

    if !lock_dir.exists() {
        fs::create_dir_all(&lock_dir)?;
    }

    Ok(lock_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_uses_decimal_fingerprint() {
        let resolver = NameResolver::new(PathBuf::from("/tmp/locks"));
        let path = resolver.resolve("abc").unwrap();
        assert_eq!(path, PathBuf::from("/tmp/locks").join("43675163498401"));
    }

    #[test]
    fn test_modulus_bounds_names() {
        let mut resolver = NameResolver::new(PathBuf::from("locks"));
        resolver.modulus = NonZeroU64::new(8);
        for key in ["a", "b", "abc", "some/long/key"] {
            let name: u64 = resolver.file_name(key).unwrap().parse().unwrap();
            assert!(name < 8);
        }
    }

    #[test]
    fn test_sanitizer_overrides_hash() {
        let mut resolver = NameResolver::new(PathBuf::from("locks"));
        resolver.sanitizer = Some(Arc::new(safe_filename));
        assert_eq!(resolver.resolve("job-1").unwrap(), Path::new("locks").join("job-1"));
        assert!(resolver.resolve("../etc/passwd").is_err());
    }

    #[test]
    fn test_safe_filename_rejects_traversal() {
        assert!(safe_filename("").is_err());
        assert!(safe_filename(".").is_err());
        assert!(safe_filename("..").is_err());
        assert!(safe_filename("a/b").is_err());
        assert!(safe_filename("a\\b").is_err());
        assert!(safe_filename("nul\0").is_err());
        assert!(safe_filename(&"x".repeat(256)).is_err());
        assert_eq!(safe_filename("report.2024-01_v2").unwrap(), "report.2024-01_v2");
    }

    #[test]
    fn test_stored_error_is_returned_verbatim() {
        let resolved: Resolved = Err(Arc::new(UnsafeName("nope".to_string())));
        let err = resolved_path("k", &resolved).unwrap_err();
        assert!(matches!(&err, LockError::Sanitize { key, .. } if key == "k"));
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_default_lock_dir_creates_directory() {
        let dir = default_lock_dir().unwrap();
        assert!(dir.is_dir());
        assert!(dir.to_string_lossy().contains("lockd"));
    }
}

mod advisory;
mod create;
pub mod housekeep;
mod path;

pub use advisory::{AdvisoryFileLock, AdvisoryFileMutex};
pub use create::{CreateFileLock, CreateFileMutex};
pub use housekeep::{clean_stale_tokens, CleanTokenConfig};
pub use path::{default_lock_dir, safe_filename, NameSanitizer, UnsafeName};

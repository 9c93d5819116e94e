mod types;

pub use types::{BoxError, ErrorKind, LockError, Result};

// Re-export for convenience
pub use LockError as Error;

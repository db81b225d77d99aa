//! Error types for the index engine.
//!
//! Recoverable kinds are logged and the affected operation becomes a no-op;
//! only `ContextLimitExceeded` is fatal and requires a restart with a wider
//! context bitmap.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for indexing and lookup operations.
#[derive(Error, Debug)]
pub enum IndexError {
    /// The compilation database has no entry for the file.
    #[error("No compile command found for '{path}'")]
    NotIndexable { path: PathBuf },

    /// The external compiler refused the translation unit. Registry entries
    /// from a previous successful index, if any, are retained.
    #[error("Failed to compile '{path}': {reason}")]
    CompileFailed { path: PathBuf, reason: String },

    /// File system errors
    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The registry snapshot failed to parse at startup. The engine starts
    /// with an empty registry; on-disk index files become orphans.
    #[error("Registry snapshot '{path}' is corrupt: {reason}")]
    RegistryCorrupt { path: PathBuf, reason: String },

    /// More canonical contexts are simultaneously live for one header than
    /// the context bitmap can hold. This is the only fatal kind.
    #[error(
        "Live canonical contexts for a header exceeded the bitmap width of {limit}; \
         restart with a wider context bitmap"
    )]
    ContextLimitExceeded { limit: u32 },

    /// The task observed its cancellation flag. Not surfaced upstream: the
    /// caller either re-requested or lost interest.
    #[error("Indexing of '{path}' was cancelled")]
    Cancelled { path: PathBuf },

    /// A serialized index blob failed structural validation.
    #[error("Index blob '{path}' is malformed: {reason}")]
    BlobCorrupt { path: PathBuf, reason: String },
}

impl IndexError {
    /// Whether the engine must stop instead of logging and skipping.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ContextLimitExceeded { .. })
    }
}

/// Result type alias for index operations
pub type IndexResult<T> = Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_context_limit_is_fatal() {
        assert!(IndexError::ContextLimitExceeded { limit: 64 }.is_fatal());
        assert!(
            !IndexError::NotIndexable {
                path: PathBuf::from("a.cpp")
            }
            .is_fatal()
        );
        assert!(
            !IndexError::Cancelled {
                path: PathBuf::from("a.cpp")
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_error_messages_name_the_file() {
        let err = IndexError::NotIndexable {
            path: PathBuf::from("src/widget.cpp"),
        };
        assert!(err.to_string().contains("src/widget.cpp"));
    }
}

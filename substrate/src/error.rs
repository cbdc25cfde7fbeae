//! Error types for the storage engine.

use thiserror::Error;

/// Result type alias using StorageError.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors surfaced by the storage layers.
///
/// `OutOfSpace` means the disk-level allocator is exhausted and is treated
/// as fatal by callers; `NoAvailableFrame` means every buffer frame is
/// pinned and is transient.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no free page left on disk")]
    OutOfSpace,

    #[error("invalid page id: {0}")]
    InvalidPage(crate::PageId),

    #[error("all buffer frames are pinned")]
    NoAvailableFrame,

    #[error("tuple does not fit on an empty page")]
    TupleTooLarge,

    #[error("corrupted page content: {0}")]
    Corrupted(&'static str),
}

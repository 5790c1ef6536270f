//! Error taxonomy for per-disk operations.

/// Errors returned by [`DiskApi`](crate::DiskApi) operations.
///
/// The engine folds per-disk error vectors through its quorum policy, so
/// each variant maps to one classification: absence (`NotFound`),
/// unavailability (`DiskNotFound`), damage (`Corrupted`), or plain
/// failure (the rest).
#[derive(Debug, thiserror::Error)]
pub enum DiskError {
    /// The volume or file does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The volume or file already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The operation was denied by the filesystem.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The disk is offline or unreachable.
    #[error("disk not found")]
    DiskNotFound,

    /// The disk has no space left.
    #[error("disk full")]
    DiskFull,

    /// On-disk state is damaged beyond interpretation.
    #[error("corrupted: {0}")]
    Corrupted(String),

    /// The caller passed an invalid volume or path.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Any other I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DiskError {
    /// Whether this error means the target simply does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DiskError::NotFound(_))
    }

    /// Whether this error means the disk itself is unavailable.
    pub fn is_offline(&self) -> bool {
        matches!(self, DiskError::DiskNotFound)
    }
}

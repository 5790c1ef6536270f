//! Error types for the engine.

use reef_disk::DiskError;
use reef_erasure::ErasureError;

/// Errors surfaced by engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The bucket name fails validation.
    #[error("invalid bucket name: {0}")]
    InvalidBucketName(String),

    /// The object key fails validation.
    #[error("invalid object key: {0}")]
    InvalidObjectKey(String),

    /// Some other argument is out of range (bad byte range, delimiter,
    /// marker, or a size mismatch against the declared length).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The bucket does not exist.
    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    /// The bucket already exists.
    #[error("bucket already exists: {0}")]
    BucketAlreadyExists(String),

    /// The bucket still holds objects.
    #[error("bucket not empty: {0}")]
    BucketNotEmpty(String),

    /// The object does not exist.
    #[error("object not found: bucket={bucket}, key={key}")]
    ObjectNotFound {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
    },

    /// Too few disks answered to satisfy the read quorum.
    #[error("read quorum not met")]
    ReadQuorum,

    /// Too few disks acknowledged to satisfy the write quorum.
    #[error("write quorum not met")]
    WriteQuorum,

    /// Reconstruction verified false — the surviving shards cannot
    /// produce the original bytes.
    #[error("corrupted data: reconstruction verification failed")]
    CorruptedData,

    /// A single-disk error escaped quorum folding (argument validation,
    /// disk-full, raw I/O).
    #[error("disk error: {0}")]
    Disk(#[from] DiskError),

    /// Erasure codec failure.
    #[error("erasure error: {0}")]
    Erasure(#[from] ErasureError),

    /// An on-disk document failed to parse.
    #[error("document parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

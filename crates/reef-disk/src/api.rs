//! The [`DiskApi`] trait — the engine's contract with a single disk.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reef_types::checksum::HashAlgorithm;

use crate::error::DiskError;

/// Capacity information for one disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskInfo {
    /// Total capacity in bytes.
    pub total: u64,
    /// Free capacity in bytes.
    pub free: u64,
}

/// Information about a volume (top-level directory) on one disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInfo {
    /// Volume name.
    pub name: String,
    /// Creation time.
    pub created: DateTime<Utc>,
}

/// Information about a file on one disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Volume holding the file.
    pub volume: String,
    /// Volume-relative path.
    pub name: String,
    /// File size in bytes.
    pub size: u64,
    /// Modification time.
    pub mod_time: DateTime<Utc>,
}

/// Per-disk storage primitives.
///
/// All operations are safe to call concurrently on one instance; the
/// engine fans a call out to every disk of the set and joins before
/// evaluating quorum. Implementations for remote disks own their
/// reconnect behavior — the engine only ever sees [`DiskError`] values.
#[async_trait::async_trait]
pub trait DiskApi: Send + Sync {
    /// Human-readable identifier for logs (export path or endpoint).
    fn endpoint(&self) -> String;

    /// Report this disk's capacity.
    async fn disk_info(&self) -> Result<DiskInfo, DiskError>;

    /// Create a volume. Fails with `AlreadyExists` if present.
    async fn make_volume(&self, volume: &str) -> Result<(), DiskError>;

    /// Delete an empty volume.
    async fn delete_volume(&self, volume: &str) -> Result<(), DiskError>;

    /// List all volumes on this disk.
    async fn list_volumes(&self) -> Result<Vec<VolumeInfo>, DiskError>;

    /// Stat a single volume.
    async fn stat_volume(&self, volume: &str) -> Result<VolumeInfo, DiskError>;

    /// List entries of a directory inside a volume, sorted. Directory
    /// entries carry a trailing `/`.
    async fn list_dir(&self, volume: &str, dir_path: &str) -> Result<Vec<String>, DiskError>;

    /// Write a whole file, creating parent directories as needed and
    /// truncating any previous content.
    async fn write_all(&self, volume: &str, path: &str, data: Bytes) -> Result<(), DiskError>;

    /// Append to a file, creating it (and parents) on first write.
    async fn append_file(&self, volume: &str, path: &str, data: Bytes) -> Result<(), DiskError>;

    /// Read a whole file.
    async fn read_all(&self, volume: &str, path: &str) -> Result<Bytes, DiskError>;

    /// Read exactly `length` bytes at `offset`.
    async fn read_at(
        &self,
        volume: &str,
        path: &str,
        offset: u64,
        length: u64,
    ) -> Result<Bytes, DiskError>;

    /// Stat a file. Directories report `NotFound`.
    async fn stat_file(&self, volume: &str, path: &str) -> Result<FileInfo, DiskError>;

    /// Delete a file, pruning parent directories left empty.
    async fn delete_file(&self, volume: &str, path: &str) -> Result<(), DiskError>;

    /// Rename a file or, when both paths carry a trailing `/`, a whole
    /// directory. A directory rename replaces any existing destination.
    async fn rename_file(
        &self,
        src_volume: &str,
        src_path: &str,
        dst_volume: &str,
        dst_path: &str,
    ) -> Result<(), DiskError>;

    /// Compute a streaming hash over a file's full contents, returning
    /// the lowercase hex digest.
    async fn hash_file(
        &self,
        volume: &str,
        path: &str,
        algorithm: HashAlgorithm,
    ) -> Result<String, DiskError>;
}

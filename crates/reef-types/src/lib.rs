//! Shared types for the Reef storage engine.
//!
//! This crate defines the stable on-disk document schemas
//! ([`FormatDocument`] for `format.json`, [`ObjectMeta`] for `file.json`),
//! the info types returned by the engine surface ([`ObjectInfo`],
//! [`BucketInfo`], [`ListPage`], [`StorageInfo`]), checksum algorithms
//! ([`checksum::HashAlgorithm`]), name validation, and the per-object
//! shard distribution.

pub mod checksum;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::checksum::HashAlgorithm;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Per-disk format document, stored under the reserved bucket.
pub const FORMAT_FILE: &str = "format.json";

/// Staging name for atomic format writes (write tmp, then rename).
pub const FORMAT_FILE_TMP: &str = "format.json.tmp";

/// Per-object metadata document. A directory containing this file is a
/// leaf (an object), never recursed into by listings.
pub const META_FILE: &str = "file.json";

/// Reserved bucket holding engine-internal state (format, write staging).
pub const RESERVED_BUCKET: &str = ".reef";

/// Directory under [`RESERVED_BUCKET`] for in-flight write staging.
pub const TMP_DIR: &str = "tmp";

/// Backend identifier recorded in every format document.
pub const FORMAT_BACKEND: &str = "xl";

/// Current format document version.
pub const FORMAT_VERSION: u32 = 1;

/// Current object metadata document version.
pub const META_VERSION: u32 = 1;

/// Minimum number of disks in a set.
pub const MIN_DISKS: usize = 6;

/// Maximum number of disks in a set.
pub const MAX_DISKS: usize = 16;

/// Hard cap on entries returned by a single list page.
pub const MAX_OBJECT_LIST: usize = 1000;

/// Default erasure block size: 10 MiB of object payload per block.
pub const DEFAULT_BLOCK_SIZE: u64 = 10 * 1024 * 1024;

/// Path separator used in object keys and disk-relative paths.
pub const SLASH: &str = "/";

/// On-disk file name for the shard at the given slot.
pub fn shard_file_name(index: usize) -> String {
    format!("file.{index}")
}

// ---------------------------------------------------------------------------
// Format document (format.json)
// ---------------------------------------------------------------------------

/// Per-disk identity document declaring the disk's position in the set.
///
/// Serialized as `{ "version": 1, "format": "xl", "disk": "<uuid>",
/// "jbod": ["<uuid>", …] }`. The index of `disk` within `jbod` is this
/// disk's slot in the set; across all disks of a set the `jbod` lists
/// must agree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatDocument {
    /// Format document version.
    pub version: u32,
    /// Backend identifier, always [`FORMAT_BACKEND`].
    pub format: String,
    /// This disk's identity.
    pub disk: Uuid,
    /// Ordered identities of every disk in the set.
    pub jbod: Vec<Uuid>,
}

impl FormatDocument {
    /// Mint a fresh, consistent set of format documents for `disk_count`
    /// disks. Document `i` carries `disk = jbod[i]`.
    pub fn fresh_set(disk_count: usize) -> Vec<FormatDocument> {
        let jbod: Vec<Uuid> = (0..disk_count).map(|_| Uuid::new_v4()).collect();
        jbod.iter()
            .map(|id| FormatDocument {
                version: FORMAT_VERSION,
                format: FORMAT_BACKEND.to_string(),
                disk: *id,
                jbod: jbod.clone(),
            })
            .collect()
    }

    /// This disk's slot in the set, or `None` if its identity is not
    /// listed in `jbod`.
    pub fn disk_index(&self) -> Option<usize> {
        self.jbod.iter().position(|id| *id == self.disk)
    }

    /// Structural validation of a single document.
    pub fn validate(&self) -> Result<(), DocumentError> {
        if self.version != FORMAT_VERSION {
            return Err(DocumentError::VersionMismatch {
                found: self.version,
            });
        }
        if self.format != FORMAT_BACKEND {
            return Err(DocumentError::UnknownBackend(self.format.clone()));
        }
        if self.disk_index().is_none() {
            return Err(DocumentError::UnknownDisk(self.disk));
        }
        let mut seen = self.jbod.clone();
        seen.sort();
        seen.dedup();
        if seen.len() != self.jbod.len() {
            return Err(DocumentError::DuplicateDisk);
        }
        Ok(())
    }

    /// Whether two documents describe the same set (identical `jbod`).
    pub fn same_set(&self, other: &FormatDocument) -> bool {
        self.jbod == other.jbod
    }
}

// ---------------------------------------------------------------------------
// Object metadata document (file.json)
// ---------------------------------------------------------------------------

/// Size and modification time of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStat {
    /// Total object size in bytes.
    pub size: u64,
    /// Modification time, RFC 3339 in the document.
    pub mod_time: DateTime<Utc>,
}

/// Recorded checksum for one shard file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumInfo {
    /// Shard file name (`file.<slot>`).
    pub name: String,
    /// Hex digest of the shard file as stored on its disk.
    pub hash: String,
}

/// Erasure coding parameters and per-shard checksums for one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErasureInfo {
    /// Number of data shards (N/2).
    pub data_blocks: usize,
    /// Number of parity shards (N/2).
    pub parity_blocks: usize,
    /// Object payload bytes per erasure block.
    pub block_size: u64,
    /// Shard distribution: `distribution[d]` is the 1-indexed shard slot
    /// stored on disk `d`.
    pub distribution: Vec<usize>,
    /// Bit-rot hash algorithm used for every shard of this object.
    pub algorithm: HashAlgorithm,
    /// One checksum entry per shard file, in slot order.
    pub checksum: Vec<ChecksumInfo>,
}

/// Per-object metadata document, written identically to every disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Metadata document version.
    pub version: u32,
    /// Object stat (size, modification time).
    pub stat: ObjectStat,
    /// Erasure layout and shard checksums.
    pub erasure: ErasureInfo,
    /// User-supplied metadata. Keys are stored lower-cased so that
    /// lookups are case-insensitive.
    pub meta: BTreeMap<String, String>,
}

impl ObjectMeta {
    /// Structural validation against the disk-set size.
    pub fn validate(&self, disk_count: usize) -> Result<(), DocumentError> {
        if self.version != META_VERSION {
            return Err(DocumentError::VersionMismatch {
                found: self.version,
            });
        }
        if self.erasure.data_blocks + self.erasure.parity_blocks != disk_count {
            return Err(DocumentError::BadDistribution);
        }
        let mut seen = vec![false; disk_count];
        if self.erasure.distribution.len() != disk_count {
            return Err(DocumentError::BadDistribution);
        }
        for &slot in &self.erasure.distribution {
            if slot == 0 || slot > disk_count || seen[slot - 1] {
                return Err(DocumentError::BadDistribution);
            }
            seen[slot - 1] = true;
        }
        if self.erasure.checksum.len() != disk_count {
            return Err(DocumentError::ChecksumCount {
                expected: disk_count,
                found: self.erasure.checksum.len(),
            });
        }
        Ok(())
    }

    /// Look up the recorded checksum for a shard file name.
    pub fn shard_checksum(&self, name: &str) -> Option<&ChecksumInfo> {
        self.erasure.checksum.iter().find(|c| c.name == name)
    }

    /// Number of erasure blocks covering the object payload.
    pub fn block_count(&self) -> u64 {
        if self.stat.size == 0 {
            return 0;
        }
        self.stat.size.div_ceil(self.erasure.block_size)
    }
}

/// Validation failures for on-disk documents.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    /// The document version is not one this engine understands.
    #[error("unsupported document version: {found}")]
    VersionMismatch {
        /// Version found in the document.
        found: u32,
    },

    /// The format document names an unknown backend.
    #[error("unknown backend format: {0}")]
    UnknownBackend(String),

    /// The disk identity is not part of its own jbod list.
    #[error("disk {0} not present in jbod list")]
    UnknownDisk(Uuid),

    /// The jbod list contains a duplicate identity.
    #[error("duplicate disk identity in jbod list")]
    DuplicateDisk,

    /// The shard distribution is not a permutation of 1..=N.
    #[error("shard distribution is not a permutation of the disk set")]
    BadDistribution,

    /// Wrong number of shard checksum entries.
    #[error("checksum list length {found}, expected {expected}")]
    ChecksumCount {
        /// Expected entry count (N).
        expected: usize,
        /// Entries found.
        found: usize,
    },
}

// ---------------------------------------------------------------------------
// Engine surface types
// ---------------------------------------------------------------------------

/// Information about a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Bucket holding the object.
    pub bucket: String,
    /// Object key within the bucket.
    pub key: String,
    /// Total size in bytes.
    pub size: u64,
    /// Modification time.
    pub mod_time: DateTime<Utc>,
    /// User-supplied metadata (lower-cased keys).
    pub user_meta: BTreeMap<String, String>,
}

/// Information about a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketInfo {
    /// Bucket name.
    pub name: String,
    /// Creation time.
    pub created: DateTime<Utc>,
}

/// One page of a paginated object listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Objects in lexicographic key order.
    pub objects: Vec<ObjectInfo>,
    /// Common prefixes (shallow listings only), in order.
    pub prefixes: Vec<String>,
    /// Whether more entries follow this page.
    pub is_truncated: bool,
    /// Marker to resume from when `is_truncated` is set.
    pub next_marker: String,
}

/// Aggregate capacity of the disk set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageInfo {
    /// Total capacity in bytes.
    pub total: u64,
    /// Free capacity in bytes.
    pub free: u64,
}

// ---------------------------------------------------------------------------
// Shard distribution
// ---------------------------------------------------------------------------

/// Compute the shard distribution for an object key.
///
/// Returns a 1-indexed rotation of `1..=count` seeded by a hash of the
/// key, so that the "first data shard" of different objects lands on
/// different disks. `out[d]` is the shard slot stored on disk `d`.
pub fn hash_order(key: &str, count: usize) -> Vec<usize> {
    let digest = blake3::hash(key.as_bytes());
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&digest.as_bytes()[..8]);
    let start = (u64::from_le_bytes(seed) % count as u64) as usize;
    (0..count).map(|d| 1 + (start + d) % count).collect()
}

// ---------------------------------------------------------------------------
// Name validation and path helpers
// ---------------------------------------------------------------------------

/// Validate a bucket name: 3–63 characters, lowercase letters, digits,
/// `.` and `-`, not beginning or ending with `.` or `-`.
pub fn is_valid_bucket_name(name: &str) -> bool {
    if name.len() < 3 || name.len() > 63 {
        return false;
    }
    if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
        return false;
    }
    name.bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'.' || b == b'-')
}

/// Validate an object key: non-empty, at most 1024 bytes, no NUL bytes,
/// no leading or trailing slash, no empty or `.`/`..` path components.
pub fn is_valid_object_key(key: &str) -> bool {
    if key.is_empty() || key.len() > 1024 || key.contains('\0') {
        return false;
    }
    if key.starts_with(SLASH) || key.ends_with(SLASH) {
        return false;
    }
    key.split(SLASH).all(|c| !c.is_empty() && c != "." && c != "..")
}

/// Join path components with `/`, skipping empties and collapsing the
/// boundary separator.
pub fn path_join(elem: &[&str]) -> String {
    let mut out = String::new();
    for part in elem {
        if part.is_empty() {
            continue;
        }
        if !out.is_empty() && !out.ends_with(SLASH) {
            out.push_str(SLASH);
        }
        out.push_str(part);
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_meta(disk_count: usize) -> ObjectMeta {
        ObjectMeta {
            version: META_VERSION,
            stat: ObjectStat {
                size: 17 * 1024 * 1024,
                mod_time: "2024-05-01T12:00:00Z".parse().unwrap(),
            },
            erasure: ErasureInfo {
                data_blocks: disk_count / 2,
                parity_blocks: disk_count / 2,
                block_size: DEFAULT_BLOCK_SIZE,
                distribution: hash_order("bucket/key", disk_count),
                algorithm: HashAlgorithm::Blake3,
                checksum: (0..disk_count)
                    .map(|i| ChecksumInfo {
                        name: shard_file_name(i),
                        hash: format!("{i:064x}"),
                    })
                    .collect(),
            },
            meta: BTreeMap::from([("content-type".to_string(), "text/plain".to_string())]),
        }
    }

    #[test]
    fn test_format_fresh_set_consistent() {
        let set = FormatDocument::fresh_set(8);
        assert_eq!(set.len(), 8);
        for (i, doc) in set.iter().enumerate() {
            doc.validate().unwrap();
            assert_eq!(doc.disk_index(), Some(i));
            assert!(doc.same_set(&set[0]));
        }
    }

    #[test]
    fn test_format_json_schema() {
        let doc = &FormatDocument::fresh_set(6)[0];
        let json = serde_json::to_value(doc).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["format"], "xl");
        assert!(json["disk"].is_string());
        assert_eq!(json["jbod"].as_array().unwrap().len(), 6);
    }

    #[test]
    fn test_format_rejects_unknown_disk() {
        let mut doc = FormatDocument::fresh_set(6)[0].clone();
        doc.disk = Uuid::new_v4();
        assert!(matches!(
            doc.validate(),
            Err(DocumentError::UnknownDisk(_))
        ));
    }

    #[test]
    fn test_format_rejects_wrong_version() {
        let mut doc = FormatDocument::fresh_set(6)[0].clone();
        doc.version = 2;
        assert!(matches!(
            doc.validate(),
            Err(DocumentError::VersionMismatch { found: 2 })
        ));
    }

    #[test]
    fn test_meta_json_field_names() {
        let meta = sample_meta(12);
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["stat"]["size"], 17 * 1024 * 1024);
        assert!(json["stat"]["modTime"].is_string());
        assert_eq!(json["erasure"]["dataBlocks"], 6);
        assert_eq!(json["erasure"]["parityBlocks"], 6);
        assert_eq!(json["erasure"]["blockSize"], DEFAULT_BLOCK_SIZE);
        assert_eq!(json["erasure"]["algorithm"], "blake3");
        assert_eq!(json["erasure"]["checksum"][0]["name"], "file.0");
        assert_eq!(json["erasure"]["distribution"].as_array().unwrap().len(), 12);
    }

    #[test]
    fn test_meta_roundtrip_json() {
        let meta = sample_meta(12);
        let encoded = serde_json::to_string(&meta).unwrap();
        let decoded: ObjectMeta = serde_json::from_str(&encoded).unwrap();
        assert_eq!(meta, decoded);
    }

    #[test]
    fn test_meta_validate_ok() {
        sample_meta(12).validate(12).unwrap();
    }

    #[test]
    fn test_meta_validate_bad_distribution() {
        let mut meta = sample_meta(12);
        meta.erasure.distribution[0] = meta.erasure.distribution[1];
        assert!(matches!(
            meta.validate(12),
            Err(DocumentError::BadDistribution)
        ));
    }

    #[test]
    fn test_meta_validate_checksum_count() {
        let mut meta = sample_meta(12);
        meta.erasure.checksum.pop();
        assert!(matches!(
            meta.validate(12),
            Err(DocumentError::ChecksumCount { .. })
        ));
    }

    #[test]
    fn test_meta_block_count() {
        let mut meta = sample_meta(12);
        meta.stat.size = 17 * 1024 * 1024;
        meta.erasure.block_size = 5 * 1024 * 1024;
        assert_eq!(meta.block_count(), 4);
        meta.stat.size = 0;
        assert_eq!(meta.block_count(), 0);
        meta.stat.size = 5 * 1024 * 1024;
        assert_eq!(meta.block_count(), 1);
    }

    #[test]
    fn test_shard_checksum_lookup() {
        let meta = sample_meta(6);
        assert!(meta.shard_checksum("file.3").is_some());
        assert!(meta.shard_checksum("file.9").is_none());
    }

    #[test]
    fn test_hash_order_is_permutation() {
        for count in [6usize, 8, 12, 16] {
            for key in ["a", "bucket/key", "deep/nested/object.bin"] {
                let order = hash_order(key, count);
                let mut sorted = order.clone();
                sorted.sort_unstable();
                assert_eq!(sorted, (1..=count).collect::<Vec<_>>(), "key={key}");
            }
        }
    }

    #[test]
    fn test_hash_order_deterministic() {
        assert_eq!(hash_order("same-key", 12), hash_order("same-key", 12));
    }

    #[test]
    fn test_hash_order_spreads() {
        // Different keys should not all start at the same disk.
        let starts: std::collections::HashSet<usize> = (0..64)
            .map(|i| hash_order(&format!("obj-{i}"), 12)[0])
            .collect();
        assert!(starts.len() > 1, "distribution never varied");
    }

    #[test]
    fn test_bucket_name_validation() {
        assert!(is_valid_bucket_name("bucket"));
        assert!(is_valid_bucket_name("my-bucket.2024"));
        assert!(!is_valid_bucket_name("ab"));
        assert!(!is_valid_bucket_name("-bucket"));
        assert!(!is_valid_bucket_name("bucket-"));
        assert!(!is_valid_bucket_name("Bucket"));
        assert!(!is_valid_bucket_name("bu/cket"));
        assert!(!is_valid_bucket_name(&"x".repeat(64)));
    }

    #[test]
    fn test_object_key_validation() {
        assert!(is_valid_object_key("a"));
        assert!(is_valid_object_key("a/b/c.txt"));
        assert!(!is_valid_object_key(""));
        assert!(!is_valid_object_key("/abs"));
        assert!(!is_valid_object_key("trail/"));
        assert!(!is_valid_object_key("a//b"));
        assert!(!is_valid_object_key("a/../b"));
        assert!(!is_valid_object_key(&"k".repeat(1025)));
    }

    #[test]
    fn test_path_join() {
        assert_eq!(path_join(&["a", "b", "c"]), "a/b/c");
        assert_eq!(path_join(&["a/", "b"]), "a/b");
        assert_eq!(path_join(&["", "b"]), "b");
        assert_eq!(path_join(&["a"]), "a");
    }

    #[test]
    fn test_shard_file_name() {
        assert_eq!(shard_file_name(0), "file.0");
        assert_eq!(shard_file_name(11), "file.11");
    }
}

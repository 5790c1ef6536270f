//! Bit-rot checksum algorithms.
//!
//! Every shard file carries a recorded digest of its full contents; the
//! read path recomputes the digest over the file as stored and compares
//! byte-for-byte. The algorithm is chosen per object and recorded in the
//! metadata document, so readers must honor whatever name they find.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::Digest;

/// Supported bit-rot hash algorithms.
///
/// Serialized by name (`"blake3"`, `"sha256"`) into the metadata
/// document's `algorithm` field. An unknown name fails deserialization,
/// which fails metadata validation for that disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// BLAKE3, 256-bit output. The default.
    #[default]
    Blake3,
    /// SHA-256.
    Sha256,
}

impl HashAlgorithm {
    /// The algorithm's wire name.
    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Blake3 => "blake3",
            HashAlgorithm::Sha256 => "sha256",
        }
    }

    /// Start a streaming hasher for this algorithm.
    pub fn hasher(&self) -> Hasher {
        match self {
            HashAlgorithm::Blake3 => Hasher::Blake3(Box::new(blake3::Hasher::new())),
            HashAlgorithm::Sha256 => Hasher::Sha256(sha2::Sha256::new()),
        }
    }

    /// One-shot hex digest of a byte slice.
    pub fn digest_hex(&self, data: &[u8]) -> String {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finalize_hex()
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Streaming hasher over one of the supported algorithms.
pub enum Hasher {
    /// BLAKE3 state.
    Blake3(Box<blake3::Hasher>),
    /// SHA-256 state.
    Sha256(sha2::Sha256),
}

impl Hasher {
    /// Feed bytes into the hash state.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Blake3(h) => {
                h.update(data);
            }
            Hasher::Sha256(h) => {
                h.update(data);
            }
        }
    }

    /// Finish and return the lowercase hex digest.
    pub fn finalize_hex(self) -> String {
        match self {
            Hasher::Blake3(h) => h.finalize().to_hex().to_string(),
            Hasher::Sha256(h) => to_hex(&h.finalize()),
        }
    }
}

fn to_hex(bytes: &[u8]) -> String {
    use fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

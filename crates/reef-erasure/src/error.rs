//! Error types for erasure coding operations.

/// Errors that can occur during erasure encoding or decoding.
#[derive(Debug, thiserror::Error)]
pub enum ErasureError {
    /// The Reed-Solomon library returned an error.
    #[error("reed-solomon error: {0}")]
    ReedSolomon(#[from] reed_solomon_erasure::Error),

    /// Fewer than D shards survived — reconstruction is impossible.
    #[error("insufficient shards: need {needed}, got {got}")]
    InsufficientShards {
        /// Minimum shards required (D).
        needed: usize,
        /// Intact shards available.
        got: usize,
    },

    /// The requested data/parity split is not usable.
    #[error("invalid erasure configuration: {data} data + {parity} parity shards")]
    InvalidConfig {
        /// Requested data shard count.
        data: usize,
        /// Requested parity shard count.
        parity: usize,
    },

    /// Input shards disagree on length.
    #[error("shard length mismatch: expected {expected}, got {got}")]
    ShardSizeMismatch {
        /// Length of the first shard.
        expected: usize,
        /// Offending length.
        got: usize,
    },
}

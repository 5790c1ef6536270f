//! Vandermonde Reed-Solomon codec.

use reed_solomon_erasure::galois_8::ReedSolomon;

use crate::error::ErasureError;

/// Reed-Solomon codec over GF(2⁸) with fixed data/parity counts.
///
/// Parameters are immutable after construction; the underlying coding
/// matrices are shared read-only, so one instance serves concurrent
/// encodes and reconstructions.
pub struct ErasureCoder {
    rs: ReedSolomon,
    data_shards: usize,
    parity_shards: usize,
}

impl ErasureCoder {
    /// Create a codec for `data_shards` + `parity_shards`.
    pub fn new(data_shards: usize, parity_shards: usize) -> Result<Self, ErasureError> {
        if data_shards == 0 || parity_shards == 0 {
            return Err(ErasureError::InvalidConfig {
                data: data_shards,
                parity: parity_shards,
            });
        }
        let rs = ReedSolomon::new(data_shards, parity_shards)?;
        Ok(Self {
            rs,
            data_shards,
            parity_shards,
        })
    }

    /// Number of data shards (D).
    pub fn data_shards(&self) -> usize {
        self.data_shards
    }

    /// Number of parity shards (P).
    pub fn parity_shards(&self) -> usize {
        self.parity_shards
    }

    /// Total shard count (N = D + P).
    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    /// Derive parity from `data` (exactly D equal-length shards) and
    /// return all N shards, data first.
    pub fn encode(&self, mut data: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, ErasureError> {
        if data.len() != self.data_shards {
            return Err(ErasureError::InsufficientShards {
                needed: self.data_shards,
                got: data.len(),
            });
        }
        let shard_len = data[0].len();
        for shard in &data {
            if shard.len() != shard_len {
                return Err(ErasureError::ShardSizeMismatch {
                    expected: shard_len,
                    got: shard.len(),
                });
            }
        }
        data.resize(self.total_shards(), vec![0u8; shard_len]);
        self.rs.encode(&mut data)?;
        Ok(data)
    }

    /// Fill in missing shards (the `None` slots) from any D survivors.
    ///
    /// Fails with [`ErasureError::InsufficientShards`] when fewer than D
    /// shards are present.
    pub fn reconstruct(&self, shards: &mut [Option<Vec<u8>>]) -> Result<(), ErasureError> {
        let present = shards.iter().filter(|s| s.is_some()).count();
        if present < self.data_shards {
            return Err(ErasureError::InsufficientShards {
                needed: self.data_shards,
                got: present,
            });
        }
        self.rs.reconstruct(shards)?;
        Ok(())
    }

    /// Re-derive parity from the data shards and compare against the
    /// parity present. Returns `false` on any mismatch — the signal for
    /// corruption that survived reconstruction.
    pub fn verify(&self, shards: &[Vec<u8>]) -> Result<bool, ErasureError> {
        Ok(self.rs.verify(shards)?)
    }
}

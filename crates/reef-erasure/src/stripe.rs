//! Block and shard length arithmetic.
//!
//! An object is consumed in blocks of at most B payload bytes. Each
//! block is split into D equal shards of `⌈L/D⌉` bytes, zero-filled at
//! the tail; the pad length is never stored because L is recoverable
//! from the total size and block index.

/// Per-shard byte length for a block of `block_len` payload bytes.
pub fn encoded_shard_len(block_len: u64, data_shards: usize) -> u64 {
    block_len.div_ceil(data_shards as u64)
}

/// Split one block of payload into D equal, zero-padded data shards.
pub fn stripe_block(block: &[u8], data_shards: usize) -> Vec<Vec<u8>> {
    let shard_len = encoded_shard_len(block.len() as u64, data_shards) as usize;
    (0..data_shards)
        .map(|i| {
            let start = (i * shard_len).min(block.len());
            let end = ((i + 1) * shard_len).min(block.len());
            let mut shard = block[start..end].to_vec();
            shard.resize(shard_len, 0);
            shard
        })
        .collect()
}

/// Block coordinates for an offset/length read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    /// First block touched by the read.
    pub start_block: u64,
    /// Last block of the object (reads stop earlier once satisfied).
    pub last_block: u64,
    /// Payload bytes to skip inside the first block.
    pub skip_in_first: u64,
}

/// Compute the block range for a read at `offset` into an object of
/// `total` bytes striped into `block_size` blocks. `total` must be
/// non-zero and `offset < total`.
pub fn block_range(offset: u64, total: u64, block_size: u64) -> BlockRange {
    BlockRange {
        start_block: offset / block_size,
        last_block: (total - 1) / block_size,
        skip_in_first: offset % block_size,
    }
}

/// Payload length of block `block` for an object of `total` bytes.
pub fn block_payload_len(block: u64, total: u64, block_size: u64) -> u64 {
    let start = block * block_size;
    block_size.min(total.saturating_sub(start))
}

/// Concatenate the D data shards of a decoded block and trim the
/// zero-fill down to `payload_len` payload bytes.
pub fn assemble_data(shards: &[Vec<u8>], data_shards: usize, payload_len: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload_len as usize);
    for shard in shards.iter().take(data_shards) {
        out.extend_from_slice(shard);
    }
    out.truncate(payload_len as usize);
    out
}

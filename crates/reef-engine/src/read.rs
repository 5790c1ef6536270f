//! The erasure read path.
//!
//! A read resolves the object's metadata by majority, orders the disks
//! by the object's shard distribution, and then walks the touched
//! blocks. Per block it seeds a parallel read of the first D ordered
//! disks (the data-shard fast path), verifying bit-rot once per disk per
//! read; failures widen the batch one disk at a time until D shards are
//! intact or D+1 are present for a verified reconstruction. Output is
//! streamed to the sink strictly in byte order — parallelism lives
//! inside a block, never across blocks.

use std::sync::Arc;

use reef_disk::{DiskApi, DiskError};
use reef_erasure::stripe::{block_payload_len, block_range, encoded_shard_len};
use reef_types::checksum::HashAlgorithm;
use reef_types::{path_join, shard_file_name};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::engine::{check_bucket, check_key, StorageEngine};
use crate::error::EngineError;

/// Outcome of one shard read attempt.
enum ShardRead {
    /// Shard chunk read and (if it was due) verified.
    Data { verified_now: bool, bytes: Vec<u8> },
    /// The shard file's digest does not match the recorded checksum.
    BitRot,
    /// The disk failed the read; it is dead for the rest of this read.
    Failed { verified_now: bool },
}

impl StorageEngine {
    /// Read `length` bytes of an object starting at `offset`, streaming
    /// them into `writer`. Returns the number of bytes written.
    pub async fn get_object<W>(
        &self,
        bucket: &str,
        key: &str,
        offset: u64,
        length: u64,
        writer: &mut W,
    ) -> Result<u64, EngineError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        check_bucket(bucket)?;
        check_key(key)?;
        if length == 0 {
            return Err(EngineError::InvalidArgument("zero-length read".to_string()));
        }

        let (meta, needs_heal) = self.read_object_meta(bucket, key).await?;
        if needs_heal {
            self.queue_heal(bucket, key);
        }

        let size = meta.stat.size;
        if offset.checked_add(length).is_none_or(|end| end > size) {
            return Err(EngineError::InvalidArgument(format!(
                "range {offset}+{length} exceeds object size {size}"
            )));
        }

        let n = self.disks.len();
        let data_shards = meta.erasure.data_blocks;
        let block_size = meta.erasure.block_size;
        let algorithm = meta.erasure.algorithm;

        // ordered[slot] = index of the disk holding shard `slot`.
        let mut ordered = vec![0usize; n];
        for (disk_idx, &slot) in meta.erasure.distribution.iter().enumerate() {
            ordered[slot - 1] = disk_idx;
        }

        // Shard files interleave one chunk per block; offsets within the
        // file always advance by the full-block chunk size.
        let chunk_size = encoded_shard_len(block_size, data_shards);
        let range = block_range(offset, size, block_size);

        // One-shot bit-rot verdicts and liveness, per ordered position.
        let mut verified: Vec<Option<bool>> = vec![None; n];
        let mut alive = vec![true; n];
        let mut bitrot_seen = false;

        let mut bytes_written: u64 = 0;
        let mut block = range.start_block;
        while bytes_written < length {
            let cur_payload = block_payload_len(block, size, block_size);
            let cur_chunk = encoded_shard_len(cur_payload, data_shards);
            let mut shards: Vec<Option<Vec<u8>>> = vec![None; n];
            let mut next_index = 0usize;

            loop {
                let Some(selected) =
                    select_read_batch(&shards, &alive, data_shards, &mut next_index)
                else {
                    // Disk list exhausted. Exactly D shards still
                    // reconstruct (verification is vacuous there); any
                    // fewer is a lost read.
                    if present(&shards) >= data_shards {
                        break;
                    }
                    return Err(quorum_error(bitrot_seen));
                };

                let outcomes = self
                    .parallel_shard_read(
                        bucket,
                        key,
                        &meta.erasure.checksum,
                        &ordered,
                        &selected,
                        &verified,
                        algorithm,
                        block * chunk_size,
                        cur_chunk,
                    )
                    .await;

                for (pos, outcome) in outcomes {
                    match outcome {
                        ShardRead::Data {
                            verified_now,
                            bytes,
                        } => {
                            if verified_now {
                                verified[pos] = Some(true);
                            }
                            shards[pos] = Some(bytes);
                        }
                        ShardRead::BitRot => {
                            verified[pos] = Some(false);
                            alive[pos] = false;
                            bitrot_seen = true;
                            warn!(
                                bucket,
                                key,
                                disk = %self.disks[ordered[pos]].endpoint(),
                                "bit-rot detected, treating shard as missing"
                            );
                            self.queue_heal(bucket, key);
                        }
                        ShardRead::Failed { verified_now } => {
                            if verified_now {
                                verified[pos] = Some(true);
                            }
                            alive[pos] = false;
                        }
                    }
                }

                if success_decode(&shards, data_shards) {
                    break;
                }
                if next_index >= n {
                    if present(&shards) >= data_shards {
                        break;
                    }
                    return Err(quorum_error(bitrot_seen));
                }
            }

            let all_data_present = shards[..data_shards].iter().all(Option::is_some);
            if !all_data_present {
                debug!(bucket, key, block, "reconstructing missing data shards");
                self.coder.reconstruct(&mut shards)?;
                let full: Vec<Vec<u8>> = shards.iter().flatten().cloned().collect();
                if full.len() != n || !self.coder.verify(&full)? {
                    return Err(EngineError::CorruptedData);
                }
            }

            // Assemble the payload and slice off first-block skip and
            // the unread remainder.
            let mut payload = Vec::with_capacity(cur_payload as usize);
            for slot in shards.iter().take(data_shards) {
                match slot {
                    Some(bytes) => payload.extend_from_slice(bytes),
                    None => return Err(quorum_error(bitrot_seen)),
                }
            }
            payload.truncate(cur_payload as usize);

            let out_offset = if block == range.start_block {
                range.skip_in_first as usize
            } else {
                0
            };
            let out_size = ((cur_payload - out_offset as u64).min(length - bytes_written)) as usize;
            writer
                .write_all(&payload[out_offset..out_offset + out_size])
                .await
                .map_err(|e| EngineError::Disk(DiskError::Io(e)))?;
            bytes_written += out_size as u64;
            block += 1;
        }

        writer
            .flush()
            .await
            .map_err(|e| EngineError::Disk(DiskError::Io(e)))?;
        Ok(bytes_written)
    }

    /// Read the selected shard chunks in parallel, verifying bit-rot
    /// first on disks not yet checked in this read.
    #[allow(clippy::too_many_arguments)]
    async fn parallel_shard_read(
        &self,
        bucket: &str,
        key: &str,
        checksums: &[reef_types::ChecksumInfo],
        ordered: &[usize],
        selected: &[usize],
        verified: &[Option<bool>],
        algorithm: HashAlgorithm,
        chunk_offset: u64,
        chunk_len: u64,
    ) -> Vec<(usize, ShardRead)> {
        let mut set = JoinSet::new();
        for &pos in selected {
            let disk_idx = ordered[pos];
            let disk: Arc<dyn DiskApi> = self.disks[disk_idx].clone();
            let bucket = bucket.to_string();
            let shard_path = path_join(&[key, &shard_file_name(disk_idx)]);
            let expected = checksums[disk_idx].hash.clone();
            let need_verify = verified[pos].is_none();
            set.spawn(async move {
                let mut verified_now = false;
                if need_verify {
                    match disk.hash_file(&bucket, &shard_path, algorithm).await {
                        Ok(hex) if hex == expected => verified_now = true,
                        Ok(_) => return (pos, ShardRead::BitRot),
                        Err(_) => return (pos, ShardRead::Failed { verified_now }),
                    }
                }
                match disk
                    .read_at(&bucket, &shard_path, chunk_offset, chunk_len)
                    .await
                {
                    Ok(bytes) => (
                        pos,
                        ShardRead::Data {
                            verified_now,
                            bytes: bytes.to_vec(),
                        },
                    ),
                    Err(_) => (pos, ShardRead::Failed { verified_now }),
                }
            });
        }
        let mut outcomes = Vec::with_capacity(selected.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => outcomes.push(result),
                Err(e) => warn!(%e, "shard read task panicked"),
            }
        }
        outcomes
    }
}

/// Count shards in hand.
fn present(shards: &[Option<Vec<u8>>]) -> usize {
    shards.iter().filter(|s| s.is_some()).count()
}

/// Whether enough shards are present to produce the block: either all D
/// data shards, or at least D+1 total for a verified reconstruction.
fn success_decode(shards: &[Option<Vec<u8>>], data_shards: usize) -> bool {
    let data = shards[..data_shards].iter().filter(|s| s.is_some()).count();
    let parity = shards[data_shards..].iter().filter(|s| s.is_some()).count();
    data == data_shards || data + parity >= data_shards + 1
}

/// Choose the next batch of ordered positions to read in parallel.
///
/// Counts shards already in hand below `next_index`, then extends the
/// batch with live unread disks until all D data shards are covered or
/// D+1 shards total are in play. When neither target is reachable the
/// remaining live disks are still returned (the caller decides whether
/// D shards suffice); `None` means nothing is left to read.
fn select_read_batch(
    shards: &[Option<Vec<u8>>],
    alive: &[bool],
    data_shards: usize,
    next_index: &mut usize,
) -> Option<Vec<usize>> {
    let mut data = 0usize;
    let mut parity = 0usize;
    for (pos, shard) in shards.iter().enumerate().take(*next_index) {
        if shard.is_some() {
            if pos < data_shards {
                data += 1;
            } else {
                parity += 1;
            }
        }
    }

    let mut selected = Vec::new();
    let mut pos = *next_index;
    while pos < shards.len() {
        if alive[pos] && shards[pos].is_none() {
            selected.push(pos);
            if pos < data_shards {
                data += 1;
            } else {
                parity += 1;
            }
            if data == data_shards || data + parity == data_shards + 1 {
                *next_index = pos + 1;
                return Some(selected);
            }
        }
        pos += 1;
    }
    *next_index = pos;
    if selected.is_empty() {
        None
    } else {
        Some(selected)
    }
}

/// Quorum exhaustion maps to `CorruptedData` when bit-rot was part of
/// the failure, so corruption never degrades into a plain quorum error.
fn quorum_error(bitrot_seen: bool) -> EngineError {
    if bitrot_seen {
        EngineError::CorruptedData
    } else {
        EngineError::ReadQuorum
    }
}

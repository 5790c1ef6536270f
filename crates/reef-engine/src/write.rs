//! The erasure write path.
//!
//! An object write streams the input in blocks of B bytes, shards each
//! block into D data + P parity shards, and appends shard i to a
//! staging directory on disk i while a running hash accumulates each
//! disk's full shard stream. When the input ends, the metadata document
//! goes to every disk and the staging directory is renamed into place —
//! all fan-outs joined and folded through the write quorum. Any step
//! failing quorum triggers best-effort cleanup of every artifact.

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::Utc;
use reef_disk::DiskError;
use reef_erasure::stripe::stripe_block;
use reef_types::{
    hash_order, path_join, shard_file_name, ChecksumInfo, ErasureInfo, ObjectInfo, ObjectMeta,
    ObjectStat, META_FILE, META_VERSION, RESERVED_BUCKET, TMP_DIR,
};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::{check_bucket, check_key, fan_out, normalize_user_meta, object_info};
use crate::engine::StorageEngine;
use crate::error::EngineError;
use crate::quorum::QuorumPolicy;

impl StorageEngine {
    /// Store an object.
    ///
    /// `size` declares the expected length; `Some(n)` reads exactly `n`
    /// bytes (short input is an error), `None` streams to end-of-input.
    /// An existing object under the same key is replaced at the rename
    /// step — last writer wins.
    pub async fn put_object<R>(
        &self,
        bucket: &str,
        key: &str,
        size: Option<u64>,
        reader: &mut R,
        user_meta: BTreeMap<String, String>,
    ) -> Result<ObjectInfo, EngineError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        check_bucket(bucket)?;
        check_key(key)?;
        self.stat_bucket(bucket).await?;

        let n = self.disks.len();
        let data_shards = n / 2;
        let tmp_dir = path_join(&[TMP_DIR, &Uuid::new_v4().to_string()]);
        let distribution = hash_order(&path_join(&[bucket, key]), n);

        info!(bucket, key, ?size, "put_object: starting write");

        // Per-disk fate for this write; an error mid-stream marks the
        // disk dead for the remainder, only final outcomes count.
        let mut dead: Vec<Option<DiskError>> = (0..n).map(|_| None).collect();
        // Running hash of each disk's complete shard stream. These are
        // advanced for dead disks too: the recorded digest must describe
        // the full shard so heal can later rebuild a matching file.
        let mut hashers: Vec<_> = (0..n).map(|_| self.algorithm.hasher()).collect();
        let mut total: u64 = 0;

        loop {
            let want = match size {
                Some(s) => self.block_size.min(s - total) as usize,
                None => self.block_size as usize,
            };
            if want == 0 {
                break;
            }
            let block = read_block(reader, want)
                .await
                .map_err(|e| EngineError::Disk(DiskError::Io(e)))?;
            if block.is_empty() {
                break;
            }
            total += block.len() as u64;

            let shards = self.coder.encode(stripe_block(&block, data_shards))?;
            let shards: Vec<Bytes> = shards.into_iter().map(Bytes::from).collect();
            for (disk_idx, hasher) in hashers.iter_mut().enumerate() {
                hasher.update(&shards[distribution[disk_idx] - 1]);
            }

            let alive: Vec<bool> = dead.iter().map(|d| d.is_none()).collect();
            let outcomes = fan_out(&self.disks, |i, disk| {
                let alive = alive[i];
                let data = shards[distribution[i] - 1].clone();
                let path = path_join(&[&tmp_dir, &shard_file_name(i)]);
                async move {
                    if !alive {
                        return Err(DiskError::DiskNotFound);
                    }
                    disk.append_file(RESERVED_BUCKET, &path, data).await
                }
            })
            .await;
            for (i, outcome) in outcomes.into_iter().enumerate() {
                if dead[i].is_none() {
                    if let Err(e) = outcome {
                        warn!(disk = %self.disks[i].endpoint(), %e, "shard append failed, dropping disk for this write");
                        dead[i] = Some(e);
                    }
                }
            }

            let alive_count = dead.iter().filter(|d| d.is_none()).count();
            if alive_count < self.quorum.write_quorum {
                self.cleanup_tmp(&tmp_dir).await;
                return Err(EngineError::WriteQuorum);
            }
        }

        if let Some(s) = size {
            if total != s {
                self.cleanup_tmp(&tmp_dir).await;
                return Err(EngineError::InvalidArgument(format!(
                    "input ended at {total} bytes, {s} declared"
                )));
            }
        }

        // Build and stage the metadata document.
        let meta = ObjectMeta {
            version: META_VERSION,
            stat: ObjectStat {
                size: total,
                mod_time: Utc::now(),
            },
            erasure: ErasureInfo {
                data_blocks: data_shards,
                parity_blocks: n - data_shards,
                block_size: self.block_size,
                distribution,
                algorithm: self.algorithm,
                checksum: hashers
                    .into_iter()
                    .enumerate()
                    .map(|(i, h)| ChecksumInfo {
                        name: shard_file_name(i),
                        hash: h.finalize_hex(),
                    })
                    .collect(),
            },
            meta: normalize_user_meta(user_meta),
        };
        let raw = Bytes::from(serde_json::to_vec(&meta)?);

        let alive: Vec<bool> = dead.iter().map(|d| d.is_none()).collect();
        let meta_path = path_join(&[&tmp_dir, META_FILE]);
        let outcomes = fan_out(&self.disks, |i, disk| {
            let alive = alive[i];
            let raw = raw.clone();
            let path = meta_path.clone();
            async move {
                if !alive {
                    return Err(DiskError::DiskNotFound);
                }
                disk.write_all(RESERVED_BUCKET, &path, raw).await
            }
        })
        .await;
        for (i, outcome) in outcomes.into_iter().enumerate() {
            if dead[i].is_none() {
                if let Err(e) = outcome {
                    dead[i] = Some(e);
                }
            }
        }
        if dead.iter().filter(|d| d.is_none()).count() < self.quorum.write_quorum {
            self.cleanup_tmp(&tmp_dir).await;
            return Err(EngineError::WriteQuorum);
        }

        // Commit: rename staging → final on every surviving disk.
        let alive: Vec<bool> = dead.iter().map(|d| d.is_none()).collect();
        let bucket_owned = bucket.to_string();
        let src = format!("{tmp_dir}/");
        let dst = format!("{key}/");
        let outcomes = fan_out(&self.disks, |i, disk| {
            let alive = alive[i];
            let bucket = bucket_owned.clone();
            let src = src.clone();
            let dst = dst.clone();
            async move {
                if !alive {
                    return Err(DiskError::DiskNotFound);
                }
                disk.rename_file(RESERVED_BUCKET, &src, &bucket, &dst).await
            }
        })
        .await;

        if !self.quorum.write_ok(&outcomes) {
            // Undo partial commits, then drop the rest of the staging.
            for (i, outcome) in outcomes.iter().enumerate() {
                if outcome.is_ok() {
                    self.cleanup_object_on_disk(i, bucket, key).await;
                }
            }
            self.cleanup_tmp(&tmp_dir).await;
            return Err(EngineError::WriteQuorum);
        }

        // Disks that missed the commit keep temp state; drop it now so
        // only background heal has work left to do.
        if outcomes.iter().any(|o| o.is_err()) {
            self.cleanup_tmp(&tmp_dir).await;
            self.queue_heal(bucket, key);
        }

        self.meta_cache.invalidate(&path_join(&[bucket, key]));

        debug!(
            bucket,
            key,
            size = total,
            blocks = meta.block_count(),
            acked = QuorumPolicy::successes(&outcomes),
            "put_object: write complete"
        );

        Ok(object_info(bucket, key, &meta))
    }

    /// Best-effort removal of a staging directory on every disk.
    pub(crate) async fn cleanup_tmp(&self, tmp_dir: &str) {
        let tmp_dir = tmp_dir.to_string();
        let _ = fan_out(&self.disks, |i, disk| {
            let shard_path = path_join(&[&tmp_dir, &shard_file_name(i)]);
            let meta_path = path_join(&[&tmp_dir, META_FILE]);
            async move {
                let _ = disk.delete_file(RESERVED_BUCKET, &shard_path).await;
                let _ = disk.delete_file(RESERVED_BUCKET, &meta_path).await;
                Ok(())
            }
        })
        .await;
    }

    /// Best-effort removal of a committed object from a single disk
    /// (undo of a partial rename).
    async fn cleanup_object_on_disk(&self, disk_idx: usize, bucket: &str, key: &str) {
        let disk = &self.disks[disk_idx];
        let _ = disk
            .delete_file(bucket, &path_join(&[key, &shard_file_name(disk_idx)]))
            .await;
        let _ = disk.delete_file(bucket, &path_join(&[key, META_FILE])).await;
    }
}

/// Read up to `limit` bytes, stopping early only at end-of-input.
async fn read_block<R>(reader: &mut R, limit: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0u8; limit];
    let mut filled = 0;
    while filled < limit {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

//! Background object heal.
//!
//! Read paths queue objects whose on-disk state diverges (missing
//! metadata, missing shard, failed checksum); the healer consumes the
//! queue off the foreground path, re-reads surviving shards,
//! reconstructs, and rewrites the deficient disks via staging + rename,
//! obeying write quorum. Failures are logged and retried on a delay —
//! never surfaced, and never grounds for marking a disk offline.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reef_disk::{DiskApi, DiskError};
use reef_erasure::ErasureCoder;
use reef_types::{
    path_join, shard_file_name, ObjectMeta, META_FILE, RESERVED_BUCKET, TMP_DIR,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::{fan_out, load_object_meta};
use crate::error::EngineError;
use crate::quorum::QuorumPolicy;

/// Give up on an object after this many failed attempts.
const MAX_HEAL_ATTEMPTS: u32 = 3;

struct HealTask {
    bucket: String,
    key: String,
    attempt: u32,
}

/// Handle to the background heal task.
pub(crate) struct Healer {
    tx: mpsc::UnboundedSender<HealTask>,
}

impl Healer {
    /// Spawn the heal loop. The loop exits once every queue handle is
    /// dropped and pending retries have drained.
    pub fn spawn(
        disks: Vec<Arc<dyn DiskApi>>,
        coder: Arc<ErasureCoder>,
        quorum: QuorumPolicy,
        retry_interval: Duration,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<HealTask>();
        let retry_tx = tx.downgrade();

        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                match heal_object(&disks, &coder, &quorum, &task.bucket, &task.key).await {
                    Ok(true) => {
                        info!(bucket = %task.bucket, key = %task.key, "healed object")
                    }
                    Ok(false) => {
                        debug!(bucket = %task.bucket, key = %task.key, "object already consistent")
                    }
                    Err(e) => {
                        warn!(
                            bucket = %task.bucket,
                            key = %task.key,
                            attempt = task.attempt,
                            %e,
                            "heal failed"
                        );
                        if task.attempt + 1 < MAX_HEAL_ATTEMPTS {
                            let retry_tx = retry_tx.clone();
                            tokio::spawn(async move {
                                tokio::time::sleep(retry_interval).await;
                                if let Some(tx) = retry_tx.upgrade() {
                                    let _ = tx.send(HealTask {
                                        attempt: task.attempt + 1,
                                        ..task
                                    });
                                }
                            });
                        }
                    }
                }
            }
        });

        Self { tx }
    }

    /// Enqueue an object for repair.
    pub fn queue(&self, bucket: &str, key: &str) {
        let _ = self.tx.send(HealTask {
            bucket: bucket.to_string(),
            key: key.to_string(),
            attempt: 0,
        });
    }
}

/// Repair one object. Returns whether any disk was rewritten.
pub(crate) async fn heal_object(
    disks: &[Arc<dyn DiskApi>],
    coder: &ErasureCoder,
    quorum: &QuorumPolicy,
    bucket: &str,
    key: &str,
) -> Result<bool, EngineError> {
    let (meta, _, _) = match load_object_meta(disks, quorum, bucket, key).await {
        Ok(loaded) => loaded,
        // Deleted in the meantime: nothing left to repair.
        Err(EngineError::ObjectNotFound { .. }) => return Ok(false),
        Err(e) => return Err(e),
    };
    let reference = Arc::new(meta);
    let n = disks.len();
    let data_shards = reference.erasure.data_blocks;
    let has_blocks = reference.block_count() > 0;
    let algorithm = reference.erasure.algorithm;

    // Assess every disk: the metadata document must match the majority
    // copy and the shard file must hash to its recorded checksum.
    let bucket_owned = bucket.to_string();
    let key_owned = key.to_string();
    let assess_ref = reference.clone();
    let assessments = fan_out(disks, |i, disk| {
        let bucket = bucket_owned.clone();
        let meta_path = path_join(&[&key_owned, META_FILE]);
        let shard_path = path_join(&[&key_owned, &shard_file_name(i)]);
        let expected = assess_ref.erasure.checksum[i].hash.clone();
        let reference = assess_ref.clone();
        async move {
            let raw = disk.read_all(&bucket, &meta_path).await?;
            let disk_meta: ObjectMeta = serde_json::from_slice(&raw)
                .map_err(|e| DiskError::Corrupted(format!("file.json: {e}")))?;
            if disk_meta != *reference {
                return Err(DiskError::Corrupted("diverging metadata".to_string()));
            }
            if has_blocks {
                let hex = disk.hash_file(&bucket, &shard_path, algorithm).await?;
                if hex != expected {
                    return Err(DiskError::Corrupted("shard checksum mismatch".to_string()));
                }
            }
            Ok(())
        }
    })
    .await;

    let deficient: Vec<usize> = assessments
        .iter()
        .enumerate()
        .filter_map(|(i, a)| match a {
            Ok(()) => None,
            // Offline disks are retried later, not rewritten blind.
            Err(e) if e.is_offline() => None,
            Err(_) => Some(i),
        })
        .collect();
    if deficient.is_empty() {
        return Ok(false);
    }

    // Rebuild the full shard set from the healthy disks.
    let mut full_shards: Vec<Vec<u8>> = Vec::new();
    if has_blocks {
        let healthy: Vec<bool> = assessments.iter().map(|a| a.is_ok()).collect();
        let reads = fan_out(disks, |i, disk| {
            let healthy = healthy[i];
            let bucket = bucket_owned.clone();
            let shard_path = path_join(&[&key_owned, &shard_file_name(i)]);
            async move {
                if !healthy {
                    return Err(DiskError::DiskNotFound);
                }
                disk.read_all(&bucket, &shard_path).await
            }
        })
        .await;

        let mut shards: Vec<Option<Vec<u8>>> = vec![None; n];
        for (i, read) in reads.into_iter().enumerate() {
            if let Ok(bytes) = read {
                let slot = reference.erasure.distribution[i] - 1;
                shards[slot] = Some(bytes.to_vec());
            }
        }
        if shards.iter().filter(|s| s.is_some()).count() < data_shards {
            return Err(EngineError::ReadQuorum);
        }
        coder.reconstruct(&mut shards)?;
        full_shards = shards.into_iter().flatten().collect();
        if full_shards.len() != n || !coder.verify(&full_shards)? {
            return Err(EngineError::CorruptedData);
        }
    }

    // Rewrite each deficient disk through its own staging directory.
    let meta_raw = Bytes::from(serde_json::to_vec(reference.as_ref())?);
    let mut healed = 0usize;
    for &i in &deficient {
        let disk = &disks[i];
        let tmp_dir = path_join(&[TMP_DIR, &Uuid::new_v4().to_string()]);
        let result = async {
            if has_blocks {
                let slot = reference.erasure.distribution[i] - 1;
                disk.write_all(
                    RESERVED_BUCKET,
                    &path_join(&[&tmp_dir, &shard_file_name(i)]),
                    Bytes::from(full_shards[slot].clone()),
                )
                .await?;
            }
            disk.write_all(
                RESERVED_BUCKET,
                &path_join(&[&tmp_dir, META_FILE]),
                meta_raw.clone(),
            )
            .await?;
            disk.rename_file(
                RESERVED_BUCKET,
                &format!("{tmp_dir}/"),
                bucket,
                &format!("{key_owned}/"),
            )
            .await
        }
        .await;
        match result {
            Ok(()) => {
                healed += 1;
                debug!(bucket, key, disk = %disk.endpoint(), "rewrote shard and metadata");
            }
            Err(e) => {
                warn!(bucket, key, disk = %disk.endpoint(), %e, "heal write failed");
                let _ = disk
                    .delete_file(RESERVED_BUCKET, &path_join(&[&tmp_dir, &shard_file_name(i)]))
                    .await;
                let _ = disk
                    .delete_file(RESERVED_BUCKET, &path_join(&[&tmp_dir, META_FILE]))
                    .await;
            }
        }
    }

    let healthy_count = assessments.iter().filter(|a| a.is_ok()).count();
    if healthy_count + healed < quorum.write_quorum {
        return Err(EngineError::WriteQuorum);
    }
    Ok(healed > 0)
}

//! [`StorageEngine`] — construction, bucket operations, object stat and
//! delete, and the shared metadata loading used by every read-side path.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reef_disk::{DiskApi, DiskError};
use reef_erasure::ErasureCoder;
use reef_types::checksum::HashAlgorithm;
use reef_types::{
    is_valid_bucket_name, is_valid_object_key, path_join, shard_file_name, BucketInfo,
    FormatDocument, ObjectInfo, ObjectMeta, StorageInfo, DEFAULT_BLOCK_SIZE, MAX_DISKS, META_FILE,
    MIN_DISKS, RESERVED_BUCKET, TMP_DIR,
};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::cache::MetaCache;
use crate::error::EngineError;
use crate::format;
use crate::heal::Healer;
use crate::quorum::QuorumPolicy;
use crate::walker::WalkerPool;

/// Tunables for [`StorageEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Object payload bytes per erasure block.
    pub block_size: u64,
    /// Bit-rot hash algorithm recorded for new objects.
    pub algorithm: HashAlgorithm,
    /// Byte cap for the metadata document cache (0 disables it).
    pub meta_cache_bytes: u64,
    /// How long a walker waits for its consumer before giving up.
    pub walker_send_timeout: Duration,
    /// Bound on bootstrap quorum retries.
    pub bootstrap_timeout: Duration,
    /// Delay before a failed heal is retried.
    pub heal_retry_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            algorithm: HashAlgorithm::Blake3,
            meta_cache_bytes: 32 * 1024 * 1024,
            walker_send_timeout: Duration::from_secs(60),
            bootstrap_timeout: Duration::from_secs(10),
            heal_retry_interval: Duration::from_secs(30),
        }
    }
}

/// Run one task per disk and join all of them, returning per-disk
/// outcomes in disk order.
pub(crate) async fn fan_out<T, F, Fut>(
    disks: &[Arc<dyn DiskApi>],
    f: F,
) -> Vec<Result<T, DiskError>>
where
    T: Send + 'static,
    F: Fn(usize, Arc<dyn DiskApi>) -> Fut,
    Fut: Future<Output = Result<T, DiskError>> + Send + 'static,
{
    let mut set = JoinSet::new();
    for (i, disk) in disks.iter().enumerate() {
        let fut = f(i, disk.clone());
        set.spawn(async move { (i, fut.await) });
    }
    let mut outcomes: Vec<Result<T, DiskError>> = (0..disks.len())
        .map(|_| Err(DiskError::DiskNotFound))
        .collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((i, outcome)) => outcomes[i] = outcome,
            Err(e) => warn!(%e, "disk task panicked"),
        }
    }
    outcomes
}

/// The erasure-coded object storage engine over a fixed disk set.
pub struct StorageEngine {
    /// Disks ordered by their format slot.
    pub(crate) disks: Vec<Arc<dyn DiskApi>>,
    /// Reference format document (set identities).
    pub(crate) format: FormatDocument,
    pub(crate) quorum: QuorumPolicy,
    pub(crate) coder: Arc<ErasureCoder>,
    pub(crate) block_size: u64,
    pub(crate) algorithm: HashAlgorithm,
    pub(crate) walkers: WalkerPool,
    pub(crate) meta_cache: MetaCache,
    pub(crate) healer: Healer,
    pub(crate) walker_send_timeout: Duration,
}

impl StorageEngine {
    /// Bootstrap an engine over `disks`.
    ///
    /// Loads (or initializes, or heals) the per-disk format documents
    /// and fixes each disk's logical slot. Transient quorum failures are
    /// retried with exponential backoff up to the configured bound.
    pub async fn new(
        disks: Vec<Arc<dyn DiskApi>>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let n = disks.len();
        if !(MIN_DISKS..=MAX_DISKS).contains(&n) || n % 2 != 0 {
            return Err(EngineError::InvalidArgument(format!(
                "disk count must be even and within {MIN_DISKS}..={MAX_DISKS}, got {n}"
            )));
        }
        let quorum = QuorumPolicy::new(n);

        let deadline = tokio::time::Instant::now() + config.bootstrap_timeout;
        let mut backoff = Duration::from_millis(100);
        let (ordered, format_doc) = loop {
            match format::bootstrap(&disks, &quorum).await {
                Ok(result) => break result,
                Err(e @ (EngineError::ReadQuorum | EngineError::WriteQuorum))
                    if tokio::time::Instant::now() + backoff < deadline =>
                {
                    warn!(%e, delay_ms = backoff.as_millis() as u64, "bootstrap quorum not met, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => return Err(e),
            }
        };

        // House keeping: drop write staging left behind by crashed or
        // cancelled uploads. Committed objects are unaffected.
        sweep_stale_staging(&ordered).await;

        let coder = Arc::new(ErasureCoder::new(n / 2, n / 2)?);
        let healer = Healer::spawn(
            ordered.clone(),
            coder.clone(),
            quorum,
            config.heal_retry_interval,
        );

        info!(
            disks = n,
            data_shards = n / 2,
            parity_shards = n / 2,
            block_size = config.block_size,
            "engine ready"
        );

        Ok(Self {
            disks: ordered,
            format: format_doc,
            quorum,
            coder,
            block_size: config.block_size,
            algorithm: config.algorithm,
            walkers: WalkerPool::new(),
            meta_cache: MetaCache::new(config.meta_cache_bytes),
            healer,
            walker_send_timeout: config.walker_send_timeout,
        })
    }

    /// Number of disks in the set.
    pub fn disk_count(&self) -> usize {
        self.disks.len()
    }

    /// The set's reference format document.
    pub fn format(&self) -> &FormatDocument {
        &self.format
    }

    // ------------------------------------------------------------------
    // Bucket operations
    // ------------------------------------------------------------------

    /// Create a bucket on every disk, requiring write quorum.
    pub async fn make_bucket(&self, bucket: &str) -> Result<(), EngineError> {
        check_bucket(bucket)?;
        let name = bucket.to_string();
        let outcomes = fan_out(&self.disks, |_i, disk| {
            let name = name.clone();
            async move { disk.make_volume(&name).await }
        })
        .await;

        let exists = outcomes
            .iter()
            .filter(|o| matches!(o, Err(DiskError::AlreadyExists(_))))
            .count();
        if exists == self.disks.len() {
            return Err(EngineError::BucketAlreadyExists(bucket.to_string()));
        }
        // Pre-existing volumes on some disks still count as acks.
        let acked = QuorumPolicy::successes(&outcomes) + exists;
        if acked < self.quorum.write_quorum {
            return Err(EngineError::WriteQuorum);
        }
        Ok(())
    }

    /// Delete an empty bucket from every disk.
    pub async fn delete_bucket(&self, bucket: &str) -> Result<(), EngineError> {
        check_bucket(bucket)?;
        let name = bucket.to_string();

        // Refuse when any disk still reports entries under the bucket.
        let listings = fan_out(&self.disks, |_i, disk| {
            let name = name.clone();
            async move { disk.list_dir(&name, "").await }
        })
        .await;
        if self.quorum.all_not_found(&listings) {
            return Err(EngineError::BucketNotFound(bucket.to_string()));
        }
        if listings
            .iter()
            .any(|o| o.as_ref().is_ok_and(|entries| !entries.is_empty()))
        {
            return Err(EngineError::BucketNotEmpty(bucket.to_string()));
        }

        let outcomes = fan_out(&self.disks, |_i, disk| {
            let name = name.clone();
            async move {
                match disk.delete_volume(&name).await {
                    // A disk that never saw the bucket still counts.
                    Err(DiskError::NotFound(_)) => Ok(()),
                    other => other,
                }
            }
        })
        .await;
        if !self.quorum.write_ok(&outcomes) {
            return Err(EngineError::WriteQuorum);
        }
        Ok(())
    }

    /// List all buckets from one load-balanced disk.
    pub async fn list_buckets(&self) -> Result<Vec<BucketInfo>, EngineError> {
        for disk in self.load_balanced_disks() {
            match disk.list_volumes().await {
                Ok(volumes) => {
                    return Ok(volumes
                        .into_iter()
                        .filter(|v| v.name != RESERVED_BUCKET && is_valid_bucket_name(&v.name))
                        .map(|v| BucketInfo {
                            name: v.name,
                            created: v.created,
                        })
                        .collect());
                }
                Err(e) => warn!(disk = %disk.endpoint(), %e, "list_volumes failed, trying next disk"),
            }
        }
        Err(EngineError::ReadQuorum)
    }

    /// Stat a bucket across the set.
    pub async fn stat_bucket(&self, bucket: &str) -> Result<BucketInfo, EngineError> {
        check_bucket(bucket)?;
        let name = bucket.to_string();
        let outcomes = fan_out(&self.disks, |_i, disk| {
            let name = name.clone();
            async move { disk.stat_volume(&name).await }
        })
        .await;

        if self.quorum.all_not_found(&outcomes) {
            return Err(EngineError::BucketNotFound(bucket.to_string()));
        }
        if !self.quorum.read_ok(&outcomes) {
            return Err(EngineError::ReadQuorum);
        }
        let info = outcomes
            .into_iter()
            .find_map(|o| o.ok())
            .ok_or(EngineError::ReadQuorum)?;
        Ok(BucketInfo {
            name: info.name,
            created: info.created,
        })
    }

    // ------------------------------------------------------------------
    // Object stat / delete
    // ------------------------------------------------------------------

    /// Stat an object. Healable divergence observed along the way is
    /// queued for background repair.
    pub async fn stat_object(&self, bucket: &str, key: &str) -> Result<ObjectInfo, EngineError> {
        check_bucket(bucket)?;
        check_key(key)?;
        let (meta, needs_heal) = self.read_object_meta(bucket, key).await?;
        if needs_heal {
            self.healer.queue(bucket, key);
        }
        Ok(object_info(bucket, key, &meta))
    }

    /// Delete an object from every disk, tolerating failures up to the
    /// write-quorum margin.
    pub async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), EngineError> {
        check_bucket(bucket)?;
        check_key(key)?;
        // Existence gate (maps a fully absent object to NotFound).
        self.read_object_meta(bucket, key).await?;
        self.meta_cache.invalidate(&path_join(&[bucket, key]));

        let bucket_owned = bucket.to_string();
        let key_owned = key.to_string();
        let outcomes = fan_out(&self.disks, |i, disk| {
            let bucket = bucket_owned.clone();
            let key = key_owned.clone();
            async move {
                // Zero-byte objects have no shard file; ignore its absence.
                match disk
                    .delete_file(&bucket, &path_join(&[&key, &shard_file_name(i)]))
                    .await
                {
                    Ok(()) | Err(DiskError::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
                disk.delete_file(&bucket, &path_join(&[&key, META_FILE]))
                    .await
            }
        })
        .await;

        if !self.quorum.write_ok(&outcomes) {
            return Err(EngineError::WriteQuorum);
        }
        Ok(())
    }

    /// Aggregate capacity over the set, scaled from the smallest disk.
    pub async fn storage_info(&self) -> Result<StorageInfo, EngineError> {
        let outcomes = fan_out(&self.disks, |_i, disk| async move { disk.disk_info().await }).await;
        let smallest = outcomes
            .into_iter()
            .flatten()
            .min_by_key(|info| info.total)
            .ok_or(EngineError::ReadQuorum)?;
        let n = self.disks.len() as u64;
        Ok(StorageInfo {
            total: smallest.total * n,
            free: smallest.free * n,
        })
    }

    // ------------------------------------------------------------------
    // Shared internals
    // ------------------------------------------------------------------

    /// Disks in a random order, for single-disk read balancing.
    pub(crate) fn load_balanced_disks(&self) -> Vec<Arc<dyn DiskApi>> {
        use rand::seq::SliceRandom;
        let mut disks = self.disks.clone();
        disks.shuffle(&mut rand::thread_rng());
        disks
    }

    /// Read an object's metadata document, via the cache.
    ///
    /// Returns the document plus whether the on-disk state needs heal.
    /// Cache hits report no heal (the verdict was acted on at fill time).
    pub(crate) async fn read_object_meta(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<(Arc<ObjectMeta>, bool), EngineError> {
        let cache_key = path_join(&[bucket, key]);
        if let Some(meta) = self.meta_cache.get(&cache_key) {
            return Ok((meta, false));
        }
        let (meta, needs_heal, doc_size) =
            load_object_meta(&self.disks, &self.quorum, bucket, key).await?;
        let meta = Arc::new(meta);
        self.meta_cache.put(cache_key, meta.clone(), doc_size);
        Ok((meta, needs_heal))
    }

    /// Queue an object for background heal.
    pub(crate) fn queue_heal(&self, bucket: &str, key: &str) {
        self.healer.queue(bucket, key);
    }
}

/// Build an [`ObjectInfo`] from a metadata document.
pub(crate) fn object_info(bucket: &str, key: &str, meta: &ObjectMeta) -> ObjectInfo {
    ObjectInfo {
        bucket: bucket.to_string(),
        key: key.to_string(),
        size: meta.stat.size,
        mod_time: meta.stat.mod_time,
        user_meta: meta.meta.clone(),
    }
}

/// Load and majority-pick an object's metadata document from all disks.
///
/// Returns `(document, needs_heal, serialized_size)`.
pub(crate) async fn load_object_meta(
    disks: &[Arc<dyn DiskApi>],
    quorum: &QuorumPolicy,
    bucket: &str,
    key: &str,
) -> Result<(ObjectMeta, bool, u64), EngineError> {
    let bucket_owned = bucket.to_string();
    let meta_path = path_join(&[key, META_FILE]);
    let disk_count = disks.len();

    let outcomes = fan_out(disks, |_i, disk| {
        let bucket = bucket_owned.clone();
        let path = meta_path.clone();
        async move {
            let raw = disk.read_all(&bucket, &path).await?;
            let meta: ObjectMeta = serde_json::from_slice(&raw)
                .map_err(|e| DiskError::Corrupted(format!("file.json: {e}")))?;
            meta.validate(disk_count)
                .map_err(|e| DiskError::Corrupted(format!("file.json: {e}")))?;
            Ok((meta, raw.len() as u64))
        }
    })
    .await;

    if quorum.all_not_found(&outcomes) {
        return Err(EngineError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
    }
    if !quorum.read_ok(&outcomes) {
        return Err(EngineError::ReadQuorum);
    }

    // Majority agreement on (mod_time, size); anything else is quorum loss.
    let mut best: Option<(&ObjectMeta, u64, usize)> = None;
    for outcome in &outcomes {
        let Ok((meta, size)) = outcome else { continue };
        let votes = outcomes
            .iter()
            .filter(|o| {
                o.as_ref().is_ok_and(|(m, _)| {
                    m.stat.mod_time == meta.stat.mod_time && m.stat.size == meta.stat.size
                })
            })
            .count();
        if best.is_none_or(|(_, _, best_votes)| votes > best_votes) {
            best = Some((meta, *size, votes));
        }
    }
    let (meta, doc_size, votes) = best.ok_or(EngineError::ReadQuorum)?;
    if votes < quorum.read_quorum {
        return Err(EngineError::ReadQuorum);
    }

    // Heal when state is missing or damaged somewhere, or when a
    // minority of disks carries a diverging document.
    let diverging = outcomes
        .iter()
        .filter(|o| o.as_ref().is_ok())
        .count()
        > votes;
    let needs_heal = quorum.needs_heal(&outcomes) || diverging;

    Ok((meta.clone(), needs_heal, doc_size))
}

/// Best-effort removal of leftover write staging on every disk.
async fn sweep_stale_staging(disks: &[Arc<dyn DiskApi>]) {
    let _ = fan_out(disks, |_i, disk| async move {
        let staging = match disk.list_dir(RESERVED_BUCKET, TMP_DIR).await {
            Ok(entries) => entries,
            Err(_) => return Ok(()),
        };
        for entry in &staging {
            let Some(dir) = entry.strip_suffix('/') else {
                continue;
            };
            let dir_path = path_join(&[TMP_DIR, dir]);
            if let Ok(files) = disk.list_dir(RESERVED_BUCKET, &dir_path).await {
                for file in files {
                    let _ = disk
                        .delete_file(RESERVED_BUCKET, &path_join(&[&dir_path, &file]))
                        .await;
                }
            }
        }
        if !staging.is_empty() {
            warn!(
                disk = %disk.endpoint(),
                stale = staging.len(),
                "swept stale write staging"
            );
        }
        Ok(())
    })
    .await;
}

pub(crate) fn check_bucket(bucket: &str) -> Result<(), EngineError> {
    if !is_valid_bucket_name(bucket) {
        return Err(EngineError::InvalidBucketName(bucket.to_string()));
    }
    Ok(())
}

pub(crate) fn check_key(key: &str) -> Result<(), EngineError> {
    if !is_valid_object_key(key) {
        return Err(EngineError::InvalidObjectKey(key.to_string()));
    }
    Ok(())
}

/// Normalize user metadata: keys are case-insensitive and unique, so
/// they are stored lower-cased (last value wins on collisions).
pub(crate) fn normalize_user_meta(meta: BTreeMap<String, String>) -> BTreeMap<String, String> {
    meta.into_iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v))
        .collect()
}

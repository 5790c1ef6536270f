//! Shared test utilities for engine tests.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use reef_disk::{DiskApi, LocalDisk};
use reef_types::{hash_order, path_join, ObjectInfo};
use tempfile::TempDir;

use crate::engine::{EngineConfig, StorageEngine};
use crate::error::EngineError;

/// Block size kept small so multi-block objects stay cheap.
pub(crate) const TEST_BLOCK_SIZE: u64 = 64 * 1024;

/// An engine over N temporary local disks, with direct disk handles for
/// fault injection.
pub(crate) struct TestSet {
    pub engine: StorageEngine,
    pub disks: Vec<Arc<LocalDisk>>,
    _dirs: Vec<TempDir>,
}

pub(crate) fn test_config() -> EngineConfig {
    EngineConfig {
        block_size: TEST_BLOCK_SIZE,
        bootstrap_timeout: Duration::from_millis(500),
        heal_retry_interval: Duration::from_millis(50),
        ..EngineConfig::default()
    }
}

pub(crate) async fn test_set(n: usize) -> TestSet {
    test_set_with(n, test_config()).await
}

pub(crate) async fn test_set_with(n: usize, config: EngineConfig) -> TestSet {
    let mut dirs = Vec::with_capacity(n);
    let mut disks = Vec::with_capacity(n);
    for _ in 0..n {
        let dir = TempDir::new().unwrap();
        disks.push(Arc::new(LocalDisk::new(dir.path()).unwrap()));
        dirs.push(dir);
    }
    let api_disks: Vec<Arc<dyn DiskApi>> = disks
        .iter()
        .map(|d| d.clone() as Arc<dyn DiskApi>)
        .collect();
    let engine = StorageEngine::new(api_disks, config).await.unwrap();
    TestSet {
        engine,
        disks,
        _dirs: dirs,
    }
}

/// Deterministic, non-repeating test data.
pub(crate) fn test_data(size: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(size);
    let mut state: u32 = 0xDEAD_BEEF;
    for _ in 0..size {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        data.push((state >> 16) as u8);
    }
    data
}

pub(crate) async fn put(
    engine: &StorageEngine,
    bucket: &str,
    key: &str,
    data: &[u8],
) -> ObjectInfo {
    engine
        .put_object(
            bucket,
            key,
            Some(data.len() as u64),
            &mut &data[..],
            BTreeMap::new(),
        )
        .await
        .unwrap()
}

pub(crate) async fn get(
    engine: &StorageEngine,
    bucket: &str,
    key: &str,
    offset: u64,
    length: u64,
) -> Result<Vec<u8>, EngineError> {
    let mut sink = Cursor::new(Vec::new());
    let written = engine
        .get_object(bucket, key, offset, length, &mut sink)
        .await?;
    let data = sink.into_inner();
    assert_eq!(written as usize, data.len());
    Ok(data)
}

/// Disk indices ordered by shard slot for an object: element `j` is the
/// disk holding shard `j` (data shards first).
pub(crate) fn ordered_disks_for(bucket: &str, key: &str, n: usize) -> Vec<usize> {
    let distribution = hash_order(&path_join(&[bucket, key]), n);
    let mut ordered = vec![0usize; n];
    for (disk_idx, &slot) in distribution.iter().enumerate() {
        ordered[slot - 1] = disk_idx;
    }
    ordered
}

/// Path of the shard file an object keeps on disk `disk_idx`.
pub(crate) fn shard_path(key: &str, disk_idx: usize) -> String {
    path_join(&[key, &reef_types::shard_file_name(disk_idx)])
}

/// Path of the object's metadata document.
pub(crate) fn meta_path(key: &str) -> String {
    path_join(&[key, reef_types::META_FILE])
}

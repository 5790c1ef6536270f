//! Format bootstrap: initialization, idempotence, heal, and refusal.

use std::sync::Arc;

use reef_disk::{DiskApi, LocalDisk};
use reef_types::{FormatDocument, FORMAT_FILE, RESERVED_BUCKET};
use tempfile::TempDir;

use super::helpers::{get, put, test_config, test_data};
use crate::engine::StorageEngine;
use crate::error::EngineError;

fn open_set(n: usize) -> (Vec<TempDir>, Vec<Arc<LocalDisk>>) {
    let dirs: Vec<TempDir> = (0..n).map(|_| TempDir::new().unwrap()).collect();
    let disks = dirs
        .iter()
        .map(|d| Arc::new(LocalDisk::new(d.path()).unwrap()))
        .collect();
    (dirs, disks)
}

fn as_api(disks: &[Arc<LocalDisk>]) -> Vec<Arc<dyn DiskApi>> {
    disks.iter().map(|d| d.clone() as Arc<dyn DiskApi>).collect()
}

async fn read_format(disk: &LocalDisk) -> FormatDocument {
    let raw = disk.read_all(RESERVED_BUCKET, FORMAT_FILE).await.unwrap();
    serde_json::from_slice(&raw).unwrap()
}

#[tokio::test]
async fn test_fresh_bootstrap_formats_every_disk() {
    let (_dirs, disks) = open_set(6);
    let engine = StorageEngine::new(as_api(&disks), test_config())
        .await
        .unwrap();

    let reference = read_format(&disks[0]).await;
    assert_eq!(reference.jbod.len(), 6);
    for (i, disk) in disks.iter().enumerate() {
        let doc = read_format(disk).await;
        doc.validate().unwrap();
        assert_eq!(doc.jbod, reference.jbod, "disk {i} disagrees on the set");
        assert_eq!(doc.disk_index(), Some(i));
    }
    assert_eq!(engine.format().jbod, reference.jbod);
}

#[tokio::test]
async fn test_bootstrap_is_idempotent() {
    let (_dirs, disks) = open_set(6);
    let engine = StorageEngine::new(as_api(&disks), test_config())
        .await
        .unwrap();
    let before: Vec<FormatDocument> = {
        let mut docs = Vec::new();
        for disk in &disks {
            docs.push(read_format(disk).await);
        }
        docs
    };
    drop(engine);

    let engine = StorageEngine::new(as_api(&disks), test_config())
        .await
        .unwrap();
    for (i, disk) in disks.iter().enumerate() {
        assert_eq!(read_format(disk).await, before[i], "bootstrap rewrote disk {i}");
    }
    drop(engine);
}

#[tokio::test]
async fn test_bootstrap_heals_missing_formats() {
    let (_dirs, disks) = open_set(6);
    let engine = StorageEngine::new(as_api(&disks), test_config())
        .await
        .unwrap();
    let reference = read_format(&disks[0]).await;
    drop(engine);

    disks[1]
        .delete_file(RESERVED_BUCKET, FORMAT_FILE)
        .await
        .unwrap();
    disks[4]
        .delete_file(RESERVED_BUCKET, FORMAT_FILE)
        .await
        .unwrap();

    let engine = StorageEngine::new(as_api(&disks), test_config())
        .await
        .unwrap();
    assert_eq!(engine.format().jbod, reference.jbod);
    for (i, disk) in disks.iter().enumerate() {
        let doc = read_format(disk).await;
        assert_eq!(doc.jbod, reference.jbod);
        assert_eq!(doc.disk_index(), Some(i), "disk {i} healed into wrong slot");
    }
}

#[tokio::test]
async fn test_data_survives_engine_restart() {
    let (_dirs, disks) = open_set(6);
    let engine = StorageEngine::new(as_api(&disks), test_config())
        .await
        .unwrap();
    engine.make_bucket("bucket").await.unwrap();
    let data = test_data(50_000);
    put(&engine, "bucket", "k", &data).await;
    drop(engine);

    let engine = StorageEngine::new(as_api(&disks), test_config())
        .await
        .unwrap();
    let read = get(&engine, "bucket", "k", 0, data.len() as u64)
        .await
        .unwrap();
    assert_eq!(read, data);
}

#[tokio::test]
async fn test_bootstrap_sweeps_stale_staging() {
    use bytes::Bytes;

    let (_dirs, disks) = open_set(6);
    let engine = StorageEngine::new(as_api(&disks), test_config())
        .await
        .unwrap();
    drop(engine);

    // A crashed upload leaves shard and metadata staging behind.
    disks[0]
        .write_all(
            RESERVED_BUCKET,
            "tmp/0f7c3a/file.0",
            Bytes::from_static(b"orphan"),
        )
        .await
        .unwrap();
    disks[0]
        .write_all(
            RESERVED_BUCKET,
            "tmp/0f7c3a/file.json",
            Bytes::from_static(b"{}"),
        )
        .await
        .unwrap();

    let _engine = StorageEngine::new(as_api(&disks), test_config())
        .await
        .unwrap();
    let leftovers = disks[0]
        .list_dir(RESERVED_BUCKET, "tmp")
        .await
        .unwrap_or_default();
    assert!(leftovers.is_empty(), "stale staging survived: {leftovers:?}");
}

#[tokio::test]
async fn test_bootstrap_rejects_mixed_sets() {
    let (_dirs_a, disks_a) = open_set(6);
    let (_dirs_b, disks_b) = open_set(6);
    let engine_a = StorageEngine::new(as_api(&disks_a), test_config())
        .await
        .unwrap();
    let engine_b = StorageEngine::new(as_api(&disks_b), test_config())
        .await
        .unwrap();
    drop(engine_a);
    drop(engine_b);

    // Transplant a foreign format document onto disk 0 of set A.
    let foreign = disks_b[0].read_all(RESERVED_BUCKET, FORMAT_FILE).await.unwrap();
    disks_a[0]
        .write_all(RESERVED_BUCKET, FORMAT_FILE, foreign)
        .await
        .unwrap();

    let result = StorageEngine::new(as_api(&disks_a), test_config()).await;
    assert!(matches!(result, Err(EngineError::Disk(_))));
}

#[tokio::test]
async fn test_bootstrap_with_offline_disks_within_quorum() {
    let (_dirs, disks) = open_set(6);
    let engine = StorageEngine::new(as_api(&disks), test_config())
        .await
        .unwrap();
    drop(engine);

    disks[0].set_online(false);
    disks[1].set_online(false);
    let engine = StorageEngine::new(as_api(&disks), test_config()).await;
    assert!(engine.is_ok(), "4 of 6 formatted disks is read quorum");
    disks[0].set_online(true);
    disks[1].set_online(true);
}

#[tokio::test]
async fn test_bootstrap_quorum_loss_surfaces_after_retries() {
    let (_dirs, disks) = open_set(6);
    for disk in &disks[..3] {
        disk.set_online(false);
    }
    let result = StorageEngine::new(as_api(&disks), test_config()).await;
    assert!(matches!(result, Err(EngineError::ReadQuorum)));
}

#[tokio::test]
async fn test_bootstrap_rejects_bad_disk_counts() {
    for n in [2usize, 5, 7, 18] {
        let (_dirs, disks) = open_set(n);
        let result = StorageEngine::new(as_api(&disks), test_config()).await;
        assert!(
            matches!(result, Err(EngineError::InvalidArgument(_))),
            "disk count {n} must be rejected"
        );
    }
}

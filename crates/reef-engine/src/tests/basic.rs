//! Write/read round-trips and the bucket surface.

use std::collections::BTreeMap;

use reef_disk::DiskApi;
use reef_types::RESERVED_BUCKET;

use super::helpers::*;
use crate::error::EngineError;

#[tokio::test]
async fn test_put_get_roundtrip_multiblock() {
    let set = test_set(12).await;
    set.engine.make_bucket("bucket").await.unwrap();

    // 3.4 blocks, mirroring the 17 MiB / 5 MiB shape.
    let data = vec![0xABu8; (TEST_BLOCK_SIZE * 17 / 5) as usize];
    let info = put(&set.engine, "bucket", "k", &data).await;
    assert_eq!(info.size, data.len() as u64);

    let read = get(&set.engine, "bucket", "k", 0, data.len() as u64)
        .await
        .unwrap();
    assert_eq!(read, data);

    let stat = set.engine.stat_object("bucket", "k").await.unwrap();
    assert_eq!(stat.size, data.len() as u64);
}

#[tokio::test]
async fn test_get_single_byte_at_block_boundary() {
    let set = test_set(12).await;
    set.engine.make_bucket("bucket").await.unwrap();
    let data = test_data((TEST_BLOCK_SIZE * 3) as usize + 17);
    put(&set.engine, "bucket", "k", &data).await;

    for offset in [0, TEST_BLOCK_SIZE, TEST_BLOCK_SIZE * 2, data.len() as u64 - 1] {
        let byte = get(&set.engine, "bucket", "k", offset, 1).await.unwrap();
        assert_eq!(byte, vec![data[offset as usize]], "offset={offset}");
    }
}

#[tokio::test]
async fn test_roundtrip_varied_sizes() {
    let set = test_set(6).await;
    set.engine.make_bucket("bucket").await.unwrap();
    for size in [
        1usize,
        17,
        4096,
        TEST_BLOCK_SIZE as usize - 1,
        TEST_BLOCK_SIZE as usize,
        TEST_BLOCK_SIZE as usize + 1,
        2 * TEST_BLOCK_SIZE as usize + 300,
    ] {
        let data = test_data(size);
        let key = format!("sz-{size}");
        put(&set.engine, "bucket", &key, &data).await;
        let read = get(&set.engine, "bucket", &key, 0, size as u64)
            .await
            .unwrap();
        assert_eq!(read, data, "size={size}");
    }
}

#[tokio::test]
async fn test_overwrite_last_writer_wins() {
    let set = test_set(6).await;
    set.engine.make_bucket("bucket").await.unwrap();
    let first = test_data(10_000);
    let second = test_data(20_000);
    put(&set.engine, "bucket", "k", &first).await;
    put(&set.engine, "bucket", "k", &second).await;

    assert_eq!(
        set.engine.stat_object("bucket", "k").await.unwrap().size,
        20_000
    );
    let read = get(&set.engine, "bucket", "k", 0, 20_000).await.unwrap();
    assert_eq!(read, second);
}

#[tokio::test]
async fn test_delete_object() {
    let set = test_set(6).await;
    set.engine.make_bucket("bucket").await.unwrap();
    put(&set.engine, "bucket", "k", &test_data(5000)).await;

    set.engine.delete_object("bucket", "k").await.unwrap();
    assert!(matches!(
        set.engine.stat_object("bucket", "k").await,
        Err(EngineError::ObjectNotFound { .. })
    ));
    assert!(matches!(
        set.engine.delete_object("bucket", "k").await,
        Err(EngineError::ObjectNotFound { .. })
    ));
    // Shard files are gone from every disk.
    for (i, disk) in set.disks.iter().enumerate() {
        assert!(disk.read_all("bucket", &shard_path("k", i)).await.is_err());
    }
}

#[tokio::test]
async fn test_zero_byte_object() {
    let set = test_set(6).await;
    set.engine.make_bucket("bucket").await.unwrap();
    let info = put(&set.engine, "bucket", "empty", &[]).await;
    assert_eq!(info.size, 0);
    assert_eq!(
        set.engine.stat_object("bucket", "empty").await.unwrap().size,
        0
    );
    // Any byte range on a zero-byte object is out of range.
    assert!(matches!(
        get(&set.engine, "bucket", "empty", 0, 1).await,
        Err(EngineError::InvalidArgument(_))
    ));
    set.engine.delete_object("bucket", "empty").await.unwrap();
}

#[tokio::test]
async fn test_put_requires_bucket() {
    let set = test_set(6).await;
    let data = test_data(100);
    let result = set
        .engine
        .put_object(
            "nosuch",
            "k",
            Some(100),
            &mut &data[..],
            BTreeMap::new(),
        )
        .await;
    assert!(matches!(result, Err(EngineError::BucketNotFound(_))));
}

#[tokio::test]
async fn test_put_size_mismatch_cleans_staging() {
    let set = test_set(6).await;
    set.engine.make_bucket("bucket").await.unwrap();
    let data = test_data(1000);
    let result = set
        .engine
        .put_object(
            "bucket",
            "k",
            Some(2000),
            &mut &data[..],
            BTreeMap::new(),
        )
        .await;
    assert!(matches!(result, Err(EngineError::InvalidArgument(_))));

    // No staging artifacts survive the failure.
    for disk in &set.disks {
        let entries = disk
            .list_dir(RESERVED_BUCKET, "tmp")
            .await
            .unwrap_or_default();
        assert!(entries.is_empty(), "staging left behind: {entries:?}");
    }
}

#[tokio::test]
async fn test_user_meta_keys_case_insensitive() {
    let set = test_set(6).await;
    set.engine.make_bucket("bucket").await.unwrap();
    let data = test_data(100);
    let meta = BTreeMap::from([
        ("Content-Type".to_string(), "text/plain".to_string()),
        ("X-Custom".to_string(), "v".to_string()),
    ]);
    set.engine
        .put_object("bucket", "k", Some(100), &mut &data[..], meta)
        .await
        .unwrap();

    let info = set.engine.stat_object("bucket", "k").await.unwrap();
    assert_eq!(info.user_meta.get("content-type").unwrap(), "text/plain");
    assert_eq!(info.user_meta.get("x-custom").unwrap(), "v");
    assert!(!info.user_meta.contains_key("Content-Type"));
}

#[tokio::test]
async fn test_bucket_lifecycle() {
    let set = test_set(6).await;
    set.engine.make_bucket("alpha").await.unwrap();
    set.engine.make_bucket("beta").await.unwrap();

    assert!(matches!(
        set.engine.make_bucket("alpha").await,
        Err(EngineError::BucketAlreadyExists(_))
    ));
    assert!(matches!(
        set.engine.make_bucket("BAD name").await,
        Err(EngineError::InvalidBucketName(_))
    ));

    let names: Vec<String> = set
        .engine
        .list_buckets()
        .await
        .unwrap()
        .into_iter()
        .map(|b| b.name)
        .collect();
    assert_eq!(names, vec!["alpha", "beta"]);

    assert_eq!(
        set.engine.stat_bucket("alpha").await.unwrap().name,
        "alpha"
    );
    assert!(matches!(
        set.engine.stat_bucket("gone").await,
        Err(EngineError::BucketNotFound(_))
    ));

    put(&set.engine, "alpha", "k", &test_data(100)).await;
    assert!(matches!(
        set.engine.delete_bucket("alpha").await,
        Err(EngineError::BucketNotEmpty(_))
    ));
    set.engine.delete_object("alpha", "k").await.unwrap();
    set.engine.delete_bucket("alpha").await.unwrap();
    assert!(matches!(
        set.engine.stat_bucket("alpha").await,
        Err(EngineError::BucketNotFound(_))
    ));
    assert!(matches!(
        set.engine.delete_bucket("alpha").await,
        Err(EngineError::BucketNotFound(_))
    ));
}

#[tokio::test]
async fn test_storage_info_aggregates() {
    let set = test_set(6).await;
    let info = set.engine.storage_info().await.unwrap();
    assert!(info.total > 0);
    assert!(info.free <= info.total);
}

#[tokio::test]
async fn test_invalid_names_rejected() {
    let set = test_set(6).await;
    set.engine.make_bucket("bucket").await.unwrap();
    assert!(matches!(
        set.engine.stat_object("bucket", "/abs").await,
        Err(EngineError::InvalidObjectKey(_))
    ));
    assert!(matches!(
        set.engine.stat_object("bucket", "a/../b").await,
        Err(EngineError::InvalidObjectKey(_))
    ));
    assert!(matches!(
        set.engine.stat_object("xx", "k").await,
        Err(EngineError::InvalidBucketName(_))
    ));
}

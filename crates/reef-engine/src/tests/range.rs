//! Offset/length slicing against the striped layout.

use super::helpers::*;
use crate::error::EngineError;

#[tokio::test]
async fn test_range_reads_match_slice() {
    let set = test_set(6).await;
    set.engine.make_bucket("bucket").await.unwrap();
    let size = (TEST_BLOCK_SIZE * 5 / 2) as usize; // 2.5 blocks
    let data = test_data(size);
    put(&set.engine, "bucket", "k", &data).await;

    let block = TEST_BLOCK_SIZE;
    let cases: &[(u64, u64)] = &[
        (0, 10),
        (0, size as u64),
        (1, size as u64 - 1),
        (block - 1, 2),                // spans first boundary
        (block, block),                // exactly the second block
        (block + 7, block + 100),      // mid-block to mid-block
        (2 * block, size as u64 - 2 * block), // the short tail block
        (size as u64 - 1, 1),          // last byte
    ];
    for &(offset, length) in cases {
        let read = get(&set.engine, "bucket", "k", offset, length)
            .await
            .unwrap();
        assert_eq!(
            read,
            &data[offset as usize..(offset + length) as usize],
            "offset={offset} length={length}"
        );
    }
}

#[tokio::test]
async fn test_range_read_sweep_small_object() {
    let set = test_set(6).await;
    set.engine.make_bucket("bucket").await.unwrap();
    let data = test_data(997);
    put(&set.engine, "bucket", "k", &data).await;

    for offset in (0..997).step_by(101) {
        let length = (997 - offset).min(151) as u64;
        let read = get(&set.engine, "bucket", "k", offset as u64, length)
            .await
            .unwrap();
        assert_eq!(read, &data[offset..offset + length as usize]);
    }
}

#[tokio::test]
async fn test_invalid_ranges_rejected() {
    let set = test_set(6).await;
    set.engine.make_bucket("bucket").await.unwrap();
    put(&set.engine, "bucket", "k", &test_data(1000)).await;

    assert!(matches!(
        get(&set.engine, "bucket", "k", 0, 0).await,
        Err(EngineError::InvalidArgument(_))
    ));
    assert!(matches!(
        get(&set.engine, "bucket", "k", 1000, 1).await,
        Err(EngineError::InvalidArgument(_))
    ));
    assert!(matches!(
        get(&set.engine, "bucket", "k", 500, 501).await,
        Err(EngineError::InvalidArgument(_))
    ));
    assert!(matches!(
        get(&set.engine, "bucket", "k", u64::MAX, 1).await,
        Err(EngineError::InvalidArgument(_))
    ));
}

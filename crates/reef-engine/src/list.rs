//! Paginated object listing driven by the walker pool.
//!
//! A page consumes one walker: either resumed from the pool under the
//! continuation marker or started fresh. After filling a page the
//! walker is parked again under the new marker, so pagination is one
//! continuous ordered walk. The heal variant runs the same walk but
//! keeps only entries whose on-disk state needs repair.

use reef_types::{ListPage, MAX_OBJECT_LIST};
use tracing::debug;

use crate::engine::{check_bucket, load_object_meta, object_info, StorageEngine};
use crate::error::EngineError;
use crate::walker::{start_tree_walk, ListParams};

impl StorageEngine {
    /// List objects under `prefix`, resuming past `marker`, in
    /// lexicographic key order. A delimiter of `"/"` lists shallowly
    /// (subdirectories become common prefixes); empty lists recursively.
    pub async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        marker: &str,
        delimiter: &str,
        max_keys: usize,
    ) -> Result<ListPage, EngineError> {
        self.list_inner(bucket, prefix, marker, delimiter, max_keys, false)
            .await
    }

    /// Like [`list_objects`](Self::list_objects), but returns only
    /// entries whose on-disk state needs heal (missing or diverging
    /// metadata while read quorum holds).
    pub async fn list_objects_heal(
        &self,
        bucket: &str,
        prefix: &str,
        marker: &str,
        delimiter: &str,
        max_keys: usize,
    ) -> Result<ListPage, EngineError> {
        self.list_inner(bucket, prefix, marker, delimiter, max_keys, true)
            .await
    }

    async fn list_inner(
        &self,
        bucket: &str,
        prefix: &str,
        marker: &str,
        delimiter: &str,
        max_keys: usize,
        heal_only: bool,
    ) -> Result<ListPage, EngineError> {
        check_bucket(bucket)?;
        self.stat_bucket(bucket).await?;

        if !delimiter.is_empty() && delimiter != "/" {
            return Err(EngineError::InvalidArgument(format!(
                "unsupported delimiter: {delimiter:?}"
            )));
        }
        if prefix.starts_with('/') {
            return Err(EngineError::InvalidArgument(format!(
                "invalid prefix: {prefix:?}"
            )));
        }
        if !marker.is_empty() && !marker.starts_with(prefix) {
            return Err(EngineError::InvalidArgument(format!(
                "marker {marker:?} does not match prefix {prefix:?}"
            )));
        }
        if max_keys == 0 {
            return Ok(ListPage::default());
        }
        let max_keys = max_keys.min(MAX_OBJECT_LIST);
        let recursive = delimiter != "/";

        let params = ListParams {
            bucket: bucket.to_string(),
            recursive,
            marker: marker.to_string(),
            prefix: prefix.to_string(),
        };
        let mut walker = match self.walkers.lookup(&params) {
            Some(walker) => walker,
            None => start_tree_walk(
                self.disks.clone(),
                bucket,
                prefix,
                marker,
                recursive,
                self.walker_send_timeout,
                MAX_OBJECT_LIST,
            ),
        };

        let mut page = ListPage::default();
        let mut count = 0usize;
        let mut eof = false;
        let mut last_entry = String::new();

        while count < max_keys {
            let Some(result) = walker.next().await else {
                eof = true;
                break;
            };
            let walked = result?;

            if walked.entry.ends_with('/') {
                last_entry = walked.entry.clone();
                page.prefixes.push(walked.entry);
                count += 1;
            } else {
                let key = walked.entry;
                let included = if heal_only {
                    // Bypass the cache: heal inspection wants the live
                    // per-disk verdict, not a cached document.
                    match load_object_meta(&self.disks, &self.quorum, bucket, &key).await {
                        Ok((meta, needs_heal, _)) => {
                            needs_heal.then(|| object_info(bucket, &key, &meta))
                        }
                        Err(EngineError::ObjectNotFound { .. }) => None,
                        Err(e) => return Err(e),
                    }
                } else {
                    match self.read_object_meta(bucket, &key).await {
                        Ok((meta, needs_heal)) => {
                            if needs_heal {
                                self.queue_heal(bucket, &key);
                            }
                            Some(object_info(bucket, &key, &meta))
                        }
                        // The object raced a delete between the listing
                        // and the stat; skip it.
                        Err(EngineError::ObjectNotFound { .. }) => None,
                        Err(e) => return Err(e),
                    }
                };
                last_entry = key;
                if let Some(info) = included {
                    page.objects.push(info);
                    count += 1;
                }
            }

            if walked.end {
                eof = true;
                break;
            }
        }

        if !eof && !last_entry.is_empty() {
            page.is_truncated = true;
            page.next_marker = last_entry.clone();
            self.walkers.save(
                ListParams {
                    bucket: bucket.to_string(),
                    recursive,
                    marker: last_entry,
                    prefix: prefix.to_string(),
                },
                walker,
            );
        }

        debug!(
            bucket,
            prefix,
            marker,
            heal_only,
            objects = page.objects.len(),
            prefixes = page.prefixes.len(),
            truncated = page.is_truncated,
            "list page served"
        );
        Ok(page)
    }
}

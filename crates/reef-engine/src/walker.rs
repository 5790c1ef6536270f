//! Ordered, resumable directory tree walking.
//!
//! A walker is a cooperative producer task descending the bucket tree on
//! one load-balanced disk, publishing entries in lexicographic order
//! over a bounded channel. Directories holding the metadata sentinel
//! (`file.json`) are leaves — objects — and are never recursed into.
//! Each send is bounded by a timeout; a consumer that stops receiving
//! strands the walker, which flags itself timed-out and exits.
//!
//! The pool keeps suspended walkers keyed by their list parameters so a
//! paginated listing can resume exactly where the previous page ended.
//! A timed-out walker is never resumed.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::seq::SliceRandom;
use reef_disk::{DiskApi, DiskError};
use reef_types::{path_join, META_FILE};
use tokio::sync::mpsc;

use crate::error::EngineError;

/// Key identifying a resumable walk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ListParams {
    pub bucket: String,
    pub recursive: bool,
    pub marker: String,
    pub prefix: String,
}

/// One published walk result.
#[derive(Debug)]
pub(crate) struct WalkEntry {
    /// Bucket-relative entry; a trailing `/` marks a directory (only
    /// produced by shallow walks).
    pub entry: String,
    /// Whether this is the final entry of the walk.
    pub end: bool,
}

/// Consumer handle for a running walk.
pub(crate) struct TreeWalker {
    rx: mpsc::Receiver<Result<WalkEntry, EngineError>>,
    timed_out: Arc<AtomicBool>,
}

impl TreeWalker {
    /// Receive the next entry; `None` once the producer has finished.
    pub async fn next(&mut self) -> Option<Result<WalkEntry, EngineError>> {
        self.rx.recv().await
    }

    fn is_timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }
}

struct WalkProducer {
    disks: Vec<Arc<dyn DiskApi>>,
    bucket: String,
    tx: mpsc::Sender<Result<WalkEntry, EngineError>>,
    timed_out: Arc<AtomicBool>,
    send_timeout: Duration,
}

impl WalkProducer {
    /// Publish one result. Returns `false` when the walk must stop:
    /// the consumer hung up or the send timed out.
    async fn send(&self, result: Result<WalkEntry, EngineError>) -> bool {
        match tokio::time::timeout(self.send_timeout, self.tx.send(result)).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) => false,
            Err(_) => {
                self.timed_out.store(true, Ordering::SeqCst);
                false
            }
        }
    }

    /// List one directory level on the first disk that answers,
    /// filtering by the entry prefix, collapsing leaf directories to
    /// object names, and sorting.
    async fn list_dir(
        &self,
        prefix_dir: &str,
        filter_prefix: &str,
    ) -> Result<Vec<String>, EngineError> {
        let mut disks = self.disks.clone();
        {
            let mut rng = rand::thread_rng();
            disks.shuffle(&mut rng);
        }

        let mut all_not_found = true;
        for disk in disks {
            let entries = match disk.list_dir(&self.bucket, prefix_dir).await {
                Ok(entries) => entries,
                Err(DiskError::NotFound(_)) => continue,
                Err(_) => {
                    all_not_found = false;
                    continue;
                }
            };
            let mut out = Vec::with_capacity(entries.len());
            for entry in entries {
                if !entry.starts_with(filter_prefix) {
                    continue;
                }
                if let Some(dir_name) = entry.strip_suffix('/') {
                    let sentinel = path_join(&[prefix_dir, dir_name, META_FILE]);
                    if self.is_leaf(&disk, &sentinel).await {
                        out.push(dir_name.to_string());
                        continue;
                    }
                }
                out.push(entry);
            }
            out.sort();
            return Ok(out);
        }
        if all_not_found {
            // The directory exists nowhere: an empty level, not an error.
            Ok(Vec::new())
        } else {
            Err(EngineError::ReadQuorum)
        }
    }

    /// Whether a directory holds the metadata sentinel, making it an
    /// object rather than a prefix. The listing disk is consulted
    /// first; disks that lost the sentinel (heal candidates) must not
    /// demote the object to a directory, so the rest of the set backs
    /// the verdict up.
    async fn is_leaf(&self, listing_disk: &Arc<dyn DiskApi>, sentinel: &str) -> bool {
        if listing_disk.stat_file(&self.bucket, sentinel).await.is_ok() {
            return true;
        }
        for disk in &self.disks {
            if disk.stat_file(&self.bucket, sentinel).await.is_ok() {
                return true;
            }
        }
        false
    }

    /// Recursive descent. `count` tracks entries still owed so the final
    /// one can be flagged `end`. Returns `false` to unwind when the
    /// consumer is gone.
    fn walk<'a>(
        &'a self,
        prefix_dir: String,
        entry_prefix: String,
        marker: String,
        recursive: bool,
        count: &'a mut isize,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            // marker "four/five.txt" → dir "four/", base "five.txt";
            // the dir component seeks this level, the base resumes the
            // recursion inside it.
            let (marker_dir, marker_base) = match marker.split_once('/') {
                Some((dir, base)) => (format!("{dir}/"), base.to_string()),
                None => (marker.clone(), String::new()),
            };

            let entries = match self.list_dir(&prefix_dir, &entry_prefix).await {
                Ok(entries) => entries,
                Err(e) => {
                    self.send(Err(e)).await;
                    return false;
                }
            };
            if entries.is_empty() {
                return true;
            }

            let start = entries.partition_point(|e| e.as_str() < marker_dir.as_str());
            let entries = &entries[start..];
            *count += entries.len() as isize;

            for (i, entry) in entries.iter().enumerate() {
                if i == 0 && *entry == marker_dir && (!recursive || !entry.ends_with('/')) {
                    // The marker itself was already delivered by the
                    // previous page; only a marker directory in
                    // recursive mode still needs descending.
                    *count -= 1;
                    continue;
                }

                if recursive && entry.ends_with('/') {
                    let marker_arg = if *entry == marker_dir {
                        marker_base.clone()
                    } else {
                        String::new()
                    };
                    *count -= 1;
                    let child_dir = path_join(&[&prefix_dir, entry]);
                    if !self
                        .walk(child_dir, String::new(), marker_arg, recursive, count)
                        .await
                    {
                        return false;
                    }
                    continue;
                }

                *count -= 1;
                let result = WalkEntry {
                    entry: path_join(&[&prefix_dir, entry]),
                    end: *count == 0,
                };
                if !self.send(Ok(result)).await {
                    return false;
                }
            }
            true
        })
    }
}

/// Start a walk under `prefix`, resuming past `marker`.
pub(crate) fn start_tree_walk(
    disks: Vec<Arc<dyn DiskApi>>,
    bucket: &str,
    prefix: &str,
    marker: &str,
    recursive: bool,
    send_timeout: Duration,
    channel_capacity: usize,
) -> TreeWalker {
    let (tx, rx) = mpsc::channel(channel_capacity.max(1));
    let timed_out = Arc::new(AtomicBool::new(false));

    // prefix "one/two/th" → walk dir "one/two/" filtering on "th".
    let (prefix_dir, entry_prefix) = match prefix.rfind('/') {
        Some(idx) => (prefix[..=idx].to_string(), prefix[idx + 1..].to_string()),
        None => (String::new(), prefix.to_string()),
    };
    let marker = marker
        .strip_prefix(&prefix_dir)
        .unwrap_or(marker)
        .to_string();

    let producer = WalkProducer {
        disks,
        bucket: bucket.to_string(),
        tx,
        timed_out: timed_out.clone(),
        send_timeout,
    };
    tokio::spawn(async move {
        let mut count = 0isize;
        producer
            .walk(prefix_dir, entry_prefix, marker, recursive, &mut count)
            .await;
    });

    TreeWalker { rx, timed_out }
}

/// Suspended walkers keyed by list parameters, serialized under one
/// mutex.
pub(crate) struct WalkerPool {
    walkers: Mutex<HashMap<ListParams, Vec<TreeWalker>>>,
}

impl WalkerPool {
    pub fn new() -> Self {
        Self {
            walkers: Mutex::new(HashMap::new()),
        }
    }

    /// Park a walker for resumption under `params`.
    pub fn save(&self, params: ListParams, walker: TreeWalker) {
        let mut map = self.walkers.lock().expect("walker pool lock poisoned");
        map.entry(params).or_default().push(walker);
    }

    /// Take a live walker for `params`, discarding timed-out ones.
    pub fn lookup(&self, params: &ListParams) -> Option<TreeWalker> {
        let mut map = self.walkers.lock().expect("walker pool lock poisoned");
        let walkers = map.get_mut(params)?;
        let mut found = None;
        while !walkers.is_empty() {
            let walker = walkers.remove(0);
            if !walker.is_timed_out() {
                found = Some(walker);
                break;
            }
        }
        if walkers.is_empty() {
            map.remove(params);
        }
        found
    }
}

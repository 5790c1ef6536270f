//! Format bootstrap: loading, classifying, initializing and healing the
//! per-disk `format.json` documents.
//!
//! On construction the engine loads the format from every disk in
//! parallel and classifies the result vector: a fully unformatted set is
//! initialized fresh, a partially unformatted set is healed, a set with
//! offline disks proceeds if read quorum holds, and disagreeing formats
//! are fatal. After bootstrap each disk's logical slot is fixed for the
//! engine's lifetime.

use std::sync::Arc;

use bytes::Bytes;
use reef_disk::{DiskApi, DiskError};
use reef_types::{FormatDocument, FORMAT_FILE, FORMAT_FILE_TMP, RESERVED_BUCKET};
use tracing::{info, warn};

use crate::engine::fan_out;
use crate::error::EngineError;
use crate::quorum::QuorumPolicy;

/// Classification of the per-disk format load outcomes.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum FormatClass {
    /// Every disk is fresh — initialize a new set.
    Unformatted,
    /// Valid formats with read quorum, but some disks are fresh — heal.
    SomeUnformatted,
    /// Valid formats with read quorum; remaining disks are offline or
    /// erroring and can be healed later.
    Ready,
    /// Formats disagree or are unreadable — refuse to start.
    Corrupt(String),
    /// Not enough disks answered to decide anything.
    NoQuorum,
}

/// Load `format.json` from every disk in parallel.
pub(crate) async fn load_all_formats(
    disks: &[Arc<dyn DiskApi>],
) -> Vec<Result<FormatDocument, DiskError>> {
    fan_out(disks, |_i, disk| async move {
        let raw = disk.read_all(RESERVED_BUCKET, FORMAT_FILE).await?;
        serde_json::from_slice::<FormatDocument>(&raw)
            .map_err(|e| DiskError::Corrupted(format!("format.json: {e}")))
    })
    .await
}

/// Classify format load outcomes.
pub(crate) fn classify(
    outcomes: &[Result<FormatDocument, DiskError>],
    quorum: &QuorumPolicy,
) -> FormatClass {
    let mut reference: Option<&FormatDocument> = None;
    let mut valid = 0usize;
    let mut not_found = 0usize;

    for outcome in outcomes {
        match outcome {
            Ok(doc) => {
                if let Err(e) = doc.validate() {
                    return FormatClass::Corrupt(e.to_string());
                }
                match reference {
                    Some(first) if !first.same_set(doc) => {
                        return FormatClass::Corrupt("disks belong to different sets".to_string());
                    }
                    Some(_) => {}
                    None => reference = Some(doc),
                }
                valid += 1;
            }
            Err(DiskError::NotFound(_)) => not_found += 1,
            Err(DiskError::Corrupted(e)) => return FormatClass::Corrupt(e.clone()),
            Err(_) => {}
        }
    }

    if not_found == outcomes.len() {
        FormatClass::Unformatted
    } else if valid >= quorum.read_quorum && not_found > 0 {
        FormatClass::SomeUnformatted
    } else if valid >= quorum.read_quorum {
        FormatClass::Ready
    } else {
        FormatClass::NoQuorum
    }
}

/// Write one format document atomically (temp file, then rename).
async fn write_format(disk: &Arc<dyn DiskApi>, doc: &FormatDocument) -> Result<(), DiskError> {
    match disk.make_volume(RESERVED_BUCKET).await {
        Ok(()) | Err(DiskError::AlreadyExists(_)) => {}
        Err(e) => return Err(e),
    }
    let raw = serde_json::to_vec(doc).map_err(|e| DiskError::Corrupted(e.to_string()))?;
    disk.write_all(RESERVED_BUCKET, FORMAT_FILE_TMP, Bytes::from(raw))
        .await?;
    disk.rename_file(RESERVED_BUCKET, FORMAT_FILE_TMP, RESERVED_BUCKET, FORMAT_FILE)
        .await
}

/// Initialize a brand-new set: mint identities and write a format to
/// every disk, requiring write quorum.
pub(crate) async fn init_format_set(
    disks: &[Arc<dyn DiskApi>],
    quorum: &QuorumPolicy,
) -> Result<Vec<FormatDocument>, EngineError> {
    let docs = FormatDocument::fresh_set(disks.len());
    let docs_for_tasks = docs.clone();
    let outcomes = fan_out(disks, move |i, disk| {
        let doc = docs_for_tasks[i].clone();
        async move { write_format(&disk, &doc).await }
    })
    .await;

    if !quorum.write_ok(&outcomes) {
        return Err(EngineError::WriteQuorum);
    }
    info!(disks = disks.len(), "initialized fresh disk set");
    Ok(docs)
}

/// Write the missing format to unformatted disks, assigning them the
/// unclaimed slots of the reference jbod in disk order.
pub(crate) async fn heal_formats(
    disks: &[Arc<dyn DiskApi>],
    outcomes: &[Result<FormatDocument, DiskError>],
) -> Result<(), EngineError> {
    let reference = outcomes
        .iter()
        .find_map(|o| o.as_ref().ok())
        .ok_or(EngineError::ReadQuorum)?
        .clone();

    let mut claimed = vec![false; reference.jbod.len()];
    for doc in outcomes.iter().filter_map(|o| o.as_ref().ok()) {
        if let Some(pos) = doc.disk_index() {
            claimed[pos] = true;
        }
    }
    let mut free_slots = (0..claimed.len()).filter(|&i| !claimed[i]);

    for (i, outcome) in outcomes.iter().enumerate() {
        if !matches!(outcome, Err(DiskError::NotFound(_))) {
            continue;
        }
        let Some(slot) = free_slots.next() else {
            break;
        };
        let doc = FormatDocument {
            disk: reference.jbod[slot],
            ..reference.clone()
        };
        match write_format(&disks[i], &doc).await {
            Ok(()) => info!(disk = %disks[i].endpoint(), slot, "healed missing format"),
            Err(e) => warn!(disk = %disks[i].endpoint(), %e, "failed to heal format"),
        }
    }
    Ok(())
}

/// Full bootstrap: load, classify, initialize or heal, and return the
/// disks re-ordered by their format slots plus the reference document.
pub(crate) async fn bootstrap(
    disks: &[Arc<dyn DiskApi>],
    quorum: &QuorumPolicy,
) -> Result<(Vec<Arc<dyn DiskApi>>, FormatDocument), EngineError> {
    let mut outcomes = load_all_formats(disks).await;

    match classify(&outcomes, quorum) {
        FormatClass::Unformatted => {
            let docs = init_format_set(disks, quorum).await?;
            // Fresh set: slot order is the configured disk order.
            return Ok((disks.to_vec(), docs[0].clone()));
        }
        FormatClass::SomeUnformatted => {
            heal_formats(disks, &outcomes).await?;
            outcomes = load_all_formats(disks).await;
            match classify(&outcomes, quorum) {
                FormatClass::Ready | FormatClass::SomeUnformatted => {}
                FormatClass::Corrupt(e) => {
                    return Err(EngineError::Disk(DiskError::Corrupted(e)))
                }
                _ => return Err(EngineError::ReadQuorum),
            }
        }
        FormatClass::Ready => {}
        FormatClass::Corrupt(e) => return Err(EngineError::Disk(DiskError::Corrupted(e))),
        FormatClass::NoQuorum => return Err(EngineError::ReadQuorum),
    }

    order_disks(disks, &outcomes)
}

/// Re-order disks so that position `i` holds the disk whose identity is
/// `jbod[i]`. Disks without a readable format keep a leftover slot in
/// configured order.
fn order_disks(
    disks: &[Arc<dyn DiskApi>],
    outcomes: &[Result<FormatDocument, DiskError>],
) -> Result<(Vec<Arc<dyn DiskApi>>, FormatDocument), EngineError> {
    let reference = outcomes
        .iter()
        .find_map(|o| o.as_ref().ok())
        .ok_or(EngineError::ReadQuorum)?
        .clone();

    let mut ordered: Vec<Option<Arc<dyn DiskApi>>> = vec![None; disks.len()];
    let mut unplaced = Vec::new();
    for (i, outcome) in outcomes.iter().enumerate() {
        match outcome {
            Ok(doc) => {
                let pos = doc.disk_index().ok_or_else(|| {
                    EngineError::Disk(DiskError::Corrupted("disk not in jbod".to_string()))
                })?;
                if ordered[pos].is_some() {
                    return Err(EngineError::Disk(DiskError::Corrupted(format!(
                        "two disks claim slot {pos}"
                    ))));
                }
                ordered[pos] = Some(disks[i].clone());
            }
            Err(_) => unplaced.push(disks[i].clone()),
        }
    }
    let mut unplaced = unplaced.into_iter();
    let ordered = ordered
        .into_iter()
        .map(|slot| slot.or_else(|| unplaced.next()))
        .collect::<Option<Vec<_>>>()
        .ok_or(EngineError::ReadQuorum)?;

    Ok((ordered, reference))
}

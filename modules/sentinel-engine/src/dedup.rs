//! Deduplication.
//!
//! Two layers: per-source guid uniqueness (an item re-emitted with the same
//! guid is a re-sighting, not a new row) and cross-source content-hash
//! collision (the same story arriving through two feeds). The cross-source
//! policy is configurable: flag the newcomer with a `duplicate_of` cross-ref,
//! or reject it outright.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use sentinel_common::{CollectedItem, CrossSourceDedup};

/// The storage lookups dedup needs — kept narrow so the engine stays
/// repository-agnostic.
#[async_trait]
pub trait DedupIndex: Send + Sync {
    async fn guid_exists(&self, source_id: &str, guid: &str) -> Result<bool>;
    /// Id of an already-persisted item with this content hash, if any.
    async fn find_by_content_hash(&self, hash: &str) -> Result<Option<String>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupOutcome {
    /// New item, proceed through the pipeline.
    Fresh,
    /// Same `(source_id, guid)` already persisted, or repeated in this batch.
    SeenGuid,
    /// Content hash collides with an existing item.
    DuplicateContent { of: String, rejected: bool },
}

pub struct Deduplicator {
    policy: CrossSourceDedup,
}

impl Deduplicator {
    pub fn new(policy: CrossSourceDedup) -> Self {
        Self { policy }
    }

    /// Assess one item against persisted state and the guids already seen in
    /// this batch. `batch_guids` is updated with the item's guid.
    pub async fn assess(
        &self,
        index: &dyn DedupIndex,
        source_id: &str,
        item: &CollectedItem,
        batch_guids: &mut HashSet<String>,
    ) -> Result<DedupOutcome> {
        if !batch_guids.insert(item.guid.clone()) {
            debug!(guid = %item.guid, "Duplicate guid within batch");
            return Ok(DedupOutcome::SeenGuid);
        }
        if index.guid_exists(source_id, &item.guid).await? {
            return Ok(DedupOutcome::SeenGuid);
        }

        if let Some(existing) = index.find_by_content_hash(&item.content_hash()).await? {
            debug!(guid = %item.guid, of = %existing, policy = ?self.policy,
                   "Cross-source content collision");
            return Ok(DedupOutcome::DuplicateContent {
                of: existing,
                rejected: self.policy == CrossSourceDedup::Reject,
            });
        }

        Ok(DedupOutcome::Fresh)
    }
}

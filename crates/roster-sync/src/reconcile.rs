//! Decides create / update / skip for each canonical record against the store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use roster_core::{PlayerRecord, PlayerWrite, SyncOutcome, SyncRunResult};
use roster_storage::{PlayerStore, StoreError, UniqueKey};
use tracing::{debug, info};

use crate::fingerprint::fingerprint;

/// Reconciles records one at a time. Slug is the authoritative natural key;
/// the external id is consulted only when the slug is unknown.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn PlayerStore>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn PlayerStore>) -> Self {
        Self { store }
    }

    pub async fn reconcile(
        &self,
        record: PlayerRecord,
        region: Option<String>,
        synced_at: DateTime<Utc>,
    ) -> Result<SyncOutcome, StoreError> {
        let data_hash = fingerprint(&record);
        let write = PlayerWrite {
            region,
            record,
            data_hash,
            synced_at,
        };
        let slug = write.record.slug.as_str();
        let leaguepedia_id = write.record.leaguepedia_id;

        if let Some(existing) = self.store.find_by_slug(slug).await? {
            if existing.data_hash == write.data_hash {
                self.store.touch_synced(existing.id, synced_at).await?;
                debug!(slug, "unchanged");
                return Ok(SyncOutcome::Skipped);
            }

            if let Some(id) = leaguepedia_id {
                if let Some(holder) = self.store.find_by_leaguepedia_id(id).await? {
                    if holder.id != existing.id {
                        info!(
                            slug,
                            leaguepedia_id = id,
                            previous_slug = %holder.record.slug,
                            "handing external id over to slug match"
                        );
                        self.store.release_leaguepedia_id(holder.id).await?;
                    }
                }
            }

            self.store.update(existing.id, &write).await?;
            debug!(slug, "updated by slug");
            return Ok(SyncOutcome::Updated);
        }

        if let Some(id) = leaguepedia_id {
            if let Some(existing) = self.store.find_by_leaguepedia_id(id).await? {
                self.store.update(existing.id, &write).await?;
                debug!(
                    slug,
                    leaguepedia_id = id,
                    previous_slug = %existing.record.slug,
                    "updated by external id"
                );
                return Ok(SyncOutcome::Updated);
            }
        }

        match self.store.insert(&write).await {
            Ok(_) => {
                debug!(slug, "created");
                Ok(SyncOutcome::Created)
            }
            Err(StoreError::UniqueViolation(UniqueKey::LeaguepediaId)) => {
                let Some(id) = leaguepedia_id else {
                    return Err(StoreError::UniqueViolation(UniqueKey::LeaguepediaId));
                };
                let existing = self
                    .store
                    .find_by_leaguepedia_id(id)
                    .await?
                    .ok_or(StoreError::UniqueViolation(UniqueKey::LeaguepediaId))?;
                self.store.update(existing.id, &write).await?;
                debug!(slug, leaguepedia_id = id, "insert raced, updated by external id");
                Ok(SyncOutcome::Updated)
            }
            Err(err) => Err(err),
        }
    }

    /// Reconciles `records` sequentially. The first store failure aborts the batch.
    pub async fn reconcile_batch(
        &self,
        records: impl IntoIterator<Item = PlayerRecord>,
        region: Option<String>,
        synced_at: DateTime<Utc>,
    ) -> Result<SyncRunResult, StoreError> {
        let mut result = SyncRunResult::default();
        for record in records {
            let outcome = self.reconcile(record, region.clone(), synced_at).await?;
            result.record(outcome);
        }
        Ok(result)
    }
}

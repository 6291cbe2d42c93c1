//! In-process [`PlayerStore`] with the same uniqueness rules as the `players` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roster_core::{page_order, PlayerPage, PlayerSearch, PlayerWrite, StoredPlayer};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{PlayerStore, StoreError, UniqueKey};

#[derive(Debug, Default)]
pub struct MemoryPlayerStore {
    rows: Mutex<Vec<StoredPlayer>>,
}

impl MemoryPlayerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }

    /// Snapshot of every row, ordered by slug.
    pub async fn all(&self) -> Vec<StoredPlayer> {
        let mut rows = self.rows.lock().await.clone();
        rows.sort_by(|a, b| a.record.slug.cmp(&b.record.slug));
        rows
    }

    fn check_unique(
        rows: &[StoredPlayer],
        write: &PlayerWrite,
        except: Option<Uuid>,
    ) -> Result<(), StoreError> {
        let others = rows.iter().filter(|row| Some(row.id) != except);
        for row in others {
            if row.record.slug == write.record.slug {
                return Err(StoreError::UniqueViolation(UniqueKey::Slug));
            }
            if write.record.leaguepedia_id.is_some()
                && row.record.leaguepedia_id == write.record.leaguepedia_id
            {
                return Err(StoreError::UniqueViolation(UniqueKey::LeaguepediaId));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PlayerStore for MemoryPlayerStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<StoredPlayer>, StoreError> {
        let rows = self.rows.lock().await;
        Ok(rows.iter().find(|row| row.id == id).cloned())
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<StoredPlayer>, StoreError> {
        let rows = self.rows.lock().await;
        Ok(rows.iter().find(|row| row.record.slug == slug).cloned())
    }

    async fn find_by_leaguepedia_id(
        &self,
        leaguepedia_id: i64,
    ) -> Result<Option<StoredPlayer>, StoreError> {
        let rows = self.rows.lock().await;
        Ok(rows
            .iter()
            .find(|row| row.record.leaguepedia_id == Some(leaguepedia_id))
            .cloned())
    }

    async fn insert(&self, write: &PlayerWrite) -> Result<StoredPlayer, StoreError> {
        let mut rows = self.rows.lock().await;
        Self::check_unique(&rows, write, None)?;
        let now = Utc::now();
        let stored = StoredPlayer {
            id: Uuid::new_v4(),
            region: write.region.clone(),
            record: write.record.clone(),
            data_hash: write.data_hash.clone(),
            last_synced_at: write.synced_at,
            created_at: now,
            updated_at: now,
        };
        rows.push(stored.clone());
        Ok(stored)
    }

    async fn update(&self, id: Uuid, write: &PlayerWrite) -> Result<StoredPlayer, StoreError> {
        let mut rows = self.rows.lock().await;
        Self::check_unique(&rows, write, Some(id))?;
        let row = rows
            .iter_mut()
            .find(|row| row.id == id)
            .ok_or(StoreError::NotFound(id))?;
        row.region = write.region.clone();
        row.record = write.record.clone();
        row.data_hash = write.data_hash.clone();
        row.last_synced_at = write.synced_at;
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn touch_synced(&self, id: Uuid, synced_at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().await;
        let row = rows
            .iter_mut()
            .find(|row| row.id == id)
            .ok_or(StoreError::NotFound(id))?;
        row.last_synced_at = synced_at;
        Ok(())
    }

    async fn release_leaguepedia_id(&self, id: Uuid) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().await;
        let row = rows
            .iter_mut()
            .find(|row| row.id == id)
            .ok_or(StoreError::NotFound(id))?;
        row.record.leaguepedia_id = None;
        row.data_hash.clear();
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn search(&self, search: &PlayerSearch) -> Result<PlayerPage, StoreError> {
        let search = search.normalized();
        let take = search.limit();
        let rows = self.rows.lock().await;

        let after = match search.cursor {
            Some(cursor) => match rows.iter().find(|row| row.id == cursor) {
                Some(row) => Some(row.clone()),
                None => return Ok(PlayerPage::empty(take)),
            },
            None => None,
        };

        let mut hits = rows
            .iter()
            .filter(|row| search.matches(row))
            .filter(|row| match &after {
                Some(after) => page_order(after, row).is_lt(),
                None => true,
            })
            .cloned()
            .collect::<Vec<_>>();
        hits.sort_by(page_order);
        hits.truncate(take + 1);
        Ok(PlayerPage::from_overfetch(hits, take))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_core::PlayerRecord;

    fn write(slug: &str, leaguepedia_id: Option<i64>) -> PlayerWrite {
        let mut record = PlayerRecord::new(slug);
        record.leaguepedia_id = leaguepedia_id;
        PlayerWrite {
            region: None,
            record,
            data_hash: format!("hash-{slug}"),
            synced_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_enforces_both_unique_keys() {
        let store = MemoryPlayerStore::new();
        store.insert(&write("Faker", Some(57))).await.unwrap();

        let slug_clash = store.insert(&write("Faker", Some(58))).await.unwrap_err();
        let id_clash = store.insert(&write("Hide on bush", Some(57))).await.unwrap_err();

        assert!(matches!(slug_clash, StoreError::UniqueViolation(UniqueKey::Slug)));
        assert!(matches!(id_clash, StoreError::UniqueViolation(UniqueKey::LeaguepediaId)));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn players_without_external_id_do_not_collide() {
        let store = MemoryPlayerStore::new();
        store.insert(&write("Alpha", None)).await.unwrap();
        store.insert(&write("Beta", None)).await.unwrap();
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn release_clears_external_id_and_digest() {
        let store = MemoryPlayerStore::new();
        let stored = store.insert(&write("Faker", Some(57))).await.unwrap();

        store.release_leaguepedia_id(stored.id).await.unwrap();

        let row = store.find_by_id(stored.id).await.unwrap().unwrap();
        assert_eq!(row.record.leaguepedia_id, None);
        assert!(row.data_hash.is_empty());
        assert!(store.find_by_leaguepedia_id(57).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_of_missing_row_is_not_found() {
        let store = MemoryPlayerStore::new();
        let id = Uuid::new_v4();
        let err = store.update(id, &write("Ghost", None)).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(missing) if missing == id));
    }

    #[tokio::test]
    async fn cursor_walks_every_match_once() {
        let store = MemoryPlayerStore::new();
        for i in 0..5 {
            store.insert(&write(&format!("p{i}"), Some(i))).await.unwrap();
        }
        let everything = store
            .search(&PlayerSearch { take: Some(50), ..Default::default() })
            .await
            .unwrap();
        assert!(!everything.page.has_next);

        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let page = store
                .search(&PlayerSearch {
                    take: Some(2),
                    cursor,
                    ..Default::default()
                })
                .await
                .unwrap();
            assert!(page.items.len() <= 2);
            seen.extend(page.items.iter().map(|p| p.id));
            if !page.page.has_next {
                assert_eq!(page.page.next_cursor, None);
                break;
            }
            cursor = page.page.next_cursor;
        }

        let expected = everything.items.iter().map(|p| p.id).collect::<Vec<_>>();
        assert_eq!(seen, expected);
        assert_eq!(seen.len(), 5);
    }

    #[tokio::test]
    async fn unknown_cursor_yields_empty_page() {
        let store = MemoryPlayerStore::new();
        store.insert(&write("Faker", Some(57))).await.unwrap();

        let page = store
            .search(&PlayerSearch {
                cursor: Some(Uuid::new_v4()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(page.items.is_empty());
        assert!(!page.page.has_next);
    }
}

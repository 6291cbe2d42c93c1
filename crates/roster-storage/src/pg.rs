//! Postgres-backed [`PlayerStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roster_core::{PlayerPage, PlayerProfile, PlayerRecord, PlayerSearch, PlayerWrite, StoredPlayer};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{PlayerStore, StoreError};

const COLUMNS: &str = "id, leaguepedia_id, slug, region, name, country, role, team_name, \
     is_active, profile, data_hash, last_synced_at, created_at, updated_at";

pub async fn connect_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(pool).await
}

#[derive(Debug, sqlx::FromRow)]
struct PlayerRow {
    id: Uuid,
    leaguepedia_id: Option<i64>,
    slug: String,
    region: Option<String>,
    name: Option<String>,
    country: Option<String>,
    role: Option<String>,
    team_name: Option<String>,
    is_active: bool,
    profile: Json<PlayerProfile>,
    data_hash: String,
    last_synced_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PlayerRow> for StoredPlayer {
    fn from(row: PlayerRow) -> Self {
        StoredPlayer {
            id: row.id,
            region: row.region,
            record: PlayerRecord {
                leaguepedia_id: row.leaguepedia_id,
                slug: row.slug,
                name: row.name,
                country: row.country,
                role: row.role,
                team_name: row.team_name,
                is_active: row.is_active,
                profile: row.profile.0,
            },
            data_hash: row.data_hash,
            last_synced_at: row.last_synced_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgPlayerStore {
    pool: PgPool,
}

impl PgPlayerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// `%fragment%` with LIKE metacharacters escaped.
fn contains_pattern(fragment: &str) -> String {
    let escaped = fragment
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

#[async_trait]
impl PlayerStore for PgPlayerStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<StoredPlayer>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM players WHERE id = $1");
        let row = sqlx::query_as::<_, PlayerRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(StoredPlayer::from))
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<StoredPlayer>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM players WHERE slug = $1");
        let row = sqlx::query_as::<_, PlayerRow>(&query)
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(StoredPlayer::from))
    }

    async fn find_by_leaguepedia_id(
        &self,
        leaguepedia_id: i64,
    ) -> Result<Option<StoredPlayer>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM players WHERE leaguepedia_id = $1");
        let row = sqlx::query_as::<_, PlayerRow>(&query)
            .bind(leaguepedia_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(StoredPlayer::from))
    }

    async fn insert(&self, write: &PlayerWrite) -> Result<StoredPlayer, StoreError> {
        let query = format!(
            "INSERT INTO players (id, leaguepedia_id, slug, region, name, country, role, team_name,
                                  is_active, profile, data_hash, last_synced_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             RETURNING {COLUMNS}"
        );
        let record = &write.record;
        let row = sqlx::query_as::<_, PlayerRow>(&query)
            .bind(Uuid::new_v4())
            .bind(record.leaguepedia_id)
            .bind(&record.slug)
            .bind(&write.region)
            .bind(&record.name)
            .bind(&record.country)
            .bind(&record.role)
            .bind(&record.team_name)
            .bind(record.is_active)
            .bind(Json(&record.profile))
            .bind(&write.data_hash)
            .bind(write.synced_at)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.into())
    }

    async fn update(&self, id: Uuid, write: &PlayerWrite) -> Result<StoredPlayer, StoreError> {
        let query = format!(
            "UPDATE players SET
                leaguepedia_id = $2,
                slug = $3,
                region = $4,
                name = $5,
                country = $6,
                role = $7,
                team_name = $8,
                is_active = $9,
                profile = $10,
                data_hash = $11,
                last_synced_at = $12,
                updated_at = NOW()
             WHERE id = $1
             RETURNING {COLUMNS}"
        );
        let record = &write.record;
        let row = sqlx::query_as::<_, PlayerRow>(&query)
            .bind(id)
            .bind(record.leaguepedia_id)
            .bind(&record.slug)
            .bind(&write.region)
            .bind(&record.name)
            .bind(&record.country)
            .bind(&record.role)
            .bind(&record.team_name)
            .bind(record.is_active)
            .bind(Json(&record.profile))
            .bind(&write.data_hash)
            .bind(write.synced_at)
            .fetch_optional(&self.pool)
            .await?;
        row.map(StoredPlayer::from).ok_or(StoreError::NotFound(id))
    }

    async fn touch_synced(&self, id: Uuid, synced_at: DateTime<Utc>) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE players SET last_synced_at = $2 WHERE id = $1")
            .bind(id)
            .bind(synced_at)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn release_leaguepedia_id(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE players SET leaguepedia_id = NULL, data_hash = '', updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn search(&self, search: &PlayerSearch) -> Result<PlayerPage, StoreError> {
        let search = search.normalized();
        let take = search.limit();
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {COLUMNS} FROM players WHERE TRUE"));

        if let Some(q) = search.q.as_deref() {
            let pattern = contains_pattern(q);
            qb.push(" AND (name ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR slug ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR team_name ILIKE ")
                .push_bind(pattern);
            if let Some(id) = search.numeric_q() {
                qb.push(" OR leaguepedia_id = ").push_bind(id);
            }
            qb.push(")");
        }
        if let Some(team) = search.team.as_deref() {
            qb.push(" AND team_name ILIKE ").push_bind(contains_pattern(team));
        }
        if let Some(role) = search.role.clone() {
            qb.push(" AND role = ").push_bind(role);
        }
        if let Some(is_active) = search.is_active {
            qb.push(" AND is_active = ").push_bind(is_active);
        }
        if let Some(region) = search.region.clone() {
            qb.push(" AND region = ").push_bind(region);
        }
        // An unknown cursor compares against NULL and yields an empty page.
        if let Some(cursor) = search.cursor {
            qb.push(" AND (updated_at, id) < (SELECT updated_at, id FROM players WHERE id = ")
                .push_bind(cursor)
                .push(")");
        }
        qb.push(" ORDER BY updated_at DESC, id DESC LIMIT ")
            .push_bind(take as i64 + 1);

        let rows = qb
            .build_query_as::<PlayerRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(PlayerPage::from_overfetch(
            rows.into_iter().map(StoredPlayer::from).collect(),
            take,
        ))
    }
}

//! Core domain model for roster synchronization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "roster-core";

pub const DEFAULT_SEARCH_TAKE: usize = 20;
pub const MAX_SEARCH_TAKE: usize = 50;

/// Canonical player shape produced by normalization. Every attribute is always
/// present (possibly `None`), so the fingerprint sees a fixed-width object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub leaguepedia_id: Option<i64>,
    pub slug: String,
    pub name: Option<String>,
    pub country: Option<String>,
    pub role: Option<String>,
    pub team_name: Option<String>,
    pub is_active: bool,
    pub profile: PlayerProfile,
}

impl PlayerRecord {
    /// Minimal record with every optional attribute empty and `is_active` set.
    pub fn new(slug: impl Into<String>) -> Self {
        Self {
            leaguepedia_id: None,
            slug: slug.into(),
            name: None,
            country: None,
            role: None,
            team_name: None,
            is_active: true,
            profile: PlayerProfile::default(),
        }
    }
}

/// Long-tail descriptive attributes carried alongside the core fields.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub overview_page: Option<String>,
    pub player: Option<String>,
    pub image: Option<String>,
    pub name_alphabet: Option<String>,
    pub name_full: Option<String>,
    pub native_name: Option<String>,
    pub nationality: Option<String>,
    pub nationality_primary: Option<String>,
    pub age: Option<u32>,
    pub birthdate: Option<String>,
    pub deathdate: Option<String>,
    pub residency: Option<String>,
    pub residency_former: Option<String>,
    pub team2: Option<String>,
    pub current_teams: Option<String>,
    pub team_system: Option<String>,
    pub team2_system: Option<String>,
    pub team_last: Option<String>,
    pub role_last: Option<String>,
    pub contract: Option<String>,
    pub contract_text: Option<String>,
    pub fav_champs: Option<String>,
    pub soloqueue_ids: Option<String>,
    pub socials: PlayerSocials,
    pub flags: PlayerFlags,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlayerSocials {
    pub askfm: Option<String>,
    pub bluesky: Option<String>,
    pub discord: Option<String>,
    pub dpmlol: Option<String>,
    pub facebook: Option<String>,
    pub instagram: Option<String>,
    pub kick: Option<String>,
    pub linkedin: Option<String>,
    pub lolpros: Option<String>,
    pub reddit: Option<String>,
    pub snapchat: Option<String>,
    pub stream: Option<String>,
    pub threads: Option<String>,
    pub twitter: Option<String>,
    pub vk: Option<String>,
    pub website: Option<String>,
    pub weibo: Option<String>,
    pub youtube: Option<String>,
}

/// Boolean markers, including the "moved to another game" transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlayerFlags {
    pub is_retired: bool,
    pub is_substitute: bool,
    pub is_trainee: bool,
    pub is_personality: bool,
    pub is_lowercase: bool,
    pub is_auto_team: bool,
    pub is_low_content: bool,
    pub to_wildrift: bool,
    pub to_valorant: bool,
    pub to_tft: bool,
    pub to_legends_of_runeterra: bool,
    pub to_2xko: bool,
}

/// Persisted counterpart of a [`PlayerRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPlayer {
    pub id: Uuid,
    pub region: Option<String>,
    #[serde(flatten)]
    pub record: PlayerRecord,
    pub data_hash: String,
    pub last_synced_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Full write payload used for both inserts and updates.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerWrite {
    pub region: Option<String>,
    pub record: PlayerRecord,
    pub data_hash: String,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Created,
    Updated,
    Skipped,
}

/// Aggregate counts for one synchronization invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncRunResult {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub rejected: usize,
    pub total: usize,
}

impl SyncRunResult {
    pub fn record(&mut self, outcome: SyncOutcome) {
        match outcome {
            SyncOutcome::Created => self.created += 1,
            SyncOutcome::Updated => self.updated += 1,
            SyncOutcome::Skipped => self.skipped += 1,
        }
        self.total += 1;
    }

    pub fn record_rejected(&mut self) {
        self.rejected += 1;
        self.total += 1;
    }

    pub fn absorb(&mut self, other: SyncRunResult) {
        self.created += other.created;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.rejected += other.rejected;
        self.total += other.total;
    }
}

/// Parameters for searching the synced store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlayerSearch {
    pub q: Option<String>,
    pub team: Option<String>,
    pub role: Option<String>,
    pub is_active: Option<bool>,
    pub region: Option<String>,
    pub take: Option<usize>,
    /// Id of the last row of the previous page; results resume strictly after it.
    pub cursor: Option<Uuid>,
}

impl PlayerSearch {
    /// Trims text filters (dropping empty ones) and clamps `take` into `1..=MAX_SEARCH_TAKE`.
    pub fn normalized(&self) -> Self {
        fn clean(value: &Option<String>) -> Option<String> {
            value
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
        }

        Self {
            q: clean(&self.q),
            team: clean(&self.team),
            role: clean(&self.role),
            is_active: self.is_active,
            region: clean(&self.region),
            take: Some(
                self.take
                    .unwrap_or(DEFAULT_SEARCH_TAKE)
                    .clamp(1, MAX_SEARCH_TAKE),
            ),
            cursor: self.cursor,
        }
    }

    pub fn limit(&self) -> usize {
        self.take.unwrap_or(DEFAULT_SEARCH_TAKE).clamp(1, MAX_SEARCH_TAKE)
    }

    /// Numeric form of `q` when it is made only of ASCII digits.
    pub fn numeric_q(&self) -> Option<i64> {
        let q = self.q.as_deref()?.trim();
        if q.is_empty() || !q.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        q.parse().ok()
    }

    /// In-process evaluation of the search predicate. Stores that cannot push
    /// filtering down to a query engine use this.
    pub fn matches(&self, player: &StoredPlayer) -> bool {
        let record = &player.record;
        if let Some(q) = self.q.as_deref() {
            let needle = q.to_lowercase();
            let contains = |value: Option<&str>| {
                value
                    .map(|v| v.to_lowercase().contains(&needle))
                    .unwrap_or(false)
            };
            let text_hit = contains(record.name.as_deref())
                || contains(Some(record.slug.as_str()))
                || contains(record.team_name.as_deref());
            let id_hit = self.numeric_q().is_some() && self.numeric_q() == record.leaguepedia_id;
            if !text_hit && !id_hit {
                return false;
            }
        }
        if let Some(team) = self.team.as_deref() {
            let needle = team.to_lowercase();
            let hit = record
                .team_name
                .as_deref()
                .map(|t| t.to_lowercase().contains(&needle))
                .unwrap_or(false);
            if !hit {
                return false;
            }
        }
        if let Some(role) = self.role.as_deref() {
            if record.role.as_deref() != Some(role) {
                return false;
            }
        }
        if let Some(is_active) = self.is_active {
            if record.is_active != is_active {
                return false;
            }
        }
        if let Some(region) = self.region.as_deref() {
            if player.region.as_deref() != Some(region) {
                return false;
            }
        }
        true
    }
}

/// One page of search results, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerPage {
    pub items: Vec<StoredPlayer>,
    pub page: PageInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub take: usize,
    pub next_cursor: Option<Uuid>,
    pub has_next: bool,
}

impl PlayerPage {
    /// Builds a page from up to `take + 1` rows in `(updated_at, id)` descending
    /// order. The extra row only signals that another page exists.
    pub fn from_overfetch(mut rows: Vec<StoredPlayer>, take: usize) -> Self {
        let has_next = rows.len() > take;
        rows.truncate(take);
        let next_cursor = if has_next {
            rows.last().map(|player| player.id)
        } else {
            None
        };
        Self {
            items: rows,
            page: PageInfo {
                take,
                next_cursor,
                has_next,
            },
        }
    }

    pub fn empty(take: usize) -> Self {
        Self::from_overfetch(Vec::new(), take)
    }
}

/// Newest first, ties broken by id.
pub fn page_order(a: &StoredPlayer, b: &StoredPlayer) -> std::cmp::Ordering {
    b.updated_at.cmp(&a.updated_at).then_with(|| b.id.cmp(&a.id))
}

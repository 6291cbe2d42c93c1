//! Upstream player sources and the canonical record normalizer.

mod normalize;

use std::fs;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use roster_storage::{CargoFetcher, CargoQuery, FetchError};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

pub use normalize::{
    coerce_bool, coerce_int, coerce_text, field_key, normalize_row, slug_from_name,
    NormalizeError,
};

pub const CRATE_NAME: &str = "roster-adapters";

pub const PLAYERS_TABLE: &str = "Players";

/// Every `Players` column the full-attribute source requests.
pub const PLAYER_FIELDS: &str = "Players.ID, Players.Player, Players.Name, Players.Country, \
Players.Role, Players.OverviewPage, Players.Image, Players.NameAlphabet, Players.NameFull, \
Players.NativeName, Players.Nationality, Players.NationalityPrimary, Players.Age, \
Players.Birthdate, Players.Deathdate, Players.ResidencyFormer, Players.Team, Players.Team2, \
Players.CurrentTeams, Players.TeamSystem, Players.Team2System, Players.Residency, \
Players.Contract, Players.ContractText, Players.FavChamps, Players.SoloqueueIds, \
Players.Askfm, Players.Bluesky, Players.Discord, Players.Facebook, Players.Instagram, \
Players.Lolpros, Players.DPMLOL, Players.Reddit, Players.Snapchat, Players.Stream, \
Players.KICK, Players.Twitter, Players.Threads, Players.LinkedIn, Players.Vk, \
Players.Website, Players.Weibo, Players.Youtube, Players.TeamLast, Players.RoleLast, \
Players.IsRetired, Players.ToWildrift, Players.ToValorant, Players.ToTFT, \
Players.ToLegendsOfRuneterra, Players.To2XKO, Players.IsPersonality, Players.IsSubstitute, \
Players.IsTrainee, Players.IsLowercase, Players.IsAutoTeam, Players.IsLowContent";

/// One `title` object from a Cargo response, keyed by upstream field name.
pub type RawPlayerRow = serde_json::Map<String, JsonValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    #[default]
    Cargo,
    Fixture,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Extracts the row objects from a Cargo `cargoquery` payload.
///
/// Elements without a `title` object are skipped. A payload without a
/// `cargoquery` array is malformed.
pub fn parse_cargo_rows(payload: &JsonValue) -> Result<Vec<RawPlayerRow>, FetchError> {
    let rows = payload
        .get("cargoquery")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| FetchError::MalformedResponse("missing `cargoquery` array".to_string()))?;

    Ok(rows
        .iter()
        .filter_map(|row| row.get("title").and_then(JsonValue::as_object).cloned())
        .collect())
}

#[async_trait]
pub trait PlayerSource: Send + Sync {
    fn source_id(&self) -> &str;

    /// Rows in the window `[offset, offset + limit)`.
    async fn fetch_page(
        &self,
        limit: NonZeroU32,
        offset: u32,
    ) -> Result<Vec<RawPlayerRow>, SourceError>;

    /// Fetches consecutive windows until a short one or `max_pages` windows.
    async fn fetch_all(
        &self,
        page_size: NonZeroU32,
        max_pages: u32,
    ) -> Result<Vec<RawPlayerRow>, SourceError> {
        let mut rows = Vec::new();
        let mut offset = 0u32;
        for page in 0..max_pages {
            let batch = self.fetch_page(page_size, offset).await?;
            let fetched = batch.len();
            debug!(source_id = self.source_id(), page, offset, fetched, "fetched window");
            rows.extend(batch);
            if fetched < page_size.get() as usize {
                break;
            }
            offset = offset.saturating_add(page_size.get());
        }
        Ok(rows)
    }
}

/// Live source backed by the Cargo query endpoint.
pub struct CargoPlayerSource {
    source_id: String,
    fetcher: Arc<CargoFetcher>,
    query: CargoQuery,
}

impl CargoPlayerSource {
    pub fn new(source_id: impl Into<String>, fetcher: Arc<CargoFetcher>, query: CargoQuery) -> Self {
        Self {
            source_id: source_id.into(),
            fetcher,
            query,
        }
    }

    /// The full-attribute `Players` query.
    pub fn players(source_id: impl Into<String>, fetcher: Arc<CargoFetcher>) -> Self {
        Self::new(source_id, fetcher, CargoQuery::new(PLAYERS_TABLE, PLAYER_FIELDS))
    }

    pub fn query(&self) -> &CargoQuery {
        &self.query
    }
}

#[async_trait]
impl PlayerSource for CargoPlayerSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn fetch_page(
        &self,
        limit: NonZeroU32,
        offset: u32,
    ) -> Result<Vec<RawPlayerRow>, SourceError> {
        let query = self.query.clone().window(limit, offset);
        let payload = self.fetcher.fetch(&query).await?;
        Ok(parse_cargo_rows(&payload)?)
    }
}

/// Offline source replaying a saved Cargo payload from disk.
#[derive(Debug, Clone)]
pub struct FixturePlayerSource {
    source_id: String,
    path: PathBuf,
}

impl FixturePlayerSource {
    pub fn new(source_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            source_id: source_id.into(),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PlayerSource for FixturePlayerSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn fetch_page(
        &self,
        limit: NonZeroU32,
        offset: u32,
    ) -> Result<Vec<RawPlayerRow>, SourceError> {
        let rows = load_fixture_rows(&self.path)?;
        Ok(rows
            .into_iter()
            .skip(offset as usize)
            .take(limit.get() as usize)
            .collect())
    }
}

pub fn load_fixture_payload(path: impl AsRef<Path>) -> Result<JsonValue> {
    read_json_file(path)
}

pub fn load_fixture_rows(path: impl AsRef<Path>) -> Result<Vec<RawPlayerRow>> {
    let path = path.as_ref();
    let payload = load_fixture_payload(path)?;
    parse_cargo_rows(&payload).with_context(|| format!("reading rows from {}", path.display()))
}

fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

//! Maps loosely-typed upstream rows onto the canonical [`PlayerRecord`].

use std::collections::HashMap;

use roster_core::{PlayerFlags, PlayerProfile, PlayerRecord, PlayerSocials};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::RawPlayerRow;

const FALSY_MARKERS: [&str; 6] = ["0", "false", "no", "n", "off", "f"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("row has no external id, slug, page name or display name")]
    MissingIdentity,
}

/// Lowercased, alphanumeric-only form of an upstream field name.
pub fn field_key(name: &str) -> String {
    name.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Lowercases and joins whitespace-separated words with single hyphens.
pub fn slug_from_name(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

/// Trimmed, non-empty text. Numbers and booleans are rendered as text.
pub fn coerce_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Integer from a number or an all-digit string (`"057"` -> 57). Anything else is `None`.
pub fn coerce_int(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        JsonValue::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            trimmed.parse().ok()
        }
        _ => None,
    }
}

/// Any non-empty, non-zero-like value is true.
pub fn coerce_bool(value: &JsonValue) -> bool {
    match value {
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        JsonValue::String(s) => {
            let trimmed = s.trim();
            !trimmed.is_empty()
                && !FALSY_MARKERS
                    .iter()
                    .any(|marker| trimmed.eq_ignore_ascii_case(marker))
        }
        JsonValue::Array(items) => !items.is_empty(),
        JsonValue::Object(map) => !map.is_empty(),
        JsonValue::Null => false,
    }
}

struct RowFields<'a> {
    fields: HashMap<String, &'a JsonValue>,
}

impl<'a> RowFields<'a> {
    fn new(row: &'a RawPlayerRow) -> Self {
        Self {
            fields: row.iter().map(|(k, v)| (field_key(k), v)).collect(),
        }
    }

    fn get(&self, aliases: &[&str]) -> Option<&'a JsonValue> {
        aliases
            .iter()
            .filter_map(|alias| self.fields.get(*alias).copied())
            .find(|value| !value.is_null())
    }

    fn text(&self, aliases: &[&str]) -> Option<String> {
        aliases
            .iter()
            .filter_map(|alias| self.fields.get(*alias))
            .find_map(|value| coerce_text(value))
    }

    fn int(&self, aliases: &[&str]) -> Option<i64> {
        aliases
            .iter()
            .filter_map(|alias| self.fields.get(*alias))
            .find_map(|value| coerce_int(value))
    }

    fn flag(&self, aliases: &[&str]) -> bool {
        self.get(aliases).map(coerce_bool).unwrap_or(false)
    }
}

/// Normalizes one upstream row. Fails only when no identity can be derived.
pub fn normalize_row(row: &RawPlayerRow) -> Result<PlayerRecord, NormalizeError> {
    let f = RowFields::new(row);

    let leaguepedia_id = f.int(&["leaguepediaid", "id", "externalid"]);
    let name = f.text(&["name", "displayname"]);
    let page = f.text(&["player", "overviewpage", "page"]);

    let slug = match f.text(&["slug"]).or_else(|| page.clone()) {
        Some(slug) => slug,
        None => match name.as_deref().map(slug_from_name).filter(|s| !s.is_empty()) {
            Some(slug) => slug,
            None => match leaguepedia_id {
                Some(id) => format!("lp-{id}"),
                None => return Err(NormalizeError::MissingIdentity),
            },
        },
    };

    let current_teams = f.text(&["currentteams"]);
    let team_name = f.text(&["teamname", "team"]).or_else(|| {
        current_teams.as_deref().and_then(|teams| {
            teams
                .split(',')
                .map(str::trim)
                .find(|t| !t.is_empty())
                .map(ToString::to_string)
        })
    });

    let is_active = f
        .get(&["isactive", "active"])
        .map(coerce_bool)
        .unwrap_or(true);

    let profile = PlayerProfile {
        overview_page: f.text(&["overviewpage"]),
        player: f.text(&["player"]),
        image: f.text(&["image"]),
        name_alphabet: f.text(&["namealphabet"]),
        name_full: f.text(&["namefull"]),
        native_name: f.text(&["nativename"]),
        nationality: f.text(&["nationality"]),
        nationality_primary: f.text(&["nationalityprimary"]),
        age: f.int(&["age"]).and_then(|age| u32::try_from(age).ok()),
        birthdate: f.text(&["birthdate"]),
        deathdate: f.text(&["deathdate"]),
        residency: f.text(&["residency"]),
        residency_former: f.text(&["residencyformer"]),
        team2: f.text(&["team2"]),
        current_teams,
        team_system: f.text(&["teamsystem"]),
        team2_system: f.text(&["team2system"]),
        team_last: f.text(&["teamlast"]),
        role_last: f.text(&["rolelast"]),
        contract: f.text(&["contract"]),
        contract_text: f.text(&["contracttext"]),
        fav_champs: f.text(&["favchamps"]),
        soloqueue_ids: f.text(&["soloqueueids"]),
        socials: PlayerSocials {
            askfm: f.text(&["askfm"]),
            bluesky: f.text(&["bluesky"]),
            discord: f.text(&["discord"]),
            dpmlol: f.text(&["dpmlol"]),
            facebook: f.text(&["facebook"]),
            instagram: f.text(&["instagram"]),
            kick: f.text(&["kick"]),
            linkedin: f.text(&["linkedin"]),
            lolpros: f.text(&["lolpros"]),
            reddit: f.text(&["reddit"]),
            snapchat: f.text(&["snapchat"]),
            stream: f.text(&["stream"]),
            threads: f.text(&["threads"]),
            twitter: f.text(&["twitter"]),
            vk: f.text(&["vk"]),
            website: f.text(&["website"]),
            weibo: f.text(&["weibo"]),
            youtube: f.text(&["youtube"]),
        },
        flags: PlayerFlags {
            is_retired: f.flag(&["isretired"]),
            is_substitute: f.flag(&["issubstitute"]),
            is_trainee: f.flag(&["istrainee"]),
            is_personality: f.flag(&["ispersonality"]),
            is_lowercase: f.flag(&["islowercase"]),
            is_auto_team: f.flag(&["isautoteam"]),
            is_low_content: f.flag(&["islowcontent"]),
            to_wildrift: f.flag(&["towildrift"]),
            to_valorant: f.flag(&["tovalorant"]),
            to_tft: f.flag(&["totft"]),
            to_legends_of_runeterra: f.flag(&["tolegendsofruneterra"]),
            to_2xko: f.flag(&["to2xko"]),
        },
    };

    Ok(PlayerRecord {
        leaguepedia_id,
        slug,
        name,
        country: f.text(&["country"]),
        role: f.text(&["role"]),
        team_name,
        is_active,
        profile,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: JsonValue) -> RawPlayerRow {
        match value {
            JsonValue::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn slug_is_derived_from_display_name() {
        let record = normalize_row(&row(json!({ "Name": "Faker Lee" }))).unwrap();
        assert_eq!(record.slug, "faker-lee");

        assert_eq!(slug_from_name("  Lee   Sang\thyeok "), "lee-sang-hyeok");
    }

    #[test]
    fn page_identity_is_used_verbatim() {
        let record = normalize_row(&row(json!({
            "Player": "Faker",
            "Name": "Lee Sang-hyeok",
        })))
        .unwrap();
        assert_eq!(record.slug, "Faker");
        assert_eq!(record.profile.player.as_deref(), Some("Faker"));

        let explicit = normalize_row(&row(json!({ "slug": "faker-t1", "Player": "Faker" }))).unwrap();
        assert_eq!(explicit.slug, "faker-t1");
    }

    #[test]
    fn zero_padded_ids_become_integers() {
        let record = normalize_row(&row(json!({ "ID": "057", "Player": "Faker" }))).unwrap();
        assert_eq!(record.leaguepedia_id, Some(57));

        let junk = normalize_row(&row(json!({ "ID": "abc", "Player": "Faker" }))).unwrap();
        assert_eq!(junk.leaguepedia_id, None);

        let empty = normalize_row(&row(json!({ "ID": "", "Player": "Faker" }))).unwrap();
        assert_eq!(empty.leaguepedia_id, None);

        assert_eq!(coerce_int(&json!(12)), Some(12));
        assert_eq!(coerce_int(&json!("-3")), None);
    }

    #[test]
    fn truthiness_rule() {
        for truthy in [json!("1"), json!("Yes"), json!("x"), json!(true), json!(2)] {
            assert!(coerce_bool(&truthy), "{truthy} should be true");
        }
        for falsy in [json!(""), json!("0"), json!("no"), json!("False"), json!(0), json!(null)] {
            assert!(!coerce_bool(&falsy), "{falsy} should be false");
        }
    }

    #[test]
    fn absent_attributes_default_to_none() {
        let record = normalize_row(&row(json!({ "Player": "Chovy" }))).unwrap();
        assert_eq!(record.name, None);
        assert_eq!(record.country, None);
        assert_eq!(record.team_name, None);
        assert!(record.is_active);
        assert_eq!(record.profile.age, None);
        assert_eq!(record.profile.flags, PlayerFlags::default());
        assert_eq!(record.profile.socials, PlayerSocials::default());
    }

    #[test]
    fn field_names_are_matched_loosely() {
        let record = normalize_row(&row(json!({
            "Overview Page": "Keria",
            "name_full": "Ryu Min-seok",
            "IsRetired": "1",
            "To2XKO": "0",
            "Age": "22",
        })))
        .unwrap();
        assert_eq!(record.slug, "Keria");
        assert_eq!(record.profile.overview_page.as_deref(), Some("Keria"));
        assert_eq!(record.profile.name_full.as_deref(), Some("Ryu Min-seok"));
        assert!(record.profile.flags.is_retired);
        assert!(!record.profile.flags.to_2xko);
        assert_eq!(record.profile.age, Some(22));
    }

    #[test]
    fn team_falls_back_to_first_current_team() {
        let record = normalize_row(&row(json!({
            "Player": "Zeus",
            "CurrentTeams": " , Hanwha Life Esports, T1",
        })))
        .unwrap();
        assert_eq!(record.team_name.as_deref(), Some("Hanwha Life Esports"));

        let explicit = normalize_row(&row(json!({
            "Player": "Zeus",
            "Team": "HLE",
            "CurrentTeams": "T1",
        })))
        .unwrap();
        assert_eq!(explicit.team_name.as_deref(), Some("HLE"));
    }

    #[test]
    fn explicit_inactive_marker_is_respected() {
        let record = normalize_row(&row(json!({ "Player": "Deft", "IsActive": "no" }))).unwrap();
        assert!(!record.is_active);
    }

    #[test]
    fn identity_falls_back_to_external_id_then_fails() {
        let record = normalize_row(&row(json!({ "ID": "12", "Name": "   " }))).unwrap();
        assert_eq!(record.slug, "lp-12");

        let err = normalize_row(&row(json!({ "Country": "Korea" }))).unwrap_err();
        assert_eq!(err, NormalizeError::MissingIdentity);
    }
}

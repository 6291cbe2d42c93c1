//! Content digest over the significant fields of a [`PlayerRecord`].

use roster_core::PlayerRecord;
use serde_json::{Map, Value as JsonValue};
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of the record serialized with lexicographically sorted keys.
///
/// Every field of [`PlayerRecord`] is significant. Operational fields (region,
/// timestamps, the digest itself) live outside the record and never reach here.
pub fn fingerprint(record: &PlayerRecord) -> String {
    let value = serde_json::to_value(record).unwrap_or(JsonValue::Null);
    let canonical = sort_keys(value).to_string();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

fn sort_keys(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let mut entries = map.into_iter().collect::<Vec<_>>();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            let sorted = entries
                .into_iter()
                .map(|(key, value)| (key, sort_keys(value)))
                .collect::<Map<_, _>>();
            JsonValue::Object(sorted)
        }
        JsonValue::Array(items) => JsonValue::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_adapters::{normalize_row, RawPlayerRow};
    use serde_json::json;

    fn row(pairs: &[(&str, JsonValue)]) -> RawPlayerRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn digest_is_stable_and_hex_encoded() {
        let record = PlayerRecord::new("Faker");
        let digest = fingerprint(&record);
        assert_eq!(digest.len(), 64);
        assert!(digest.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_eq!(digest, fingerprint(&record.clone()));
    }

    #[test]
    fn attribute_order_does_not_change_digest() {
        let forward = row(&[
            ("ID", json!("57")),
            ("Player", json!("Faker")),
            ("Team", json!("T1")),
            ("IsRetired", json!("0")),
        ]);
        let reversed = row(&[
            ("IsRetired", json!("0")),
            ("Team", json!("T1")),
            ("Player", json!("Faker")),
            ("ID", json!("57")),
        ]);
        let a = normalize_row(&forward).unwrap();
        let b = normalize_row(&reversed).unwrap();
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn any_significant_change_moves_digest() {
        let base = PlayerRecord::new("Faker");
        let baseline = fingerprint(&base);

        let mut team = base.clone();
        team.team_name = Some("T1".into());
        let mut flag = base.clone();
        flag.profile.flags.to_valorant = true;
        let mut social = base.clone();
        social.profile.socials.twitter = Some("faker".into());
        let mut inactive = base.clone();
        inactive.is_active = false;

        for changed in [team, flag, social, inactive] {
            assert_ne!(fingerprint(&changed), baseline);
        }
    }

    #[test]
    fn nested_keys_are_sorted() {
        let value = json!({ "b": { "z": 1, "a": 2 }, "a": [{ "y": 1, "x": 2 }] });
        assert_eq!(
            sort_keys(value).to_string(),
            r#"{"a":[{"x":2,"y":1}],"b":{"a":2,"z":1}}"#
        );
    }
}

//! Core data model: reward records, the closed client-label set, and the
//! persisted block row shape.
//!
//! Field coercions (slot/parent_slot as string-or-number) follow what the
//! upstream beacon-node API actually sends, verified against
//! `examples/original_source/build_db.py` (`int(block_reward["meta"]["slot"])`).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the closed, ordered set of classifier labels.
///
/// Order is stable: it is both the training label space and the column
/// order of the probability vector and `pr_<client>` store columns.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Client {
    Lighthouse,
    Lodestar,
    Nimbus,
    Other,
    Prysm,
    Teku,
}

impl Client {
    /// All six labels, in closed-set order.
    pub const ALL: [Client; 6] = [
        Client::Lighthouse,
        Client::Lodestar,
        Client::Nimbus,
        Client::Other,
        Client::Prysm,
        Client::Teku,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Client::Lighthouse => "Lighthouse",
            Client::Lodestar => "Lodestar",
            Client::Nimbus => "Nimbus",
            Client::Other => "Other",
            Client::Prysm => "Prysm",
            Client::Teku => "Teku",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Client> {
        Client::ALL.into_iter().find(|c| c.as_str() == s)
    }

    /// Index into the closed-set order; used for stable tie-breaking.
    pub fn closed_set_index(self) -> usize {
        Client::ALL.iter().position(|&c| c == self).expect("closed set")
    }
}

impl fmt::Display for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output-only labels. Never valid as a training label.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OutputLabel {
    Client(Client),
    /// No client dominates the probability map.
    Uncertain,
    /// No data at all (e.g. an empty proposal history).
    Unknown,
}

impl fmt::Display for OutputLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputLabel::Client(c) => c.fmt(f),
            OutputLabel::Uncertain => f.write_str("Uncertain"),
            OutputLabel::Unknown => f.write_str("Unknown"),
        }
    }
}

/// Serializes/deserializes as the plain label string (`"Prysm"`,
/// `"Uncertain"`, `"Unknown"`), matching the HTTP surface in `spec.md` §6
/// rather than an internally-tagged enum representation.
impl Serialize for OutputLabel {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for OutputLabel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(match s.as_str() {
            "Uncertain" => OutputLabel::Uncertain,
            "Unknown" => OutputLabel::Unknown,
            other => match Client::from_str_opt(other) {
                Some(c) => OutputLabel::Client(c),
                None => return Err(serde::de::Error::custom(format!("unknown label {other}"))),
            },
        })
    }
}

/// One attestation descriptor as carried (optionally) alongside a reward
/// record's per-attestation reward maps.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AttestationDescriptor {
    #[serde(deserialize_with = "de_u64_flex")]
    pub slot: u64,
    pub committee_index: u64,
    pub beacon_block_root: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct BlockMeta {
    #[serde(deserialize_with = "de_u64_flex")]
    pub slot: u64,
    #[serde(deserialize_with = "de_u64_flex")]
    pub parent_slot: u64,
    pub proposer_index: u64,
    #[serde(default)]
    pub graffiti: String,
}

/// Per-attestation reward map: validator index -> reward (gwei). An empty
/// map means the attestation was fully redundant at inclusion time.
pub type PerAttestationRewards = BTreeMap<String, i64>;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AttestationRewards {
    pub total: i64,
    pub per_attestation_rewards: Vec<PerAttestationRewards>,
    #[serde(default)]
    pub attestations: Option<Vec<AttestationDescriptor>>,
}

/// A block reward record as consumed from upstream.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RewardRecord {
    pub block_root: String,
    pub meta: BlockMeta,
    pub attestation_rewards: AttestationRewards,
}

impl RewardRecord {
    /// Checks the malformed-record predicate from the HTTP surface spec:
    /// an object lacking `block_root`, `attestation_rewards`, or
    /// `attestation_rewards.per_attestation_rewards`.
    pub fn validate_shape(value: &serde_json::Value) -> Result<(), String> {
        let obj = value
            .as_object()
            .ok_or_else(|| "record is not an object".to_string())?;
        if !obj.contains_key("block_root") {
            return Err("missing block_root".to_string());
        }
        let ar = obj
            .get("attestation_rewards")
            .ok_or_else(|| "missing attestation_rewards".to_string())?;
        if !ar
            .as_object()
            .map(|m| m.contains_key("per_attestation_rewards"))
            .unwrap_or(false)
        {
            return Err("missing attestation_rewards.per_attestation_rewards".to_string());
        }
        Ok(())
    }
}

/// Accepts a JSON string or number for fields the upstream API sometimes
/// stringifies (slot, parent_slot).
pub(crate) fn de_u64_flex<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StrOrU64 {
        Str(String),
        U64(u64),
    }

    match StrOrU64::deserialize(deserializer)? {
        StrOrU64::Str(s) => s.parse::<u64>().map_err(D::Error::custom),
        StrOrU64::U64(n) => Ok(n),
    }
}

/// A persisted, never-mutated row in the block store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockRow {
    pub slot: u64,
    pub parent_slot: u64,
    pub proposer_index: u64,
    pub best_guess_single: OutputLabel,
    pub best_guess_multi: String,
    /// Probability per trained client, in closed-set order among enabled clients.
    pub probabilities: BTreeMap<Client, f64>,
    pub graffiti_guess: Option<Client>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_set_order_is_stable() {
        let order: Vec<&str> = Client::ALL.iter().map(|c| c.as_str()).collect();
        assert_eq!(
            order,
            vec!["Lighthouse", "Lodestar", "Nimbus", "Other", "Prysm", "Teku"]
        );
    }

    #[test]
    fn slot_accepts_string_or_number() {
        let as_str: BlockMeta = serde_json::from_value(serde_json::json!({
            "slot": "123", "parent_slot": "122", "proposer_index": 7
        }))
        .unwrap();
        let as_num: BlockMeta = serde_json::from_value(serde_json::json!({
            "slot": 123, "parent_slot": 122, "proposer_index": 7
        }))
        .unwrap();
        assert_eq!(as_str.slot, 123);
        assert_eq!(as_num.slot, 123);
    }

    #[test]
    fn validate_shape_rejects_missing_fields() {
        let v = serde_json::json!({"block_root": "0xabc"});
        assert!(RewardRecord::validate_shape(&v).is_err());
    }
}

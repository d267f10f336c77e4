//! Graffiti matcher: a configuration-driven table mapping a client label to
//! an ordered list of regular expressions. A record matches the first
//! client whose list contains a regex that matches `meta.graffiti`,
//! anchored at the start of the string.
//!
//! The default table is seeded from the patterns visible in
//! `examples/original_source/prepare_training_data.py`; it is ordinary
//! configuration data, not protocol logic (`spec.md` §1), and can be
//! overridden at runtime via [`GraffitiTable::from_json_file`].

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use regex::Regex;
use serde::Deserialize;

use crate::types::Client;

/// Compiled regex table, loaded once at startup and never mutated.
#[derive(Debug, Clone)]
pub struct GraffitiTable {
    patterns: Vec<(Client, Vec<Regex>)>,
}

#[derive(Debug, Deserialize)]
struct RawTable(BTreeMap<String, Vec<String>>);

impl GraffitiTable {
    /// Builds a table from `client -> [pattern, ...]`, preserving the
    /// closed-set order of clients regardless of map iteration order.
    pub fn new(raw: BTreeMap<Client, Vec<String>>) -> Result<Self, regex::Error> {
        let mut patterns = Vec::new();
        for client in Client::ALL {
            if let Some(pats) = raw.get(&client) {
                let compiled = pats
                    .iter()
                    .map(|p| Regex::new(&anchor_at_start(p)))
                    .collect::<Result<Vec<_>, _>>()?;
                patterns.push((client, compiled));
            }
        }
        Ok(Self { patterns })
    }

    /// Loads a table from a JSON file of `{"Client": ["pattern", ...]}`.
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)?;
        let raw: RawTable = serde_json::from_str(&text)?;
        let mut map = BTreeMap::new();
        for (name, patterns) in raw.0 {
            let client = Client::from_str_opt(&name)
                .ok_or_else(|| anyhow::anyhow!("unknown client label {name} in graffiti table"))?;
            map.insert(client, patterns);
        }
        Ok(Self::new(map)?)
    }

    /// Returns the first client whose pattern list matches `graffiti`, or
    /// `None` if no regex matches.
    pub fn classify(&self, graffiti: &str) -> Option<Client> {
        for (client, regexes) in &self.patterns {
            if regexes.iter().any(|r| r.is_match(graffiti)) {
                return Some(*client);
            }
        }
        None
    }
}

/// `regex` does not anchor at start by default; `spec.md` requires
/// "matches from position 0", which is `^(?:...)`.
fn anchor_at_start(pattern: &str) -> String {
    format!("^(?:{pattern})")
}

impl Default for GraffitiTable {
    fn default() -> Self {
        let mut raw = BTreeMap::new();
        raw.insert(
            Client::Lighthouse,
            vec!["Lighthouse/v".to_string(), ".*[Ll]oopring".to_string()],
        );
        raw.insert(
            Client::Teku,
            vec![
                "teku/v".to_string(),
                "bitcoinsuisse.com".to_string(),
                ".*Allnodes".to_string(),
            ],
        );
        raw.insert(Client::Nimbus, vec!["Nimbus/v".to_string()]);
        raw.insert(
            Client::Prysm,
            vec![
                "prylabs".to_string(),
                ".*[Dd][Aa]pp[Nn]ode".to_string(),
                "SharedStake.org Prysm".to_string(),
                "RP-P ".to_string(),
            ],
        );
        Self::new(raw).expect("built-in graffiti patterns are valid regex")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_prysm_graffiti() {
        let table = GraffitiTable::default();
        assert_eq!(
            table.classify("RP-P v1.2.1 (Alea iacta est.)"),
            Some(Client::Prysm)
        );
    }

    #[test]
    fn s1_nimbus_graffiti() {
        let table = GraffitiTable::default();
        assert_eq!(
            table.classify("Nimbus/v1.5.5-67ab47-stateofus"),
            Some(Client::Nimbus)
        );
    }

    #[test]
    fn s1_unmatched_graffiti() {
        let table = GraffitiTable::default();
        assert_eq!(table.classify("arbitrary user text"), None);
    }

    #[test]
    fn matches_anchor_at_position_zero() {
        let table = GraffitiTable::default();
        // Should not match teku/v if it's not at the start.
        assert_eq!(table.classify("hello teku/v1.2"), None);
        assert_eq!(table.classify("teku/v1.2"), Some(Client::Teku));
    }
}

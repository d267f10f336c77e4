//! Training loader: walks a labeled directory tree and builds a feature
//! matrix, per `spec.md` §4.C.
//!
//! Layout: `<dir>/<ClientLabel>/<any_filename>.json`, each leaf file one
//! reward record (`spec.md` §6, "Training-data layout"). A client whose
//! subdirectory is absent or empty is disabled for the resulting model.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::ModelError;
use crate::features;
use crate::types::{Client, RewardRecord};

/// Result of loading one range's worth of labeled training data.
pub struct TrainingLoadResult {
    /// Clients that ended up with at least one training row, in
    /// closed-set order.
    pub enabled_clients: Vec<Client>,
    /// Row-major `N x F` feature matrix.
    pub x: Vec<Vec<f64>>,
    /// Label index into `enabled_clients`, one per row.
    pub y: Vec<u16>,
}

/// Loads a directory of `<ClientLabel>/*.json` training files.
///
/// `grouped_into_other` lists clients whose samples collapse into the
/// `Other` label. `graffiti_only` lists clients that contribute no rows at
/// all here (they are classified purely by graffiti, handled upstream in
/// the single-range classifier) and are skipped even if their subdirectory
/// exists.
pub fn load_training_dir(
    dir: &Path,
    feature_names: &[String],
    grouped_into_other: &[Client],
    graffiti_only: &[Client],
) -> Result<TrainingLoadResult, ModelError> {
    // target_label -> rows, built first so we can derive enabled_clients in
    // closed-set order regardless of directory iteration order.
    let mut rows_by_label: BTreeMap<Client, Vec<Vec<f64>>> = BTreeMap::new();

    for client in Client::ALL {
        if graffiti_only.contains(&client) {
            continue;
        }
        let subdir = dir.join(client.as_str());
        if !subdir.is_dir() {
            continue;
        }

        let target = if grouped_into_other.contains(&client) {
            Client::Other
        } else {
            client
        };

        let mut loaded = 0usize;
        let mut failed = 0usize;
        for entry in fs::read_dir(&subdir).map_err(ModelError::Io)? {
            let entry = entry.map_err(ModelError::Io)?;
            if !entry.file_type().map_err(ModelError::Io)?.is_file() {
                continue;
            }
            let text = match fs::read_to_string(entry.path()) {
                Ok(t) => t,
                Err(e) => {
                    failed += 1;
                    tracing::warn!(file = %entry.path().display(), error = %e, "failed to read training file");
                    continue;
                }
            };
            let record: RewardRecord = match serde_json::from_str(&text) {
                Ok(r) => r,
                Err(e) => {
                    failed += 1;
                    tracing::warn!(file = %entry.path().display(), error = %e, "failed to parse training record");
                    continue;
                }
            };
            let features = features::extract(&record, feature_names);
            rows_by_label.entry(target).or_default().push(features);
            loaded += 1;
        }
        tracing::info!(client = %client, loaded, failed, "loaded training directory");
    }

    let enabled_clients: Vec<Client> = rows_by_label.keys().copied().collect();
    let mut x = Vec::new();
    let mut y = Vec::new();
    for (idx, client) in enabled_clients.iter().enumerate() {
        for row in &rows_by_label[client] {
            x.push(row.clone());
            y.push(idx as u16);
        }
    }

    Ok(TrainingLoadResult { enabled_clients, x, y })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_record(dir: &Path, client: &str, name: &str, slot: u64) {
        let client_dir = dir.join(client);
        fs::create_dir_all(&client_dir).unwrap();
        let record = serde_json::json!({
            "block_root": "0x00",
            "meta": {"slot": slot, "parent_slot": slot - 1, "proposer_index": 1, "graffiti": ""},
            "attestation_rewards": {
                "total": 100,
                "per_attestation_rewards": [{"1": 10}],
            }
        });
        fs::write(client_dir.join(name), record.to_string()).unwrap();
    }

    #[test]
    fn loads_enabled_clients_in_closed_set_order() {
        let dir = tempdir().unwrap();
        write_record(dir.path(), "Teku", "a.json", 10);
        write_record(dir.path(), "Lighthouse", "a.json", 11);

        let result = load_training_dir(
            dir.path(),
            &features::DEFAULT_FEATURE_NAMES.map(String::from),
            &[],
            &[],
        )
        .unwrap();

        assert_eq!(result.enabled_clients, vec![Client::Lighthouse, Client::Teku]);
        assert_eq!(result.x.len(), 2);
        assert_eq!(result.y.len(), 2);
    }

    #[test]
    fn absent_subdirectory_is_disabled() {
        let dir = tempdir().unwrap();
        write_record(dir.path(), "Prysm", "a.json", 10);

        let result = load_training_dir(
            dir.path(),
            &features::DEFAULT_FEATURE_NAMES.map(String::from),
            &[],
            &[],
        )
        .unwrap();
        assert_eq!(result.enabled_clients, vec![Client::Prysm]);
    }

    #[test]
    fn grouped_clients_collapse_into_other() {
        let dir = tempdir().unwrap();
        write_record(dir.path(), "Lodestar", "a.json", 10);

        let result = load_training_dir(
            dir.path(),
            &features::DEFAULT_FEATURE_NAMES.map(String::from),
            &[Client::Lodestar],
            &[],
        )
        .unwrap();
        assert_eq!(result.enabled_clients, vec![Client::Other]);
    }

    #[test]
    fn graffiti_only_clients_contribute_no_rows() {
        let dir = tempdir().unwrap();
        write_record(dir.path(), "Nimbus", "a.json", 10);

        let result = load_training_dir(
            dir.path(),
            &features::DEFAULT_FEATURE_NAMES.map(String::from),
            &[],
            &[Client::Nimbus],
        )
        .unwrap();
        assert!(result.enabled_clients.is_empty());
    }
}

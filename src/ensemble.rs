//! Multi-range ensemble (`spec.md` §4.F): routes a record to the correct
//! single-range classifier based on its slot.

use std::path::Path;

use crate::classifier::{ClassifyOutput, SingleRangeClassifier};
use crate::error::{AppError, ModelError};
use crate::graffiti::GraffitiTable;
use crate::model::{ClassifierModel, Weighting};
use crate::training;
use crate::types::{Client, RewardRecord};

/// Parameters shared by every single-range model built from a directory of
/// `slot_<start>_to_<end>` subdirectories.
pub struct EnsembleBuildParams {
    pub feature_names: Vec<String>,
    pub grouped_into_other: Vec<Client>,
    pub graffiti_only: Vec<Client>,
    pub k: usize,
    pub confidence: f64,
    pub min_guess: f64,
    pub graffiti: GraffitiTable,
}

impl Default for EnsembleBuildParams {
    fn default() -> Self {
        Self {
            feature_names: crate::features::DEFAULT_FEATURE_NAMES.map(String::from).to_vec(),
            grouped_into_other: Vec::new(),
            graffiti_only: Vec::new(),
            k: crate::knn::K,
            confidence: 0.95,
            min_guess: 0.20,
            graffiti: GraffitiTable::default(),
        }
    }
}

/// Ordered, non-overlapping list of `(start_slot, end_slot, classifier)`
/// triples. The highest-slot entry is open-ended.
pub struct MultiRangeEnsemble {
    ranges: Vec<(u64, u64, SingleRangeClassifier)>,
}

impl MultiRangeEnsemble {
    /// Builds an ensemble directly from pre-built single-range classifiers.
    /// Triples are sorted by `start_slot`; overlap is not validated here
    /// (the directory loader is the intended production path and derives
    /// non-overlapping ranges from directory names).
    pub fn new(mut ranges: Vec<(u64, u64, SingleRangeClassifier)>) -> Self {
        ranges.sort_by_key(|(start, _, _)| *start);
        Self { ranges }
    }

    /// Loads one classifier per `slot_<start>_to_<end>` subdirectory of
    /// `dir`, training each from its own nested `<ClientLabel>/*.json` tree.
    pub fn from_directory(dir: &Path, params: &EnsembleBuildParams) -> Result<Self, ModelError> {
        let mut ranges = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some((start, end)) = parse_range_dir_name(&name) else {
                continue;
            };

            tracing::info!(start, end, "loading classifier for slot range");
            let loaded = training::load_training_dir(
                &entry.path(),
                &params.feature_names,
                &params.grouped_into_other,
                &params.graffiti_only,
            )?;

            let model = ClassifierModel {
                feature_names: params.feature_names.clone(),
                enabled_clients: loaded.enabled_clients,
                x: loaded.x,
                y: loaded.y,
                k: params.k,
                weighting: Weighting::Distance,
                confidence: params.confidence,
                min_guess: params.min_guess,
                graffiti_only: params.graffiti_only.clone(),
            };
            let classifier = SingleRangeClassifier::new(model, params.graffiti.clone());
            ranges.push((start, end, classifier));
        }
        if ranges.is_empty() {
            return Err(ModelError::Training(format!(
                "no slot_<start>_to_<end> subdirectories found under {}",
                dir.display()
            )));
        }
        Ok(Self::new(ranges))
    }

    /// Loads one classifier per serialized model file under `dir` (the
    /// production path, used with `MODEL_PATH`): each file's stem must
    /// match `slot_<start>_to_<end>` and its contents are a
    /// [`ClassifierModel`] written by [`ClassifierModel::save`].
    pub fn load_from_dir(dir: &Path, graffiti: &GraffitiTable) -> Result<Self, ModelError> {
        let mut ranges = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
                continue;
            };
            let Some((start, end)) = parse_range_dir_name(&stem) else {
                continue;
            };
            let model = ClassifierModel::load(&path)?;
            let classifier = SingleRangeClassifier::new(model, graffiti.clone());
            ranges.push((start, end, classifier));
        }
        if ranges.is_empty() {
            return Err(ModelError::Training(format!(
                "no slot_<start>_to_<end> model files found under {}",
                dir.display()
            )));
        }
        Ok(Self::new(ranges))
    }

    /// Routes `record` to the classifier whose range covers its slot. The
    /// last (highest-`start_slot`) range is open-ended.
    pub fn classify(&self, record: &RewardRecord) -> Result<ClassifyOutput, AppError> {
        let slot = record.meta.slot;
        let last = self.ranges.len() - 1;
        for (i, (start, end, classifier)) in self.ranges.iter().enumerate() {
            if slot < *start {
                break;
            }
            if slot <= *end || i == last {
                return Ok(classifier.classify(record));
            }
        }
        Err(AppError::NoClassifierForSlot(slot))
    }

    pub fn ranges(&self) -> &[(u64, u64, SingleRangeClassifier)] {
        &self.ranges
    }
}

/// Parses `slot_<start>_to_<end>` directory names (`spec.md` §4.F / §6).
fn parse_range_dir_name(name: &str) -> Option<(u64, u64)> {
    let rest = name.strip_prefix("slot_")?;
    let (start, rest) = rest.split_once("_to_")?;
    let start: u64 = start.parse().ok()?;
    let end: u64 = rest.parse().ok()?;
    Some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ClassifierModel;
    use crate::types::{AttestationRewards, BlockMeta};

    fn empty_model(clients: Vec<Client>) -> ClassifierModel {
        ClassifierModel {
            feature_names: vec!["percent_redundant_boost".to_string()],
            enabled_clients: clients,
            x: vec![],
            y: vec![],
            k: 9,
            weighting: Weighting::Distance,
            confidence: 0.95,
            min_guess: 0.20,
            graffiti_only: vec![],
        }
    }

    fn record_at(slot: u64) -> RewardRecord {
        RewardRecord {
            block_root: "0x00".to_string(),
            meta: BlockMeta { slot, parent_slot: slot.saturating_sub(1), proposer_index: 0, graffiti: String::new() },
            attestation_rewards: AttestationRewards { total: 0, per_attestation_rewards: vec![], attestations: None },
        }
    }

    #[test]
    fn parses_range_dir_names() {
        assert_eq!(parse_range_dir_name("slot_0_to_999999"), Some((0, 999999)));
        assert_eq!(parse_range_dir_name("garbage"), None);
    }

    #[test]
    fn routes_to_correct_range_and_open_ends_the_last() {
        let c1 = SingleRangeClassifier::new(empty_model(vec![Client::Prysm]), GraffitiTable::default());
        let c2 = SingleRangeClassifier::new(empty_model(vec![Client::Teku]), GraffitiTable::default());
        let ensemble = MultiRangeEnsemble::new(vec![(0, 999, c1), (1000, 1999, c2)]);

        assert!(ensemble.classify(&record_at(500)).is_ok());
        assert!(ensemble.classify(&record_at(1500)).is_ok());
        // Beyond the final range's end_slot: still routed to the last entry.
        assert!(ensemble.classify(&record_at(50_000)).is_ok());
    }

    #[test]
    fn slot_before_first_range_fails() {
        let c1 = SingleRangeClassifier::new(empty_model(vec![Client::Prysm]), GraffitiTable::default());
        let ensemble = MultiRangeEnsemble::new(vec![(100, 999, c1)]);
        assert!(matches!(
            ensemble.classify(&record_at(50)),
            Err(AppError::NoClassifierForSlot(50))
        ));
    }
}

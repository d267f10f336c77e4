//! Single-range classifier (`spec.md` §4.E): graffiti short-circuit, then
//! k-NN, then hedging rules to produce a best label and a multilabel.

use std::collections::BTreeMap;

use crate::graffiti::GraffitiTable;
use crate::knn;
use crate::model::ClassifierModel;
use crate::types::{BlockMeta, BlockRow, Client, OutputLabel, RewardRecord};

/// Output of classifying a single reward record.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassifyOutput {
    pub label: OutputLabel,
    pub multilabel: String,
    pub probability_map: BTreeMap<Client, f64>,
    pub graffiti_guess: Option<Client>,
}

impl ClassifyOutput {
    /// Combines this classification with the record's block metadata into a
    /// row ready for [`crate::store::BlockStore::insert_blocks`].
    pub fn into_block_row(self, meta: &BlockMeta) -> BlockRow {
        BlockRow {
            slot: meta.slot,
            parent_slot: meta.parent_slot,
            proposer_index: meta.proposer_index,
            best_guess_single: self.label,
            best_guess_multi: self.multilabel,
            probabilities: self.probability_map,
            graffiti_guess: self.graffiti_guess,
        }
    }
}

/// Wraps a [`ClassifierModel`] with the graffiti matcher and hedging rules.
pub struct SingleRangeClassifier {
    model: ClassifierModel,
    graffiti: GraffitiTable,
}

impl SingleRangeClassifier {
    pub fn new(model: ClassifierModel, graffiti: GraffitiTable) -> Self {
        Self { model, graffiti }
    }

    pub fn model(&self) -> &ClassifierModel {
        &self.model
    }

    pub fn classify(&self, record: &RewardRecord) -> ClassifyOutput {
        let graffiti_guess = self.graffiti.classify(&record.meta.graffiti);

        if let Some(client) = graffiti_guess {
            if self.model.graffiti_only.contains(&client) {
                let mut probability_map = BTreeMap::new();
                probability_map.insert(client, 1.0);
                return ClassifyOutput {
                    label: OutputLabel::Client(client),
                    multilabel: client.as_str().to_string(),
                    probability_map,
                    graffiti_guess,
                };
            }
        }

        let feature_vector = crate::features::extract(record, &self.model.feature_names);
        let weights = knn::predict(
            &self.model.x,
            &self.model.y,
            self.model.k,
            self.model.enabled_clients.len(),
            &feature_vector,
        );

        let mut probability_map = BTreeMap::new();
        for (idx, &client) in self.model.enabled_clients.iter().enumerate() {
            if let Some(&w) = weights.get(idx) {
                probability_map.insert(client, w);
            }
        }

        let label = best_label(&self.model.enabled_clients, &weights);
        let multilabel = multilabel(
            &self.model.enabled_clients,
            &weights,
            self.model.confidence,
            self.model.min_guess,
        );

        ClassifyOutput {
            label,
            multilabel,
            probability_map,
            graffiti_guess,
        }
    }
}

/// Highest-probability client, ties broken by closed-set order (lower
/// index wins); `Uncertain` if there is nothing to compare.
fn best_label(enabled: &[Client], weights: &[f64]) -> OutputLabel {
    let mut best: Option<(Client, f64)> = None;
    for (client, &w) in enabled.iter().zip(weights) {
        match best {
            None => best = Some((*client, w)),
            Some((_, best_w)) if w > best_w => best = Some((*client, w)),
            _ => {}
        }
    }
    match best {
        Some((client, _)) => OutputLabel::Client(client),
        None => OutputLabel::Uncertain,
    }
}

fn multilabel(enabled: &[Client], weights: &[f64], confidence: f64, min_guess: f64) -> String {
    for (client, &w) in enabled.iter().zip(weights) {
        if w > confidence {
            return client.as_str().to_string();
        }
    }
    let above: Vec<Client> = enabled
        .iter()
        .zip(weights)
        .filter(|(_, &w)| w > min_guess)
        .map(|(c, _)| *c)
        .collect();
    match above.as_slice() {
        [single] => single.as_str().to_string(),
        [a, b] => format!("{a} or {b}"),
        _ => "Uncertain".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s5_hedge_formatting() {
        let enabled = vec![Client::Nimbus, Client::Prysm, Client::Teku];
        let weights = vec![0.05, 0.55, 0.40];
        assert_eq!(multilabel(&enabled, &weights, 0.95, 0.20), "Prysm or Teku");
        assert_eq!(best_label(&enabled, &weights), OutputLabel::Client(Client::Prysm));
    }

    #[test]
    fn s6_confidence_short_circuit() {
        let enabled = vec![Client::Lighthouse, Client::Prysm];
        let weights = vec![0.97, 0.03];
        assert_eq!(multilabel(&enabled, &weights, 0.95, 0.20), "Lighthouse");
    }

    #[test]
    fn three_or_more_above_threshold_is_uncertain() {
        let enabled = vec![Client::Lighthouse, Client::Prysm, Client::Teku];
        let weights = vec![0.3, 0.3, 0.3];
        assert_eq!(multilabel(&enabled, &weights, 0.95, 0.20), "Uncertain");
    }

    #[test]
    fn none_above_threshold_is_uncertain() {
        let enabled = vec![Client::Lighthouse, Client::Prysm];
        let weights = vec![0.1, 0.05];
        assert_eq!(multilabel(&enabled, &weights, 0.95, 0.20), "Uncertain");
    }

    #[test]
    fn ties_in_best_label_prefer_closed_set_order() {
        let enabled = vec![Client::Lighthouse, Client::Prysm];
        let weights = vec![0.5, 0.5];
        assert_eq!(best_label(&enabled, &weights), OutputLabel::Client(Client::Lighthouse));
    }

    #[test]
    fn empty_enabled_set_is_uncertain() {
        assert_eq!(best_label(&[], &[]), OutputLabel::Uncertain);
    }
}

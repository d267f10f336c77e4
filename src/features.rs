//! Feature extractor: a registry of named pure functions from a reward
//! record to a 64-bit float.
//!
//! The four default features are specified exactly in `spec.md` §4.A.
//! Auxiliary features (not selected by default, used during
//! cross-validation/model experimentation) are grounded in
//! `examples/original_source/feature_selection.py`'s `ALL_FEATURES` table.

use crate::difflib;
use crate::types::RewardRecord;

/// Altair base reward constant used to normalize total reward.
pub const ALTAIR_REWARD_BASE: f64 = 30_000_000.0;
/// Assumed committee size, used for density features.
pub const TARGET_COMMITTEE_SIZE: f64 = 128.0;

fn safe_div(x: f64, y: f64) -> f64 {
    if y == 0.0 {
        0.0
    } else {
        x / y
    }
}

fn per_attestation_totals(record: &RewardRecord) -> Vec<i64> {
    record
        .attestation_rewards
        .per_attestation_rewards
        .iter()
        .map(|m| m.values().sum())
        .collect()
}

/// Default feature: fraction of attestations with an empty reward map
/// (fully redundant), boosted away from clients with a true zero rate.
pub fn percent_redundant_boost(record: &RewardRecord) -> f64 {
    let rewards = &record.attestation_rewards.per_attestation_rewards;
    if rewards.is_empty() {
        return 0.0;
    }
    let redundant = rewards.iter().filter(|m| m.is_empty()).count();
    let ratio = redundant as f64 / rewards.len() as f64;
    if ratio == 0.0 {
        0.0
    } else {
        (ratio + 0.2).min(1.0)
    }
}

/// Default feature: similarity between per-attestation reward totals and
/// the same sequence sorted descending.
pub fn difflib_rewards(record: &RewardRecord) -> f64 {
    let totals = per_attestation_totals(record);
    let mut sorted = totals.clone();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    difflib::ratio(&totals, &sorted)
}

/// A comparable, orderable tuple used by the `difflib_slot*` features.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SlotTuple {
    slot: u64,
    committee_index: u64,
    beacon_block_root: String,
    reward_sum: i64,
}

fn slot_tuples(record: &RewardRecord) -> Option<Vec<SlotTuple>> {
    let atts = record.attestation_rewards.attestations.as_ref()?;
    let totals = per_attestation_totals(record);
    if atts.len() != totals.len() {
        return None;
    }
    Some(
        atts.iter()
            .zip(totals)
            .map(|(att, reward_sum)| SlotTuple {
                slot: att.slot,
                committee_index: att.committee_index,
                beacon_block_root: att.beacon_block_root.clone(),
                reward_sum,
            })
            .collect(),
    )
}

/// Default feature: similarity between the attestation tuple sequence and
/// the same sequence sorted ascending by `att.slot`. When `attestations` is
/// not present on the record there is nothing to compare against disorder,
/// so the feature is trivially fully similar (`1.0`).
pub fn difflib_slot(record: &RewardRecord) -> f64 {
    match slot_tuples(record) {
        None => 1.0,
        Some(tuples) => {
            let mut sorted = tuples.clone();
            sorted.sort_by(|a, b| a.slot.cmp(&b.slot));
            difflib::ratio(&tuples, &sorted)
        }
    }
}

/// Same as [`difflib_slot`] but sorted descending by `att.slot`.
pub fn difflib_slot_rev(record: &RewardRecord) -> f64 {
    match slot_tuples(record) {
        None => 1.0,
        Some(tuples) => {
            let mut sorted = tuples.clone();
            sorted.sort_by(|a, b| b.slot.cmp(&a.slot));
            difflib::ratio(&tuples, &sorted)
        }
    }
}

// ---------------------------------------------------------------------------
// Auxiliary (non-default) features: cross-validation / experimentation only.
// ---------------------------------------------------------------------------

pub fn num_attestations(record: &RewardRecord) -> f64 {
    record.attestation_rewards.per_attestation_rewards.len() as f64
}

pub fn total_reward(record: &RewardRecord) -> f64 {
    record.attestation_rewards.total as f64
}

pub fn total_reward_norm(record: &RewardRecord) -> f64 {
    safe_div(total_reward(record), ALTAIR_REWARD_BASE)
}

pub fn num_single_bit(record: &RewardRecord) -> f64 {
    record
        .attestation_rewards
        .per_attestation_rewards
        .iter()
        .filter(|m| m.len() == 1)
        .count() as f64
}

/// Median committee-coverage density (validators-present / committee size).
pub fn median_density(record: &RewardRecord) -> f64 {
    let mut densities: Vec<f64> = record
        .attestation_rewards
        .per_attestation_rewards
        .iter()
        .map(|m| m.len() as f64 / TARGET_COMMITTEE_SIZE)
        .collect();
    if densities.is_empty() {
        return 0.0;
    }
    densities.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = densities.len() / 2;
    if densities.len() % 2 == 0 {
        (densities[mid - 1] + densities[mid]) / 2.0
    } else {
        densities[mid]
    }
}

pub fn mean_density(record: &RewardRecord) -> f64 {
    let rewards = &record.attestation_rewards.per_attestation_rewards;
    if rewards.is_empty() {
        return 0.0;
    }
    let sum: f64 = rewards.iter().map(|m| m.len() as f64 / TARGET_COMMITTEE_SIZE).sum();
    sum / rewards.len() as f64
}

pub fn num_pairwise_ordered(record: &RewardRecord) -> f64 {
    let totals = per_attestation_totals(record);
    if totals.len() < 2 {
        return 1.0;
    }
    let ordered = totals.windows(2).filter(|w| w[0] >= w[1]).count();
    (ordered + 1) as f64
}

/// Spearman rank correlation between reward totals and the same sequence
/// sorted descending. A constant sequence yields `1.0` (numerical policy,
/// `spec.md` §4.A).
pub fn spearman_rewards(record: &RewardRecord) -> f64 {
    let totals = per_attestation_totals(record);
    spearman(&totals)
}

fn ranks(values: &[i64]) -> Vec<f64> {
    let n = values.len();
    let mut idx: Vec<usize> = (0..n).collect();
    idx.sort_by_key(|&i| values[i]);
    let mut rank = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && values[idx[j + 1]] == values[idx[i]] {
            j += 1;
        }
        let avg_rank = ((i + j) as f64 / 2.0) + 1.0;
        for k in idx.iter().take(j + 1).skip(i) {
            rank[*k] = avg_rank;
        }
        i = j + 1;
    }
    rank
}

fn spearman(values: &[i64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 1.0;
    }
    if values.iter().all(|v| *v == values[0]) {
        return 1.0;
    }
    let r_vals = ranks(values);
    let mut sorted = values.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    let r_sorted = ranks(&sorted);

    let mean = (n as f64 + 1.0) / 2.0;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..n {
        let da = r_vals[i] - mean;
        let db = r_sorted[i] - mean;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a == 0.0 || var_b == 0.0 {
        1.0
    } else {
        cov / (var_a.sqrt() * var_b.sqrt())
    }
}

/// Divides a feature by `num_attestations`, `0.0` if there are none.
pub fn scale_by_attestations(feature: f64, record: &RewardRecord) -> f64 {
    safe_div(feature, num_attestations(record))
}

/// Divides a feature by `slot - parent_slot`, `0.0` if that gap is zero.
pub fn scale_by_parent_slot_gap(feature: f64, record: &RewardRecord) -> f64 {
    let gap = record.meta.slot.saturating_sub(record.meta.parent_slot) as f64;
    safe_div(feature, gap)
}

/// The default, fixed feature set baked into every built model.
pub const DEFAULT_FEATURE_NAMES: [&str; 4] = [
    "percent_redundant_boost",
    "difflib_rewards",
    "difflib_slot",
    "difflib_slot_rev",
];

/// Looks up a feature function by name. Includes both default and
/// auxiliary (cross-validation only) features.
pub fn lookup(name: &str) -> Option<fn(&RewardRecord) -> f64> {
    match name {
        "percent_redundant_boost" => Some(percent_redundant_boost),
        "difflib_rewards" => Some(difflib_rewards),
        "difflib_slot" => Some(difflib_slot),
        "difflib_slot_rev" => Some(difflib_slot_rev),
        "num_attestations" => Some(num_attestations),
        "total_reward" => Some(total_reward),
        "total_reward_norm" => Some(total_reward_norm),
        "num_single_bit" => Some(num_single_bit),
        "median_density" => Some(median_density),
        "mean_density" => Some(mean_density),
        "num_pairwise_ordered" => Some(num_pairwise_ordered),
        "spearman_rewards" => Some(spearman_rewards),
        _ => None,
    }
}

/// Computes a feature vector in the given feature-name order.
pub fn extract(record: &RewardRecord, names: &[String]) -> Vec<f64> {
    names
        .iter()
        .map(|n| lookup(n).map(|f| f(record)).unwrap_or(0.0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttestationRewards, BlockMeta, RewardRecord};
    use std::collections::BTreeMap;

    fn record_with_rewards(maps: Vec<Vec<(&str, i64)>>) -> RewardRecord {
        let per_attestation_rewards: Vec<BTreeMap<String, i64>> = maps
            .into_iter()
            .map(|m| m.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
            .collect();
        RewardRecord {
            block_root: "0x00".to_string(),
            meta: BlockMeta { slot: 10, parent_slot: 9, proposer_index: 1, graffiti: String::new() },
            attestation_rewards: AttestationRewards {
                total: 100,
                per_attestation_rewards,
                attestations: None,
            },
        }
    }

    #[test]
    fn percent_redundant_boost_zero_stays_zero() {
        let r = record_with_rewards(vec![vec![("1", 10)], vec![("2", 5)]]);
        assert_eq!(percent_redundant_boost(&r), 0.0);
    }

    #[test]
    fn percent_redundant_boost_is_clamped() {
        let r = record_with_rewards(vec![vec![], vec![], vec![], vec![("1", 1)]]);
        // ratio = 0.75, + 0.2 = 0.95, under the 1.0 clamp.
        assert!((percent_redundant_boost(&r) - 0.95).abs() < 1e-9);

        let r_all_redundant = record_with_rewards(vec![vec![], vec![], vec![]]);
        assert_eq!(percent_redundant_boost(&r_all_redundant), 1.0);
    }

    #[test]
    fn difflib_rewards_of_sorted_sequence_is_one() {
        let r = record_with_rewards(vec![vec![("1", 30)], vec![("2", 20)], vec![("3", 10)]]);
        assert!((difflib_rewards(&r) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn spearman_of_constant_sequence_is_one() {
        assert_eq!(spearman(&[5, 5, 5]), 1.0);
    }

    #[test]
    fn empty_record_features_do_not_panic() {
        let r = record_with_rewards(vec![]);
        assert_eq!(percent_redundant_boost(&r), 0.0);
        assert_eq!(difflib_rewards(&r), 1.0);
        assert_eq!(median_density(&r), 0.0);
    }
}

//! Query / aggregation layer (`spec.md` §4.I): read-only views over the
//! block store plus the two derived products, period aggregation and CSV
//! export, grounded in `examples/original_source/compute_periods.py`.
//!
//! `guess_k_recent` is the mode of the last `max(3, |relevant|)` proposals
//! at `slot <= end_slot`, where `relevant` is that same slot-filtered set:
//! since `max(3, |relevant|) >= |relevant|` always, the "last N" window can
//! never truncate `relevant` and this is just the mode over every proposal
//! up to `end_slot` (`spec.md` §4.I; `compute_periods.py`'s
//! `guess_from_k_recent`).

use std::collections::BTreeMap;

use crate::error::StoreError;
use crate::store::BlockStore;
use crate::types::{BlockRow, Client, OutputLabel};

#[derive(Clone, Copy, Debug)]
pub struct Period {
    pub period_id: u64,
    pub end_slot: u64,
    pub num_active_validators: u64,
}

#[derive(Clone, Debug)]
pub struct ValidatorPeriodGuess {
    pub validator_index: u64,
    pub guess_k_recent: OutputLabel,
    pub guess_mode: OutputLabel,
    pub guess_med_95: OutputLabel,
}

#[derive(Clone, Debug)]
pub struct PeriodResult {
    pub period_id: u64,
    pub end_slot: u64,
    pub num_active_validators: u64,
    pub guesses: Vec<ValidatorPeriodGuess>,
}

/// Computes the three period-guess columns for every validator index in
/// `[0, period.num_active_validators]`, for each period independently —
/// periods may be given in any order.
pub async fn compute_periods(
    store: &BlockStore,
    periods: &[Period],
) -> Result<Vec<PeriodResult>, StoreError> {
    let mut results = Vec::with_capacity(periods.len());

    for period in periods {
        let mut guesses = Vec::with_capacity(period.num_active_validators as usize + 1);
        for validator_index in 0..=period.num_active_validators {
            let history = store.validator_blocks(validator_index, 0).await?;
            guesses.push(ValidatorPeriodGuess {
                validator_index,
                guess_k_recent: guess_k_recent(&history, period.end_slot),
                guess_mode: guess_mode(&history),
                guess_med_95: guess_med_95(&history),
            });
        }
        results.push(PeriodResult {
            period_id: period.period_id,
            end_slot: period.end_slot,
            num_active_validators: period.num_active_validators,
            guesses,
        });
    }
    Ok(results)
}

fn guess_k_recent(history: &[BlockRow], end_slot: u64) -> OutputLabel {
    mode_of(history.iter().filter(|r| r.slot <= end_slot))
}

fn guess_mode(history: &[BlockRow]) -> OutputLabel {
    mode_of(history.iter())
}

/// Stable ordering key for mode tie-breaking: closed-set client order,
/// then `Uncertain`, then `Unknown`.
fn label_order(label: OutputLabel) -> usize {
    match label {
        OutputLabel::Client(c) => c.closed_set_index(),
        OutputLabel::Uncertain => Client::ALL.len(),
        OutputLabel::Unknown => Client::ALL.len() + 1,
    }
}

fn mode_of<'a>(rows: impl Iterator<Item = &'a BlockRow>) -> OutputLabel {
    let mut counts: BTreeMap<usize, (OutputLabel, usize)> = BTreeMap::new();
    let mut any = false;
    for row in rows {
        any = true;
        let key = label_order(row.best_guess_single);
        let entry = counts.entry(key).or_insert((row.best_guess_single, 0));
        entry.1 += 1;
    }
    if !any {
        return OutputLabel::Unknown;
    }
    counts
        .into_values()
        .max_by(|a, b| a.1.cmp(&b.1).then(label_order(b.0).cmp(&label_order(a.0))))
        .map(|(label, _)| label)
        .unwrap_or(OutputLabel::Unknown)
}

const MED_95_THRESHOLD: f64 = 0.95;

fn guess_med_95(history: &[BlockRow]) -> OutputLabel {
    if history.is_empty() {
        return OutputLabel::Unknown;
    }
    let mut candidates: std::collections::BTreeSet<Client> = std::collections::BTreeSet::new();
    for row in history {
        candidates.extend(row.probabilities.keys().copied());
    }
    if candidates.is_empty() {
        return OutputLabel::Uncertain;
    }

    let mut best: Option<(Client, f64)> = None;
    for client in candidates {
        let mut values: Vec<f64> = history
            .iter()
            .map(|r| r.probabilities.get(&client).copied().unwrap_or(0.0))
            .collect();
        let m = median(&mut values);
        match best {
            None => best = Some((client, m)),
            Some((_, best_m)) if m > best_m => best = Some((client, m)),
            _ => {}
        }
    }

    match best {
        Some((client, m)) if m > MED_95_THRESHOLD => OutputLabel::Client(client),
        _ => OutputLabel::Uncertain,
    }
}

fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Which guess column to tabulate in [`periods_to_csv`].
#[derive(Clone, Copy, Debug)]
pub enum GuessColumn {
    KRecent,
    Mode,
    Med95,
}

/// Renders `results` as CSV: `period_id, end_slot, num_active_validators,
/// Unknown, Uncertain, <CLIENTS...>`, counting `column` over all
/// validators in each period (`examples/original_source/compute_periods.py`,
/// `period_db_to_csv`).
pub fn periods_to_csv(results: &[PeriodResult], column: GuessColumn) -> String {
    let mut out = String::from("period_id,end_slot,num_active_validators,Unknown,Uncertain");
    for client in Client::ALL {
        out.push(',');
        out.push_str(client.as_str());
    }
    out.push('\n');

    for period in results {
        let mut counts: BTreeMap<OutputLabelKey, i64> = BTreeMap::new();
        for guess in &period.guesses {
            let label = match column {
                GuessColumn::KRecent => guess.guess_k_recent,
                GuessColumn::Mode => guess.guess_mode,
                GuessColumn::Med95 => guess.guess_med_95,
            };
            *counts.entry(OutputLabelKey(label)).or_insert(0) += 1;
        }
        let get = |label: OutputLabel| counts.get(&OutputLabelKey(label)).copied().unwrap_or(0);

        out.push_str(&format!(
            "{},{},{},{},{}",
            period.period_id,
            period.end_slot,
            period.num_active_validators,
            get(OutputLabel::Unknown),
            get(OutputLabel::Uncertain),
        ));
        for client in Client::ALL {
            out.push(',');
            out.push_str(&get(OutputLabel::Client(client)).to_string());
        }
        out.push('\n');
    }
    out
}

/// Ordering wrapper so `OutputLabel` (not itself `Ord`) can key a
/// `BTreeMap` for counting, ordered by [`label_order`].
#[derive(Clone, Copy, PartialEq, Eq)]
struct OutputLabelKey(OutputLabel);

impl PartialOrd for OutputLabelKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OutputLabelKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        label_order(self.0).cmp(&label_order(other.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn row(slot: u64, client: Client, prob: f64) -> BlockRow {
        BlockRow {
            slot,
            parent_slot: slot.saturating_sub(1),
            proposer_index: 1,
            best_guess_single: OutputLabel::Client(client),
            best_guess_multi: client.as_str().to_string(),
            probabilities: BTreeMap::from([(client, prob)]),
            graffiti_guess: None,
        }
    }

    #[tokio::test]
    async fn empty_history_guesses_unknown() {
        let dir = tempdir().unwrap();
        let store = BlockStore::open(dir.path().join("db.sqlite")).await.unwrap();
        let periods = vec![Period { period_id: 1, end_slot: 100, num_active_validators: 0 }];
        let results = compute_periods(&store, &periods).await.unwrap();
        assert_eq!(results[0].guesses[0].guess_mode, OutputLabel::Unknown);
        assert_eq!(results[0].guesses[0].guess_med_95, OutputLabel::Unknown);
    }

    #[tokio::test]
    async fn mode_picks_most_frequent_label() {
        let dir = tempdir().unwrap();
        let store = BlockStore::open(dir.path().join("db.sqlite")).await.unwrap();
        store
            .insert_blocks(vec![
                row(1, Client::Prysm, 0.9),
                row(2, Client::Prysm, 0.9),
                row(3, Client::Teku, 0.9),
            ])
            .await
            .unwrap();
        let periods = vec![Period { period_id: 1, end_slot: 10, num_active_validators: 1 }];
        let results = compute_periods(&store, &periods).await.unwrap();
        assert_eq!(results[0].guesses[1].guess_mode, OutputLabel::Client(Client::Prysm));
    }

    #[tokio::test]
    async fn k_recent_is_mode_over_full_slot_filtered_history_not_just_latest_period() {
        let dir = tempdir().unwrap();
        let store = BlockStore::open(dir.path().join("db.sqlite")).await.unwrap();
        let mut rows: Vec<BlockRow> = (1..=100).map(|slot| row(slot, Client::Prysm, 0.9)).collect();
        rows.extend((101..=105).map(|slot| row(slot, Client::Teku, 0.9)));
        store.insert_blocks(rows).await.unwrap();

        let periods = vec![
            Period { period_id: 1, end_slot: 100, num_active_validators: 1 },
            Period { period_id: 2, end_slot: 200, num_active_validators: 1 },
        ];
        let results = compute_periods(&store, &periods).await.unwrap();

        assert_eq!(results[0].guesses[1].guess_k_recent, OutputLabel::Client(Client::Prysm));
        assert_eq!(results[1].guesses[1].guess_k_recent, OutputLabel::Client(Client::Prysm));
    }

    #[test]
    fn median_of_empty_is_zero() {
        let mut v: Vec<f64> = vec![];
        assert_eq!(median(&mut v), 0.0);
    }

    #[test]
    fn csv_header_lists_reserved_then_closed_set_columns() {
        let csv = periods_to_csv(&[], GuessColumn::Mode);
        assert!(csv.starts_with("period_id,end_slot,num_active_validators,Unknown,Uncertain,Lighthouse"));
    }
}

//! Offline model-building CLI: walks a labeled training-data directory tree
//! and writes one serialized [`ClassifierModel`] per slot range, ready to
//! be pointed at via `MODEL_PATH`.
//!
//! The teacher crate has no CLI parsing of its own to borrow from; this is
//! grounded instead on `Dicklesworthstone-glibc_rust`'s `clap`
//! derive usage, the other pack repo that depends on `clap`.

use std::path::PathBuf;

use clap::Parser;

use clientprint::ensemble::{EnsembleBuildParams, MultiRangeEnsemble};
use clientprint::features::DEFAULT_FEATURE_NAMES;
use clientprint::graffiti::GraffitiTable;
use clientprint::knn;
use clientprint::types::Client;

/// Builds per-slot-range classifier models from a labeled training-data tree.
#[derive(Parser, Debug)]
#[command(name = "clientprint-train")]
struct Cli {
    /// Directory of `slot_<start>_to_<end>/<ClientLabel>/*.json` training data.
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// Directory to write one serialized model file per range.
    #[arg(long, default_value = "./models")]
    out_dir: PathBuf,

    #[arg(long, default_value_t = knn::K)]
    k: usize,

    #[arg(long, default_value_t = 0.95)]
    confidence: f64,

    #[arg(long, default_value_t = 0.20)]
    min_guess: f64,

    /// Client labels to collapse into `Other` (comma-separated).
    #[arg(long, value_delimiter = ',')]
    grouped_into_other: Vec<String>,

    /// Client labels classified purely by graffiti, contributing no k-NN rows
    /// (comma-separated).
    #[arg(long, value_delimiter = ',')]
    graffiti_only: Vec<String>,

    /// If set, also prints a k-fold balanced-accuracy report per range
    /// (operator feedback only; does not change the saved model).
    #[arg(long)]
    cross_validate_folds: Option<usize>,
}

fn parse_clients(names: &[String]) -> anyhow::Result<Vec<Client>> {
    names
        .iter()
        .map(|n| {
            Client::from_str_opt(n).ok_or_else(|| anyhow::anyhow!("unknown client label {n}"))
        })
        .collect()
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .compact()
        .init();

    let cli = Cli::parse();

    let params = EnsembleBuildParams {
        feature_names: DEFAULT_FEATURE_NAMES.map(String::from).to_vec(),
        grouped_into_other: parse_clients(&cli.grouped_into_other)?,
        graffiti_only: parse_clients(&cli.graffiti_only)?,
        k: cli.k,
        confidence: cli.confidence,
        min_guess: cli.min_guess,
        graffiti: GraffitiTable::default(),
    };

    tracing::info!(data_dir = %cli.data_dir.display(), "building ensemble from training data");
    let ensemble = MultiRangeEnsemble::from_directory(&cli.data_dir, &params)?;

    std::fs::create_dir_all(&cli.out_dir)?;
    for (start, end, classifier) in ensemble.ranges() {
        let model = classifier.model();
        let out_path = cli.out_dir.join(format!("slot_{start}_to_{end}.cprntmd"));
        model.save(&out_path)?;
        tracing::info!(
            start,
            end,
            enabled_clients = ?model.enabled_clients,
            rows = model.x.len(),
            path = %out_path.display(),
            "wrote model"
        );

        if let Some(folds) = cli.cross_validate_folds {
            let score = balanced_accuracy_kfold(
                &model.x,
                &model.y,
                model.enabled_clients.len(),
                model.k,
                folds,
            );
            tracing::info!(start, end, folds, balanced_accuracy = score, "cross-validation report");
        }
    }

    Ok(())
}

/// Simple (non-stratified, contiguous-chunk) k-fold balanced-accuracy
/// report: average per-class recall across folds, for operator feedback
/// only — it never changes the saved model (`spec.md` §4.E).
fn balanced_accuracy_kfold(x: &[Vec<f64>], y: &[u16], num_labels: usize, k: usize, folds: usize) -> f64 {
    if x.is_empty() || folds == 0 {
        return 0.0;
    }
    let n = x.len();
    let fold_size = (n + folds - 1) / folds;
    let mut fold_scores = Vec::with_capacity(folds);

    for fold in 0..folds {
        let test_start = fold * fold_size;
        let test_end = ((fold + 1) * fold_size).min(n);
        if test_start >= test_end {
            continue;
        }

        let train_x: Vec<Vec<f64>> = x[..test_start].iter().chain(&x[test_end..]).cloned().collect();
        let train_y: Vec<u16> = y[..test_start].iter().chain(&y[test_end..]).copied().collect();
        if train_x.is_empty() {
            continue;
        }

        let mut correct_per_class = vec![0usize; num_labels];
        let mut total_per_class = vec![0usize; num_labels];
        for i in test_start..test_end {
            let probs = knn::predict(&train_x, &train_y, k, num_labels, &x[i]);
            let predicted = probs
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
                .map(|(idx, _)| idx);
            let actual = y[i] as usize;
            total_per_class[actual] += 1;
            if predicted == Some(actual) {
                correct_per_class[actual] += 1;
            }
        }

        let represented: Vec<f64> = (0..num_labels)
            .filter(|&c| total_per_class[c] > 0)
            .map(|c| correct_per_class[c] as f64 / total_per_class[c] as f64)
            .collect();
        if !represented.is_empty() {
            fold_scores.push(represented.iter().sum::<f64>() / represented.len() as f64);
        }
    }

    if fold_scores.is_empty() {
        0.0
    } else {
        fold_scores.iter().sum::<f64>() / fold_scores.len() as f64
    }
}

//! Environment-variable configuration (`spec.md` §6), read with the
//! `std::env::var(...).ok().and_then(|s| s.parse().ok()).unwrap_or(default)`
//! idiom used throughout the teacher's `tinyzkp_api::main`.

use std::path::PathBuf;

const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_BLOCK_DB: &str = "./blocks.sqlite";
const DEFAULT_BN_URL: &str = "http://localhost:5052";

#[derive(Clone, Debug)]
pub struct Config {
    /// Root of the training-data directory tree (`spec.md` §6).
    pub data_dir: PathBuf,
    /// Path to the SQLite block store file.
    pub block_db: PathBuf,
    /// Base URL of the upstream beacon node.
    pub bn_url: String,
    /// Path to a pre-built serialized model/ensemble directory. `None` means
    /// no model is configured; the server still starts and serves store
    /// queries, but classification endpoints report
    /// [`crate::error::AppError::ClassifierDisabled`].
    pub model_path: Option<PathBuf>,
    /// Presence of `DISABLE_CLASSIFIER` forces classification off even if
    /// `model_path` is set (useful for a store-only / query-only deployment).
    pub disable_classifier: bool,
}

impl Config {
    pub fn from_env() -> Self {
        let data_dir = std::env::var("DATA_DIR")
            .ok()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        let block_db = std::env::var("BLOCK_DB")
            .ok()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BLOCK_DB));
        let bn_url = std::env::var("BN_URL").unwrap_or_else(|_| DEFAULT_BN_URL.to_string());
        let model_path = std::env::var("MODEL_PATH").ok().map(PathBuf::from);
        let disable_classifier = std::env::var("DISABLE_CLASSIFIER").is_ok();

        Self {
            data_dir,
            block_db,
            bn_url,
            model_path,
            disable_classifier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_env_absent() {
        // Exercises the fallback path directly; does not touch process env
        // to stay test-order-independent.
        assert_eq!(PathBuf::from(DEFAULT_DATA_DIR), PathBuf::from("./data"));
        assert_eq!(DEFAULT_BN_URL, "http://localhost:5052");
    }
}

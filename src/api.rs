//! HTTP surface (`spec.md` §6): an `axum` router built the way the teacher
//! builds its own in `tinyzkp_api.rs`'s `main` (`Router::new().route(...)
//! .layer(...).with_state(...)`), minus any billing/auth layer — this
//! service has no equivalent non-goal to carry forward.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::ensemble::MultiRangeEnsemble;
use crate::error::AppError;
use crate::store::{BlockStore, Gap};
use crate::types::{BlockRow, Client, RewardRecord};

#[derive(Clone)]
pub struct AppState {
    pub ensemble: Option<Arc<MultiRangeEnsemble>>,
    pub store: Arc<BlockStore>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/classify", post(classify))
        .route("/classify/no_store", post(classify_no_store))
        .route("/sync/status", get(sync_status))
        .route("/sync/gaps", get(sync_gaps))
        .route("/blocks_per_client/:start_epoch", get(blocks_per_client))
        .route(
            "/blocks_per_client/:start_epoch/:end_epoch",
            get(blocks_per_client_range),
        )
        .route("/validator/:index/blocks", get(validator_blocks))
        .route(
            "/validator/:index/blocks/:since_slot",
            get(validator_blocks_since),
        )
        .route("/validator/blocks", post(validator_blocks_batch))
        .route(
            "/validator/blocks/:since_slot",
            post(validator_blocks_batch_since),
        )
        .route("/validator/blocks/latest", get(validator_blocks_latest))
        .route("/blocks/:start_slot", get(blocks))
        .route("/blocks/:start_slot/:end_slot", get(blocks_range))
        .route(
            "/confusion/:client/:start_slot/:end_slot",
            get(confusion),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn classify_records(
    state: &AppState,
    body: &[serde_json::Value],
) -> Result<Vec<BlockRow>, AppError> {
    let ensemble = state.ensemble.as_ref().ok_or(AppError::ClassifierDisabled)?;
    let mut rows = Vec::with_capacity(body.len());
    for value in body {
        RewardRecord::validate_shape(value).map_err(AppError::MalformedInput)?;
        let record: RewardRecord = serde_json::from_value(value.clone())
            .map_err(|e| AppError::MalformedInput(e.to_string()))?;
        let output = ensemble.classify(&record)?;
        rows.push(output.into_block_row(&record.meta));
    }
    Ok(rows)
}

async fn classify(
    State(state): State<AppState>,
    Json(body): Json<Vec<serde_json::Value>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let rows = classify_records(&state, &body).await?;
    state.store.insert_blocks(rows).await?;
    Ok(Json(json!("OK")))
}

async fn classify_no_store(
    State(state): State<AppState>,
    Json(body): Json<Vec<serde_json::Value>>,
) -> Result<Json<Vec<serde_json::Value>>, AppError> {
    let rows = classify_records(&state, &body).await?;
    Ok(Json(
        rows.into_iter()
            .map(|r| json!({ "best_guess_single": r.best_guess_single.to_string() }))
            .collect(),
    ))
}

async fn sync_status(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let (greatest_block_slot, synced) = state.store.sync_status().await?;
    Ok(Json(json!({ "greatest_block_slot": greatest_block_slot, "synced": synced })))
}

async fn sync_gaps(State(state): State<AppState>) -> Result<Json<Vec<Gap>>, AppError> {
    Ok(Json(state.store.sync_gaps().await?))
}

fn enabled_clients_union(ensemble: Option<&MultiRangeEnsemble>) -> Vec<Client> {
    match ensemble {
        Some(ensemble) => {
            let mut set = BTreeSet::new();
            for (_, _, classifier) in ensemble.ranges() {
                set.extend(classifier.model().enabled_clients.iter().copied());
            }
            set.into_iter().collect()
        }
        None => Client::ALL.to_vec(),
    }
}

const SLOTS_PER_EPOCH: u64 = 32;

async fn blocks_per_client_shared(
    state: AppState,
    start_epoch: u64,
    end_epoch: Option<u64>,
) -> Result<Json<BTreeMap<String, i64>>, AppError> {
    let start_slot = start_epoch * SLOTS_PER_EPOCH;
    let end_slot = end_epoch.map(|e| e * SLOTS_PER_EPOCH).unwrap_or(u64::MAX);
    let enabled = enabled_clients_union(state.ensemble.as_deref());
    let counts = state.store.blocks_per_client(start_slot, end_slot, &enabled).await?;
    Ok(Json(counts))
}

async fn blocks_per_client(
    State(state): State<AppState>,
    Path(start_epoch): Path<u64>,
) -> Result<Json<BTreeMap<String, i64>>, AppError> {
    blocks_per_client_shared(state, start_epoch, None).await
}

async fn blocks_per_client_range(
    State(state): State<AppState>,
    Path((start_epoch, end_epoch)): Path<(u64, u64)>,
) -> Result<Json<BTreeMap<String, i64>>, AppError> {
    blocks_per_client_shared(state, start_epoch, Some(end_epoch)).await
}

async fn validator_blocks(
    State(state): State<AppState>,
    Path(index): Path<u64>,
) -> Result<Json<Vec<BlockRow>>, AppError> {
    Ok(Json(state.store.validator_blocks(index, 0).await?))
}

async fn validator_blocks_since(
    State(state): State<AppState>,
    Path((index, since_slot)): Path<(u64, u64)>,
) -> Result<Json<Vec<BlockRow>>, AppError> {
    Ok(Json(state.store.validator_blocks(index, since_slot).await?))
}

fn parse_index_array(body: &serde_json::Value) -> Result<Vec<u64>, AppError> {
    let arr = body.as_array().ok_or_else(|| {
        AppError::MalformedInput("body must be a JSON array of integers".to_string())
    })?;
    arr.iter()
        .map(|v| {
            v.as_u64().ok_or_else(|| {
                AppError::MalformedInput("body must be a JSON array of integers".to_string())
            })
        })
        .collect()
}

async fn validator_blocks_batch_shared(
    state: AppState,
    body: serde_json::Value,
    since_slot: u64,
) -> Result<Json<serde_json::Value>, AppError> {
    let indices = parse_index_array(&body)?;
    let mut map = serde_json::Map::with_capacity(indices.len());
    for index in indices {
        let rows = state.store.validator_blocks(index, since_slot).await?;
        map.insert(
            index.to_string(),
            serde_json::to_value(rows).expect("BlockRow always serializes"),
        );
    }
    Ok(Json(serde_json::Value::Object(map)))
}

async fn validator_blocks_batch(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, AppError> {
    validator_blocks_batch_shared(state, body, 0).await
}

async fn validator_blocks_batch_since(
    State(state): State<AppState>,
    Path(since_slot): Path<u64>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, AppError> {
    validator_blocks_batch_shared(state, body, since_slot).await
}

async fn validator_blocks_latest(
    State(state): State<AppState>,
) -> Result<Json<Vec<serde_json::Value>>, AppError> {
    let rows = state.store.all_validators_latest_blocks().await?;
    Ok(Json(
        rows.into_iter()
            .map(|(proposer_index, slot, label)| {
                json!({
                    "proposer_index": proposer_index,
                    "slot": slot,
                    "best_guess_single": label.to_string(),
                })
            })
            .collect(),
    ))
}

async fn blocks(
    State(state): State<AppState>,
    Path(start_slot): Path<u64>,
) -> Result<Json<Vec<BlockRow>>, AppError> {
    Ok(Json(state.store.blocks(start_slot, None).await?))
}

async fn blocks_range(
    State(state): State<AppState>,
    Path((start_slot, end_slot)): Path<(u64, u64)>,
) -> Result<Json<Vec<BlockRow>>, AppError> {
    Ok(Json(state.store.blocks(start_slot, Some(end_slot)).await?))
}

async fn confusion(
    State(state): State<AppState>,
    Path((client, start_slot, end_slot)): Path<(String, u64, u64)>,
) -> Result<Json<crate::store::Confusion>, AppError> {
    let client = Client::from_str_opt(&client)
        .ok_or_else(|| AppError::MalformedInput(format!("unknown client label {client}")))?;
    Ok(Json(state.store.confusion(client, start_slot, end_slot).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_validator_index_array() {
        let body = serde_json::json!([1, 2, 3]);
        assert_eq!(parse_index_array(&body).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn rejects_non_array_body() {
        let body = serde_json::json!({"not": "an array"});
        assert!(parse_index_array(&body).is_err());
    }

    #[test]
    fn rejects_non_integer_elements() {
        let body = serde_json::json!([1, "two"]);
        assert!(parse_index_array(&body).is_err());
    }
}

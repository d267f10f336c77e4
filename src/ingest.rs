//! Ingest pipeline (`spec.md` §4.H): a live SSE listener and a gap-filling
//! backfiller, both crash-tolerant long-lived workers sharing only the store
//! and the classifier ensemble.
//!
//! `BeaconClient` wraps the four upstream endpoints from `spec.md` §6 with
//! `reqwest`, grounded in the teacher's `Kvs` struct in `tinyzkp_api.rs`
//! (a `reqwest::Client` held as a field on shared state, with one method per
//! upstream call). There is no SSE client crate anywhere in the example
//! pack, so the event stream is framed by hand: `bytes_stream()` is buffered
//! until a blank line terminates an event, mirroring `event_listener.py`'s
//! use of `sseclient.SSEClient` without adding an unlisted dependency.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use serde::Deserialize;

use crate::classifier::ClassifyOutput;
use crate::ensemble::MultiRangeEnsemble;
use crate::error::IngestError;
use crate::store::BlockStore;
use crate::types::RewardRecord;

/// Upstream restore-point cadence (`spec.md` §4.H, Glossary).
pub const RESTORE_POINT: u64 = 2048;
const RETRY_BACKOFF: Duration = Duration::from_secs(5);
const BACKFILL_IDLE_SLEEP: Duration = Duration::from_secs(60);

pub struct BeaconClient {
    http: reqwest::Client,
    base_url: String,
}

impl BeaconClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// `GET /eth/v1/events?topics=block_reward`, yielding a parsed reward
    /// record per SSE `data:` frame.
    pub async fn stream_block_rewards(
        &self,
    ) -> Result<impl Stream<Item = Result<RewardRecord, IngestError>>, IngestError> {
        let url = format!("{}/eth/v1/events?topics=block_reward", self.base_url);
        let resp = self
            .http
            .get(&url)
            .header("Accept", "text/event-stream")
            .send()
            .await?
            .error_for_status()?;

        let byte_stream: Pin<Box<dyn Stream<Item = reqwest::Result<bytes::Bytes>> + Send>> =
            Box::pin(resp.bytes_stream());

        Ok(futures_util::stream::unfold(
            (byte_stream, String::new()),
            |(mut stream, mut buffer)| async move {
                loop {
                    if let Some(event) = next_event(&mut buffer) {
                        match parse_event_data(&event) {
                            Some(record) => return Some((Ok(record), (stream, buffer))),
                            None => continue,
                        }
                    }
                    match stream.next().await {
                        Some(Ok(chunk)) => {
                            buffer.push_str(&String::from_utf8_lossy(&chunk));
                        }
                        Some(Err(e)) => {
                            return Some((Err(IngestError::Upstream(e)), (stream, buffer)))
                        }
                        None => return None,
                    }
                }
            },
        ))
    }

    /// `GET /lighthouse/analysis/block_rewards?start_slot=S&end_slot=E`.
    pub async fn backfill_range(
        &self,
        start_slot: u64,
        end_slot: u64,
    ) -> Result<Vec<RewardRecord>, IngestError> {
        let url = format!("{}/lighthouse/analysis/block_rewards", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("start_slot", start_slot), ("end_slot", end_slot)])
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json::<Vec<RewardRecord>>().await?)
    }

    /// `GET /eth/v1/beacon/headers/head`, returning the current head slot.
    pub async fn head_slot(&self) -> Result<u64, IngestError> {
        #[derive(Deserialize)]
        struct Envelope {
            data: HeaderData,
        }
        #[derive(Deserialize)]
        struct HeaderData {
            header: SignedHeader,
        }
        #[derive(Deserialize)]
        struct SignedHeader {
            message: HeaderMessage,
        }
        #[derive(Deserialize)]
        struct HeaderMessage {
            #[serde(deserialize_with = "crate::types::de_u64_flex")]
            slot: u64,
        }

        let url = format!("{}/eth/v1/beacon/headers/head", self.base_url);
        let resp = self.http.get(&url).send().await?.error_for_status()?;
        let envelope: Envelope = resp
            .json()
            .await
            .map_err(|e| IngestError::Decode(e.to_string()))?;
        Ok(envelope.data.header.message.slot)
    }

    /// `GET /eth/v1/beacon/states/{slot}/validators`, counting validators in
    /// an `active_*` status.
    pub async fn active_validator_count(&self, slot: u64) -> Result<u64, IngestError> {
        #[derive(Deserialize)]
        struct Envelope {
            data: Vec<ValidatorEntry>,
        }
        #[derive(Deserialize)]
        struct ValidatorEntry {
            status: String,
        }

        let url = format!("{}/eth/v1/beacon/states/{}/validators", self.base_url, slot);
        let resp = self.http.get(&url).send().await?.error_for_status()?;
        let envelope: Envelope = resp
            .json()
            .await
            .map_err(|e| IngestError::Decode(e.to_string()))?;
        Ok(envelope
            .data
            .iter()
            .filter(|v| v.status.starts_with("active"))
            .count() as u64)
    }
}

/// Pulls one complete SSE event (terminated by a blank line) out of
/// `buffer`, consuming it. Returns `None` if no complete event is buffered
/// yet.
fn next_event(buffer: &mut String) -> Option<String> {
    let idx = buffer.find("\n\n")?;
    let event = buffer[..idx].to_string();
    buffer.drain(..idx + 2);
    Some(event)
}

/// Joins every `data:` line of an SSE event and parses it as a reward
/// record. Returns `None` (not an error) for events without a `data:` line
/// or whose payload fails to parse — both are logged and skipped rather
/// than tearing down the connection.
fn parse_event_data(event: &str) -> Option<RewardRecord> {
    let data: String = event
        .lines()
        .filter_map(|line| line.strip_prefix("data:").or_else(|| line.strip_prefix("data: ")))
        .collect::<Vec<_>>()
        .join("\n");
    if data.is_empty() {
        return None;
    }
    match serde_json::from_str(&data) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::warn!(error = %e, "failed to decode SSE block_reward payload");
            None
        }
    }
}

/// Splits `[start, end]` into closed intervals aligned to `restore_point`
/// boundaries (`spec.md` §4.H, scenario S2).
pub fn explode_gap(start: u64, end: u64, restore_point: u64) -> Vec<(u64, u64)> {
    let mut chunks = Vec::new();
    let mut cursor = start;
    while cursor <= end {
        let next_boundary = next_multiple_at_least(cursor, restore_point);
        let chunk_end = next_boundary.min(end);
        chunks.push((cursor, chunk_end));
        cursor = chunk_end + 1;
    }
    chunks
}

fn next_multiple_at_least(n: u64, step: u64) -> u64 {
    if n % step == 0 {
        n
    } else {
        (n / step + 1) * step
    }
}

fn classify_and_row(
    ensemble: &MultiRangeEnsemble,
    record: RewardRecord,
) -> Option<crate::types::BlockRow> {
    match ensemble.classify(&record) {
        Ok(output) => Some(ClassifyOutput::into_block_row(output, &record.meta)),
        Err(e) => {
            tracing::warn!(error = %e, slot = record.meta.slot, "skipping record: classification failed");
            None
        }
    }
}

/// Runs the live listener forever. On any I/O or decode error the whole
/// stream is torn down and re-established after a 5s backoff; no replay
/// state is kept (the backfiller covers anything missed in between).
pub async fn run_listener(beacon: Arc<BeaconClient>, ensemble: Arc<MultiRangeEnsemble>, store: Arc<BlockStore>) {
    loop {
        if let Err(e) = listen_once(&beacon, &ensemble, &store).await {
            tracing::warn!(error = %e, "listener stream failed, reconnecting");
        }
        tokio::time::sleep(RETRY_BACKOFF).await;
    }
}

async fn listen_once(
    beacon: &BeaconClient,
    ensemble: &MultiRangeEnsemble,
    store: &BlockStore,
) -> Result<(), IngestError> {
    let stream = beacon.stream_block_rewards().await?;
    tokio::pin!(stream);
    while let Some(item) = stream.next().await {
        let record = item?;
        if let Some(row) = classify_and_row(ensemble, record) {
            store.insert_blocks(vec![row]).await?;
        }
    }
    Ok(())
}

/// Runs the backfiller forever: while gaps remain, downloads and inserts
/// them chunk by chunk; once caught up, sleeps 60s before checking again.
pub async fn run_backfiller(beacon: Arc<BeaconClient>, ensemble: Arc<MultiRangeEnsemble>, store: Arc<BlockStore>) {
    loop {
        match backfill_once(&beacon, &ensemble, &store).await {
            Ok(true) => {}
            Ok(false) => tokio::time::sleep(BACKFILL_IDLE_SLEEP).await,
            Err(e) => {
                tracing::warn!(error = %e, "backfill pass failed");
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
        }
    }
}

/// Returns `Ok(true)` if any gap was worked (caller should loop again
/// immediately), `Ok(false)` if fully synced.
async fn backfill_once(
    beacon: &BeaconClient,
    ensemble: &MultiRangeEnsemble,
    store: &BlockStore,
) -> Result<bool, IngestError> {
    let gaps = store.sync_gaps().await?;
    if gaps.is_empty() {
        return Ok(false);
    }
    for gap in gaps {
        for (start, end) in explode_gap(gap.start, gap.end, RESTORE_POINT) {
            tracing::info!(start, end, "backfilling slot range");
            let records = beacon.backfill_range(start, end).await?;
            let rows: Vec<_> = records
                .into_iter()
                .filter_map(|r| classify_and_row(ensemble, r))
                .collect();
            store.insert_blocks(rows).await?;
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s2_chunk_explosion() {
        assert_eq!(explode_gap(1, 2048, 2048), vec![(1, 2048)]);
        assert_eq!(explode_gap(1, 10, 2048), vec![(1, 10)]);

        let chunks = explode_gap(14273, 7530327, 2048);
        assert_eq!(chunks.first().unwrap().1, 14336);
        assert_eq!(chunks.last().unwrap().1, 7530327);
        for &(s, e) in &chunks[1..chunks.len() - 1] {
            assert_eq!(e - s + 1, 2048);
        }
        for w in chunks.windows(2) {
            assert_eq!(w[1].0, w[0].1 + 1);
        }
    }

    #[test]
    fn next_event_extracts_blank_line_terminated_frames() {
        let mut buf = String::from("data: {\"a\":1}\n\ndata: {\"a\":2}\n\nincomplete");
        assert_eq!(next_event(&mut buf).unwrap(), "data: {\"a\":1}");
        assert_eq!(next_event(&mut buf).unwrap(), "data: {\"a\":2}");
        assert_eq!(next_event(&mut buf), None);
        assert_eq!(buf, "incomplete");
    }

    #[test]
    fn parse_event_data_skips_malformed_payload() {
        assert!(parse_event_data("data: not json").is_none());
        assert!(parse_event_data("event: block_reward").is_none());
    }
}

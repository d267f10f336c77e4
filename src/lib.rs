//! Client fingerprinting: identifies which consensus-layer client produced
//! each beacon-chain block from the reward structure it generates, trained
//! from a small seed of graffiti-labeled blocks and generalized to the
//! wider, non-self-advertising population via distance-weighted k-nearest-
//! neighbor classification over reward-shape features.

/// HTTP surface: request handlers and router assembly.
pub mod api;
/// Single-range classifier: graffiti short-circuit, k-NN, hedging rules.
pub mod classifier;
/// Environment-variable configuration.
pub mod config;
/// Ratcliff/Obershelp sequence similarity, shared by several features.
pub mod difflib;
/// Multi-range ensemble: slot-dispatches across single-range classifiers.
pub mod ensemble;
/// Shared error categories for the store, model I/O, ingest, and HTTP layer.
pub mod error;
/// Feature extractor: named pure functions from a reward record to a float.
pub mod features;
/// Graffiti matcher: regex table mapping free text to a client label.
pub mod graffiti;
/// Ingest pipeline: live SSE listener and restore-point-aligned backfiller.
pub mod ingest;
/// Distance-weighted k-nearest-neighbor engine.
pub mod knn;
/// On-disk classifier model format and in-memory representation.
pub mod model;
/// Query/aggregation layer: period guesses and CSV export.
pub mod query;
/// Persistent block store (embedded SQLite).
pub mod store;
/// Training-data directory loader.
pub mod training;
/// Core data model: reward records, the closed client label set, block rows.
pub mod types;

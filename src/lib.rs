//! accrete: an ethics-gated content ingestion pipeline.
//!
//! Records flow from source adapters through a robots/rate-limit gate,
//! content-hash dedup, quality and alignment scoring, into a tiered
//! on-disk store, a knowledge graph and an emergence detector.

pub mod alignment;
pub mod clock;
pub mod commands;
pub mod config;
pub mod dedup;
pub mod detect;
pub mod error;
pub mod ethics;
pub mod fetch;
pub mod graph;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod persist;
pub mod progress;
pub mod quality;
pub mod store;
pub mod text;

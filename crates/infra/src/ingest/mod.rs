//! Interval-driven ingestion worker.

pub mod worker;

pub use worker::{IngestionWorker, IngestionWorkerConfig};

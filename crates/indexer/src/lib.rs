//! ClauseForge Indexer
//!
//! Corpus maintenance jobs received from the maintenance queue:
//! ingest, delete and drift-triggered sparse reindex.

pub mod jobs;
pub mod processor;

pub use jobs::{ChunkPayload, DeleteJob, IngestJob, MaintenanceJob, ReindexJob};
pub use processor::{MaintenanceError, MaintenanceProcessor, ProcessorConfig};

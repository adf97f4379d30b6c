//! Core library for GitPulse.
//!
//! GitPulse ingests the GitHub public event stream, durably stores push
//! events, and enriches them with the associated actor (user or organization)
//! and repository records. The library is organized around a small set of
//! ports (key/value store, job queue, blob store, upstream API, persistence)
//! with one production adapter and one in-memory adapter each, plus the
//! coordination pieces that tie them together: the rate coordinator, the
//! fetch guard, the job runtime, and the signal-aware ingestion worker.

pub mod actor;
pub mod avatar;
pub mod blobstore;
pub mod download;
pub mod error;
pub mod fetch;
pub mod github;
pub mod guard;
pub mod handler;
pub mod ingest;
pub mod jobs;
pub mod kv;
pub mod models;
pub mod ratelimit;
pub mod store;
pub mod worker;

pub use error::{IngestError, Result};

use thiserror::Error;

/// Composite error for the ingestion path: one cycle touches the upstream
/// API, the job queue, and the database, and any of them can fail.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("upstream API error: {0}")]
    Api(#[from] crate::github::ApiError),

    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("queue error: {0}")]
    Queue(#[from] crate::jobs::QueueError),

    #[error("payload decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, IngestError>;

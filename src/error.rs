use crate::store::Relation;

#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    #[error("{0}")]
    Usage(String),
    #[error("Error while setting the store connection: {0}")]
    Connect(#[source] sqlx::Error),
    #[error("Failed to load the feed: {0:#}")]
    Feed(#[from] anyhow::Error),
    #[error("Error while clearing table {relation}: {source}")]
    Clear {
        relation: Relation,
        source: sqlx::Error,
    },
    #[error("Error while setting row {key} of table {relation}: {source}")]
    Persist {
        relation: Relation,
        key: String,
        source: sqlx::Error,
    },
    #[error("Feed has {0} data integrity anomalies")]
    Integrity(usize),
    #[error("Interrupted")]
    Cancelled,
}

impl SyncError {
    pub fn exit_code(&self) -> u8 {
        match self {
            SyncError::Usage(_) => 2,
            SyncError::Connect(_) => 3,
            SyncError::Feed(_) => 4,
            SyncError::Clear { .. } | SyncError::Persist { .. } => 5,
            SyncError::Integrity(_) => 6,
            SyncError::Cancelled => 130,
        }
    }
}

/// Result type alias for incident store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Corrupt incident row {id}: {reason}")]
    Corrupt { id: uuid::Uuid, reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

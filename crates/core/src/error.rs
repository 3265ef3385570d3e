use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("workbook error: {0}")]
    Workbook(String),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("persist error: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("ingestion cancelled")]
    Cancelled,
}

impl From<calamine::Error> for IngestError {
    fn from(error: calamine::Error) -> Self {
        Self::Workbook(error.to_string())
    }
}

impl From<calamine::XlsxError> for IngestError {
    fn from(error: calamine::XlsxError) -> Self {
        Self::Workbook(error.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store not loaded")]
    NotReady,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("ingestion error: {0}")]
    Ingestion(#[from] IngestError),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<rusqlite::Error> for ServiceError {
    fn from(error: rusqlite::Error) -> Self {
        Self::Ingestion(IngestError::Sqlite(error))
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(error: std::io::Error) -> Self {
        Self::Ingestion(IngestError::Io(error))
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;

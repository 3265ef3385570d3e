pub mod config;
pub mod documents;
pub mod error;
pub mod ingest;
pub mod models;
pub mod normalize;
pub mod orchestrator;
pub mod progress;
pub mod source;
pub mod store;
pub mod traits;

#[cfg(test)]
mod testing;

pub use config::{IngestionOptions, ServiceConfig, PROGRESS_FILE_NAME, STORE_FILE_NAME};
pub use documents::{list_text_documents, read_text_document};
pub use error::{IngestError, Result, ServiceError};
pub use ingest::{count_rows, digest_file, discover_spreadsheets, rebuild_store, RebuildContext};
pub use models::{
    Entry, IngestState, LookupResult, ProgressSnapshot, RawRow, RowLocation, RowRecord,
    SpreadsheetFile, StatusReport, TextDocument, STORED_COLUMNS,
};
pub use normalize::{normalize, Normalizer};
pub use orchestrator::{IngestionService, StartedRun};
pub use progress::{ProgressStore, RunOutcome};
pub use source::WorkbookOpener;
pub use store::{EntryStore, StoreInfo};
pub use traits::{SheetRows, SheetSource, SourceOpener};

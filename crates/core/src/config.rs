use std::path::{Path, PathBuf};
use std::time::Duration;

pub const STORE_FILE_NAME: &str = "entries.sqlite3";
pub const PROGRESS_FILE_NAME: &str = "progress.json";

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    /// Rows buffered before they are written to the open transaction.
    pub batch_size: usize,
    /// Every n-th processed row contributes a preview sample.
    pub sample_step: u64,
    /// Upper bound on retained preview samples.
    pub latest_limit: usize,
    /// Minimum spacing between rate-limited progress writes.
    pub persist_interval: Duration,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            batch_size: 20_000,
            sample_step: 10,
            latest_limit: 40,
            persist_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub source_dir: PathBuf,
    pub state_dir: PathBuf,
    pub options: IngestionOptions,
}

impl ServiceConfig {
    pub fn new(source_dir: impl Into<PathBuf>, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            state_dir: state_dir.into(),
            options: IngestionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: IngestionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store_path(&self) -> PathBuf {
        self.state_dir.join(STORE_FILE_NAME)
    }

    pub fn progress_path(&self) -> PathBuf {
        self.state_dir.join(PROGRESS_FILE_NAME)
    }

    pub fn source_path(&self, file_name: &str) -> PathBuf {
        self.source_dir.join(file_name)
    }
}

/// Sibling path a rebuild writes to before it is renamed into place.
pub fn staging_path(store_path: &Path) -> PathBuf {
    let mut name = store_path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".building");
    store_path.with_file_name(name)
}

use crate::ingest::{count_rows, discover_spreadsheets, rebuild_store, RebuildContext};
use crate::progress::{ProgressStore, RunOutcome};
use crate::source::WorkbookOpener;
use crate::store::{EntryStore, StoreInfo};
use crate::traits::SourceOpener;
use crate::{
    Entry, IngestError, LookupResult, RowRecord, ServiceConfig, ServiceError, SpreadsheetFile,
    StatusReport,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StartedRun {
    pub started: bool,
    pub run_id: String,
    pub total: u64,
}

struct CurrentRun {
    run_id: String,
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

struct ServiceInner {
    config: ServiceConfig,
    progress: ProgressStore,
    store: EntryStore,
    opener: Arc<dyn SourceOpener>,
    current: Mutex<Option<CurrentRun>>,
}

impl ServiceInner {
    fn build(&self, source_path: &Path, cancel: &AtomicBool) -> Result<StoreInfo, IngestError> {
        let mut source = self.opener.open(source_path)?;
        let context = RebuildContext {
            progress: &self.progress,
            cancel,
            options: &self.config.options,
        };
        rebuild_store(source.as_mut(), source_path, self.store.path(), &context)?;
        self.store.activate()
    }
}

/// Owns ingestion state for the process. At most one ingestion runs at a time.
#[derive(Clone)]
pub struct IngestionService {
    inner: Arc<ServiceInner>,
}

impl IngestionService {
    pub fn new(config: ServiceConfig) -> Result<Self, ServiceError> {
        Self::with_opener(config, Arc::new(WorkbookOpener))
    }

    pub fn with_opener(
        config: ServiceConfig,
        opener: Arc<dyn SourceOpener>,
    ) -> Result<Self, ServiceError> {
        std::fs::create_dir_all(&config.state_dir)?;
        let progress = ProgressStore::open(config.progress_path(), &config.options);
        let store = EntryStore::open(config.store_path())?;

        Ok(Self {
            inner: Arc::new(ServiceInner {
                config,
                progress,
                store,
                opener,
                current: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    pub async fn spreadsheets(&self) -> Result<Vec<SpreadsheetFile>, ServiceError> {
        let folder = self.inner.config.source_dir.clone();
        Ok(tokio::task::spawn_blocking(move || discover_spreadsheets(&folder)).await?)
    }

    /// Starts a fresh rebuild from `file_name` in the source directory.
    pub async fn start(&self, file_name: &str) -> Result<StartedRun, ServiceError> {
        let name = file_name.trim().to_string();
        if name.is_empty() {
            return Err(ServiceError::InvalidInput("missing file".to_string()));
        }
        let known = self.spreadsheets().await?;
        if !known.iter().any(|file| file.name == name) {
            return Err(ServiceError::InvalidInput(format!("invalid file '{name}'")));
        }

        let mut current = self.inner.current.lock().await;
        if self.inner.progress.is_running() {
            return Err(ServiceError::Conflict("loading in progress".to_string()));
        }

        let source_path = self.inner.config.source_path(&name);
        let total = self.estimate_total(source_path.clone()).await;
        let run_id = Uuid::new_v4().to_string();

        self.inner.progress.reset(&name, total, &run_id);
        self.inner.store.remove().map_err(|error| {
            self.inner
                .progress
                .mark_finished(RunOutcome::Failed(error.to_string()));
            ServiceError::from(error)
        })?;

        let cancel = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(drive(
            Arc::clone(&self.inner),
            source_path,
            run_id.clone(),
            Arc::clone(&cancel),
        ));
        *current = Some(CurrentRun {
            run_id: run_id.clone(),
            cancel,
            handle,
        });

        info!(file = %name, total, run_id = %run_id, "ingestion started");
        Ok(StartedRun {
            started: true,
            run_id,
            total,
        })
    }

    async fn estimate_total(&self, source_path: PathBuf) -> u64 {
        let inner = Arc::clone(&self.inner);
        let counted = tokio::task::spawn_blocking(move || {
            let mut source = inner.opener.open(&source_path)?;
            Ok::<_, IngestError>(count_rows(source.as_mut()))
        })
        .await;

        match counted {
            Ok(Ok(total)) => total,
            Ok(Err(error)) => {
                warn!(error = %error, "could not count rows before ingestion");
                0
            }
            Err(error) => {
                warn!(error = %error, "row counting task failed");
                0
            }
        }
    }

    /// Asks the running ingestion to stop at its next row.
    pub async fn cancel(&self) -> bool {
        let current = self.inner.current.lock().await;
        match current.as_ref() {
            Some(run) if self.inner.progress.is_running() => {
                run.cancel.store(true, Ordering::Release);
                info!(run_id = %run.run_id, "ingestion cancellation requested");
                true
            }
            _ => false,
        }
    }

    /// Cancels any running ingestion and waits for it to settle.
    pub async fn shutdown(&self) {
        let run = self.inner.current.lock().await.take();
        if let Some(run) = run {
            run.cancel.store(true, Ordering::Release);
            if let Err(error) = run.handle.await {
                error!(run_id = %run.run_id, error = %error, "ingestion task ended abnormally");
            }
        }
    }

    pub async fn unload(&self) -> Result<(), ServiceError> {
        let _current = self.inner.current.lock().await;
        if self.inner.progress.is_running() {
            return Err(ServiceError::Conflict("loading in progress".to_string()));
        }
        self.inner.store.remove()?;
        self.inner.progress.mark_idle();
        info!("store unloaded");
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.store.is_ready()
    }

    pub fn status(&self) -> StatusReport {
        StatusReport {
            loaded: self.inner.store.is_ready(),
            progress: self.inner.progress.snapshot(),
        }
    }

    /// Polls `status` every `interval` for `duration`, yielding the first
    /// report and then only reports that changed.
    pub fn stream_status(
        &self,
        duration: Duration,
        interval: Duration,
    ) -> impl Stream<Item = StatusReport> + Send + 'static {
        let service = self.clone();
        async_stream::stream! {
            let deadline = tokio::time::Instant::now() + duration;
            let mut last: Option<StatusReport> = None;
            loop {
                let report = service.status();
                if last.as_ref().map_or(true, |previous| report.differs_from(previous)) {
                    last = Some(report.clone());
                    yield report;
                }
                if tokio::time::Instant::now() >= deadline {
                    break;
                }
                tokio::time::sleep(interval).await;
            }
        }
    }

    pub async fn lookup(&self, word: &str) -> Result<Entry, ServiceError> {
        let inner = Arc::clone(&self.inner);
        let word = word.to_string();
        tokio::task::spawn_blocking(move || inner.store.lookup(&word)).await?
    }

    pub async fn search(&self, word: &str) -> Result<LookupResult, ServiceError> {
        let inner = Arc::clone(&self.inner);
        let word = word.to_string();
        tokio::task::spawn_blocking(move || inner.store.search(&word)).await?
    }

    pub async fn fetch_row(&self, sheet: &str, row_index: u64) -> Result<RowRecord, ServiceError> {
        let sheet = sheet.trim().to_string();
        if sheet.is_empty() {
            return Err(ServiceError::InvalidInput("missing sheet".to_string()));
        }
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.store.fetch_row(&sheet, row_index)).await?
    }
}

async fn drive(
    inner: Arc<ServiceInner>,
    source_path: PathBuf,
    run_id: String,
    cancel: Arc<AtomicBool>,
) {
    let worker = Arc::clone(&inner);
    let built = tokio::task::spawn_blocking(move || worker.build(&source_path, &cancel)).await;

    let outcome = match built {
        Ok(Ok(info)) => {
            info!(run_id = %run_id, rows = info.rows, source = %info.source_file, "ingestion finished");
            RunOutcome::Completed
        }
        Ok(Err(IngestError::Cancelled)) => {
            info!(run_id = %run_id, "ingestion cancelled");
            RunOutcome::Cancelled
        }
        Ok(Err(error)) => {
            error!(run_id = %run_id, error = %error, "ingestion failed");
            RunOutcome::Failed(error.to_string())
        }
        Err(error) => {
            error!(run_id = %run_id, error = %error, "ingestion task panicked");
            RunOutcome::Failed(format!("ingestion task failed: {error}"))
        }
    };

    inner.progress.mark_finished(outcome);
}

use crate::{IngestError, IngestState, IngestionOptions, ProgressSnapshot};
use chrono::Utc;
use std::collections::VecDeque;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tracing::{info, warn};

// Critical sections never leave a value half-updated, so poison is ignored.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Cancelled,
    Failed(String),
}

struct ProgressState {
    snapshot: ProgressSnapshot,
    samples: VecDeque<String>,
}

impl ProgressState {
    fn new(snapshot: ProgressSnapshot) -> Self {
        let samples = snapshot.recent_samples.iter().cloned().collect();
        Self { snapshot, samples }
    }

    fn touch(&mut self) {
        self.snapshot.timestamp = Utc::now().to_rfc3339();
    }

    fn recompute_percent(&mut self) {
        let snapshot = &mut self.snapshot;
        if snapshot.total > 0 && snapshot.processed > snapshot.total {
            snapshot.total = snapshot.processed;
        }
        snapshot.percent = if snapshot.total > 0 {
            snapshot.processed as f64 / snapshot.total as f64 * 100.0
        } else {
            0.0
        };
    }

    fn frozen(&self) -> ProgressSnapshot {
        let mut copy = self.snapshot.clone();
        copy.recent_samples = self.samples.iter().cloned().collect();
        copy
    }
}

#[derive(Default)]
struct PersistClock {
    last_write: Option<Instant>,
}

/// Process-wide ingestion progress, mirrored to a JSON file that is replaced
/// by rename on every write.
pub struct ProgressStore {
    path: PathBuf,
    sample_step: u64,
    latest_limit: usize,
    persist_interval: Duration,
    state: Mutex<ProgressState>,
    clock: Mutex<PersistClock>,
}

impl ProgressStore {
    /// A persisted snapshot that still claims to be running is rewritten as
    /// failed.
    pub fn open(path: impl Into<PathBuf>, options: &IngestionOptions) -> Self {
        let path = path.into();
        let mut snapshot = match read_snapshot(&path) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => ProgressSnapshot::default(),
            Err(error) => {
                warn!(path = %path.display(), error = %error, "discarding unreadable progress file");
                ProgressSnapshot::default()
            }
        };

        if snapshot.running {
            info!(file = ?snapshot.file, "previous ingestion was interrupted by a restart");
            snapshot.running = false;
            snapshot.state = IngestState::Failed;
            snapshot.error = Some("interrupted by restart".to_string());
            snapshot.timestamp = Utc::now().to_rfc3339();
        }

        let store = Self {
            path,
            sample_step: options.sample_step.max(1),
            latest_limit: options.latest_limit,
            persist_interval: options.persist_interval,
            state: Mutex::new(ProgressState::new(snapshot)),
            clock: Mutex::new(PersistClock::default()),
        };
        store.persist(true);
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn reset(&self, file_name: &str, total: u64, run_id: &str) {
        {
            let mut state = lock(&self.state);
            state.snapshot = ProgressSnapshot {
                state: IngestState::Running,
                running: true,
                run_id: Some(run_id.to_string()),
                file: Some(file_name.to_string()),
                total,
                ..ProgressSnapshot::default()
            };
            state.samples.clear();
            state.touch();
        }
        self.persist(true);
    }

    pub fn set_current_sheet(&self, sheet: &str) {
        {
            let mut state = lock(&self.state);
            state.snapshot.current_sheet = Some(sheet.to_string());
            state.touch();
        }
        self.persist(false);
    }

    pub fn increment_processed(&self, count: u64, sample: Option<&str>) -> u64 {
        let processed = {
            let mut state = lock(&self.state);
            state.snapshot.processed += count;
            state.recompute_percent();

            let processed = state.snapshot.processed;
            if let Some(sample) = sample.filter(|value| !value.is_empty()) {
                if processed % self.sample_step == 0 {
                    state.samples.push_back(sample.to_string());
                    while state.samples.len() > self.latest_limit {
                        state.samples.pop_front();
                    }
                }
            }
            state.touch();
            processed
        };
        self.persist(false);
        processed
    }

    pub fn mark_finished(&self, outcome: RunOutcome) {
        {
            let mut state = lock(&self.state);
            let snapshot = &mut state.snapshot;
            snapshot.running = false;
            match outcome {
                RunOutcome::Completed => {
                    snapshot.state = IngestState::Ready;
                    snapshot.total = snapshot.processed;
                    snapshot.percent = 100.0;
                    snapshot.error = None;
                }
                RunOutcome::Cancelled => {
                    snapshot.state = IngestState::Cancelled;
                    snapshot.error = None;
                }
                RunOutcome::Failed(error) => {
                    snapshot.state = IngestState::Failed;
                    snapshot.error = Some(error);
                }
            }
            state.touch();
        }
        self.persist(true);
    }

    pub fn mark_idle(&self) {
        {
            let mut state = lock(&self.state);
            if state.snapshot.running {
                return;
            }
            state.snapshot.state = IngestState::Idle;
            state.touch();
        }
        self.persist(true);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        lock(&self.state).frozen()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).snapshot.running
    }

    fn persist(&self, force: bool) {
        let mut clock = lock(&self.clock);
        if !force {
            if let Some(last_write) = clock.last_write {
                if last_write.elapsed() < self.persist_interval {
                    return;
                }
            }
        }

        let snapshot = self.snapshot();
        if let Err(error) = write_snapshot(&self.path, &snapshot) {
            warn!(path = %self.path.display(), error = %error, "failed to persist progress");
        }
        clock.last_write = Some(Instant::now());
    }
}

fn read_snapshot(path: &Path) -> Result<Option<ProgressSnapshot>, IngestError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error.into()),
    }
}

fn write_snapshot(path: &Path, snapshot: &ProgressSnapshot) -> Result<(), IngestError> {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(directory)?;

    let mut file = NamedTempFile::new_in(directory)?;
    serde_json::to_writer_pretty(&mut file, snapshot)?;
    file.flush()?;
    file.as_file().sync_all()?;
    file.persist(path)?;
    Ok(())
}

use crate::config::staging_path;
use crate::progress::ProgressStore;
use crate::store::{self, StoreInfo, StoredRow};
use crate::traits::{SheetRows, SheetSource};
use crate::{Entry, IngestError, IngestionOptions, Normalizer, SpreadsheetFile};
use chrono::{DateTime, Local, Utc};
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const SPREADSHEET_EXTENSIONS: [&str; 4] = ["xlsx", "xlsm", "xls", "ods"];

/// Spreadsheets directly inside `folder`, sorted case-insensitively by name.
pub fn discover_spreadsheets(folder: &Path) -> Vec<SpreadsheetFile> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_spreadsheet = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                SPREADSHEET_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            });
        if !is_spreadsheet {
            continue;
        }

        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let mtime = metadata
            .modified()
            .map(|modified| {
                DateTime::<Local>::from(modified)
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string()
            })
            .unwrap_or_default();

        files.push(SpreadsheetFile {
            name: entry.file_name().to_string_lossy().to_string(),
            size: metadata.len(),
            mtime,
        });
    }

    files.sort_by_key(|file| file.name.to_lowercase());
    files
}

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Progress denominator: workbook metadata when it has any, otherwise a
/// full read of every sheet. 0 when neither works.
pub fn count_rows(source: &mut dyn SheetSource) -> u64 {
    match source.estimate_rows() {
        Ok(Some(total)) => return total,
        Ok(None) => {}
        Err(error) => warn!(error = %error, "row estimate unavailable, scanning sheets"),
    }

    let mut total = 0u64;
    for sheet in source.sheet_names() {
        match source.sheet_rows(&sheet) {
            Ok(SheetRows { rows, .. }) => total += rows.count() as u64,
            Err(error) => {
                warn!(sheet = %sheet, error = %error, "failed to scan sheet for row count");
                return 0;
            }
        }
    }
    total
}

pub struct RebuildContext<'a> {
    pub progress: &'a ProgressStore,
    pub cancel: &'a AtomicBool,
    pub options: &'a IngestionOptions,
}

impl RebuildContext<'_> {
    fn checkpoint(&self) -> Result<(), IngestError> {
        if self.cancel.load(Ordering::Acquire) {
            Err(IngestError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Rebuilds the entry store at `store_path` from `source`.
///
/// Rows go into one transaction on a staging file, which replaces the store
/// only after commit. Errors and cancellation remove the staging file.
pub fn rebuild_store(
    source: &mut dyn SheetSource,
    source_path: &Path,
    store_path: &Path,
    context: &RebuildContext<'_>,
) -> Result<StoreInfo, IngestError> {
    let staging = staging_path(store_path);
    remove_if_exists(&staging)?;
    if let Some(parent) = store_path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let built = write_staging(source, source_path, &staging, context);
    let info = match built {
        Ok(info) => info,
        Err(error) => {
            if let Err(cleanup) = remove_if_exists(&staging) {
                warn!(path = %staging.display(), error = %cleanup, "failed to remove staging store");
            }
            return Err(error);
        }
    };

    fs::rename(&staging, store_path)?;
    info!(source = %info.source_file, rows = info.rows, "store rebuilt");
    Ok(info)
}

fn write_staging(
    source: &mut dyn SheetSource,
    source_path: &Path,
    staging: &Path,
    context: &RebuildContext<'_>,
) -> Result<StoreInfo, IngestError> {
    let source_sha256 = digest_file(source_path)?;
    let keys = Normalizer::new()?;
    let batch_size = context.options.batch_size.max(1);

    let mut conn = Connection::open(staging)?;
    let tx = conn.transaction()?;
    store::create_schema(&tx)?;

    let mut batch: Vec<StoredRow> = Vec::with_capacity(batch_size.min(4_096));
    let mut written = 0u64;

    for sheet in source.sheet_names() {
        context.checkpoint()?;
        context.progress.set_current_sheet(&sheet);

        let SheetRows { column_count, rows } = source.sheet_rows(&sheet)?;
        for (row_index, row) in rows.enumerate() {
            context.checkpoint()?;
            let cells = row?;
            let entry = Entry::from_row(&keys, &sheet, row_index as u64, column_count, &cells);
            context
                .progress
                .increment_processed(1, entry.word.as_deref());
            batch.push(StoredRow {
                entry,
                column_count,
                cells,
            });

            if batch.len() >= batch_size {
                store::insert_batch(&tx, &batch)?;
                written += batch.len() as u64;
                batch.clear();
                debug!(sheet = %sheet, written, "flushed batch");
            }
        }
    }

    store::insert_batch(&tx, &batch)?;
    written += batch.len() as u64;
    batch.clear();

    context.checkpoint()?;
    store::create_indexes(&tx)?;

    let info = StoreInfo {
        source_file: source_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| {
                IngestError::InvalidArgument(format!(
                    "path has no file name: {}",
                    source_path.display()
                ))
            })?,
        source_sha256,
        rows: written,
        built_at: Utc::now().to_rfc3339(),
    };
    store::write_info(&tx, &info)?;

    context.checkpoint()?;
    tx.commit()?;
    Ok(info)
}

fn remove_if_exists(path: &Path) -> Result<(), IngestError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error.into()),
    }
}

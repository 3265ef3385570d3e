use crate::config::staging_path;
use crate::progress::lock;
use crate::{
    Entry, IngestError, LookupResult, Normalizer, RawRow, RowLocation, RowRecord, ServiceError,
    STORED_COLUMNS,
};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{info, warn};

const ENTRY_COLUMNS: &str =
    "word_norm, word, phonetic, meaning, sheet, row_index, column_count, cell_0, cell_1, cell_2, cell_3";

#[derive(Debug, Clone)]
pub struct StoredRow {
    pub entry: Entry,
    pub column_count: usize,
    pub cells: RawRow,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreInfo {
    pub source_file: String,
    pub source_sha256: String,
    pub rows: u64,
    pub built_at: String,
}

pub(crate) fn create_schema(tx: &Transaction<'_>) -> Result<(), IngestError> {
    tx.execute_batch(
        "DROP TABLE IF EXISTS entries;
         DROP TABLE IF EXISTS store_meta;
         CREATE TABLE entries (
             id INTEGER PRIMARY KEY,
             word_norm TEXT NOT NULL,
             word TEXT,
             phonetic TEXT,
             meaning TEXT,
             sheet TEXT NOT NULL,
             row_index INTEGER NOT NULL,
             column_count INTEGER NOT NULL,
             cell_0 TEXT,
             cell_1 TEXT,
             cell_2 TEXT,
             cell_3 TEXT
         );
         CREATE TABLE store_meta (
             key TEXT PRIMARY KEY,
             value TEXT NOT NULL
         );",
    )?;
    Ok(())
}

pub(crate) fn insert_batch(tx: &Transaction<'_>, batch: &[StoredRow]) -> Result<(), IngestError> {
    let mut statement = tx.prepare_cached(&format!(
        "INSERT INTO entries ({ENTRY_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
    ))?;

    for row in batch {
        let cell = |index: usize| row.cells.get(index).cloned().flatten();
        statement.execute(params![
            row.entry.word_norm,
            row.entry.word,
            row.entry.phonetic,
            row.entry.meaning,
            row.entry.sheet,
            row.entry.row_index,
            row.column_count as i64,
            cell(0),
            cell(1),
            cell(2),
            cell(3),
        ])?;
    }
    Ok(())
}

// Empty keys stay out of the word index.
pub(crate) fn create_indexes(tx: &Transaction<'_>) -> Result<(), IngestError> {
    tx.execute_batch(
        "CREATE INDEX idx_entries_word_norm ON entries (word_norm) WHERE word_norm <> '';
         CREATE UNIQUE INDEX idx_entries_sheet_row ON entries (sheet, row_index);",
    )?;
    Ok(())
}

pub(crate) fn write_info(tx: &Transaction<'_>, info: &StoreInfo) -> Result<(), IngestError> {
    let mut statement = tx.prepare("INSERT INTO store_meta (key, value) VALUES (?1, ?2)")?;
    statement.execute(params!["source_file", info.source_file])?;
    statement.execute(params!["source_sha256", info.source_sha256])?;
    statement.execute(params!["rows", info.rows.to_string()])?;
    statement.execute(params!["built_at", info.built_at])?;
    Ok(())
}

fn read_info(conn: &Connection) -> Result<Option<StoreInfo>, IngestError> {
    let has_meta: bool = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('entries', 'store_meta')",
        [],
        |row| row.get::<_, i64>(0).map(|count| count == 2),
    )?;
    if !has_meta {
        return Ok(None);
    }

    let value = |key: &str| -> Result<Option<String>, rusqlite::Error> {
        conn.query_row("SELECT value FROM store_meta WHERE key = ?1", [key], |row| row.get(0))
            .optional()
    };

    let (Some(source_file), Some(source_sha256), Some(rows), Some(built_at)) = (
        value("source_file")?,
        value("source_sha256")?,
        value("rows")?,
        value("built_at")?,
    ) else {
        return Ok(None);
    };

    Ok(Some(StoreInfo {
        source_file,
        source_sha256,
        rows: rows.parse().unwrap_or_default(),
        built_at,
    }))
}

fn entry_from_row(row: &Row<'_>) -> Result<Entry, rusqlite::Error> {
    Ok(Entry {
        word_norm: row.get(0)?,
        word: row.get(1)?,
        phonetic: row.get(2)?,
        meaning: row.get(3)?,
        sheet: row.get(4)?,
        row_index: row.get(5)?,
    })
}

/// The committed entry store. Readiness is raised only by
/// [`EntryStore::activate`] once a rebuild has been renamed into place.
pub struct EntryStore {
    path: PathBuf,
    keys: Normalizer,
    ready: AtomicBool,
    reader: Mutex<Option<Connection>>,
}

impl EntryStore {
    /// Picks up a store committed by an earlier process and removes the
    /// leftovers of an interrupted rebuild.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, IngestError> {
        let store = Self {
            path: path.into(),
            keys: Normalizer::new()?,
            ready: AtomicBool::new(false),
            reader: Mutex::new(None),
        };

        let staging = staging_path(&store.path);
        if staging.exists() {
            info!(path = %staging.display(), "removing unfinished rebuild");
            if let Err(error) = fs::remove_file(&staging) {
                warn!(path = %staging.display(), error = %error, "failed to remove unfinished rebuild");
            }
        }

        if store.path.exists() {
            match store.activate() {
                Ok(info) => {
                    info!(source = %info.source_file, rows = info.rows, "loaded existing store")
                }
                Err(error) => {
                    warn!(path = %store.path.display(), error = %error, "existing store is unusable")
                }
            }
        }

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn activate(&self) -> Result<StoreInfo, IngestError> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        let info = read_info(&conn)?.ok_or_else(|| {
            IngestError::InvalidArgument(format!(
                "store at {} has no completion marker",
                self.path.display()
            ))
        })?;

        let mut reader = lock(&self.reader);
        *reader = Some(conn);
        self.ready.store(true, Ordering::Release);
        Ok(info)
    }

    pub fn deactivate(&self) {
        let mut reader = lock(&self.reader);
        self.ready.store(false, Ordering::Release);
        *reader = None;
    }

    pub fn remove(&self) -> Result<(), IngestError> {
        self.deactivate();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    fn with_reader<T>(
        &self,
        query: impl FnOnce(&Connection) -> Result<T, ServiceError>,
    ) -> Result<T, ServiceError> {
        if !self.is_ready() {
            return Err(ServiceError::NotReady);
        }
        let reader = lock(&self.reader);
        let conn = reader.as_ref().ok_or(ServiceError::NotReady)?;
        query(conn)
    }

    /// First entry for `word` in insertion order: sheets in workbook order,
    /// rows top to bottom.
    pub fn lookup(&self, word: &str) -> Result<Entry, ServiceError> {
        self.with_reader(|conn| {
            let key = checked_key(&self.keys, word)?;
            let entry = conn
                .prepare_cached(&format!(
                    "SELECT {ENTRY_COLUMNS} FROM entries
                     WHERE word_norm = ?1 AND word_norm <> ''
                     ORDER BY id LIMIT 1"
                ))?
                .query_row([&key], entry_from_row)
                .optional()?;
            entry.ok_or_else(|| ServiceError::NotFound(format!("word '{}'", word.trim())))
        })
    }

    pub fn search(&self, word: &str) -> Result<LookupResult, ServiceError> {
        self.with_reader(|conn| {
            let key = checked_key(&self.keys, word)?;
            let mut statement = conn.prepare_cached(
                "SELECT sheet, row_index FROM entries
                 WHERE word_norm = ?1 AND word_norm <> ''
                 ORDER BY id",
            )?;
            let matches = statement
                .query_map([&key], |row| {
                    Ok(RowLocation {
                        sheet: row.get(0)?,
                        row_index: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(LookupResult {
                word: word.trim().to_string(),
                normalized: key,
                count: matches.len(),
                matches,
            })
        })
    }

    pub fn fetch_row(&self, sheet: &str, row_index: u64) -> Result<RowRecord, ServiceError> {
        self.with_reader(|conn| {
            let record = conn
                .prepare_cached(&format!(
                    "SELECT {ENTRY_COLUMNS} FROM entries WHERE sheet = ?1 AND row_index = ?2"
                ))?
                .query_row(params![sheet, row_index], |row| {
                    let entry = entry_from_row(row)?;
                    let column_count: i64 = row.get(6)?;
                    let width = usize::try_from(column_count).unwrap_or(0).min(STORED_COLUMNS);
                    let mut cells = BTreeMap::new();
                    for index in 0..width {
                        cells.insert(index.to_string(), row.get::<_, Option<String>>(7 + index)?);
                    }
                    Ok(RowRecord { entry, row: cells })
                })
                .optional()?;

            record.ok_or_else(|| ServiceError::NotFound(format!("row {row_index} of sheet '{sheet}'")))
        })
    }
}

fn checked_key(keys: &Normalizer, word: &str) -> Result<String, ServiceError> {
    if word.trim().is_empty() {
        return Err(ServiceError::InvalidInput("missing word".to_string()));
    }
    Ok(keys.key(word))
}

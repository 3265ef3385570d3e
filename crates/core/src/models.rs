use crate::Normalizer;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Number of leading columns kept verbatim for every row.
pub const STORED_COLUMNS: usize = 4;

/// One positional spreadsheet row. `None` marks an empty or absent cell.
pub type RawRow = Vec<Option<String>>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entry {
    pub word_norm: String,
    pub word: Option<String>,
    pub phonetic: Option<String>,
    pub meaning: Option<String>,
    pub sheet: String,
    pub row_index: u64,
}

impl Entry {
    /// Maps a raw row onto the dictionary columns.
    ///
    /// The word lives in column 1 when the sheet has more than one column,
    /// otherwise in column 0. Phonetic and meaning are columns 2 and 3.
    pub fn from_row(
        keys: &Normalizer,
        sheet: &str,
        row_index: u64,
        column_count: usize,
        row: &[Option<String>],
    ) -> Self {
        let word_column = if column_count > 1 { 1 } else { 0 };
        let cell = |index: usize| row.get(index).cloned().flatten();
        let word = cell(word_column).map(|value| value.trim().to_string());

        Self {
            word_norm: keys.key(word.as_deref().unwrap_or_default()),
            word: word.filter(|value| !value.is_empty()),
            phonetic: cell(2),
            meaning: cell(3),
            sheet: sheet.to_string(),
            row_index,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RowRecord {
    #[serde(flatten)]
    pub entry: Entry,
    pub row: BTreeMap<String, Option<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RowLocation {
    pub sheet: String,
    pub row_index: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LookupResult {
    pub word: String,
    pub normalized: String,
    pub count: usize,
    pub matches: Vec<RowLocation>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IngestState {
    #[default]
    Idle,
    Running,
    Ready,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressSnapshot {
    pub state: IngestState,
    pub running: bool,
    pub run_id: Option<String>,
    pub file: Option<String>,
    pub current_sheet: Option<String>,
    pub processed: u64,
    pub total: u64,
    pub percent: f64,
    pub error: Option<String>,
    pub recent_samples: Vec<String>,
    pub timestamp: String,
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self {
            state: IngestState::Idle,
            running: false,
            run_id: None,
            file: None,
            current_sheet: None,
            processed: 0,
            total: 0,
            percent: 0.0,
            error: None,
            recent_samples: Vec::new(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusReport {
    pub loaded: bool,
    #[serde(flatten)]
    pub progress: ProgressSnapshot,
}

impl StatusReport {
    /// Whether two reports differ in a way a status watcher cares about.
    pub fn differs_from(&self, other: &StatusReport) -> bool {
        self.loaded != other.loaded
            || self.progress.running != other.progress.running
            || self.progress.timestamp != other.progress.timestamp
            || self.progress.percent.floor() != other.progress.percent.floor()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpreadsheetFile {
    pub name: String,
    pub size: u64,
    pub mtime: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextDocument {
    pub name: String,
    pub content: String,
}

use crate::traits::{SheetRows, SheetSource, SourceOpener};
use crate::{IngestError, RawRow};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Holds a run at a fixed row until the test releases it.
#[derive(Default)]
pub(crate) struct Gate {
    reached: AtomicBool,
    released: AtomicBool,
}

impl Gate {
    pub(crate) fn wait_reached(&self) -> bool {
        wait_for(|| self.reached.load(Ordering::SeqCst))
    }

    pub(crate) fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }

    fn block(&self) {
        self.reached.store(true, Ordering::SeqCst);
        wait_for(|| self.released.load(Ordering::SeqCst));
    }
}

pub(crate) fn wait_for(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

#[derive(Clone)]
pub(crate) struct MemorySheet {
    pub(crate) name: String,
    pub(crate) column_count: usize,
    pub(crate) rows: Vec<RawRow>,
}

impl MemorySheet {
    pub(crate) fn new(name: &str, column_count: usize, rows: &[&[Option<&str>]]) -> Self {
        Self {
            name: name.to_string(),
            column_count,
            rows: rows
                .iter()
                .map(|row| row.iter().map(|cell| cell.map(str::to_string)).collect())
                .collect(),
        }
    }

    /// `count` rows of `[index, word<letters>, /p<index>/, meaning <index>]`
    /// where `<letters>` spells the index in base 26 (`a`, `b`, ... `ba`).
    pub(crate) fn numbered(name: &str, count: usize) -> Self {
        Self {
            name: name.to_string(),
            column_count: 4,
            rows: (0..count)
                .map(|index| {
                    vec![
                        Some(index.to_string()),
                        Some(format!("word{}", letters(index))),
                        Some(format!("/p{index}/")),
                        Some(format!("meaning {index}")),
                    ]
                })
                .collect(),
        }
    }
}

/// Letter-only spelling of `index`, so numbered words survive normalization.
pub(crate) fn letters(mut index: usize) -> String {
    let mut spelled = Vec::new();
    loop {
        spelled.push(b'a' + (index % 26) as u8);
        index /= 26;
        if index == 0 {
            break;
        }
    }
    spelled.reverse();
    String::from_utf8_lossy(&spelled).to_string()
}

#[derive(Clone, Default)]
pub(crate) struct MemoryWorkbook {
    pub(crate) sheets: Vec<MemorySheet>,
    pub(crate) estimate: Option<u64>,
    /// Global row number (0-based, across sheets) that fails to read.
    pub(crate) fail_at: Option<usize>,
    /// Global row number at which reading pauses on `gate`.
    pub(crate) pause_at: Option<usize>,
    pub(crate) gate: Option<Arc<Gate>>,
}

impl MemoryWorkbook {
    pub(crate) fn new(sheets: Vec<MemorySheet>) -> Self {
        Self {
            sheets,
            ..Self::default()
        }
    }

    pub(crate) fn paused_at(mut self, row: usize, gate: Arc<Gate>) -> Self {
        self.pause_at = Some(row);
        self.gate = Some(gate);
        self
    }

    /// Reports `total` up front so counting never walks the rows.
    pub(crate) fn estimated(mut self, total: u64) -> Self {
        self.estimate = Some(total);
        self
    }

    pub(crate) fn failing_at(mut self, row: usize) -> Self {
        self.fail_at = Some(row);
        self
    }

    fn offset_of(&self, sheet: &str) -> usize {
        self.sheets
            .iter()
            .take_while(|candidate| candidate.name != sheet)
            .map(|candidate| candidate.rows.len())
            .sum()
    }
}

impl SheetSource for MemoryWorkbook {
    fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|sheet| sheet.name.clone()).collect()
    }

    fn estimate_rows(&mut self) -> Result<Option<u64>, IngestError> {
        Ok(self.estimate)
    }

    fn sheet_rows(&mut self, sheet: &str) -> Result<SheetRows<'_>, IngestError> {
        let offset = self.offset_of(sheet);
        let found = self
            .sheets
            .iter()
            .find(|candidate| candidate.name == sheet)
            .ok_or_else(|| IngestError::Workbook(format!("no sheet named {sheet}")))?;

        let fail_at = self.fail_at;
        let pause_at = self.pause_at;
        let gate = self.gate.clone();
        let rows = found.rows.iter().enumerate().map(move |(index, row)| {
            let global = offset + index;
            if pause_at == Some(global) {
                if let Some(gate) = &gate {
                    gate.block();
                }
            }
            if fail_at == Some(global) {
                return Err(IngestError::Workbook(format!("unreadable row {global}")));
            }
            Ok(row.clone())
        });

        Ok(SheetRows {
            column_count: found.column_count,
            rows: Box::new(rows),
        })
    }
}

pub(crate) struct MemoryOpener {
    pub(crate) workbook: MemoryWorkbook,
}

impl SourceOpener for MemoryOpener {
    fn open(&self, _path: &Path) -> Result<Box<dyn SheetSource>, IngestError> {
        Ok(Box::new(self.workbook.clone()))
    }
}

use crate::traits::{SheetRows, SheetSource, SourceOpener};
use crate::{IngestError, RawRow, STORED_COLUMNS};
use calamine::{
    open_workbook, open_workbook_auto, DataType, Dimensions, ExcelDateTime, Reader, Sheets, Xlsx,
};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// (row, column, text) of one non-empty cell.
type PositionedCell = (u32, u32, Option<String>);

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Opens workbooks from disk with calamine.
#[derive(Debug, Default, Clone, Copy)]
pub struct WorkbookOpener;

impl SourceOpener for WorkbookOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn SheetSource>, IngestError> {
        Ok(Box::new(Workbook::open(path)?))
    }
}

/// OOXML workbooks are streamed cell by cell; legacy `.xls` and `.ods`
/// files have no streaming reader and are read one sheet at a time.
pub enum Workbook {
    Streaming(Xlsx<BufReader<File>>),
    Buffered(Sheets<BufReader<File>>),
}

impl Workbook {
    pub fn open(path: &Path) -> Result<Self, IngestError> {
        let streamable = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("xlsx") || ext.eq_ignore_ascii_case("xlsm"));

        if streamable {
            Ok(Self::Streaming(open_workbook::<Xlsx<_>, _>(path)?))
        } else {
            Ok(Self::Buffered(open_workbook_auto(path)?))
        }
    }
}

impl SheetSource for Workbook {
    fn sheet_names(&self) -> Vec<String> {
        match self {
            Self::Streaming(workbook) => workbook.sheet_names(),
            Self::Buffered(workbook) => workbook.sheet_names(),
        }
    }

    fn estimate_rows(&mut self) -> Result<Option<u64>, IngestError> {
        let names = self.sheet_names();
        let mut total = 0u64;

        match self {
            Self::Streaming(workbook) => {
                for name in &names {
                    let dimensions = workbook.worksheet_cells_reader(name)?.dimensions();
                    let Some((last_row, _)) = recorded_end(dimensions) else {
                        return Ok(None);
                    };
                    total += u64::from(last_row) + 1;
                }
            }
            Self::Buffered(workbook) => {
                for name in &names {
                    let range = workbook.worksheet_range(name)?;
                    total += range.end().map_or(0, |(row, _)| u64::from(row) + 1);
                }
            }
        }

        Ok(Some(total))
    }

    fn sheet_rows(&mut self, sheet: &str) -> Result<SheetRows<'_>, IngestError> {
        match self {
            Self::Streaming(workbook) => {
                let recorded = recorded_end(workbook.worksheet_cells_reader(sheet)?.dimensions());
                let column_count = match recorded {
                    Some((_, last_column)) => last_column as usize + 1,
                    None => populated_width(workbook, sheet)?,
                };

                let mut cells = workbook.worksheet_cells_reader(sheet)?;
                let pull = move || -> Result<Option<PositionedCell>, IngestError> {
                    Ok(cells.next_cell()?.map(|cell| {
                        let (row, column) = cell.get_position();
                        (row, column, cell_text(cell.get_value()))
                    }))
                };

                Ok(SheetRows {
                    column_count,
                    rows: Box::new(RowAssembler::new(pull, column_count)),
                })
            }
            Self::Buffered(workbook) => {
                let range = workbook.worksheet_range(sheet)?;
                let Some((last_row, last_column)) = range.end() else {
                    return Ok(SheetRows {
                        column_count: 0,
                        rows: Box::new(std::iter::empty()),
                    });
                };
                let column_count = last_column as usize + 1;
                let width = column_count.min(STORED_COLUMNS);

                let rows = (0..=last_row).map(move |row| {
                    let cells = (0..width)
                        .map(|column| {
                            range.get_value((row, column as u32)).and_then(cell_text)
                        })
                        .collect::<RawRow>();
                    Ok(cells)
                });

                Ok(SheetRows {
                    column_count,
                    rows: Box::new(rows),
                })
            }
        }
    }
}

// Sheets without a `<dimension>` element report A1:A1.
fn recorded_end(dimensions: Dimensions) -> Option<(u32, u32)> {
    (dimensions.end != (0, 0)).then_some(dimensions.end)
}

/// Width up to the rightmost non-empty cell, found by reading the sheet once.
fn populated_width(workbook: &mut Xlsx<BufReader<File>>, sheet: &str) -> Result<usize, IngestError> {
    let mut cells = workbook.worksheet_cells_reader(sheet)?;
    let mut width = 0;
    while let Some(cell) = cells.next_cell()? {
        if cell_text(cell.get_value()).is_some() {
            width = width.max(cell.get_position().1 as usize + 1);
        }
    }
    Ok(width)
}

fn cell_text<T: DataType>(value: &T) -> Option<String> {
    if value.is_empty() {
        return None;
    }

    let text = value
        .as_string()
        .or_else(|| value.get_bool().map(|flag| flag.to_string().to_uppercase()))
        .or_else(|| value.get_datetime().and_then(datetime_text))
        .or_else(|| value.get_datetime_iso().map(str::to_string))
        .or_else(|| value.get_duration_iso().map(str::to_string))?;

    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

fn datetime_text(value: ExcelDateTime) -> Option<String> {
    if value.is_duration() {
        let seconds = value.as_duration()?.num_seconds();
        return Some(format!(
            "{:02}:{:02}:{:02}",
            seconds / 3600,
            seconds % 3600 / 60,
            seconds % 60
        ));
    }
    value
        .as_datetime()
        .map(|moment| moment.format(DATETIME_FORMAT).to_string())
}

/// Groups a row-ordered cell stream into positional rows.
///
/// Rows without any cell between two populated rows are yielded as empty
/// rows so that a row's position in the sequence equals its sheet index.
struct RowAssembler<F> {
    pull: F,
    width: usize,
    next_row: u32,
    pending: Option<PositionedCell>,
    exhausted: bool,
}

impl<F> RowAssembler<F>
where
    F: FnMut() -> Result<Option<PositionedCell>, IngestError>,
{
    fn new(pull: F, column_count: usize) -> Self {
        Self {
            pull,
            width: column_count.min(STORED_COLUMNS),
            next_row: 0,
            pending: None,
            exhausted: false,
        }
    }

    fn advance(&mut self) -> Result<(), IngestError> {
        if self.exhausted {
            self.pending = None;
            return Ok(());
        }
        match (self.pull)() {
            Ok(next) => {
                self.exhausted = next.is_none();
                self.pending = next;
                Ok(())
            }
            Err(error) => {
                self.exhausted = true;
                self.pending = None;
                Err(error)
            }
        }
    }
}

impl<F> Iterator for RowAssembler<F>
where
    F: FnMut() -> Result<Option<PositionedCell>, IngestError>,
{
    type Item = Result<RawRow, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pending.is_none() {
            if let Err(error) = self.advance() {
                return Some(Err(error));
            }
        }

        // Cells behind the cursor can only come from a malformed sheet.
        while matches!(&self.pending, Some((row, _, _)) if *row < self.next_row) {
            if let Err(error) = self.advance() {
                return Some(Err(error));
            }
        }

        let current = self.pending.as_ref()?.0;
        let mut cells = vec![None; self.width];
        if current > self.next_row {
            self.next_row += 1;
            return Some(Ok(cells));
        }

        while let Some((row, column, value)) = self.pending.take() {
            if row != current {
                self.pending = Some((row, column, value));
                break;
            }
            if let Some(slot) = cells.get_mut(column as usize) {
                *slot = value;
            }
            if let Err(error) = self.advance() {
                return Some(Err(error));
            }
        }

        self.next_row = current + 1;
        Some(Ok(cells))
    }
}

use crate::{IngestError, RawRow};
use std::path::Path;

pub type RowIter<'a> = Box<dyn Iterator<Item = Result<RawRow, IngestError>> + 'a>;

/// Lazy row sequence of one sheet.
pub struct SheetRows<'a> {
    /// Width of the sheet's used range, counted from column A.
    pub column_count: usize,
    pub rows: RowIter<'a>,
}

/// An opened spreadsheet.
///
/// `sheet_rows` may be called once per sheet and restarts from the first
/// row on every call; a sequence cannot be resumed after it is dropped.
pub trait SheetSource {
    fn sheet_names(&self) -> Vec<String>;

    /// Row count taken from workbook metadata, if the format records one.
    fn estimate_rows(&mut self) -> Result<Option<u64>, IngestError>;

    fn sheet_rows(&mut self, sheet: &str) -> Result<SheetRows<'_>, IngestError>;
}

pub trait SourceOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn SheetSource>, IngestError>;
}

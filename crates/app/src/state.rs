use std::path::{Path, PathBuf};
use std::sync::Arc;
use wordbook_core::IngestionService;

#[derive(Clone)]
pub struct AppState {
    pub service: IngestionService,
    pub text_dir: Arc<PathBuf>,
}

impl AppState {
    pub fn new(service: IngestionService, text_dir: PathBuf) -> Self {
        Self {
            service,
            text_dir: Arc::new(text_dir),
        }
    }
}

/// Text documents come from `text_dir` when it exists, otherwise from the
/// spreadsheet folder.
pub fn resolve_text_dir(text_dir: &Path, source_dir: &Path) -> PathBuf {
    if text_dir.is_dir() {
        text_dir.to_path_buf()
    } else {
        source_dir.to_path_buf()
    }
}

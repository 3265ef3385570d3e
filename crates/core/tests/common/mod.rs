use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use wordbook_core::{IngestionService, StatusReport};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Writes `parts` into an uncompressed zip archive, in order.
pub fn write_archive(path: &Path, parts: &[(&str, &str)]) -> Result<(), Box<dyn std::error::Error>> {
    let mut writer = ZipWriter::new(File::create(path)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    for (name, body) in parts {
        writer.start_file(*name, options)?;
        writer.write_all(body.as_bytes())?;
    }
    writer.finish()?;
    Ok(())
}

pub async fn wait_until_idle(service: &IngestionService) -> StatusReport {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    loop {
        let status = service.status();
        if !status.progress.running || tokio::time::Instant::now() >= deadline {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

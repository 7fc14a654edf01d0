use std::fs::File;
use std::io::Write;
use std::path::Path;

use csv::QuoteStyle;
use flate2::{write::GzEncoder, Compression};
use serde::Serialize;

use crate::pipeline::pipeline_error::PipelineError;

/// true when the named artifact already exists in the output directory,
/// letting a stage skip recomputation unless the caller asked to overwrite.
pub fn artifact_exists(directory: &Path, filename: &str) -> bool {
    directory.join(filename).exists()
}

/// builds a CSV writer for plain or gzipped output while respecting the
/// caller's overwrite preference. None when the artifact exists and
/// overwrite was not requested.
fn create_writer(
    directory: &Path,
    filename: &str,
    overwrite: bool,
) -> Result<Option<csv::Writer<Box<dyn Write>>>, PipelineError> {
    let filepath = directory.join(filename);
    if filepath.exists() && !overwrite {
        return Ok(None);
    }
    let file = File::create(filepath)?;
    let buffer: Box<dyn Write> = if filename.ends_with(".gz") {
        Box::new(GzEncoder::new(file, Compression::default()))
    } else {
        Box::new(file)
    };
    let writer = csv::WriterBuilder::new()
        .has_headers(true)
        .quote_style(QuoteStyle::Necessary)
        .from_writer(buffer);
    Ok(Some(writer))
}

/// serializes rows into `directory/filename`. returns false when the write
/// was skipped because the artifact already exists.
pub fn write_rows<T: Serialize>(
    directory: &Path,
    filename: &str,
    rows: &[T],
    overwrite: bool,
) -> Result<bool, PipelineError> {
    match create_writer(directory, filename, overwrite)? {
        None => {
            log::info!("output '{filename}' already exists, skipping write");
            Ok(false)
        }
        Some(mut writer) => {
            for row in rows {
                writer.serialize(row)?;
            }
            writer.flush()?;
            log::info!("wrote {} rows to '{filename}'", rows.len());
            Ok(true)
        }
    }
}

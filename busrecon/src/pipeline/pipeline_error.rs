#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("Failed to parse GTFS archive: {0}")]
    GtfsReadError(#[from] gtfs_structures::Error),
    #[error("CSV read/write failure: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO failure: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Input table '{0}' is empty after filtering")]
    EmptyTableError(String),
    #[error("Malformed input data: {0}")]
    MalformedDataError(String),
    #[error("{0}")]
    OtherError(String),
}

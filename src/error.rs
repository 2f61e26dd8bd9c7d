use thiserror::Error;

/// Validation failures raised by the report itself. Store and I/O failures
/// travel as `anyhow::Error` untouched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReportError {
    #[error("table defines {columns} columns but {headers} headers")]
    HeaderMismatch { columns: usize, headers: usize },

    #[error("invalid sort key `{0}`")]
    InvalidSortKey(String),

    #[error("page size must be greater than zero")]
    ZeroPageSize,

    #[error("table `{0}` is not downloadable")]
    NotDownloadable(String),

    #[error("invalid date format `{0}`")]
    InvalidDateFormat(String),

    #[error("UTC offset of {0} minutes is out of range")]
    InvalidUtcOffset(i32),

    #[error("unknown group mode {0}")]
    InvalidGroupMode(i16),

    #[error("unknown name format `{0}`")]
    InvalidNameFormat(String),
}

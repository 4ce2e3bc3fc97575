use std::io;
use std::time::Duration;

use thiserror::Error;

/// The result type of the ingestion core.
pub type Result<T, E = IngestError> = std::result::Result<T, E>;

/// Failure that aborts an ingestion run.
///
/// Neither kind is retried. Chunks committed before the failure stay in the
/// destination table.
#[derive(Debug, Error)]
pub enum IngestError {
    /// A row could not be parsed under the declared or locked schema.
    #[error("data format error: {message}")]
    DataFormat { line: Option<u64>, message: String },

    /// The destination could not be reached or rejected a write.
    #[error("connectivity error: {0}")]
    Connectivity(#[from] sqlx::Error),
}

impl IngestError {
    pub fn data_format(message: impl Into<String>) -> Self {
        IngestError::DataFormat {
            line: None,
            message: message.into(),
        }
    }

    pub fn data_format_at(line: u64, message: impl AsRef<str>) -> Self {
        IngestError::DataFormat {
            line: Some(line),
            message: format!("line {}: {}", line, message.as_ref()),
        }
    }

    /// A statement that did not finish within `after`
    pub fn write_timeout(table: &str, after: Duration) -> Self {
        IngestError::Connectivity(sqlx::Error::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            format!(
                "write to table '{}' timed out after {} seconds",
                table,
                after.as_secs()
            ),
        )))
    }

    pub fn is_data_format(&self) -> bool {
        matches!(self, IngestError::DataFormat { .. })
    }

    pub fn is_connectivity(&self) -> bool {
        matches!(self, IngestError::Connectivity(_))
    }

    /// Source line the error refers to, when known
    pub fn line(&self) -> Option<u64> {
        match self {
            IngestError::DataFormat { line, .. } => *line,
            IngestError::Connectivity(_) => None,
        }
    }
}

impl From<csv::Error> for IngestError {
    fn from(err: csv::Error) -> Self {
        match err.position().map(|p| p.line()) {
            Some(line) => IngestError::data_format_at(line, err.to_string()),
            None => IngestError::data_format(err.to_string()),
        }
    }
}

impl From<bb8::RunError<sqlx::Error>> for IngestError {
    fn from(err: bb8::RunError<sqlx::Error>) -> Self {
        match err {
            bb8::RunError::User(e) => IngestError::Connectivity(e),
            bb8::RunError::TimedOut => IngestError::Connectivity(sqlx::Error::PoolTimedOut),
        }
    }
}

//! Error taxonomy for the ingestion pipeline

use thiserror::Error;

/// Errors surfaced by the pipeline to the caller of an `add_*` operation.
///
/// The pipeline never retries a collaborator call; every failure is
/// reported upward exactly once.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// An average was requested from a statistic holding no samples
    #[error("cannot average zero samples")]
    DivisionByZero,

    /// The scoring collaborator failed, timed out or returned garbage
    #[error("inference failed: {0}")]
    InferenceFailure(String),

    /// A storage collaborator failed or timed out
    #[error("persistence failed: {0}")]
    PersistenceFailure(String),

    /// Resampling input was empty or malformed
    #[error("resampling failed: {0}")]
    ResamplingFailure(String),

    /// The normalization table could not be loaded or applied
    #[error("normalization failed: {0}")]
    Normalization(String),

    /// Raw-data archival failed
    #[error("archive failed: {0}")]
    Archive(#[from] std::io::Error),
}

impl MonitorError {
    /// Short label used for metrics and health reporting
    pub fn kind(&self) -> &'static str {
        match self {
            MonitorError::DivisionByZero => "division_by_zero",
            MonitorError::InferenceFailure(_) => "inference",
            MonitorError::PersistenceFailure(_) => "persistence",
            MonitorError::ResamplingFailure(_) => "resampling",
            MonitorError::Normalization(_) => "normalization",
            MonitorError::Archive(_) => "archive",
        }
    }
}

impl From<csv::Error> for MonitorError {
    fn from(err: csv::Error) -> Self {
        MonitorError::Archive(err.into())
    }
}

impl From<rusqlite::Error> for MonitorError {
    fn from(e: rusqlite::Error) -> Self {
        MonitorError::PersistenceFailure(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            MonitorError::DivisionByZero.to_string(),
            "cannot average zero samples"
        );
        assert_eq!(
            MonitorError::InferenceFailure("timeout".into()).to_string(),
            "inference failed: timeout"
        );
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(MonitorError::DivisionByZero.kind(), "division_by_zero");
        assert_eq!(
            MonitorError::PersistenceFailure("locked".into()).kind(),
            "persistence"
        );
    }

    #[test]
    fn test_sqlite_error_maps_to_persistence() {
        let err: MonitorError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, MonitorError::PersistenceFailure(_)));
    }
}

use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced by the mining library.
///
/// Only `Validation` ends a run early. Collaborator and persistence failures
/// are absorbed at their call sites and logged.
#[derive(Debug, Error)]
pub enum MinerError {
    #[error("invalid parameters: {0}")]
    Validation(String),

    #[error("{context}: {message}")]
    Collaborator { context: String, message: String },

    #[error("HTTP {status} from {url}")]
    Http { url: String, status: u16 },

    #[error("failed to persist {path:?}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("spreadsheet error: {0}")]
    Spreadsheet(#[from] rust_xlsxwriter::XlsxError),

    #[error("scheduler error: {0}")]
    Scheduler(String),
}

impl MinerError {
    pub fn collaborator(context: impl Into<String>, message: impl ToString) -> Self {
        MinerError::Collaborator {
            context: context.into(),
            message: message.to_string(),
        }
    }

    pub fn persistence<E>(path: impl Into<PathBuf>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        MinerError::Persistence {
            path: path.into(),
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, MinerError>;

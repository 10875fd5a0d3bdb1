//! Error types for the recorder core.
//!
//! Only failures the caller has to act on are errors. Undecodable telemetry
//! and unreadable stores are handled inside the core and never surface here.

use std::path::PathBuf;

use thiserror::Error;

use crate::measurement::MeasurementRow;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid {field}: {reason}")]
    InvalidContext { field: &'static str, reason: String },

    #[error("a collection window is already armed")]
    WindowBusy,

    #[error("transport error on {endpoint}: {reason}")]
    Transport { endpoint: String, reason: String },

    #[error("store I/O on {}: {source}", path.display())]
    StoreIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store encoding failed: {0}")]
    StoreEncode(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("measurement row was not persisted after {attempts} attempt(s): {source}")]
    RowNotPersisted {
        row: Box<MeasurementRow>,
        attempts: u32,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidContext {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn store_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::StoreIo {
            path: path.into(),
            source,
        }
    }

    /// Whether the operator can simply move on to the next cycle.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::InvalidContext { .. } | Self::WindowBusy)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

//! Error types for odr-bridge

use std::path::PathBuf;

use thiserror::Error;

use crate::units::UnitRole;

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Boxed error raised by user model code.
pub type DynError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("error opening {role} file {}: {source}", .path.display())]
    OpenUnit {
        role: UnitRole,
        path: PathBuf,
        #[source]
        source: LibraryError,
    },

    #[error("dimension `{name}` = {value} does not fit the solver's integer type")]
    DimensionOutOfRange { name: &'static str, value: usize },

    #[error("a solve is already running on this thread; nested solves are not supported")]
    Reentrant,

    #[error("model callback failed: {0}")]
    Callback(#[source] ModelError),

    #[error(transparent)]
    Library(#[from] LibraryError),
}

/// Failure raised from inside a user callback.
///
/// `Stop` is the deliberate early-termination signal: it is translated into
/// the solver's own stop flag and never reaches the caller as an error.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("stop requested by model: {0}")]
    Stop(String),

    #[error("`{output}` returned {got} values, expected {expected}")]
    OutputLength {
        output: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("solver requested `{0}` but no such callback was supplied")]
    MissingCallback(&'static str),

    #[error("model callback panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Failed(DynError),
}

impl ModelError {
    /// Deliberate stop with a reason shown in the log.
    pub fn stop(reason: impl Into<String>) -> Self {
        ModelError::Stop(reason.into())
    }

    /// Wrap an arbitrary error raised by model code.
    pub fn failed(err: impl Into<DynError>) -> Self {
        ModelError::Failed(err.into())
    }

    /// Whether the solver should be told to stop rather than abort.
    pub fn is_stop(&self) -> bool {
        matches!(self, ModelError::Stop(_))
    }
}

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("ODRPACK library not found (tried: {})", .tried.join(", "))]
    NotFound { tried: Vec<String> },

    #[error("failed to load {}: {message}", .path.display())]
    LoadFailed { path: PathBuf, message: String },

    #[error("symbol `{symbol}` not found in {}", .path.display())]
    SymbolNotFound { path: PathBuf, symbol: String },

    #[error("path {} cannot be passed to the solver", .0.display())]
    InvalidPath(PathBuf),

    #[error("open_file failed with status {0}")]
    OpenFile(i32),

    #[error("close_file on unit {unit} failed with status {status}")]
    CloseFile { unit: i32, status: i32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_a_deliberate_stop_is_a_stop() {
        assert!(ModelError::stop("converged early").is_stop());
        assert!(!ModelError::failed("bad input").is_stop());
        assert!(!ModelError::MissingCallback("jacobian_wrt_params").is_stop());
        assert!(!ModelError::Panicked("boom".into()).is_stop());
    }

    #[test]
    fn stop_reason_is_shown() {
        assert_eq!(
            ModelError::stop("converged early").to_string(),
            "stop requested by model: converged early"
        );
    }
}

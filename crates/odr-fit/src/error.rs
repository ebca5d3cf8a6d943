//! Error types for odr-fit

use odr_bridge::{BridgeError, ModelError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FitError>;

#[derive(Error, Debug)]
pub enum FitError {
    #[error("invalid shape for `{name}`: {reason}")]
    InvalidShape { name: &'static str, reason: String },

    #[error("inconsistent arguments for `job` and `{0}`")]
    InconsistentJob(&'static str),

    #[error("`{name}` bound {bound} at index {index} does not strictly bracket beta0 = {beta0}")]
    InvalidBounds {
        name: &'static str,
        index: usize,
        bound: f64,
        beta0: f64,
    },

    #[error("work array `{name}` has length {got}, expected {expected}")]
    WorkspaceLength {
        name: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("workspace field `{0}` lies outside the work array")]
    LayoutOutOfBounds(&'static str),

    #[error("model probe failed: {0}")]
    Model(#[from] ModelError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl FitError {
    pub(crate) fn shape(name: &'static str, reason: impl Into<String>) -> Self {
        FitError::InvalidShape {
            name,
            reason: reason.into(),
        }
    }
}

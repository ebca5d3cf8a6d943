//! Interpretation of the solver's `info` code.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Why the solver stopped, decoded from `info`.
///
/// Codes 1 to 4 are the normal outcomes. Anything from 5 up flags
/// questionable results or a fatal error; the report file has the details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    SumOfSquaresConvergence,
    ParameterConvergence,
    BothConvergence,
    IterationLimit,
    /// The model requested a stop (`istop != 0`).
    UserStop,
    Questionable(i32),
}

impl StopReason {
    pub fn from_info(info: i32) -> Self {
        match info {
            1 => StopReason::SumOfSquaresConvergence,
            2 => StopReason::ParameterConvergence,
            3 => StopReason::BothConvergence,
            4 => StopReason::IterationLimit,
            _ if info >= 50_000 && (info / 1000) % 10 == 1 => StopReason::UserStop,
            _ => StopReason::Questionable(info),
        }
    }

    /// Convergence of some kind; the iteration limit does not count.
    pub fn is_success(info: i32) -> bool {
        info < 4
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::SumOfSquaresConvergence => {
                write!(f, "Sum of squares convergence.")
            }
            StopReason::ParameterConvergence => write!(f, "Parameter convergence."),
            StopReason::BothConvergence => {
                write!(f, "Sum of squares and parameter convergence.")
            }
            StopReason::IterationLimit => write!(f, "Iteration limit reached."),
            StopReason::UserStop => write!(f, "Stopped at the model's request."),
            StopReason::Questionable(info) => write!(
                f,
                "Questionable results or fatal errors detected (info = {info}). \
                 See report and error message."
            ),
        }
    }
}

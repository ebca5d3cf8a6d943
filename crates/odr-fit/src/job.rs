//! The five-digit ODRPACK `job` control code.
//!
//! Digits, from the right: fit method, derivative method, covariance,
//! initial `delta`, restart.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitMethod {
    #[default]
    ExplicitOdr,
    ImplicitOdr,
    Ols,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Derivatives {
    #[default]
    ForwardDifference,
    CentralDifference,
    /// User Jacobians, checked by the solver against finite differences.
    UserChecked,
    User,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Covariance {
    /// Jacobians recomputed at the solution.
    #[default]
    Recomputed,
    /// Jacobians from the last iteration.
    LastIteration,
    None,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Job {
    pub method: FitMethod,
    pub derivatives: Derivatives,
    pub covariance: Covariance,
    /// Start from the caller's `delta0` instead of zero.
    pub initial_delta: bool,
    /// Continue a previous run from its `work`/`iwork`.
    pub restart: bool,
}

fn digit(code: i32, position: u32) -> i32 {
    (code / 10_i32.pow(position - 1)) % 10
}

impl Job {
    /// Decode a job code. Negative codes select all defaults, as in the solver.
    pub fn decode(code: i32) -> Self {
        if code < 0 {
            return Self::default();
        }
        Self {
            method: match digit(code, 1) {
                0 => FitMethod::ExplicitOdr,
                1 => FitMethod::ImplicitOdr,
                _ => FitMethod::Ols,
            },
            derivatives: match digit(code, 2) {
                0 => Derivatives::ForwardDifference,
                1 => Derivatives::CentralDifference,
                2 => Derivatives::UserChecked,
                _ => Derivatives::User,
            },
            covariance: match digit(code, 3) {
                0 => Covariance::Recomputed,
                1 => Covariance::LastIteration,
                _ => Covariance::None,
            },
            initial_delta: digit(code, 4) > 0,
            restart: digit(code, 5) > 0,
        }
    }

    pub fn code(&self) -> i32 {
        let method = match self.method {
            FitMethod::ExplicitOdr => 0,
            FitMethod::ImplicitOdr => 1,
            FitMethod::Ols => 2,
        };
        let derivatives = match self.derivatives {
            Derivatives::ForwardDifference => 0,
            Derivatives::CentralDifference => 1,
            Derivatives::UserChecked => 2,
            Derivatives::User => 3,
        };
        let covariance = match self.covariance {
            Covariance::Recomputed => 0,
            Covariance::LastIteration => 1,
            Covariance::None => 2,
        };
        method
            + 10 * derivatives
            + 100 * covariance
            + 1000 * i32::from(self.initial_delta)
            + 10_000 * i32::from(self.restart)
    }

    pub fn is_odr(&self) -> bool {
        self.method != FitMethod::Ols
    }

    pub fn has_jacobians(&self) -> bool {
        matches!(self.derivatives, Derivatives::UserChecked | Derivatives::User)
    }

    pub fn ols() -> Self {
        Self {
            method: FitMethod::Ols,
            ..Self::default()
        }
    }

    pub fn with_jacobians(mut self) -> Self {
        self.derivatives = Derivatives::UserChecked;
        self
    }

    pub fn with_initial_delta(mut self) -> Self {
        self.initial_delta = true;
        self
    }

    pub fn restarting(mut self) -> Self {
        self.restart = true;
        self
    }
}

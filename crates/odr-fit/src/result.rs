use nalgebra::{DMatrix, DVector};
use odr_bridge::StopReason;
use serde::Serialize;

use crate::options::FitOptions;

/// Outcome of a fit, read back from the solver's work arrays.
#[derive(Debug, Clone, Serialize)]
pub struct OdrResult {
    /// Estimated parameters.
    pub beta: DVector<f64>,
    /// Estimated errors in `x`, shape `(m, n)`.
    pub delta: DMatrix<f64>,
    /// Estimated errors in `y`, shape `(nq, n)`.
    pub eps: DMatrix<f64>,
    /// `x + delta`.
    pub xplus: DMatrix<f64>,
    /// `y + eps`.
    pub yest: DMatrix<f64>,
    /// Standard deviations of `beta`.
    pub sd_beta: DVector<f64>,
    /// Covariance of `beta`, not scaled by `res_var`.
    pub cov_beta: DMatrix<f64>,
    /// Residual variance.
    pub res_var: f64,
    pub info: i32,
    pub stop_reason: StopReason,
    pub success: bool,
    pub nfev: i32,
    pub njev: i32,
    pub niter: i32,
    /// Rank deficiency of the Jacobian at the solution.
    pub irank: i32,
    /// Inverse condition number of the Jacobian.
    pub inv_condnum: f64,
    /// Weighted sum of squares, `sum_square_delta + sum_square_eps`.
    pub sum_square: f64,
    pub sum_square_delta: f64,
    pub sum_square_eps: f64,
    #[serde(skip)]
    pub work: Vec<f64>,
    #[serde(skip)]
    pub iwork: Vec<i32>,
}

impl OdrResult {
    /// Options that continue this fit where it stopped.
    ///
    /// Sets the restart flag and hands over the work arrays. `maxit` then
    /// counts additional iterations.
    pub fn restart_options(&self, base: &FitOptions) -> FitOptions {
        let mut options = base.clone();
        options.job.restart = true;
        options.work = Some(self.work.clone());
        options.iwork = Some(self.iwork.clone());
        options
    }
}

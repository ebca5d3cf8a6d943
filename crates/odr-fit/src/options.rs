//! Optional inputs of a fit and their shape rules.

use std::path::PathBuf;

use nalgebra::{DMatrix, DVector, Scalar};
use serde::{Deserialize, Serialize};

use crate::error::{FitError, Result};
use crate::job::Job;

/// Row-major (C order) copy of a matrix, which is the solver's Fortran
/// layout of its transpose.
pub(crate) fn row_major<T: Scalar + Copy>(mat: &DMatrix<T>) -> Vec<T> {
    mat.transpose().as_slice().to_vec()
}

/// Weights for the errors of `y` (`k = nq`) or of `x` (`k = m`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weight {
    /// Same weight for every component and observation.
    Scalar(f64),
    /// Shape `(k,)`: diagonal weighting matrix shared by all observations.
    Diagonal(Vec<f64>),
    /// Shape `(k, k)`: full weighting matrix shared by all observations.
    Full(DMatrix<f64>),
    /// Shape `(k, n)`: one diagonal per observation.
    PerObservation(DMatrix<f64>),
    /// Shape `(k, 1|k, 1|n)`, row-major.
    Blocks { shape: [usize; 3], data: Vec<f64> },
}

/// A weight flattened for the solver.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PreparedWeight {
    pub data: Vec<f64>,
    pub ld: usize,
    pub ld2: usize,
}

impl Weight {
    pub(crate) fn prepare(&self, name: &'static str, k: usize, n: usize) -> Result<PreparedWeight> {
        let prepared = |data: Vec<f64>, ld, ld2| PreparedWeight { data, ld, ld2 };
        match self {
            Weight::Scalar(w) => Ok(prepared(vec![*w; k], 1, 1)),
            Weight::Diagonal(diag) if diag.len() == k => Ok(prepared(diag.clone(), 1, 1)),
            Weight::Full(mat) if mat.shape() == (k, k) => Ok(prepared(row_major(mat), 1, k)),
            Weight::PerObservation(mat) if mat.shape() == (k, n) => {
                Ok(prepared(row_major(mat), n, 1))
            }
            Weight::Blocks { shape, data }
                if shape[0] == k
                    && (shape[1] == 1 || shape[1] == k)
                    && (shape[2] == 1 || shape[2] == n)
                    && data.len() == shape.iter().product::<usize>() =>
            {
                Ok(prepared(data.clone(), shape[2], shape[1]))
            }
            _ => Err(FitError::shape(
                name,
                format!(
                    "expected a scalar or shape ({k},), ({k}, {k}), ({k}, {n}), \
                     ({k}, 1, 1), ({k}, 1, {n}), ({k}, {k}, 1) or ({k}, {k}, {n})"
                ),
            )),
        }
    }
}

/// Per-element values shaped like `x`: `ifixx`, `stpd`, `scld`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum XValues<T: Scalar> {
    /// Shape `(m, n)`, one value per element of `x`.
    Full(DMatrix<T>),
    /// Shape `(m,)`, one value per explanatory variable.
    PerVariable(Vec<T>),
    /// Shape `(n,)`, one value per observation, repeated for every variable.
    PerObservation(Vec<T>),
}

impl<T: Scalar + Copy> XValues<T> {
    /// Flatten for the solver, returning the data and its leading dimension.
    pub(crate) fn prepare(&self, name: &'static str, m: usize, n: usize) -> Result<(Vec<T>, usize)> {
        // A single explanatory variable has the shape of one observation row.
        let rank1_allowed = m > 1 && n != m;
        match self {
            XValues::Full(mat) if mat.shape() == (m, n) => Ok((row_major(mat), n)),
            XValues::PerObservation(v) if m == 1 && v.len() == n => Ok((v.clone(), n)),
            XValues::PerVariable(v) if rank1_allowed && v.len() == m => Ok((v.clone(), 1)),
            XValues::PerObservation(v) if rank1_allowed && v.len() == n => {
                let tiled = (0..m).flat_map(|_| v.iter().copied()).collect();
                Ok((tiled, n))
            }
            _ => Err(FitError::shape(
                name,
                format!(
                    "expected shape ({m}, {n}), or ({m},) or ({n},) when m > 1 and n != m"
                ),
            )),
        }
    }
}

/// Everything about a fit besides the model, `beta0`, `y` and `x`.
///
/// The defaults reproduce an explicit ODR with finite-difference
/// Jacobians, no bounds, unit weights and no report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitOptions {
    pub we: Option<Weight>,
    pub wd: Option<Weight>,
    /// 0 holds a parameter fixed, 1 lets it vary.
    pub ifixb: Option<Vec<i32>>,
    pub ifixx: Option<XValues<i32>>,
    /// Initial errors in `x`, shape `(m, n)`. Requires `job.initial_delta`.
    pub delta0: Option<DMatrix<f64>>,
    pub lower: Option<DVector<f64>>,
    pub upper: Option<DVector<f64>>,
    pub job: Job,
    pub iprint: Option<i32>,
    pub rptfile: Option<PathBuf>,
    pub errfile: Option<PathBuf>,
    pub ndigit: Option<i32>,
    pub taufac: Option<f64>,
    pub sstol: Option<f64>,
    pub partol: Option<f64>,
    pub maxit: Option<i32>,
    pub stpb: Option<DVector<f64>>,
    pub stpd: Option<XValues<f64>>,
    pub sclb: Option<DVector<f64>>,
    pub scld: Option<XValues<f64>>,
    /// Solver state from a previous run; only for a restart.
    pub work: Option<Vec<f64>>,
    pub iwork: Option<Vec<i32>>,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            we: None,
            wd: None,
            ifixb: None,
            ifixx: None,
            delta0: None,
            lower: None,
            upper: None,
            job: Job::default(),
            iprint: Some(0),
            rptfile: None,
            errfile: None,
            ndigit: None,
            taufac: None,
            sstol: None,
            partol: None,
            maxit: None,
            stpb: None,
            stpd: None,
            sclb: None,
            scld: None,
            work: None,
            iwork: None,
        }
    }
}

impl FitOptions {
    pub fn with_job(mut self, job: Job) -> Self {
        self.job = job;
        self
    }

    pub fn with_bounds(mut self, lower: DVector<f64>, upper: DVector<f64>) -> Self {
        self.lower = Some(lower);
        self.upper = Some(upper);
        self
    }

    pub fn with_report_files(mut self, rptfile: impl Into<PathBuf>, errfile: impl Into<PathBuf>) -> Self {
        self.rptfile = Some(rptfile.into());
        self.errfile = Some(errfile.into());
        self
    }
}

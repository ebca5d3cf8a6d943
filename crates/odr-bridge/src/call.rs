//! Inputs of one solver invocation.
//!
//! `OdrCall` borrows every buffer from the caller. Arrays must already be
//! contiguous and laid out the way the solver expects (Fortran column order,
//! observations fastest); the bridge neither copies nor validates them.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Problem dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    /// Number of observations.
    pub n: usize,
    /// Number of explanatory variables per observation.
    pub m: usize,
    /// Number of model parameters.
    pub npar: usize,
    /// Number of responses per observation.
    pub nq: usize,
}

impl Dimensions {
    pub fn new(n: usize, m: usize, npar: usize, nq: usize) -> Self {
        Self { n, m, npar, nq }
    }
}

/// Leading dimensions of the optional arrays. Each is either 1 (one value
/// shared by all observations) or `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadingDims {
    pub ldwe: usize,
    pub ld2we: usize,
    pub ldwd: usize,
    pub ld2wd: usize,
    pub ldifx: usize,
    pub ldstpd: usize,
    pub ldscld: usize,
}

impl Default for LeadingDims {
    fn default() -> Self {
        Self {
            ldwe: 1,
            ld2we: 1,
            ldwd: 1,
            ld2wd: 1,
            ldifx: 1,
            ldstpd: 1,
            ldscld: 1,
        }
    }
}

/// Validated arguments for a single call to the solver.
///
/// `beta`, `delta`, `work` and `iwork` are updated in place.
#[derive(Debug)]
pub struct OdrCall<'a> {
    pub dims: Dimensions,
    pub lead: LeadingDims,
    pub beta: &'a mut [f64],
    pub y: &'a [f64],
    pub x: &'a [f64],
    pub delta: &'a mut [f64],
    pub we: Option<&'a [f64]>,
    pub wd: Option<&'a [f64]>,
    pub ifixb: Option<&'a [i32]>,
    pub ifixx: Option<&'a [i32]>,
    pub stpb: Option<&'a [f64]>,
    pub stpd: Option<&'a [f64]>,
    pub sclb: Option<&'a [f64]>,
    pub scld: Option<&'a [f64]>,
    pub lower: Option<&'a [f64]>,
    pub upper: Option<&'a [f64]>,
    pub work: Option<&'a mut [f64]>,
    pub iwork: Option<&'a mut [i32]>,
    pub job: Option<i32>,
    pub ndigit: Option<i32>,
    pub taufac: Option<f64>,
    pub sstol: Option<f64>,
    pub partol: Option<f64>,
    pub maxit: Option<i32>,
    pub iprint: Option<i32>,
    pub errfile: Option<PathBuf>,
    pub rptfile: Option<PathBuf>,
}

impl<'a> OdrCall<'a> {
    /// Call with only the required arrays; every optional argument is absent.
    pub fn new(
        dims: Dimensions,
        beta: &'a mut [f64],
        y: &'a [f64],
        x: &'a [f64],
        delta: &'a mut [f64],
    ) -> Self {
        Self {
            dims,
            lead: LeadingDims::default(),
            beta,
            y,
            x,
            delta,
            we: None,
            wd: None,
            ifixb: None,
            ifixx: None,
            stpb: None,
            stpd: None,
            sclb: None,
            scld: None,
            lower: None,
            upper: None,
            work: None,
            iwork: None,
            job: None,
            ndigit: None,
            taufac: None,
            sstol: None,
            partol: None,
            maxit: None,
            iprint: None,
            errfile: None,
            rptfile: None,
        }
    }

    pub fn with_lead(mut self, lead: LeadingDims) -> Self {
        self.lead = lead;
        self
    }

    pub fn with_workspace(mut self, work: &'a mut [f64], iwork: &'a mut [i32]) -> Self {
        self.work = Some(work);
        self.iwork = Some(iwork);
        self
    }

    pub fn with_job(mut self, job: i32) -> Self {
        self.job = Some(job);
        self
    }

    pub fn with_maxit(mut self, maxit: i32) -> Self {
        self.maxit = Some(maxit);
        self
    }

    pub fn with_report_files(
        mut self,
        rptfile: Option<impl Into<PathBuf>>,
        errfile: Option<impl Into<PathBuf>>,
    ) -> Self {
        self.rptfile = rptfile.map(Into::into);
        self.errfile = errfile.map(Into::into);
        self
    }
}

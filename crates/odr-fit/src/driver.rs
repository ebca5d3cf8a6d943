//! Validating front end to `odr_bridge::odr`.
//!
//! Checks every shape and option against the problem dimensions, works out
//! the leading dimensions the solver needs, allocates (or checks) the work
//! arrays, runs the solve and reads the statistics back out of the work
//! arrays.

use nalgebra::{DMatrix, DVector};
use odr_bridge::layout::segment;
use odr_bridge::{
    CallbackSet, Dimensions, LeadingDims, OdrCall, OdrLibrary, StopReason, WorkspaceLayout,
    XPlusD,
};

use crate::error::{FitError, Result};
use crate::options::{FitOptions, PreparedWeight, row_major};
use crate::result::OdrResult;

fn check_len(name: &'static str, len: usize, npar: usize) -> Result<()> {
    if len == npar {
        Ok(())
    } else {
        Err(FitError::shape(
            name,
            format!("expected length {npar} (same as `beta0`), got {len}"),
        ))
    }
}

fn check_bounds(
    name: &'static str,
    bound: Option<&DVector<f64>>,
    beta0: &DVector<f64>,
    inside: impl Fn(f64, f64) -> bool,
) -> Result<()> {
    let Some(bound) = bound else {
        return Ok(());
    };
    check_len(name, bound.len(), beta0.len())?;
    match bound
        .iter()
        .zip(beta0.iter())
        .position(|(&b, &b0)| !inside(b, b0))
    {
        None => Ok(()),
        Some(index) => Err(FitError::InvalidBounds {
            name,
            index,
            bound: bound[index],
            beta0: beta0[index],
        }),
    }
}

/// Probe an optional Jacobian once at `beta0`. It must be supplied exactly
/// when the job asks for user derivatives.
fn probe_jacobian(
    name: &'static str,
    wanted: bool,
    supplied: bool,
    expected: usize,
    probe: impl FnOnce() -> std::result::Result<Vec<f64>, odr_bridge::ModelError>,
) -> Result<()> {
    match (wanted, supplied) {
        (true, true) => {
            let got = probe()?.len();
            if got != expected {
                return Err(FitError::shape(
                    name,
                    format!("expected {expected} values, got {got}"),
                ));
            }
            Ok(())
        }
        (false, false) => Ok(()),
        _ => Err(FitError::InconsistentJob(name)),
    }
}

fn leading<T>(prepared: &Option<(Vec<T>, usize)>) -> usize {
    prepared.as_ref().map_or(1, |(_, ld)| *ld)
}

/// Allocate a fresh workspace, or check the one handed over for a restart.
fn workspace(
    restart: bool,
    options: &FitOptions,
    lwork: usize,
    liwork: usize,
) -> Result<(Vec<f64>, Vec<i32>)> {
    match (restart, &options.work, &options.iwork) {
        (false, None, None) => Ok((vec![0.0; lwork], vec![0; liwork])),
        (true, Some(work), Some(iwork)) => {
            if work.len() != lwork {
                return Err(FitError::WorkspaceLength {
                    name: "work",
                    expected: lwork,
                    got: work.len(),
                });
            }
            if iwork.len() != liwork {
                return Err(FitError::WorkspaceLength {
                    name: "iwork",
                    expected: liwork,
                    got: iwork.len(),
                });
            }
            Ok((work.clone(), iwork.clone()))
        }
        _ => Err(FitError::InconsistentJob("work/iwork")),
    }
}

/// Fit `callbacks` to the data by orthogonal distance regression.
///
/// `y` has shape `(nq, n)` and `x` shape `(m, n)`: one column per
/// observation. Jacobian callbacks must be supplied exactly when
/// `options.job` asks for user derivatives.
///
/// The model is evaluated once at `beta0` before the solve to check its
/// output length; errors from that probe are returned as [`FitError::Model`].
pub fn odr(
    lib: &dyn OdrLibrary,
    callbacks: &mut CallbackSet<'_>,
    beta0: &DVector<f64>,
    y: &DMatrix<f64>,
    x: &DMatrix<f64>,
    options: &FitOptions,
) -> Result<OdrResult> {
    let (m, n) = x.shape();
    let nq = y.nrows();
    let npar = beta0.len();
    if y.ncols() != n {
        return Err(FitError::shape(
            "y",
            format!("expected {n} observations like `x`, got {}", y.ncols()),
        ));
    }
    if n == 0 || m == 0 || nq == 0 {
        return Err(FitError::shape("x", "`x` and `y` must not be empty"));
    }
    if npar == 0 {
        return Err(FitError::shape("beta0", "at least one parameter is required"));
    }
    let dims = Dimensions::new(n, m, npar, nq);
    let job = options.job;
    log::debug!("validating fit {dims:?} with job {}", job.code());

    check_bounds("lower", options.lower.as_ref(), beta0, |b, b0| b < b0)?;
    check_bounds("upper", options.upper.as_ref(), beta0, |b, b0| b > b0)?;
    if let Some(ifixb) = &options.ifixb {
        check_len("ifixb", ifixb.len(), npar)?;
    }
    if let Some(stpb) = &options.stpb {
        check_len("stpb", stpb.len(), npar)?;
    }
    if let Some(sclb) = &options.sclb {
        check_len("sclb", sclb.len(), npar)?;
    }

    let mut delta = match (job.initial_delta, &options.delta0) {
        (true, Some(delta0)) if delta0.shape() == (m, n) => row_major(delta0),
        (true, Some(delta0)) => {
            return Err(FitError::shape(
                "delta0",
                format!("expected shape ({m}, {n}) like `x`, got {:?}", delta0.shape()),
            ));
        }
        (false, None) => vec![0.0; m * n],
        _ => return Err(FitError::InconsistentJob("delta0")),
    };

    let ifixx = options
        .ifixx
        .as_ref()
        .map(|v| v.prepare("ifixx", m, n))
        .transpose()?;
    let stpd = options
        .stpd
        .as_ref()
        .map(|v| v.prepare("stpd", m, n))
        .transpose()?;
    let scld = options
        .scld
        .as_ref()
        .map(|v| v.prepare("scld", m, n))
        .transpose()?;
    let we = options
        .we
        .as_ref()
        .map(|w| w.prepare("we", nq, n))
        .transpose()?;
    let wd = options
        .wd
        .as_ref()
        .map(|w| w.prepare("wd", m, n))
        .transpose()?;

    let lead_of = |w: &Option<PreparedWeight>| w.as_ref().map_or((1, 1), |w| (w.ld, w.ld2));
    let (ldwe, ld2we) = lead_of(&we);
    let (ldwd, ld2wd) = lead_of(&wd);
    let lead = LeadingDims {
        ldwe,
        ld2we,
        ldwd,
        ld2wd,
        ldifx: leading(&ifixx),
        ldstpd: leading(&stpd),
        ldscld: leading(&scld),
    };

    let x_buf = row_major(x);
    let y_buf = row_major(y);
    {
        let xview = XPlusD::from_fortran(&x_buf, n, m, n);
        let beta = beta0.as_slice();
        let got = callbacks.evaluate_model(beta, &xview)?.len();
        if got != nq * n {
            return Err(FitError::shape(
                "f",
                format!("model must return {} values like `y`, got {got}", nq * n),
            ));
        }
        let wanted = job.has_jacobians();
        let supplied = callbacks.has_jacobian_beta();
        probe_jacobian("fjacb", wanted, supplied, nq * npar * n, || {
            callbacks.jacobian_wrt_params(beta, &xview)
        })?;
        let supplied = callbacks.has_jacobian_delta();
        probe_jacobian("fjacd", wanted, supplied, nq * m * n, || {
            callbacks.jacobian_wrt_errors(beta, &xview)
        })?;
    }

    let is_odr = job.is_odr();
    let (lwork, liwork) = lib.workspace_dimensions(dims, is_odr)?;
    let (mut work, mut iwork) = workspace(job.restart, options, lwork, liwork)?;

    let mut beta = beta0.as_slice().to_vec();
    let mut call = OdrCall::new(dims, &mut beta, &y_buf, &x_buf, &mut delta)
        .with_lead(lead)
        .with_workspace(&mut work, &mut iwork)
        .with_job(job.code());
    call.we = we.as_ref().map(|w| w.data.as_slice());
    call.wd = wd.as_ref().map(|w| w.data.as_slice());
    call.ifixb = options.ifixb.as_deref();
    call.ifixx = ifixx.as_ref().map(|(v, _)| v.as_slice());
    call.stpb = options.stpb.as_ref().map(|v| v.as_slice());
    call.stpd = stpd.as_ref().map(|(v, _)| v.as_slice());
    call.sclb = options.sclb.as_ref().map(|v| v.as_slice());
    call.scld = scld.as_ref().map(|(v, _)| v.as_slice());
    call.lower = options.lower.as_ref().map(|v| v.as_slice());
    call.upper = options.upper.as_ref().map(|v| v.as_slice());
    call.ndigit = options.ndigit;
    call.taufac = options.taufac;
    call.sstol = options.sstol;
    call.partol = options.partol;
    call.maxit = options.maxit;
    call.iprint = options.iprint;
    call.rptfile = options.rptfile.clone();
    call.errfile = options.errfile.clone();

    let info = odr_bridge::odr(lib, callbacks, &mut call)?;

    let layout = WorkspaceLayout::query(lib, dims, ldwe, ld2we, is_odr)?;
    let real = |name: &'static str, offset, len| {
        segment(&work, offset, len).ok_or(FitError::LayoutOutOfBounds(name))
    };
    let integer = |name: &'static str, offset| {
        segment(&iwork, offset, 1)
            .map(|v| v[0])
            .ok_or(FitError::LayoutOutOfBounds(name))
    };

    let eps = DMatrix::from_row_slice(nq, n, real("eps", layout.real.eps, nq * n)?);
    let sd_beta = DVector::from_column_slice(real("sd", layout.real.sd, npar)?);
    let cov_beta = DMatrix::from_row_slice(npar, npar, real("vcv", layout.real.vcv, npar * npar)?);
    let res_var = real("rvar", layout.real.rvar, 1)?[0];
    let inv_condnum = real("rcond", layout.real.rcond, 1)?[0];
    let sum_square = real("wss", layout.real.wss, 1)?[0];
    let sum_square_delta = real("wssde", layout.real.wssde, 1)?[0];
    let sum_square_eps = real("wssep", layout.real.wssep, 1)?[0];
    let nfev = integer("nfev", layout.integer.nfev)?;
    let njev = integer("njev", layout.integer.njev)?;
    let niter = integer("niter", layout.integer.niter)?;
    let irank = integer("irank", layout.integer.irank)?;

    let delta = DMatrix::from_row_slice(m, n, &delta);
    let stop_reason = StopReason::from_info(info);
    let success = StopReason::is_success(info);
    if success {
        log::debug!("fit finished after {niter} iterations: {stop_reason}");
    } else {
        log::warn!("fit finished with info = {info}: {stop_reason}");
    }

    Ok(OdrResult {
        beta: DVector::from_vec(beta),
        xplus: x + &delta,
        yest: y + &eps,
        delta,
        eps,
        sd_beta,
        cov_beta,
        res_var,
        info,
        stop_reason,
        success,
        nfev,
        njev,
        niter,
        irank,
        inv_condnum,
        sum_square,
        sum_square_delta,
        sum_square_eps,
        work,
        iwork,
    })
}

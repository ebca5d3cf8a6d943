//! Fits through the validation layer against the in-process solver.

use std::cell::Cell;

use approx::assert_abs_diff_eq;
use nalgebra::{DMatrix, DVector};
use odr_bridge::testing::{FakeOdrpack, INFO_USER_STOP};
use odr_bridge::{CallbackSet, ModelError, StopReason, XPlusD};
use odr_fit::{FitOptions, Job, Weight, odr};

const BETA_TRUE: [f64; 2] = [-0.4, 2.25];
const N: usize = 12;

fn data() -> (DMatrix<f64>, DMatrix<f64>) {
    let x = DMatrix::from_fn(1, N, |_, i| 0.25 * i as f64);
    let y = DMatrix::from_fn(1, N, |_, i| {
        BETA_TRUE[0] + BETA_TRUE[1] * 0.25 * i as f64 + 1e-5 * (0.9 * i as f64).cos()
    });
    (x, y)
}

fn line(beta: &[f64], x: &XPlusD<'_>) -> Result<Vec<f64>, ModelError> {
    Ok((0..x.n()).map(|i| beta[0] + beta[1] * x.value(0, i)).collect())
}

fn beta0() -> DVector<f64> {
    DVector::from_vec(vec![0.0, 1.0])
}

#[test]
fn straight_line_fit_reports_statistics() {
    let lib = FakeOdrpack::new();
    let (x, y) = data();
    let fit = odr(
        &lib,
        &mut CallbackSet::new(line),
        &beta0(),
        &y,
        &x,
        &FitOptions::default(),
    )
    .expect("fit");

    assert!(fit.success, "{}", fit.stop_reason);
    assert!((1..=3).contains(&fit.info));
    assert_abs_diff_eq!(fit.beta[0], BETA_TRUE[0], epsilon = 1e-3);
    assert_abs_diff_eq!(fit.beta[1], BETA_TRUE[1], epsilon = 1e-3);

    assert_eq!(fit.eps.shape(), (1, N));
    assert_eq!(fit.delta.shape(), (1, N));
    assert_eq!(fit.cov_beta.shape(), (2, 2));
    assert!(fit.sd_beta.iter().all(|s| s.is_finite()));
    assert!(fit.sum_square < 1e-8);
    assert!(fit.nfev > 0 && fit.niter > 0);
    assert_eq!(fit.irank, 0);
    assert_eq!(fit.xplus, x);

    let model = line(fit.beta.as_slice(), &XPlusD::from_fortran(x.as_slice(), N, 1, N))
        .expect("model");
    for (yest, f) in fit.yest.iter().zip(&model) {
        assert_abs_diff_eq!(*yest, *f, epsilon = 1e-6);
    }
}

#[test]
fn analytic_jacobians_are_accepted() {
    let lib = FakeOdrpack::new();
    let (x, y) = data();
    let mut callbacks = CallbackSet::new(line)
        .with_jacobian_beta(|_, x| {
            let n = x.n();
            Ok((0..2 * n)
                .map(|r| if r < n { 1.0 } else { x.value(0, r - n) })
                .collect())
        })
        .with_jacobian_delta(|beta, x| Ok(vec![beta[1]; x.n()]));
    let options = FitOptions::default().with_job(Job::default().with_jacobians());
    let fit = odr(&lib, &mut callbacks, &beta0(), &y, &x, &options).expect("fit");

    assert!(fit.success);
    assert!(fit.njev > 0);
    assert_abs_diff_eq!(fit.beta[1], BETA_TRUE[1], epsilon = 1e-3);
}

#[test]
fn fixed_parameters_keep_their_initial_value() {
    let lib = FakeOdrpack::new();
    let (x, y) = data();
    let options = FitOptions {
        ifixb: Some(vec![1, 0]),
        we: Some(Weight::Scalar(1.0)),
        ..FitOptions::default()
    };
    let start = DVector::from_vec(vec![0.0, BETA_TRUE[1]]);
    let fit = odr(&lib, &mut CallbackSet::new(line), &start, &y, &x, &options).expect("fit");

    assert_abs_diff_eq!(fit.beta[1], BETA_TRUE[1], epsilon = 1e-10);
    assert_abs_diff_eq!(fit.beta[0], BETA_TRUE[0], epsilon = 1e-3);
}

#[test]
fn model_stop_is_a_result_not_an_error() {
    let lib = FakeOdrpack::new();
    let (x, y) = data();
    let calls = Cell::new(0);
    let mut callbacks = CallbackSet::new(|beta, x| {
        calls.set(calls.get() + 1);
        // The first call is the validation probe.
        if calls.get() > 3 {
            return Err(ModelError::stop("enough"));
        }
        line(beta, x)
    });
    let fit = odr(&lib, &mut callbacks, &beta0(), &y, &x, &FitOptions::default())
        .expect("stop is not an error");

    assert_eq!(fit.info, INFO_USER_STOP);
    assert_eq!(fit.stop_reason, StopReason::UserStop);
    assert!(!fit.success);
}

#[test]
fn restart_continues_from_the_previous_workspace() {
    let lib = FakeOdrpack::new();
    let (x, y) = data();
    let options = FitOptions {
        maxit: Some(1),
        ..FitOptions::default()
    };
    let first = odr(&lib, &mut CallbackSet::new(line), &beta0(), &y, &x, &options).expect("first");
    assert_eq!(first.stop_reason, StopReason::IterationLimit);
    assert!(!first.success);

    let resumed = FitOptions {
        maxit: Some(50),
        ..first.restart_options(&options)
    };
    assert!(resumed.job.restart);
    let second = odr(
        &lib,
        &mut CallbackSet::new(line),
        &first.beta,
        &y,
        &x,
        &resumed,
    )
    .expect("restart");
    assert!(second.success, "{}", second.stop_reason);
    assert_abs_diff_eq!(second.beta[0], BETA_TRUE[0], epsilon = 1e-3);
}

#[test]
fn result_serializes_without_work_arrays() {
    let lib = FakeOdrpack::new();
    let (x, y) = data();
    let fit = odr(
        &lib,
        &mut CallbackSet::new(line),
        &beta0(),
        &y,
        &x,
        &FitOptions::default(),
    )
    .expect("fit");
    let json = serde_json::to_value(&fit).expect("serialize");
    assert!(json.get("beta").is_some());
    assert!(json.get("stop_reason").is_some());
    assert!(json.get("work").is_none());
    assert!(json.get("iwork").is_none());
}

#[test]
fn report_files_are_routed_through_the_bridge() {
    let dir = tempfile::tempdir().expect("tempdir");
    let lib = FakeOdrpack::new();
    let (x, y) = data();
    let options = FitOptions {
        iprint: Some(1001),
        ..FitOptions::default()
    }
    .with_report_files(dir.path().join("fit.rpt"), dir.path().join("fit.err"));
    odr(&lib, &mut CallbackSet::new(line), &beta0(), &y, &x, &options).expect("fit");

    let routing = lib.last_routing().expect("solver ran");
    assert_ne!(routing.lunrpt, routing.lunerr);
    assert!(!routing.placeholder_workspace);
    assert_eq!((lib.opens(), lib.closes()), (2, 2));
}

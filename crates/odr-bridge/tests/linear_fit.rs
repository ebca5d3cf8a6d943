//! End-to-end fit of a straight line.
//!
//! Runs against the in-process fake by default. The `#[ignore]`d variants
//! need the real shared library (`ODRPACK_LIBRARY=/path/to/libodrpack95.so`):
//!
//!     cargo test -p odr-bridge --test linear_fit -- --ignored

use approx::assert_abs_diff_eq;
use odr_bridge::layout::segment;
use proptest::prelude::*;
use odr_bridge::testing::FakeOdrpack;
use odr_bridge::{
    CallbackSet, Dimensions, LibraryConfig, ModelError, OdrCall, OdrLibrary, Odrpack,
    WorkspaceLayout, XPlusD, odr,
};

const BETA_TRUE: [f64; 2] = [1.5, -0.75];
const N: usize = 10;

fn line_data() -> (Vec<f64>, Vec<f64>) {
    let x: Vec<f64> = (0..N).map(|i| i as f64 * 0.5).collect();
    let y = x
        .iter()
        .enumerate()
        .map(|(i, xi)| BETA_TRUE[0] + BETA_TRUE[1] * xi + 1e-5 * (1.7 * i as f64).sin())
        .collect();
    (x, y)
}

fn line(beta: &[f64], x: &XPlusD<'_>) -> Result<Vec<f64>, ModelError> {
    Ok((0..x.n())
        .map(|i| beta[0] + beta[1] * x.value(0, i))
        .collect())
}

fn line_jacobian(_: &[f64], x: &XPlusD<'_>) -> Result<Vec<f64>, ModelError> {
    // fjacb[k*n + i] for nq = 1.
    let n = x.n();
    let mut jac = vec![1.0; 2 * n];
    for i in 0..n {
        jac[n + i] = x.value(0, i);
    }
    Ok(jac)
}

fn fit_line(lib: &dyn OdrLibrary, job: Option<i32>) -> (i32, Vec<f64>) {
    let (x, y) = line_data();
    let mut beta = vec![1.0, 0.0];
    let mut delta = vec![0.0; N];
    let mut call = OdrCall::new(Dimensions::new(N, 1, 2, 1), &mut beta, &y, &x, &mut delta);
    call.job = job;
    let mut callbacks = CallbackSet::new(line).with_jacobian_beta(line_jacobian);
    let info = odr(lib, &mut callbacks, &mut call).expect("solve");
    (info, beta)
}

#[test]
fn recovers_generating_parameters_with_finite_differences() {
    let lib = FakeOdrpack::new();
    let (info, beta) = fit_line(&lib, None);
    assert!((1..=3).contains(&info), "info = {info}");
    // Noise amplitude is 1e-5, so the estimate is well inside 1e-3.
    assert_abs_diff_eq!(beta[0], BETA_TRUE[0], epsilon = 1e-3);
    assert_abs_diff_eq!(beta[1], BETA_TRUE[1], epsilon = 1e-3);
}

#[test]
fn recovers_generating_parameters_with_analytic_jacobian() {
    let lib = FakeOdrpack::new();
    let (info, beta) = fit_line(&lib, Some(20));
    assert!((1..=3).contains(&info), "info = {info}");
    assert_abs_diff_eq!(beta[0], BETA_TRUE[0], epsilon = 1e-3);
    assert_abs_diff_eq!(beta[1], BETA_TRUE[1], epsilon = 1e-3);
}

#[test]
fn workspace_carries_the_fit_statistics() {
    let lib = FakeOdrpack::new();
    let dims = Dimensions::new(N, 1, 2, 1);
    let layout = WorkspaceLayout::query(&lib, dims, 1, 1, false).expect("layout");
    let mut work = vec![0.0; layout.lwork];
    let mut iwork = vec![0; layout.liwork];

    let (x, y) = line_data();
    let mut beta = vec![1.0, 0.0];
    let mut delta = vec![0.0; N];
    let mut call = OdrCall::new(dims, &mut beta, &y, &x, &mut delta)
        .with_workspace(&mut work, &mut iwork)
        .with_job(20);
    let mut callbacks = CallbackSet::new(line).with_jacobian_beta(line_jacobian);
    odr(&lib, &mut callbacks, &mut call).expect("solve");

    let wss = work[layout.real.wss as usize];
    assert!(wss < 1e-8, "wss = {wss}");
    let sd = segment(&work, layout.real.sd, 2).expect("sd segment");
    assert!(sd.iter().all(|s| s.is_finite() && *s >= 0.0));
    assert!(iwork[layout.integer.nfev as usize] > 0);
    assert!(iwork[layout.integer.njev as usize] > 0);
    assert!(iwork[layout.integer.niter as usize] > 0);
    assert_eq!(iwork[layout.integer.irank as usize], 0);
}

fn real_library() -> Odrpack {
    Odrpack::from_config(&LibraryConfig::from_env()).expect("set ODRPACK_LIBRARY")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    #[ignore = "requires the ODRPACK95 shared library"]
    fn real_layout_offsets_lie_within_the_work_arrays(
        n in 1usize..200,
        m in 1usize..6,
        npar in 1usize..8,
        nq in 1usize..4,
        isodr in any::<bool>(),
    ) {
        let lib = real_library();
        let dims = Dimensions::new(n, m, npar, nq);
        let layout = WorkspaceLayout::query(&lib, dims, 1, 1, isodr).expect("layout");
        prop_assert!(layout.lwork > 0 && layout.liwork > 0);
        prop_assert!(layout.out_of_bounds().is_empty(), "{:?}", layout.out_of_bounds());
        prop_assert!(layout.covers_minimum());
    }
}

#[test]
#[ignore = "requires the ODRPACK95 shared library"]
fn real_workspace_dimensions_match_known_values() {
    let lib = real_library();
    let dims = Dimensions::new(10, 3, 5, 2);
    assert_eq!(lib.workspace_dimensions(dims, true).expect("dims"), (770, 46));
}

#[test]
#[ignore = "requires the ODRPACK95 shared library"]
fn real_library_recovers_generating_parameters() {
    let lib = real_library();
    let (info, beta) = fit_line(&lib, None);
    assert!((1..=3).contains(&info), "info = {info}");
    assert_abs_diff_eq!(beta[0], BETA_TRUE[0], epsilon = 1e-3);
    assert_abs_diff_eq!(beta[1], BETA_TRUE[1], epsilon = 1e-3);
}

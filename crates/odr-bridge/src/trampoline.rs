//! Callback trampoline between the solver and Rust closures.
//!
//! The solver's callback signature has no user-data argument, so the active
//! `CallbackSet` is published in a thread-local slot for the duration of one
//! solve. `Binding` owns that slot and empties it when dropped, whatever the
//! exit path.
//!
//! No error or panic is allowed to unwind into the foreign frame. A
//! deliberate stop becomes `istop = 1`. Any other failure is stashed, the
//! solver is told to bail out with `istop = -1`, and the stashed error is
//! handed back once the solver has returned.

use std::cell::Cell;
use std::ffi::{c_double, c_int};
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use std::slice;

use nalgebra::{DMatrixView, DVectorView, Dyn};

use crate::error::{BridgeError, ModelError};

/// Which outputs one callback invocation must produce, decoded from `ideval`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EvalRequest {
    pub model: bool,
    pub jacobian_beta: bool,
    pub jacobian_delta: bool,
}

impl EvalRequest {
    pub fn decode(ideval: i32) -> Self {
        Self {
            model: ideval % 10 > 0,
            jacobian_beta: (ideval / 10) % 10 != 0,
            jacobian_delta: (ideval / 100) % 10 != 0,
        }
    }

    pub fn encode(self) -> i32 {
        i32::from(self.model)
            + 10 * i32::from(self.jacobian_beta)
            + 100 * i32::from(self.jacobian_delta)
    }

    /// All eight combinations, in `encode` order.
    pub fn all() -> impl Iterator<Item = EvalRequest> {
        (0..8).map(|bits| EvalRequest {
            model: bits & 1 != 0,
            jacobian_beta: bits & 2 != 0,
            jacobian_delta: bits & 4 != 0,
        })
    }
}

/// Explanatory variables plus their current errors, as seen by a callback.
///
/// A single explanatory variable is a vector of length `n`; several are a
/// `(m, n)` matrix with one row per variable.
#[derive(Debug, Clone, Copy)]
pub enum XPlusD<'a> {
    Vector(DVectorView<'a, f64>),
    Matrix(DMatrixView<'a, f64, Dyn, Dyn>),
}

impl<'a> XPlusD<'a> {
    /// View a Fortran `(ldn, m)` buffer holding `n` observations of `m`
    /// variables.
    pub fn from_fortran(data: &'a [f64], n: usize, m: usize, ldn: usize) -> Self {
        if m == 1 {
            XPlusD::Vector(DVectorView::from_slice(data, n))
        } else {
            XPlusD::Matrix(DMatrixView::from_slice_with_strides(data, m, n, ldn, 1))
        }
    }

    /// Number of observations.
    pub fn n(&self) -> usize {
        match self {
            XPlusD::Vector(v) => v.len(),
            XPlusD::Matrix(mat) => mat.ncols(),
        }
    }

    /// Number of explanatory variables.
    pub fn m(&self) -> usize {
        match self {
            XPlusD::Vector(_) => 1,
            XPlusD::Matrix(mat) => mat.nrows(),
        }
    }

    /// Value of variable `var` at observation `obs`.
    ///
    /// Panics when either index is out of range, like indexing the matrix.
    pub fn value(&self, var: usize, obs: usize) -> f64 {
        match self {
            XPlusD::Vector(v) => {
                assert!(var == 0, "variable {var} out of range for m = 1");
                v[obs]
            }
            XPlusD::Matrix(mat) => mat[(var, obs)],
        }
    }

    pub fn is_vector(&self) -> bool {
        matches!(self, XPlusD::Vector(_))
    }
}

/// Boxed user callback: `(beta, xplusd) -> flattened output`.
pub type ModelFn<'a> =
    Box<dyn FnMut(&[f64], &XPlusD<'_>) -> Result<Vec<f64>, ModelError> + 'a>;

/// The model function and its optional analytic Jacobians.
///
/// Outputs are flattened in Fortran order: `f[q*n + i]`,
/// `fjacb[q*npar*n + k*n + i]`, `fjacd[q*m*n + j*n + i]`.
pub struct CallbackSet<'a> {
    model: ModelFn<'a>,
    jacobian_beta: Option<ModelFn<'a>>,
    jacobian_delta: Option<ModelFn<'a>>,
}

impl<'a> CallbackSet<'a> {
    pub fn new<F>(model: F) -> Self
    where
        F: FnMut(&[f64], &XPlusD<'_>) -> Result<Vec<f64>, ModelError> + 'a,
    {
        Self {
            model: Box::new(model),
            jacobian_beta: None,
            jacobian_delta: None,
        }
    }

    pub fn with_jacobian_beta<F>(mut self, jacobian: F) -> Self
    where
        F: FnMut(&[f64], &XPlusD<'_>) -> Result<Vec<f64>, ModelError> + 'a,
    {
        self.jacobian_beta = Some(Box::new(jacobian));
        self
    }

    pub fn with_jacobian_delta<F>(mut self, jacobian: F) -> Self
    where
        F: FnMut(&[f64], &XPlusD<'_>) -> Result<Vec<f64>, ModelError> + 'a,
    {
        self.jacobian_delta = Some(Box::new(jacobian));
        self
    }

    pub fn has_jacobian_beta(&self) -> bool {
        self.jacobian_beta.is_some()
    }

    pub fn has_jacobian_delta(&self) -> bool {
        self.jacobian_delta.is_some()
    }

    pub fn evaluate_model(&mut self, beta: &[f64], x: &XPlusD<'_>) -> Result<Vec<f64>, ModelError> {
        (self.model)(beta, x)
    }

    pub fn jacobian_wrt_params(
        &mut self,
        beta: &[f64],
        x: &XPlusD<'_>,
    ) -> Result<Vec<f64>, ModelError> {
        match self.jacobian_beta.as_mut() {
            Some(jac) => jac(beta, x),
            None => Err(ModelError::MissingCallback("jacobian_wrt_params")),
        }
    }

    pub fn jacobian_wrt_errors(
        &mut self,
        beta: &[f64],
        x: &XPlusD<'_>,
    ) -> Result<Vec<f64>, ModelError> {
        match self.jacobian_delta.as_mut() {
            Some(jac) => jac(beta, x),
            None => Err(ModelError::MissingCallback("jacobian_wrt_errors")),
        }
    }
}

/// State reachable from the trampoline while a solve runs.
pub(crate) struct ActiveCall<'c, 'f> {
    callbacks: &'c mut CallbackSet<'f>,
    failure: Option<ModelError>,
}

impl<'c, 'f> ActiveCall<'c, 'f> {
    pub(crate) fn new(callbacks: &'c mut CallbackSet<'f>) -> Self {
        Self {
            callbacks,
            failure: None,
        }
    }

    pub(crate) fn into_failure(self) -> Option<ModelError> {
        self.failure
    }
}

type ErasedCall = ActiveCall<'static, 'static>;

thread_local! {
    static ACTIVE: Cell<Option<NonNull<ErasedCall>>> = const { Cell::new(None) };
}

/// True while a solve is running on this thread.
pub fn binding_active() -> bool {
    ACTIVE.with(|slot| slot.get().is_some())
}

/// Publishes an `ActiveCall` to the trampoline until dropped.
pub(crate) struct Binding<'b> {
    _call: PhantomData<&'b mut ()>,
}

impl<'b> Binding<'b> {
    pub(crate) fn install(call: &'b mut ActiveCall<'_, '_>) -> Result<Self, BridgeError> {
        let erased = NonNull::from(call).cast::<ErasedCall>();
        ACTIVE.with(|slot| {
            if slot.get().is_some() {
                return Err(BridgeError::Reentrant);
            }
            slot.set(Some(erased));
            Ok(Binding { _call: PhantomData })
        })
    }
}

impl Drop for Binding<'_> {
    fn drop(&mut self) {
        ACTIVE.with(|slot| slot.set(None));
    }
}

/// Fortran-ordered output buffers for one invocation.
struct Outputs<'o> {
    f: Option<&'o mut [f64]>,
    fjacb: Option<&'o mut [f64]>,
    fjacd: Option<&'o mut [f64]>,
}

fn copy_output(output: &'static str, dest: &mut [f64], values: Vec<f64>) -> Result<(), ModelError> {
    if values.len() != dest.len() {
        return Err(ModelError::OutputLength {
            output,
            expected: dest.len(),
            got: values.len(),
        });
    }
    dest.copy_from_slice(&values);
    Ok(())
}

fn evaluate(
    callbacks: &mut CallbackSet<'_>,
    beta: &[f64],
    x: &XPlusD<'_>,
    out: Outputs<'_>,
) -> Result<(), ModelError> {
    if let Some(f) = out.f {
        copy_output("f", f, callbacks.evaluate_model(beta, x)?)?;
    }
    if let Some(fjacb) = out.fjacb {
        copy_output("fjacb", fjacb, callbacks.jacobian_wrt_params(beta, x)?)?;
    }
    if let Some(fjacd) = out.fjacd {
        copy_output("fjacd", fjacd, callbacks.jacobian_wrt_errors(beta, x)?)?;
    }
    Ok(())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// # Safety
///
/// `value` must point to a readable `c_int`.
unsafe fn dim(value: *const c_int) -> usize {
    // SAFETY: forwarded to the caller.
    usize::try_from(unsafe { *value }).unwrap_or(0)
}

/// The `fcn` argument handed to `odr_long_c`.
///
/// # Safety
///
/// Must only be called by the solver (or a faithful stand-in) with buffers
/// sized for the dimensions it passes.
#[allow(clippy::too_many_arguments)]
pub(crate) unsafe extern "C" fn trampoline(
    n: *const c_int,
    m: *const c_int,
    npar: *const c_int,
    nq: *const c_int,
    ldn: *const c_int,
    ldm: *const c_int,
    ldnp: *const c_int,
    beta: *const c_double,
    xplusd: *const c_double,
    _ifixb: *const c_int,
    _ifixx: *const c_int,
    _ldifx: *const c_int,
    ideval: *const c_int,
    f: *mut c_double,
    fjacb: *mut c_double,
    fjacd: *mut c_double,
    istop: *mut c_int,
) {
    let Some(mut active) = ACTIVE.with(Cell::get) else {
        log::error!("solver invoked the model callback outside of a solve");
        // SAFETY: `istop` is always passed by the solver.
        unsafe { *istop = -1 };
        return;
    };
    // SAFETY: the slot is only populated by a live `Binding`, which borrows
    // the `ActiveCall` mutably for as long as the pointer is published.
    let active = unsafe { active.as_mut() };
    if active.failure.is_some() {
        // SAFETY: as above.
        unsafe { *istop = -1 };
        return;
    }

    // SAFETY: the solver passes every dimension and `ideval` by address.
    let (n, m, npar, nq, ldn, ldm, ldnp, request) = unsafe {
        (
            dim(n),
            dim(m),
            dim(npar),
            dim(nq),
            dim(ldn),
            dim(ldm),
            dim(ldnp),
            EvalRequest::decode(*ideval),
        )
    };

    // SAFETY: the solver sizes `beta` as `npar`, `xplusd` as `(ldn, m)` and
    // each requested output as documented on `CallbackSet`.
    let (beta, x, out) = unsafe {
        let beta = slice::from_raw_parts(beta, npar);
        let x = slice::from_raw_parts(xplusd, ldn * m);
        let out = Outputs {
            f: request
                .model
                .then(|| slice::from_raw_parts_mut(f, nq * ldn)),
            fjacb: request
                .jacobian_beta
                .then(|| slice::from_raw_parts_mut(fjacb, nq * ldnp * ldn)),
            fjacd: request
                .jacobian_delta
                .then(|| slice::from_raw_parts_mut(fjacd, nq * ldm * ldn)),
        };
        (beta, x, out)
    };
    let x = XPlusD::from_fortran(x, n, m, ldn);

    let callbacks = &mut *active.callbacks;
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| evaluate(callbacks, beta, &x, out)));

    let flag = match outcome {
        Ok(Ok(())) => 0,
        Ok(Err(err)) if err.is_stop() => {
            log::info!("{err}");
            1
        }
        Ok(Err(err)) => {
            log::error!("model callback failed, aborting solve: {err}");
            active.failure = Some(err);
            -1
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            log::error!("model callback panicked, aborting solve: {message}");
            active.failure = Some(ModelError::Panicked(message));
            -1
        }
    };
    // SAFETY: as above.
    unsafe { *istop = flag };
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::rc::Rc;

    struct Frame {
        n: c_int,
        m: c_int,
        npar: c_int,
        nq: c_int,
        beta: Vec<f64>,
        xplusd: Vec<f64>,
        f: Vec<f64>,
        fjacb: Vec<f64>,
        fjacd: Vec<f64>,
    }

    impl Frame {
        fn new(n: usize, m: usize, npar: usize, nq: usize) -> Self {
            Self {
                n: n as c_int,
                m: m as c_int,
                npar: npar as c_int,
                nq: nq as c_int,
                beta: (0..npar).map(|k| k as f64 + 1.0).collect(),
                xplusd: (0..n * m).map(|v| v as f64).collect(),
                f: vec![f64::NAN; nq * n],
                fjacb: vec![f64::NAN; nq * npar * n],
                fjacd: vec![f64::NAN; nq * m * n],
            }
        }

        fn invoke(&mut self, ideval: c_int) -> c_int {
            let mut istop: c_int = 99;
            let zero: c_int = 0;
            // SAFETY: every buffer is sized for the frame's dimensions.
            unsafe {
                trampoline(
                    &self.n,
                    &self.m,
                    &self.npar,
                    &self.nq,
                    &self.n,
                    &self.m,
                    &self.npar,
                    self.beta.as_ptr(),
                    self.xplusd.as_ptr(),
                    std::ptr::null(),
                    std::ptr::null(),
                    &zero,
                    &ideval,
                    self.f.as_mut_ptr(),
                    self.fjacb.as_mut_ptr(),
                    self.fjacd.as_mut_ptr(),
                    &mut istop,
                );
            }
            istop
        }
    }

    fn counting_set<'a>(counts: &'a [Cell<usize>; 3], frame: &Frame) -> CallbackSet<'a> {
        let (n, m, npar, nq) = (frame.n as usize, frame.m as usize, frame.npar as usize, frame.nq as usize);
        CallbackSet::new(move |_, _| {
            counts[0].set(counts[0].get() + 1);
            Ok(vec![1.0; nq * n])
        })
        .with_jacobian_beta(move |_, _| {
            counts[1].set(counts[1].get() + 1);
            Ok(vec![2.0; nq * npar * n])
        })
        .with_jacobian_delta(move |_, _| {
            counts[2].set(counts[2].get() + 1);
            Ok(vec![3.0; nq * m * n])
        })
    }

    #[test]
    fn every_mode_invokes_exactly_the_requested_callbacks() {
        for request in EvalRequest::all() {
            let mut frame = Frame::new(4, 2, 3, 2);
            let counts: [Cell<usize>; 3] = Default::default();
            let mut callbacks = counting_set(&counts, &frame);
            let mut active = ActiveCall::new(&mut callbacks);
            let istop = {
                let _binding = Binding::install(&mut active).expect("install");
                frame.invoke(request.encode())
            };
            assert_eq!(istop, 0, "{request:?}");
            assert!(active.into_failure().is_none());
            let got = [counts[0].get(), counts[1].get(), counts[2].get()];
            let want = [
                usize::from(request.model),
                usize::from(request.jacobian_beta),
                usize::from(request.jacobian_delta),
            ];
            assert_eq!(got, want, "{request:?}");
            assert_eq!(frame.f.iter().all(|v| *v == 1.0), request.model);
            assert_eq!(frame.fjacb.iter().all(|v| *v == 2.0), request.jacobian_beta);
            assert_eq!(frame.fjacd.iter().all(|v| *v == 3.0), request.jacobian_delta);
        }
    }

    #[test]
    fn single_variable_is_a_vector() {
        let mut frame = Frame::new(5, 1, 2, 1);
        let seen = Cell::new((false, 0, 0));
        let mut callbacks = CallbackSet::new(|beta, x| {
            assert_eq!(beta, &[1.0, 2.0]);
            seen.set((x.is_vector(), x.m(), x.n()));
            Ok(vec![0.0; 5])
        });
        let mut active = ActiveCall::new(&mut callbacks);
        {
            let _binding = Binding::install(&mut active).expect("install");
            assert_eq!(frame.invoke(1), 0);
        }
        assert_eq!(seen.get(), (true, 1, 5));
    }

    #[test]
    fn several_variables_are_a_matrix_with_one_row_per_variable() {
        let mut frame = Frame::new(3, 2, 1, 1);
        let mut callbacks = CallbackSet::new(|_, x| {
            let XPlusD::Matrix(mat) = x else {
                panic!("expected a matrix");
            };
            assert_eq!(mat.shape(), (2, 3));
            // Fortran (ldn, m): variable 1 starts at offset n.
            assert_eq!(mat[(0, 2)], 2.0);
            assert_eq!(mat[(1, 0)], 3.0);
            assert_eq!(x.value(1, 2), 5.0);
            Ok(vec![0.0; 3])
        });
        let mut active = ActiveCall::new(&mut callbacks);
        {
            let _binding = Binding::install(&mut active).expect("install");
            assert_eq!(frame.invoke(1), 0);
        }
        assert!(active.into_failure().is_none());
    }

    #[test]
    fn vector_values_are_read_by_observation() {
        let x = [10.0, 20.0, 30.0];
        let view = XPlusD::from_fortran(&x, 3, 1, 3);
        assert_eq!(view.value(0, 1), 20.0);
    }

    #[test]
    #[should_panic(expected = "variable 7 out of range")]
    fn vector_rejects_a_second_variable() {
        let x = [10.0, 20.0, 30.0];
        XPlusD::from_fortran(&x, 3, 1, 3).value(7, 1);
    }

    #[test]
    #[should_panic]
    fn matrix_rejects_a_variable_past_m() {
        let x = [0.0; 6];
        XPlusD::from_fortran(&x, 3, 2, 3).value(2, 0);
    }

    #[test]
    fn stop_sets_istop_without_stashing() {
        let mut frame = Frame::new(2, 1, 1, 1);
        let mut callbacks = CallbackSet::new(|_, _| Err(ModelError::stop("enough")));
        let mut active = ActiveCall::new(&mut callbacks);
        let istop = {
            let _binding = Binding::install(&mut active).expect("install");
            frame.invoke(1)
        };
        assert_eq!(istop, 1);
        assert!(active.into_failure().is_none());
    }

    #[test]
    fn wrong_output_length_is_stashed() {
        let mut frame = Frame::new(4, 1, 2, 1);
        let mut callbacks = CallbackSet::new(|_, _| Ok(vec![0.0; 3]));
        let mut active = ActiveCall::new(&mut callbacks);
        let istop = {
            let _binding = Binding::install(&mut active).expect("install");
            frame.invoke(1)
        };
        assert_eq!(istop, -1);
        assert!(matches!(
            active.into_failure(),
            Some(ModelError::OutputLength {
                output: "f",
                expected: 4,
                got: 3
            })
        ));
    }

    #[test]
    fn missing_jacobian_is_a_failure() {
        let mut frame = Frame::new(2, 1, 1, 1);
        let mut callbacks = CallbackSet::new(|_, _| Ok(vec![0.0; 2]));
        let mut active = ActiveCall::new(&mut callbacks);
        let istop = {
            let _binding = Binding::install(&mut active).expect("install");
            frame.invoke(10)
        };
        assert_eq!(istop, -1);
        assert!(matches!(
            active.into_failure(),
            Some(ModelError::MissingCallback("jacobian_wrt_params"))
        ));
    }

    #[test]
    fn panic_is_caught_and_later_calls_are_skipped() {
        let mut frame = Frame::new(2, 1, 1, 1);
        let calls = Cell::new(0);
        let mut callbacks = CallbackSet::new(|_, _| {
            calls.set(calls.get() + 1);
            panic!("model blew up");
        });
        let mut active = ActiveCall::new(&mut callbacks);
        let (first, second) = {
            let _binding = Binding::install(&mut active).expect("install");
            (frame.invoke(1), frame.invoke(1))
        };
        assert_eq!((first, second), (-1, -1));
        assert_eq!(calls.get(), 1);
        match active.into_failure() {
            Some(ModelError::Panicked(msg)) => assert!(msg.contains("model blew up")),
            other => panic!("unexpected failure: {other:?}"),
        }
    }

    #[test]
    fn binding_is_cleared_and_rejects_nesting() {
        let sentinel = Rc::new(());
        let held = Rc::clone(&sentinel);
        let mut callbacks = CallbackSet::new(move |_, _| {
            let _ = &held;
            Ok(Vec::new())
        });
        let mut active = ActiveCall::new(&mut callbacks);
        {
            let _binding = Binding::install(&mut active).expect("install");
            assert!(binding_active());
            let mut other_callbacks = CallbackSet::new(|_, _| Ok(Vec::new()));
            let mut other = ActiveCall::new(&mut other_callbacks);
            assert!(matches!(
                Binding::install(&mut other),
                Err(BridgeError::Reentrant)
            ));
        }
        assert!(!binding_active());
        drop(active);
        drop(callbacks);
        assert_eq!(Rc::strong_count(&sentinel), 1);
    }

    #[test]
    fn unbound_invocation_asks_the_solver_to_stop() {
        let mut frame = Frame::new(1, 1, 1, 1);
        assert_eq!(frame.invoke(1), -1);
    }

    proptest! {
        #[test]
        fn decode_reads_only_the_three_low_digits(ideval in 0i32..100_000) {
            let request = EvalRequest::decode(ideval);
            prop_assert_eq!(request, EvalRequest::decode(ideval % 1000));
            prop_assert_eq!(request.model, ideval % 10 != 0);
        }

        #[test]
        fn encode_then_decode_is_identity(bits in 0u8..8) {
            let request = EvalRequest {
                model: bits & 1 != 0,
                jacobian_beta: bits & 2 != 0,
                jacobian_delta: bits & 4 != 0,
            };
            prop_assert_eq!(EvalRequest::decode(request.encode()), request);
        }
    }
}

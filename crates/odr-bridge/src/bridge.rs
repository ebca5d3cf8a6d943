//! Top-level entry point: one call to `odr_long_c`.

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::call::OdrCall;
use crate::error::{BridgeError, Result};
use crate::library::OdrLibrary;
use crate::marshal::RawArgs;
use crate::trampoline::{ActiveCall, Binding, CallbackSet, binding_active, trampoline};
use crate::units::ReportUnits;

// The Fortran routines keep module state and are not known to be reentrant.
// Reentrant so a model callback may still query a workspace layout.
static SOLVER: ReentrantMutex<()> = parking_lot::const_reentrant_mutex(());

/// Hold this while calling into the library.
pub(crate) fn serialized() -> ReentrantMutexGuard<'static, ()> {
    SOLVER.lock()
}

/// Run the solver on `call`, invoking `callbacks` for every model evaluation.
///
/// Returns the solver's `info` code unchanged. `beta`, `delta`, `work` and
/// `iwork` of `call` are updated in place. A deliberate stop from a callback
/// still returns `Ok`; any other callback failure is returned as
/// [`BridgeError::Callback`] once the solver has unwound its own stack.
///
/// Report and error output go to `call.rptfile`/`call.errfile`, or to
/// standard output when absent. Files opened here are closed before
/// returning, on every path.
pub fn odr(
    lib: &dyn OdrLibrary,
    callbacks: &mut CallbackSet<'_>,
    call: &mut OdrCall<'_>,
) -> Result<i32> {
    if binding_active() {
        return Err(BridgeError::Reentrant);
    }
    log::debug!("{}: odr_long_c with {:?}", lib.name(), call.dims);

    let _serial = serialized();
    let units = ReportUnits::open(lib, call.rptfile.as_deref(), call.errfile.as_deref())?;
    let mut args = RawArgs::from_call(call)?;
    args.lunrpt = units.report();
    args.lunerr = units.error();

    let mut active = ActiveCall::new(callbacks);
    let info = {
        let _binding = Binding::install(&mut active)?;
        // SAFETY: `args` points into `call`, which the caller validated and
        // which outlives this block; the trampoline never unwinds.
        unsafe { lib.odr(trampoline, &mut args) }
    };
    drop(units);

    if let Some(failure) = active.into_failure() {
        return Err(BridgeError::Callback(failure));
    }
    log::debug!("{}: info = {info}", lib.name());
    Ok(info)
}

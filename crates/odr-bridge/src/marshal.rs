//! Conversion of an `OdrCall` into the flat argument block of `odr_long_c`.
//!
//! Absent optional arrays and scalars become null pointers, which the solver
//! reads as "use the default". The two work arrays are the exception: the
//! solver dereferences them unconditionally, so an absent work array is
//! replaced by a length-1 placeholder owned by `RawArgs`.

use std::ffi::{c_double, c_int};
use std::marker::PhantomData;
use std::ptr;

use crate::call::OdrCall;
use crate::error::{BridgeError, Result};
use crate::units::STDOUT_UNIT;

/// Convert a dimension to the solver's integer type.
pub fn to_c_int(name: &'static str, value: usize) -> Result<c_int> {
    c_int::try_from(value).map_err(|_| BridgeError::DimensionOutOfRange { name, value })
}

fn opt_array<T>(array: Option<&[T]>) -> *const T {
    array.map_or(ptr::null(), <[T]>::as_ptr)
}

fn opt_scalar<T>(value: &Option<T>) -> *const T {
    value.as_ref().map_or(ptr::null(), |v| v as *const T)
}

/// Pointer/scalar arguments for one solver call.
///
/// Holds raw pointers into the buffers of the `OdrCall` it was built from,
/// so it mutably borrows that call for its whole lifetime. Scalar options
/// are stored by value here so their addresses stay valid during the call.
pub struct RawArgs<'a> {
    pub n: c_int,
    pub m: c_int,
    pub npar: c_int,
    pub nq: c_int,
    pub ldwe: c_int,
    pub ld2we: c_int,
    pub ldwd: c_int,
    pub ld2wd: c_int,
    pub ldifx: c_int,
    pub ldstpd: c_int,
    pub ldscld: c_int,
    pub lwork: c_int,
    pub liwork: c_int,
    pub beta: *mut c_double,
    pub y: *const c_double,
    pub x: *const c_double,
    pub delta: *mut c_double,
    pub we: *const c_double,
    pub wd: *const c_double,
    pub ifixb: *const c_int,
    pub ifixx: *const c_int,
    pub stpb: *const c_double,
    pub stpd: *const c_double,
    pub sclb: *const c_double,
    pub scld: *const c_double,
    pub lower: *const c_double,
    pub upper: *const c_double,
    pub job: Option<c_int>,
    pub ndigit: Option<c_int>,
    pub taufac: Option<c_double>,
    pub sstol: Option<c_double>,
    pub partol: Option<c_double>,
    pub maxit: Option<c_int>,
    pub iprint: Option<c_int>,
    pub lunerr: c_int,
    pub lunrpt: c_int,
    work: *mut c_double,
    iwork: *mut c_int,
    work_placeholder: [c_double; 1],
    iwork_placeholder: [c_int; 1],
    _call: PhantomData<&'a mut ()>,
}

impl<'a> RawArgs<'a> {
    pub fn from_call(call: &'a mut OdrCall<'_>) -> Result<Self> {
        let dims = call.dims;
        let lead = call.lead;

        let (work, lwork) = match call.work.as_deref_mut() {
            Some(work) => (work.as_mut_ptr(), to_c_int("lwork", work.len())?),
            None => (ptr::null_mut(), 1),
        };
        let (iwork, liwork) = match call.iwork.as_deref_mut() {
            Some(iwork) => (iwork.as_mut_ptr(), to_c_int("liwork", iwork.len())?),
            None => (ptr::null_mut(), 1),
        };

        Ok(Self {
            n: to_c_int("n", dims.n)?,
            m: to_c_int("m", dims.m)?,
            npar: to_c_int("npar", dims.npar)?,
            nq: to_c_int("nq", dims.nq)?,
            ldwe: to_c_int("ldwe", lead.ldwe)?,
            ld2we: to_c_int("ld2we", lead.ld2we)?,
            ldwd: to_c_int("ldwd", lead.ldwd)?,
            ld2wd: to_c_int("ld2wd", lead.ld2wd)?,
            ldifx: to_c_int("ldifx", lead.ldifx)?,
            ldstpd: to_c_int("ldstpd", lead.ldstpd)?,
            ldscld: to_c_int("ldscld", lead.ldscld)?,
            lwork,
            liwork,
            beta: call.beta.as_mut_ptr(),
            y: call.y.as_ptr(),
            x: call.x.as_ptr(),
            delta: call.delta.as_mut_ptr(),
            we: opt_array(call.we),
            wd: opt_array(call.wd),
            ifixb: opt_array(call.ifixb),
            ifixx: opt_array(call.ifixx),
            stpb: opt_array(call.stpb),
            stpd: opt_array(call.stpd),
            sclb: opt_array(call.sclb),
            scld: opt_array(call.scld),
            lower: opt_array(call.lower),
            upper: opt_array(call.upper),
            job: call.job,
            ndigit: call.ndigit,
            taufac: call.taufac,
            sstol: call.sstol,
            partol: call.partol,
            maxit: call.maxit,
            iprint: call.iprint,
            lunerr: STDOUT_UNIT,
            lunrpt: STDOUT_UNIT,
            work,
            iwork,
            work_placeholder: [0.0],
            iwork_placeholder: [0],
            _call: PhantomData,
        })
    }

    /// Real work array, or the placeholder when the caller supplied none.
    pub fn work_ptr(&mut self) -> *mut c_double {
        if self.work.is_null() {
            self.work_placeholder.as_mut_ptr()
        } else {
            self.work
        }
    }

    /// Integer work array, or the placeholder when the caller supplied none.
    pub fn iwork_ptr(&mut self) -> *mut c_int {
        if self.iwork.is_null() {
            self.iwork_placeholder.as_mut_ptr()
        } else {
            self.iwork
        }
    }

    pub fn has_workspace(&self) -> bool {
        !self.work.is_null() && !self.iwork.is_null()
    }

    pub fn job_ptr(&self) -> *const c_int {
        opt_scalar(&self.job)
    }

    pub fn ndigit_ptr(&self) -> *const c_int {
        opt_scalar(&self.ndigit)
    }

    pub fn taufac_ptr(&self) -> *const c_double {
        opt_scalar(&self.taufac)
    }

    pub fn sstol_ptr(&self) -> *const c_double {
        opt_scalar(&self.sstol)
    }

    pub fn partol_ptr(&self) -> *const c_double {
        opt_scalar(&self.partol)
    }

    pub fn maxit_ptr(&self) -> *const c_int {
        opt_scalar(&self.maxit)
    }

    pub fn iprint_ptr(&self) -> *const c_int {
        opt_scalar(&self.iprint)
    }
}

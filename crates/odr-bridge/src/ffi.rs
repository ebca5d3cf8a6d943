//! Raw C interface of the ODRPACK95 shared library.
//!
//! All pointer arguments follow the Fortran convention of the library's
//! `bind(C)` layer: scalars are passed by address and a null pointer marks an
//! absent optional argument.

use std::ffi::{c_char, c_double, c_int};

use crate::layout::{IntegerWorkspaceIndex, RealWorkspaceIndex};

/// Model callback invoked by the solver during iteration.
///
/// Arguments: `n, m, npar, nq, ldn, ldm, ldnp, beta, xplusd, ifixb, ifixx,
/// ldifx, ideval, f, fjacb, fjacd, istop`.
pub type OdrFcn = unsafe extern "C" fn(
    n: *const c_int,
    m: *const c_int,
    npar: *const c_int,
    nq: *const c_int,
    ldn: *const c_int,
    ldm: *const c_int,
    ldnp: *const c_int,
    beta: *const c_double,
    xplusd: *const c_double,
    ifixb: *const c_int,
    ifixx: *const c_int,
    ldifx: *const c_int,
    ideval: *const c_int,
    f: *mut c_double,
    fjacb: *mut c_double,
    fjacd: *mut c_double,
    istop: *mut c_int,
);

/// `odr_long_c`: the full-argument solver entry point.
pub type OdrLongFn = unsafe extern "C" fn(
    fcn: OdrFcn,
    n: *const c_int,
    m: *const c_int,
    npar: *const c_int,
    nq: *const c_int,
    ldwe: *const c_int,
    ld2we: *const c_int,
    ldwd: *const c_int,
    ld2wd: *const c_int,
    ldifx: *const c_int,
    ldstpd: *const c_int,
    ldscld: *const c_int,
    lwork: *const c_int,
    liwork: *const c_int,
    beta: *mut c_double,
    y: *const c_double,
    x: *const c_double,
    we: *const c_double,
    wd: *const c_double,
    ifixb: *const c_int,
    ifixx: *const c_int,
    stpb: *const c_double,
    stpd: *const c_double,
    sclb: *const c_double,
    scld: *const c_double,
    delta: *mut c_double,
    lower: *const c_double,
    upper: *const c_double,
    work: *mut c_double,
    iwork: *mut c_int,
    job: *const c_int,
    ndigit: *const c_int,
    taufac: *const c_double,
    sstol: *const c_double,
    partol: *const c_double,
    maxit: *const c_int,
    iprint: *const c_int,
    lunerr: *const c_int,
    lunrpt: *const c_int,
    info: *mut c_int,
);

pub type WorkspaceDimensionsFn = unsafe extern "C" fn(
    n: *const c_int,
    m: *const c_int,
    npar: *const c_int,
    nq: *const c_int,
    isodr: *const bool,
    lwork: *mut c_int,
    liwork: *mut c_int,
);

pub type DiwinfFn = unsafe extern "C" fn(
    m: *const c_int,
    npar: *const c_int,
    nq: *const c_int,
    iworkidx: *mut IntegerWorkspaceIndex,
);

pub type DwinfFn = unsafe extern "C" fn(
    n: *const c_int,
    m: *const c_int,
    npar: *const c_int,
    nq: *const c_int,
    ldwe: *const c_int,
    ld2we: *const c_int,
    isodr: *const bool,
    workidx: *mut RealWorkspaceIndex,
);

pub type OpenFileFn = unsafe extern "C" fn(filename: *const c_char, lun: *mut c_int, ierr: *mut c_int);

pub type CloseFileFn = unsafe extern "C" fn(lun: *const c_int, ierr: *mut c_int);

/// Function table of the library, one entry per exported routine.
#[derive(Clone, Copy)]
pub struct OdrpackApi {
    pub odr_long_c: OdrLongFn,
    pub workspace_dimensions_c: WorkspaceDimensionsFn,
    pub diwinf_c: DiwinfFn,
    pub dwinf_c: DwinfFn,
    pub open_file: OpenFileFn,
    pub close_file: CloseFileFn,
}

/// Exported symbol names, in `OdrpackApi` field order.
pub const SYMBOLS: [&str; 6] = [
    "odr_long_c",
    "workspace_dimensions_c",
    "diwinf_c",
    "dwinf_c",
    "open_file",
    "close_file",
];

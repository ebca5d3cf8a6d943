//! In-process stand-in for the ODRPACK95 library.
//!
//! `FakeOdrpack` drives the real trampoline through the same function pointer
//! the shared library would receive. By default it fits the model by
//! unweighted Gauss-Newton least squares (the `delta` errors are left
//! untouched) and fills the work arrays the way the library does, so result
//! extraction can be exercised end to end. With a script it instead replays
//! a fixed sequence of `ideval` requests and records each `istop`.
//!
//! The fake ends the solve on any nonzero `istop`. ODRPACK95 itself stops
//! only on a negative value and treats a positive one as "reject this point
//! and try a smaller step", so a model that signals stop with `istop = 1`
//! may be called again by the real library before it gives up.
//!
//! Unit files are not actually opened; opens and closes are only counted.

use std::ffi::{c_double, c_int};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

use nalgebra::{DMatrix, DVector};
use parking_lot::Mutex;

use crate::call::Dimensions;
use crate::error::{LibraryError, Result};
use crate::ffi::OdrFcn;
use crate::layout::{IntegerWorkspaceIndex, RealWorkspaceIndex};
use crate::library::OdrLibrary;
use crate::marshal::RawArgs;

/// `info` returned when a callback set `istop`.
pub const INFO_USER_STOP: c_int = 51_000;
/// `info` returned when the least-squares step cannot be computed.
pub const INFO_SINGULAR: c_int = 60_000;

const FIRST_UNIT: c_int = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitRouting {
    pub lunrpt: c_int,
    pub lunerr: c_int,
    /// `lwork == 1 && liwork == 1`: placeholders were passed.
    pub placeholder_workspace: bool,
}

#[derive(Default)]
pub struct FakeOdrpack {
    opens: AtomicUsize,
    closes: AtomicUsize,
    solves: AtomicUsize,
    next_unit: AtomicI32,
    fail_open_on: Option<PathBuf>,
    fail_close: bool,
    script: Option<Vec<c_int>>,
    istops: Mutex<Vec<c_int>>,
    routing: Mutex<Option<UnitRouting>>,
}

impl FakeOdrpack {
    pub fn new() -> Self {
        Self {
            next_unit: AtomicI32::new(FIRST_UNIT),
            ..Self::default()
        }
    }

    /// Fail `open_unit` for this path.
    pub fn fail_open_on(mut self, path: impl Into<PathBuf>) -> Self {
        self.fail_open_on = Some(path.into());
        self
    }

    /// Fail every `close_unit` (after counting it).
    pub fn fail_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    /// Replay these `ideval` values instead of solving.
    pub fn with_script(mut self, idevals: impl IntoIterator<Item = c_int>) -> Self {
        self.script = Some(idevals.into_iter().collect());
        self
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn solves(&self) -> usize {
        self.solves.load(Ordering::SeqCst)
    }

    /// `istop` of every scripted invocation, in order.
    pub fn istops(&self) -> Vec<c_int> {
        self.istops.lock().clone()
    }

    /// Units and workspace seen by the most recent solve.
    pub fn last_routing(&self) -> Option<UnitRouting> {
        *self.routing.lock()
    }

    fn replay(&self, ev: &mut Evaluator<'_>, beta: &[f64], script: &[c_int]) -> c_int {
        let mut istops = self.istops.lock();
        for &ideval in script {
            // SAFETY: the evaluator's buffers are sized for its dimensions.
            let istop = unsafe { ev.call(beta, ideval) };
            istops.push(istop);
            if istop != 0 {
                return INFO_USER_STOP;
            }
        }
        1
    }
}

fn to_usize(value: c_int) -> usize {
    usize::try_from(value).unwrap_or(0)
}

/// Segment lengths of the real work array, in `RealWorkspaceIndex` order.
fn real_segments(dims: Dimensions) -> [usize; 51] {
    let Dimensions { n, m, npar, nq } = dims;
    [
        n * m,             // delta
        n * nq,            // eps
        n * m,             // xplus
        n * nq,            // fn
        npar,              // sd
        npar * npar,       // vcv
        1,                 // rvar
        1,                 // wss
        1,                 // wssde
        1,                 // wssep
        1,                 // rcond
        1,                 // eta
        1,                 // olmav
        1,                 // tau
        1,                 // alpha
        1,                 // actrs
        1,                 // pnorm
        1,                 // rnors
        1,                 // prers
        1,                 // partl
        1,                 // sstol
        1,                 // taufc
        1,                 // epsma
        npar,              // beta0
        npar,              // betac
        npar,              // betas
        npar,              // betan
        npar,              // s
        npar,              // ss
        npar,              // ssf
        npar,              // qraux
        npar,              // u
        n * nq,            // fs
        n * npar * nq,     // fjacb
        nq * nq,           // we1
        nq * (npar + m),   // diff
        n * m,             // delts
        n * m,             // deltn
        n * m,             // t
        n * m,             // tt
        nq * nq,           // omega
        n * m * nq,        // fjacd
        n * m * nq,        // wrk1
        n * nq,            // wrk2
        npar,              // wrk3
        m * m,             // wrk4
        m,                 // wrk5
        n * nq * npar,     // wrk6
        5 * nq,            // wrk7
        npar,              // lower
        npar,              // upper
    ]
}

fn integer_segments(m: usize, npar: usize, nq: usize) -> [usize; 22] {
    let mut lens = [1; 22];
    lens[0] = 1 + nq * npar; // msgb
    lens[1] = 1 + nq * m; // msgd
    lens[2] = npar; // ifix2
    lens
}

fn starts<const N: usize>(lens: [usize; N]) -> ([c_int; N], c_int) {
    let mut offsets = [0; N];
    let mut next = 0usize;
    for (offset, len) in offsets.iter_mut().zip(lens) {
        *offset = c_int::try_from(next).unwrap_or(c_int::MAX);
        next += len;
    }
    (offsets, c_int::try_from(next).unwrap_or(c_int::MAX))
}

fn real_index(dims: Dimensions) -> RealWorkspaceIndex {
    let (o, total) = starts(real_segments(dims));
    RealWorkspaceIndex {
        delta: o[0],
        eps: o[1],
        xplus: o[2],
        fn_: o[3],
        sd: o[4],
        vcv: o[5],
        rvar: o[6],
        wss: o[7],
        wssde: o[8],
        wssep: o[9],
        rcond: o[10],
        eta: o[11],
        olmav: o[12],
        tau: o[13],
        alpha: o[14],
        actrs: o[15],
        pnorm: o[16],
        rnors: o[17],
        prers: o[18],
        partl: o[19],
        sstol: o[20],
        taufc: o[21],
        epsma: o[22],
        beta0: o[23],
        betac: o[24],
        betas: o[25],
        betan: o[26],
        s: o[27],
        ss: o[28],
        ssf: o[29],
        qraux: o[30],
        u: o[31],
        fs: o[32],
        fjacb: o[33],
        we1: o[34],
        diff: o[35],
        delts: o[36],
        deltn: o[37],
        t: o[38],
        tt: o[39],
        omega: o[40],
        fjacd: o[41],
        wrk1: o[42],
        wrk2: o[43],
        wrk3: o[44],
        wrk4: o[45],
        wrk5: o[46],
        wrk6: o[47],
        wrk7: o[48],
        lower: o[49],
        upper: o[50],
        lwkmn: total,
    }
}

fn integer_index(m: usize, npar: usize, nq: usize) -> IntegerWorkspaceIndex {
    let (o, total) = starts(integer_segments(m, npar, nq));
    IntegerWorkspaceIndex {
        msgb: o[0],
        msgd: o[1],
        ifix2: o[2],
        istop: o[3],
        nnzw: o[4],
        npp: o[5],
        idf: o[6],
        job: o[7],
        iprin: o[8],
        luner: o[9],
        lunrp: o[10],
        nrow: o[11],
        ntol: o[12],
        neta: o[13],
        maxit: o[14],
        niter: o[15],
        nfev: o[16],
        njev: o[17],
        int2: o[18],
        irank: o[19],
        ldtt: o[20],
        bound: o[21],
        liwkmn: total,
    }
}

/// Calls the model through the solver-side function pointer.
struct Evaluator<'a> {
    fcn: OdrFcn,
    n: c_int,
    m: c_int,
    npar: c_int,
    nq: c_int,
    ldifx: c_int,
    x: &'a [f64],
    ifixb: *const c_int,
    ifixx: *const c_int,
    f: Vec<f64>,
    fjacb: Vec<f64>,
    fjacd: Vec<f64>,
    nfev: usize,
    njev: usize,
}

impl Evaluator<'_> {
    /// # Safety
    ///
    /// `fcn` must honour the callback contract for these buffers.
    unsafe fn call(&mut self, beta: &[f64], ideval: c_int) -> c_int {
        let mut istop: c_int = 0;
        // SAFETY: every buffer is sized for (n, m, npar, nq) with ldn = n.
        unsafe {
            (self.fcn)(
                &self.n,
                &self.m,
                &self.npar,
                &self.nq,
                &self.n,
                &self.m,
                &self.npar,
                beta.as_ptr(),
                self.x.as_ptr(),
                self.ifixb,
                self.ifixx,
                &self.ldifx,
                &ideval,
                self.f.as_mut_ptr(),
                self.fjacb.as_mut_ptr(),
                self.fjacd.as_mut_ptr(),
                &mut istop,
            );
        }
        if ideval % 10 > 0 {
            self.nfev += 1;
        }
        if (ideval / 10) % 10 != 0 {
            self.njev += 1;
        }
        istop
    }
}

struct Fit {
    info: c_int,
    niter: usize,
    fitted: Vec<f64>,
    residual: DVector<f64>,
    jacobian: DMatrix<f64>,
}

enum Step {
    Done(Fit),
    Stopped,
}

struct Controls {
    user_jacobian: bool,
    maxit: usize,
    sstol: f64,
    partol: f64,
}

fn gauss_newton(
    ev: &mut Evaluator<'_>,
    beta: &mut [f64],
    y: &[f64],
    free: &[bool],
    controls: &Controls,
) -> Step {
    let rows = y.len();
    let npar = beta.len();
    let mut prev_ss: Option<f64> = None;
    let mut niter = 0;

    loop {
        // SAFETY: see `Evaluator::call`.
        if unsafe { ev.call(beta, 1) } != 0 {
            return Step::Stopped;
        }
        let f0 = ev.f.clone();
        let residual = DVector::from_iterator(rows, y.iter().zip(&f0).map(|(y, f)| y - f));
        let ss = residual.norm_squared();

        let mut jacobian = DMatrix::zeros(rows, npar);
        if controls.user_jacobian {
            // SAFETY: see `Evaluator::call`.
            if unsafe { ev.call(beta, 10) } != 0 {
                return Step::Stopped;
            }
            let n = to_usize(ev.n);
            for r in 0..rows {
                let (q, i) = (r / n, r % n);
                for k in 0..npar {
                    jacobian[(r, k)] = ev.fjacb[q * npar * n + k * n + i];
                }
            }
        } else {
            for k in 0..npar {
                let mut probe = beta.to_vec();
                let h = f64::EPSILON.sqrt() * beta[k].abs().max(1.0);
                probe[k] += h;
                // SAFETY: see `Evaluator::call`.
                if unsafe { ev.call(&probe, 1) } != 0 {
                    return Step::Stopped;
                }
                for r in 0..rows {
                    jacobian[(r, k)] = (ev.f[r] - f0[r]) / h;
                }
            }
        }
        for (k, _) in free.iter().enumerate().filter(|(_, free)| !**free) {
            jacobian.column_mut(k).fill(0.0);
        }

        let converged_ss = prev_ss.is_some_and(|prev| (prev - ss).abs() <= controls.sstol * prev);
        if converged_ss || niter >= controls.maxit {
            let info = if converged_ss { 1 } else { 4 };
            return Step::Done(Fit {
                info,
                niter,
                fitted: f0,
                residual,
                jacobian,
            });
        }

        let Ok(step) = jacobian.clone().svd(true, true).solve(&residual, 1e-12) else {
            return Step::Done(Fit {
                info: INFO_SINGULAR,
                niter,
                fitted: f0,
                residual,
                jacobian,
            });
        };
        for (b, s) in beta.iter_mut().zip(step.iter()) {
            *b += s;
        }
        niter += 1;
        prev_ss = Some(ss);

        let beta_norm = beta.iter().map(|b| b * b).sum::<f64>().sqrt();
        if step.norm() <= controls.partol * (beta_norm + controls.partol) {
            // SAFETY: see `Evaluator::call`.
            if unsafe { ev.call(beta, 1) } != 0 {
                return Step::Stopped;
            }
            let residual = DVector::from_iterator(rows, y.iter().zip(&ev.f).map(|(y, f)| y - f));
            return Step::Done(Fit {
                info: 2,
                niter,
                fitted: ev.f.clone(),
                residual,
                jacobian,
            });
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn write_results(
    work: &mut [f64],
    iwork: &mut [c_int],
    real: &RealWorkspaceIndex,
    integer: &IntegerWorkspaceIndex,
    fit: &Fit,
    ev: &Evaluator<'_>,
    free: &[bool],
    controls: &Controls,
) {
    let npar = fit.jacobian.ncols();
    let rows = fit.residual.len();
    let nfree = free.iter().filter(|f| **f).count();
    let wss = fit.residual.norm_squared();
    let dof = rows.saturating_sub(nfree);
    let rvar = if dof > 0 { wss / dof as f64 } else { wss };

    let jtj = fit.jacobian.transpose() * &fit.jacobian;
    let mut vcv = DMatrix::zeros(npar, npar);
    let free_idx: Vec<usize> = (0..npar).filter(|&k| free[k]).collect();
    let reduced = DMatrix::from_fn(free_idx.len(), free_idx.len(), |a, b| {
        jtj[(free_idx[a], free_idx[b])]
    });
    if let Some(inv) = reduced.clone().try_inverse() {
        for (a, &ka) in free_idx.iter().enumerate() {
            for (b, &kb) in free_idx.iter().enumerate() {
                vcv[(ka, kb)] = inv[(a, b)];
            }
        }
    }
    let (rcond, rank) = if free_idx.is_empty() {
        (0.0, 0)
    } else {
        let singular = reduced.singular_values();
        let (smax, smin) = (singular.max(), singular.min());
        let rcond = if smax > 0.0 { (smin / smax).sqrt() } else { 0.0 };
        (rcond, singular.iter().filter(|s| **s > smax * 1e-12).count())
    };

    let mut put = |offset: c_int, values: &[f64]| {
        let start = to_usize(offset);
        work[start..start + values.len()].copy_from_slice(values);
    };
    let eps: Vec<f64> = fit.residual.iter().map(|r| -r).collect();
    let sd: Vec<f64> = (0..npar).map(|k| (vcv[(k, k)] * rvar).sqrt()).collect();
    // Column-major of a symmetric matrix equals its row-major form.
    put(real.eps, &eps);
    put(real.xplus, ev.x);
    put(real.fn_, &fit.fitted);
    put(real.sd, &sd);
    put(real.vcv, vcv.as_slice());
    put(real.rvar, &[rvar]);
    put(real.wss, &[wss]);
    put(real.wssde, &[0.0]);
    put(real.wssep, &[wss]);
    put(real.rcond, &[rcond]);
    put(real.partl, &[controls.partol]);
    put(real.sstol, &[controls.sstol]);
    put(real.taufc, &[1.0]);

    let mut iput = |offset: c_int, value: usize| {
        iwork[to_usize(offset)] = c_int::try_from(value).unwrap_or(c_int::MAX);
    };
    iput(integer.niter, fit.niter);
    iput(integer.nfev, ev.nfev);
    iput(integer.njev, ev.njev);
    iput(integer.irank, nfree - rank);
    iput(integer.maxit, controls.maxit);
}

impl OdrLibrary for FakeOdrpack {
    fn name(&self) -> &str {
        "fake-odrpack"
    }

    unsafe fn odr(&self, fcn: OdrFcn, args: &mut RawArgs<'_>) -> c_int {
        self.solves.fetch_add(1, Ordering::SeqCst);
        *self.routing.lock() = Some(UnitRouting {
            lunrpt: args.lunrpt,
            lunerr: args.lunerr,
            placeholder_workspace: args.lwork == 1 && args.liwork == 1,
        });

        let dims = Dimensions::new(
            to_usize(args.n),
            to_usize(args.m),
            to_usize(args.npar),
            to_usize(args.nq),
        );
        let Dimensions { n, m, npar, nq } = dims;
        // SAFETY: the caller guarantees the buffers match the dimensions.
        let (beta, x, y) = unsafe {
            (
                std::slice::from_raw_parts_mut(args.beta, npar),
                std::slice::from_raw_parts(args.x, n * m),
                std::slice::from_raw_parts(args.y, n * nq),
            )
        };
        let free: Vec<bool> = if args.ifixb.is_null() {
            vec![true; npar]
        } else {
            // SAFETY: `ifixb` has `npar` entries when present.
            unsafe { std::slice::from_raw_parts(args.ifixb, npar) }
                .iter()
                .map(|&fix| fix != 0)
                .collect()
        };

        let mut ev = Evaluator {
            fcn,
            n: args.n,
            m: args.m,
            npar: args.npar,
            nq: args.nq,
            ldifx: args.ldifx,
            x,
            ifixb: args.ifixb,
            ifixx: args.ifixx,
            f: vec![0.0; nq * n],
            fjacb: vec![0.0; nq * npar * n],
            fjacd: vec![0.0; nq * m * n],
            nfev: 0,
            njev: 0,
        };

        if let Some(script) = &self.script {
            return self.replay(&mut ev, beta, script);
        }

        let job = args.job.unwrap_or(0);
        let controls = Controls {
            user_jacobian: (job / 10) % 10 >= 2,
            maxit: args.maxit.map_or(50, to_usize),
            sstol: args.sstol.unwrap_or(f64::EPSILON.sqrt()),
            partol: args.partol.unwrap_or(f64::EPSILON.powf(2.0 / 3.0)),
        };
        let fit = match gauss_newton(&mut ev, beta, y, &free, &controls) {
            Step::Done(fit) => fit,
            Step::Stopped => return INFO_USER_STOP,
        };

        let real = real_index(dims);
        let integer = integer_index(m, npar, nq);
        if args.has_workspace()
            && args.lwork >= real.lwkmn
            && args.liwork >= integer.liwkmn
        {
            let (lwork, liwork) = (to_usize(args.lwork), to_usize(args.liwork));
            let work_ptr: *mut c_double = args.work_ptr();
            let iwork_ptr: *mut c_int = args.iwork_ptr();
            // SAFETY: the caller passes work arrays of the stated lengths.
            let (work, iwork) = unsafe {
                (
                    std::slice::from_raw_parts_mut(work_ptr, lwork),
                    std::slice::from_raw_parts_mut(iwork_ptr, liwork),
                )
            };
            write_results(work, iwork, &real, &integer, &fit, &ev, &free, &controls);
        }
        fit.info
    }

    fn workspace_dimensions(&self, dims: Dimensions, _isodr: bool) -> Result<(usize, usize)> {
        let lwork = to_usize(real_index(dims).lwkmn);
        let liwork = to_usize(integer_index(dims.m, dims.npar, dims.nq).liwkmn);
        Ok((lwork, liwork))
    }

    fn integer_workspace_index(
        &self,
        m: usize,
        npar: usize,
        nq: usize,
    ) -> Result<IntegerWorkspaceIndex> {
        Ok(integer_index(m, npar, nq))
    }

    fn real_workspace_index(
        &self,
        dims: Dimensions,
        _ldwe: usize,
        _ld2we: usize,
        _isodr: bool,
    ) -> Result<RealWorkspaceIndex> {
        Ok(real_index(dims))
    }

    fn open_unit(&self, path: &Path) -> std::result::Result<c_int, LibraryError> {
        if self.fail_open_on.as_deref() == Some(path) {
            return Err(LibraryError::OpenFile(2));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(self.next_unit.fetch_add(1, Ordering::SeqCst))
    }

    fn close_unit(&self, lun: c_int) -> std::result::Result<(), LibraryError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(LibraryError::CloseFile {
                unit: lun,
                status: 1,
            });
        }
        Ok(())
    }
}

//! Named offsets into the solver's real and integer work arrays.
//!
//! Both records are filled by the library's own layout routines (`dwinf_c`,
//! `diwinf_c`); nothing here recomputes the layout. All offsets are 0-based.

use std::ffi::c_int;

use serde::{Deserialize, Serialize};

use crate::call::Dimensions;
use crate::error::Result;
use crate::library::OdrLibrary;

/// Storage locations within the integer work array `iwork`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegerWorkspaceIndex {
    pub msgb: c_int,
    pub msgd: c_int,
    pub ifix2: c_int,
    pub istop: c_int,
    pub nnzw: c_int,
    pub npp: c_int,
    pub idf: c_int,
    pub job: c_int,
    pub iprin: c_int,
    pub luner: c_int,
    pub lunrp: c_int,
    pub nrow: c_int,
    pub ntol: c_int,
    pub neta: c_int,
    pub maxit: c_int,
    pub niter: c_int,
    pub nfev: c_int,
    pub njev: c_int,
    pub int2: c_int,
    pub irank: c_int,
    pub ldtt: c_int,
    pub bound: c_int,
    /// Minimum length of `iwork`, not an offset.
    pub liwkmn: c_int,
}

impl IntegerWorkspaceIndex {
    /// Every named offset, excluding the minimum length.
    pub fn offsets(&self) -> [(&'static str, c_int); 22] {
        [
            ("msgb", self.msgb),
            ("msgd", self.msgd),
            ("ifix2", self.ifix2),
            ("istop", self.istop),
            ("nnzw", self.nnzw),
            ("npp", self.npp),
            ("idf", self.idf),
            ("job", self.job),
            ("iprin", self.iprin),
            ("luner", self.luner),
            ("lunrp", self.lunrp),
            ("nrow", self.nrow),
            ("ntol", self.ntol),
            ("neta", self.neta),
            ("maxit", self.maxit),
            ("niter", self.niter),
            ("nfev", self.nfev),
            ("njev", self.njev),
            ("int2", self.int2),
            ("irank", self.irank),
            ("ldtt", self.ldtt),
            ("bound", self.bound),
        ]
    }
}

/// Storage locations within the real work array `work`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealWorkspaceIndex {
    pub delta: c_int,
    pub eps: c_int,
    pub xplus: c_int,
    #[serde(rename = "fn")]
    pub fn_: c_int,
    pub sd: c_int,
    pub vcv: c_int,
    pub rvar: c_int,
    pub wss: c_int,
    pub wssde: c_int,
    pub wssep: c_int,
    pub rcond: c_int,
    pub eta: c_int,
    pub olmav: c_int,
    pub tau: c_int,
    pub alpha: c_int,
    pub actrs: c_int,
    pub pnorm: c_int,
    pub rnors: c_int,
    pub prers: c_int,
    pub partl: c_int,
    pub sstol: c_int,
    pub taufc: c_int,
    pub epsma: c_int,
    pub beta0: c_int,
    pub betac: c_int,
    pub betas: c_int,
    pub betan: c_int,
    pub s: c_int,
    pub ss: c_int,
    pub ssf: c_int,
    pub qraux: c_int,
    pub u: c_int,
    pub fs: c_int,
    pub fjacb: c_int,
    pub we1: c_int,
    pub diff: c_int,
    pub delts: c_int,
    pub deltn: c_int,
    pub t: c_int,
    pub tt: c_int,
    pub omega: c_int,
    pub fjacd: c_int,
    pub wrk1: c_int,
    pub wrk2: c_int,
    pub wrk3: c_int,
    pub wrk4: c_int,
    pub wrk5: c_int,
    pub wrk6: c_int,
    pub wrk7: c_int,
    pub lower: c_int,
    pub upper: c_int,
    /// Minimum length of `work`, not an offset.
    pub lwkmn: c_int,
}

impl RealWorkspaceIndex {
    /// Every named offset, excluding the minimum length.
    pub fn offsets(&self) -> [(&'static str, c_int); 51] {
        [
            ("delta", self.delta),
            ("eps", self.eps),
            ("xplus", self.xplus),
            ("fn", self.fn_),
            ("sd", self.sd),
            ("vcv", self.vcv),
            ("rvar", self.rvar),
            ("wss", self.wss),
            ("wssde", self.wssde),
            ("wssep", self.wssep),
            ("rcond", self.rcond),
            ("eta", self.eta),
            ("olmav", self.olmav),
            ("tau", self.tau),
            ("alpha", self.alpha),
            ("actrs", self.actrs),
            ("pnorm", self.pnorm),
            ("rnors", self.rnors),
            ("prers", self.prers),
            ("partl", self.partl),
            ("sstol", self.sstol),
            ("taufc", self.taufc),
            ("epsma", self.epsma),
            ("beta0", self.beta0),
            ("betac", self.betac),
            ("betas", self.betas),
            ("betan", self.betan),
            ("s", self.s),
            ("ss", self.ss),
            ("ssf", self.ssf),
            ("qraux", self.qraux),
            ("u", self.u),
            ("fs", self.fs),
            ("fjacb", self.fjacb),
            ("we1", self.we1),
            ("diff", self.diff),
            ("delts", self.delts),
            ("deltn", self.deltn),
            ("t", self.t),
            ("tt", self.tt),
            ("omega", self.omega),
            ("fjacd", self.fjacd),
            ("wrk1", self.wrk1),
            ("wrk2", self.wrk2),
            ("wrk3", self.wrk3),
            ("wrk4", self.wrk4),
            ("wrk5", self.wrk5),
            ("wrk6", self.wrk6),
            ("wrk7", self.wrk7),
            ("lower", self.lower),
            ("upper", self.upper),
        ]
    }
}

/// Work array lengths together with both offset tables for one problem shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceLayout {
    pub lwork: usize,
    pub liwork: usize,
    pub real: RealWorkspaceIndex,
    pub integer: IntegerWorkspaceIndex,
}

impl WorkspaceLayout {
    /// Ask the library for the layout of a problem with the given shape.
    ///
    /// `ldwe`/`ld2we` are the leading dimensions of the `we` weights, which
    /// the real layout depends on.
    pub fn query(
        lib: &dyn OdrLibrary,
        dims: Dimensions,
        ldwe: usize,
        ld2we: usize,
        isodr: bool,
    ) -> Result<Self> {
        let _serial = crate::bridge::serialized();
        let (lwork, liwork) = lib.workspace_dimensions(dims, isodr)?;
        let integer = lib.integer_workspace_index(dims.m, dims.npar, dims.nq)?;
        let real = lib.real_workspace_index(dims, ldwe, ld2we, isodr)?;
        log::debug!(
            "workspace layout for {dims:?} (isodr={isodr}): lwork={lwork}, liwork={liwork}"
        );
        Ok(Self {
            lwork,
            liwork,
            real,
            integer,
        })
    }

    /// Names of offsets that fall outside their work array.
    pub fn out_of_bounds(&self) -> Vec<&'static str> {
        let real = self
            .real
            .offsets()
            .into_iter()
            .filter(|&(_, idx)| !in_bounds(idx, self.lwork));
        let integer = self
            .integer
            .offsets()
            .into_iter()
            .filter(|&(_, idx)| !in_bounds(idx, self.liwork));
        real.chain(integer).map(|(name, _)| name).collect()
    }

    /// True when the reported lengths cover the library's stated minimums.
    pub fn covers_minimum(&self) -> bool {
        usize::try_from(self.real.lwkmn).is_ok_and(|min| min <= self.lwork)
            && usize::try_from(self.integer.liwkmn).is_ok_and(|min| min <= self.liwork)
    }
}

fn in_bounds(idx: c_int, len: usize) -> bool {
    usize::try_from(idx).is_ok_and(|idx| idx < len)
}

/// Borrow `len` values of `work` starting at `offset`.
pub fn segment<T>(work: &[T], offset: c_int, len: usize) -> Option<&[T]> {
    let start = usize::try_from(offset).ok()?;
    work.get(start..start.checked_add(len)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_tables_skip_minimum_lengths() {
        let real = RealWorkspaceIndex::default();
        let integer = IntegerWorkspaceIndex::default();
        assert!(real.offsets().iter().all(|(name, _)| *name != "lwkmn"));
        assert!(integer.offsets().iter().all(|(name, _)| *name != "liwkmn"));
        assert_eq!(real.offsets().len() + 1, 52);
        assert_eq!(integer.offsets().len() + 1, 23);
    }

    #[test]
    fn records_match_c_struct_size() {
        assert_eq!(
            std::mem::size_of::<RealWorkspaceIndex>(),
            52 * std::mem::size_of::<c_int>()
        );
        assert_eq!(
            std::mem::size_of::<IntegerWorkspaceIndex>(),
            23 * std::mem::size_of::<c_int>()
        );
    }

    #[test]
    fn out_of_bounds_reports_offending_names() {
        let mut layout = WorkspaceLayout {
            lwork: 10,
            liwork: 4,
            real: RealWorkspaceIndex::default(),
            integer: IntegerWorkspaceIndex::default(),
        };
        assert!(layout.out_of_bounds().is_empty());

        layout.real.vcv = 10;
        layout.integer.nfev = -1;
        assert_eq!(layout.out_of_bounds(), vec!["vcv", "nfev"]);
    }

    #[test]
    fn segment_is_bounds_checked() {
        let work = [0.0, 1.0, 2.0, 3.0];
        assert_eq!(segment(&work, 1, 2), Some(&work[1..3]));
        assert_eq!(segment(&work, 3, 2), None);
        assert_eq!(segment(&work, -1, 1), None);
    }

    #[test]
    fn serializes_fn_field_under_its_solver_name() {
        let index = RealWorkspaceIndex {
            fn_: 7,
            ..Default::default()
        };
        let json = serde_json::to_string(&index).expect("serialize index");
        assert!(json.contains("\"fn\":7"));
    }
}

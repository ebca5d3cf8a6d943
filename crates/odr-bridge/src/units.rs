//! Fortran I/O units for the solver's report and error streams.

use std::ffi::c_int;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{BridgeError, Result};
use crate::library::OdrLibrary;

/// Fortran unit preconnected to standard output.
pub const STDOUT_UNIT: c_int = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitRole {
    Report,
    Error,
}

impl fmt::Display for UnitRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitRole::Report => write!(f, "report"),
            UnitRole::Error => write!(f, "error"),
        }
    }
}

/// Units routed to one solve. Opened units are closed on drop.
pub struct ReportUnits<'l> {
    lib: &'l dyn OdrLibrary,
    lunrpt: c_int,
    lunerr: c_int,
    opened: Vec<c_int>,
}

impl<'l> ReportUnits<'l> {
    /// Open the report and error files. `None` routes that stream to
    /// standard output; equal paths share a single unit.
    pub fn open(
        lib: &'l dyn OdrLibrary,
        rptfile: Option<&Path>,
        errfile: Option<&Path>,
    ) -> Result<Self> {
        let mut units = Self {
            lib,
            lunrpt: STDOUT_UNIT,
            lunerr: STDOUT_UNIT,
            opened: Vec::new(),
        };

        if let Some(path) = rptfile {
            units.lunrpt = units.open_one(UnitRole::Report, path)?;
        }
        if let Some(path) = errfile {
            units.lunerr = if rptfile == Some(path) {
                units.lunrpt
            } else {
                units.open_one(UnitRole::Error, path)?
            };
        }

        log::debug!(
            "{}: report -> unit {}, errors -> unit {}",
            lib.name(),
            units.lunrpt,
            units.lunerr
        );
        Ok(units)
    }

    // On failure `self` is dropped by the caller, closing whatever was
    // opened before.
    fn open_one(&mut self, role: UnitRole, path: &Path) -> Result<c_int> {
        let lun = self
            .lib
            .open_unit(path)
            .map_err(|source| BridgeError::OpenUnit {
                role,
                path: PathBuf::from(path),
                source,
            })?;
        self.opened.push(lun);
        Ok(lun)
    }

    pub fn report(&self) -> c_int {
        self.lunrpt
    }

    pub fn error(&self) -> c_int {
        self.lunerr
    }

    /// Number of units this value opened and will close.
    pub fn opened(&self) -> usize {
        self.opened.len()
    }
}

impl Drop for ReportUnits<'_> {
    fn drop(&mut self) {
        for lun in self.opened.drain(..) {
            if let Err(err) = self.lib.close_unit(lun) {
                log::warn!("{}: {err}", self.lib.name());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeOdrpack;

    #[test]
    fn defaults_to_stdout_without_opening() {
        let lib = FakeOdrpack::new();
        let units = ReportUnits::open(&lib, None, None).expect("open units");
        assert_eq!((units.report(), units.error()), (STDOUT_UNIT, STDOUT_UNIT));
        drop(units);
        assert_eq!((lib.opens(), lib.closes()), (0, 0));
    }

    #[test]
    fn equal_paths_share_one_unit() {
        let lib = FakeOdrpack::new();
        let path = Path::new("odr.log");
        let units = ReportUnits::open(&lib, Some(path), Some(path)).expect("open units");
        assert_eq!(units.report(), units.error());
        assert_ne!(units.report(), STDOUT_UNIT);
        drop(units);
        assert_eq!((lib.opens(), lib.closes()), (1, 1));
    }

    #[test]
    fn error_only_leaves_report_on_stdout() {
        let lib = FakeOdrpack::new();
        let units = ReportUnits::open(&lib, None, Some(Path::new("err.txt"))).expect("open units");
        assert_eq!(units.report(), STDOUT_UNIT);
        assert_ne!(units.error(), STDOUT_UNIT);
        assert_eq!(units.opened(), 1);
    }

    #[test]
    fn failed_open_closes_earlier_units() {
        let lib = FakeOdrpack::new().fail_open_on("err.txt");
        let err = ReportUnits::open(&lib, Some(Path::new("rpt.txt")), Some(Path::new("err.txt")))
            .err()
            .expect("second open must fail");
        assert!(matches!(
            err,
            BridgeError::OpenUnit {
                role: UnitRole::Error,
                ..
            }
        ));
        assert_eq!((lib.opens(), lib.closes()), (1, 1));
    }

    #[test]
    fn close_failure_is_not_fatal() {
        let lib = FakeOdrpack::new().fail_close();
        let units = ReportUnits::open(&lib, Some(Path::new("rpt.txt")), None).expect("open units");
        drop(units);
        assert_eq!(lib.closes(), 1);
    }
}

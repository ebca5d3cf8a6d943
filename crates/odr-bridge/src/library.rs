//! The solver library seam.
//!
//! `OdrLibrary` is everything the bridge needs from ODRPACK95. `Odrpack`
//! implements it over a shared library loaded at runtime; tests use
//! `testing::FakeOdrpack`.

use std::ffi::{CString, c_int};
use std::path::{Path, PathBuf};

use libloading::Library;

use crate::call::Dimensions;
use crate::config::LibraryConfig;
use crate::error::{LibraryError, Result};
use crate::ffi::{OdrFcn, OdrpackApi, SYMBOLS};
use crate::layout::{IntegerWorkspaceIndex, RealWorkspaceIndex};
use crate::marshal::{RawArgs, to_c_int};

pub trait OdrLibrary {
    /// Name used in log messages.
    fn name(&self) -> &str;

    /// Run `odr_long_c` with the callback `fcn` and return `info`.
    ///
    /// # Safety
    ///
    /// Every pointer in `args` must be valid for the dimensions it carries,
    /// and `fcn` must not unwind.
    unsafe fn odr(&self, fcn: OdrFcn, args: &mut RawArgs<'_>) -> c_int;

    /// Minimum `(lwork, liwork)` for a problem of this shape.
    fn workspace_dimensions(&self, dims: Dimensions, isodr: bool) -> Result<(usize, usize)>;

    fn integer_workspace_index(
        &self,
        m: usize,
        npar: usize,
        nq: usize,
    ) -> Result<IntegerWorkspaceIndex>;

    fn real_workspace_index(
        &self,
        dims: Dimensions,
        ldwe: usize,
        ld2we: usize,
        isodr: bool,
    ) -> Result<RealWorkspaceIndex>;

    /// Open `path` as a new Fortran unit.
    fn open_unit(&self, path: &Path) -> std::result::Result<c_int, LibraryError>;

    fn close_unit(&self, lun: c_int) -> std::result::Result<(), LibraryError>;
}

/// ODRPACK95 loaded from a shared library.
pub struct Odrpack {
    api: OdrpackApi,
    name: String,
    // Keeps the function pointers in `api` valid.
    _library: Option<Library>,
}

impl Odrpack {
    /// Load the library at `path` and resolve every routine.
    pub fn load(path: impl AsRef<Path>) -> std::result::Result<Self, LibraryError> {
        let path = path.as_ref();
        // SAFETY: loading runs the library's initializers; the caller chose
        // the file.
        let library = unsafe { Library::new(path) }.map_err(|e| LibraryError::LoadFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        // SAFETY: each symbol is read with the type of its bind(C) interface.
        let api = unsafe {
            OdrpackApi {
                odr_long_c: symbol(&library, path, SYMBOLS[0])?,
                workspace_dimensions_c: symbol(&library, path, SYMBOLS[1])?,
                diwinf_c: symbol(&library, path, SYMBOLS[2])?,
                dwinf_c: symbol(&library, path, SYMBOLS[3])?,
                open_file: symbol(&library, path, SYMBOLS[4])?,
                close_file: symbol(&library, path, SYMBOLS[5])?,
            }
        };

        log::debug!("loaded ODRPACK95 from {}", path.display());
        Ok(Self {
            api,
            name: path.display().to_string(),
            _library: Some(library),
        })
    }

    /// Load from the first candidate of `config` that succeeds.
    pub fn from_config(config: &LibraryConfig) -> std::result::Result<Self, LibraryError> {
        let candidates = config.candidates();
        let mut tried = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            match Self::load(candidate) {
                Ok(lib) => return Ok(lib),
                Err(err @ LibraryError::SymbolNotFound { .. }) => return Err(err),
                Err(err) => {
                    log::trace!("{err}");
                    tried.push(candidate.display().to_string());
                }
            }
        }
        Err(LibraryError::NotFound { tried })
    }

    /// Wrap a function table that is already linked into the process.
    ///
    /// # Safety
    ///
    /// Every pointer in `api` must match the ODRPACK95 bind(C) interface and
    /// stay valid for the lifetime of the returned value.
    pub unsafe fn from_api(api: OdrpackApi, name: impl Into<String>) -> Self {
        Self {
            api,
            name: name.into(),
            _library: None,
        }
    }
}

unsafe fn symbol<T: Copy>(
    library: &Library,
    path: &Path,
    name: &str,
) -> std::result::Result<T, LibraryError> {
    // SAFETY: forwarded to the caller.
    unsafe { library.get::<T>(name.as_bytes()) }
        .map(|sym| *sym)
        .map_err(|_| LibraryError::SymbolNotFound {
            path: path.to_path_buf(),
            symbol: name.to_string(),
        })
}

impl OdrLibrary for Odrpack {
    fn name(&self) -> &str {
        &self.name
    }

    unsafe fn odr(&self, fcn: OdrFcn, args: &mut RawArgs<'_>) -> c_int {
        let mut info: c_int = 0;
        let work = args.work_ptr();
        let iwork = args.iwork_ptr();
        // SAFETY: forwarded to the caller of `odr`.
        unsafe {
            (self.api.odr_long_c)(
                fcn,
                &args.n,
                &args.m,
                &args.npar,
                &args.nq,
                &args.ldwe,
                &args.ld2we,
                &args.ldwd,
                &args.ld2wd,
                &args.ldifx,
                &args.ldstpd,
                &args.ldscld,
                &args.lwork,
                &args.liwork,
                args.beta,
                args.y,
                args.x,
                args.we,
                args.wd,
                args.ifixb,
                args.ifixx,
                args.stpb,
                args.stpd,
                args.sclb,
                args.scld,
                args.delta,
                args.lower,
                args.upper,
                work,
                iwork,
                args.job_ptr(),
                args.ndigit_ptr(),
                args.taufac_ptr(),
                args.sstol_ptr(),
                args.partol_ptr(),
                args.maxit_ptr(),
                args.iprint_ptr(),
                &args.lunerr,
                &args.lunrpt,
                &mut info,
            );
        }
        info
    }

    fn workspace_dimensions(&self, dims: Dimensions, isodr: bool) -> Result<(usize, usize)> {
        let (n, m, npar, nq) = c_dims(dims)?;
        let mut lwork: c_int = 0;
        let mut liwork: c_int = 0;
        // SAFETY: scalar in/out arguments only.
        unsafe {
            (self.api.workspace_dimensions_c)(
                &n,
                &m,
                &npar,
                &nq,
                &isodr,
                &mut lwork,
                &mut liwork,
            );
        }
        Ok((
            usize::try_from(lwork).unwrap_or(0),
            usize::try_from(liwork).unwrap_or(0),
        ))
    }

    fn integer_workspace_index(
        &self,
        m: usize,
        npar: usize,
        nq: usize,
    ) -> Result<IntegerWorkspaceIndex> {
        let m = to_c_int("m", m)?;
        let npar = to_c_int("npar", npar)?;
        let nq = to_c_int("nq", nq)?;
        let mut index = IntegerWorkspaceIndex::default();
        // SAFETY: `index` has the layout of the C struct.
        unsafe { (self.api.diwinf_c)(&m, &npar, &nq, &mut index) };
        Ok(index)
    }

    fn real_workspace_index(
        &self,
        dims: Dimensions,
        ldwe: usize,
        ld2we: usize,
        isodr: bool,
    ) -> Result<RealWorkspaceIndex> {
        let (n, m, npar, nq) = c_dims(dims)?;
        let ldwe = to_c_int("ldwe", ldwe)?;
        let ld2we = to_c_int("ld2we", ld2we)?;
        let mut index = RealWorkspaceIndex::default();
        // SAFETY: `index` has the layout of the C struct.
        unsafe { (self.api.dwinf_c)(&n, &m, &npar, &nq, &ldwe, &ld2we, &isodr, &mut index) };
        Ok(index)
    }

    fn open_unit(&self, path: &Path) -> std::result::Result<c_int, LibraryError> {
        let c_path = path
            .to_str()
            .and_then(|s| CString::new(s).ok())
            .ok_or_else(|| LibraryError::InvalidPath(PathBuf::from(path)))?;
        let mut lun: c_int = 0;
        let mut ierr: c_int = 0;
        // SAFETY: `c_path` is NUL-terminated and outlives the call.
        unsafe { (self.api.open_file)(c_path.as_ptr(), &mut lun, &mut ierr) };
        if ierr != 0 {
            return Err(LibraryError::OpenFile(ierr));
        }
        Ok(lun)
    }

    fn close_unit(&self, lun: c_int) -> std::result::Result<(), LibraryError> {
        let mut ierr: c_int = 0;
        // SAFETY: scalar arguments only.
        unsafe { (self.api.close_file)(&lun, &mut ierr) };
        if ierr != 0 {
            return Err(LibraryError::CloseFile {
                unit: lun,
                status: ierr,
            });
        }
        Ok(())
    }
}

fn c_dims(dims: Dimensions) -> Result<(c_int, c_int, c_int, c_int)> {
    Ok((
        to_c_int("n", dims.n)?,
        to_c_int("m", dims.m)?,
        to_c_int("npar", dims.npar)?,
        to_c_int("nq", dims.nq)?,
    ))
}

//! Bridge to the ODRPACK95 orthogonal distance regression solver.
//!
//! This crate provides:
//! - **Callback trampoline** letting the Fortran solver call Rust closures
//!   (`CallbackSet`), with deliberate-stop and error translation at the
//!   foreign boundary
//! - **Argument marshaling** from borrowed buffers (`OdrCall`) to the raw
//!   `odr_long_c` argument list, null for every absent option
//! - **Report/error unit lifecycle** around each solve
//! - **Workspace layout** records (`WorkspaceLayout`) filled by the library's
//!   own layout routines
//! - **Runtime loading** of the shared library (`Odrpack`, `LibraryConfig`)
//! - **Test double** for the library (`testing`, enable with `testing` feature)
//!
//! The numerical method itself lives entirely in the external library.

mod bridge;
pub mod call;
pub mod config;
pub mod error;
pub mod ffi;
pub mod layout;
pub mod library;
pub mod marshal;
pub mod status;
mod trampoline;
pub mod units;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use bridge::odr;
pub use call::{Dimensions, LeadingDims, OdrCall};
pub use config::LibraryConfig;
pub use error::{BridgeError, DynError, LibraryError, ModelError, Result};
pub use layout::{IntegerWorkspaceIndex, RealWorkspaceIndex, WorkspaceLayout};
pub use library::{OdrLibrary, Odrpack};
pub use status::StopReason;
pub use trampoline::{CallbackSet, EvalRequest, ModelFn, XPlusD, binding_active};
pub use units::{ReportUnits, STDOUT_UNIT, UnitRole};

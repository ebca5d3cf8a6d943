//! Orthogonal distance regression with argument validation.
//!
//! `odr_fit::odr` takes `nalgebra` matrices and a [`FitOptions`] record,
//! checks them against the problem dimensions, runs the solver through
//! `odr-bridge` and returns an [`OdrResult`] with the fitted parameters and
//! the solver's statistics.
//!
//! ```no_run
//! use nalgebra::{DMatrix, DVector};
//! use odr_bridge::{CallbackSet, LibraryConfig, Odrpack};
//! use odr_fit::{FitOptions, odr};
//!
//! let lib = Odrpack::from_config(&LibraryConfig::from_env())?;
//! let x = DMatrix::from_row_slice(1, 4, &[0.0, 1.0, 2.0, 3.0]);
//! let y = DMatrix::from_row_slice(1, 4, &[1.0, 3.1, 4.9, 7.0]);
//! let mut model = CallbackSet::new(|beta, x| {
//!     Ok((0..x.n()).map(|i| beta[0] + beta[1] * x.value(0, i)).collect())
//! });
//! let fit = odr(&lib, &mut model, &DVector::from_vec(vec![1.0, 1.0]), &y, &x, &FitOptions::default())?;
//! println!("{}: beta = {}", fit.stop_reason, fit.beta);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod driver;
pub mod error;
pub mod job;
pub mod options;
pub mod result;

pub use driver::odr;
pub use error::{FitError, Result};
pub use job::{Covariance, Derivatives, FitMethod, Job};
pub use options::{FitOptions, Weight, XValues};
pub use result::OdrResult;

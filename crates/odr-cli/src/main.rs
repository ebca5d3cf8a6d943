use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use nalgebra::{DMatrix, DVector};
use odr_bridge::{
    CallbackSet, Dimensions, LibraryConfig, ModelError, OdrLibrary, Odrpack, WorkspaceLayout,
    XPlusD,
};
use odr_fit::FitOptions;
use serde::Deserialize;

fn usage() {
    eprintln!("usage: odr-cli layout <n> <m> <npar> <nq> [--ols]");
    eprintln!("       odr-cli fit <data.json>");
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Layout { dims: Dimensions, ols: bool },
    Fit { data: PathBuf },
}

fn parse_args(args: &[String]) -> Option<Command> {
    match args {
        [cmd, n, m, npar, nq, rest @ ..] if cmd == "layout" => {
            let ols = match rest {
                [] => false,
                [flag] if flag == "--ols" => true,
                _ => return None,
            };
            let dims = Dimensions::new(
                n.parse().ok()?,
                m.parse().ok()?,
                npar.parse().ok()?,
                nq.parse().ok()?,
            );
            Some(Command::Layout { dims, ols })
        }
        [cmd, data] if cmd == "fit" => Some(Command::Fit {
            data: PathBuf::from(data),
        }),
        _ => None,
    }
}

/// Contents of a `fit` data file.
#[derive(Debug, Deserialize)]
struct FitInput {
    /// One row per explanatory variable.
    x: Vec<Vec<f64>>,
    y: Vec<f64>,
    beta0: Option<Vec<f64>>,
    degree: usize,
    #[serde(default)]
    options: FitOptions,
}

/// `beta[0] + beta[1] * x + ... + beta[k] * x^k` in the first variable.
fn polynomial(beta: &[f64], x: &XPlusD<'_>) -> Result<Vec<f64>, ModelError> {
    Ok((0..x.n())
        .map(|i| {
            let xi = x.value(0, i);
            beta.iter().rev().fold(0.0, |acc, b| acc * xi + b)
        })
        .collect())
}

fn load_library() -> Result<Odrpack, Box<dyn Error>> {
    let lib = Odrpack::from_config(&LibraryConfig::from_env())?;
    log::info!("using {}", lib.name());
    Ok(lib)
}

fn run_layout(dims: Dimensions, ols: bool) -> Result<String, Box<dyn Error>> {
    let lib = load_library()?;
    let layout = WorkspaceLayout::query(&lib, dims, 1, 1, !ols)?;
    let bad = layout.out_of_bounds();
    if !bad.is_empty() {
        log::warn!("offsets outside the work arrays: {}", bad.join(", "));
    }
    Ok(serde_json::to_string_pretty(&layout)?)
}

fn run_fit(data: &Path) -> Result<String, Box<dyn Error>> {
    let text = std::fs::read_to_string(data)?;
    let input: FitInput = serde_json::from_str(&text)?;

    let m = input.x.len();
    let n = input.y.len();
    if m == 0 || input.x.iter().any(|row| row.len() != n) {
        return Err(format!("`x` must have rows of {n} values, like `y`").into());
    }
    let x = DMatrix::from_fn(m, n, |j, i| input.x[j][i]);
    let y = DMatrix::from_row_slice(1, n, &input.y);
    let beta0 = DVector::from_vec(
        input
            .beta0
            .unwrap_or_else(|| vec![1.0; input.degree + 1]),
    );
    if beta0.len() != input.degree + 1 {
        return Err(format!(
            "a degree {} polynomial has {} coefficients, `beta0` has {}",
            input.degree,
            input.degree + 1,
            beta0.len()
        )
        .into());
    }

    let lib = load_library()?;
    let mut callbacks = CallbackSet::new(polynomial);
    let result = odr_fit::odr(&lib, &mut callbacks, &beta0, &y, &x, &input.options)?;
    log::info!("{} ({} iterations)", result.stop_reason, result.niter);
    Ok(serde_json::to_string_pretty(&result)?)
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = parse_args(&args) else {
        usage();
        return ExitCode::from(2);
    };

    let output = match command {
        Command::Layout { dims, ols } => run_layout(dims, ols),
        Command::Fit { data } => run_fit(&data),
    };
    match output {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(1)
        }
    }
}

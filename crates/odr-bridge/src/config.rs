//! Where to find the ODRPACK95 shared library.

use std::ffi::OsStr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Environment variable naming the library file directly.
pub const LIBRARY_ENV: &str = "ODRPACK_LIBRARY";
/// Environment variable listing extra directories to search.
pub const LIBRARY_PATH_ENV: &str = "ODRPACK_LIBRARY_PATH";
/// Base name of the library, before platform prefix and extension.
pub const DEFAULT_LIBRARY_NAME: &str = "odrpack95";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Explicit library file. Skips the search when set.
    pub path: Option<PathBuf>,
    /// Library base name used when searching.
    pub name: String,
    /// Directories searched before the system defaults.
    pub search_paths: Vec<PathBuf>,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            path: None,
            name: DEFAULT_LIBRARY_NAME.to_string(),
            search_paths: Vec::new(),
        }
    }
}

impl LibraryConfig {
    /// Read `ODRPACK_LIBRARY` and `ODRPACK_LIBRARY_PATH`.
    pub fn from_env() -> Self {
        let path = std::env::var_os(LIBRARY_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        let search_paths = std::env::var_os(LIBRARY_PATH_ENV)
            .map(|v| split_search_path(&v))
            .unwrap_or_default();
        Self {
            path,
            search_paths,
            ..Self::default()
        }
    }

    /// File names tried for the library, most specific first.
    pub fn candidates(&self) -> Vec<PathBuf> {
        if let Some(path) = &self.path {
            return vec![path.clone()];
        }

        let file_names = platform_file_names(&self.name);
        let mut dirs = self.search_paths.clone();
        dirs.extend(default_search_paths());

        let mut candidates: Vec<PathBuf> = dirs
            .iter()
            .flat_map(|dir| file_names.iter().map(move |f| dir.join(f)))
            .collect();
        // Bare names last: let the system loader apply its own search.
        candidates.extend(file_names.into_iter().map(PathBuf::from));
        candidates
    }
}

/// Split a `PATH`-style list with the platform's separator.
fn split_search_path(value: &OsStr) -> Vec<PathBuf> {
    std::env::split_paths(value)
        .filter(|p| !p.as_os_str().is_empty())
        .collect()
}

fn platform_file_names(name: &str) -> Vec<String> {
    let (prefixes, extensions): (&[&str], &[&str]) = if cfg!(target_os = "windows") {
        (&["", "lib"], &["dll"])
    } else if cfg!(target_os = "macos") {
        (&["lib"], &["dylib", "so"])
    } else {
        (&["lib"], &["so"])
    };
    prefixes
        .iter()
        .flat_map(|p| extensions.iter().map(move |e| format!("{p}{name}.{e}")))
        .collect()
}

fn default_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd);
    }
    #[cfg(target_os = "linux")]
    {
        paths.extend(["/usr/local/lib", "/usr/lib", "/usr/lib64"].map(PathBuf::from));
    }
    #[cfg(target_os = "macos")]
    {
        paths.extend(["/opt/homebrew/lib", "/usr/local/lib"].map(PathBuf::from));
    }
    paths
}

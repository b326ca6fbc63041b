//! Executable lookup through the `PATH` environment variable.
//!
//! The item being looked up does not have to be an executable and may
//! contain subdirectories; it only has to exist below one of the roots.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Name of the search-path variable consulted by [`find_in_path`]
pub const SEARCH_PATH_VAR: &str = "PATH";

/// Directory guessed when a command cannot be found in the search path
pub const SYSTEM_BIN_DIR: &str = "/usr/bin";

/// Find `name` under one of the roots listed in the current `PATH`.
///
/// Roots are tried left to right and the first existing candidate wins.
/// An unset `PATH` simply means nothing is found.
pub fn find_in_path(name: impl AsRef<Path>) -> Option<PathBuf> {
    let search_path = std::env::var_os(SEARCH_PATH_VAR);
    find_in_search_path(name, search_path.as_deref())
}

/// Find `name` under one of the roots of an explicit search-path value.
pub fn find_in_search_path(name: impl AsRef<Path>, search_path: Option<&OsStr>) -> Option<PathBuf> {
    let name = name.as_ref();
    let search_path = search_path?;

    std::env::split_paths(search_path)
        .filter(|root| !root.as_os_str().is_empty())
        .map(|root| root.join(name))
        .find(|candidate| candidate.exists())
}

/// Find `name` in the current `PATH`, falling back to a literal path.
pub fn find_or(name: impl AsRef<Path>, fallback: impl Into<PathBuf>) -> PathBuf {
    find_in_path(name).unwrap_or_else(|| fallback.into())
}

/// The conventional location of a system binary, used as a last guess.
pub fn system_fallback(name: impl AsRef<Path>) -> PathBuf {
    Path::new(SYSTEM_BIN_DIR).join(name)
}

//! Extension name resolution.
//!
//! An absolute path is used as-is. Any other name is looked up in each
//! candidate directory in turn, trying the bare name, then the name with the
//! platform library suffix, then the platform library naming convention
//! (`lib<name>.so`, `<name>.dll`, ...). The first existing, readable file
//! wins.

use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::path::{Path, PathBuf};

use crate::error::{BridgeError, Result};

/// File names tried for `name`, in order.
pub fn candidate_file_names(name: &str) -> Vec<String> {
    let mut names = vec![name.to_string()];
    for candidate in [
        format!("{}{}", name, DLL_SUFFIX),
        format!("{}{}{}", DLL_PREFIX, name, DLL_SUFFIX),
    ] {
        if !names.contains(&candidate) {
            names.push(candidate);
        }
    }
    names
}

/// Resolve `name` against `dirs`. The returned path is canonical, so it can
/// be used as a cache key.
pub fn resolve<'a, I>(name: &str, dirs: I) -> Result<PathBuf>
where
    I: IntoIterator<Item = &'a Path>,
{
    if name.is_empty() {
        return Err(BridgeError::NotFound {
            name: String::new(),
            searched: Vec::new(),
        });
    }

    let direct = Path::new(name);
    if direct.is_absolute() {
        return if is_readable_file(direct) {
            Ok(canonical(direct))
        } else {
            Err(BridgeError::NotFound {
                name: name.to_string(),
                searched: vec![direct.to_path_buf()],
            })
        };
    }

    let file_names = candidate_file_names(name);
    let mut searched = Vec::new();
    for dir in dirs {
        for file_name in &file_names {
            let candidate = dir.join(file_name);
            if is_readable_file(&candidate) {
                return Ok(canonical(&candidate));
            }
            searched.push(candidate);
        }
    }

    Err(BridgeError::NotFound {
        name: name.to_string(),
        searched,
    })
}

/// Whether `path` looks like a native library for this platform.
pub fn is_native_library(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.ends_with(DLL_SUFFIX))
        .unwrap_or(false)
}

/// Library files present in `dirs`, in directory order then by name.
pub fn discover<'a, I>(dirs: I) -> Vec<PathBuf>
where
    I: IntoIterator<Item = &'a Path>,
{
    let mut found = Vec::new();
    for dir in dirs {
        let Ok(entries) = std::fs::read_dir(dir) else {
            continue;
        };
        let mut in_dir: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| is_native_library(p) && is_readable_file(p))
            .collect();
        in_dir.sort();
        for path in in_dir {
            let path = canonical(&path);
            if !found.contains(&path) {
                found.push(path);
            }
        }
    }
    found
}

/// Derive an extension name from a library path (`libecho.so` -> `echo`).
pub fn name_from_path(path: &Path) -> Option<String> {
    let file_name = path.file_name()?.to_str()?;
    let stem = file_name.strip_suffix(DLL_SUFFIX).unwrap_or(file_name);
    let stem = if DLL_PREFIX.is_empty() {
        stem
    } else {
        stem.strip_prefix(DLL_PREFIX).unwrap_or(stem)
    };
    Some(stem.to_string())
}

pub(crate) fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn is_readable_file(path: &Path) -> bool {
    path.is_file() && std::fs::File::open(path).is_ok()
}

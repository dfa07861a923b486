//! Wire-relative path handling.
//!
//! A wire path is always relative to a participant root: `/`-separated, no
//! leading separator, no `.` or `..` components. Converting in either direction
//! is purely lexical; nothing here touches the filesystem.

use std::path::{Component, Path, PathBuf};

use crate::WireError;

/// Convert `path` (under `root`) into its wire form.
pub fn to_wire_path(root: &Path, path: &Path) -> Result<String, WireError> {
    let relative = path.strip_prefix(root).map_err(|_| {
        WireError::InvalidPath(format!(
            "{} is not under {}",
            path.display(),
            root.display()
        ))
    })?;

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str().ok_or_else(|| {
                    WireError::InvalidPath(format!("non UTF-8 path: {}", path.display()))
                })?;
                parts.push(part);
            }
            Component::CurDir => {}
            other => {
                return Err(WireError::InvalidPath(format!(
                    "disallowed component {:?} in {}",
                    other,
                    path.display()
                )))
            }
        }
    }

    if parts.is_empty() {
        return Err(WireError::InvalidPath(format!(
            "{} names the root itself",
            path.display()
        )));
    }
    Ok(parts.join("/"))
}

/// Resolve a wire path received from a peer to a location under `root`.
///
/// Both `/` and `\` are accepted as separators. Absolute paths, parent
/// components, drive prefixes and NUL bytes are rejected.
pub fn resolve_wire_path(root: &Path, wire: &str) -> Result<PathBuf, WireError> {
    if wire.contains('\0') {
        return Err(WireError::InvalidPath("path contains NUL byte".into()));
    }
    if wire.starts_with('/') || wire.starts_with('\\') {
        return Err(WireError::InvalidPath(format!("absolute path: {wire}")));
    }

    let mut resolved = root.to_path_buf();
    let mut depth = 0usize;
    for part in wire.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => return Err(WireError::InvalidPath(format!("parent component in {wire}"))),
            part if part.contains(':') => {
                return Err(WireError::InvalidPath(format!("prefix component in {wire}")))
            }
            part => {
                resolved.push(part);
                depth += 1;
            }
        }
    }

    if depth == 0 {
        return Err(WireError::InvalidPath(format!("empty path: {wire:?}")));
    }
    Ok(resolved)
}

/// Prefix a wire path with another participant's name (used for shared files).
pub fn prefixed_wire_path(prefix: &str, wire: &str) -> String {
    format!("{prefix}/{wire}")
}

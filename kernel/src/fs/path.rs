//! Path grammar and normalization.
//!
//! Paths are `/`-separated, components at most [`MAX_NAME`] bytes, whole
//! paths at most [`MAX_PATH`] bytes, no embedded NUL. `.` and `..` are
//! resolved textually here, before any filesystem sees the path.

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::FsError;

/// Maximum bytes in one path component.
pub const MAX_NAME: usize = 32;

/// Maximum bytes in a whole path.
pub const MAX_PATH: usize = 256;

/// Normalize an absolute path.
///
/// Collapses repeated separators, resolves `.` and `..` textually
/// (`..` at the root stays at the root), strips trailing slashes, and
/// enforces the grammar limits.
pub fn normalize_path(input: &str) -> Result<String, FsError> {
    if input.is_empty() || !input.starts_with('/') {
        return Err(FsError::InvalidPath);
    }
    if input.len() > MAX_PATH {
        return Err(FsError::NameTooLong);
    }
    if input.bytes().any(|b| b == 0) {
        return Err(FsError::InvalidPath);
    }

    let mut stack: Vec<&str> = Vec::new();
    for component in input.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                // Textual parent; clamped at the root.
                stack.pop();
            }
            name => {
                if name.len() > MAX_NAME {
                    return Err(FsError::NameTooLong);
                }
                stack.push(name);
            }
        }
    }

    let mut out = String::with_capacity(input.len());
    if stack.is_empty() {
        out.push('/');
    } else {
        for name in stack {
            out.push('/');
            out.push_str(name);
        }
    }
    if out.len() > MAX_PATH {
        return Err(FsError::NameTooLong);
    }
    Ok(out)
}

/// Iterate the components of a normalized path.
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty())
}

/// Split a normalized path into (parent, last component).
///
/// `/a/b/c` -> (`/a/b`, `c`); `/c` -> (`/`, `c`). The root itself has no
/// parent and is an error.
pub fn split_parent(path: &str) -> Result<(&str, &str), FsError> {
    if path == "/" {
        return Err(FsError::InvalidPath);
    }
    let pos = path.rfind('/').ok_or(FsError::InvalidPath)?;
    let name = &path[pos + 1..];
    if name.is_empty() {
        return Err(FsError::InvalidPath);
    }
    let parent = if pos == 0 { "/" } else { &path[..pos] };
    Ok((parent, name))
}

/// Whether `mountpoint` is a prefix of `path` on component boundaries.
///
/// `/mnt` covers `/mnt` and `/mnt/x` but never `/mntx`.
pub fn is_component_prefix(mountpoint: &str, path: &str) -> bool {
    if mountpoint == "/" {
        return true;
    }
    if !path.starts_with(mountpoint) {
        return false;
    }
    match path.as_bytes().get(mountpoint.len()) {
        None => true,
        Some(b'/') => true,
        Some(_) => false,
    }
}

/// The remainder of `path` below `mountpoint`, as a relative path
/// without a leading slash (empty for the mountpoint itself).
pub fn strip_mountpoint<'a>(mountpoint: &str, path: &'a str) -> &'a str {
    let rest = if mountpoint == "/" {
        path
    } else {
        &path[mountpoint.len()..]
    };
    rest.trim_start_matches('/')
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use alloc::format;

    #[test]
    fn test_normalize_spec_example() {
        assert_eq!(normalize_path("/a//b/./c/../d").unwrap(), "/a/b/d");
    }

    #[test]
    fn test_normalize_root_cases() {
        assert_eq!(normalize_path("/").unwrap(), "/");
        assert_eq!(normalize_path("//").unwrap(), "/");
        assert_eq!(normalize_path("/..").unwrap(), "/");
        assert_eq!(normalize_path("/../..").unwrap(), "/");
        assert_eq!(normalize_path("/a/..").unwrap(), "/");
    }

    #[test]
    fn test_normalize_trailing_slash() {
        assert_eq!(normalize_path("/a/b/").unwrap(), "/a/b");
    }

    #[test]
    fn test_normalize_rejects_relative_and_nul() {
        assert_eq!(normalize_path("a/b"), Err(FsError::InvalidPath));
        assert_eq!(normalize_path(""), Err(FsError::InvalidPath));
        assert_eq!(normalize_path("/a\0b"), Err(FsError::InvalidPath));
    }

    #[test]
    fn test_normalize_enforces_limits() {
        let long_component = format!("/{}", "x".repeat(MAX_NAME + 1));
        assert_eq!(normalize_path(&long_component), Err(FsError::NameTooLong));

        let long_path = format!("/{}", "ab/".repeat(120));
        assert_eq!(normalize_path(&long_path), Err(FsError::NameTooLong));

        // Exactly at the component limit is fine.
        let ok_component = format!("/{}", "x".repeat(MAX_NAME));
        assert!(normalize_path(&ok_component).is_ok());
    }

    #[test]
    fn test_normalize_idempotent() {
        for input in ["/a//b/./c/../d", "/x/y/z", "/", "/a/../b/../c"] {
            let once = normalize_path(input).unwrap();
            let twice = normalize_path(&once).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_split_parent() {
        assert_eq!(split_parent("/a/b/c").unwrap(), ("/a/b", "c"));
        assert_eq!(split_parent("/c").unwrap(), ("/", "c"));
        assert!(split_parent("/").is_err());
    }

    #[test]
    fn test_component_prefix_boundaries() {
        assert!(is_component_prefix("/", "/anything"));
        assert!(is_component_prefix("/mnt", "/mnt"));
        assert!(is_component_prefix("/mnt", "/mnt/x"));
        assert!(is_component_prefix("/mnt/x", "/mnt/x/foo"));
        // Never on mid-component matches.
        assert!(!is_component_prefix("/mnt", "/mntx"));
        assert!(!is_component_prefix("/mnt/x", "/mnt/xy"));
    }

    #[test]
    fn test_strip_mountpoint() {
        assert_eq!(strip_mountpoint("/", "/a/b"), "a/b");
        assert_eq!(strip_mountpoint("/mnt", "/mnt"), "");
        assert_eq!(strip_mountpoint("/mnt", "/mnt/x/foo"), "x/foo");
    }
}

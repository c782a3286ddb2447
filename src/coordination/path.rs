use crate::Error;
use crate::Result;

pub const ROOT_PATH: &str = "/";

/// Checks the service's path grammar: absolute, no empty segment,
/// no trailing slash, no `.`/`..` segment.
pub fn validate_path(path: &str) -> Result<()> {
    let invalid = |reason| {
        Err(Error::InvalidPath {
            path: path.to_string(),
            reason,
        })
    };

    if path.is_empty() {
        return invalid("path must not be empty");
    }
    if !path.starts_with('/') {
        return invalid("path must start with /");
    }
    if path == ROOT_PATH {
        return Ok(());
    }
    if path.ends_with('/') {
        return invalid("path must not end with /");
    }
    if path.contains('\0') {
        return invalid("null character not allowed");
    }
    for segment in path[1..].split('/') {
        match segment {
            "" => return invalid("empty segment"),
            "." | ".." => return invalid("relative segment"),
            _ => {}
        }
    }
    Ok(())
}

/// Parent path, `None` for the root
pub fn parent_path(path: &str) -> Option<&str> {
    if path == ROOT_PATH {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT_PATH),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Final segment, empty for the root
pub fn node_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

pub fn join_path(
    parent: &str,
    child: &str,
) -> String {
    if parent == ROOT_PATH {
        format!("/{child}")
    } else {
        format!("{parent}/{child}")
    }
}

/// Levels between `root` and `path`: 0 for `root` itself, `None` when
/// `path` is outside the subtree.
pub fn depth_below(
    root: &str,
    path: &str,
) -> Option<usize> {
    if path == root {
        return Some(0);
    }
    let rest = if root == ROOT_PATH {
        path.strip_prefix('/')?
    } else {
        path.strip_prefix(root)?.strip_prefix('/')?
    };
    if rest.is_empty() {
        return None;
    }
    Some(rest.split('/').count())
}

/// Proper ancestors excluding the root, shallowest first.
/// `/a/b/c` yields `/a`, `/a/b`.
pub fn ancestors(path: &str) -> Vec<&str> {
    path.match_indices('/')
        .map(|(idx, _)| idx)
        .filter(|idx| *idx > 0)
        .map(|idx| &path[..idx])
        .collect()
}

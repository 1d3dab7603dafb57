//! Lexical helpers for mountpoint paths. Nothing here touches the filesystem.

/// Returns the shortest path lexically equivalent to `path`: repeated
/// separators are collapsed, `.` elements dropped and `..` elements resolved
/// against their parent. `..` at the root of an absolute path stays at the
/// root. An empty result becomes `.`.
pub fn clean_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|last| *last != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_owned(),
        (false, false) => joined,
    }
}

/// A path is canonical when cleaning it does not change it.
pub fn is_canonical(path: &str) -> bool {
    clean_path(path) == path
}

pub fn is_absolute(path: &str) -> bool {
    path.starts_with('/')
}

/// Returns whether `path` equals `prefix` or lies below it, comparing whole
/// path elements only.
pub fn has_path_prefix(path: &str, prefix: &str) -> bool {
    if prefix == "/" {
        return is_absolute(path);
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

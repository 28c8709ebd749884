//! Remote path handling
//!
//! Remote paths are always `/`-separated and absolute inside an allocation,
//! independent of the local platform.

use crate::SdkError;
use sha3::{Digest, Sha3_256};
use std::path::Path;

pub const SEPARATOR: char = '/';

/// Lexically clean a remote path
///
/// Collapses repeated separators, drops `.` segments and resolves `..`
/// against the preceding segment. A rooted path never climbs above `/`.
/// The empty path cleans to `.`.
pub fn clean(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }

    let rooted = path.starts_with(SEPARATOR);
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split(SEPARATOR) {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.last().is_some_and(|s| *s != "..") {
                    segments.pop();
                } else if !rooted {
                    segments.push("..");
                }
            }
            s => segments.push(s),
        }
    }

    let joined = segments.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Is the (cleaned) path absolute inside the allocation?
pub fn is_abs(path: &str) -> bool {
    path.starts_with(SEPARATOR)
}

/// Clean `path` and require it to be absolute
pub fn validate(path: &str) -> Result<String, SdkError> {
    if path.is_empty() {
        return Err(SdkError::InvalidPath("path is empty".into()));
    }
    let cleaned = clean(path);
    if !is_abs(&cleaned) {
        return Err(SdkError::InvalidPath(format!(
            "path should be valid and absolute: {path}"
        )));
    }
    Ok(cleaned)
}

/// Resolve the remote destination of an upload
///
/// The path is cleaned first. A remote path ending in `/`, or one that
/// cleans to the root, names a directory; the local file name is appended
/// to it.
pub fn full_remote_path(local: &Path, remote: &str) -> String {
    let names_dir = remote.is_empty() || remote.ends_with(SEPARATOR);
    let cleaned = clean(remote);
    if !names_dir && cleaned != "/" {
        return cleaned;
    }

    let file_name = local
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    join(&cleaned, &file_name)
}

/// Last segment of a remote path
pub fn file_name(path: &str) -> &str {
    path.rsplit(SEPARATOR).next().unwrap_or(path)
}

/// Parent directory of a cleaned absolute path (`/` for top-level entries)
pub fn parent(path: &str) -> &str {
    match path.rfind(SEPARATOR) {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Join a directory and a single name
pub fn join(dir: &str, name: &str) -> String {
    if dir.ends_with(SEPARATOR) {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Lookup hash of a path inside an allocation
///
/// This is the identifier blobbers index objects by and the value auth
/// tickets carry instead of the plain path.
pub fn lookup_hash(allocation_id: &str, path: &str) -> String {
    let digest = Sha3_256::digest(format!("{allocation_id}:{path}").as_bytes());
    hex::encode(digest)
}

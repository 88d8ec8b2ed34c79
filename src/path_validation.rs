//! Path validation for every path that ends up in an rclone argument vector.
//!
//! Both checks run on the raw string and again after one round of
//! percent-decoding, so `%2e%2e/` and `%24HOME` are caught the same way as
//! their literal forms.

use std::path::Path;

use percent_encoding::percent_decode_str;

use crate::transfer_error::TransferError;

/// Maximum allowed path length for security
const MAX_PATH_LENGTH: usize = 4096;

/// Characters that must never reach an argument vector.
const FORBIDDEN_CHARS: &[char] = &['\0', '\n', '\r', '`', '$', ';', '&', '|', '>', '<'];

/// Validate a local filesystem path and return its normalized form.
pub fn validate_local_path(path: &str) -> Result<String, TransferError> {
    if path.trim().is_empty() {
        return Err(TransferError::InvalidPath {
            path: path.to_string(),
        });
    }
    check_path(path)?;
    Ok(normalize(path))
}

/// Validate the path part of a remote specification (the text after
/// `<connection>:`). An empty path addresses the remote root.
pub fn validate_remote_path(path: &str) -> Result<String, TransferError> {
    check_path(path)?;
    Ok(normalize(path))
}

/// Validate that a path exists and is accessible
pub fn verify_path_exists(path: &Path) -> Result<(), String> {
    if !path.exists() {
        return Err(format!("Path does not exist: {}", path.display()));
    }

    Ok(())
}

fn check_path(path: &str) -> Result<(), TransferError> {
    if path.len() > MAX_PATH_LENGTH {
        return Err(TransferError::InvalidPath {
            path: truncate_for_report(path),
        });
    }

    check_raw(path, path)?;

    let decoded = percent_decode_str(path).decode_utf8_lossy();
    if decoded != path {
        check_raw(&decoded, path)?;
    }

    Ok(())
}

/// `candidate` is what gets inspected, `original` is what gets reported.
fn check_raw(candidate: &str, original: &str) -> Result<(), TransferError> {
    if candidate.contains(FORBIDDEN_CHARS) {
        return Err(TransferError::InvalidPath {
            path: original.to_string(),
        });
    }

    if candidate.contains("..") || contains_encoded_dot(candidate) {
        return Err(TransferError::PathTraversal {
            path: original.to_string(),
        });
    }

    Ok(())
}

/// Matches `%2e` in any letter case.
fn contains_encoded_dot(s: &str) -> bool {
    s.as_bytes()
        .windows(3)
        .any(|w| w[0] == b'%' && w[1] == b'2' && (w[2] == b'e' || w[2] == b'E'))
}

/// Collapse repeated separators and drop a trailing one (except for `/`).
fn normalize(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut prev_slash = false;
    for c in path.chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(c);
    }
    while out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

fn truncate_for_report(path: &str) -> String {
    let mut end = 64.min(path.len());
    while !path.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &path[..end])
}

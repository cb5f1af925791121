//! Path validation utilities for preventing path traversal attacks.
//!
//! Every path handed to us by an evidence bundle (archive member names,
//! remote search results, plugin fetch requests) is validated here before
//! it is used to build a staging destination, so a hostile bundle cannot
//! write outside the staging area.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::SourceError;

/// Separates a rewritten segment from the digest of its original name.
const RENAMED_SEGMENT_MARKER: char = '~';

/// Validates a bundle-relative path and returns its normalized form.
///
/// Backslashes are treated as separators, `.` and empty segments are
/// dropped. The path is rejected if it is empty, absolute, carries a drive
/// letter, contains NUL bytes or any `..` segment.
///
/// # Examples
///
/// ```
/// use evidence_seeker::security::path_validator::validate_relative_path;
///
/// assert_eq!(validate_relative_path("./data//app.db").unwrap(), "data/app.db");
/// assert!(validate_relative_path("../../etc/passwd").is_err());
/// ```
pub fn validate_relative_path(path: &str) -> Result<String, SourceError> {
    if path.contains('\0') {
        return Err(SourceError::invalid_path(path, "path contains null bytes"));
    }

    let unified = path.replace('\\', "/");
    if unified.starts_with('/') {
        return Err(SourceError::invalid_path(path, "absolute paths are not allowed"));
    }
    if unified.len() >= 2 && unified.as_bytes()[1] == b':' {
        return Err(SourceError::invalid_path(path, "drive-qualified paths are not allowed"));
    }

    let mut segments = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(SourceError::invalid_path(
                    path,
                    "path traversal attempt detected: path contains '..'",
                ))
            }
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        return Err(SourceError::invalid_path(path, "path is empty"));
    }

    Ok(segments.join("/"))
}

/// Builds the staging destination for a bundle-relative path.
///
/// Each segment is made safe for the local filesystem with
/// [`staging_component`], and the result is guaranteed to stay under
/// `staging_root`. Distinct relative paths always map to distinct
/// destinations.
pub fn staging_destination(staging_root: &Path, path: &str) -> Result<PathBuf, SourceError> {
    let normalized = validate_relative_path(path)?;

    let mut destination = staging_root.to_path_buf();
    for segment in normalized.split('/') {
        destination.push(staging_component(segment));
    }

    if !destination.starts_with(staging_root) {
        return Err(SourceError::invalid_path(path, "resolved path escapes staging area"));
    }

    Ok(destination)
}

/// Local name for one bundle path segment.
///
/// Segments that [`sanitize_component`] leaves untouched and that do not
/// contain `~` are used verbatim. Anything else gets `~` plus the first
/// eight hex digits of the SHA-256 of the original segment inserted before
/// its extension, so `a?b.txt` and `a_b.txt` stage to different files.
pub fn staging_component(segment: &str) -> String {
    let sanitized = sanitize_component(segment);
    if sanitized == segment && !segment.contains(RENAMED_SEGMENT_MARKER) {
        return sanitized;
    }

    let digest = format!("{:x}", Sha256::digest(segment.as_bytes()));
    let tag = format!("{}{}", RENAMED_SEGMENT_MARKER, &digest[..8]);
    match sanitized.rfind('.') {
        Some(dot) if dot > 0 && sanitized[..dot].chars().any(|c| c != '.') => {
            format!("{}{}{}", &sanitized[..dot], tag, &sanitized[dot..])
        }
        _ => format!("{}{}", sanitized, tag),
    }
}

/// Sanitizes a single path segment to remove potentially dangerous characters.
///
/// Characters that are illegal in Windows filenames are replaced with `_`,
/// NUL bytes are removed and control characters are replaced.
pub fn sanitize_component(segment: &str) -> String {
    let mut sanitized = String::with_capacity(segment.len());

    for ch in segment.chars() {
        match ch {
            '\0' => continue,
            '/' | '\\' | '<' | '>' | ':' | '"' | '|' | '?' | '*' => sanitized.push('_'),
            c if c.is_control() => sanitized.push('_'),
            c => sanitized.push(c),
        }
    }

    // Don't allow only dots
    if sanitized.chars().all(|c| c == '.') {
        sanitized = format!("_{}", sanitized);
    }

    sanitized
}

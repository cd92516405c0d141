//! Validation of caller-declared upload attributes.

use crate::{Error, Result};
use time::OffsetDateTime;

/// Prefix under which every asset object lives in the content store.
pub const OBJECT_KEY_PREFIX: &str = "assets/";

/// Validate a caller-supplied filename.
///
/// Returns the trimmed filename. Rejects empty names, `.`/`..`, path separators,
/// control characters and names longer than `max_len` characters.
pub fn validate_filename(filename: &str, max_len: usize) -> Result<String> {
    let trimmed = filename.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidFilename("filename cannot be empty".to_string()));
    }
    if trimmed.chars().count() > max_len {
        return Err(Error::InvalidFilename(format!(
            "filename exceeds {max_len} characters"
        )));
    }
    if trimmed == "." || trimmed == ".." {
        return Err(Error::InvalidFilename(format!("reserved name: {trimmed}")));
    }
    if trimmed.contains(['/', '\\']) {
        return Err(Error::InvalidFilename(
            "filename cannot contain path separators".to_string(),
        ));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(Error::InvalidFilename(
            "filename cannot contain control characters".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

/// Reduce a validated filename to a conservative object-key segment.
pub fn sanitize_filename(filename: &str) -> String {
    let sanitized: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let sanitized = sanitized.trim_start_matches('.');
    if sanitized.is_empty() {
        "file".to_string()
    } else {
        sanitized.to_string()
    }
}

/// Lowercase a declared content type and strip any parameters.
pub fn normalize_content_type(content_type: &str) -> Result<String> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    let Some((major, minor)) = essence.split_once('/') else {
        return Err(Error::InvalidContentType(format!(
            "expected type/subtype, got {content_type:?}"
        )));
    };
    let token_ok = |s: &str| {
        !s.is_empty()
            && s.chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | '.' | '_'))
    };
    if !token_ok(major) || !token_ok(minor) {
        return Err(Error::InvalidContentType(format!(
            "malformed content type {content_type:?}"
        )));
    }
    Ok(essence)
}

/// Check a normalized content type against an allow-list of exact types and
/// `major/*` wildcards.
pub fn content_type_allowed(content_type: &str, allowed: &[String]) -> bool {
    allowed.iter().any(|pattern| {
        let pattern = pattern.trim().to_ascii_lowercase();
        match pattern.strip_suffix("/*") {
            Some(major) => content_type
                .split_once('/')
                .is_some_and(|(m, _)| m == major),
            None => pattern == content_type,
        }
    })
}

/// Build the content-store key for a new asset.
///
/// `random_hex` must come from a cryptographically random source; the filename only
/// contributes a readable suffix.
pub fn build_object_key(now: OffsetDateTime, random_hex: &str, filename: &str) -> String {
    format!(
        "{OBJECT_KEY_PREFIX}{:04}/{:02}/{random_hex}/{}",
        now.year(),
        u8::from(now.month()),
        sanitize_filename(filename)
    )
}

/// Validate a storage key received from outside (grant redemption, listings).
pub fn validate_object_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidObjectKey("key cannot be empty".to_string()));
    }
    if key.starts_with('/') || key.contains('\\') || key.contains('\0') {
        return Err(Error::InvalidObjectKey(format!("invalid key: {key}")));
    }
    if key.split('/').any(|segment| segment.is_empty() || segment == "." || segment == "..") {
        return Err(Error::InvalidObjectKey(format!(
            "key contains empty or relative segments: {key}"
        )));
    }
    Ok(())
}

//! Credential scrubbing utilities for preventing sensitive data exposure.
//!
//! Remote evidence servers are reached with bearer tokens; error messages
//! bubbling up from the HTTP stack can echo request URLs and headers. Every
//! message that leaves the remote backend goes through [`scrub_credentials`]
//! before it is logged or stored in a run summary.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Regex patterns for detecting various types of credentials
    static ref CREDENTIAL_PATTERNS: Vec<(Regex, &'static str)> = vec![
        // Authorization headers, with or without the Bearer scheme
        (Regex::new(r"(?i)(authorization)\s*[:=]\s*(bearer\s+)?([A-Za-z0-9\-._~+/]+=*)").unwrap(),
         "$1=<REDACTED_TOKEN>"),

        // Bare bearer tokens
        (Regex::new(r"(?i)(bearer)\s+([A-Za-z0-9\-._~+/]+=*)").unwrap(),
         "$1 <REDACTED_TOKEN>"),

        // Tokens passed as query parameters
        (Regex::new(r"(?i)([?&](?:token|access_token|api_key|apikey|key)=)[^&\s]+").unwrap(),
         "$1<REDACTED>"),

        // Basic auth in URLs
        (Regex::new(r"(https?://)([^:/\s@]+):([^@/\s]+)@").unwrap(),
         "$1<REDACTED_USER>:<REDACTED_PASS>@"),
    ];
}

/// Scrub credentials from a string.
///
/// # Example
///
/// ```
/// use evidence_seeker::security::credential_scrubber::scrub_credentials;
///
/// let input = "GET failed with Authorization: Bearer abc123";
/// assert_eq!(scrub_credentials(input), "GET failed with Authorization=<REDACTED_TOKEN>");
/// ```
pub fn scrub_credentials(input: &str) -> String {
    let mut result = input.to_string();

    for (pattern, replacement) in CREDENTIAL_PATTERNS.iter() {
        result = pattern.replace_all(&result, *replacement).to_string();
    }

    result
}

/// Removes every literal occurrence of a known secret, then applies the
/// generic patterns.
pub fn redact_secret(input: &str, secret: Option<&str>) -> String {
    let literal = match secret {
        Some(s) if !s.is_empty() => input.replace(s, "<REDACTED_TOKEN>"),
        _ => input.to_string(),
    };
    scrub_credentials(&literal)
}

/// Create a safe error message that scrubs credentials.
pub fn safe_error_message(context: &str, error: &impl std::fmt::Display) -> String {
    let raw_message = format!("{}: {}", context, error);
    scrub_credentials(&raw_message)
}

//! Classification of remote failures.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("not found")]
    NotFound,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("permission denied: {0}")]
    Auth(String),

    #[error("conflicting update")]
    Conflict,

    #[error("payload rejected as too large")]
    TooLarge,

    #[error("{0}")]
    Other(String),
}

impl RemoteError {
    /// What the user should do about it.
    pub fn remediation(&self) -> &'static str {
        match self {
            RemoteError::NotFound => "Run with --list to see the stored profiles.",
            RemoteError::RateLimited => "The API rate limit was hit; wait a few minutes and try again.",
            RemoteError::Auth(_) => {
                "Run `gh auth refresh -s gist` and make sure the active account owns the profile collection."
            }
            RemoteError::Conflict => "The collection changed while updating it; run the command again.",
            RemoteError::TooLarge => "Retry with --skip-projects or remove large files from the configuration directory.",
            RemoteError::Other(_) => "Check your network connection and that `gh` works, then try again.",
        }
    }
}

/// Patterns checked in order; the first hit wins. Rate limiting comes
/// before auth because GitHub reports it as HTTP 403.
static RULES: Lazy<Vec<(Regex, Kind)>> = Lazy::new(|| {
    [
        (r"(?i)rate limit|HTTP 429|too many requests", Kind::RateLimited),
        (r"(?i)HTTP 404|not found", Kind::NotFound),
        (
            r"(?i)HTTP 401|HTTP 403|bad credentials|scope|permission|forbidden|not logged in|authentication|must have admin rights",
            Kind::Auth,
        ),
        (r"(?i)HTTP 409|conflict", Kind::Conflict),
        (r"(?i)HTTP 422|too large|unprocessable|exceeds the maximum", Kind::TooLarge),
    ]
    .into_iter()
    .map(|(pattern, kind)| (Regex::new(pattern).expect("Invalid failure pattern"), kind))
    .collect()
});

#[derive(Debug, Clone, Copy)]
enum Kind {
    RateLimited,
    NotFound,
    Auth,
    Conflict,
    TooLarge,
}

/// Map diagnostic output of the API client to a failure class.
pub fn classify_diagnostic(text: &str) -> RemoteError {
    let summary = first_line(text);

    for (pattern, kind) in RULES.iter() {
        if pattern.is_match(text) {
            return match kind {
                Kind::RateLimited => RemoteError::RateLimited,
                Kind::NotFound => RemoteError::NotFound,
                Kind::Auth => RemoteError::Auth(summary),
                Kind::Conflict => RemoteError::Conflict,
                Kind::TooLarge => RemoteError::TooLarge,
            };
        }
    }

    RemoteError::Other(if summary.is_empty() {
        "remote request failed".to_string()
    } else {
        summary
    })
}

/// Map an HTTP status from a direct download.
pub fn classify_status(status: u16, body: &str) -> RemoteError {
    match status {
        404 => RemoteError::NotFound,
        429 => RemoteError::RateLimited,
        409 => RemoteError::Conflict,
        422 => RemoteError::TooLarge,
        401 | 403 => classify_diagnostic(&format!("HTTP {}: {}", status, body)),
        _ => RemoteError::Other(format!("HTTP {}", status)),
    }
}

fn first_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("")
        .to_string()
}

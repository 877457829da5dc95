//! Credential redaction for log output.
//!
//! Cookies and bearer tokens never reach a log line in the clear,
//! regardless of verbosity settings.

const SENSITIVE_HEADERS: &[&str] = &["authorization", "cookie", "set-cookie", "x-api-key"];

const REDACTED: &str = "<redacted>";

pub fn is_sensitive_header(name: &str) -> bool {
    SENSITIVE_HEADERS
        .iter()
        .any(|candidate| name.eq_ignore_ascii_case(candidate))
}

/// Replace sensitive header values in-place, keeping names visible.
pub fn redact_headers(headers: &mut Vec<(String, String)>) {
    for (name, value) in headers.iter_mut() {
        if is_sensitive_header(name) {
            *value = REDACTED.to_string();
        }
    }
}

/// Display form for a secret: first four characters plus length, enough to
/// tell credentials apart in logs without exposing them.
pub fn fingerprint(secret: &str) -> String {
    if secret.is_empty() {
        return "<empty>".to_string();
    }
    let prefix: String = secret.chars().take(4).collect();
    format!("{prefix}…({})", secret.len())
}

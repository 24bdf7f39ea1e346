//! Pure helpers: URL joining, error body parsing (no HTTP, no status logic).

/// Normalize a base URL so suffixes can be appended directly.
pub(crate) fn normalize_base_url(base: &str) -> String {
    if base.ends_with('/') {
        base.to_string()
    } else {
        format!("{}/", base)
    }
}

/// Full identifier for a suffix.
pub(crate) fn join_handle(prefix: &str, suffix: &str) -> String {
    format!("{}{}", prefix, suffix)
}

/// Extract a readable message from a registry error body.
///
/// The registry answers errors with `{"responseCode": N, "message": "..."}`;
/// falls back to the response code, then to the raw body (truncated).
pub(crate) fn parse_error_body(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(message) = json.get("message").and_then(|v| v.as_str()) {
            return message.to_string();
        }
        if let Some(code) = json.get("responseCode").and_then(|v| v.as_i64()) {
            return format!("responseCode {}", code);
        }
    }

    if body.is_empty() {
        "no message provided".to_string()
    } else {
        body.chars().take(200).collect()
    }
}

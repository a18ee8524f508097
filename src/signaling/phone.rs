//! Phone number and identity clean-up shared by the browser session and the
//! webhook handlers.

use once_cell::sync::Lazy;
use regex::Regex;

static NON_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\D").expect("valid regex"));
static NOT_IDENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_]").expect("valid regex"));

/// Longest client identity the voice provider accepts.
const MAX_IDENTITY_LEN: usize = 121;

/// Best-effort US-centric E.164 formatting.
///
/// A leading `+` is kept (formatting stripped). Otherwise 10 digits get `+1`,
/// 11 digits starting with `1` get `+`, and anything else is returned as given.
pub fn normalize_us_number(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let digits = NON_DIGITS.replace_all(trimmed, "");
    if trimmed.starts_with('+') {
        return format!("+{}", digits);
    }

    match digits.len() {
        10 => format!("+1{}", digits),
        11 if digits.starts_with('1') => format!("+{}", digits),
        _ => trimmed.to_string(),
    }
}

/// Keep only digits and a leading `+`. None when no digits remain.
pub fn clean_dial_number(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let digits = NON_DIGITS.replace_all(trimmed, "");
    if digits.is_empty() {
        return None;
    }
    if trimmed.starts_with('+') {
        Some(format!("+{}", digits))
    } else {
        Some(digits.into_owned())
    }
}

/// Stable client identity derived from a user id.
pub fn sanitize_identity(user_id: &str) -> String {
    let mut identity = NOT_IDENTITY.replace_all(user_id.trim(), "_").into_owned();
    identity.truncate(MAX_IDENTITY_LEN);
    identity
}

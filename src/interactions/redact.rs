// ── Hivecore Interactions: Redaction ───────────────────────────────────────
// Secret scrubbing and length capping applied to every prompt/response
// before it reaches disk. Patterns are compiled once.

use crate::atoms::constants::{CALL_TEXT_MAX_CHARS, REDACTED_MARKER, TRUNCATION_MARKER};
use regex::Regex;
use std::sync::LazyLock;

/// Provider API keys of the `sk-…` family.
static SK_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"sk-[A-Za-z0-9]{20,}").expect("sk key pattern"));

/// Bearer tokens: `Bearer <base64ish>` in any casing.
static BEARER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)bearer\s+[A-Za-z0-9+/_\-.=]{16,}").expect("bearer pattern")
});

/// Replace secret material with a fixed marker.
pub fn redact(text: &str) -> String {
    let pass1 = SK_KEY.replace_all(text, REDACTED_MARKER);
    BEARER.replace_all(&pass1, REDACTED_MARKER).into_owned()
}

/// Cap at CALL_TEXT_MAX_CHARS characters, appending the truncation marker
/// when anything was cut.
pub fn truncate_for_storage(text: &str) -> String {
    match text.char_indices().nth(CALL_TEXT_MAX_CHARS) {
        Some((byte_idx, _)) => {
            let mut out = text[..byte_idx].to_string();
            out.push_str(TRUNCATION_MARKER);
            out
        }
        None => text.to_string(),
    }
}

/// Redact then truncate — the storage form of a prompt or response.
pub fn sanitize(text: &str) -> String {
    truncate_for_storage(&redact(text))
}

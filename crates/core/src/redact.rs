//! Pattern redaction for text that may end up in logs or user-visible error bodies.

use std::sync::OnceLock;

use regex::Regex;

pub const REDACTED: &str = "[REDACTED]";

struct Patterns {
    assignment: Regex,
    bearer: Regex,
    opaque: Regex,
}

static PATTERNS: OnceLock<Option<Patterns>> = OnceLock::new();

fn patterns() -> Option<&'static Patterns> {
    PATTERNS
        .get_or_init(|| {
            let assignment = Regex::new(
                r#"(?i)\b(password|passwd|pwd|secret|[a-z_]*api[_-]?key|[a-z_]*secret[_-]?key|key|token|[a-z_]*_token|auth_token|authorization)(\s*[=:]\s*)("[^"]*"|'[^']*'|[^\s,;&]+)"#,
            )
            .ok()?;
            let bearer = Regex::new(r"(?i)\b(bearer|basic)\s+[A-Za-z0-9._~+/=\-]+").ok()?;
            let opaque = Regex::new(r"[A-Za-z0-9+/_\-]{32,}={0,2}").ok()?;
            Some(Patterns { assignment, bearer, opaque })
        })
        .as_ref()
}

/// Masks credential-looking assignments, authorization schemes and long opaque strings.
pub fn redact_sensitive(input: &str) -> String {
    let Some(patterns) = patterns() else {
        return REDACTED.to_string();
    };

    let step = patterns.assignment.replace_all(input, format!("$1$2{REDACTED}").as_str());
    let step = patterns.bearer.replace_all(&step, format!("$1 {REDACTED}").as_str());
    patterns.opaque.replace_all(&step, REDACTED).into_owned()
}

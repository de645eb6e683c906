//! Subject parsing and matching.
//!
//! Subscribed subjects may carry `:name` segments (path params). On the
//! transport those segments become `*` wildcards; the names are kept so values
//! can be bound back from the actual subject a message arrived on.

use std::collections::BTreeMap;

/// Escape token that lets a param value carry literal dots inside one segment.
pub const DOT_ESCAPE: &str = "{dot}";

/// Catch-all tail wildcard.
pub const TAIL_WILDCARD: &str = ">";

/// Single-token wildcard.
pub const TOKEN_WILDCARD: &str = "*";

const HTTP_PREFIX: &str = "http";

/// Parsed form of a subscribed subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSubject {
    /// Transport pattern with every param segment replaced by `*`.
    pub pattern: String,
    /// First segment is literally `http`.
    pub is_http: bool,
    /// Upper-cased second segment of an HTTP subject.
    pub http_method: Option<String>,
}

impl ParsedSubject {
    /// Number of `*` segments in the pattern.
    pub fn wildcard_count(&self) -> usize {
        wildcard_count(&self.pattern)
    }
}

/// Turn a param subject into a transport pattern.
pub fn parse_subject(subject: &str) -> ParsedSubject {
    let segments: Vec<&str> = subject.split('.').collect();

    let pattern = segments
        .iter()
        .map(|s| if s.contains(':') { TOKEN_WILDCARD } else { s })
        .collect::<Vec<_>>()
        .join(".");

    let is_http = segments.first() == Some(&HTTP_PREFIX);
    let http_method = if is_http {
        segments.get(1).map(|m| m.to_uppercase())
    } else {
        None
    };

    ParsedSubject {
        pattern,
        is_http,
        http_method,
    }
}

/// Bind param values from `actual_subject` using the `:name` segments of `subscribed_subject`.
///
/// Returns `None` when the subscribed subject has no params, so callers never
/// merge an empty map over explicitly provided params.
pub fn parse_params(subscribed_subject: &str, actual_subject: &str) -> Option<BTreeMap<String, String>> {
    let actual: Vec<&str> = actual_subject.split('.').collect();
    let mut params = BTreeMap::new();

    for (i, part) in subscribed_subject.split('.').enumerate() {
        if !part.contains(':') {
            continue;
        }
        let Some(value) = actual.get(i) else { continue };
        params.insert(part.replacen(':', "", 1), value.replace(DOT_ESCAPE, "."));
    }

    if params.is_empty() {
        None
    } else {
        Some(params)
    }
}

/// NATS-style match of `subject` against `pattern`.
///
/// `>` in the pattern matches one or more remaining tokens, `*` exactly one.
/// Wildcards on the subject side are compared literally, so overlap detection
/// has to check both directions.
pub fn match_subject(subject: &str, pattern: &str) -> bool {
    if subject == pattern || pattern == TAIL_WILDCARD {
        return true;
    }

    let subject_tokens: Vec<&str> = subject.split('.').collect();
    let pattern_tokens: Vec<&str> = pattern.split('.').collect();
    let longest = subject_tokens.len().max(pattern_tokens.len());

    for i in 0..longest {
        let s = subject_tokens.get(i).copied();
        let p = pattern_tokens.get(i).copied();
        // Wildcards never stand in for an empty token; literals compare as-is.
        let has_token = s.is_some_and(|t| !t.is_empty());

        if has_token && p == Some(TAIL_WILDCARD) {
            return true;
        }

        let matched = s == p || (p == Some(TOKEN_WILDCARD) && has_token);
        if !matched {
            return false;
        }
    }

    true
}

/// True when either subject would match the other.
pub fn subjects_overlap(a: &str, b: &str) -> bool {
    match_subject(a, b) || match_subject(b, a)
}

/// Number of `*` segments in a transport pattern.
pub fn wildcard_count(pattern: &str) -> usize {
    pattern.matches(TOKEN_WILDCARD).count()
}

/// `res.<transactionId>.<subject>`: where the responder publishes its reply.
pub fn response_reply_subject(subject: &str, transaction_id: &str) -> String {
    format!("res.{transaction_id}.{subject}")
}

/// `_data_.res.<transactionId>.<subject>`: where the responder pushes response chunks.
pub fn response_data_subject(subject: &str, transaction_id: &str) -> String {
    format!("_data_.res.{transaction_id}.{subject}")
}

/// `_data_.<transactionId>.<subject>`: where the requester pushes request chunks.
pub fn request_data_subject(subject: &str, transaction_id: &str) -> String {
    format!("_data_.{transaction_id}.{subject}")
}

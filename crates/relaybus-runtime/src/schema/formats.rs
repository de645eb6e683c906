//! `format` keyword checks, following the ajv-formats "full" set.
//!
//! Unknown format names are not an error: the engine ignores them.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

/// Outcome of a format check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatCheck {
    Valid,
    Invalid,
    /// The format does not apply to this value type.
    NotApplicable,
    Unknown,
}

impl From<bool> for FormatCheck {
    fn from(ok: bool) -> Self {
        if ok {
            FormatCheck::Valid
        } else {
            FormatCheck::Invalid
        }
    }
}

pub fn check_format(format: &str, value: &Value) -> FormatCheck {
    match value {
        Value::String(s) => check_string_format(format, s),
        Value::Number(_) => check_number_format(format, value),
        _ if is_known(format) => FormatCheck::NotApplicable,
        _ => FormatCheck::Unknown,
    }
}

fn is_known(format: &str) -> bool {
    STRING_FORMATS.contains(&format) || NUMBER_FORMATS.contains(&format)
}

const STRING_FORMATS: &[&str] = &[
    "date",
    "time",
    "date-time",
    "duration",
    "uri",
    "uri-reference",
    "uri-template",
    "url",
    "email",
    "hostname",
    "ipv4",
    "ipv6",
    "regex",
    "uuid",
    "json-pointer",
    "json-pointer-uri-fragment",
    "relative-json-pointer",
    "byte",
    "password",
    "binary",
];

const NUMBER_FORMATS: &[&str] = &["int32", "int64", "float", "double"];

fn check_string_format(format: &str, s: &str) -> FormatCheck {
    match format {
        "date" => is_date(s).into(),
        "time" => is_time(s, false).into(),
        "date-time" => is_date_time(s).into(),
        "duration" => is_duration(s).into(),
        "uri" => regex(&URI, r"(?i)^[a-z][a-z0-9+\-.]*:[^\s]*$").is_match(s).into(),
        "uri-reference" | "uri-template" => (!s.chars().any(char::is_whitespace)).into(),
        "url" => regex(&URL, r"(?i)^(?:https?|ftp)://[^\s/$.?#][^\s]*$").is_match(s).into(),
        "email" => regex(
            &EMAIL,
            r"(?i)^[a-z0-9!#$%&'*+/=?^_`{|}~-]+(?:\.[a-z0-9!#$%&'*+/=?^_`{|}~-]+)*@(?:[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\.)+[a-z0-9](?:[a-z0-9-]*[a-z0-9])?$",
        )
        .is_match(s)
        .into(),
        "hostname" => is_hostname(s).into(),
        "ipv4" => s.parse::<Ipv4Addr>().is_ok().into(),
        "ipv6" => s.parse::<Ipv6Addr>().is_ok().into(),
        "regex" => Regex::new(s).is_ok().into(),
        "uuid" => regex(
            &UUID,
            r"(?i)^(?:urn:uuid:)?[0-9a-f]{8}-(?:[0-9a-f]{4}-){3}[0-9a-f]{12}$",
        )
        .is_match(s)
        .into(),
        "json-pointer" => regex(&JSON_POINTER, r"^(?:/(?:[^~/]|~0|~1)*)*$").is_match(s).into(),
        "json-pointer-uri-fragment" => regex(
            &JSON_POINTER_FRAGMENT,
            r"(?i)^#(?:/(?:[a-z0-9_\-.!$&'()*+,;:=@]|%[0-9a-f]{2}|~0|~1)*)*$",
        )
        .is_match(s)
        .into(),
        "relative-json-pointer" => regex(
            &RELATIVE_JSON_POINTER,
            r"^(?:0|[1-9][0-9]*)(?:#|(?:/(?:[^~/]|~0|~1)*)*)$",
        )
        .is_match(s)
        .into(),
        "byte" => regex(
            &BYTE,
            r"^(?:[A-Za-z0-9+/]{4})*(?:[A-Za-z0-9+/]{2}==|[A-Za-z0-9+/]{3}=)?$",
        )
        .is_match(s)
        .into(),
        "password" | "binary" => FormatCheck::Valid,
        _ if NUMBER_FORMATS.contains(&format) => FormatCheck::NotApplicable,
        _ => FormatCheck::Unknown,
    }
}

fn check_number_format(format: &str, value: &Value) -> FormatCheck {
    match format {
        "int32" => value
            .as_i64()
            .is_some_and(|n| i32::try_from(n).is_ok())
            .into(),
        "int64" => value.as_i64().is_some().into(),
        "float" | "double" => FormatCheck::Valid,
        _ if STRING_FORMATS.contains(&format) => FormatCheck::NotApplicable,
        _ => FormatCheck::Unknown,
    }
}

static URI: OnceLock<Option<Regex>> = OnceLock::new();
static URL: OnceLock<Option<Regex>> = OnceLock::new();
static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
static UUID: OnceLock<Option<Regex>> = OnceLock::new();
static JSON_POINTER: OnceLock<Option<Regex>> = OnceLock::new();
static JSON_POINTER_FRAGMENT: OnceLock<Option<Regex>> = OnceLock::new();
static RELATIVE_JSON_POINTER: OnceLock<Option<Regex>> = OnceLock::new();
static BYTE: OnceLock<Option<Regex>> = OnceLock::new();
static DATE: OnceLock<Option<Regex>> = OnceLock::new();
static TIME: OnceLock<Option<Regex>> = OnceLock::new();
static DURATION: OnceLock<Option<Regex>> = OnceLock::new();

/// Compiled on first use. The patterns are constants, so a compile failure
/// leaves a matcher that rejects everything.
fn regex(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Matcher {
    Matcher(cell.get_or_init(|| Regex::new(pattern).ok()).as_ref())
}

struct Matcher(Option<&'static Regex>);

impl Matcher {
    fn is_match(&self, s: &str) -> bool {
        self.0.is_some_and(|re| re.is_match(s))
    }

    fn captures<'s>(&self, s: &'s str) -> Option<regex::Captures<'s>> {
        self.0.and_then(|re| re.captures(s))
    }
}

fn is_leap_year(year: u32) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

fn is_date(s: &str) -> bool {
    let Some(caps) = regex(&DATE, r"^(\d{4})-(\d{2})-(\d{2})$").captures(s) else {
        return false;
    };
    let field = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
    let (Some(year), Some(month), Some(day)) = (field(1), field(2), field(3)) else {
        return false;
    };
    let days = match month {
        2 if is_leap_year(year) => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        1..=12 => 31,
        _ => return false,
    };
    (1..=days).contains(&day)
}

fn is_time(s: &str, require_zone: bool) -> bool {
    let Some(caps) = regex(
        &TIME,
        r"(?i)^(\d{2}):(\d{2}):(\d{2}(?:\.\d+)?)(z|([+-])(\d{2})(?::?(\d{2}))?)?$",
    )
    .captures(s) else {
        return false;
    };
    let int = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
    let (Some(hour), Some(minute)) = (int(1), int(2)) else {
        return false;
    };
    let Some(second) = caps.get(3).and_then(|m| m.as_str().parse::<f64>().ok()) else {
        return false;
    };
    if caps.get(4).is_none() && require_zone {
        return false;
    }
    let zone_ok = match (caps.get(6), int(6), int(7)) {
        (None, _, _) => true,
        (Some(_), Some(tz_hour), tz_minute) => tz_hour <= 23 && tz_minute.unwrap_or(0) <= 59,
        _ => false,
    };
    hour <= 23 && minute <= 59 && second < 61.0 && zone_ok
}

fn is_date_time(s: &str) -> bool {
    let mut parts = s.splitn(2, |c: char| c == 't' || c == 'T' || c.is_whitespace());
    match (parts.next(), parts.next()) {
        (Some(date), Some(time)) => is_date(date) && is_time(time, true),
        _ => false,
    }
}

fn is_duration(s: &str) -> bool {
    if s == "P" || s.ends_with('T') {
        return false;
    }
    regex(
        &DURATION,
        r"^P(?:(?:\d+Y)?(?:\d+M)?(?:\d+D)?(?:T(?:\d+H)?(?:\d+M)?(?:\d+S)?)?|\d+W)$",
    )
    .is_match(s)
}

fn is_hostname(s: &str) -> bool {
    let name = s.strip_suffix('.').unwrap_or(s);
    if name.is_empty() || name.len() > 253 {
        return false;
    }
    name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

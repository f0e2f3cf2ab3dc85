use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::api::errors::SegmentationError;
use crate::segmentation::list_membership::ListMembership;

static OPERAND_FUNCTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^(lower|wildcard|regex|gte|gt|lte|lt|inlist)\((.*)\)$")
        .expect("operand function pattern is a valid regex")
});

/// A parsed operand of a `custom_variable` or `ua` predicate.
#[derive(Debug, Clone)]
pub enum Operand {
    Lower(String),
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    /// `wildcard(...)` with a `*` somewhere other than the ends.
    Wildcard(Regex),
    Regex(Regex),
    GreaterThan(f64),
    GreaterThanOrEqual(f64),
    LessThan(f64),
    LessThanOrEqual(f64),
    InList(String),
    Equals(String),
}

impl Operand {
    pub fn parse(raw: &Value) -> Result<Operand, SegmentationError> {
        let raw = match raw {
            Value::String(s) => s.trim().to_string(),
            Value::Object(_) | Value::Array(_) => {
                return Err(SegmentationError::MalformedNode(format!(
                    "operand must be a scalar, got {}",
                    raw
                )))
            }
            other => normalize_value(other),
        };

        let Some(captures) = OPERAND_FUNCTION.captures(&raw) else {
            return Ok(Operand::Equals(raw));
        };
        let inner = captures.get(2).map_or("", |m| m.as_str());

        match captures.get(1).map_or("", |m| m.as_str()) {
            "lower" => Ok(Operand::Lower(inner.to_string())),
            "wildcard" => parse_wildcard(inner),
            "regex" => Ok(Operand::Regex(anchored_regex(inner, false)?)),
            "gt" => Ok(Operand::GreaterThan(parse_number(inner)?)),
            "gte" => Ok(Operand::GreaterThanOrEqual(parse_number(inner)?)),
            "lt" => Ok(Operand::LessThan(parse_number(inner)?)),
            "lte" => Ok(Operand::LessThanOrEqual(parse_number(inner)?)),
            "inlist" => {
                let list_id = inner.trim();
                if list_id.is_empty() {
                    return Err(SegmentationError::MalformedNode(
                        "inlist() requires a list id".to_string(),
                    ));
                }
                Ok(Operand::InList(list_id.to_string()))
            }
            other => Err(SegmentationError::UnknownOperator(other.to_string())),
        }
    }

    pub fn requires_list_lookup(&self) -> bool {
        matches!(self, Operand::InList(_))
    }

    /// Matches the normalized `tag_value` of a property against this operand.
    pub fn matches(&self, tag_value: &str, lists: &dyn ListMembership) -> bool {
        match self {
            Operand::GreaterThan(expected) => compare_numeric(tag_value, |v| v > *expected),
            Operand::GreaterThanOrEqual(expected) => compare_numeric(tag_value, |v| v >= *expected),
            Operand::LessThan(expected) => compare_numeric(tag_value, |v| v < *expected),
            Operand::LessThanOrEqual(expected) => compare_numeric(tag_value, |v| v <= *expected),
            Operand::Regex(pattern) | Operand::Wildcard(pattern) => pattern.is_match(tag_value),
            Operand::InList(list_id) => lists.check_in_list(tag_value, list_id),
            Operand::Lower(expected) => {
                let (expected, actual) = process_values(expected, tag_value);
                expected.to_lowercase() == actual.to_lowercase()
            }
            Operand::Contains(expected) => {
                let (expected, actual) = process_values(expected, tag_value);
                actual.contains(&expected)
            }
            Operand::StartsWith(expected) => {
                let (expected, actual) = process_values(expected, tag_value);
                actual.starts_with(&expected)
            }
            Operand::EndsWith(expected) => {
                let (expected, actual) = process_values(expected, tag_value);
                actual.ends_with(&expected)
            }
            Operand::Equals(expected) => {
                let (expected, actual) = process_values(expected, tag_value);
                expected == actual
            }
        }
    }
}

/// An expected value of a parsed user-agent predicate (`os`, `device_type`, ...).
#[derive(Debug, Clone)]
pub enum UserAgentPattern {
    Exact(String),
    Wildcard(Regex),
}

impl UserAgentPattern {
    pub fn parse(raw: &str) -> Result<UserAgentPattern, SegmentationError> {
        let raw = raw.trim();
        match raw
            .strip_prefix("wildcard(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            Some(inner) => Ok(UserAgentPattern::Wildcard(wildcard_to_regex(inner, true)?)),
            None => Ok(UserAgentPattern::Exact(raw.to_string())),
        }
    }

    pub fn matches(&self, actual: &str) -> bool {
        match self {
            UserAgentPattern::Exact(expected) => expected.eq_ignore_ascii_case(actual.trim()),
            UserAgentPattern::Wildcard(pattern) => pattern.is_match(actual.trim()),
        }
    }
}

fn parse_wildcard(inner: &str) -> Result<Operand, SegmentationError> {
    let (leading, rest) = match inner.strip_prefix('*') {
        Some(rest) => (true, rest),
        None => (false, inner),
    };
    let (trailing, core) = match rest.strip_suffix('*') {
        Some(core) => (true, core),
        None => (false, rest),
    };

    if core.contains('*') {
        return Ok(Operand::Wildcard(wildcard_to_regex(inner, false)?));
    }

    let core = core.to_string();
    Ok(match (leading, trailing) {
        (true, true) => Operand::Contains(core),
        (true, false) => Operand::EndsWith(core),
        (false, true) => Operand::StartsWith(core),
        (false, false) => Operand::Equals(core),
    })
}

/// Compiles a `*` glob into an anchored regex; every other character is literal.
pub fn wildcard_to_regex(
    pattern: &str,
    case_insensitive: bool,
) -> Result<Regex, SegmentationError> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    compile(pattern, &body, case_insensitive)
}

fn anchored_regex(pattern: &str, case_insensitive: bool) -> Result<Regex, SegmentationError> {
    compile(pattern, pattern, case_insensitive)
}

fn compile(original: &str, body: &str, case_insensitive: bool) -> Result<Regex, SegmentationError> {
    let flags = if case_insensitive { "(?i)" } else { "" };
    Regex::new(&format!("{}^(?:{})$", flags, body)).map_err(|e| SegmentationError::InvalidRegex {
        pattern: original.to_string(),
        reason: e.to_string(),
    })
}

fn parse_number(raw: &str) -> Result<f64, SegmentationError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| SegmentationError::InvalidNumber(raw.to_string()))
}

fn compare_numeric(tag_value: &str, predicate: impl Fn(f64) -> bool) -> bool {
    match tag_value.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => predicate(value),
        _ => false,
    }
}

/// Renders a number without a trailing `.0` and without exponent notation,
/// keeping at most 14 fractional digits.
pub fn format_number(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    if value.fract() == 0.0 {
        return format!("{:.0}", value);
    }
    let fixed = format!("{:.14}", value);
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() || trimmed == "-" || trimmed == "-0" {
        return "0".to_string();
    }
    trimmed.to_string()
}

/// String form of a property value used for every textual comparison.
pub fn normalize_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else {
                n.as_f64().map(format_number).unwrap_or_else(|| n.to_string())
            }
        }
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

/// When both sides are numeric, renders them through [`format_number`] so
/// `"10.0"` and `10` compare equal.
fn process_values(operand: &str, tag_value: &str) -> (String, String) {
    let as_number = |s: &str| s.parse::<f64>().ok().filter(|n| n.is_finite());
    match (as_number(operand), as_number(tag_value)) {
        (Some(a), Some(b)) => (format_number(a), format_number(b)),
        _ => (operand.to_string(), tag_value.to_string()),
    }
}

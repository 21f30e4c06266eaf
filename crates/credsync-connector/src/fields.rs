//! Lenient field extraction for provider payloads.
//!
//! Providers have shipped several field names for the same value over the
//! years. These helpers walk a list of dotted paths and return the first
//! usable value, so normalizers never fail on a missing or oddly typed field.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

/// Value at a dotted path like `holder.email`.
#[must_use]
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |current, segment| current.get(segment))
        .filter(|v| !v.is_null())
}

/// First non-empty string among `paths`. Numbers are accepted and rendered.
#[must_use]
pub fn first_string(value: &Value, paths: &[&str]) -> Option<String> {
    paths.iter().find_map(|p| match lookup(value, p)? {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// First value among `paths` that parses as a timestamp.
#[must_use]
pub fn first_datetime(value: &Value, paths: &[&str]) -> Option<DateTime<Utc>> {
    paths.iter().find_map(|p| match lookup(value, p)? {
        Value::String(s) => parse_datetime(s),
        Value::Number(n) => n.as_i64().and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        _ => None,
    })
}

/// First value among `paths` that parses as a calendar date.
#[must_use]
pub fn first_date(value: &Value, paths: &[&str]) -> Option<NaiveDate> {
    paths
        .iter()
        .find_map(|p| lookup(value, p)?.as_str().and_then(parse_date))
}

/// Skills as a list of names. Accepts string arrays, arrays of objects with
/// `name`, or a single comma-separated string.
#[must_use]
pub fn string_list(value: &Value, paths: &[&str]) -> Vec<String> {
    for p in paths {
        match lookup(value, p) {
            Some(Value::Array(items)) => {
                return items
                    .iter()
                    .filter_map(|item| match item {
                        Value::String(s) => Some(s.trim().to_string()),
                        Value::Object(_) => first_string(item, &["name", "title"]),
                        _ => None,
                    })
                    .filter(|s| !s.is_empty())
                    .collect();
            }
            Some(Value::String(s)) => {
                return s
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect();
            }
            _ => {}
        }
    }
    Vec::new()
}

/// RFC 3339, `YYYY-MM-DDTHH:MM:SS` without offset, or a bare date taken as
/// midnight UTC.
#[must_use]
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    parse_date(s).and_then(|d| d.and_hms_opt(0, 0, 0)).map(|n| n.and_utc())
}

/// `YYYY-MM-DD`, `DD/MM/YYYY`, `DD-MM-YYYY`, or the date part of a timestamp.
#[must_use]
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .or_else(|| s.get(..10).and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()))
}

/// A compact JWS has exactly three dot-separated, non-empty segments.
#[must_use]
pub fn looks_like_compact_jws(s: &str) -> bool {
    let parts: Vec<&str> = s.split('.').collect();
    parts.len() == 3 && parts.iter().all(|p| !p.is_empty())
}

/// Claims of a compact JWS, decoded without checking the signature. Only for
/// reading fields; provenance is decided by verification.
#[must_use]
pub fn unverified_jws_claims(token: &str) -> Option<Value> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_string_walks_fallbacks() {
        let v = json!({"recipient_email": "", "holder": {"email": "a@x.com"}});
        assert_eq!(
            first_string(&v, &["email", "recipient_email", "holder.email"]),
            Some("a@x.com".into())
        );
        assert_eq!(first_string(&v, &["missing"]), None);
    }

    #[test]
    fn test_first_string_ignores_wrong_types() {
        let v = json!({"name": {"first": "A"}, "recipient_name": "Asha Rao"});
        assert_eq!(first_string(&v, &["name", "recipient_name"]), Some("Asha Rao".into()));
        assert_eq!(first_string(&json!({"nsqf_level": 4}), &["nsqf_level"]), Some("4".into()));
    }

    #[test]
    fn test_dates() {
        assert_eq!(parse_date("1999-03-04"), NaiveDate::from_ymd_opt(1999, 3, 4));
        assert_eq!(parse_date("04/03/1999"), NaiveDate::from_ymd_opt(1999, 3, 4));
        assert_eq!(parse_date("1999-03-04T10:00:00Z"), NaiveDate::from_ymd_opt(1999, 3, 4));
        assert_eq!(parse_date("yesterday"), None);

        let dt = parse_datetime("2024-01-15").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-01-15T00:00:00+00:00");
        assert!(parse_datetime("2024-01-15T08:30:00+05:30").is_some());
        assert!(first_datetime(&json!({"iat": 1_700_000_000}), &["iat"]).is_some());
    }

    #[test]
    fn test_string_list_shapes() {
        assert_eq!(string_list(&json!({"skills": ["a", " b "]}), &["skills"]), vec!["a", "b"]);
        assert_eq!(
            string_list(&json!({"skills": [{"name": "welding"}, 3]}), &["skills"]),
            vec!["welding"]
        );
        assert_eq!(string_list(&json!({"skills": "a, b,,c"}), &["skills"]), vec!["a", "b", "c"]);
        assert!(string_list(&json!({}), &["skills"]).is_empty());
    }

    #[test]
    fn test_jws_shape() {
        assert!(looks_like_compact_jws("aaa.bbb.ccc"));
        assert!(!looks_like_compact_jws("aaa.bbb"));
        assert!(!looks_like_compact_jws("aaa..ccc"));
    }

    #[test]
    fn test_unverified_claims() {
        let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"C1"}"#);
        let token = format!("eyJhbGciOiJSUzI1NiJ9.{payload}.sig");
        assert_eq!(unverified_jws_claims(&token).unwrap()["sub"], "C1");
        assert!(unverified_jws_claims("a.!!.c").is_none());
    }
}

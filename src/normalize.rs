/// normalize.rs – Coerce raw store rows into `Account` values.
///
/// Rows arrive as loosely typed JSON: numeric columns may be numbers, numeric
/// strings or null, flags may be missing, timestamps may carry an offset or
/// not. Nothing here fails; bad fields fall back to safe defaults.
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::models::Account;

/// One row of the `trading_accounts` collection as delivered by the store.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAccountRecord {
    #[serde(default)]
    pub account_id: Value,
    #[serde(default)]
    pub account_name: Value,
    #[serde(default)]
    pub equity: Value,
    #[serde(default)]
    pub balance: Value,
    #[serde(default)]
    pub is_usc: Value,
    #[serde(default)]
    pub is_demo: Value,
    #[serde(default)]
    pub updated_at: Value,
    #[serde(default)]
    pub total_lots: Value,
}

/// Normalize one row. Returns `None` only when the row has no usable id.
pub fn normalize(raw: &RawAccountRecord) -> Option<Account> {
    let id = value_as_id(&raw.account_id)?;
    Some(Account {
        id,
        name: value_as_text(&raw.account_name).unwrap_or_default(),
        equity: value_as_f64(&raw.equity),
        balance: value_as_f64(&raw.balance),
        is_cent_denominated: value_as_bool(&raw.is_usc),
        is_demo: value_as_bool(&raw.is_demo),
        last_updated_at: value_as_timestamp(&raw.updated_at),
        total_lots: value_as_f64(&raw.total_lots),
    })
}

// ---------------------------------------------------------------------------
// Field coercion
// ---------------------------------------------------------------------------

/// Finite number from a JSON number or numeric string; 0.0 otherwise.
pub fn value_as_f64(v: &Value) -> f64 {
    v.as_f64()
        .or_else(|| v.as_str().and_then(|s| s.trim().parse::<f64>().ok()))
        .filter(|x| x.is_finite())
        .unwrap_or(0.0)
}

pub fn value_as_bool(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|x| x != 0.0).unwrap_or(false),
        Value::String(s) => matches!(
            s.trim().to_lowercase().as_str(),
            "true" | "t" | "1" | "yes"
        ),
        _ => false,
    }
}

fn value_as_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_as_id(v: &Value) -> Option<String> {
    let id = match v {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

fn value_as_timestamp(v: &Value) -> Option<DateTime<Utc>> {
    v.as_str().and_then(parse_timestamp)
}

/// Parse an `updated_at` value.
///
/// Accepts RFC 3339 (`2024-05-01T12:00:00+07:00`, `...Z`) and naive ISO-8601
/// (`2024-05-01T12:00:00.123`, `2024-05-01 12:00:00`), the latter read as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Postgres renders timestamptz with a space separator and a short offset.
    for fmt in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn raw(v: Value) -> RawAccountRecord {
        serde_json::from_value(v).expect("raw record")
    }

    #[test]
    fn missing_numeric_fields_default_to_zero() {
        let acc = normalize(&raw(json!({"account_id": "7"}))).unwrap();
        assert_eq!(acc.equity, 0.0);
        assert_eq!(acc.balance, 0.0);
        assert_eq!(acc.total_lots, 0.0);
        assert!(!acc.is_demo);
        assert!(!acc.is_cent_denominated);
        assert!(acc.last_updated_at.is_none());
    }

    #[test]
    fn numeric_strings_are_accepted_and_garbage_is_zeroed() {
        let acc = normalize(&raw(json!({
            "account_id": 42,
            "equity": "1500.5",
            "balance": "n/a",
            "total_lots": null,
        })))
        .unwrap();
        assert_eq!(acc.id, "42");
        assert_eq!(acc.equity, 1500.5);
        assert_eq!(acc.balance, 0.0);
        assert_eq!(acc.total_lots, 0.0);
    }

    #[test]
    fn non_finite_strings_are_zeroed() {
        assert_eq!(value_as_f64(&json!("NaN")), 0.0);
        assert_eq!(value_as_f64(&json!("inf")), 0.0);
    }

    #[test]
    fn row_without_id_is_skipped() {
        assert!(normalize(&raw(json!({"equity": 10}))).is_none());
        assert!(normalize(&raw(json!({"account_id": "  "}))).is_none());
    }

    #[test]
    fn flags_accept_loose_encodings() {
        assert!(value_as_bool(&json!(true)));
        assert!(value_as_bool(&json!("true")));
        assert!(value_as_bool(&json!(1)));
        assert!(!value_as_bool(&json!(null)));
        assert!(!value_as_bool(&json!("no")));
    }

    #[test]
    fn timestamps_with_and_without_offset() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 5, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-05-01T12:00:00+07:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-05-01T05:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-05-01 12:00:00+07"), Some(expected));
        assert_eq!(parse_timestamp("2024-05-01T05:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-05-01 05:00:00.000"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp(""), None);
    }
}

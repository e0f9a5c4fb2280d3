//! Column types and type inference for SQL Server tables

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::fmt;

/// `YYYY-MM-DD`, optionally followed by a time with up to three fractional
/// digits and a trailing `Z`. Offsets do not convert to `DATETIME`.
static ISO_DATETIME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4})-(\d{2})-(\d{2})(?:[T ](\d{2}):(\d{2}):(\d{2})(?:\.\d{1,3})?Z?)?$").unwrap()
});

/// Range of the `DATETIME` type
const DATETIME_YEARS: std::ops::RangeInclusive<u32> = 1753..=9999;

fn days_in_month(year: u32, month: u32) -> u32 {
    match month {
        2 if (year % 4 == 0 && year % 100 != 0) || year % 400 == 0 => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

/// Whether a string is an ISO 8601 date or date-time that a `DATETIME`
/// column stores
pub fn is_datetime(s: &str) -> bool {
    let Some(caps) = ISO_DATETIME_REGEX.captures(s) else {
        return false;
    };
    let field = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());

    let (Some(year), Some(month), Some(day)) = (field(1), field(2), field(3)) else {
        return false;
    };
    if !DATETIME_YEARS.contains(&year) || !(1..=12).contains(&month) {
        return false;
    }
    if day == 0 || day > days_in_month(year, month) {
        return false;
    }

    match (field(4), field(5), field(6)) {
        (Some(hour), Some(minute), Some(second)) => hour < 24 && minute < 60 && second < 60,
        _ => true,
    }
}

/// Steps text columns are widened through, ending at `MAX`
pub const WIDTH_LADDER: [u32; 4] = [255, 500, 1000, 2000];

/// Width of a text column
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Width {
    Bounded(u32),
    Max,
}

impl Width {
    pub const DEFAULT: Width = Width::Bounded(WIDTH_LADDER[0]);

    /// Smallest ladder step that holds `chars` characters
    pub fn fitting(chars: usize) -> Width {
        WIDTH_LADDER
            .iter()
            .find(|&&step| chars <= step as usize)
            .map_or(Width::Max, |&step| Width::Bounded(step))
    }

    /// The ladder step after this one; `None` once at `MAX`
    pub fn next(self) -> Option<Width> {
        match self {
            Width::Max => None,
            Width::Bounded(current) => Some(
                WIDTH_LADDER
                    .iter()
                    .find(|&&step| step > current)
                    .map_or(Width::Max, |&step| Width::Bounded(step)),
            ),
        }
    }

    pub fn holds(self, chars: usize) -> bool {
        match self {
            Width::Max => true,
            Width::Bounded(n) => chars <= n as usize,
        }
    }
}

impl fmt::Display for Width {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Width::Bounded(n) => write!(f, "{}", n),
            Width::Max => f.write_str("MAX"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Int,
    BigInt,
    Float,
    Bit,
    DateTime,
    NVarChar(Width),
}

impl SqlType {
    pub const TEXT: SqlType = SqlType::NVarChar(Width::DEFAULT);

    /// Type of a single value. Strings are sized to fit.
    pub fn infer(value: &Value) -> SqlType {
        match value {
            Value::Null => SqlType::TEXT,
            Value::Bool(_) => SqlType::Bit,
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    if i32::try_from(i).is_ok() {
                        SqlType::Int
                    } else {
                        SqlType::BigInt
                    }
                } else if n.is_u64() {
                    // beyond BIGINT
                    SqlType::NVarChar(Width::fitting(n.to_string().len()))
                } else {
                    SqlType::Float
                }
            }
            Value::String(s) if is_datetime(s) => SqlType::DateTime,
            Value::String(s) => SqlType::NVarChar(Width::fitting(s.chars().count())),
            other => SqlType::NVarChar(Width::fitting(other.to_string().chars().count())),
        }
    }

    /// Narrowest type that holds values of both types
    pub fn unify(self, other: SqlType) -> SqlType {
        use SqlType::*;
        match (self, other) {
            (a, b) if a == b => a,
            (Int, BigInt) | (BigInt, Int) => BigInt,
            (Int | BigInt, Float) | (Float, Int | BigInt) => Float,
            (NVarChar(a), NVarChar(b)) => NVarChar(a.max(b)),
            (NVarChar(w), _) | (_, NVarChar(w)) => NVarChar(w),
            // e.g. dates mixed with numbers
            _ => SqlType::TEXT,
        }
    }

    pub fn width(self) -> Option<Width> {
        match self {
            SqlType::NVarChar(w) => Some(w),
            _ => None,
        }
    }

    /// Whether the store can hold `value` in a column of this type
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (SqlType::NVarChar(_), _) => true,
            (SqlType::Float, Value::Number(_)) => true,
            (SqlType::BigInt, Value::Number(n)) => n.is_i64(),
            (SqlType::Int, Value::Number(n)) => n.as_i64().map_or(false, |i| i32::try_from(i).is_ok()),
            (SqlType::Bit, Value::Bool(_)) => true,
            (SqlType::Bit, Value::Number(n)) => matches!(n.as_i64(), Some(0 | 1)),
            (SqlType::DateTime, Value::String(s)) => is_datetime(s),
            _ => false,
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlType::Int => f.write_str("INT"),
            SqlType::BigInt => f.write_str("BIGINT"),
            SqlType::Float => f.write_str("FLOAT"),
            SqlType::Bit => f.write_str("BIT"),
            SqlType::DateTime => f.write_str("DATETIME"),
            SqlType::NVarChar(w) => write!(f, "NVARCHAR({})", w),
        }
    }
}

/// Character count of a value as it is stored in a text column
pub fn text_width(value: &Value) -> usize {
    match value {
        Value::Null => 0,
        Value::String(s) => s.chars().count(),
        other => other.to_string().chars().count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_width_ladder() {
        assert_eq!(Width::fitting(0), Width::Bounded(255));
        assert_eq!(Width::fitting(255), Width::Bounded(255));
        assert_eq!(Width::fitting(256), Width::Bounded(500));
        assert_eq!(Width::fitting(1999), Width::Bounded(2000));
        assert_eq!(Width::fitting(2001), Width::Max);

        assert_eq!(Width::Bounded(255).next(), Some(Width::Bounded(500)));
        assert_eq!(Width::Bounded(2000).next(), Some(Width::Max));
        assert_eq!(Width::Bounded(300).next(), Some(Width::Bounded(500)));
        assert_eq!(Width::Max.next(), None);
    }

    #[test]
    fn test_infer() {
        assert_eq!(SqlType::infer(&json!(1)), SqlType::Int);
        assert_eq!(SqlType::infer(&json!(5_000_000_000i64)), SqlType::BigInt);
        assert_eq!(SqlType::infer(&json!(1.5)), SqlType::Float);
        assert_eq!(SqlType::infer(&json!(true)), SqlType::Bit);
        assert_eq!(SqlType::infer(&json!("2024-01-15T10:30:00Z")), SqlType::DateTime);
        assert_eq!(SqlType::infer(&json!("2024-01-15")), SqlType::DateTime);
        assert_eq!(SqlType::infer(&json!("hello")), SqlType::TEXT);
        assert_eq!(SqlType::infer(&Value::Null), SqlType::TEXT);
        assert_eq!(
            SqlType::infer(&json!("x".repeat(600))),
            SqlType::NVarChar(Width::Bounded(1000))
        );
    }

    #[test]
    fn test_unify() {
        assert_eq!(SqlType::Int.unify(SqlType::Float), SqlType::Float);
        assert_eq!(SqlType::Int.unify(SqlType::BigInt), SqlType::BigInt);
        assert_eq!(
            SqlType::Int.unify(SqlType::NVarChar(Width::Bounded(500))),
            SqlType::NVarChar(Width::Bounded(500))
        );
        assert_eq!(SqlType::DateTime.unify(SqlType::Int), SqlType::TEXT);
        assert_eq!(SqlType::Bit.unify(SqlType::Bit), SqlType::Bit);
    }

    #[test]
    fn test_accepts() {
        assert!(SqlType::Int.accepts(&json!(3)));
        assert!(!SqlType::Int.accepts(&json!("3")));
        assert!(!SqlType::Int.accepts(&json!(5_000_000_000i64)));
        assert!(SqlType::DateTime.accepts(&json!("2024-01-15")));
        assert!(!SqlType::DateTime.accepts(&json!("soon")));
        assert!(!SqlType::DateTime.accepts(&json!("2024-02-30")));
        assert!(SqlType::TEXT.accepts(&json!(12)));
        assert!(SqlType::Float.accepts(&Value::Null));
    }

    #[test]
    fn test_datetime_detection() {
        for ok in [
            "2024-02-29",
            "2000-02-29",
            "1753-01-01",
            "9999-12-31T23:59:59.997",
            "2024-01-15 10:30:00",
            "2024-01-15T10:30:00.5Z",
        ] {
            assert!(is_datetime(ok), "{}", ok);
        }
        for bad in [
            "2024-13-45",
            "2024-00-10",
            "2024-02-30",
            "2023-02-29",
            "1900-02-29",
            "2024-04-31",
            "1700-01-01",
            "2024-01-15T24:00:00",
            "2024-01-15T10:60:00",
            "2024-01-15T10:30:00+05:30",
            "2024-01-15T10:30:00.1234",
            "2024-01-15T10:30",
        ] {
            assert!(!is_datetime(bad), "{}", bad);
            assert_eq!(SqlType::infer(&json!(bad)), SqlType::TEXT, "{}", bad);
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(SqlType::NVarChar(Width::Max).to_string(), "NVARCHAR(MAX)");
        assert_eq!(SqlType::TEXT.to_string(), "NVARCHAR(255)");
        assert_eq!(SqlType::DateTime.to_string(), "DATETIME");
    }
}

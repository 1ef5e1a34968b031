//! Scalar coercion for declared primitive types.

use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value;

use crate::decode::DecodedValue;

/// Primitive types a field may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    String,
    Integer,
    Boolean,
    Date,
    DateTime,
    Decimal,
    /// Opaque JSON passed through unchanged.
    Object,
}

/// The declared type name is not a known primitive.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown scalar type: {0}")]
pub struct UnknownScalarType(pub String);

impl FromStr for ScalarType {
    type Err = UnknownScalarType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(Self::String),
            "integer" => Ok(Self::Integer),
            "boolean" => Ok(Self::Boolean),
            "date" => Ok(Self::Date),
            "date_time" => Ok(Self::DateTime),
            "decimal" => Ok(Self::Decimal),
            "object" => Ok(Self::Object),
            other => Err(UnknownScalarType(other.to_string())),
        }
    }
}

/// A raw value could not be coerced to its declared type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot read {raw} as {expected:?}")]
pub struct CoercionError {
    pub expected: ScalarType,
    pub raw: String,
}

/// Coerces a raw JSON value to `ty`.
///
/// `null` always coerces to [`DecodedValue::Null`]. String, integer, boolean
/// and object pass through verbatim. Dates and date-times parse from ISO-8601
/// strings; decimals parse from their textual form without going through a
/// binary float.
///
/// # Errors
///
/// Returns `CoercionError` when a date, date-time or decimal cannot be parsed.
pub fn unmarshal_scalar(raw: &Value, ty: ScalarType) -> Result<DecodedValue, CoercionError> {
    if raw.is_null() {
        return Ok(DecodedValue::Null);
    }

    let fail = || CoercionError {
        expected: ty,
        raw: raw.to_string(),
    };

    match ty {
        ScalarType::String | ScalarType::Integer | ScalarType::Boolean | ScalarType::Object => {
            Ok(DecodedValue::Json(raw.clone()))
        }
        ScalarType::Date => raw
            .as_str()
            .and_then(parse_date)
            .map(DecodedValue::Date)
            .ok_or_else(fail),
        ScalarType::DateTime => raw
            .as_str()
            .and_then(parse_date_time)
            .map(DecodedValue::DateTime)
            .ok_or_else(fail),
        ScalarType::Decimal => {
            let text = match raw {
                Value::String(s) => s.trim().to_string(),
                Value::Number(n) => n.to_string(),
                _ => return Err(fail()),
            };
            BigDecimal::from_str(&text)
                .map(DecodedValue::Decimal)
                .map_err(|_| fail())
        }
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

/// Accepts RFC 3339, ISO 8601 without seconds, an offset-less date-time
/// (read as UTC), or a bare date (midnight UTC).
fn parse_date_time(s: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M%:z") {
        return Some(dt);
    }
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M"))
        .ok()
        .or_else(|| parse_date(s).map(|d| d.and_time(NaiveTime::MIN)))?;
    Some(naive.and_utc().fixed_offset())
}

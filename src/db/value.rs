use std::error::Error as StdError;
use std::fmt::Write;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::Row;

/// A single column value read from a PostgreSQL row.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Numeric(Decimal),
    /// NUMERIC outside what `Decimal` holds: huge magnitudes, NaN, infinities.
    NumericText(String),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Json(Value),
    Array(Vec<CellValue>),
}

impl CellValue {
    /// JSON form used in endpoint responses.
    ///
    /// Integers and floats stay numbers. NUMERIC becomes a JSON integer when
    /// it has no fractional part and fits in i64, a float otherwise, and a
    /// string when neither is possible. Temporal values use ISO 8601.
    pub fn to_json(&self) -> Value {
        match self {
            CellValue::Null => Value::Null,
            CellValue::Bool(b) => Value::Bool(*b),
            CellValue::Int16(i) => serde_json::json!(*i),
            CellValue::Int32(i) => serde_json::json!(*i),
            CellValue::Int64(i) => serde_json::json!(*i),
            CellValue::Float32(f) => float_to_json(f64::from(*f)),
            CellValue::Float64(f) => float_to_json(*f),
            CellValue::Numeric(d) => numeric_to_json(d),
            CellValue::NumericText(s) => match s.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
                Some(n) => Value::Number(n),
                None => Value::String(s.clone()),
            },
            CellValue::Text(s) => Value::String(s.clone()),
            CellValue::Bytes(b) => Value::String(format!("[{} bytes]", b.len())),
            CellValue::Date(d) => Value::String(d.to_string()),
            CellValue::Time(t) => Value::String(t.to_string()),
            CellValue::DateTime(dt) => Value::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            CellValue::TimestampTz(dt) => Value::String(dt.to_rfc3339()),
            CellValue::Json(j) => j.clone(),
            CellValue::Array(items) => Value::Array(items.iter().map(CellValue::to_json).collect()),
        }
    }
}

// NaN and infinities have no JSON representation.
fn float_to_json(f: f64) -> Value {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(f.to_string()))
}

fn numeric_to_json(d: &Decimal) -> Value {
    if d.fract().is_zero() {
        if let Some(i) = d.to_i64() {
            return serde_json::json!(i);
        }
    }
    match d.to_f64().and_then(serde_json::Number::from_f64) {
        Some(n) => Value::Number(n),
        None => Value::String(d.to_string()),
    }
}

/// NUMERIC read straight from the wire as decimal text.
struct RawNumeric(String);

impl<'a> FromSql<'a> for RawNumeric {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        decode_numeric(raw).map(RawNumeric)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

/// Decode PostgreSQL's binary NUMERIC: a header of four big-endian u16
/// (digit count, weight, sign, display scale) then base-10000 digits, the
/// first of which sits at 10000^weight.
fn decode_numeric(raw: &[u8]) -> Result<String, Box<dyn StdError + Sync + Send>> {
    if raw.len() < 8 {
        return Err("numeric value is shorter than its header".into());
    }
    let word = |at: usize| u16::from_be_bytes([raw[at], raw[at + 1]]);
    let ndigits = usize::from(word(0));
    let weight = i32::from(word(2) as i16);
    let sign = word(4);
    let dscale = usize::from(word(6));

    match sign {
        0x0000 | 0x4000 => {}
        0xC000 => return Ok("NaN".to_string()),
        0xD000 => return Ok("Infinity".to_string()),
        0xF000 => return Ok("-Infinity".to_string()),
        other => return Err(format!("invalid numeric sign {other:#06x}").into()),
    }
    if raw.len() < 8 + ndigits * 2 {
        return Err("numeric value is shorter than its digit count".into());
    }

    let digit = |group: i32| -> u16 {
        usize::try_from(group)
            .ok()
            .filter(|g| *g < ndigits)
            .map(|g| word(8 + g * 2))
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == 0x4000 {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        let _ = write!(out, "{}", digit(0));
        for group in 1..=weight {
            let _ = write!(out, "{:04}", digit(group));
        }
    }
    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut group = weight + 1;
        while fraction.len() < dscale {
            let _ = write!(fraction, "{:04}", digit(group));
            group += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }
    Ok(out)
}

fn get<'a, T>(row: &'a Row, idx: usize) -> Option<T>
where
    T: FromSql<'a>,
{
    row.try_get::<_, Option<T>>(idx).ok().flatten()
}

fn array<'a, T>(row: &'a Row, idx: usize, wrap: fn(T) -> CellValue) -> CellValue
where
    T: FromSql<'a>,
{
    get::<Vec<Option<T>>>(row, idx)
        .map(|items| {
            CellValue::Array(
                items
                    .into_iter()
                    .map(|item| item.map(wrap).unwrap_or(CellValue::Null))
                    .collect(),
            )
        })
        .unwrap_or(CellValue::Null)
}

/// Read column `idx` according to its PostgreSQL type.
pub fn extract_value(row: &Row, idx: usize, pg_type: &Type) -> CellValue {
    let value = match *pg_type {
        Type::BOOL => get(row, idx).map(CellValue::Bool),
        Type::INT2 => get(row, idx).map(CellValue::Int16),
        Type::INT4 => get(row, idx).map(CellValue::Int32),
        Type::INT8 => get(row, idx).map(CellValue::Int64),
        Type::FLOAT4 => get(row, idx).map(CellValue::Float32),
        Type::FLOAT8 => get(row, idx).map(CellValue::Float64),
        Type::NUMERIC => match row.try_get::<_, Option<Decimal>>(idx) {
            Ok(value) => value.map(CellValue::Numeric),
            Err(_) => get::<RawNumeric>(row, idx).map(|n| CellValue::NumericText(n.0)),
        },
        Type::TEXT | Type::VARCHAR | Type::NAME | Type::CHAR | Type::BPCHAR => {
            get(row, idx).map(CellValue::Text)
        }
        Type::BYTEA => get(row, idx).map(CellValue::Bytes),
        Type::DATE => get(row, idx).map(CellValue::Date),
        Type::TIME => get(row, idx).map(CellValue::Time),
        Type::TIMESTAMP => get(row, idx).map(CellValue::DateTime),
        Type::TIMESTAMPTZ => get(row, idx).map(CellValue::TimestampTz),
        Type::JSON | Type::JSONB => get(row, idx).map(CellValue::Json),
        Type::BOOL_ARRAY => Some(array(row, idx, CellValue::Bool)),
        Type::INT4_ARRAY => Some(array(row, idx, CellValue::Int32)),
        Type::INT8_ARRAY => Some(array(row, idx, CellValue::Int64)),
        Type::FLOAT8_ARRAY => Some(array(row, idx, CellValue::Float64)),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => Some(array(row, idx, CellValue::Text)),
        // Fallback: try to get as string
        _ => get(row, idx).map(CellValue::Text),
    };
    value.unwrap_or(CellValue::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_null_and_bool() {
        assert!(CellValue::Null.to_json().is_null());
        assert_eq!(CellValue::Bool(true).to_json(), serde_json::json!(true));
    }

    #[test]
    fn test_integers_stay_numbers() {
        assert_eq!(CellValue::Int16(7).to_json(), serde_json::json!(7));
        assert_eq!(CellValue::Int32(-100).to_json(), serde_json::json!(-100));
        assert_eq!(
            CellValue::Int64(9_999_999_999).to_json(),
            serde_json::json!(9_999_999_999i64)
        );
    }

    #[test]
    fn test_floats() {
        assert_eq!(CellValue::Float64(2.5).to_json(), serde_json::json!(2.5));
        assert_eq!(
            CellValue::Float64(f64::NAN).to_json(),
            serde_json::json!("NaN")
        );
    }

    #[test]
    fn test_numeric() {
        let whole = Decimal::from_str("42").unwrap();
        assert_eq!(CellValue::Numeric(whole).to_json(), serde_json::json!(42));
        let frac = Decimal::from_str("12.75").unwrap();
        assert_eq!(CellValue::Numeric(frac).to_json(), serde_json::json!(12.75));
    }

    fn numeric_wire(weight: i16, sign: u16, dscale: u16, digits: &[u16]) -> Vec<u8> {
        let header = [digits.len() as u16, weight as u16, sign, dscale];
        header
            .iter()
            .chain(digits)
            .flat_map(|w| w.to_be_bytes())
            .collect()
    }

    #[test]
    fn test_decode_numeric_beyond_decimal_range() {
        let raw = numeric_wire(7, 0x0000, 0, &[100]);
        assert_eq!(decode_numeric(&raw).unwrap(), format!("1{}", "0".repeat(30)));
    }

    #[test]
    fn test_decode_numeric_special_values() {
        assert_eq!(decode_numeric(&numeric_wire(0, 0xC000, 0, &[])).unwrap(), "NaN");
        assert_eq!(decode_numeric(&numeric_wire(0, 0xD000, 0, &[])).unwrap(), "Infinity");
        assert_eq!(decode_numeric(&numeric_wire(0, 0xF000, 0, &[])).unwrap(), "-Infinity");
    }

    #[test]
    fn test_decode_numeric_fractions() {
        assert_eq!(decode_numeric(&numeric_wire(0, 0x0000, 2, &[12, 7500])).unwrap(), "12.75");
        assert_eq!(
            decode_numeric(&numeric_wire(-1, 0x4000, 7, &[1, 2340])).unwrap(),
            "-0.0001234"
        );
        assert_eq!(decode_numeric(&numeric_wire(0, 0x0000, 2, &[])).unwrap(), "0.00");
        assert_eq!(decode_numeric(&numeric_wire(1, 0x0000, 0, &[1, 5])).unwrap(), "10005");
    }

    #[test]
    fn test_decode_numeric_rejects_truncated_input() {
        assert!(decode_numeric(&[0, 1, 0]).is_err());
        let mut raw = numeric_wire(0, 0x0000, 0, &[1, 2]);
        raw.truncate(10);
        assert!(decode_numeric(&raw).is_err());
    }

    #[test]
    fn test_numeric_text_json() {
        let huge = CellValue::NumericText(format!("1{}", "0".repeat(30)));
        assert_eq!(huge.to_json(), serde_json::json!(1e30));
        assert_eq!(
            CellValue::NumericText("NaN".into()).to_json(),
            serde_json::json!("NaN")
        );
        assert_eq!(
            CellValue::NumericText("-Infinity".into()).to_json(),
            serde_json::json!("-Infinity")
        );
    }

    #[test]
    fn test_text_and_bytes() {
        assert_eq!(
            CellValue::Text("hello".into()).to_json(),
            serde_json::json!("hello")
        );
        assert_eq!(
            CellValue::Bytes(vec![1, 2, 3]).to_json(),
            serde_json::json!("[3 bytes]")
        );
    }

    #[test]
    fn test_temporal_values_are_iso() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        assert_eq!(CellValue::Date(d).to_json(), serde_json::json!("2024-01-31"));
        let dt = d.and_hms_opt(8, 30, 0).unwrap();
        assert_eq!(
            CellValue::DateTime(dt).to_json(),
            serde_json::json!("2024-01-31T08:30:00")
        );
        let tz = DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc);
        assert_eq!(
            CellValue::TimestampTz(tz).to_json(),
            serde_json::json!("2024-01-31T08:30:00+00:00")
        );
    }

    #[test]
    fn test_json_is_embedded() {
        let val = serde_json::json!({"key": "value"});
        assert_eq!(CellValue::Json(val.clone()).to_json(), val);
    }

    #[test]
    fn test_array() {
        let arr = CellValue::Array(vec![
            CellValue::Int32(1),
            CellValue::Null,
            CellValue::Int32(3),
        ]);
        assert_eq!(arr.to_json(), serde_json::json!([1, null, 3]));
    }
}

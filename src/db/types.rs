//! Row decoding for CockroachDB result sets.
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies the column type name reported by the server
//! 2. A per-category decoder extracts the value as JSON
//!
//! Rows may arrive in either wire format. Unparameterized statements go through the
//! simple query protocol and every value is text; parameterized statements use the
//! extended protocol and values are binary. Decoders handle both, and anything without a
//! dedicated decoder falls back to the raw value.

use crate::models::{ColumnMetadata, Row as JsonRow};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::error::BoxDynError;
use sqlx::postgres::types::PgInterval;
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueFormat, PgValueRef};
use sqlx::{Column, Decode, Postgres, Row, Type, TypeInfo, ValueRef};

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Timestamp,
    TimestampTz,
    Date,
    Time,
    Interval,
    Array,
    Unknown,
}

/// Classify a server type name into a logical category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();

    if lower.ends_with("[]") || lower.starts_with('_') {
        return TypeCategory::Array;
    }

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        return TypeCategory::Decimal;
    }

    match lower.as_str() {
        "int2" | "int4" | "int8" | "smallint" | "integer" | "bigint" | "oid" => {
            TypeCategory::Integer
        }
        "float4" | "float8" | "real" | "double precision" => TypeCategory::Float,
        "bool" | "boolean" => TypeCategory::Boolean,
        "text" | "varchar" | "char" | "bpchar" | "name" | "string" | "citext" => {
            TypeCategory::Text
        }
        "bytea" | "bytes" => TypeCategory::Binary,
        "json" | "jsonb" => TypeCategory::Json,
        "uuid" => TypeCategory::Uuid,
        "timestamp" => TypeCategory::Timestamp,
        "timestamptz" => TypeCategory::TimestampTz,
        "date" => TypeCategory::Date,
        "time" => TypeCategory::Time,
        "interval" => TypeCategory::Interval,
        _ => TypeCategory::Unknown,
    }
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Raw DECIMAL/NUMERIC value as a string.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("NUMERIC")
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        match value.format() {
            PgValueFormat::Text => Ok(RawDecimal(value.as_str()?.to_string())),
            PgValueFormat::Binary => numeric_from_binary(value.as_bytes()?)
                .map(RawDecimal)
                .ok_or_else(|| "malformed binary NUMERIC value".into()),
        }
    }
}

/// Render the binary NUMERIC wire format as a decimal string.
///
/// Layout: ndigits, weight, sign, dscale (all 16-bit big endian) followed by `ndigits`
/// base-10000 digits. `weight` is the power of 10000 of the first digit.
pub fn numeric_from_binary(buf: &[u8]) -> Option<String> {
    const NEGATIVE: u16 = 0x4000;
    const NAN: u16 = 0xC000;
    const POS_INF: u16 = 0xD000;
    const NEG_INF: u16 = 0xF000;

    let read = |i: usize| -> Option<u16> {
        let bytes = buf.get(i..i + 2)?;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    };

    let ndigits = read(0)? as usize;
    let weight = read(2)? as i16 as i32;
    let sign = read(4)?;
    let dscale = read(6)? as usize;

    match sign {
        NAN => return Some("NaN".to_string()),
        POS_INF => return Some("Infinity".to_string()),
        NEG_INF => return Some("-Infinity".to_string()),
        _ => {}
    }

    let digits = (0..ndigits)
        .map(|i| read(8 + i * 2))
        .collect::<Option<Vec<u16>>>()?;
    let digit_at = |i: i32| -> u16 {
        if i < 0 {
            0
        } else {
            digits.get(i as usize).copied().unwrap_or(0)
        }
    };

    let mut out = String::new();
    if sign == NEGATIVE {
        out.push('-');
    }

    if weight < 0 {
        out.push('0');
    } else {
        out.push_str(&digit_at(0).to_string());
        for i in 1..=weight {
            out.push_str(&format!("{:04}", digit_at(i)));
        }
    }

    if dscale > 0 {
        let mut frac = String::with_capacity(dscale + 4);
        let mut i = weight + 1;
        while frac.len() < dscale {
            frac.push_str(&format!("{:04}", digit_at(i)));
            i += 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }

    Some(out)
}

// =============================================================================
// Binary Encoding
// =============================================================================

/// Encode binary column data as base64.
pub fn decode_binary_value(bytes: &[u8]) -> JsonValue {
    JsonValue::String(STANDARD.encode(bytes))
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

/// Human-readable interval in the server's own style (`1 day 02:03:04.5`).
pub fn format_interval(interval: &PgInterval) -> String {
    let mut parts = Vec::new();
    let years = interval.months / 12;
    let months = interval.months % 12;
    if years != 0 {
        parts.push(format!("{} year{}", years, if years.abs() == 1 { "" } else { "s" }));
    }
    if months != 0 {
        parts.push(format!("{} mon{}", months, if months.abs() == 1 { "" } else { "s" }));
    }
    if interval.days != 0 {
        let days = interval.days;
        parts.push(format!("{} day{}", days, if days.abs() == 1 { "" } else { "s" }));
    }

    let micros = interval.microseconds;
    if micros != 0 || parts.is_empty() {
        let sign = if micros < 0 { "-" } else { "" };
        let total = micros.unsigned_abs();
        let secs = total / 1_000_000;
        let frac = total % 1_000_000;
        let mut time = format!("{}{:02}:{:02}:{:02}", sign, secs / 3600, (secs / 60) % 60, secs % 60);
        if frac != 0 {
            let frac = format!("{:06}", frac);
            time.push('.');
            time.push_str(frac.trim_end_matches('0'));
        }
        parts.push(time);
    }

    parts.join(" ")
}

// =============================================================================
// Row to JSON Trait
// =============================================================================

/// Trait for converting database rows to JSON maps.
pub trait RowToJson {
    fn to_json_map(&self) -> JsonRow;
    fn column_metadata(&self) -> Vec<ColumnMetadata>;
}

impl RowToJson for PgRow {
    fn to_json_map(&self) -> JsonRow {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let type_name = col.type_info().name();
                let value = decode_column(self, idx, type_name, categorize_type(type_name));
                (col.name().to_string(), value)
            })
            .collect()
    }

    fn column_metadata(&self) -> Vec<ColumnMetadata> {
        self.columns()
            .iter()
            .map(|col| ColumnMetadata::new(col.name(), col.type_info().name()))
            .collect()
    }
}

// =============================================================================
// Decoders
// =============================================================================

fn decode_column(row: &PgRow, idx: usize, type_name: &str, category: TypeCategory) -> JsonValue {
    match row.try_get_raw(idx) {
        Ok(raw) if raw.is_null() => return JsonValue::Null,
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(column = idx, error = %e, "Failed to read column");
            return JsonValue::Null;
        }
    }

    let decoded = match category {
        TypeCategory::Decimal => decode_decimal(row, idx),
        TypeCategory::Integer => decode_integer(row, idx),
        TypeCategory::Boolean => row.try_get::<bool, _>(idx).ok().map(JsonValue::Bool),
        TypeCategory::Float => decode_float(row, idx),
        TypeCategory::Binary => row
            .try_get::<Vec<u8>, _>(idx)
            .ok()
            .map(|v| decode_binary_value(&v)),
        TypeCategory::Json => row.try_get::<JsonValue, _>(idx).ok(),
        TypeCategory::Timestamp => row
            .try_get::<NaiveDateTime, _>(idx)
            .ok()
            .map(|v| JsonValue::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        TypeCategory::TimestampTz => row
            .try_get::<DateTime<Utc>, _>(idx)
            .ok()
            .map(|v| JsonValue::String(v.to_rfc3339())),
        TypeCategory::Date => row
            .try_get::<NaiveDate, _>(idx)
            .ok()
            .map(|v| JsonValue::String(v.to_string())),
        TypeCategory::Time => row
            .try_get::<NaiveTime, _>(idx)
            .ok()
            .map(|v| JsonValue::String(v.to_string())),
        TypeCategory::Interval => row
            .try_get::<PgInterval, _>(idx)
            .ok()
            .map(|v| JsonValue::String(format_interval(&v))),
        TypeCategory::Array => decode_array(row, idx, type_name),
        TypeCategory::Text => row.try_get::<String, _>(idx).ok().map(JsonValue::String),
        TypeCategory::Uuid | TypeCategory::Unknown => None,
    };

    decoded.unwrap_or_else(|| decode_raw(row, idx, category))
}

fn decode_decimal(row: &PgRow, idx: usize) -> Option<JsonValue> {
    match row.try_get::<RawDecimal, _>(idx) {
        Ok(v) => Some(JsonValue::String(v.0)),
        Err(e) => {
            tracing::error!("Failed to decode NUMERIC: {:?}", e);
            None
        }
    }
}

fn decode_integer(row: &PgRow, idx: usize) -> Option<JsonValue> {
    if let Ok(v) = row.try_get::<i64, _>(idx) {
        return Some(JsonValue::Number(v.into()));
    }
    if let Ok(v) = row.try_get::<i32, _>(idx) {
        return Some(JsonValue::Number(v.into()));
    }
    if let Ok(v) = row.try_get::<i16, _>(idx) {
        return Some(JsonValue::Number(v.into()));
    }
    if let Ok(v) = row.try_get::<sqlx::postgres::types::Oid, _>(idx) {
        return Some(JsonValue::Number(v.0.into()));
    }
    None
}

fn decode_float(row: &PgRow, idx: usize) -> Option<JsonValue> {
    if let Ok(v) = row.try_get::<f64, _>(idx) {
        return Some(float_value(v));
    }
    if let Ok(v) = row.try_get::<f32, _>(idx) {
        return Some(float_value(v as f64));
    }
    None
}

fn decode_array(row: &PgRow, idx: usize, type_name: &str) -> Option<JsonValue> {
    fn to_json<T, F>(values: Vec<Option<T>>, f: F) -> JsonValue
    where
        F: Fn(T) -> JsonValue,
    {
        JsonValue::Array(
            values
                .into_iter()
                .map(|v| v.map(&f).unwrap_or(JsonValue::Null))
                .collect(),
        )
    }

    let element = type_name
        .trim_end_matches("[]")
        .trim_start_matches('_')
        .to_lowercase();
    match element.as_str() {
        "int2" => row
            .try_get::<Vec<Option<i16>>, _>(idx)
            .ok()
            .map(|v| to_json(v, |x| JsonValue::Number(x.into()))),
        "int4" => row
            .try_get::<Vec<Option<i32>>, _>(idx)
            .ok()
            .map(|v| to_json(v, |x| JsonValue::Number(x.into()))),
        "int8" => row
            .try_get::<Vec<Option<i64>>, _>(idx)
            .ok()
            .map(|v| to_json(v, |x| JsonValue::Number(x.into()))),
        "float4" => row
            .try_get::<Vec<Option<f32>>, _>(idx)
            .ok()
            .map(|v| to_json(v, |x| float_value(x as f64))),
        "float8" => row
            .try_get::<Vec<Option<f64>>, _>(idx)
            .ok()
            .map(|v| to_json(v, float_value)),
        "bool" => row
            .try_get::<Vec<Option<bool>>, _>(idx)
            .ok()
            .map(|v| to_json(v, JsonValue::Bool)),
        _ => row
            .try_get::<Vec<Option<String>>, _>(idx)
            .ok()
            .map(|v| to_json(v, JsonValue::String)),
    }
}

/// Last resort: text values verbatim, binary values by known layout or base64.
fn decode_raw(row: &PgRow, idx: usize, category: TypeCategory) -> JsonValue {
    let Ok(raw) = row.try_get_raw(idx) else {
        return JsonValue::Null;
    };
    match raw.format() {
        PgValueFormat::Text => raw
            .as_str()
            .map(|s| JsonValue::String(s.to_string()))
            .unwrap_or(JsonValue::Null),
        PgValueFormat::Binary => match raw.as_bytes() {
            Ok(bytes) if category == TypeCategory::Uuid => uuid::Uuid::from_slice(bytes)
                .map(|u| JsonValue::String(u.to_string()))
                .unwrap_or_else(|_| decode_binary_value(bytes)),
            Ok(bytes) => match std::str::from_utf8(bytes) {
                Ok(s) if category == TypeCategory::Text => JsonValue::String(s.to_string()),
                _ => decode_binary_value(bytes),
            },
            Err(_) => JsonValue::Null,
        },
    }
}

//! Runtime values and strict coercion from JSON input.
//!
//! Coercion is lossless or it fails: integral floats are accepted for
//! integer fields, numeric strings are parsed, but nothing is ever rounded,
//! truncated or guessed.

use std::str::FromStr as _;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::{
  Error, Result,
  compile::CompiledField,
  field::{DEFAULT_DECIMAL_PRECISION, DEFAULT_DECIMAL_SCALE, ENUM_CODE_LENGTH, FieldType},
};

// ─── Value ───────────────────────────────────────────────────────────────────

/// A single typed cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  Null,
  Bool(bool),
  Integer(i64),
  Decimal(Decimal),
  Text(String),
  DateTime(DateTime<Utc>),
  Date(NaiveDate),
  Guid(Uuid),
}

impl Value {
  pub fn is_null(&self) -> bool { matches!(self, Self::Null) }

  pub fn as_i64(&self) -> Option<i64> {
    match self {
      Self::Integer(i) => Some(*i),
      _ => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Self::Text(s) => Some(s),
      _ => None,
    }
  }

  pub fn to_json(&self) -> serde_json::Value {
    match self {
      Self::Null => serde_json::Value::Null,
      Self::Bool(b) => (*b).into(),
      Self::Integer(i) => (*i).into(),
      Self::Decimal(d) => d.to_string().into(),
      Self::Text(s) => s.clone().into(),
      Self::DateTime(dt) => format_datetime(*dt).into(),
      Self::Date(d) => format_date(*d).into(),
      Self::Guid(g) => g.to_string().into(),
    }
  }
}

impl Serialize for Value {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    self.to_json().serialize(serializer)
  }
}

// ─── Text formats ────────────────────────────────────────────────────────────

/// Fixed-width UTC timestamp so text order is chronological order.
pub fn format_datetime(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn format_date(d: NaiveDate) -> String { d.format("%Y-%m-%d").to_string() }

/// Accepts RFC 3339, naive ISO 8601 (taken as UTC) and SQLite's
/// `YYYY-MM-DD HH:MM:SS`.
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
  if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
    return Some(dt.with_timezone(&Utc));
  }
  ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
    .iter()
    .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
    .map(|naive| naive.and_utc())
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
  NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

// ─── Defaults ────────────────────────────────────────────────────────────────

/// A parsed default value.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
  Literal(Value),
  /// Current timestamp at write time.
  Now,
  /// Current date at write time.
  Today,
  /// Fresh UUID at write time.
  NewId,
}

impl DefaultValue {
  pub fn parse(field_type: FieldType, raw: &str) -> Result<Self, String> {
    let token = raw.trim();
    match field_type {
      FieldType::DateTime if token.eq_ignore_ascii_case("NOW") => return Ok(Self::Now),
      FieldType::Date if token.eq_ignore_ascii_case("TODAY") => return Ok(Self::Today),
      FieldType::Guid if token.eq_ignore_ascii_case("NEWID") => return Ok(Self::NewId),
      FieldType::EntityRef => return Err("entity references cannot have defaults".into()),
      _ => {}
    }
    scalar(field_type, &serde_json::Value::String(raw.to_owned()))
      .map(Self::Literal)
      .map_err(|e| match e {
        Error::TypeCoercion { message, .. } => message,
        other => other.to_string(),
      })
  }

  /// Evaluate at write time.
  pub fn evaluate(&self) -> Value {
    match self {
      Self::Literal(v) => v.clone(),
      Self::Now => Value::DateTime(Utc::now()),
      Self::Today => Value::Date(Utc::now().date_naive()),
      Self::NewId => Value::Guid(Uuid::new_v4()),
    }
  }
}

// ─── Coercion ────────────────────────────────────────────────────────────────

/// Coerce a JSON value for a compiled field, enforcing length, precision,
/// scale and the field's validation rules. `null` passes through; required
/// checks belong to the caller.
pub fn coerce(field: &CompiledField, raw: &serde_json::Value) -> Result<Value> {
  let mut value = scalar(field.field_type, raw).map_err(|e| rename(e, &field.name))?;
  check_constraints(field, &value)?;
  if let Value::Decimal(d) = &mut value {
    d.rescale(field.scale.unwrap_or(DEFAULT_DECIMAL_SCALE));
  }
  Ok(value)
}

/// Coerce a filter operand: type only, no length or rule checks.
pub fn coerce_filter(field: &CompiledField, raw: &serde_json::Value) -> Result<Value> {
  let value = scalar(field.field_type, raw).map_err(|e| rename(e, &field.name))?;
  Ok(match (value, field.scale) {
    (Value::Decimal(d), Some(scale)) if d.scale() < scale => {
      let mut d = d;
      d.rescale(scale);
      Value::Decimal(d)
    }
    (value, _) => value,
  })
}

/// Best-effort conversion for raw table access, where no field metadata is
/// available.
pub fn loose(raw: &serde_json::Value) -> Result<Value> {
  Ok(match raw {
    serde_json::Value::Null => Value::Null,
    serde_json::Value::Bool(b) => Value::Bool(*b),
    serde_json::Value::Number(n) => match n.as_i64() {
      Some(i) => Value::Integer(i),
      None => Value::Decimal(
        Decimal::from_str(&n.to_string()).map_err(|e| Error::coercion("<raw>", e.to_string()))?,
      ),
    },
    serde_json::Value::String(s) => Value::Text(s.clone()),
    other => return Err(Error::coercion("<raw>", format!("unsupported value {other}"))),
  })
}

fn rename(err: Error, field: &str) -> Error {
  match err {
    Error::TypeCoercion { message, .. } => Error::coercion(field, message),
    other => other,
  }
}

/// Type-level conversion. Errors carry a placeholder field name.
fn scalar(field_type: FieldType, raw: &serde_json::Value) -> Result<Value> {
  use serde_json::Value as J;

  let fail = |expected: &str| {
    Error::coercion("<value>", format!("expected {expected}, got {}", json_kind(raw)))
  };

  if raw.is_null() {
    return Ok(Value::Null);
  }

  match field_type {
    FieldType::String | FieldType::Text | FieldType::Enum => match raw {
      J::String(s) => Ok(Value::Text(s.clone())),
      _ => Err(fail("text")),
    },
    FieldType::Integer => {
      let i = integral(raw).ok_or_else(|| fail("a 32-bit integer"))?;
      i32::try_from(i)
        .map(|i| Value::Integer(i64::from(i)))
        .map_err(|_| Error::coercion("<value>", format!("{i} is out of 32-bit integer range")))
    }
    FieldType::Long => integral(raw).map(Value::Integer).ok_or_else(|| fail("an integer")),
    FieldType::EntityRef => match integral(raw) {
      Some(id) if id > 0 => Ok(Value::Integer(id)),
      Some(id) => Err(Error::coercion("<value>", format!("{id} is not a valid row id"))),
      None => Err(fail("a row id")),
    },
    FieldType::Decimal => {
      let text = match raw {
        J::Number(n) => n.to_string(),
        J::String(s) => s.trim().to_owned(),
        _ => return Err(fail("a decimal")),
      };
      Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map(Value::Decimal)
        .map_err(|_| fail("a decimal"))
    }
    FieldType::Boolean => match raw {
      J::Bool(b) => Ok(Value::Bool(*b)),
      J::String(s) if s.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
      J::String(s) if s.eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
      _ => Err(fail("a boolean")),
    },
    FieldType::DateTime => raw
      .as_str()
      .and_then(parse_datetime)
      .map(Value::DateTime)
      .ok_or_else(|| fail("an ISO 8601 timestamp")),
    FieldType::Date => raw
      .as_str()
      .and_then(parse_date)
      .map(Value::Date)
      .ok_or_else(|| fail("a YYYY-MM-DD date")),
    FieldType::Guid => raw
      .as_str()
      .and_then(|s| Uuid::parse_str(s).ok())
      .map(Value::Guid)
      .ok_or_else(|| fail("a UUID")),
  }
}

/// Integers, integral floats and integer strings.
fn integral(raw: &serde_json::Value) -> Option<i64> {
  match raw {
    serde_json::Value::Number(n) => n.as_i64().or_else(|| {
      n.as_f64()
        .filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15)
        .map(|f| f as i64)
    }),
    serde_json::Value::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}

fn check_constraints(field: &CompiledField, value: &Value) -> Result<()> {
  let name = field.name.as_str();
  match value {
    Value::Text(s) => {
      let chars = s.chars().count();
      let limit = match field.field_type {
        FieldType::Enum => Some(ENUM_CODE_LENGTH),
        _ => field.length,
      };
      if let Some(limit) = limit
        && chars > limit as usize
      {
        return Err(Error::coercion(
          name,
          format!("{chars} characters exceeds the maximum length of {limit}"),
        ));
      }
      if let Some(min) = field.rules.min_length
        && chars < min
      {
        return Err(Error::coercion(name, format!("must be at least {min} characters")));
      }
      if let Some(max) = field.rules.max_length
        && chars > max
      {
        return Err(Error::coercion(name, format!("must be at most {max} characters")));
      }
      if let Some(pattern) = &field.rules.pattern
        && !pattern.is_match(s)
      {
        return Err(Error::coercion(
          name,
          format!("does not match pattern {:?}", pattern.as_str()),
        ));
      }
    }
    Value::Decimal(d) => {
      let precision = field.precision.unwrap_or(DEFAULT_DECIMAL_PRECISION);
      let scale = field.scale.unwrap_or(DEFAULT_DECIMAL_SCALE);
      let normalized = d.normalize();
      if normalized.scale() > scale {
        return Err(Error::coercion(
          name,
          format!("{d} has more than {scale} decimal places"),
        ));
      }
      let integer_digits = integer_digits(&normalized);
      if integer_digits > precision.saturating_sub(scale) {
        return Err(Error::coercion(
          name,
          format!("{d} does not fit precision {precision} and scale {scale}"),
        ));
      }
      check_range(field, *d)?;
    }
    Value::Integer(i) if matches!(field.field_type, FieldType::Integer | FieldType::Long) => {
      check_range(field, Decimal::from(*i))?;
    }
    _ => {}
  }
  Ok(())
}

fn check_range(field: &CompiledField, n: Decimal) -> Result<()> {
  if let Some(min) = field.rules.min
    && n < min
  {
    return Err(Error::coercion(&field.name, format!("{n} is less than the minimum {min}")));
  }
  if let Some(max) = field.rules.max
    && n > max
  {
    return Err(Error::coercion(&field.name, format!("{n} is greater than the maximum {max}")));
  }
  Ok(())
}

fn integer_digits(d: &Decimal) -> u32 {
  let whole = d.trunc().abs().to_string();
  if whole == "0" { 0 } else { whole.len() as u32 }
}

fn json_kind(raw: &serde_json::Value) -> &'static str {
  match raw {
    serde_json::Value::Null => "null",
    serde_json::Value::Bool(_) => "a boolean",
    serde_json::Value::Number(_) => "a number",
    serde_json::Value::String(_) => "text",
    serde_json::Value::Array(_) => "an array",
    serde_json::Value::Object(_) => "an object",
  }
}

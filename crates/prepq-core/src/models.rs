//! Argument values shared by the proxy, normalizer and executor layers.

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDateTime, Timelike};
use indexmap::IndexMap;

use crate::errors::{PrepqError, PrepqResult};

/// Named arguments of one call, in the order the caller supplied them.
pub type Arguments = IndexMap<String, Value>;

// ---------------------------------------------------------------------------
// ModelRef
// ---------------------------------------------------------------------------

/// Reference to a domain object (a model row).
///
/// Builders may read attributes off such objects, so they are never proxied.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ModelRef {
    pub model: String,
    pub pk: i64,
}

impl ModelRef {
    pub fn new(model: impl Into<String>, pk: i64) -> Self {
        Self {
            model: model.into(),
            pk,
        }
    }
}

// ---------------------------------------------------------------------------
// ScalarKind
// ---------------------------------------------------------------------------

/// Target type of an explicit coercion requested by a builder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Int,
    Text,
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarKind::Int => f.write_str("int"),
            ScalarKind::Text => f.write_str("text"),
        }
    }
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A real argument or parameter value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Real(f64),
    Text(String),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<FixedOffset>),
    List(Vec<Value>),
    Model(ModelRef),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
            Value::Timestamp(_) => "timestamp",
            Value::TimestampTz(_) => "timestamptz",
            Value::List(_) => "list",
            Value::Model(_) => "model",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Value::List(_))
    }

    pub fn is_timestamp(&self) -> bool {
        matches!(self, Value::Timestamp(_) | Value::TimestampTz(_))
    }

    /// Truthiness of a real value: null, false, zero, empty text and empty
    /// lists are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Real(r) => *r != 0.0,
            Value::Text(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Timestamp(_) | Value::TimestampTz(_) | Value::Model(_) => true,
        }
    }

    /// Coerce to the requested scalar kind.
    ///
    /// Shared by the real construction path and by typed proxy resolution so
    /// both produce the same parameter value.
    pub fn coerce(&self, kind: ScalarKind) -> PrepqResult<Value> {
        let fail = || {
            PrepqError::Builder(format!(
                "cannot coerce {} value to {kind}",
                self.type_name()
            ))
        };
        match kind {
            ScalarKind::Int => match self {
                Value::Int(i) => Ok(Value::Int(*i)),
                Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
                Value::Real(r) if r.fract() == 0.0 && in_i64_range(*r) => Ok(Value::Int(*r as i64)),
                Value::Text(s) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| fail()),
                _ => Err(fail()),
            },
            ScalarKind::Text => match self {
                Value::Text(s) => Ok(Value::Text(s.clone())),
                Value::Int(i) => Ok(Value::Text(i.to_string())),
                Value::Real(r) => Ok(Value::Text(r.to_string())),
                Value::Bool(b) => Ok(Value::Text(b.to_string())),
                Value::Timestamp(_) | Value::TimestampTz(_) => {
                    Ok(Value::Text(self.to_string()))
                }
                _ => Err(fail()),
            },
        }
    }

    /// Timestamps become their canonical text; anything else is unchanged.
    pub fn into_canonical(self) -> Value {
        match self {
            Value::Timestamp(dt) => Value::Text(canonical_naive(&dt)),
            Value::TimestampTz(dt) => Value::Text(canonical_tz(&dt)),
            other => other,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Timestamp(dt) => f.write_str(&canonical_naive(dt)),
            Value::TimestampTz(dt) => f.write_str(&canonical_tz(dt)),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Model(m) => write!(f, "<{} pk={}>", m.model, m.pk),
        }
    }
}

/// Finite and inside `[-2^63, 2^63)`, so `as i64` does not saturate.
fn in_i64_range(r: f64) -> bool {
    r.is_finite() && r >= i64::MIN as f64 && r < i64::MAX as f64
}

// -- conversions ------------------------------------------------------------

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(v: DateTime<FixedOffset>) -> Self {
        Value::TimestampTz(v)
    }
}

impl From<ModelRef> for Value {
    fn from(v: ModelRef) -> Self {
        Value::Model(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

// ---------------------------------------------------------------------------
// Canonical date/time text
// ---------------------------------------------------------------------------

/// `YYYY-MM-DD HH:MM:SS[.ffffff]`, the fractional part only when non-zero.
pub fn canonical_naive(dt: &NaiveDateTime) -> String {
    let mut out = dt.format("%Y-%m-%d %H:%M:%S").to_string();
    let micros = dt.nanosecond() / 1_000;
    if micros != 0 {
        out.push_str(&format!(".{micros:06}"));
    }
    out
}

/// Canonical naive text followed by the `+HH:MM` offset.
pub fn canonical_tz(dt: &DateTime<FixedOffset>) -> String {
    let mut out = canonical_naive(&dt.naive_local());
    out.push_str(&dt.format("%:z").to_string());
    out
}

/// Build an [`Arguments`] map from `(name, value)` pairs.
pub fn arguments<I, K, V>(pairs: I) -> Arguments
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(h: u32, micro: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_micro_opt(h, 5, 6, micro)
            .unwrap()
    }

    #[test]
    fn truthiness_follows_value_content() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::Text(String::new()).is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
        assert!(Value::List(vec![Value::Int(0)]).is_truthy());
        assert!(Value::Timestamp(ts(1, 0)).is_truthy());
    }

    #[test]
    fn canonical_timestamp_text() {
        assert_eq!(canonical_naive(&ts(4, 0)), "2024-03-09 04:05:06");
        assert_eq!(canonical_naive(&ts(4, 120)), "2024-03-09 04:05:06.000120");

        let offset = FixedOffset::east_opt(3 * 3600).unwrap();
        let aware = ts(4, 0).and_local_timezone(offset).unwrap();
        assert_eq!(canonical_tz(&aware), "2024-03-09 04:05:06+03:00");
    }

    #[test]
    fn into_canonical_only_touches_timestamps() {
        assert_eq!(
            Value::Timestamp(ts(4, 0)).into_canonical(),
            Value::Text("2024-03-09 04:05:06".into())
        );
        assert_eq!(Value::Int(3).into_canonical(), Value::Int(3));
    }

    #[test]
    fn coerce_int() {
        assert_eq!(Value::Text(" 42 ".into()).coerce(ScalarKind::Int).unwrap(), Value::Int(42));
        assert_eq!(Value::Bool(true).coerce(ScalarKind::Int).unwrap(), Value::Int(1));
        assert_eq!(Value::Real(7.0).coerce(ScalarKind::Int).unwrap(), Value::Int(7));
        assert!(Value::Real(7.5).coerce(ScalarKind::Int).is_err());
        assert_eq!(
            Value::Real(-9_223_372_036_854_775_808.0).coerce(ScalarKind::Int).unwrap(),
            Value::Int(i64::MIN)
        );
        assert!(Value::Real(1e20).coerce(ScalarKind::Int).is_err());
        assert!(Value::Real(9_223_372_036_854_775_808.0).coerce(ScalarKind::Int).is_err());
        assert!(Value::Real(f64::INFINITY).coerce(ScalarKind::Int).is_err());
        assert!(Value::List(vec![]).coerce(ScalarKind::Int).is_err());
    }

    #[test]
    fn coerce_text() {
        assert_eq!(Value::Int(5).coerce(ScalarKind::Text).unwrap(), Value::Text("5".into()));
        assert_eq!(
            Value::Timestamp(ts(4, 0)).coerce(ScalarKind::Text).unwrap(),
            Value::Text("2024-03-09 04:05:06".into())
        );
        assert!(Value::Null.coerce(ScalarKind::Text).is_err());
    }

    #[test]
    fn arguments_helper_keeps_order() {
        let args = arguments([("b", Value::Int(1)), ("a", Value::Null)]);
        let names: Vec<&str> = args.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}

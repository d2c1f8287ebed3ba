//! The tagged scalar value stored in rows.
//!
//! Comparison and coercion are explicit: integers widen to floats when the
//! two sides differ, cross-kind comparisons yield `false` rather than errors,
//! and NULL is never equal to anything, including itself.

use std::cmp::Ordering;
use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A runtime scalar value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit floating point.
    Float(f64),
    /// String value (CHAR / VARCHAR).
    Str(String),
    /// Boolean value.
    Bool(bool),
}

impl Value {
    /// Creates a string value.
    pub fn string(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    /// Returns true if this value is NULL.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the kind name, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bool(_) => "boolean",
        }
    }

    /// Returns the numeric view of this value, widening integers to floats.
    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Equality with numeric coercion.
    ///
    /// NULL compares unequal to everything, including NULL. Numeric kinds
    /// coerce int↔float; any other cross-kind pair is unequal.
    pub fn eq_coerced(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    /// Ordering with numeric coercion.
    ///
    /// Returns `None` when either side is NULL or the kinds are incomparable;
    /// callers treat `None` as a false predicate, never an error.
    pub fn cmp_coerced(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        }
    }

    /// LIKE pattern matching.
    ///
    /// Supports leading and trailing `%` only: `%x%` is substring, `x%` is
    /// prefix, `%x` is suffix, and a bare pattern is exact match.
    pub fn like(&self, pattern: &str) -> bool {
        let s = match self {
            Value::Str(s) => s.as_str(),
            _ => return false,
        };
        let leading = pattern.starts_with('%');
        let trailing = pattern.ends_with('%') && pattern.len() > 1;
        let core = pattern.trim_start_matches('%').trim_end_matches('%');
        match (leading, trailing) {
            (true, true) => s.contains(core),
            (true, false) => s.ends_with(core),
            (false, true) => s.starts_with(core),
            (false, false) => s == core,
        }
    }

    /// Sort key used by ORDER BY: NULLs first, then by coerced ordering.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self.cmp_coerced(other).unwrap_or(Ordering::Equal),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{}", s),
            Value::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

// Values cross the WAL as JSON scalars; the representation is the natural
// JSON one (null, number, string, bool), so round-trips stay human-readable.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(v) => serializer.serialize_f64(*v),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Bool(b) => serializer.serialize_bool(*b),
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a JSON scalar (null, number, string, or boolean)")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        Ok(Value::Int(v as i64))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        Ok(Value::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::Str(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        Ok(Value::Str(v))
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Value, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_coercion() {
        assert!(Value::Int(3).eq_coerced(&Value::Float(3.0)));
        assert!(Value::Float(2.5).eq_coerced(&Value::Float(2.5)));
        assert!(!Value::Int(3).eq_coerced(&Value::Int(4)));
        assert_eq!(
            Value::Int(1).cmp_coerced(&Value::Float(1.5)),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn test_null_never_equal() {
        assert!(!Value::Null.eq_coerced(&Value::Null));
        assert!(!Value::Null.eq_coerced(&Value::Int(0)));
        assert_eq!(Value::Null.cmp_coerced(&Value::Int(0)), None);
    }

    #[test]
    fn test_cross_kind_is_false_not_error() {
        assert!(!Value::Str("3".into()).eq_coerced(&Value::Int(3)));
        assert!(!Value::Bool(true).eq_coerced(&Value::Int(1)));
        assert_eq!(Value::Str("a".into()).cmp_coerced(&Value::Int(1)), None);
    }

    #[test]
    fn test_like_patterns() {
        let v = Value::string("premium user");
        assert!(v.like("%user"));
        assert!(v.like("premium%"));
        assert!(v.like("%mium u%"));
        assert!(v.like("premium user"));
        assert!(!v.like("basic%"));
        assert!(!Value::Int(5).like("%5%"));
    }

    #[test]
    fn test_json_round_trip() {
        for v in [
            Value::Null,
            Value::Int(-7),
            Value::Float(1.25),
            Value::string("hello"),
            Value::Bool(true),
        ] {
            let text = serde_json::to_string(&v).unwrap();
            let back: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(v, back);
        }
    }
}

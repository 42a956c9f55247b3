//! Dynamically-typed statement parameters and timestamp encoding.
//!
//! Batched and detached writes carry their parameters across task
//! boundaries, so parameters are owned [`SqlValue`]s rather than borrowed
//! bind arguments. Timestamps are stored as Unix milliseconds.

use chrono::{DateTime, Utc};

/// One bound parameter of a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL `NULL`.
    Null,
    /// 64-bit integer.
    Integer(i64),
    /// Double-precision float.
    Real(f64),
    /// UTF-8 text.
    Text(String),
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<u32> for SqlValue {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl<T: Into<Self>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Build a parameter list from heterogeneous values.
///
/// ```
/// use genforge_db::{params, SqlValue};
///
/// let values = params![7_i64, "world", 1.5_f64];
/// assert_eq!(values[1], SqlValue::Text(String::from("world")));
/// ```
#[macro_export]
macro_rules! params {
    () => {
        ::std::vec::Vec::<$crate::SqlValue>::new()
    };
    ($($value:expr),+ $(,)?) => {
        ::std::vec![$($crate::SqlValue::from($value)),+]
    };
}

/// Bind every [`SqlValue`] in `$params` onto a `sqlx` query builder.
///
/// Works for `query`, `query_as`, and `query_scalar` builders alike.
macro_rules! bind_params {
    ($query:expr, $params:expr) => {{
        let mut query = $query;
        for value in $params.iter() {
            query = match value {
                $crate::value::SqlValue::Null => query.bind(None::<i64>),
                $crate::value::SqlValue::Integer(v) => query.bind(*v),
                $crate::value::SqlValue::Real(v) => query.bind(*v),
                $crate::value::SqlValue::Text(v) => query.bind(v.clone()),
            };
        }
        query
    }};
}

pub(crate) use bind_params;

/// Encode a timestamp as Unix milliseconds.
pub fn to_millis(timestamp: DateTime<Utc>) -> i64 {
    timestamp.timestamp_millis()
}

/// Decode Unix milliseconds, falling back to the epoch for out-of-range
/// values.
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_maps_to_null() {
        assert_eq!(SqlValue::from(None::<i64>), SqlValue::Null);
        assert_eq!(SqlValue::from(Some(3_i64)), SqlValue::Integer(3));
    }

    #[test]
    fn bool_is_stored_as_integer() {
        assert_eq!(SqlValue::from(true), SqlValue::Integer(1));
        assert_eq!(SqlValue::from(false), SqlValue::Integer(0));
    }

    #[test]
    fn params_macro_converts_each_value() {
        let values = crate::params![1_i32, "a", None::<String>];
        assert_eq!(
            values,
            vec![
                SqlValue::Integer(1),
                SqlValue::Text(String::from("a")),
                SqlValue::Null,
            ]
        );
    }

    #[test]
    fn millis_roundtrip() {
        let now = from_millis(1_700_000_000_123);
        assert_eq!(to_millis(now), 1_700_000_000_123);
    }
}

//! Ordering: total within a type bucket, stringified fallback across
//! buckets (§4.A).

use std::cmp::Ordering;

use crate::{to_string::value_to_string, Value};

/// Which bucket a value falls into for ordering purposes. Values only ever
/// compare "natively" against another value in the same bucket; anything
/// else falls back to comparing `valueToString` output.
#[derive(PartialEq, Eq)]
enum Bucket {
    Bool,
    Number,
    Text,
    Binary,
    Instant,
    Time,
    Duration,
    Compound,
}

fn bucket_of(v: &Value) -> Bucket {
    match v {
        Value::Bool(_) => Bucket::Bool,
        Value::Number(_) | Value::Decimal(_) => Bucket::Number,
        Value::Text(_) => Bucket::Text,
        Value::Binary(_) => Bucket::Binary,
        Value::Date(_) | Value::DateTime(_) | Value::DateTimeTz { .. } => Bucket::Instant,
        Value::Time(_) => Bucket::Time,
        Value::Duration(_) => Bucket::Duration,
        Value::Table(_) | Value::List(_) | Value::Record(_) | Value::Error(_) | Value::Null => {
            Bucket::Compound
        }
    }
}

fn instant_millis(v: &Value) -> i64 {
    match v {
        Value::Date(d) => d.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp_millis(),
        Value::DateTime(dt) => dt.timestamp_millis(),
        Value::DateTimeTz { instant, .. } => instant.timestamp_millis(),
        _ => unreachable!("instant_millis called on a non-instant value"),
    }
}

fn numeric(v: &Value) -> f64 {
    v.as_f64().unwrap_or(f64::NAN)
}

/// Compares two non-null values. NaN sorts after every other number but
/// compares equal to itself, matching `sortRows`'s "type-aware comparison".
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    let (ba, bb) = (bucket_of(a), bucket_of(b));
    if ba == bb {
        compare_within_bucket(a, b)
    } else {
        value_to_string(a).cmp(&value_to_string(b))
    }
}

/// Compares two values already known to be in the same bucket.
pub fn compare_within_bucket(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(_) | Value::Decimal(_), Value::Number(_) | Value::Decimal(_)) => {
            total_cmp_f64(numeric(a), numeric(b))
        }
        (Value::Text(x), Value::Text(y)) => x.cmp(y),
        (Value::Binary(x), Value::Binary(y)) => x.cmp(y),
        (
            Value::Date(_) | Value::DateTime(_) | Value::DateTimeTz { .. },
            Value::Date(_) | Value::DateTime(_) | Value::DateTimeTz { .. },
        ) => instant_millis(a).cmp(&instant_millis(b)),
        (Value::Time(x), Value::Time(y)) => x.cmp(y),
        (Value::Duration(x), Value::Duration(y)) => x.cmp(y),
        _ => value_to_string(a).cmp(&value_to_string(b)),
    }
}

/// NaN always sorts last, otherwise standard IEEE ordering.
fn total_cmp_f64(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_sorts_last() {
        let mut v = vec![
            Value::Number(1.0),
            Value::Number(f64::NAN),
            Value::Number(-1.0),
        ];
        v.sort_by(compare_values);
        assert!(matches!(v[2], Value::Number(n) if n.is_nan()));
    }

    #[test]
    fn cross_bucket_falls_back_to_string() {
        let a = Value::Number(1.0);
        let b = Value::Text("1".to_string());
        assert_eq!(compare_values(&a, &b), Ordering::Equal);
    }
}

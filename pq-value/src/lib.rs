//! The tagged scalar value model (§3.1 of the engine design).
//!
//! A cell in a power-query table is one of a closed set of variants:
//! `null`, boolean, an IEEE-754 double, an arbitrary-precision decimal
//! carried as a normalized digit string, UTF-8 text, a binary blob, four
//! distinct date/time flavors, a nested table, a nested list or record, or
//! an [`Value::Error`] datum that every operator except the error-aware ones
//! propagates unchanged.
//!
//! [`Value::key`] is the single source of truth for value-equality: it is
//! what grouping, `distinctRows`, join probing, and `replaceValues` all key
//! off of, specifically so that `NaN == NaN`, `-0.0 == 0.0`, and two dates
//! with identical instants compare equal, while still being a perfectly
//! ordinary `String` comparison once computed.

mod compare;
mod key;
mod predicate;
mod table;
mod to_string;

pub use compare::compare_within_bucket;
pub use key::composite_key;
pub use table::TableValue;

use chrono::{DateTime, NaiveDate, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A single cell value.
///
/// `Clone` is cheap for scalars and `Arc`-free by design: tables are
/// immutable once returned from an operator (§3.5 "Lifecycles"), so cloning
/// a `Value` out of a row is the normal way to read it without holding a
/// borrow on the table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    /// IEEE-754 f64. May be `NaN`, `+Infinity`, `-Infinity`, or signed zero.
    Number(f64),
    /// Arbitrary-precision decimal, stored as a normalized digit string
    /// (optional leading `-`, no leading zeros except a bare `0`, optional
    /// `.` followed by at least one digit).
    Decimal(String),
    Text(String),
    Binary(Vec<u8>),
    /// Midnight-UTC projection of an instant: only the calendar date
    /// matters.
    Date(NaiveDate),
    /// An instant in time (UTC).
    DateTime(DateTime<Utc>),
    /// An instant plus the number of minutes east of UTC it was originally
    /// expressed in. Equality and ordering only ever look at the instant;
    /// the offset is carried for round-tripping `valueToString`.
    DateTimeTz {
        instant: DateTime<Utc>,
        offset_minutes: i32,
    },
    /// Milliseconds since midnight, `[0, 86_400_000)`.
    Time(i64),
    /// Signed milliseconds.
    Duration(i64),
    Table(TableValue),
    List(Vec<Value>),
    Record(IndexMap<String, Value>),
    /// A first-class error datum. Propagated unchanged by every operator
    /// except `removeRowsWithErrors` and `replaceErrorValues`, which observe
    /// it.
    Error(String),
}

impl Value {
    /// `null` and "absent" are unified on ingress: there is exactly one
    /// null representation once a value has entered the engine.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// The deterministic string key used for grouping, `distinctRows`, join
    /// probing, and `replaceValues` matching. See [`key`] for the encoding.
    pub fn key(&self) -> String {
        key::value_key(self)
    }

    /// `equals`/`notEquals`: value-equality via [`Value::key`], so
    /// `null == null`, `NaN == NaN`, `-0.0 == 0.0`, and dates compare by
    /// instant regardless of which date-like variant they are.
    pub fn value_eq(&self, other: &Value) -> bool {
        self.key() == other.key()
    }

    /// `<`, `>`, `<=`, `>=`: `None` when either operand is null (the
    /// predicate then evaluates to `false`); `Some(Ordering)` is a total
    /// order within a type bucket, and a stringified fallback across
    /// buckets.
    pub fn partial_compare(&self, other: &Value) -> Option<std::cmp::Ordering> {
        if self.is_null() || other.is_null() {
            return None;
        }
        Some(compare::compare_values(self, other))
    }

    pub fn contains(&self, needle: &Value, case_sensitive: bool) -> bool {
        predicate::contains(self, needle, case_sensitive)
    }

    pub fn starts_with(&self, needle: &Value, case_sensitive: bool) -> bool {
        predicate::starts_with(self, needle, case_sensitive)
    }

    pub fn ends_with(&self, needle: &Value, case_sensitive: bool) -> bool {
        predicate::ends_with(self, needle, case_sensitive)
    }

    /// `valueToString`: dates render as ISO-8601 UTC, null renders as the
    /// empty string, everything else renders its canonical text form.
    pub fn to_display_string(&self) -> String {
        to_string::value_to_string(self)
    }

    /// Best-effort numeric projection, used by `sum`/`average`/etc. in
    /// `groupBy` (§4.D): non-numeric cells are skipped by the caller, not
    /// coerced here.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Decimal(d) => d.parse().ok(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_is_unified() {
        assert!(Value::Null.is_null());
    }

    #[test]
    fn nan_equals_nan_by_key() {
        assert!(Value::Number(f64::NAN).value_eq(&Value::Number(f64::NAN)));
    }

    #[test]
    fn signed_zero_equal_by_key() {
        assert!(Value::Number(0.0).value_eq(&Value::Number(-0.0)));
    }

    #[test]
    fn comparisons_are_false_on_null() {
        assert_eq!(Value::Null.partial_compare(&Value::Number(1.0)), None);
    }
}

//! `valueKey`: the canonical string encoding behind value-equality.

use crate::Value;

/// Computes the deterministic key for a value. Every variant is prefixed
/// with a short type tag so that, e.g., the text `"1"` never collides with
/// the number `1`.
pub fn value_key(v: &Value) -> String {
    match v {
        Value::Null => "n:".to_string(),
        Value::Bool(b) => format!("b:{b}"),
        Value::Number(n) => format!("f:{}", canonical_f64(*n)),
        Value::Decimal(d) => format!("d:{d}"),
        Value::Text(s) => format!("s:{s}"),
        Value::Binary(bytes) => format!("x:{}", base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            bytes,
        )),
        // Dates, datetimes, and datetimes-with-offset all key on their
        // instant: "two dates with identical instants compare equal".
        Value::Date(d) => {
            let instant = d.and_hms_opt(0, 0, 0).unwrap().and_utc();
            format!("t:{}", instant.timestamp_millis())
        }
        Value::DateTime(dt) => format!("t:{}", dt.timestamp_millis()),
        Value::DateTimeTz { instant, .. } => format!("t:{}", instant.timestamp_millis()),
        Value::Time(ms) => format!("o:{ms}"),
        Value::Duration(ms) => format!("u:{ms}"),
        Value::Table(t) => format!("tbl:{}", t.key()),
        Value::List(items) => {
            let parts: Vec<String> = items.iter().map(value_key).collect();
            format!("l:[{}]", parts.join(","))
        }
        Value::Record(fields) => {
            let mut keys: Vec<&String> = fields.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}={}", k, value_key(&fields[k])))
                .collect();
            format!("r:{{{}}}", parts.join(","))
        }
        Value::Error(msg) => format!("e:{msg}"),
    }
}

/// Normalizes `f64` bit patterns so that `NaN` always keys identically and
/// `-0.0`/`0.0` key identically, per the value-equality invariant.
fn canonical_f64(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else {
        // f64's Display is the shortest round-tripping representation and
        // is deterministic for a given bit pattern.
        n.to_string()
    }
}

/// A composite key over several column values, used by group-by, joins,
/// and distinct-over-columns. Deterministically serialized so it can be
/// used as a hash map key and compared across runs/spills.
pub fn composite_key(values: &[Value]) -> String {
    values
        .iter()
        .map(value_key)
        .collect::<Vec<_>>()
        .join("\u{1}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_key_is_order_sensitive() {
        let a = composite_key(&[Value::Number(1.0), Value::Text("x".into())]);
        let b = composite_key(&[Value::Text("x".into()), Value::Number(1.0)]);
        assert_ne!(a, b);
    }

    #[test]
    fn date_and_datetime_share_instant_key() {
        use chrono::NaiveDate;
        let d = Value::Date(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap());
        let dt = Value::DateTime(
            NaiveDate::from_ymd_opt(2020, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
                .and_utc(),
        );
        assert_eq!(value_key(&d), value_key(&dt));
    }
}

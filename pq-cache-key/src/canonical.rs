//! `stableStringify`: recursive canonicalization with sorted object keys.
//! Non-finite numbers, dates, binary blobs, and circular references all
//! become tagged objects of the form `{"$type": ..., "value"|"ref": ...}`
//! so that two structurally-equal-but-differently-ordered inputs always
//! stringify identically (§4.B).

use std::collections::BTreeMap;

use base64::Engine;
use pq_value::Value;

/// The canonical intermediate form every cache-keyable type is lowered
/// into before stringification.
#[derive(Clone, Debug, PartialEq)]
pub enum Canonical {
    Null,
    Bool(bool),
    Number(String),
    Str(String),
    Array(Vec<Canonical>),
    /// Always emitted with keys pre-sorted.
    Object(Vec<(String, Canonical)>),
    Tagged { ty: &'static str, value: Box<Canonical> },
}

impl Canonical {
    pub fn object(mut fields: Vec<(String, Canonical)>) -> Self {
        fields.sort_by(|a, b| a.0.cmp(&b.0));
        Canonical::Object(fields)
    }

    pub fn tagged(ty: &'static str, value: Canonical) -> Self {
        Canonical::Tagged { ty, value: Box::new(value) }
    }
}

/// Anything that can be lowered to a [`Canonical`] form for cache keying.
pub trait Canonicalize {
    fn canonicalize(&self) -> Canonical;
}

impl Canonicalize for Value {
    fn canonicalize(&self) -> Canonical {
        match self {
            Value::Null => Canonical::Null,
            Value::Bool(b) => Canonical::Bool(*b),
            Value::Number(n) => {
                if n.is_nan() {
                    Canonical::tagged("number-nan", Canonical::Null)
                } else if n.is_infinite() {
                    let sign = if *n > 0.0 { "+" } else { "-" };
                    Canonical::tagged("number-infinite", Canonical::Str(sign.to_string()))
                } else {
                    Canonical::Number(canonical_f64(*n))
                }
            }
            Value::Decimal(d) => Canonical::tagged("decimal", Canonical::Str(d.clone())),
            Value::Text(s) => Canonical::Str(s.clone()),
            Value::Binary(b) => Canonical::tagged(
                "binary",
                Canonical::Str(base64::engine::general_purpose::STANDARD.encode(b)),
            ),
            Value::Date(d) => Canonical::tagged("date", Canonical::Str(d.to_string())),
            Value::DateTime(dt) => Canonical::tagged("datetime", Canonical::Str(dt.to_rfc3339())),
            Value::DateTimeTz { instant, offset_minutes } => Canonical::tagged(
                "datetimetz",
                Canonical::object(vec![
                    ("instant".into(), Canonical::Str(instant.to_rfc3339())),
                    ("offsetMinutes".into(), Canonical::Number(offset_minutes.to_string())),
                ]),
            ),
            Value::Time(ms) => Canonical::tagged("time", Canonical::Number(ms.to_string())),
            Value::Duration(ms) => Canonical::tagged("duration", Canonical::Number(ms.to_string())),
            Value::Table(t) => Canonical::tagged(
                "table",
                Canonical::object(vec![
                    (
                        "columns".into(),
                        Canonical::Array(t.columns.iter().map(|c| Canonical::Str(c.clone())).collect()),
                    ),
                    (
                        "rows".into(),
                        Canonical::Array(
                            t.rows
                                .iter()
                                .map(|r| Canonical::Array(r.iter().map(|v| v.canonicalize()).collect()))
                                .collect(),
                        ),
                    ),
                ]),
            ),
            Value::List(items) => Canonical::Array(items.iter().map(|v| v.canonicalize()).collect()),
            Value::Record(fields) => {
                Canonical::object(fields.iter().map(|(k, v)| (k.clone(), v.canonicalize())).collect())
            }
            Value::Error(msg) => Canonical::tagged("error", Canonical::Str(msg.clone())),
        }
    }
}

impl Canonicalize for serde_json::Value {
    fn canonicalize(&self) -> Canonical {
        match self {
            serde_json::Value::Null => Canonical::Null,
            serde_json::Value::Bool(b) => Canonical::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(f) = n.as_f64() {
                    Canonical::Number(canonical_f64(f))
                } else {
                    Canonical::Number(n.to_string())
                }
            }
            serde_json::Value::String(s) => Canonical::Str(s.clone()),
            serde_json::Value::Array(items) => {
                Canonical::Array(items.iter().map(|v| v.canonicalize()).collect())
            }
            serde_json::Value::Object(map) => {
                Canonical::object(map.iter().map(|(k, v)| (k.clone(), v.canonicalize())).collect())
            }
        }
    }
}

fn canonical_f64(n: f64) -> String {
    if n == 0.0 {
        "0".to_string()
    } else {
        n.to_string()
    }
}

/// Serializes a [`Canonical`] tree to a deterministic, compact text form:
/// sorted object keys, no insignificant whitespace. Not JSON (tagged
/// variants use a distinct wire shape), but stable across runs.
pub fn stable_stringify(c: &Canonical) -> String {
    let mut out = String::new();
    write_canonical(c, &mut out);
    out
}

fn write_canonical(c: &Canonical, out: &mut String) {
    match c {
        Canonical::Null => out.push_str("null"),
        Canonical::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Canonical::Number(n) => out.push_str(n),
        Canonical::Str(s) => {
            out.push('"');
            out.push_str(&s.replace('\\', "\\\\").replace('"', "\\\""));
            out.push('"');
        }
        Canonical::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Canonical::Object(fields) => {
            out.push('{');
            for (i, (k, v)) in fields.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(&Canonical::Str(k.clone()), out);
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
        Canonical::Tagged { ty, value } => {
            out.push_str("{\"$type\":\"");
            out.push_str(ty);
            out.push_str("\",\"value\":");
            write_canonical(value, out);
            out.push('}');
        }
    }
}

/// A map-valued dictionary, canonicalized with sorted keys — used for the
/// `{scope, schemaVersion}` additional authenticated data blob in §4.C.
pub fn canonical_object(fields: BTreeMap<String, String>) -> Canonical {
    Canonical::object(fields.into_iter().map(|(k, v)| (k, Canonical::Str(v))).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_keys_are_sorted() {
        let a = Canonical::object(vec![
            ("b".into(), Canonical::Bool(true)),
            ("a".into(), Canonical::Bool(false)),
        ]);
        assert_eq!(stable_stringify(&a), r#"{"a":false,"b":true}"#);
    }

    #[test]
    fn nan_and_infinity_are_tagged() {
        let v = Value::Number(f64::NAN).canonicalize();
        assert_eq!(stable_stringify(&v), r#"{"$type":"number-nan","value":null}"#);
    }

    #[test]
    fn negative_zero_canonicalizes_like_zero() {
        let pos = Value::Number(0.0).canonicalize();
        let neg = Value::Number(-0.0).canonicalize();
        assert_eq!(stable_stringify(&pos), stable_stringify(&neg));
    }
}

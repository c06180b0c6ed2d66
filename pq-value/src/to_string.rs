//! `valueToString`.

use base64::Engine;

use crate::Value;

pub fn value_to_string(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => {
            if n.is_nan() {
                "NaN".to_string()
            } else if n.is_infinite() {
                if *n > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() }
            } else {
                n.to_string()
            }
        }
        Value::Decimal(d) => d.clone(),
        Value::Text(s) => s.clone(),
        Value::Binary(b) => base64::engine::general_purpose::STANDARD.encode(b),
        Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        Value::DateTime(dt) => dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        Value::DateTimeTz { instant, .. } => {
            instant.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
        }
        Value::Time(ms) => format_time_of_day(*ms),
        Value::Duration(ms) => format!("{ms}ms"),
        Value::Table(t) => format!("Table[{}x{}]", t.rows.len(), t.columns.len()),
        Value::List(items) => {
            let parts: Vec<String> = items.iter().map(value_to_string).collect();
            format!("[{}]", parts.join(", "))
        }
        Value::Record(fields) => {
            let parts: Vec<String> = fields
                .iter()
                .map(|(k, v)| format!("{k}: {}", value_to_string(v)))
                .collect();
            format!("{{{}}}", parts.join(", "))
        }
        Value::Error(msg) => format!("Error: {msg}"),
    }
}

fn format_time_of_day(ms: i64) -> String {
    let ms = ms.rem_euclid(86_400_000);
    let h = ms / 3_600_000;
    let m = (ms % 3_600_000) / 60_000;
    let s = (ms % 60_000) / 1_000;
    let milli = ms % 1_000;
    format!("{h:02}:{m:02}:{s:02}.{milli:03}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_renders_empty() {
        assert_eq!(value_to_string(&Value::Null), "");
    }

    #[test]
    fn time_renders_hms() {
        assert_eq!(format_time_of_day(3_661_001), "01:01:01.001");
    }
}

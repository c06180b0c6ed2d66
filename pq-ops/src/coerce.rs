//! `changeType`'s per-cell coercion table (§4.D.1). Invalid inputs yield
//! `null`, never an error: the contract is "never throw".

use base64::Engine;
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use pq_table::{Column, ColumnType, DataTable, ITable};
use pq_value::Value;

use pq_errors::PqResult;

pub fn change_type(table: &dyn ITable, targets: &[(String, ColumnType)]) -> PqResult<DataTable> {
    let mut type_by_index: Vec<ColumnType> = table.columns().iter().map(|c| c.ty).collect();
    for (name, ty) in targets {
        if let Some(idx) = table.get_column_index(name) {
            type_by_index[idx] = *ty;
        }
    }
    let columns: Vec<Column> = table
        .columns()
        .iter()
        .zip(&type_by_index)
        .map(|(c, ty)| Column::new(c.name.clone(), *ty))
        .collect();
    let rows: Vec<Vec<Value>> = table
        .iter_rows()
        .map(|row| row.into_iter().zip(&type_by_index).map(|(v, ty)| coerce(v, *ty)).collect())
        .collect();
    Ok(DataTable::new(columns, rows))
}

fn coerce(v: Value, ty: ColumnType) -> Value {
    match ty {
        ColumnType::Any => v,
        ColumnType::Text => Value::Text(v.to_display_string()),
        ColumnType::Number => to_number(&v),
        ColumnType::Bool => to_bool(&v),
        ColumnType::Date => to_date(&v),
        ColumnType::DateTime => to_datetime(&v),
        ColumnType::DateTimeTz => to_datetime_tz(&v),
        ColumnType::Time => to_time(&v),
        ColumnType::Duration => to_duration(&v),
        ColumnType::Decimal => to_decimal(&v),
        ColumnType::Binary => to_binary(&v),
        ColumnType::Table | ColumnType::List | ColumnType::Record => v,
    }
}

fn to_number(v: &Value) -> Value {
    match v {
        Value::Number(n) => Value::Number(*n),
        Value::Decimal(d) => d.parse::<f64>().map(Value::Number).unwrap_or(Value::Null),
        Value::Bool(b) => Value::Number(if *b { 1.0 } else { 0.0 }),
        Value::Text(s) => s.trim().parse::<f64>().map(Value::Number).unwrap_or(Value::Null),
        Value::Null => Value::Null,
        _ => Value::Null,
    }
}

fn to_bool(v: &Value) -> Value {
    match v {
        Value::Bool(b) => Value::Bool(*b),
        Value::Number(n) if *n == 0.0 => Value::Bool(false),
        Value::Number(n) if *n == 1.0 => Value::Bool(true),
        Value::Text(s) if s.eq_ignore_ascii_case("true") => Value::Bool(true),
        Value::Text(s) if s.eq_ignore_ascii_case("false") => Value::Bool(false),
        _ => Value::Null,
    }
}

fn to_date(v: &Value) -> Value {
    match v {
        Value::Date(d) => Value::Date(*d),
        Value::DateTime(dt) => Value::Date(dt.date_naive()),
        Value::DateTimeTz { instant, .. } => Value::Date(instant.date_naive()),
        Value::Text(s) => parse_date(s).map(Value::Date).unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

fn to_datetime(v: &Value) -> Value {
    match v {
        Value::DateTime(dt) => Value::DateTime(*dt),
        Value::DateTimeTz { instant, .. } => Value::DateTime(*instant),
        Value::Date(d) => Value::DateTime(d.and_hms_opt(0, 0, 0).unwrap().and_utc()),
        Value::Number(ms) => Value::DateTime(
            Utc.timestamp_millis_opt(*ms as i64).single().unwrap_or_else(|| Utc.timestamp_millis_opt(0).unwrap()),
        ),
        Value::Text(s) => chrono::DateTime::parse_from_rfc3339(s)
            .map(|dt| Value::DateTime(dt.with_timezone(&Utc)))
            .or_else(|_| {
                chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
                    .map(|ndt| Value::DateTime(ndt.and_utc()))
            })
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn to_datetime_tz(v: &Value) -> Value {
    match v {
        Value::DateTimeTz { instant, offset_minutes } => {
            Value::DateTimeTz { instant: *instant, offset_minutes: *offset_minutes }
        }
        Value::DateTime(dt) => Value::DateTimeTz { instant: *dt, offset_minutes: 0 },
        Value::Text(s) => chrono::DateTime::parse_from_rfc3339(s)
            .map(|dt| Value::DateTimeTz {
                instant: dt.with_timezone(&Utc),
                offset_minutes: dt.offset().local_minus_utc() / 60,
            })
            // zero-offset promotion when the text has no parseable offset
            .or_else(|_| {
                chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
                    .map(|ndt| Value::DateTimeTz { instant: ndt.and_utc(), offset_minutes: 0 })
            })
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn to_time(v: &Value) -> Value {
    match v {
        Value::Time(ms) => Value::Time(*ms),
        Value::Text(s) => NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
            .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
            .map(|t| Value::Time(t.signed_duration_since(NaiveTime::from_hms_opt(0, 0, 0).unwrap()).num_milliseconds()))
            .unwrap_or(Value::Null),
        Value::DateTime(dt) => Value::Time(
            dt.time().signed_duration_since(NaiveTime::from_hms_opt(0, 0, 0).unwrap()).num_milliseconds(),
        ),
        _ => Value::Null,
    }
}

fn to_duration(v: &Value) -> Value {
    match v {
        Value::Duration(ms) => Value::Duration(*ms),
        Value::Number(n) => Value::Duration(*n as i64),
        Value::Text(s) => s.trim_end_matches("ms").trim().parse::<i64>().map(Value::Duration).unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn to_decimal(v: &Value) -> Value {
    match v {
        Value::Decimal(d) => validated_decimal(d).map(Value::Decimal).unwrap_or(Value::Null),
        Value::Number(n) if n.is_finite() => Value::Decimal(format_finite(*n)),
        Value::Text(s) => validated_decimal(s.trim()).map(Value::Decimal).unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn format_finite(n: f64) -> String {
    // `n` is already checked finite by the caller.
    n.to_string()
}

/// Validates the normalized digit-string shape §3.1 requires: optional
/// leading `-`, no leading zeros except a bare `0`, optional `.` followed
/// by at least one digit.
fn validated_decimal(s: &str) -> Option<String> {
    s.parse::<bigdecimal::BigDecimal>().ok().map(|d| d.normalized().to_string())
}

fn to_binary(v: &Value) -> Value {
    match v {
        Value::Binary(b) => Value::Binary(b.clone()),
        Value::Text(s) => base64::engine::general_purpose::STANDARD
            .decode(s)
            .map(Value::Binary)
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_number_text_becomes_null_not_an_error() {
        assert_eq!(to_number(&Value::Text("abc".into())), Value::Null);
    }

    #[test]
    fn bool_from_zero_one() {
        assert_eq!(to_bool(&Value::Number(0.0)), Value::Bool(false));
        assert_eq!(to_bool(&Value::Number(1.0)), Value::Bool(true));
    }

    #[test]
    fn date_is_midnight_utc_projection_of_datetime() {
        let dt = Value::DateTime(NaiveDate::from_ymd_opt(2020, 6, 1).unwrap().and_hms_opt(14, 30, 0).unwrap().and_utc());
        assert_eq!(to_date(&dt), Value::Date(NaiveDate::from_ymd_opt(2020, 6, 1).unwrap()));
    }

    #[test]
    fn binary_base64_round_trips() {
        let b = Value::Text(base64::engine::general_purpose::STANDARD.encode(b"hi"));
        assert_eq!(to_binary(&b), Value::Binary(b"hi".to_vec()));
    }
}

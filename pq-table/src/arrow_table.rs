//! The columnar, read-only Arrow-adapter table. Wraps an
//! `arrow::record_batch::RecordBatch`; slicing is O(1) because
//! `RecordBatch::slice` just adjusts an offset/length pair over shared
//! array buffers rather than copying them.

use std::collections::HashMap;
use std::sync::Arc;

use arrow::array::{
    Array, BooleanArray, Date32Array, Float64Array, Int64Array, StringArray,
    TimestampMillisecondArray,
};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, NaiveDate, Utc};
use pq_value::Value;

use crate::column::{Column, ColumnType};
use crate::itable::ITable;

#[derive(Clone)]
pub struct ArrowTable {
    batch: RecordBatch,
    columns: Arc<[Column]>,
    index: Arc<HashMap<String, usize>>,
}

impl ArrowTable {
    pub fn new(batch: RecordBatch) -> Self {
        let columns: Vec<Column> = batch
            .schema()
            .fields()
            .iter()
            .map(|f| Column::new(f.name().clone(), column_type_of(f.data_type())))
            .collect();
        let index = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();
        Self {
            batch,
            columns: columns.into(),
            index: Arc::new(index),
        }
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }
}

fn column_type_of(dt: &DataType) -> ColumnType {
    match dt {
        DataType::Boolean => ColumnType::Bool,
        DataType::Int64 | DataType::Int32 | DataType::Float64 | DataType::Float32 => {
            ColumnType::Number
        }
        DataType::Utf8 | DataType::LargeUtf8 => ColumnType::Text,
        DataType::Binary | DataType::LargeBinary => ColumnType::Binary,
        DataType::Date32 | DataType::Date64 => ColumnType::Date,
        DataType::Timestamp(_, _) => ColumnType::DateTime,
        _ => ColumnType::Any,
    }
}

impl ITable for ArrowTable {
    fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn row_count(&self) -> usize {
        self.batch.num_rows()
    }

    fn get_column_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    fn get_cell(&self, row: usize, col: usize) -> Value {
        let array = self.batch.column(col);
        if array.is_null(row) {
            return Value::Null;
        }
        match array.data_type() {
            DataType::Boolean => {
                Value::Bool(array.as_any().downcast_ref::<BooleanArray>().unwrap().value(row))
            }
            DataType::Int64 => {
                Value::Number(array.as_any().downcast_ref::<Int64Array>().unwrap().value(row) as f64)
            }
            DataType::Float64 => Value::Number(
                array.as_any().downcast_ref::<Float64Array>().unwrap().value(row),
            ),
            DataType::Utf8 => Value::Text(
                array
                    .as_any()
                    .downcast_ref::<StringArray>()
                    .unwrap()
                    .value(row)
                    .to_string(),
            ),
            DataType::Date32 => {
                let days = array.as_any().downcast_ref::<Date32Array>().unwrap().value(row);
                let date = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap() + chrono::Duration::days(days as i64);
                Value::Date(date)
            }
            DataType::Timestamp(_, _) => {
                let millis = array
                    .as_any()
                    .downcast_ref::<TimestampMillisecondArray>()
                    .map(|a| a.value(row))
                    .unwrap_or_default();
                Value::DateTime(
                    DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_else(|| {
                        DateTime::<Utc>::from_timestamp(0, 0).unwrap()
                    }),
                )
            }
            // Types outside the engine's own coercion table (§4.D.1) are
            // surfaced as their Arrow debug text rather than silently
            // dropped to null.
            other => Value::Text(format!("{other:?}:{row}")),
        }
    }

    fn head(&self, n: usize) -> Box<dyn ITable> {
        let n = n.min(self.batch.num_rows());
        Box::new(ArrowTable {
            batch: self.batch.slice(0, n),
            columns: self.columns.clone(),
            index: self.index.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Float64Array as ArrowF64;
    use arrow::datatypes::{Field, Schema};

    #[test]
    fn slices_in_place_without_reallocating_buffers() {
        let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Float64, false)]));
        let array = Arc::new(ArrowF64::from(vec![1.0, 2.0, 3.0]));
        let batch = RecordBatch::try_new(schema, vec![array]).unwrap();
        let t = ArrowTable::new(batch);
        let head = t.head(2);
        assert_eq!(head.row_count(), 2);
        assert_eq!(head.get_cell(0, 0), Value::Number(1.0));
    }
}

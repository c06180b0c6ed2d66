//! Compiles a streamable operator list into a batch-at-a-time transform
//! (§4.E). Per-row, stateless operators are executed by constructing a
//! throwaway [`DataTable`] for each incoming batch and delegating to
//! `pq_ops::apply_operation` — the same pure functions the materialized
//! path uses. Operators that need state across batches (`take`, `skip`,
//! `removeRows`, `distinctRows`, `fillDown`, `addIndexColumn`,
//! `promoteHeaders`, `demoteHeaders`) carry their own running state here.

use std::collections::HashSet;

use pq_errors::{PqError, PqResult};
use pq_table::{make_unique_column_names, Column, ColumnType, DataTable, ITable, Operation};
use pq_value::{composite_key, Value};

type Row = Vec<Value>;

/// The result of pushing one batch through a [`CompiledPipeline`].
pub struct StreamBatchResult {
    pub rows: Vec<Row>,
    /// Once set, the pipeline has satisfied a `take` limit: no further
    /// batches are needed and the caller should stop pulling from the
    /// source.
    pub done: bool,
}

enum StreamStep {
    /// Any operator whose output depends only on the rows in the current
    /// batch: delegated straight to `pq_ops::apply_operation`.
    Stateless(Operation),
    Take { remaining: usize },
    Skip { remaining: usize },
    RemoveRowsWindow { offset: usize, count: usize, seen: usize },
    Distinct { indices: Option<Vec<usize>>, seen: HashSet<String> },
    FillDown { indices: Vec<usize>, last: Vec<Option<Value>> },
    AddIndexColumn { column: Column, initial_value: f64, increment: f64, next: u64 },
    /// `resolved` is `None` until the first non-empty batch supplies the
    /// header row; once set, every later batch reuses it instead of
    /// re-deriving column names it no longer has the header row to derive.
    PromoteHeaders { done: bool, resolved: Option<Vec<Column>> },
    /// The pre-demote names (for the header row) and the fixed post-demote
    /// `Column1..` schema are both known at compile time, so both are
    /// captured once rather than recomputed per batch.
    DemoteHeaders { header_names: Vec<String>, new_columns: Vec<Column>, done: bool },
}

pub struct CompiledPipeline {
    steps: Vec<StreamStep>,
    /// The schema `transform_batch` hands the first step, every batch —
    /// the pipeline's *input* schema, not its final output schema.
    in_columns: Vec<Column>,
    out_columns: Vec<Column>,
    pipeline_done: bool,
}

impl CompiledPipeline {
    pub fn out_columns(&self) -> &[Column] {
        &self.out_columns
    }

    /// Pushes one batch through every step in order, returning the rows
    /// this batch produced and whether the pipeline is now exhausted
    /// (a `take` limit was hit).
    pub fn transform_batch(&mut self, batch: Vec<Row>) -> PqResult<StreamBatchResult> {
        let mut rows = batch;
        let mut columns = self.in_columns.clone();
        let mut hit_limit = false;

        for step in &mut self.steps {
            match step {
                StreamStep::Stateless(op) => {
                    let table = DataTable::new(columns.clone(), rows);
                    let out = pq_ops::apply_operation(&table, op)?;
                    columns = out.columns().to_vec();
                    rows = out.into_rows();
                }
                StreamStep::Take { remaining } => {
                    let take_n = (*remaining).min(rows.len());
                    rows.truncate(take_n);
                    *remaining -= take_n;
                    if *remaining == 0 {
                        hit_limit = true;
                    }
                }
                StreamStep::Skip { remaining } => {
                    let skip_n = (*remaining).min(rows.len());
                    rows.drain(0..skip_n);
                    *remaining -= skip_n;
                }
                StreamStep::RemoveRowsWindow { offset, count, seen } => {
                    let end = offset.saturating_add(*count);
                    let batch_len = rows.len();
                    let mut kept = Vec::with_capacity(batch_len);
                    for (i, row) in rows.into_iter().enumerate() {
                        let idx = *seen + i;
                        if idx < *offset || idx >= end {
                            kept.push(row);
                        }
                    }
                    *seen += batch_len;
                    rows = kept;
                }
                StreamStep::Distinct { indices, seen } => {
                    let mut kept = Vec::with_capacity(rows.len());
                    for row in rows.into_iter() {
                        let key = match indices {
                            Some(idx) => composite_key(&idx.iter().map(|&i| row[i].clone()).collect::<Vec<_>>()),
                            None => composite_key(&row),
                        };
                        if seen.insert(key) {
                            kept.push(row);
                        }
                    }
                    rows = kept;
                }
                StreamStep::FillDown { indices, last } => {
                    for row in &mut rows {
                        for (slot, &idx) in indices.iter().enumerate() {
                            if row[idx].is_null() {
                                if let Some(prev) = &last[slot] {
                                    row[idx] = prev.clone();
                                }
                            } else {
                                last[slot] = Some(row[idx].clone());
                            }
                        }
                    }
                }
                StreamStep::AddIndexColumn { column, initial_value, increment, next } => {
                    for row in &mut rows {
                        row.push(Value::Number(*initial_value + *increment * (*next as f64)));
                        *next += 1;
                    }
                    columns.push(column.clone());
                }
                StreamStep::PromoteHeaders { done, resolved } => {
                    if !*done && !rows.is_empty() {
                        let header = rows.remove(0);
                        let names = make_unique_column_names(
                            &header.iter().map(|v| v.to_display_string()).collect::<Vec<_>>(),
                        );
                        let new_columns: Vec<Column> = names.into_iter().map(Column::any).collect();
                        columns = new_columns.clone();
                        *resolved = Some(new_columns);
                        *done = true;
                    } else if let Some(new_columns) = resolved {
                        columns = new_columns.clone();
                    }
                }
                StreamStep::DemoteHeaders { header_names, new_columns, done } => {
                    if !*done {
                        let header_row: Vec<Value> =
                            header_names.iter().map(|n| Value::Text(n.clone())).collect();
                        rows.insert(0, header_row);
                        *done = true;
                    }
                    columns = new_columns.clone();
                }
            }
        }

        self.out_columns = columns;
        if hit_limit {
            self.pipeline_done = true;
        }
        Ok(StreamBatchResult { rows, done: self.pipeline_done })
    }
}

/// Whether `ops` compiles: every operator streamable, at most one
/// `promoteHeaders` (§4.E).
pub fn is_streamable(ops: &[Operation]) -> bool {
    let promote_count = ops.iter().filter(|op| matches!(op, Operation::PromoteHeaders)).count();
    promote_count <= 1 && ops.iter().all(|op| op.is_streamable())
}

/// Compiles a streamable op list into a batch transform over `in_columns`.
pub fn compile_streaming_pipeline(ops: &[Operation], in_columns: &[Column]) -> PqResult<CompiledPipeline> {
    if !is_streamable(ops) {
        return Err(PqError::contract("compile_streaming_pipeline: operator list is not streamable"));
    }

    let mut columns = in_columns.to_vec();
    let mut steps = Vec::with_capacity(ops.len());

    for op in ops {
        let step = match op {
            Operation::Take(n) => StreamStep::Take { remaining: *n },
            Operation::Skip(n) => StreamStep::Skip { remaining: *n },
            Operation::RemoveRows { offset, count } => {
                StreamStep::RemoveRowsWindow { offset: *offset, count: *count, seen: 0 }
            }
            Operation::DistinctRows(cols) => {
                let indices = match cols {
                    Some(names) => {
                        let mut out = Vec::with_capacity(names.len());
                        for name in names {
                            let idx = columns
                                .iter()
                                .position(|c| &c.name == name)
                                .ok_or_else(|| PqError::contract(format!("distinctRows: unknown column '{name}'")))?;
                            out.push(idx);
                        }
                        Some(out)
                    }
                    None => None,
                };
                StreamStep::Distinct { indices, seen: HashSet::new() }
            }
            Operation::FillDown(cols) => {
                let mut indices = Vec::with_capacity(cols.len());
                for name in cols {
                    let idx = columns
                        .iter()
                        .position(|c| &c.name == name)
                        .ok_or_else(|| PqError::contract(format!("fillDown: unknown column '{name}'")))?;
                    indices.push(idx);
                }
                let last = vec![None; indices.len()];
                StreamStep::FillDown { indices, last }
            }
            Operation::AddIndexColumn { name, initial_value, increment } => {
                let new_column = Column::new(name.clone(), ColumnType::Number);
                columns.push(new_column.clone());
                StreamStep::AddIndexColumn {
                    column: new_column,
                    initial_value: *initial_value,
                    increment: *increment,
                    next: 0,
                }
            }
            Operation::PromoteHeaders => StreamStep::PromoteHeaders { done: false, resolved: None },
            Operation::DemoteHeaders => {
                let header_names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
                let new_columns: Vec<Column> =
                    (1..=columns.len()).map(|i| Column::any(format!("Column{i}"))).collect();
                columns = new_columns.clone();
                StreamStep::DemoteHeaders { header_names, new_columns, done: false }
            }
            other => {
                // Stateless: run the op on an empty probe table to learn
                // its effect on column metadata ahead of any real batch.
                let probe = DataTable::empty(columns.clone());
                let out = pq_ops::apply_operation(&probe, other)?;
                columns = out.columns().to_vec();
                StreamStep::Stateless(other.clone())
            }
        };
        steps.push(step);
    }

    Ok(CompiledPipeline { steps, in_columns: in_columns.to_vec(), out_columns: columns, pipeline_done: false })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pq_table::{BoundFormula, CompareOp, Predicate};

    fn col(name: &str) -> Column {
        Column::any(name)
    }

    #[test]
    fn filter_add_take_streams_across_batches() {
        let ops = vec![
            Operation::FilterRows(Predicate::Compare {
                column: "a".into(),
                op: CompareOp::Gt,
                value: Some(Value::Number(1.0)),
                case_sensitive: true,
            }),
            Operation::AddColumn {
                name: "c".into(),
                formula: BoundFormula::new("double-b", |row| Value::Number(row[1].as_f64().unwrap() * 2.0)),
            },
            Operation::Take(2),
        ];
        let mut pipeline = compile_streaming_pipeline(&ops, &[col("a"), col("b")]).unwrap();
        assert_eq!(pipeline.out_columns().len(), 3);

        let batch1 = vec![
            vec![Value::Number(0.0), Value::Number(0.0)],
            vec![Value::Number(2.0), Value::Number(5.0)],
        ];
        let r1 = pipeline.transform_batch(batch1).unwrap();
        assert_eq!(r1.rows.len(), 1);
        assert!(!r1.done);

        let batch2 = vec![
            vec![Value::Number(3.0), Value::Number(1.0)],
            vec![Value::Number(4.0), Value::Number(2.0)],
        ];
        let r2 = pipeline.transform_batch(batch2).unwrap();
        assert_eq!(r2.rows.len(), 1);
        assert!(r2.done);
    }

    #[test]
    fn distinct_tracks_seen_keys_across_batches() {
        let ops = vec![Operation::DistinctRows(None)];
        let mut pipeline = compile_streaming_pipeline(&ops, &[col("a")]).unwrap();
        let r1 = pipeline.transform_batch(vec![vec![Value::Number(1.0)], vec![Value::Number(2.0)]]).unwrap();
        assert_eq!(r1.rows.len(), 2);
        let r2 = pipeline.transform_batch(vec![vec![Value::Number(1.0)], vec![Value::Number(3.0)]]).unwrap();
        assert_eq!(r2.rows.len(), 1);
        assert_eq!(r2.rows[0][0], Value::Number(3.0));
    }

    #[test]
    fn promote_headers_rebinds_columns_on_first_batch() {
        let ops = vec![Operation::PromoteHeaders];
        let mut pipeline = compile_streaming_pipeline(&ops, &[col("c1"), col("c2")]).unwrap();
        let r1 = pipeline
            .transform_batch(vec![
                vec![Value::Text("x".into()), Value::Text("y".into())],
                vec![Value::Number(1.0), Value::Number(2.0)],
            ])
            .unwrap();
        assert_eq!(pipeline.out_columns().iter().map(|c| c.name.clone()).collect::<Vec<_>>(), vec!["x", "y"]);
        assert_eq!(r1.rows.len(), 1);
    }

    #[test]
    fn fill_down_carries_last_value_across_batch_boundary() {
        let ops = vec![Operation::FillDown(vec!["a".into()])];
        let mut pipeline = compile_streaming_pipeline(&ops, &[col("a")]).unwrap();
        pipeline.transform_batch(vec![vec![Value::Number(7.0)], vec![Value::Null]]).unwrap();
        let r2 = pipeline.transform_batch(vec![vec![Value::Null]]).unwrap();
        assert_eq!(r2.rows[0][0], Value::Number(7.0));
    }

    #[test]
    fn non_streamable_operator_rejected() {
        let ops = vec![Operation::SortRows(vec![])];
        assert!(!is_streamable(&ops));
        assert!(compile_streaming_pipeline(&ops, &[col("a")]).is_err());
    }
}

//! Single-pass materialized table operators (§4.D) and the per-cell type
//! coercion table behind `changeType` (§4.D.1).
//!
//! Every operator here is a pure function `&dyn ITable -> DataTable`: no
//! operator observably mutates its input, and the same input always
//! produces the same output (§8, "applyOperation is pure"). `merge` and
//! `append` take their dependency tables already resolved, since fetching
//! `rightQuery`/`queries` is `pq-engine`'s job, not this crate's.

pub mod append;
pub mod coerce;
pub mod columns;
pub mod dedupe;
pub mod expand;
pub mod filter;
pub mod groupby;
pub mod headers;
pub mod merge;
pub mod pivot;
pub mod predicate;
pub mod row_ops;
pub mod shape;
pub mod slice;
pub mod sort;

use pq_errors::{PqError, PqResult};
use pq_table::{DataTable, ITable, Operation};

/// Applies every [`Operation`] variant that needs no cross-query
/// dependency. `Merge` and `Append` are not handled here: the engine
/// resolves their dependency tables first and calls [`merge::merge`] /
/// [`append::append`] directly.
pub fn apply_operation(table: &dyn ITable, op: &Operation) -> PqResult<DataTable> {
    match op {
        Operation::SelectColumns(names) => shape::select_columns(table, names),
        Operation::RemoveColumns(names) => shape::remove_columns(table, names),
        Operation::RenameColumn { from, to } => shape::rename_column(table, from, to),
        Operation::ReorderColumns { prefix, missing } => shape::reorder_columns(table, prefix, *missing),
        Operation::TransformColumnNames(t) => shape::transform_column_names(table, *t),
        Operation::ChangeType(targets) => coerce::change_type(table, targets),
        Operation::TransformColumns(specs) => row_ops::transform_columns(table, specs),
        Operation::AddColumn { name, formula } => row_ops::add_column(table, name, formula),
        Operation::AddIndexColumn { name, initial_value, increment } => {
            row_ops::add_index_column(table, name, *initial_value, *increment)
        }
        Operation::CombineColumns { sources, delimiter, new_name } => {
            row_ops::combine_columns(table, sources, delimiter, new_name)
        }
        Operation::SplitColumn { source, delimiter, target_names } => {
            row_ops::split_column(table, source, delimiter, target_names.as_deref())
        }
        Operation::FilterRows(pred) => filter::filter_rows(table, pred),
        Operation::SortRows(keys) => sort::sort_rows(table, keys),
        Operation::DistinctRows(cols) => dedupe::distinct_rows(table, cols.as_deref()),
        Operation::RemoveRowsWithErrors(cols) => dedupe::remove_rows_with_errors(table, cols.as_deref()),
        Operation::ReplaceValues { column, find, replace } => {
            dedupe::replace_values(table, column, find, replace)
        }
        Operation::ReplaceErrorValues { columns: cols, replacement } => {
            dedupe::replace_error_values(table, cols, replacement)
        }
        Operation::FillDown(cols) => dedupe::fill_down(table, cols),
        Operation::Take(n) => slice::take(table, *n),
        Operation::Skip(n) => slice::skip(table, *n),
        Operation::RemoveRows { offset, count } => slice::remove_rows(table, *offset, *count),
        Operation::PromoteHeaders => headers::promote_headers(table),
        Operation::DemoteHeaders => headers::demote_headers(table),
        Operation::GroupBy { keys, aggs } => groupby::group_by(table, keys, aggs),
        Operation::Pivot { row_column, value_column, agg } => pivot::pivot(table, row_column, value_column, *agg),
        Operation::Unpivot { columns: cols, name_column, value_column } => {
            pivot::unpivot(table, cols, name_column, value_column)
        }
        Operation::ExpandTableColumn { column } => expand::expand_table_column(table, column),
        Operation::Merge { .. } => Err(PqError::contract(
            "merge requires the right query's table to be resolved by the engine first",
        )),
        Operation::Append { .. } => Err(PqError::contract(
            "append requires its queries' tables to be resolved by the engine first",
        )),
    }
}

//! Table, column, and query models (§3.2, §3.3 of the engine design).

pub mod arrow_table;
pub mod column;
pub mod data_table;
pub mod graph;
pub mod itable;
pub mod query;

pub use arrow_table::ArrowTable;
pub use column::{make_unique_column_names, Column, ColumnType};
pub use data_table::DataTable;
pub use itable::ITable;
pub use query::{
    AggFn, AggSpec, BoundFormula, CompareOp, JoinMode, JoinType, MissingColumnPolicy,
    NameTransform, NullsOrder, Operation, Predicate, Query, QueryId, SortDirection, SortKey,
    SourceDescriptor, Step,
};

//! Queries, steps, and the closed operation set (§3.3, §4.D).
//!
//! The formula expression mini-language is explicitly out of scope (§1): a
//! [`BoundFormula`] stands in for "a pure row-to-value function", carrying
//! just enough identity (a `label`) to participate in cache-key
//! canonicalization, since the closure itself cannot be stringified.

use std::fmt;
use std::sync::Arc;

use pq_value::Value;
use serde::{Deserialize, Serialize};

use crate::column::ColumnType;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct QueryId(pub String);

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for QueryId {
    fn from(s: &str) -> Self {
        QueryId(s.to_string())
    }
}

/// A pure `row -> value` function, produced by the (out-of-scope) formula
/// engine. Not serializable in the general case; `label` is its
/// cache-key-visible stand-in and must be unique per distinct formula.
#[derive(Clone)]
pub struct BoundFormula {
    pub label: String,
    pub f: Arc<dyn Fn(&[Value]) -> Value + Send + Sync>,
}

impl BoundFormula {
    pub fn new(label: impl Into<String>, f: impl Fn(&[Value]) -> Value + Send + Sync + 'static) -> Self {
        Self { label: label.into(), f: Arc::new(f) }
    }

    pub fn call(&self, row: &[Value]) -> Value {
        (self.f)(row)
    }
}

impl fmt::Debug for BoundFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoundFormula({})", self.label)
    }
}

impl PartialEq for BoundFormula {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MissingColumnPolicy {
    Error,
    Ignore,
    UseNull,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NameTransform {
    Upper,
    Lower,
    Trim,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NullsOrder {
    First,
    Last,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SortKey {
    pub column: String,
    pub direction: SortDirection,
    pub nulls: NullsOrder,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    Left,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinMode {
    Flat,
    Nested { new_column_name: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggFn {
    Count,
    Sum,
    Average,
    Min,
    Max,
    CountDistinct,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggSpec {
    pub source_column: String,
    pub agg: AggFn,
    pub output_name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    Gt,
    Lte,
    Gte,
    Contains,
    StartsWith,
    EndsWith,
    IsNull,
    IsNotNull,
}

/// A compiled predicate tree, evaluated by `filterRows`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    Compare {
        column: String,
        op: CompareOp,
        value: Option<Value>,
        case_sensitive: bool,
    },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

/// The closed set of table operations (§4.D).
#[derive(Clone, Debug, PartialEq)]
pub enum Operation {
    SelectColumns(Vec<String>),
    RemoveColumns(Vec<String>),
    RenameColumn { from: String, to: String },
    ReorderColumns { prefix: Vec<String>, missing: MissingColumnPolicy },
    TransformColumnNames(NameTransform),
    ChangeType(Vec<(String, ColumnType)>),
    TransformColumns(Vec<(String, BoundFormula, Option<ColumnType>)>),
    AddColumn { name: String, formula: BoundFormula },
    AddIndexColumn { name: String, initial_value: f64, increment: f64 },
    CombineColumns { sources: Vec<String>, delimiter: String, new_name: String },
    SplitColumn { source: String, delimiter: String, target_names: Option<Vec<String>> },
    FilterRows(Predicate),
    SortRows(Vec<SortKey>),
    DistinctRows(Option<Vec<String>>),
    RemoveRowsWithErrors(Option<Vec<String>>),
    ReplaceValues { column: String, find: Value, replace: Value },
    ReplaceErrorValues { columns: Vec<String>, replacement: Value },
    FillDown(Vec<String>),
    Take(usize),
    Skip(usize),
    RemoveRows { offset: usize, count: usize },
    PromoteHeaders,
    DemoteHeaders,
    GroupBy { keys: Vec<String>, aggs: Vec<AggSpec> },
    Pivot { row_column: String, value_column: String, agg: AggFn },
    Unpivot { columns: Vec<String>, name_column: String, value_column: String },
    ExpandTableColumn { column: String },
    Merge {
        right_query: QueryId,
        join_type: JoinType,
        left_keys: Vec<String>,
        right_keys: Vec<String>,
        mode: JoinMode,
    },
    Append { queries: Vec<QueryId> },
}

impl Operation {
    /// Whether this operator can appear in a streaming pipeline prefix
    /// (§4.E), independent of whether it's the *only* op or chained with
    /// others.
    pub fn is_streamable(&self) -> bool {
        matches!(
            self,
            Operation::SelectColumns(_)
                | Operation::RemoveColumns(_)
                | Operation::FilterRows(_)
                | Operation::AddColumn { .. }
                | Operation::RenameColumn { .. }
                | Operation::ChangeType(_)
                | Operation::TransformColumns(_)
                | Operation::Take(_)
                | Operation::Skip(_)
                | Operation::RemoveRows { .. }
                | Operation::FillDown(_)
                | Operation::ReplaceValues { .. }
                | Operation::RemoveRowsWithErrors(_)
                | Operation::DistinctRows(_)
                | Operation::ReorderColumns { .. }
                | Operation::AddIndexColumn { .. }
                | Operation::CombineColumns { .. }
                | Operation::TransformColumnNames(_)
                | Operation::ReplaceErrorValues { .. }
                | Operation::PromoteHeaders
                | Operation::DemoteHeaders
        ) || matches!(
            self,
            Operation::SplitColumn { target_names: Some(_), .. }
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Step {
    pub id: String,
    pub name: String,
    pub op: Operation,
}

/// Where a query's input rows come from. `Query` is the one variant that
/// participates in the cross-query dependency graph via the source itself
/// (as opposed to via a `merge`/`append` step).
#[derive(Clone, Debug, PartialEq)]
pub enum SourceDescriptor {
    Csv { path: String },
    Json { path: String },
    Arrow { uri: String },
    Parquet { uri: String },
    Http { url: String },
    Sql { connection: String, statement: String },
    Query(QueryId),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub id: QueryId,
    pub source: SourceDescriptor,
    pub steps: Vec<Step>,
}

impl Query {
    /// Every query id this query directly depends on: a `query`-typed
    /// source, any `merge.rightQuery`, or any `append.queries` entry.
    pub fn direct_dependencies(&self) -> Vec<QueryId> {
        let mut deps = Vec::new();
        if let SourceDescriptor::Query(id) = &self.source {
            deps.push(id.clone());
        }
        for step in &self.steps {
            match &step.op {
                Operation::Merge { right_query, .. } => deps.push(right_query.clone()),
                Operation::Append { queries } => deps.extend(queries.iter().cloned()),
                _ => {}
            }
        }
        deps
    }

    /// All ops are streamable and at most one `promoteHeaders` appears:
    /// the whole pipeline can be compiled as a streaming transform (§4.E).
    pub fn is_streamable(&self) -> bool {
        let promote_count = self
            .steps
            .iter()
            .filter(|s| matches!(s.op, Operation::PromoteHeaders))
            .count();
        promote_count <= 1 && self.steps.iter().all(|s| s.op.is_streamable())
    }
}

//! Canonicalization of the query AST itself: source, steps, and parameter
//! overrides, as combined by `executeQuery` into a cache key (§3.4).

use pq_table::{
    AggFn, CompareOp, JoinMode, JoinType, MissingColumnPolicy, NameTransform, NullsOrder,
    Operation, Predicate, Query, QueryId, SortDirection, SortKey, SourceDescriptor, Step,
};

use crate::canonical::{Canonical, Canonicalize};

impl Canonicalize for QueryId {
    fn canonicalize(&self) -> Canonical {
        Canonical::Str(self.0.clone())
    }
}

impl Canonicalize for SourceDescriptor {
    fn canonicalize(&self) -> Canonical {
        let (kind, fields): (&str, Vec<(String, Canonical)>) = match self {
            SourceDescriptor::Csv { path } => ("csv", vec![("path".into(), Canonical::Str(path.clone()))]),
            SourceDescriptor::Json { path } => ("json", vec![("path".into(), Canonical::Str(path.clone()))]),
            SourceDescriptor::Arrow { uri } => ("arrow", vec![("uri".into(), Canonical::Str(uri.clone()))]),
            SourceDescriptor::Parquet { uri } => ("parquet", vec![("uri".into(), Canonical::Str(uri.clone()))]),
            SourceDescriptor::Http { url } => ("http", vec![("url".into(), Canonical::Str(url.clone()))]),
            SourceDescriptor::Sql { connection, statement } => (
                "sql",
                vec![
                    ("connection".into(), Canonical::Str(connection.clone())),
                    ("statement".into(), Canonical::Str(statement.clone())),
                ],
            ),
            SourceDescriptor::Query(id) => ("query", vec![("id".into(), id.canonicalize())]),
        };
        Canonical::object(vec![
            ("kind".into(), Canonical::Str(kind.to_string())),
            ("fields".into(), Canonical::object(fields)),
        ])
    }
}

fn strs(items: &[String]) -> Canonical {
    Canonical::Array(items.iter().map(|s| Canonical::Str(s.clone())).collect())
}

fn enum_tag(name: &str) -> Canonical {
    Canonical::Str(name.to_string())
}

impl Canonicalize for Predicate {
    fn canonicalize(&self) -> Canonical {
        match self {
            Predicate::Compare { column, op, value, case_sensitive } => Canonical::object(vec![
                ("kind".into(), Canonical::Str("compare".into())),
                ("column".into(), Canonical::Str(column.clone())),
                ("op".into(), enum_tag(compare_op_name(*op))),
                (
                    "value".into(),
                    value.as_ref().map(|v| v.canonicalize()).unwrap_or(Canonical::Null),
                ),
                ("caseSensitive".into(), Canonical::Bool(*case_sensitive)),
            ]),
            Predicate::And(a, b) => Canonical::object(vec![
                ("kind".into(), Canonical::Str("and".into())),
                ("left".into(), a.canonicalize()),
                ("right".into(), b.canonicalize()),
            ]),
            Predicate::Or(a, b) => Canonical::object(vec![
                ("kind".into(), Canonical::Str("or".into())),
                ("left".into(), a.canonicalize()),
                ("right".into(), b.canonicalize()),
            ]),
            Predicate::Not(a) => Canonical::object(vec![
                ("kind".into(), Canonical::Str("not".into())),
                ("value".into(), a.canonicalize()),
            ]),
        }
    }
}

fn compare_op_name(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Eq => "eq",
        CompareOp::NotEq => "neq",
        CompareOp::Lt => "lt",
        CompareOp::Gt => "gt",
        CompareOp::Lte => "lte",
        CompareOp::Gte => "gte",
        CompareOp::Contains => "contains",
        CompareOp::StartsWith => "startsWith",
        CompareOp::EndsWith => "endsWith",
        CompareOp::IsNull => "isNull",
        CompareOp::IsNotNull => "isNotNull",
    }
}

impl Canonicalize for Operation {
    fn canonicalize(&self) -> Canonical {
        match self {
            Operation::SelectColumns(cols) => tagged_op("selectColumns", strs(cols)),
            Operation::RemoveColumns(cols) => tagged_op("removeColumns", strs(cols)),
            Operation::RenameColumn { from, to } => tagged_op(
                "renameColumn",
                Canonical::object(vec![
                    ("from".into(), Canonical::Str(from.clone())),
                    ("to".into(), Canonical::Str(to.clone())),
                ]),
            ),
            Operation::ReorderColumns { prefix, missing } => tagged_op(
                "reorderColumns",
                Canonical::object(vec![
                    ("prefix".into(), strs(prefix)),
                    (
                        "missing".into(),
                        enum_tag(match missing {
                            MissingColumnPolicy::Error => "error",
                            MissingColumnPolicy::Ignore => "ignore",
                            MissingColumnPolicy::UseNull => "useNull",
                        }),
                    ),
                ]),
            ),
            Operation::TransformColumnNames(t) => tagged_op(
                "transformColumnNames",
                enum_tag(match t {
                    NameTransform::Upper => "upper",
                    NameTransform::Lower => "lower",
                    NameTransform::Trim => "trim",
                }),
            ),
            Operation::ChangeType(map) => tagged_op(
                "changeType",
                Canonical::Array(
                    map.iter()
                        .map(|(c, t)| {
                            Canonical::object(vec![
                                ("column".into(), Canonical::Str(c.clone())),
                                ("type".into(), Canonical::Str(format!("{t:?}"))),
                            ])
                        })
                        .collect(),
                ),
            ),
            Operation::TransformColumns(specs) => tagged_op(
                "transformColumns",
                Canonical::Array(
                    specs
                        .iter()
                        .map(|(c, f, t)| {
                            Canonical::object(vec![
                                ("column".into(), Canonical::Str(c.clone())),
                                ("formula".into(), Canonical::Str(f.label.clone())),
                                ("targetType".into(), Canonical::Str(format!("{t:?}"))),
                            ])
                        })
                        .collect(),
                ),
            ),
            Operation::AddColumn { name, formula } => tagged_op(
                "addColumn",
                Canonical::object(vec![
                    ("name".into(), Canonical::Str(name.clone())),
                    ("formula".into(), Canonical::Str(formula.label.clone())),
                ]),
            ),
            Operation::AddIndexColumn { name, initial_value, increment } => tagged_op(
                "addIndexColumn",
                Canonical::object(vec![
                    ("name".into(), Canonical::Str(name.clone())),
                    ("initialValue".into(), Canonical::Number(initial_value.to_string())),
                    ("increment".into(), Canonical::Number(increment.to_string())),
                ]),
            ),
            Operation::CombineColumns { sources, delimiter, new_name } => tagged_op(
                "combineColumns",
                Canonical::object(vec![
                    ("sources".into(), strs(sources)),
                    ("delimiter".into(), Canonical::Str(delimiter.clone())),
                    ("newName".into(), Canonical::Str(new_name.clone())),
                ]),
            ),
            Operation::SplitColumn { source, delimiter, target_names } => tagged_op(
                "splitColumn",
                Canonical::object(vec![
                    ("source".into(), Canonical::Str(source.clone())),
                    ("delimiter".into(), Canonical::Str(delimiter.clone())),
                    (
                        "targetNames".into(),
                        target_names.as_ref().map(|n| strs(n)).unwrap_or(Canonical::Null),
                    ),
                ]),
            ),
            Operation::FilterRows(pred) => tagged_op("filterRows", pred.canonicalize()),
            Operation::SortRows(keys) => tagged_op("sortRows", sort_keys(keys)),
            Operation::DistinctRows(cols) => tagged_op(
                "distinctRows",
                cols.as_ref().map(|c| strs(c)).unwrap_or(Canonical::Null),
            ),
            Operation::RemoveRowsWithErrors(cols) => tagged_op(
                "removeRowsWithErrors",
                cols.as_ref().map(|c| strs(c)).unwrap_or(Canonical::Null),
            ),
            Operation::ReplaceValues { column, find, replace } => tagged_op(
                "replaceValues",
                Canonical::object(vec![
                    ("column".into(), Canonical::Str(column.clone())),
                    ("find".into(), find.canonicalize()),
                    ("replace".into(), replace.canonicalize()),
                ]),
            ),
            Operation::ReplaceErrorValues { columns, replacement } => tagged_op(
                "replaceErrorValues",
                Canonical::object(vec![
                    ("columns".into(), strs(columns)),
                    ("replacement".into(), replacement.canonicalize()),
                ]),
            ),
            Operation::FillDown(cols) => tagged_op("fillDown", strs(cols)),
            Operation::Take(n) => tagged_op("take", Canonical::Number(n.to_string())),
            Operation::Skip(n) => tagged_op("skip", Canonical::Number(n.to_string())),
            Operation::RemoveRows { offset, count } => tagged_op(
                "removeRows",
                Canonical::object(vec![
                    ("offset".into(), Canonical::Number(offset.to_string())),
                    ("count".into(), Canonical::Number(count.to_string())),
                ]),
            ),
            Operation::PromoteHeaders => tagged_op("promoteHeaders", Canonical::Null),
            Operation::DemoteHeaders => tagged_op("demoteHeaders", Canonical::Null),
            Operation::GroupBy { keys, aggs } => tagged_op(
                "groupBy",
                Canonical::object(vec![
                    ("keys".into(), strs(keys)),
                    (
                        "aggs".into(),
                        Canonical::Array(
                            aggs.iter()
                                .map(|a| {
                                    Canonical::object(vec![
                                        ("sourceColumn".into(), Canonical::Str(a.source_column.clone())),
                                        ("agg".into(), enum_tag(agg_fn_name(a.agg))),
                                        ("outputName".into(), Canonical::Str(a.output_name.clone())),
                                    ])
                                })
                                .collect(),
                        ),
                    ),
                ]),
            ),
            Operation::Pivot { row_column, value_column, agg } => tagged_op(
                "pivot",
                Canonical::object(vec![
                    ("rowColumn".into(), Canonical::Str(row_column.clone())),
                    ("valueColumn".into(), Canonical::Str(value_column.clone())),
                    ("agg".into(), enum_tag(agg_fn_name(*agg))),
                ]),
            ),
            Operation::Unpivot { columns, name_column, value_column } => tagged_op(
                "unpivot",
                Canonical::object(vec![
                    ("columns".into(), strs(columns)),
                    ("nameColumn".into(), Canonical::Str(name_column.clone())),
                    ("valueColumn".into(), Canonical::Str(value_column.clone())),
                ]),
            ),
            Operation::ExpandTableColumn { column } => {
                tagged_op("expandTableColumn", Canonical::Str(column.clone()))
            }
            Operation::Merge { right_query, join_type, left_keys, right_keys, mode } => tagged_op(
                "merge",
                Canonical::object(vec![
                    ("rightQuery".into(), right_query.canonicalize()),
                    (
                        "joinType".into(),
                        enum_tag(match join_type {
                            JoinType::Inner => "inner",
                            JoinType::Left => "left",
                        }),
                    ),
                    ("leftKeys".into(), strs(left_keys)),
                    ("rightKeys".into(), strs(right_keys)),
                    (
                        "mode".into(),
                        match mode {
                            JoinMode::Flat => enum_tag("flat"),
                            JoinMode::Nested { new_column_name } => Canonical::object(vec![
                                ("kind".into(), Canonical::Str("nested".into())),
                                ("newColumnName".into(), Canonical::Str(new_column_name.clone())),
                            ]),
                        },
                    ),
                ]),
            ),
            Operation::Append { queries } => tagged_op(
                "append",
                Canonical::Array(queries.iter().map(|q| q.canonicalize()).collect()),
            ),
        }
    }
}

fn agg_fn_name(agg: AggFn) -> &'static str {
    match agg {
        AggFn::Count => "count",
        AggFn::Sum => "sum",
        AggFn::Average => "average",
        AggFn::Min => "min",
        AggFn::Max => "max",
        AggFn::CountDistinct => "countDistinct",
    }
}

fn sort_keys(keys: &[SortKey]) -> Canonical {
    Canonical::Array(
        keys.iter()
            .map(|k| {
                Canonical::object(vec![
                    ("column".into(), Canonical::Str(k.column.clone())),
                    (
                        "direction".into(),
                        enum_tag(match k.direction {
                            SortDirection::Ascending => "asc",
                            SortDirection::Descending => "desc",
                        }),
                    ),
                    (
                        "nulls".into(),
                        enum_tag(match k.nulls {
                            NullsOrder::First => "first",
                            NullsOrder::Last => "last",
                        }),
                    ),
                ])
            })
            .collect(),
    )
}

fn tagged_op(name: &'static str, args: Canonical) -> Canonical {
    Canonical::object(vec![("op".into(), Canonical::Str(name.to_string())), ("args".into(), args)])
}

impl Canonicalize for Step {
    fn canonicalize(&self) -> Canonical {
        Canonical::object(vec![
            ("id".into(), Canonical::Str(self.id.clone())),
            ("name".into(), Canonical::Str(self.name.clone())),
            ("op".into(), self.op.canonicalize()),
        ])
    }
}

impl Canonicalize for Query {
    fn canonicalize(&self) -> Canonical {
        Canonical::object(vec![
            ("id".into(), self.id.canonicalize()),
            ("source".into(), self.source.canonicalize()),
            (
                "steps".into(),
                Canonical::Array(self.steps.iter().map(|s| s.canonicalize()).collect()),
            ),
        ])
    }
}

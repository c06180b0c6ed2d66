//! Cross-query dependency graph and cycle detection (§3.3).

use std::collections::{HashMap, HashSet};

use pq_errors::{PqError, PqResult};

use crate::query::{Query, QueryId};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Verifies the dependency graph formed by `query`-sources, `merge`, and
/// `append` across `queries` is acyclic. On failure, returns
/// [`PqError::CyclicDependency`] carrying the offending path.
pub fn check_acyclic(queries: &HashMap<QueryId, Query>) -> PqResult<()> {
    let mut color: HashMap<&QueryId, Color> = queries.keys().map(|id| (id, Color::White)).collect();
    let mut stack: Vec<QueryId> = Vec::new();

    for start in queries.keys() {
        if color.get(start) == Some(&Color::White) {
            visit(start, queries, &mut color, &mut stack)?;
        }
    }
    Ok(())
}

fn visit<'a>(
    id: &'a QueryId,
    queries: &'a HashMap<QueryId, Query>,
    color: &mut HashMap<&'a QueryId, Color>,
    stack: &mut Vec<QueryId>,
) -> PqResult<()> {
    color.insert(id, Color::Gray);
    stack.push(id.clone());

    if let Some(query) = queries.get(id) {
        for dep in query.direct_dependencies() {
            match color.get(&dep).copied() {
                Some(Color::Gray) => {
                    let mut path = stack.clone();
                    path.push(dep);
                    let cut = path.iter().position(|q| *q == *path.last().unwrap()).unwrap();
                    return Err(PqError::CyclicDependency {
                        path: path[cut..].iter().map(|q| q.0.clone()).collect(),
                    });
                }
                Some(Color::Black) => continue,
                Some(Color::White) | None => {
                    if let Some((dep_key, _)) = queries.get_key_value(&dep) {
                        visit(dep_key, queries, color, stack)?;
                    }
                }
            }
        }
    }

    stack.pop();
    color.insert(id, Color::Black);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Operation, SourceDescriptor, Step};

    fn q(id: &str, dep: Option<&str>) -> Query {
        Query {
            id: QueryId(id.to_string()),
            source: match dep {
                Some(d) => SourceDescriptor::Query(QueryId(d.to_string())),
                None => SourceDescriptor::Csv { path: "x.csv".into() },
            },
            steps: vec![],
        }
    }

    #[test]
    fn acyclic_graph_passes() {
        let mut qs = HashMap::new();
        qs.insert(QueryId("a".into()), q("a", None));
        qs.insert(QueryId("b".into()), q("b", Some("a")));
        assert!(check_acyclic(&qs).is_ok());
    }

    #[test]
    fn cycle_is_detected() {
        let mut qs = HashMap::new();
        qs.insert(QueryId("a".into()), q("a", Some("b")));
        qs.insert(QueryId("b".into()), q("b", Some("a")));
        let err = check_acyclic(&qs).unwrap_err();
        assert!(matches!(err, PqError::CyclicDependency { .. }));
    }

    #[test]
    fn merge_creates_an_edge() {
        let mut qs = HashMap::new();
        let mut a = q("a", None);
        a.steps.push(Step {
            id: "s1".into(),
            name: "merge".into(),
            op: Operation::Merge {
                right_query: QueryId("b".into()),
                join_type: crate::query::JoinType::Inner,
                left_keys: vec!["k".into()],
                right_keys: vec!["k".into()],
                mode: crate::query::JoinMode::Flat,
            },
        });
        qs.insert(QueryId("a".into()), a);
        qs.insert(QueryId("b".into()), q("b", Some("a")));
        let err = check_acyclic(&qs).unwrap_err();
        assert!(matches!(err, PqError::CyclicDependency { .. }));
    }
}

//! Columns, declared types, and the unique-name helper used by every
//! operator that can introduce a naming collision.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// The declared type of a column. `Any` is the identity target for
/// `changeType` and the default for columns produced by operators that do
/// not otherwise know their output type (e.g. `addColumn` without a target
/// type).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Any,
    Bool,
    Number,
    Decimal,
    Text,
    Binary,
    Date,
    DateTime,
    DateTimeTz,
    Time,
    Duration,
    Table,
    List,
    Record,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self { name: name.into(), ty }
    }

    pub fn any(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Any)
    }
}

/// Resolves name collisions by suffixing `.1`, `.2`, … onto later
/// duplicates, leaving the first occurrence of each name untouched.
pub fn make_unique_column_names(names: &[String]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        if !seen.contains(name) {
            seen.insert(name.clone());
            out.push(name.clone());
            continue;
        }
        let mut suffix = 1u32;
        loop {
            let candidate = format!("{name}.{suffix}");
            if !seen.contains(&candidate) {
                seen.insert(candidate.clone());
                out.push(candidate);
                break;
            }
            suffix += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedupes_with_suffixes() {
        let names: Vec<String> = ["a", "b", "a", "a"].iter().map(|s| s.to_string()).collect();
        assert_eq!(
            make_unique_column_names(&names),
            vec!["a", "b", "a.1", "a.2"]
        );
    }

    #[test]
    fn leaves_pre_existing_suffix_alone() {
        let names: Vec<String> =
            ["a", "a.1", "a"].iter().map(|s| s.to_string()).collect();
        // "a.1" is already taken, so the second "a" must skip to "a.2".
        assert_eq!(make_unique_column_names(&names), vec!["a", "a.1", "a.2"]);
    }
}

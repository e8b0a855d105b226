//! Positional rows to name-keyed records.

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::cursor::ColumnMeta;
use crate::engine::ResultSet;
use crate::value::Value;

/// A row keyed by resolved column name, in column order.
pub type NamedRecord = IndexMap<String, Value>;

/// Give every column a unique name.
///
/// A non-empty name is kept if no earlier column claimed it. Otherwise the
/// column becomes `Column{index}`, or `Column{index}_{n}` with the smallest
/// `n` starting at 0 that is still free.
pub fn resolve_column_names(meta: &[ColumnMeta]) -> Vec<String> {
    let mut claimed: HashSet<String> = HashSet::with_capacity(meta.len());
    let mut names = Vec::with_capacity(meta.len());

    for (index, column) in meta.iter().enumerate() {
        let name = if !column.name.is_empty() && !claimed.contains(&column.name) {
            column.name.clone()
        } else {
            let mut candidate = format!("Column{index}");
            let mut extra = 0u32;
            while claimed.contains(&candidate) {
                candidate = format!("Column{index}_{extra}");
                extra += 1;
            }
            candidate
        };
        claimed.insert(name.clone());
        names.push(name);
    }

    names
}

/// Convert a buffered result into one record per row.
pub fn objectify(results: &ResultSet) -> Vec<NamedRecord> {
    let names = resolve_column_names(&results.meta);

    results
        .rows
        .iter()
        .map(|row| {
            names
                .iter()
                .enumerate()
                .map(|(index, name)| {
                    let value = row.get(index).cloned().unwrap_or(Value::Null);
                    (name.clone(), value)
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Row;

    fn meta(names: &[&str]) -> Vec<ColumnMeta> {
        names
            .iter()
            .enumerate()
            .map(|(i, n)| ColumnMeta::new(*n, i))
            .collect()
    }

    #[test]
    fn test_unique_names_kept() {
        assert_eq!(resolve_column_names(&meta(&["id", "name"])), vec!["id", "name"]);
    }

    #[test]
    fn test_empty_and_duplicate_names() {
        // "Column2" was never claimed, so the duplicate "a" takes it as-is
        assert_eq!(
            resolve_column_names(&meta(&["", "a", "a", ""])),
            vec!["Column0", "a", "Column2", "Column3"]
        );
    }

    #[test]
    fn test_synthesized_name_collision_gets_suffix() {
        assert_eq!(
            resolve_column_names(&meta(&["Column1", ""])),
            vec!["Column1", "Column1_0"]
        );
        assert_eq!(
            resolve_column_names(&meta(&["Column1", "", "Column1_0"])),
            vec!["Column1", "Column1_0", "Column2"]
        );
        assert_eq!(
            resolve_column_names(&meta(&["Column2", "Column2_0", "Column2"])),
            vec!["Column2", "Column2_0", "Column2_1"]
        );
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let m = meta(&["x", "", "x", "Column1"]);
        assert_eq!(resolve_column_names(&m), resolve_column_names(&m));
    }

    #[test]
    fn test_objectify_rows() {
        let results = ResultSet {
            meta: meta(&["id", "", "id"]),
            rows: vec![
                Row::from_iter([Value::Int(1), Value::from("a"), Value::Int(10)]),
                Row::from_iter([Value::Int(2), Value::from("b"), Value::Int(20)]),
            ],
        };

        let records = objectify(&results);
        assert_eq!(records.len(), 2);
        let keys: Vec<&str> = records[0].keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["id", "Column1", "Column2"]);
        assert_eq!(records[1]["id"], Value::Int(2));
        assert_eq!(records[1]["Column1"], Value::from("b"));
        assert_eq!(records[1]["Column2"], Value::Int(20));
    }

    #[test]
    fn test_objectify_empty() {
        assert!(objectify(&ResultSet::default()).is_empty());
    }
}

//! Merge-by-id reconciliation.

use std::collections::HashMap;

use crate::storage::Record;

/// Merge remote and local copies of a table, keyed on `id`
///
/// Remote rows go in first, then local rows replace any remote row with the
/// same id. Rows keep the position where their id first appeared; rows with
/// no id cannot be matched and are appended as they are.
pub fn merge_by_id(remote: Vec<Record>, local: Vec<Record>) -> Vec<Record> {
    let mut merged: Vec<Record> = Vec::with_capacity(remote.len() + local.len());
    let mut index: HashMap<String, usize> = HashMap::new();

    for record in remote.into_iter().chain(local) {
        match record.id() {
            Some(id) => match index.get(&id) {
                Some(&pos) => merged[pos] = record,
                None => {
                    index.insert(id, merged.len());
                    merged.push(record);
                }
            },
            None => merged.push(record),
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn records(value: Value) -> Vec<Record> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_local_overrides_remote() {
        let remote = records(json!([{"id": 1, "v": "a"}]));
        let local = records(json!([{"id": 1, "v": "b"}, {"id": 2, "v": "c"}]));

        let merged = merge_by_id(remote, local);
        assert_eq!(
            merged,
            records(json!([{"id": 1, "v": "b"}, {"id": 2, "v": "c"}]))
        );
    }

    #[test]
    fn test_remote_only_rows_are_kept() {
        let remote = records(json!([{"id": "r1"}, {"id": "shared", "v": 1}]));
        let local = records(json!([{"id": "shared", "v": 2}, {"id": "l1"}]));

        let ids: Vec<_> = merge_by_id(remote, local)
            .iter()
            .map(|r| r.id().unwrap())
            .collect();
        assert_eq!(ids, vec!["r1", "shared", "l1"]);
    }

    #[test]
    fn test_duplicate_local_ids_last_wins() {
        let local = records(json!([{"id": "x", "v": 1}, {"id": "x", "v": 2}]));
        let merged = merge_by_id(Vec::new(), local);
        assert_eq!(merged, records(json!([{"id": "x", "v": 2}])));
    }

    #[test]
    fn test_rows_without_id_are_appended() {
        let merged = merge_by_id(records(json!([{"v": 1}])), records(json!([{"v": 2}])));
        assert_eq!(merged.len(), 2);
    }
}

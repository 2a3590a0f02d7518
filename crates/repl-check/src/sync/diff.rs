//! Row-hash set difference between master and replica.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::schema::KeyValue;

/// `{key -> row hash}` for one chunk on one server.
pub type RowHashes = BTreeMap<KeyValue, String>;

/// A repair to apply on the replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncAction {
    /// Key exists only on the replica.
    Delete(KeyValue),
    /// Key missing on the replica or its row differs; copied from master.
    Upsert(KeyValue),
}

impl SyncAction {
    pub fn key(&self) -> &KeyValue {
        match self {
            SyncAction::Delete(k) | SyncAction::Upsert(k) => k,
        }
    }
}

/// Actions that make `replica` equal to `master`: deletes first, then upserts,
/// each in key order.
pub fn diff_row_hashes(master: &RowHashes, replica: &RowHashes) -> Vec<SyncAction> {
    let deletes = replica
        .keys()
        .filter(|k| !master.contains_key(*k))
        .cloned()
        .map(SyncAction::Delete);
    let upserts = master
        .iter()
        .filter(|(k, hash)| replica.get(*k) != Some(*hash))
        .map(|(k, _)| SyncAction::Upsert(k.clone()));
    deletes.chain(upserts).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn hashes(pairs: &[(i64, &str)]) -> RowHashes {
        pairs
            .iter()
            .map(|(k, h)| (KeyValue::Int(*k), h.to_string()))
            .collect()
    }

    #[test]
    fn test_identical_needs_nothing() {
        let m = hashes(&[(1, "A"), (2, "B")]);
        assert!(diff_row_hashes(&m, &m.clone()).is_empty());
    }

    #[test]
    fn test_missing_changed_and_extra() {
        let master = hashes(&[(1, "A"), (2, "B"), (3, "C")]);
        let replica = hashes(&[(1, "A"), (2, "X"), (4, "D")]);
        assert_eq!(
            diff_row_hashes(&master, &replica),
            vec![
                SyncAction::Delete(KeyValue::Int(4)),
                SyncAction::Upsert(KeyValue::Int(2)),
                SyncAction::Upsert(KeyValue::Int(3)),
            ]
        );
    }

    #[test]
    fn test_single_missing_row_is_one_insert() {
        let master: RowHashes = (1..=101).map(|k| (KeyValue::Int(k), format!("H{}", k))).collect();
        let mut replica = master.clone();
        replica.remove(&KeyValue::Int(57));
        assert_eq!(
            diff_row_hashes(&master, &replica),
            vec![SyncAction::Upsert(KeyValue::Int(57))]
        );
    }

    fn apply(master: &RowHashes, replica: &mut RowHashes, actions: &[SyncAction]) {
        for action in actions {
            match action {
                SyncAction::Delete(k) => {
                    replica.remove(k);
                }
                SyncAction::Upsert(k) => {
                    replica.insert(k.clone(), master[k].clone());
                }
            }
        }
    }

    proptest! {
        #[test]
        fn prop_applying_diff_converges(
            master in prop::collection::btree_map(0i64..200, "[A-F]{1,2}", 0..60),
            replica in prop::collection::btree_map(0i64..200, "[A-F]{1,2}", 0..60),
        ) {
            let master: RowHashes = master.into_iter().map(|(k, v)| (KeyValue::Int(k), v)).collect();
            let mut replica: RowHashes = replica.into_iter().map(|(k, v)| (KeyValue::Int(k), v)).collect();
            let actions = diff_row_hashes(&master, &replica);
            apply(&master, &mut replica, &actions);
            prop_assert_eq!(replica, master);
        }
    }
}

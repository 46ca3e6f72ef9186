//! Diff Engine (§4.2): pure, side-effect-free comparison of a new snapshot
//! against the currently-open rows of a branch.

use std::collections::{HashMap, HashSet};

use crate::model::GlobalId;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    pub added: Vec<GlobalId>,
    pub modified: Vec<GlobalId>,
    pub deleted: Vec<GlobalId>,
    pub unchanged: Vec<GlobalId>,
}

impl DiffResult {
    pub fn counts(&self) -> DiffCounts {
        DiffCounts {
            added: self.added.len(),
            modified: self.modified.len(),
            deleted: self.deleted.len(),
            unchanged: self.unchanged.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffCounts {
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

/// Compare `new_snapshot` (global_id → content_hash freshly extracted) to
/// `open_rows` (global_id → content_hash of the currently-open row on the
/// branch). Never examines any other revision.
pub fn diff(
    open_rows: &HashMap<GlobalId, String>,
    new_snapshot: &HashMap<GlobalId, String>,
) -> DiffResult {
    let mut result = DiffResult::default();

    for (gid, new_hash) in new_snapshot {
        match open_rows.get(gid) {
            None => result.added.push(gid.clone()),
            Some(old_hash) if old_hash == new_hash => result.unchanged.push(gid.clone()),
            Some(_) => result.modified.push(gid.clone()),
        }
    }

    let new_ids: HashSet<&GlobalId> = new_snapshot.keys().collect();
    for gid in open_rows.keys() {
        if !new_ids.contains(gid) {
            result.deleted.push(gid.clone());
        }
    }

    result.added.sort();
    result.modified.sort();
    result.deleted.sort();
    result.unchanged.sort();

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gid(s: &str) -> GlobalId {
        GlobalId::new(s).unwrap()
    }

    #[test]
    fn classifies_all_four_sets() {
        let mut open = HashMap::new();
        open.insert(gid("1111111111111111111111"), "h1".to_string());
        open.insert(gid("2222222222222222222222"), "h2".to_string());
        open.insert(gid("3333333333333333333333"), "h3".to_string());

        let mut new_snapshot = HashMap::new();
        new_snapshot.insert(gid("1111111111111111111111"), "h1".to_string()); // unchanged
        new_snapshot.insert(gid("2222222222222222222222"), "h2-changed".to_string()); // modified
        new_snapshot.insert(gid("4444444444444444444444"), "h4".to_string()); // added
        // 3333... is deleted (absent from new snapshot)

        let result = diff(&open, &new_snapshot);
        assert_eq!(result.added, vec![gid("4444444444444444444444")]);
        assert_eq!(result.modified, vec![gid("2222222222222222222222")]);
        assert_eq!(result.deleted, vec![gid("3333333333333333333333")]);
        assert_eq!(result.unchanged, vec![gid("1111111111111111111111")]);
    }

    #[test]
    fn identical_snapshot_yields_only_unchanged() {
        let mut open = HashMap::new();
        open.insert(gid("1111111111111111111111"), "h1".to_string());
        let new_snapshot = open.clone();

        let result = diff(&open, &new_snapshot);
        assert_eq!(result.counts(), DiffCounts { added: 0, modified: 0, deleted: 0, unchanged: 1 });
    }

    #[test]
    fn empty_branch_against_empty_snapshot_is_a_no_op() {
        let result = diff(&HashMap::new(), &HashMap::new());
        assert_eq!(result.counts(), DiffCounts::default());
    }
}

//! Catalog diffing.

use serde::{Deserialize, Serialize};

use crate::models::backup_artifact::ChangeCounts;
use crate::models::checksum_catalog::Catalog;

/// Paths that differ between two catalogs. Order within each list is
/// unspecified.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
}

impl ChangeSet {
    /// Every path of `catalog` reported as added; used for full backups.
    pub fn everything(catalog: &Catalog) -> Self {
        Self {
            added: catalog.keys().cloned().collect(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    pub fn counts(&self) -> ChangeCounts {
        ChangeCounts {
            added: self.added.len() as i64,
            modified: self.modified.len() as i64,
            deleted: self.deleted.len() as i64,
        }
    }

    /// Paths whose content has to be collected for this change set.
    pub fn changed_paths(&self) -> Vec<String> {
        self.added.iter().chain(self.modified.iter()).cloned().collect()
    }
}

pub fn diff(previous: &Catalog, current: &Catalog) -> ChangeSet {
    let mut changes = ChangeSet::default();

    for (path, checksum) in current {
        match previous.get(path) {
            None => changes.added.push(path.clone()),
            Some(old) if old != checksum => changes.modified.push(path.clone()),
            Some(_) => {}
        }
    }

    changes.deleted = previous
        .keys()
        .filter(|path| !current.contains_key(*path))
        .cloned()
        .collect();

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::catalog;
    use std::collections::HashSet;

    fn sorted(mut paths: Vec<String>) -> Vec<String> {
        paths.sort();
        paths
    }

    #[test]
    fn test_diff_buckets() {
        let previous = catalog(&[("a", "1"), ("b", "1"), ("d", "1")]);
        let current = catalog(&[("a", "2"), ("b", "1"), ("c", "1")]);

        let changes = diff(&previous, &current);
        assert_eq!(sorted(changes.added), vec!["c"]);
        assert_eq!(sorted(changes.modified), vec!["a"]);
        assert_eq!(sorted(changes.deleted), vec!["d"]);
    }

    #[test]
    fn test_identical_catalogs_are_a_no_op() {
        let previous = catalog(&[("a", "1"), ("b", "1")]);
        let changes = diff(&previous, &previous.clone());
        assert!(changes.is_empty());
        assert_eq!(changes.counts().total(), 0);
    }

    #[test]
    fn test_diff_against_empty_catalog() {
        let current = catalog(&[("a", "1"), ("b", "1")]);
        let changes = diff(&Catalog::new(), &current);
        assert_eq!(changes.counts(), ChangeCounts { added: 2, modified: 0, deleted: 0 });

        let changes = diff(&current, &Catalog::new());
        assert_eq!(changes.counts(), ChangeCounts { added: 0, modified: 0, deleted: 2 });
    }

    #[test]
    fn test_unreported_paths_have_equal_checksums() {
        let previous = catalog(&[("a", "1"), ("b", "2"), ("c", "3"), ("x", "9")]);
        let current = catalog(&[("a", "1"), ("b", "7"), ("c", "3"), ("y", "0")]);
        let changes = diff(&previous, &current);

        let added: HashSet<_> = changes.added.iter().collect();
        let modified: HashSet<_> = changes.modified.iter().collect();
        assert!(added.is_disjoint(&modified));

        for (path, checksum) in &current {
            if !added.contains(path) && !modified.contains(path) {
                assert_eq!(previous.get(path), Some(checksum));
            }
        }
    }

    #[test]
    fn test_everything_reports_all_paths_as_added() {
        let current = catalog(&[("a", "1"), ("b", "1")]);
        let changes = ChangeSet::everything(&current);
        assert_eq!(sorted(changes.changed_paths()), vec!["a", "b"]);
        assert!(changes.deleted.is_empty());
    }
}

//! Bucket info collected for one bucket space during a transition

use std::collections::{BTreeMap, BTreeSet};
use std::ops::AddAssign;

use serde::Serialize;
use tessera_bucket_db::{BucketCopy, BucketDatabase, BucketEntry, BucketId, BucketInfo, BucketSpace};
use tracing::debug;

use crate::BucketInfoEntry;

/// Changes applied to a bucket database by a merge
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct MergeStats {
    /// Buckets that were not in the database before
    pub buckets_added: usize,
    /// Existing buckets whose copies changed
    pub buckets_updated: usize,
    /// Buckets left without copies and removed
    pub buckets_removed: usize,
    /// Copies dropped because their node no longer reports them
    pub copies_removed: usize,
}

impl MergeStats {
    /// Returns true if the merge changed nothing
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.buckets_added == 0
            && self.buckets_updated == 0
            && self.buckets_removed == 0
            && self.copies_removed == 0
    }
}

impl AddAssign for MergeStats {
    fn add_assign(&mut self, other: Self) {
        self.buckets_added += other.buckets_added;
        self.buckets_updated += other.buckets_updated;
        self.buckets_removed += other.buckets_removed;
        self.copies_removed += other.copies_removed;
    }
}

/// Accumulates bucket info replies for one bucket space.
///
/// Results are keyed by bucket and node, so a duplicated reply replaces the
/// earlier one instead of adding to it.
#[derive(Clone, Debug)]
pub struct BucketSpaceTransition {
    bucket_space: BucketSpace,
    results: BTreeMap<BucketId, BTreeMap<u16, BucketInfo>>,
    replied_nodes: BTreeSet<u16>,
    lost_data_nodes: BTreeSet<u16>,
    ownership_transfer: bool,
    creation_timestamp: u64,
}

impl BucketSpaceTransition {
    /// Create a transition for a bucket space. `creation_timestamp` (microseconds)
    /// is recorded on every copy merged from this transition.
    #[must_use]
    pub const fn new(bucket_space: BucketSpace, ownership_transfer: bool, creation_timestamp: u64) -> Self {
        Self {
            bucket_space,
            results: BTreeMap::new(),
            replied_nodes: BTreeSet::new(),
            lost_data_nodes: BTreeSet::new(),
            ownership_transfer,
            creation_timestamp,
        }
    }

    /// Record the full bucket list reported by a node, replacing anything it reported before
    pub fn add_node_result(&mut self, node: u16, buckets: &[BucketInfoEntry]) {
        if !self.replied_nodes.insert(node) {
            for copies in self.results.values_mut() {
                copies.remove(&node);
            }
            self.results.retain(|_, copies| !copies.is_empty());
        }
        for entry in buckets {
            self.results
                .entry(entry.bucket)
                .or_default()
                .insert(node, entry.info);
        }
        debug!(
            "Storage node {node} reported {} buckets in {}",
            buckets.len(),
            self.bucket_space
        );
    }

    /// Mark a node whose previously known copies can no longer be trusted
    pub fn set_node_may_have_lost_data(&mut self, node: u16) {
        self.lost_data_nodes.insert(node);
    }

    /// Returns true if bucket ownership may have moved between distributors
    #[must_use]
    pub const fn ownership_transfer_detected(&self) -> bool {
        self.ownership_transfer
    }

    /// The bucket space
    #[must_use]
    pub const fn bucket_space(&self) -> BucketSpace {
        self.bucket_space
    }

    /// Nodes that reported their buckets
    #[must_use]
    pub const fn replied_nodes(&self) -> &BTreeSet<u16> {
        &self.replied_nodes
    }

    /// Returns true if the node was marked as possibly having lost data
    #[must_use]
    pub fn node_may_have_lost_data(&self, node: u16) -> bool {
        self.lost_data_nodes.contains(&node)
    }

    /// Number of distinct buckets reported so far
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.results.len()
    }

    /// Apply the collected results to a bucket database.
    ///
    /// For nodes that replied or may have lost data, the database copies are
    /// replaced by what the node reported; copies it did not report are
    /// removed. Copies on any other node are left alone. Buckets without
    /// copies are removed. Merging the same results twice changes nothing.
    pub fn merge_into<D: BucketDatabase + ?Sized>(&self, database: &mut D) -> MergeStats {
        let mut stats = MergeStats::default();

        for bucket in database.buckets() {
            let Some(mut entry) = database.get(bucket) else {
                continue;
            };
            let before = entry.clone();
            let reported = self.results.get(&bucket);

            stats.copies_removed += entry.remove_copies_where(|node| {
                self.is_refreshed(node) && !reported.is_some_and(|copies| copies.contains_key(&node))
            });
            if let Some(copies) = reported {
                self.add_copies(&mut entry, copies);
            }

            if entry.is_empty() {
                database.remove(bucket);
                stats.buckets_removed += 1;
            } else if entry != before {
                database.update(entry);
                stats.buckets_updated += 1;
            }
        }

        for (bucket, copies) in &self.results {
            if database.get(*bucket).is_some() {
                continue;
            }
            let mut entry = BucketEntry::new(*bucket);
            self.add_copies(&mut entry, copies);
            database.update(entry);
            stats.buckets_added += 1;
        }

        debug!("Merged {} into bucket database: {stats:?}", self.bucket_space);
        stats
    }

    fn is_refreshed(&self, node: u16) -> bool {
        self.replied_nodes.contains(&node) || self.lost_data_nodes.contains(&node)
    }

    fn add_copies(&self, entry: &mut BucketEntry, copies: &BTreeMap<u16, BucketInfo>) {
        for (&node, &info) in copies {
            if entry.copy_on_node(node).is_some_and(|copy| copy.info == info) {
                continue;
            }
            entry.add_or_replace_copy(BucketCopy {
                node,
                info,
                timestamp: self.creation_timestamp,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tessera_bucket_db_memory::MemoryBucketDatabase;

    fn info(checksum: u32) -> BucketInfo {
        BucketInfo::new(checksum, 1, 100)
    }

    fn entry(bucket: u64, checksum: u32) -> BucketInfoEntry {
        BucketInfoEntry {
            bucket: BucketId(bucket),
            info: info(checksum),
        }
    }

    fn copy(node: u16, checksum: u32) -> BucketCopy {
        BucketCopy {
            node,
            info: info(checksum),
            timestamp: 1,
        }
    }

    fn database(entries: &[(u64, &[BucketCopy])]) -> MemoryBucketDatabase {
        entries
            .iter()
            .map(|(bucket, copies)| BucketEntry {
                bucket: BucketId(*bucket),
                copies: copies.to_vec(),
            })
            .collect()
    }

    fn nodes_of(database: &MemoryBucketDatabase, bucket: u64) -> Vec<u16> {
        database
            .get(BucketId(bucket))
            .map(|entry| entry.copies.iter().map(|copy| copy.node).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_merge_replaces_copies_of_replied_nodes() {
        let mut db = database(&[(1, &[copy(0, 10), copy(1, 11)]), (2, &[copy(1, 20)])]);
        let mut transition = BucketSpaceTransition::new(BucketSpace::DEFAULT, false, 5);
        transition.add_node_result(1, &[entry(1, 12), entry(3, 30)]);

        let stats = transition.merge_into(&mut db);

        assert_eq!(
            stats,
            MergeStats {
                buckets_added: 1,
                buckets_updated: 1,
                buckets_removed: 1,
                copies_removed: 1,
            }
        );
        assert_eq!(nodes_of(&db, 1), vec![0, 1]);
        let updated = db.get(BucketId(1)).unwrap();
        assert_eq!(updated.copy_on_node(1).unwrap().info, info(12));
        assert_eq!(updated.copy_on_node(1).unwrap().timestamp, 5);
        assert_eq!(updated.copy_on_node(0).unwrap().timestamp, 1);
        assert!(db.get(BucketId(2)).is_none());
        assert_eq!(nodes_of(&db, 3), vec![1]);
    }

    #[test]
    fn test_merge_twice_changes_nothing_the_second_time() {
        let mut db = database(&[(1, &[copy(0, 10)])]);
        let mut transition = BucketSpaceTransition::new(BucketSpace::DEFAULT, false, 5);
        transition.add_node_result(2, &[entry(1, 10), entry(4, 40)]);

        transition.merge_into(&mut db);
        let snapshot: Vec<BucketEntry> = db.entries().cloned().collect();
        let second = transition.merge_into(&mut db);

        assert!(second.is_empty());
        assert_eq!(db.entries().cloned().collect::<Vec<_>>(), snapshot);
    }

    #[test]
    fn test_duplicate_result_replaces_instead_of_adding() {
        let mut transition = BucketSpaceTransition::new(BucketSpace::GLOBAL, false, 0);
        transition.add_node_result(3, &[entry(1, 10), entry(2, 20)]);
        transition.add_node_result(3, &[entry(2, 21)]);

        let mut db = MemoryBucketDatabase::new();
        transition.merge_into(&mut db);

        assert_eq!(db.len(), 1);
        assert_eq!(db.get(BucketId(2)).unwrap().copies, vec![BucketCopy {
            node: 3,
            info: info(21),
            timestamp: 0,
        }]);
    }

    #[test]
    fn test_lost_data_node_copies_dropped_without_reply() {
        let mut db = database(&[(1, &[copy(0, 10), copy(2, 10)])]);
        let mut transition = BucketSpaceTransition::new(BucketSpace::DEFAULT, false, 0);
        transition.set_node_may_have_lost_data(2);

        let stats = transition.merge_into(&mut db);

        assert_eq!(stats.copies_removed, 1);
        assert_eq!(nodes_of(&db, 1), vec![0]);
        assert!(transition.node_may_have_lost_data(2));
    }

    #[test]
    fn test_nodes_not_requested_are_retained() {
        let mut db = database(&[(1, &[copy(3, 10)])]);
        let transition = BucketSpaceTransition::new(BucketSpace::DEFAULT, false, 0);

        assert!(transition.merge_into(&mut db).is_empty());
        assert_eq!(nodes_of(&db, 1), vec![3]);
    }
}

//! In-memory implementation of the bucket database for tests and single
//! node development.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::collections::BTreeMap;

use tessera_bucket_db::{BucketDatabase, BucketEntry, BucketId};

/// In-memory bucket database, ordered by bucket id.
#[derive(Clone, Debug, Default)]
pub struct MemoryBucketDatabase {
    entries: BTreeMap<BucketId, BucketEntry>,
}

impl MemoryBucketDatabase {
    /// Creates a new, empty `MemoryBucketDatabase`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Iterates over all entries in bucket order.
    pub fn entries(&self) -> impl Iterator<Item = &BucketEntry> {
        self.entries.values()
    }
}

impl FromIterator<BucketEntry> for MemoryBucketDatabase {
    fn from_iter<I: IntoIterator<Item = BucketEntry>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|entry| (entry.bucket, entry))
                .collect(),
        }
    }
}

impl BucketDatabase for MemoryBucketDatabase {
    fn get(&self, bucket: BucketId) -> Option<BucketEntry> {
        self.entries.get(&bucket).cloned()
    }

    fn update(&mut self, entry: BucketEntry) {
        self.entries.insert(entry.bucket, entry);
    }

    fn remove(&mut self, bucket: BucketId) {
        self.entries.remove(&bucket);
    }

    fn buckets(&self) -> Vec<BucketId> {
        self.entries.keys().copied().collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tessera_bucket_db::{BucketCopy, BucketInfo};

    fn entry(bucket: u64, nodes: &[u16]) -> BucketEntry {
        let mut entry = BucketEntry::new(BucketId(bucket));
        for &node in nodes {
            entry.add_or_replace_copy(BucketCopy {
                node,
                info: BucketInfo::new(u32::from(node), 1, 1),
                timestamp: 0,
            });
        }
        entry
    }

    #[test]
    fn test_update_and_get() {
        let mut db = MemoryBucketDatabase::new();
        db.update(entry(1, &[0, 1]));

        assert_eq!(db.get(BucketId(1)), Some(entry(1, &[0, 1])));
        assert_eq!(db.get(BucketId(2)), None);
    }

    #[test]
    fn test_update_replaces() {
        let mut db = MemoryBucketDatabase::new();
        db.update(entry(1, &[0, 1]));
        db.update(entry(1, &[2]));

        assert_eq!(db.len(), 1);
        assert_eq!(db.get(BucketId(1)), Some(entry(1, &[2])));
    }

    #[test]
    fn test_remove() {
        let mut db: MemoryBucketDatabase = [entry(1, &[0]), entry(2, &[0])].into_iter().collect();
        db.remove(BucketId(1));
        db.remove(BucketId(3));

        assert_eq!(db.buckets(), vec![BucketId(2)]);
        assert!(!db.is_empty());
    }

    #[test]
    fn test_buckets_are_ordered() {
        let db: MemoryBucketDatabase = [entry(9, &[0]), entry(3, &[0]), entry(5, &[0])]
            .into_iter()
            .collect();

        assert_eq!(db.buckets(), vec![BucketId(3), BucketId(5), BucketId(9)]);
        assert_eq!(db.entries().count(), 3);
    }
}

//! Abstract interface for the distributor's bucket databases.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::fmt;

use serde::{Deserialize, Serialize};

/// A named partition of the bucket namespace. Each bucket space has its own database.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct BucketSpace(pub u64);

impl BucketSpace {
    /// Bucket space for regular documents.
    pub const DEFAULT: Self = Self(1);

    /// Bucket space for documents replicated to every node.
    pub const GLOBAL: Self = Self(2);
}

impl fmt::Display for BucketSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::DEFAULT => f.write_str("default"),
            Self::GLOBAL => f.write_str("global"),
            Self(id) => write!(f, "bucketspace-{id}"),
        }
    }
}

/// Identifies a bucket: a shard of the document key space.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct BucketId(pub u64);

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BucketId(0x{:016x})", self.0)
    }
}

/// Metadata a storage node reports for one bucket replica.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct BucketInfo {
    /// Checksum of the replica contents
    pub checksum: u32,
    /// Number of documents
    pub doc_count: u32,
    /// Total size of the documents, in bytes
    pub total_doc_size: u32,
    /// Whether the replica is ready for serving
    pub ready: bool,
    /// Whether the replica is the active one for searching
    pub active: bool,
}

impl BucketInfo {
    /// Create bucket info with the given checksum, document count and size.
    #[must_use]
    pub const fn new(checksum: u32, doc_count: u32, total_doc_size: u32) -> Self {
        Self {
            checksum,
            doc_count,
            total_doc_size,
            ready: false,
            active: false,
        }
    }
}

/// One replica of a bucket on a storage node.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BucketCopy {
    /// Storage node holding the replica
    pub node: u16,
    /// Reported bucket info
    pub info: BucketInfo,
    /// When the info was recorded, in microseconds
    pub timestamp: u64,
}

/// A bucket and all its known replicas.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BucketEntry {
    /// The bucket
    pub bucket: BucketId,
    /// Known replicas, at most one per node
    pub copies: Vec<BucketCopy>,
}

impl BucketEntry {
    /// Create an entry without replicas
    #[must_use]
    pub const fn new(bucket: BucketId) -> Self {
        Self {
            bucket,
            copies: Vec::new(),
        }
    }

    /// Replica on the given node, if any
    #[must_use]
    pub fn copy_on_node(&self, node: u16) -> Option<&BucketCopy> {
        self.copies.iter().find(|copy| copy.node == node)
    }

    /// Add a replica, replacing any existing replica on the same node
    pub fn add_or_replace_copy(&mut self, copy: BucketCopy) {
        match self.copies.iter_mut().find(|existing| existing.node == copy.node) {
            Some(existing) => *existing = copy,
            None => self.copies.push(copy),
        }
    }

    /// Remove replicas on every node matching the predicate. Returns the number removed.
    pub fn remove_copies_where(&mut self, mut predicate: impl FnMut(u16) -> bool) -> usize {
        let before = self.copies.len();
        self.copies.retain(|copy| !predicate(copy.node));
        before - self.copies.len()
    }

    /// Returns true if no replicas are known
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.copies.is_empty()
    }
}

/// A trait representing a bucket database.
///
/// Databases are owned by a single distributor worker and mutated from one
/// execution context, so the operations are synchronous and infallible.
///
/// # Required Methods
/// - `fn get(&self, bucket: BucketId) -> Option<BucketEntry>`: Retrieves the entry of a bucket.
/// - `fn update(&mut self, entry: BucketEntry)`: Inserts or replaces the entry of a bucket.
/// - `fn remove(&mut self, bucket: BucketId)`: Removes a bucket.
/// - `fn buckets(&self) -> Vec<BucketId>`: Lists every bucket in ascending order.
pub trait BucketDatabase: Send + 'static {
    /// Retrieves the entry of a bucket.
    fn get(&self, bucket: BucketId) -> Option<BucketEntry>;

    /// Inserts or replaces the entry of a bucket.
    fn update(&mut self, entry: BucketEntry);

    /// Removes a bucket.
    fn remove(&mut self, bucket: BucketId);

    /// Lists every bucket in ascending order.
    fn buckets(&self) -> Vec<BucketId>;

    /// Number of buckets.
    fn len(&self) -> usize {
        self.buckets().len()
    }

    /// Returns true if the database holds no buckets.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn copy(node: u16, checksum: u32) -> BucketCopy {
        BucketCopy {
            node,
            info: BucketInfo::new(checksum, 1, 10),
            timestamp: 0,
        }
    }

    #[test]
    fn test_add_or_replace_copy() {
        let mut entry = BucketEntry::new(BucketId(1));
        entry.add_or_replace_copy(copy(0, 1));
        entry.add_or_replace_copy(copy(1, 2));
        entry.add_or_replace_copy(copy(0, 3));

        assert_eq!(entry.copies.len(), 2);
        assert_eq!(entry.copy_on_node(0).unwrap().info.checksum, 3);
    }

    #[test]
    fn test_remove_copies_where() {
        let mut entry = BucketEntry::new(BucketId(1));
        entry.add_or_replace_copy(copy(0, 1));
        entry.add_or_replace_copy(copy(1, 2));
        entry.add_or_replace_copy(copy(2, 3));

        assert_eq!(entry.remove_copies_where(|node| node != 1), 2);
        assert_eq!(entry.copies.len(), 1);
        assert!(entry.copy_on_node(1).is_some());
        assert_eq!(entry.remove_copies_where(|_| true), 1);
        assert!(entry.is_empty());
    }

    #[test]
    fn test_display() {
        assert_eq!(BucketSpace::DEFAULT.to_string(), "default");
        assert_eq!(BucketSpace::GLOBAL.to_string(), "global");
        assert_eq!(BucketSpace(7).to_string(), "bucketspace-7");
        assert_eq!(BucketId(0x2a).to_string(), "BucketId(0x000000000000002a)");
    }
}

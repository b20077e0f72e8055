//! Bucket databases and distributions, one per bucket space

use std::collections::BTreeMap;
use std::sync::Arc;

use tessera_bucket_db::BucketSpace;
use tessera_cluster_state::Distribution;

/// A bucket space as held by the distributor: its database and distribution
#[derive(Debug)]
pub struct DistributorBucketSpace<D> {
    database: D,
    distribution: Arc<Distribution>,
}

impl<D> DistributorBucketSpace<D> {
    /// Create a new bucket space
    pub const fn new(database: D, distribution: Arc<Distribution>) -> Self {
        Self {
            database,
            distribution,
        }
    }

    /// The bucket database
    pub const fn database(&self) -> &D {
        &self.database
    }

    /// The bucket database, mutably
    pub const fn database_mut(&mut self) -> &mut D {
        &mut self.database
    }

    /// The distribution used for this space
    pub const fn distribution(&self) -> &Arc<Distribution> {
        &self.distribution
    }

    /// Replace the distribution
    pub fn set_distribution(&mut self, distribution: Arc<Distribution>) {
        self.distribution = distribution;
    }
}

/// All bucket spaces known to the distributor
#[derive(Debug)]
pub struct BucketSpaceRepo<D> {
    spaces: BTreeMap<BucketSpace, DistributorBucketSpace<D>>,
}

impl<D> Default for BucketSpaceRepo<D> {
    fn default() -> Self {
        Self {
            spaces: BTreeMap::new(),
        }
    }
}

impl<D> BucketSpaceRepo<D> {
    /// Create an empty repo
    pub fn new() -> Self {
        Self::default()
    }

    /// A repo with the default and global bucket spaces sharing one distribution
    pub fn with_default_spaces(
        distribution: Arc<Distribution>,
        mut make_database: impl FnMut() -> D,
    ) -> Self {
        let mut repo = Self::new();
        for space in [BucketSpace::DEFAULT, BucketSpace::GLOBAL] {
            repo.insert(
                space,
                DistributorBucketSpace::new(make_database(), distribution.clone()),
            );
        }
        repo
    }

    /// Add or replace a bucket space
    pub fn insert(&mut self, space: BucketSpace, bucket_space: DistributorBucketSpace<D>) {
        self.spaces.insert(space, bucket_space);
    }

    /// Look up a bucket space
    pub fn get(&self, space: BucketSpace) -> Option<&DistributorBucketSpace<D>> {
        self.spaces.get(&space)
    }

    /// Look up a bucket space, mutably
    pub fn get_mut(&mut self, space: BucketSpace) -> Option<&mut DistributorBucketSpace<D>> {
        self.spaces.get_mut(&space)
    }

    /// Iterate over all bucket spaces in id order
    pub fn iter(&self) -> impl Iterator<Item = (BucketSpace, &DistributorBucketSpace<D>)> {
        self.spaces.iter().map(|(space, bucket_space)| (*space, bucket_space))
    }

    /// Ids of all bucket spaces
    pub fn spaces(&self) -> Vec<BucketSpace> {
        self.spaces.keys().copied().collect()
    }

    /// Install a new distribution in every bucket space
    pub fn set_distribution(&mut self, distribution: &Arc<Distribution>) {
        for bucket_space in self.spaces.values_mut() {
            bucket_space.set_distribution(distribution.clone());
        }
    }

    /// Number of bucket spaces
    pub fn len(&self) -> usize {
        self.spaces.len()
    }

    /// Returns true if there are no bucket spaces
    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty()
    }
}

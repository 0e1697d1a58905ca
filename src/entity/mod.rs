//! Entity Module
//!
//! The primitive storage unit: a binary key, an optional binary value and
//! the partition the key is assigned to.
//!
//! ## Partitioning
//! Partitions are assigned by hashing the key with CRC32 and reducing modulo
//! the shard count. The assignment is pure, so a key always lands in the
//! same partition for a fixed shard count. Changing the shard count of an
//! existing dataset is not supported.

mod row_key;

pub use row_key::{decode_row_key, encode_row_key, parse_partition_key, partition_key};

/// Assign a key to a partition in `[0, shard_count)`
///
/// `shard_count` must be non-zero; `StoreConfig::validate` guarantees this
/// for every running store.
pub fn partition_for(key: &[u8], shard_count: u64) -> u64 {
    debug_assert!(shard_count > 0);
    u64::from(crc32fast::hash(key)) % shard_count
}

/// Identity of an entity for deduplication: (partition, key)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId {
    pub partition: u64,
    pub key: Vec<u8>,
}

/// A keyed entity as stored in the table service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    /// Raw entity key
    pub key: Vec<u8>,

    /// Stored value, `None` when not (yet) known or not found
    pub value: Option<Vec<u8>>,

    /// Assigned partition
    pub partition: u64,
}

impl Entity {
    /// Create an entity with a value, unpartitioned
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
            partition: 0,
        }
    }

    /// Create a lookup entity (key only)
    pub fn key_only(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: None,
            partition: 0,
        }
    }

    /// Assign the partition for the given shard count
    pub fn with_partition(mut self, shard_count: u64) -> Self {
        self.partition = partition_for(&self.key, shard_count);
        self
    }

    /// Deduplication identity
    pub fn id(&self) -> EntityId {
        EntityId {
            partition: self.partition,
            key: self.key.clone(),
        }
    }

    /// True once a value has been written or retrieved
    pub fn is_found(&self) -> bool {
        self.value.is_some()
    }
}

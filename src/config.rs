//! Configuration for shardtable
//!
//! Centralized configuration with sensible defaults.

use crate::error::{Result, StoreError};

/// Hard per-request limit imposed by the table service: rows per batch
/// write and distinct targets per compound filter.
pub const MAX_BATCH_SIZE: usize = 100;

/// Main configuration for a ShardedStore instance
#[derive(Debug, Clone)]
pub struct StoreConfig {
    // -------------------------------------------------------------------------
    // Sharding Configuration
    // -------------------------------------------------------------------------
    /// Number of partitions entities are spread across. Fixed for the
    /// lifetime of the dataset; re-sharding is unsupported.
    pub shard_count: u64,

    // -------------------------------------------------------------------------
    // Batching Configuration
    // -------------------------------------------------------------------------
    /// Max upserts per batch write call (clamped to MAX_BATCH_SIZE)
    pub batch_limit: usize,

    /// Max distinct entities per compound query (clamped to MAX_BATCH_SIZE)
    pub query_group_limit: usize,

    // -------------------------------------------------------------------------
    // Runtime Configuration
    // -------------------------------------------------------------------------
    /// Name of the background drain thread
    pub drain_thread_name: String,

    /// Call `create_if_missing` on the service at construction
    pub create_table: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            shard_count: 200, // sized for a single storage account
            batch_limit: MAX_BATCH_SIZE,
            query_group_limit: MAX_BATCH_SIZE,
            drain_thread_name: "shardtable-drain".to_string(),
            create_table: true,
        }
    }
}

impl StoreConfig {
    /// Create a new config builder
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::default()
    }

    /// Check the config can drive a store
    pub fn validate(&self) -> Result<()> {
        if self.shard_count == 0 {
            return Err(StoreError::Config("shard_count must be at least 1".to_string()));
        }
        if self.batch_limit == 0 || self.query_group_limit == 0 {
            return Err(StoreError::Config(
                "batch_limit and query_group_limit must be at least 1".to_string(),
            ));
        }
        if self.batch_limit > MAX_BATCH_SIZE || self.query_group_limit > MAX_BATCH_SIZE {
            return Err(StoreError::Config(format!(
                "batch_limit ({}) and query_group_limit ({}) must not exceed {}",
                self.batch_limit, self.query_group_limit, MAX_BATCH_SIZE
            )));
        }
        Ok(())
    }
}

/// Builder for StoreConfig
#[derive(Default)]
pub struct StoreConfigBuilder {
    config: StoreConfig,
}

impl StoreConfigBuilder {
    /// Set the number of partitions
    pub fn shard_count(mut self, count: u64) -> Self {
        self.config.shard_count = count;
        self
    }

    /// Set the max rows per batch write (clamped to MAX_BATCH_SIZE)
    pub fn batch_limit(mut self, limit: usize) -> Self {
        self.config.batch_limit = limit.min(MAX_BATCH_SIZE);
        self
    }

    /// Set the max distinct entities per query group (clamped to MAX_BATCH_SIZE)
    pub fn query_group_limit(mut self, limit: usize) -> Self {
        self.config.query_group_limit = limit.min(MAX_BATCH_SIZE);
        self
    }

    /// Set the drain thread name
    pub fn drain_thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.drain_thread_name = name.into();
        self
    }

    /// Skip (or force) table creation at startup
    pub fn create_table(mut self, create: bool) -> Self {
        self.config.create_table = create;
        self
    }

    pub fn build(self) -> StoreConfig {
        self.config
    }
}

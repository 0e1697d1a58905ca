//! Abstract store interface
//!
//! The contract the row layer programs against. `ShardedStore` is the
//! implementation backed by a table service; anything that can shard,
//! batch-write and look up entities can stand in for it.

use crate::entity::Entity;
use crate::error::Result;
use crate::queue::PageCallback;

/// A sharded entity store
pub trait ScalableStore: Send + Sync {
    /// Number of partitions, fixed per instance
    fn shard_count(&self) -> u64;

    /// Look entities up, delivering resolved entities page by page
    ///
    /// Returns once every requested key is resolved. Keys that do not
    /// exist are never passed to `callback`.
    ///
    /// `callback` runs on a store worker thread and must not block on the
    /// same store.
    fn retrieve(&self, entities: Vec<Entity>, callback: PageCallback) -> Result<()>;

    /// Write entities; returns once every entity is durably written
    fn upsert(&self, entities: Vec<Entity>) -> Result<()>;
}

impl<T: ScalableStore + ?Sized> ScalableStore for std::sync::Arc<T> {
    fn shard_count(&self) -> u64 {
        (**self).shard_count()
    }

    fn retrieve(&self, entities: Vec<Entity>, callback: PageCallback) -> Result<()> {
        (**self).retrieve(entities, callback)
    }

    fn upsert(&self, entities: Vec<Entity>) -> Result<()> {
        (**self).upsert(entities)
    }
}

//! # shardtable
//!
//! A client-side engine that turns independent point reads and writes on
//! keyed entities into batched, paginated calls against a quota-constrained
//! wide-column table service:
//! - Entities sharded across a fixed number of partitions
//! - Upserts grouped into batch writes of at most 100 rows
//! - Point lookups merged into compound filters of at most 100 targets
//! - One background drain loop, any number of concurrent callers
//! - A typed row layer with an additive-only binary encoding
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Table / TableDb  (typed records)                │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ entities
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                 Operation Queue                              │
//! │        (partition → operations, one lock, signal)            │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ swap
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                   Drain Loop                                 │
//! │            (one thread per partition per cycle)              │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌──────────────┐
//!   │   Batches   │          │ Query Groups │
//!   │  (≤100 rows)│          │ (≤100 keys,  │
//!   │             │          │  paginated)  │
//!   └──────┬──────┘          └──────┬───────┘
//!          └────────────┬───────────┘
//!                       ▼
//!               ┌──────────────┐
//!               │ TableService │
//!               └──────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod entity;
pub mod service;
pub mod queue;
pub mod dispatch;
pub mod store;
pub mod row;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{StoreError, Result};
pub use config::{StoreConfig, MAX_BATCH_SIZE};
pub use entity::{partition_for, Entity, EntityId};
pub use engine::ShardedStore;
pub use queue::{page_callback, Completion, OperationKind, PageCallback, PageSignal};
pub use row::{FieldValue, KeyedRecord, Table, TableDb};
pub use service::{InMemoryTableService, TableService};
pub use store::ScalableStore;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of shardtable
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Table Service Module
//!
//! The contract of the remote wide-column table service the store drives,
//! treated as a black box.
//!
//! ## Responsibilities
//! - Create the backing table on first use
//! - Atomic insert-or-replace of up to 100 rows of one partition
//! - Paginated scans under a compound exact-match filter
//!
//! ## Row Shape
//! ```text
//! ┌────────────────┬─────────────────────────┬──────────────────┐
//! │ PartitionKey   │ RowKey                  │ Value            │
//! │ "17"           │ percent(base64(key))    │ raw bytes        │
//! └────────────────┴─────────────────────────┴──────────────────┘
//! ```

mod filter;
pub mod memory;

use serde::{Deserialize, Serialize};

use crate::entity::{encode_row_key, partition_key, Entity};
use crate::error::Result;

pub use filter::{Filter, FilterField};
pub use memory::InMemoryTableService;

/// A row as the table service stores it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    pub partition_key: String,
    pub row_key: String,
    pub value: Option<Vec<u8>>,
}

impl TableRow {
    /// Build the service row for an entity
    pub fn from_entity(entity: &Entity) -> Self {
        Self {
            partition_key: partition_key(entity.partition),
            row_key: encode_row_key(&entity.key),
            value: entity.value.clone(),
        }
    }
}

/// Opaque cursor for fetching the next page of a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuationToken(pub Vec<u8>);

/// One page of a segmented query
#[derive(Debug, Clone, Default)]
pub struct QueryPage {
    pub rows: Vec<TableRow>,
    pub next: Option<ContinuationToken>,
}

/// The table service contract
///
/// Implementations are shared across the drain loop's worker threads and
/// must tolerate concurrent calls.
pub trait TableService: Send + Sync + 'static {
    /// Create the backing table if it does not exist yet
    fn create_if_missing(&self) -> Result<()>;

    /// Unconditionally insert-or-replace a batch of rows
    ///
    /// Atomic within the batch only. Callers never send more than
    /// `MAX_BATCH_SIZE` rows, all from the same partition.
    fn batch_write(&self, rows: &[TableRow]) -> Result<()>;

    /// Fetch one page of rows matching `filter`
    ///
    /// `token` is `None` for the first page and the previous page's `next`
    /// afterwards.
    fn query_page(&self, filter: &Filter, token: Option<&ContinuationToken>) -> Result<QueryPage>;
}

impl<T: TableService> TableService for std::sync::Arc<T> {
    fn create_if_missing(&self) -> Result<()> {
        (**self).create_if_missing()
    }

    fn batch_write(&self, rows: &[TableRow]) -> Result<()> {
        (**self).batch_write(rows)
    }

    fn query_page(&self, filter: &Filter, token: Option<&ContinuationToken>) -> Result<QueryPage> {
        (**self).query_page(filter, token)
    }
}

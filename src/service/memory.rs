//! In-memory table service
//!
//! A complete in-process implementation of the `TableService` contract.
//! It enforces the same per-request limits as the remote service, so it is
//! used to exercise the store end to end and to observe how requests are
//! batched.
//!
//! ## Concurrency
//! - `rows`: `RwLock<BTreeMap>`, ordered by (partition key, row key) so
//!   continuation cursors stay valid when the filter changes between pages
//! - `stats` / `faults`: `Mutex`, touched once per call

use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::config::MAX_BATCH_SIZE;
use crate::error::{Result, StoreError};

use super::{ContinuationToken, Filter, FilterField, QueryPage, TableRow, TableService};

/// Default number of rows returned per page
pub const DEFAULT_PAGE_SIZE: usize = 1000;

type RowId = (String, String);

/// Per-call statistics
#[derive(Debug, Clone, Default)]
pub struct ServiceStats {
    /// Number of `create_if_missing` calls
    pub create_calls: usize,

    /// Size of every batch write, in call order
    pub batch_sizes: Vec<usize>,

    /// Every filter passed to `query_page`, in call order
    pub filters: Vec<Filter>,
}

impl ServiceStats {
    /// Number of `query_page` calls
    pub fn page_calls(&self) -> usize {
        self.filters.len()
    }

    /// Number of `batch_write` calls
    pub fn batch_calls(&self) -> usize {
        self.batch_sizes.len()
    }
}

#[derive(Default)]
struct Faults {
    failing_partitions: HashSet<String>,
}

/// In-process table service
pub struct InMemoryTableService {
    rows: RwLock<BTreeMap<RowId, Option<Vec<u8>>>>,
    page_size: usize,
    latency: Option<Duration>,
    stats: Mutex<ServiceStats>,
    faults: Mutex<Faults>,
}

impl InMemoryTableService {
    /// Create an empty service with the default page size
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Create an empty service returning at most `page_size` rows per page
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            page_size: page_size.max(1),
            latency: None,
            stats: Mutex::new(ServiceStats::default()),
            faults: Mutex::new(Faults::default()),
        }
    }

    /// Sleep for `latency` inside every batch and page call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make every call touching `partition` fail
    pub fn fail_partition(&self, partition: u64) {
        self.faults
            .lock()
            .failing_partitions
            .insert(partition.to_string());
    }

    /// Undo `fail_partition`
    pub fn heal_partition(&self, partition: u64) {
        self.faults
            .lock()
            .failing_partitions
            .remove(&partition.to_string());
    }

    /// Snapshot of the call statistics
    pub fn stats(&self) -> ServiceStats {
        self.stats.lock().clone()
    }

    /// Reset the call statistics
    pub fn reset_stats(&self) {
        *self.stats.lock() = ServiceStats::default();
    }

    /// Number of stored rows
    pub fn row_count(&self) -> usize {
        self.rows.read().len()
    }

    /// Direct read of a stored row (bypasses the query path)
    pub fn get_row(&self, partition_key: &str, row_key: &str) -> Option<Vec<u8>> {
        self.rows
            .read()
            .get(&(partition_key.to_string(), row_key.to_string()))
            .cloned()
            .flatten()
    }

    fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            std::thread::sleep(latency);
        }
    }

    fn is_failing(&self, partition_key: &str) -> bool {
        self.faults.lock().failing_partitions.contains(partition_key)
    }

    fn encode_cursor(id: &RowId) -> Result<ContinuationToken> {
        bincode::serialize(id)
            .map(ContinuationToken)
            .map_err(|e| StoreError::Service(format!("cursor encoding failed: {}", e)))
    }

    fn decode_cursor(token: &ContinuationToken) -> Result<RowId> {
        bincode::deserialize(&token.0)
            .map_err(|e| StoreError::Service(format!("invalid continuation token: {}", e)))
    }
}

impl Default for InMemoryTableService {
    fn default() -> Self {
        Self::new()
    }
}

impl TableService for InMemoryTableService {
    fn create_if_missing(&self) -> Result<()> {
        self.stats.lock().create_calls += 1;
        Ok(())
    }

    fn batch_write(&self, rows: &[TableRow]) -> Result<()> {
        self.stats.lock().batch_sizes.push(rows.len());
        self.simulate_latency();

        if rows.is_empty() {
            return Ok(());
        }
        if rows.len() > MAX_BATCH_SIZE {
            return Err(StoreError::Service(format!(
                "batch of {} rows exceeds the limit of {}",
                rows.len(),
                MAX_BATCH_SIZE
            )));
        }

        let partition_key = &rows[0].partition_key;
        if rows.iter().any(|r| &r.partition_key != partition_key) {
            return Err(StoreError::Service(
                "batch spans more than one partition".to_string(),
            ));
        }
        if self.is_failing(partition_key) {
            return Err(StoreError::Service(format!(
                "partition {} is unavailable",
                partition_key
            )));
        }

        // Atomic within the batch: one write lock for all rows
        let mut stored = self.rows.write();
        for row in rows {
            stored.insert(
                (row.partition_key.clone(), row.row_key.clone()),
                row.value.clone(),
            );
        }
        Ok(())
    }

    fn query_page(&self, filter: &Filter, token: Option<&ContinuationToken>) -> Result<QueryPage> {
        self.stats.lock().filters.push(filter.clone());
        self.simulate_latency();

        if filter.target_count() > MAX_BATCH_SIZE {
            return Err(StoreError::Service(format!(
                "filter with {} targets exceeds the limit of {}",
                filter.target_count(),
                MAX_BATCH_SIZE
            )));
        }
        {
            let faults = self.faults.lock();
            if faults
                .failing_partitions
                .iter()
                .any(|p| mentions_partition(filter, p))
            {
                return Err(StoreError::Service(
                    "query touches an unavailable partition".to_string(),
                ));
            }
        }

        let start = match token {
            Some(token) => Bound::Excluded(Self::decode_cursor(token)?),
            None => Bound::Unbounded,
        };

        let stored = self.rows.read();
        let mut matching = stored
            .range((start, Bound::Unbounded))
            .filter(|((pk, rk), _)| filter.matches(pk, rk));

        let mut rows = Vec::new();
        let mut last = None;
        for ((pk, rk), value) in matching.by_ref().take(self.page_size) {
            rows.push(TableRow {
                partition_key: pk.clone(),
                row_key: rk.clone(),
                value: value.clone(),
            });
            last = Some((pk.clone(), rk.clone()));
        }

        let next = match (matching.next(), last) {
            (Some(_), Some(last)) => Some(Self::encode_cursor(&last)?),
            _ => None,
        };

        Ok(QueryPage { rows, next })
    }
}

/// True if any condition of `filter` pins `PartitionKey` to `partition_key`
fn mentions_partition(filter: &Filter, partition_key: &str) -> bool {
    match filter {
        Filter::Eq {
            field: FilterField::PartitionKey,
            value,
        } => value == partition_key,
        Filter::Eq { .. } => false,
        Filter::And(left, right) => {
            mentions_partition(left, partition_key) || mentions_partition(right, partition_key)
        }
        Filter::Or(branches) => branches.iter().any(|b| mentions_partition(b, partition_key)),
    }
}

//! Shared test helpers

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam::channel::{self, Receiver, Sender};
use shardtable::service::memory::InMemoryTableService;
use shardtable::service::{ContinuationToken, Filter, QueryPage, TableRow, TableService};
use shardtable::{partition_for, Result, ShardedStore, StoreConfig};

/// Table service that can hold every call until released
///
/// While the gate is closed each call announces itself on `entered` and
/// blocks until `open` is called. Used to keep the drain loop busy while a
/// test queues up operations for the next cycle.
pub struct GatedService {
    pub inner: InMemoryTableService,
    closed: AtomicBool,
    entered_tx: Sender<()>,
    entered_rx: Receiver<()>,
    release_tx: Sender<()>,
    release_rx: Receiver<()>,
}

impl GatedService {
    pub fn new(inner: InMemoryTableService) -> Self {
        let (entered_tx, entered_rx) = channel::unbounded();
        let (release_tx, release_rx) = channel::unbounded();
        Self {
            inner,
            closed: AtomicBool::new(false),
            entered_tx,
            entered_rx,
            release_tx,
            release_rx,
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Block until a call is held at the gate
    pub fn wait_entered(&self) {
        self.entered_rx.recv().unwrap();
    }

    /// Let held calls (and all later ones) through
    pub fn open(&self) {
        self.closed.store(false, Ordering::SeqCst);
        // One release per call that might be waiting
        for _ in 0..64 {
            self.release_tx.send(()).unwrap();
        }
    }

    /// Let exactly one held call through; the gate stays closed
    pub fn release_one(&self) {
        self.release_tx.send(()).unwrap();
    }

    fn gate(&self) {
        if self.closed.load(Ordering::SeqCst) {
            self.entered_tx.send(()).unwrap();
            self.release_rx.recv().unwrap();
        }
    }
}

impl TableService for GatedService {
    fn create_if_missing(&self) -> Result<()> {
        self.inner.create_if_missing()
    }

    fn batch_write(&self, rows: &[TableRow]) -> Result<()> {
        self.gate();
        self.inner.batch_write(rows)
    }

    fn query_page(&self, filter: &Filter, token: Option<&ContinuationToken>) -> Result<QueryPage> {
        self.gate();
        self.inner.query_page(filter, token)
    }
}

pub fn memory_store(shards: u64) -> (Arc<InMemoryTableService>, ShardedStore<Arc<InMemoryTableService>>) {
    memory_store_with_pages(shards, 1000)
}

pub fn memory_store_with_pages(
    shards: u64,
    page_size: usize,
) -> (Arc<InMemoryTableService>, ShardedStore<Arc<InMemoryTableService>>) {
    let service = Arc::new(InMemoryTableService::with_page_size(page_size));
    let config = StoreConfig::builder().shard_count(shards).build();
    let store = ShardedStore::open(Arc::clone(&service), config).unwrap();
    (service, store)
}

pub fn gated_store(shards: u64) -> (Arc<GatedService>, ShardedStore<Arc<GatedService>>) {
    gated_store_with_pages(shards, 1000)
}

pub fn gated_store_with_pages(
    shards: u64,
    page_size: usize,
) -> (Arc<GatedService>, ShardedStore<Arc<GatedService>>) {
    let service = Arc::new(GatedService::new(InMemoryTableService::with_page_size(page_size)));
    let config = StoreConfig::builder().shard_count(shards).build();
    let store = ShardedStore::open(Arc::clone(&service), config).unwrap();
    (service, store)
}

/// Find `count` keys that land in pairwise different partitions
pub fn keys_in_distinct_partitions(shards: u64, count: usize) -> Vec<Vec<u8>> {
    let mut seen = std::collections::HashSet::new();
    let mut keys = Vec::new();
    for i in 0.. {
        let key = format!("key-{}", i).into_bytes();
        if seen.insert(partition_for(&key, shards)) {
            keys.push(key);
            if keys.len() == count {
                break;
            }
        }
    }
    keys
}

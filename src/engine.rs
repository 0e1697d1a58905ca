//! Engine Module
//!
//! `ShardedStore`, the concrete storage backend: an operation queue in
//! front of a table service, drained by one background thread.
//!
//! ## Responsibilities
//! - Accept upserts and retrieves from any number of threads
//! - Run the drain loop: wait for a signal, swap the pending map, dispatch
//!   every partition concurrently, join, repeat
//! - Shut down with one final drain
//!
//! ## Drain loop states
//! ```text
//!   Idle ──signal──► Draining ──swap──► Dispatching ──► Awaiting ──join──► Idle
//!    ▲  (blocked on recv)      (under the submit lock)  (one thread per      │
//!    │                                                   partition)          │
//!    └───────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::Receiver;
use parking_lot::Mutex;

use crate::config::StoreConfig;
use crate::dispatch::{
    dispatch_partition, mark_drain_worker, on_drain_worker, DispatchLimits, PartitionReport,
};
use crate::entity::{partition_for, Entity};
use crate::error::{Result, StoreError};
use crate::queue::{Completion, OperationKind, OperationQueue, PageCallback};
use crate::service::TableService;
use crate::store::ScalableStore;

/// Totals for one drain cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub partitions: usize,
    pub operations: usize,
    pub batches: usize,
    pub groups: usize,
    pub pages: usize,
    pub failed_calls: usize,
}

impl CycleReport {
    fn absorb(&mut self, partition: &PartitionReport) {
        self.partitions += 1;
        self.operations += partition.upserts + partition.retrieves + partition.settled;
        self.batches += partition.batches;
        self.groups += partition.groups;
        self.pages += partition.pages;
        self.failed_calls += partition.failed_calls;
    }
}

/// State shared between callers and the drain thread
struct Shared<S> {
    config: StoreConfig,
    service: S,
    queue: OperationQueue,
    cycles: AtomicU64,
}

impl<S: TableService> Shared<S> {
    /// One drain cycle over whatever is pending right now
    fn run_cycle(&self) -> CycleReport {
        let snapshot = self.queue.take();
        let mut report = CycleReport::default();
        if snapshot.is_empty() {
            return report;
        }

        let limits = DispatchLimits::from(&self.config);
        let service = &self.service;
        let partitions = crossbeam::thread::scope(|scope| {
            let handles: Vec<_> = snapshot
                .into_iter()
                .map(|(partition, ops)| {
                    scope.spawn(move |_| {
                        mark_drain_worker();
                        dispatch_partition(service, limits, partition, ops)
                    })
                })
                .collect();
            handles
                .into_iter()
                .filter_map(|h| match h.join() {
                    Ok(report) => Some(report),
                    Err(_) => {
                        tracing::error!("partition worker panicked");
                        None
                    }
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

        for partition in &partitions {
            report.absorb(partition);
        }
        self.cycles.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            partitions = report.partitions,
            operations = report.operations,
            batches = report.batches,
            groups = report.groups,
            pages = report.pages,
            failed = report.failed_calls,
            "drain cycle complete"
        );
        report
    }
}

/// Batching, sharding store over a table service
///
/// ## Concurrency Model: many submitters / one drainer
///
/// - **Callers**: append to the pending map under one short lock and block
///   on their own completions; callers never wait on each other
/// - **Drain thread**: the only consumer of the pending map; blocks on a
///   channel while idle, so an idle store costs nothing
/// - **Workers**: scoped threads per partition, per batch and per query
///   group; a cycle ends when all of them have joined
pub struct ShardedStore<S: TableService> {
    shared: Arc<Shared<S>>,
    drain: Mutex<Option<JoinHandle<()>>>,
}

impl<S: TableService> ShardedStore<S> {
    /// Start a store over `service`
    ///
    /// On startup:
    /// 1. Validate the config
    /// 2. Create the backing table if configured to
    /// 3. Start the drain thread
    pub fn open(service: S, config: StoreConfig) -> Result<Self> {
        config.validate()?;

        if config.create_table {
            service.create_if_missing()?;
        }

        let (queue, wakeups) = OperationQueue::new(config.shard_count);
        let thread_name = config.drain_thread_name.clone();
        let shared = Arc::new(Shared {
            config,
            service,
            queue,
            cycles: AtomicU64::new(0),
        });

        let worker = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || drain_loop(worker, wakeups))
            .map_err(|e| StoreError::Runtime(format!("failed to start drain thread: {}", e)))?;

        tracing::info!(shard_count = shared.config.shard_count, "sharded store started");

        Ok(Self {
            shared,
            drain: Mutex::new(Some(handle)),
        })
    }

    /// Start a store with the default config
    pub fn with_defaults(service: S) -> Result<Self> {
        Self::open(service, StoreConfig::default())
    }

    /// Number of partitions (fixed for this instance)
    pub fn shard_count(&self) -> u64 {
        self.shared.config.shard_count
    }

    /// Partition a key is assigned to
    pub fn partition_of(&self, key: &[u8]) -> u64 {
        partition_for(key, self.shard_count())
    }

    /// Queue one operation
    ///
    /// Never blocks beyond the queue lock. The completion settles after the
    /// drain cycle carrying the operation has finished its partition.
    pub fn submit(
        &self,
        entity: Entity,
        kind: OperationKind,
        callback: Option<PageCallback>,
    ) -> Completion {
        self.shared.queue.submit(entity, kind, callback)
    }

    /// Queue a set of operations of one kind
    pub fn submit_many<I>(
        &self,
        entities: I,
        kind: OperationKind,
        callback: Option<PageCallback>,
    ) -> Vec<Completion>
    where
        I: IntoIterator<Item = Entity>,
    {
        self.shared.queue.submit_many(entities, kind, callback)
    }

    /// Write entities; returns once every one is durably written
    ///
    /// All completions are awaited; the first failure is returned.
    pub fn upsert<I>(&self, entities: I) -> Result<()>
    where
        I: IntoIterator<Item = Entity>,
    {
        let completions = self.submit_many(entities, OperationKind::Upsert, None);
        wait_all(completions).map(|_| ())
    }

    /// Look entities up; `callback` receives successive pages of results
    ///
    /// Returns once every requested key has been resolved (found or not).
    pub fn retrieve<I>(&self, entities: I, callback: Option<PageCallback>) -> Result<()>
    where
        I: IntoIterator<Item = Entity>,
    {
        let completions = self.submit_many(entities, OperationKind::Retrieve, callback);
        wait_all(completions).map(|_| ())
    }

    /// Look entities up and return them in request order
    ///
    /// Entities that do not exist come back with `value == None`.
    pub fn retrieve_entities<I>(&self, entities: I) -> Result<Vec<Entity>>
    where
        I: IntoIterator<Item = Entity>,
    {
        let completions = self.submit_many(entities, OperationKind::Retrieve, None);
        wait_all(completions)
    }

    /// Write a single key-value pair
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.submit(Entity::new(key, value), OperationKind::Upsert, None)
            .wait()
            .map(|_| ())
    }

    /// Read a single key
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.submit(Entity::key_only(key), OperationKind::Retrieve, None)
            .wait()?
            .value
            .ok_or(StoreError::NotFound)
    }

    /// Stop the drain loop after one final cycle
    ///
    /// Everything submitted before this call is dispatched; later submits
    /// are rejected with `StoreError::ShutDown`. Safe to call repeatedly.
    ///
    /// From a page callback this only closes the queue; the drain loop
    /// exits after the final cycle without being joined.
    pub fn dispose(&self) {
        if self.shared.queue.close() {
            tracing::info!("sharded store shutting down");
        }

        // Called from a page callback: the cycle running it must finish
        // before the loop can exit, so joining here would never return
        if on_drain_worker() {
            return;
        }

        let handle = self.drain.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("drain thread panicked");
            }
        }
    }

    /// True after `dispose`
    pub fn is_disposed(&self) -> bool {
        self.shared.queue.is_closed()
    }

    /// Number of non-empty drain cycles completed
    pub fn cycles_completed(&self) -> u64 {
        self.shared.cycles.load(Ordering::SeqCst)
    }

    /// Number of operations waiting for the next cycle
    pub fn pending_len(&self) -> usize {
        self.shared.queue.pending_len()
    }

    /// The table service the store drives
    pub fn service(&self) -> &S {
        &self.shared.service
    }

    /// Get the configuration
    pub fn config(&self) -> &StoreConfig {
        &self.shared.config
    }
}

impl<S: TableService> Drop for ShardedStore<S> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<S: TableService> ScalableStore for ShardedStore<S> {
    fn shard_count(&self) -> u64 {
        ShardedStore::shard_count(self)
    }

    fn retrieve(&self, entities: Vec<Entity>, callback: PageCallback) -> Result<()> {
        ShardedStore::retrieve(self, entities, Some(callback))
    }

    fn upsert(&self, entities: Vec<Entity>) -> Result<()> {
        ShardedStore::upsert(self, entities)
    }
}

/// The background worker
fn drain_loop<S: TableService>(shared: Arc<Shared<S>>, wakeups: Receiver<()>) {
    mark_drain_worker();
    tracing::debug!("drain loop started");
    loop {
        let woke = wakeups.recv().is_ok();
        // Coalesce signals that piled up while the last cycle ran
        while wakeups.try_recv().is_ok() {}

        // Read before the swap: a close seen here is covered by this cycle
        let closing = shared.queue.is_closed();
        shared.run_cycle();

        if closing || !woke {
            break;
        }
    }
    tracing::debug!(cycles = shared.cycles.load(Ordering::SeqCst), "drain loop stopped");
}

/// Wait for every completion; the first failure wins
fn wait_all(completions: Vec<Completion>) -> Result<Vec<Entity>> {
    let mut entities = Vec::with_capacity(completions.len());
    let mut first_error = None;
    for completion in completions {
        match completion.wait() {
            Ok(entity) => entities.push(entity),
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(entities),
    }
}

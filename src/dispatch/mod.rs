//! Batch Dispatcher Module
//!
//! Turns one partition's snapshot of operations into backend calls.
//!
//! ## Responsibilities
//! - Split operations by kind
//! - Upserts → batch writes of at most `batch_limit` rows
//! - Retrieves → deduplicated query groups of at most `query_group_limit`
//!   distinct targets, each paginated by `QueryGroup::run`
//! - Settle every operation once all of the partition's calls have joined
//!
//! ## Failure isolation
//! Every batch and every query group runs on its own scoped thread and
//! returns its own outcome. A failed call settles only the operations it
//! carried; a panicking worker drops its operations, whose waiters then
//! observe `StoreError::Logic`.

pub mod query;

use std::cell::Cell;

use crossbeam::thread;

use crate::config::StoreConfig;
use crate::error::Result;
use crate::queue::{Operation, OperationKind};
use crate::service::{TableRow, TableService};

pub use query::{group_retrieves, QueryGroup, ScanSummary};

thread_local! {
    static DRAIN_WORKER: Cell<bool> = const { Cell::new(false) };
}

/// Mark the current thread as part of a drain cycle
///
/// Set on the drain thread and on every worker it spawns. Page callbacks
/// run on these threads, so a callback can tell it must not block on the
/// drain loop.
pub(crate) fn mark_drain_worker() {
    DRAIN_WORKER.with(|flag| flag.set(true));
}

/// True on the drain thread and its workers
pub(crate) fn on_drain_worker() -> bool {
    DRAIN_WORKER.with(|flag| flag.get())
}

/// Per-request limits used when splitting a partition
#[derive(Debug, Clone, Copy)]
pub struct DispatchLimits {
    pub batch_limit: usize,
    pub query_group_limit: usize,
}

impl From<&StoreConfig> for DispatchLimits {
    fn from(config: &StoreConfig) -> Self {
        Self {
            batch_limit: config.batch_limit,
            query_group_limit: config.query_group_limit,
        }
    }
}

/// What happened to one partition during a drain cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartitionReport {
    pub partition: u64,
    pub upserts: usize,
    pub retrieves: usize,
    pub settled: usize,
    pub batches: usize,
    pub groups: usize,
    pub pages: usize,
    pub failed_calls: usize,
    pub lost_workers: usize,
}

struct UpsertBatch {
    ops: Vec<Operation>,
}

impl UpsertBatch {
    fn write<S: TableService + ?Sized>(&self, service: &S) -> Result<()> {
        let rows: Vec<TableRow> = self
            .ops
            .iter()
            .map(|op| TableRow::from_entity(&op.entity))
            .collect();
        service.batch_write(&rows)
    }

    fn settle(self, outcome: &Result<()>, partition: u64) {
        for op in self.ops {
            match outcome {
                Ok(()) => op.complete(),
                Err(e) => op.settle(Err(e.clone().in_partition(partition))),
            }
        }
    }
}

/// Dispatch one partition's operations and settle all of them
///
/// Blocks until every batch write and query group of the partition has
/// finished.
pub fn dispatch_partition<S: TableService + ?Sized>(
    service: &S,
    limits: DispatchLimits,
    partition: u64,
    ops: Vec<Operation>,
) -> PartitionReport {
    let mut report = PartitionReport {
        partition,
        ..PartitionReport::default()
    };

    let mut upserts = Vec::new();
    let mut retrieves = Vec::new();
    for op in ops {
        match op.kind {
            OperationKind::Upsert => upserts.push(op),
            OperationKind::Retrieve => retrieves.push(op),
            OperationKind::Settled => {
                report.settled += 1;
                op.complete();
            }
        }
    }
    report.upserts = upserts.len();
    report.retrieves = retrieves.len();

    let batches = split_batches(upserts, limits.batch_limit);
    let groups = match group_retrieves(retrieves, limits.query_group_limit) {
        Ok(groups) => groups,
        // Limits come from a validated config; an invalid one drops the
        // retrieves and their waiters see a logic error
        Err(e) => {
            tracing::error!(partition, error = %e, "cannot group retrieves");
            Vec::new()
        }
    };
    report.batches = batches.len();
    report.groups = groups.len();

    let joined = thread::scope(|scope| {
        let batch_handles: Vec<_> = batches
            .into_iter()
            .map(|batch| {
                scope.spawn(move |_| {
                    mark_drain_worker();
                    let outcome = batch.write(service);
                    (batch, outcome)
                })
            })
            .collect();

        let group_handles: Vec<_> = groups
            .into_iter()
            .map(|mut group| {
                scope.spawn(move |_| {
                    mark_drain_worker();
                    let outcome = group.run(service);
                    (group, outcome)
                })
            })
            .collect();

        let batch_results: Vec<_> = batch_handles.into_iter().map(|h| h.join()).collect();
        let group_results: Vec<_> = group_handles.into_iter().map(|h| h.join()).collect();
        (batch_results, group_results)
    });

    let (batch_results, group_results) = match joined {
        Ok(results) => results,
        Err(_) => {
            // Every handle is joined explicitly, so the scope itself only
            // fails if joining panicked
            tracing::error!(partition, "dispatch scope panicked");
            report.lost_workers += report.batches + report.groups;
            return report;
        }
    };

    for result in batch_results {
        match result {
            Ok((batch, outcome)) => {
                if let Err(e) = &outcome {
                    report.failed_calls += 1;
                    tracing::warn!(partition, rows = batch.ops.len(), error = %e, "batch write failed");
                }
                batch.settle(&outcome, partition);
            }
            Err(_) => {
                report.lost_workers += 1;
                tracing::error!(partition, "batch worker panicked");
            }
        }
    }

    for result in group_results {
        match result {
            Ok((group, outcome)) => {
                match &outcome {
                    Ok(summary) => report.pages += summary.pages,
                    Err(e) => {
                        report.failed_calls += 1;
                        tracing::warn!(partition, targets = group.len(), error = %e, "query group failed");
                    }
                }
                group.settle(&outcome, partition);
            }
            Err(_) => {
                report.lost_workers += 1;
                tracing::error!(partition, "query worker panicked");
            }
        }
    }

    report
}

fn split_batches(upserts: Vec<Operation>, limit: usize) -> Vec<UpsertBatch> {
    let limit = limit.max(1);
    let mut batches = Vec::with_capacity(upserts.len().div_ceil(limit));
    let mut current = Vec::with_capacity(limit.min(upserts.len()));
    for op in upserts {
        current.push(op);
        if current.len() == limit {
            batches.push(UpsertBatch {
                ops: std::mem::take(&mut current),
            });
        }
    }
    if !current.is_empty() {
        batches.push(UpsertBatch { ops: current });
    }
    batches
}

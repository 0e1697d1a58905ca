//! Pending operation map
//!
//! Partition id → operations in submission order. Callers append under a
//! `parking_lot::Mutex`; the drain loop swaps the whole map out for an
//! empty one under the same lock, so an operation is in exactly one
//! snapshot.

use std::collections::HashMap;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

use crate::entity::{partition_for, Entity};
use crate::error::StoreError;

use super::{Completion, Operation, OperationKind, PageCallback};

/// Operations waiting for the next drain cycle, keyed by partition
pub type PendingMap = HashMap<u64, Vec<Operation>>;

struct Inbox {
    pending: PendingMap,
    closed: bool,
}

/// Thread-safe operation inbox
///
/// ## Concurrency:
/// - `inbox`: one lock, held only to append or swap
/// - `signal`: unbounded channel; one message per submit call, the drain
///   loop coalesces them
pub struct OperationQueue {
    shard_count: u64,
    inbox: Mutex<Inbox>,
    signal: Sender<()>,
}

impl OperationQueue {
    /// Create a queue and the signal receiver the drain loop blocks on
    pub fn new(shard_count: u64) -> (Self, Receiver<()>) {
        let (signal, wakeups) = channel::unbounded();
        let queue = Self {
            shard_count,
            inbox: Mutex::new(Inbox {
                pending: PendingMap::new(),
                closed: false,
            }),
            signal,
        };
        (queue, wakeups)
    }

    /// Number of partitions entities are assigned to
    pub fn shard_count(&self) -> u64 {
        self.shard_count
    }

    /// Queue one entity and wake the drain loop
    pub fn submit(
        &self,
        entity: Entity,
        kind: OperationKind,
        callback: Option<PageCallback>,
    ) -> Completion {
        self.submit_many(std::iter::once(entity), kind, callback)
            .pop()
            .unwrap_or_else(|| Completion::ready(Err(StoreError::ShutDown)))
    }

    /// Queue several entities under one lock acquisition and one wakeup
    ///
    /// Completions are returned in input order. After `close()` every
    /// completion is rejected immediately with `StoreError::ShutDown`.
    pub fn submit_many<I>(
        &self,
        entities: I,
        kind: OperationKind,
        callback: Option<PageCallback>,
    ) -> Vec<Completion>
    where
        I: IntoIterator<Item = Entity>,
    {
        let ops: Vec<(Operation, Completion)> = entities
            .into_iter()
            .map(|mut entity| {
                entity.partition = partition_for(&entity.key, self.shard_count);
                Operation::new(entity, kind, callback.clone())
            })
            .collect();

        let mut completions = Vec::with_capacity(ops.len());
        {
            let mut inbox = self.inbox.lock();
            if inbox.closed {
                drop(inbox);
                for (op, completion) in ops {
                    op.settle(Err(StoreError::ShutDown));
                    completions.push(completion);
                }
                return completions;
            }

            for (op, completion) in ops {
                inbox.pending.entry(op.entity.partition).or_default().push(op);
                completions.push(completion);
            }
        }

        tracing::trace!(count = completions.len(), ?kind, "queued operations");
        // The receiver only goes away after the drain loop exits, which
        // happens after `close()`; a failed send cannot lose operations.
        let _ = self.signal.send(());
        completions
    }

    /// Swap the pending map for an empty one
    pub fn take(&self) -> PendingMap {
        std::mem::take(&mut self.inbox.lock().pending)
    }

    /// Reject all future submits and wake the drain loop one last time
    ///
    /// Returns false if the queue was already closed.
    pub fn close(&self) -> bool {
        {
            let mut inbox = self.inbox.lock();
            if inbox.closed {
                return false;
            }
            inbox.closed = true;
        }
        let _ = self.signal.send(());
        true
    }

    pub fn is_closed(&self) -> bool {
        self.inbox.lock().closed
    }

    /// Number of operations waiting for the next cycle
    pub fn pending_len(&self) -> usize {
        self.inbox.lock().pending.values().map(Vec::len).sum()
    }
}

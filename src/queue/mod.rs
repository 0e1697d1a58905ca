//! Operation Queue Module
//!
//! The thread-safe inbox between callers and the drain loop.
//!
//! ## Responsibilities
//! - Wrap each requested entity in an `Operation` with a one-shot completion
//! - Append operations to a partition-keyed pending map under one lock
//! - Wake the drain loop without ever blocking the caller
//! - Hand the whole pending map to the drain loop in one swap
//!
//! ## Settlement
//! `Operation::settle` consumes the operation, so an operation can be
//! settled at most once. An operation dropped without being settled closes
//! its channel and the waiter sees `StoreError::Logic` instead of hanging.

mod pending;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use crate::entity::Entity;
use crate::error::{Result, StoreError};

pub use pending::{OperationQueue, PendingMap};

/// What the caller wants done with an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Insert or replace the entity
    Upsert,

    /// Look the entity up by key
    Retrieve,

    /// Already resolved; complete with the current entity
    Settled,
}

/// Returned by a page callback after each delivered page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSignal {
    /// Keep the filter as it is for the next page
    Continue,

    /// The delivered entities are done; drop them from the filter
    Satisfied,
}

/// Receives successive pages of resolved entities during a retrieve
pub type PageCallback = Arc<dyn Fn(&[Entity]) -> PageSignal + Send + Sync>;

/// Wrap a closure as a page callback
pub fn page_callback<F>(f: F) -> PageCallback
where
    F: Fn(&[Entity]) -> PageSignal + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A queued request on one entity
pub struct Operation {
    pub entity: Entity,
    pub kind: OperationKind,
    pub callback: Option<PageCallback>,
    sender: Sender<Result<Entity>>,
}

impl Operation {
    /// Create an operation and the completion its caller waits on
    pub fn new(
        entity: Entity,
        kind: OperationKind,
        callback: Option<PageCallback>,
    ) -> (Self, Completion) {
        let (sender, receiver) = channel::bounded(1);
        let op = Self {
            entity,
            kind,
            callback,
            sender,
        };
        (op, Completion { receiver })
    }

    /// Record a retrieved value
    pub fn set_value(&mut self, value: Option<Vec<u8>>) {
        self.entity.value = value;
    }

    /// Settle the operation, consuming it
    pub fn settle(self, outcome: Result<Entity>) {
        // The waiter may have given up (timeout or drop); nothing to do then
        let _ = self.sender.send(outcome);
    }

    /// Settle successfully with the current entity
    pub fn complete(self) {
        let entity = self.entity.clone();
        self.settle(Ok(entity));
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("entity", &self.entity)
            .field("kind", &self.kind)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// The caller's side of an operation: settles exactly once
#[derive(Debug)]
pub struct Completion {
    receiver: Receiver<Result<Entity>>,
}

impl Completion {
    /// A completion that is already settled
    pub fn ready(outcome: Result<Entity>) -> Self {
        let (sender, receiver) = channel::bounded(1);
        let _ = sender.send(outcome);
        Self { receiver }
    }

    /// Block until the operation settles
    pub fn wait(self) -> Result<Entity> {
        self.receiver.recv().unwrap_or_else(|_| Err(dropped()))
    }

    /// Block until the operation settles or `timeout` elapses
    ///
    /// Returns `None` on timeout; the completion can be waited on again.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<Entity>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(dropped())),
        }
    }

    /// Non-blocking check
    pub fn try_get(&self) -> Option<Result<Entity>> {
        match self.receiver.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(channel::TryRecvError::Empty) => None,
            Err(channel::TryRecvError::Disconnected) => Some(Err(dropped())),
        }
    }
}

fn dropped() -> StoreError {
    StoreError::Logic("operation dropped without being settled".to_string())
}

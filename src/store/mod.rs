//! Replicated key/value tree shared by every device in a room.
//!
//! The [`Store`] trait is the only medium through which the controller and the participants
//! talk to each other. It offers subtree subscriptions, unconditional writes, single-path
//! atomic transactions, and per-connection cleanup actions that fire when a connection goes
//! away.

mod connection;
/// Store error types.
pub mod error;
pub mod memory;
mod path;

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tokio::sync::watch;
use uuid::Uuid;

pub use self::connection::Connection;
pub use self::error::{StoreError, StoreResult};
pub use self::memory::MemoryStore;
pub use self::path::StorePath;

/// Identifier of one device session with the store.
pub type ConnectionId = Uuid;

/// Read-modify-write function handed to [`Store::transaction`].
///
/// Backends may invoke it more than once when they detect a concurrent write, so it must be
/// a pure function of the current value.
pub type TransactionFn = Arc<dyn Fn(Option<&Value>) -> TransactionOutcome + Send + Sync>;

/// Decision returned by a [`TransactionFn`].
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionOutcome {
    /// Replace the current value with this one.
    Commit(Value),
    /// Leave the current value untouched.
    Abort,
}

/// Abstraction over the replicated store backend.
pub trait Store: Send + Sync {
    /// Register a new device session and return its id along with its connectivity signal.
    fn open_connection(&self) -> (ConnectionId, watch::Receiver<bool>);
    /// Tear a session down, running every cleanup action it registered.
    fn close_connection(&self, connection: ConnectionId);
    /// Read the value at `path`.
    fn get(&self, path: &StorePath) -> BoxFuture<'static, StoreResult<Option<Value>>>;
    /// Overwrite the value at `path`. Writing `null` removes the node.
    fn set(&self, path: &StorePath, value: Value) -> BoxFuture<'static, StoreResult<()>>;
    /// Overwrite several children of `path` in one write.
    fn update(
        &self,
        path: &StorePath,
        fields: Map<String, Value>,
    ) -> BoxFuture<'static, StoreResult<()>>;
    /// Delete the subtree at `path`.
    fn remove(&self, path: &StorePath) -> BoxFuture<'static, StoreResult<()>>;
    /// Atomically apply `update` to the value at `path`, returning the committed value or
    /// `None` when the function aborted.
    fn transaction(
        &self,
        path: &StorePath,
        update: TransactionFn,
    ) -> BoxFuture<'static, StoreResult<Option<Value>>>;
    /// Watch the subtree at `path`. The subscription starts with the current value.
    fn subscribe(&self, path: &StorePath) -> Subscription;
    /// Write `value` at `path` once `connection` goes away.
    fn on_disconnect(
        &self,
        connection: ConnectionId,
        path: &StorePath,
        value: Value,
    ) -> BoxFuture<'static, StoreResult<()>>;
    /// Drop the cleanup action `connection` registered at `path`.
    fn cancel_on_disconnect(
        &self,
        connection: ConnectionId,
        path: &StorePath,
    ) -> BoxFuture<'static, StoreResult<()>>;
}

/// Push-driven view on one subtree. Intermediate values may be coalesced; the latest value
/// is never lost.
pub struct Subscription {
    receiver: watch::Receiver<Option<Value>>,
}

impl Subscription {
    /// Wrap the receiving half of a backend notification channel.
    pub fn new(receiver: watch::Receiver<Option<Value>>) -> Self {
        Self { receiver }
    }

    /// Latest value, marking it as seen.
    pub fn current(&mut self) -> Option<Value> {
        self.receiver.borrow_and_update().clone()
    }

    /// Wait for the subtree to change. Returns `None` once the backend went away.
    pub async fn changed(&mut self) -> Option<Option<Value>> {
        self.receiver.changed().await.ok()?;
        Some(self.current())
    }
}

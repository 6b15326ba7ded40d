use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::debug;

use super::{
    ConnectionId, Store, StoreError, StorePath, StoreResult, Subscription, TransactionFn,
};

/// One device's session with the store.
///
/// Every write goes through a connection so cleanup actions have an owner. Dropping the
/// connection is indistinguishable from an abrupt transport loss: the store runs the
/// registered cleanup actions on our behalf.
pub struct Connection {
    store: Arc<dyn Store>,
    id: ConnectionId,
    online: watch::Receiver<bool>,
}

impl Connection {
    /// Open a new session against `store`.
    pub fn open(store: Arc<dyn Store>) -> Self {
        let (id, online) = store.open_connection();
        debug!(connection = %id, "store connection opened");
        Self { store, id, online }
    }

    /// Id the store knows this session by.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Whether the store still considers this session alive.
    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Connectivity signal; flips to `false` once the session is severed.
    pub fn connectivity(&self) -> watch::Receiver<bool> {
        self.online.clone()
    }

    /// Read the value at `path`.
    pub async fn get(&self, path: &StorePath) -> StoreResult<Option<Value>> {
        self.ensure_online()?;
        self.store.get(path).await
    }

    /// Overwrite the value at `path`.
    pub async fn set(&self, path: &StorePath, value: impl Serialize) -> StoreResult<()> {
        self.ensure_online()?;
        let value = to_value(path, value)?;
        self.store.set(path, value).await
    }

    /// Overwrite several children of `path` at once.
    pub async fn update(&self, path: &StorePath, fields: Map<String, Value>) -> StoreResult<()> {
        self.ensure_online()?;
        self.store.update(path, fields).await
    }

    /// Delete the subtree at `path`.
    pub async fn remove(&self, path: &StorePath) -> StoreResult<()> {
        self.ensure_online()?;
        self.store.remove(path).await
    }

    /// Atomic read-modify-write of the value at `path`.
    pub async fn transaction(
        &self,
        path: &StorePath,
        update: TransactionFn,
    ) -> StoreResult<Option<Value>> {
        self.ensure_online()?;
        self.store.transaction(path, update).await
    }

    /// Follow the subtree at `path`. Works while offline; updates simply stop.
    pub fn subscribe(&self, path: &StorePath) -> Subscription {
        self.store.subscribe(path)
    }

    /// Have the store write `value` at `path` once this session goes away.
    pub async fn on_disconnect(&self, path: &StorePath, value: impl Serialize) -> StoreResult<()> {
        self.ensure_online()?;
        let value = to_value(path, value)?;
        self.store.on_disconnect(self.id, path, value).await
    }

    /// Disarm the cleanup registered at `path`.
    pub async fn cancel_on_disconnect(&self, path: &StorePath) -> StoreResult<()> {
        self.ensure_online()?;
        self.store.cancel_on_disconnect(self.id, path).await
    }

    fn ensure_online(&self) -> StoreResult<()> {
        if self.is_online() {
            Ok(())
        } else {
            Err(StoreError::Disconnected)
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        debug!(connection = %self.id, "store connection dropped");
        self.store.close_connection(self.id);
    }
}

fn to_value(path: &StorePath, value: impl Serialize) -> StoreResult<Value> {
    serde_json::to_value(value).map_err(|err| StoreError::malformed(path, err))
}

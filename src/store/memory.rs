//! In-process [`Store`] backend.
//!
//! The whole tree lives behind one mutex, so every write, notification fan-out, and
//! transaction is linearizable. Subscribers receive the recomputed subtree through coalescing
//! watch channels, which matches the last-write-wins delivery the protocol assumes.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use futures::future::{self, BoxFuture, FutureExt};
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::{debug, trace};
use uuid::Uuid;

use super::{
    ConnectionId, Store, StorePath, StoreResult, Subscription, TransactionFn, TransactionOutcome,
};

/// Tree-backed store living in the current process.
pub struct MemoryStore {
    inner: Mutex<Tree>,
}

struct Tree {
    root: Value,
    subscribers: Vec<Subscriber>,
    connections: HashMap<ConnectionId, ConnectionEntry>,
}

struct Subscriber {
    path: StorePath,
    sender: watch::Sender<Option<Value>>,
}

struct ConnectionEntry {
    online: watch::Sender<bool>,
    cleanup: Vec<(StorePath, Value)>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Tree {
                root: Value::Object(Map::new()),
                subscribers: Vec::new(),
                connections: HashMap::new(),
            }),
        }
    }
}

impl MemoryStore {
    /// Empty tree with no sessions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions currently open.
    pub fn connection_count(&self) -> usize {
        self.lock().connections.len()
    }

    /// Simulate the backend detecting a lost transport for `connection`.
    pub fn sever(&self, connection: ConnectionId) {
        self.close_connection(connection);
    }

    // The tree stays structurally valid even if a panic interrupted a writer, so a poisoned
    // lock is recovered rather than propagated.
    fn lock(&self) -> MutexGuard<'_, Tree> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self, path: &StorePath, value: Option<Value>) {
        let mut tree = self.lock();
        tree.write(path, value);
    }
}

impl Tree {
    fn write(&mut self, path: &StorePath, value: Option<Value>) {
        trace!(%path, removed = value.is_none(), "store write");
        write_node(&mut self.root, path.segments(), value);
        self.notify(path);
    }

    fn notify(&mut self, written: &StorePath) {
        let root = &self.root;
        self.subscribers.retain(|subscriber| {
            if subscriber.sender.is_closed() {
                return false;
            }

            if subscriber.path.overlaps(written) {
                let next = lookup(root, &subscriber.path).cloned();
                subscriber.sender.send_if_modified(|current| {
                    if *current == next {
                        false
                    } else {
                        *current = next;
                        true
                    }
                });
            }

            true
        });
    }
}

impl Store for MemoryStore {
    fn open_connection(&self) -> (ConnectionId, watch::Receiver<bool>) {
        let id = Uuid::new_v4();
        let (online, receiver) = watch::channel(true);
        self.lock().connections.insert(
            id,
            ConnectionEntry {
                online,
                cleanup: Vec::new(),
            },
        );
        (id, receiver)
    }

    fn close_connection(&self, connection: ConnectionId) {
        let mut tree = self.lock();
        let Some(entry) = tree.connections.remove(&connection) else {
            return;
        };

        debug!(
            connection = %connection,
            actions = entry.cleanup.len(),
            "running disconnect cleanup"
        );
        for (path, value) in entry.cleanup {
            tree.write(&path, normalize(value));
        }
        entry.online.send_replace(false);
    }

    fn get(&self, path: &StorePath) -> BoxFuture<'static, StoreResult<Option<Value>>> {
        let value = lookup(&self.lock().root, path).cloned();
        future::ready(Ok(value)).boxed()
    }

    fn set(&self, path: &StorePath, value: Value) -> BoxFuture<'static, StoreResult<()>> {
        self.write(path, normalize(value));
        future::ready(Ok(())).boxed()
    }

    fn update(
        &self,
        path: &StorePath,
        fields: Map<String, Value>,
    ) -> BoxFuture<'static, StoreResult<()>> {
        let mut tree = self.lock();
        for (key, value) in fields {
            write_node(
                &mut tree.root,
                path.child(key).segments(),
                normalize(value),
            );
        }
        tree.notify(path);
        future::ready(Ok(())).boxed()
    }

    fn remove(&self, path: &StorePath) -> BoxFuture<'static, StoreResult<()>> {
        self.write(path, None);
        future::ready(Ok(())).boxed()
    }

    fn transaction(
        &self,
        path: &StorePath,
        update: TransactionFn,
    ) -> BoxFuture<'static, StoreResult<Option<Value>>> {
        let mut tree = self.lock();
        let outcome = update(lookup(&tree.root, path));
        let committed = match outcome {
            TransactionOutcome::Commit(value) => {
                tree.write(path, normalize(value.clone()));
                Some(value)
            }
            TransactionOutcome::Abort => None,
        };
        future::ready(Ok(committed)).boxed()
    }

    fn subscribe(&self, path: &StorePath) -> Subscription {
        let mut tree = self.lock();
        let (sender, receiver) = watch::channel(lookup(&tree.root, path).cloned());
        tree.subscribers.push(Subscriber {
            path: path.clone(),
            sender,
        });
        Subscription::new(receiver)
    }

    fn on_disconnect(
        &self,
        connection: ConnectionId,
        path: &StorePath,
        value: Value,
    ) -> BoxFuture<'static, StoreResult<()>> {
        if let Some(entry) = self.lock().connections.get_mut(&connection) {
            entry.cleanup.retain(|(registered, _)| registered != path);
            entry.cleanup.push((path.clone(), value));
        }
        future::ready(Ok(())).boxed()
    }

    fn cancel_on_disconnect(
        &self,
        connection: ConnectionId,
        path: &StorePath,
    ) -> BoxFuture<'static, StoreResult<()>> {
        if let Some(entry) = self.lock().connections.get_mut(&connection) {
            entry.cleanup.retain(|(registered, _)| registered != path);
        }
        future::ready(Ok(())).boxed()
    }
}

/// `null` means "no value" throughout the tree.
fn normalize(value: Value) -> Option<Value> {
    (!value.is_null()).then_some(value)
}

fn lookup<'a>(root: &'a Value, path: &StorePath) -> Option<&'a Value> {
    path.segments()
        .iter()
        .try_fold(root, |node, segment| match node {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
        .filter(|value| !is_empty(value))
}

fn write_node(node: &mut Value, segments: &[String], value: Option<Value>) {
    let Some((head, rest)) = segments.split_first() else {
        *node = value.unwrap_or(Value::Null);
        return;
    };

    if let Value::Array(items) = node {
        if let Some(child) = head.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
            write_node(child, rest, value);
            return;
        }

        // Keys that are not an index of the list turn it into a keyed object.
        let entries = std::mem::take(items)
            .into_iter()
            .enumerate()
            .map(|(index, item)| (index.to_string(), item))
            .collect();
        *node = Value::Object(entries);
    }

    if !node.is_object() {
        if value.is_none() {
            return;
        }
        *node = Value::Object(Map::new());
    }

    let Value::Object(map) = node else {
        return;
    };

    match value {
        None if rest.is_empty() => {
            map.shift_remove(head.as_str());
        }
        None => {
            if let Some(child) = map.get_mut(head.as_str()) {
                write_node(child, rest, None);
                if is_empty(child) {
                    map.shift_remove(head.as_str());
                }
            }
        }
        Some(value) => {
            let child = map.entry(head.clone()).or_insert(Value::Null);
            write_node(child, rest, Some(value));
        }
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

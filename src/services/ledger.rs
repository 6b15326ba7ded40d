use std::sync::Arc;

use serde_json::{Value, json};
use tracing::debug;

use crate::{
    error::ServiceError,
    session::room::RoomCode,
    store::{Connection, TransactionFn, TransactionOutcome},
};

/// Add-only access to the `scores` subtree of a room.
///
/// Every mutation is a single-path transaction computing `current + delta`, so concurrent
/// submissions and store-level retries converge on the sum of all deltas.
#[derive(Clone)]
pub struct ScoreLedger {
    connection: Arc<Connection>,
    code: RoomCode,
}

impl ScoreLedger {
    pub(crate) fn new(connection: Arc<Connection>, code: RoomCode) -> Self {
        Self { connection, code }
    }

    /// Atomically add `delta` to the score of `player_id`, returning the new total.
    pub async fn add_score(&self, player_id: &str, delta: u64) -> Result<u64, ServiceError> {
        let path = self.code.score(player_id);
        let committed = self
            .connection
            .transaction(&path, increment(delta))
            .await?
            .ok_or_else(|| ServiceError::InvalidState("score transaction aborted".into()))?;
        let total = committed.as_u64().unwrap_or_default();
        debug!(room = %self.code, player = player_id, delta, total, "score added");
        Ok(total)
    }
}

fn increment(delta: u64) -> TransactionFn {
    Arc::new(move |current: Option<&Value>| {
        let current = current.and_then(Value::as_u64).unwrap_or(0);
        TransactionOutcome::Commit(json!(current.saturating_add(delta)))
    })
}

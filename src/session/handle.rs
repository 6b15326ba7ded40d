//! Capability handles onto one room.
//!
//! Only the room registry mints handles. The controller's handle is the single way to write
//! `gameState/*`, `questions`, or to clear the ledger; a participant's handle can read the
//! room, write its own presence record, and add to scores through the ledger.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;

use crate::{
    error::ServiceError,
    services::ledger::ScoreLedger,
    session::{
        model::{CONTROLLER_ID, GameState, RoomSnapshot},
        room::RoomCode,
    },
    store::{Connection, Subscription},
};

/// Read-only view onto a room subtree.
#[derive(Clone)]
pub struct RoomReader {
    connection: Arc<Connection>,
    code: RoomCode,
}

impl RoomReader {
    pub(crate) fn new(connection: Arc<Connection>, code: RoomCode) -> Self {
        Self { connection, code }
    }

    /// Code of the room.
    pub fn code(&self) -> &RoomCode {
        &self.code
    }

    /// Subscribe to the whole room subtree.
    pub fn subscribe(&self) -> Subscription {
        self.connection.subscribe(&self.code.root())
    }

    /// Read the room once.
    pub async fn snapshot(&self) -> Result<RoomSnapshot, ServiceError> {
        let root = self.code.root();
        let value = self.connection.get(&root).await?;
        RoomSnapshot::from_value(&root.to_string(), value)?
            .ok_or_else(|| ServiceError::NoActiveSession(self.code.to_string()))
    }

    /// Connectivity signal of the underlying store connection.
    pub fn connectivity(&self) -> watch::Receiver<bool> {
        self.connection.connectivity()
    }

    pub(crate) fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }
}

/// Write access to the controller-owned parts of a room.
pub struct ControllerHandle {
    reader: RoomReader,
    question_count: usize,
    time_per_question: u32,
}

impl ControllerHandle {
    pub(crate) fn new(reader: RoomReader, question_count: usize, time_per_question: u32) -> Self {
        Self {
            reader,
            question_count,
            time_per_question,
        }
    }

    /// Read access to the same room.
    pub fn reader(&self) -> &RoomReader {
        &self.reader
    }

    /// Code of the room.
    pub fn code(&self) -> &RoomCode {
        self.reader.code()
    }

    /// Size of the question list written at creation.
    pub fn question_count(&self) -> usize {
        self.question_count
    }

    /// Seconds per question for this session.
    pub fn time_per_question(&self) -> u32 {
        self.time_per_question
    }

    /// Overwrite every `gameState` field in a single write.
    pub async fn write_game_state(&self, state: GameState) -> Result<(), ServiceError> {
        let fields = match serde_json::to_value(state) {
            Ok(Value::Object(fields)) => fields,
            _ => {
                return Err(ServiceError::InvalidState(
                    "game state did not serialize to an object".into(),
                ));
            }
        };
        let connection = self.reader.connection();
        connection.update(&self.code().game_state(), fields).await?;
        Ok(())
    }

    /// Publish the seconds left on the active question.
    pub async fn write_timer(&self, timer: u32) -> Result<(), ServiceError> {
        let path = self.code().game_state().child("timer");
        self.reader.connection().set(&path, timer).await?;
        Ok(())
    }

    /// Drop every score entry.
    pub async fn clear_scores(&self) -> Result<(), ServiceError> {
        self.reader.connection().remove(&self.code().scores()).await?;
        Ok(())
    }

    /// Identity under which the controller's own presence record is written.
    pub fn presence_id(&self) -> &'static str {
        CONTROLLER_ID
    }
}

/// Participant capabilities: read the room, maintain its own presence, add to scores.
pub struct ParticipantHandle {
    reader: RoomReader,
    player_id: String,
}

impl ParticipantHandle {
    pub(crate) fn new(reader: RoomReader, player_id: String) -> Self {
        Self { reader, player_id }
    }

    /// Read access to the same room.
    pub fn reader(&self) -> &RoomReader {
        &self.reader
    }

    /// Id the handle was issued for.
    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    /// Handle onto the scoring ledger of this room.
    pub fn ledger(&self) -> ScoreLedger {
        ScoreLedger::new(self.reader.connection().clone(), self.reader.code().clone())
    }
}

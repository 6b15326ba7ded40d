use std::sync::Arc;

use indexmap::IndexMap;

use dashmap::DashSet;
use tracing::{debug, info};

use crate::{
    error::ServiceError,
    session::{
        handle::{ControllerHandle, ParticipantHandle, RoomReader},
        model::{CONTROLLER_ID, GameState, Question, RoomSnapshot},
        room::{RoomCode, validate_player_id},
    },
    store::Connection,
};

/// How many fresh codes to draw before giving up on finding one unused locally.
const MAX_CODE_DRAWS: usize = 32;

/// Maps room codes to sessions and mints the capability handles onto them.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashSet<RoomCode>,
}

impl RoomRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session in LOBBY with `questions` and hand back the controller's handle.
    ///
    /// The question list is written once here and never again.
    pub async fn create_room(
        &self,
        connection: Arc<Connection>,
        questions: Vec<Question>,
        time_per_question: u32,
    ) -> Result<ControllerHandle, ServiceError> {
        if time_per_question == 0 {
            return Err(ServiceError::InvalidInput(
                "time per question must be at least one second".into(),
            ));
        }

        let code = self.reserve_code()?;

        if let Err(err) = initialize(&connection, &code, &questions, time_per_question).await {
            self.rooms.remove(&code);
            return Err(err);
        }

        info!(
            room = %code,
            questions = questions.len(),
            time_per_question,
            "room created"
        );
        Ok(ControllerHandle::new(
            RoomReader::new(connection, code),
            questions.len(),
            time_per_question,
        ))
    }

    /// Open a participant handle onto an existing session.
    pub async fn join_room(
        &self,
        connection: Arc<Connection>,
        code: &RoomCode,
        player_id: &str,
    ) -> Result<ParticipantHandle, ServiceError> {
        validate_player_id(player_id)?;
        if player_id == CONTROLLER_ID {
            return Err(ServiceError::InvalidInput(format!(
                "player id `{player_id}` is reserved"
            )));
        }

        let reader = self.observe_room(connection, code).await?;
        debug!(room = %code, player = player_id, "participant handle issued");
        Ok(ParticipantHandle::new(reader, player_id.to_owned()))
    }

    /// Open a read-only handle onto an existing session.
    pub async fn observe_room(
        &self,
        connection: Arc<Connection>,
        code: &RoomCode,
    ) -> Result<RoomReader, ServiceError> {
        let exists = connection.get(&code.game_state()).await?.is_some();
        if !exists {
            return Err(ServiceError::NoActiveSession(code.to_string()));
        }
        Ok(RoomReader::new(connection, code.clone()))
    }

    /// Forget a room created by this process. The store subtree is left as is.
    pub fn release(&self, code: &RoomCode) -> bool {
        self.rooms.remove(code).is_some()
    }

    /// Whether this process created `code` and still holds it.
    pub fn contains(&self, code: &RoomCode) -> bool {
        self.rooms.contains(code)
    }

    /// Number of rooms held by this process.
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Whether this process holds no room.
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    fn reserve_code(&self) -> Result<RoomCode, ServiceError> {
        for _ in 0..MAX_CODE_DRAWS {
            let code = RoomCode::generate();
            if self.rooms.insert(code.clone()) {
                return Ok(code);
            }
        }
        Err(ServiceError::InvalidState("no free room code available".into()))
    }
}

/// Replace the whole room subtree with a fresh lobby, so a reused code inherits nothing.
async fn initialize(
    connection: &Connection,
    code: &RoomCode,
    questions: &[Question],
    time_per_question: u32,
) -> Result<(), ServiceError> {
    let room = RoomSnapshot {
        questions: questions.to_vec(),
        game_state: Some(GameState::lobby(time_per_question)),
        players: IndexMap::new(),
        scores: IndexMap::new(),
    };
    connection.set(&code.root(), room).await?;
    Ok(())
}

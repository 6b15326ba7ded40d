use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use serde_json::Value;
use serde_with::skip_serializing_none;
use tracing::warn;

use crate::store::{StoreError, StoreResult};

/// Synthetic player id under which the controller may register its own presence.
pub const CONTROLLER_ID: &str = "__controller__";

/// Phase of a session as written to `gameState/status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// Players are joining; nothing is running.
    Lobby,
    /// The controller runs its local countdown before the first question.
    Countdown,
    /// A question is active and the timer is ticking.
    Playing,
    /// All questions have been played.
    Finished,
}

/// One answer option of a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    /// Stable identifier referenced by `correctChoiceId`.
    pub id: String,
    /// Text shown on the answer button.
    pub text: String,
}

/// A multiple-choice question as stored under `questions`.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    /// Stable id, unique within the room.
    pub id: String,
    /// Question text.
    pub prompt: String,
    /// Optional image shown alongside the prompt.
    pub image: Option<String>,
    /// Answer options in display order.
    pub choices: Vec<Choice>,
    /// Id of the right choice.
    pub correct_choice_id: String,
}

impl Question {
    /// Whether `choice_id` is the correct answer.
    pub fn is_correct(&self, choice_id: &str) -> bool {
        self.correct_choice_id == choice_id
    }

    /// Whether the question lists a choice with this id.
    pub fn has_choice(&self, choice_id: &str) -> bool {
        self.choices.iter().any(|choice| choice.id == choice_id)
    }
}

/// Controller-owned fields under `gameState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    /// Current phase.
    pub status: SessionStatus,
    /// Zero-based index into `questions`.
    #[serde(default)]
    pub current_question_index: usize,
    /// Seconds left on the active question.
    #[serde(default)]
    pub timer: u32,
    /// Full length of every question in seconds.
    pub time_per_question: u32,
}

impl GameState {
    /// State written when a room is created or reset.
    pub fn lobby(time_per_question: u32) -> Self {
        Self {
            status: SessionStatus::Lobby,
            current_question_index: 0,
            timer: time_per_question,
            time_per_question,
        }
    }
}

/// Presence record under `players/{id}`, written only by its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    /// Display name.
    pub name: String,
    /// Avatar key, opaque to the server.
    #[serde(default)]
    pub avatar: String,
    /// Cleared by the disconnect cleanup or an explicit leave.
    #[serde(default)]
    pub online: bool,
    /// Unix timestamp in milliseconds of the last presence write.
    #[serde(default)]
    pub last_seen: i64,
}

/// Everything a client can observe about one room at a given instant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    /// Written once when the room is created.
    #[serde(default)]
    pub questions: Vec<Question>,
    /// Controller-owned state; absent when no session exists.
    #[serde(default)]
    pub game_state: Option<GameState>,
    /// Presence records in registration order.
    #[serde(default, deserialize_with = "skip_malformed_entries")]
    pub players: IndexMap<String, Player>,
    /// Score ledger.
    #[serde(default, deserialize_with = "skip_malformed_entries")]
    pub scores: IndexMap<String, u64>,
}

/// Decode a keyed collection entry by entry, dropping entries that do not decode.
///
/// Players and scores are written by many devices. A half-written record, such as a
/// presence entry holding only the `online=false` cleanup, must not hide the rest of the room.
fn skip_malformed_entries<'de, D, T>(deserializer: D) -> Result<IndexMap<String, T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let entries = match Value::deserialize(deserializer)? {
        Value::Object(entries) => entries,
        Value::Null => return Ok(IndexMap::new()),
        other => {
            warn!(value = %other, "ignoring non-object collection");
            return Ok(IndexMap::new());
        }
    };

    Ok(entries
        .into_iter()
        .filter_map(|(key, value)| match serde_json::from_value(value) {
            Ok(entry) => Some((key, entry)),
            Err(err) => {
                warn!(entry = %key, error = %err, "skipping malformed entry");
                None
            }
        })
        .collect())
}

impl RoomSnapshot {
    /// Decode the raw room subtree. An absent subtree yields `None`.
    pub fn from_value(room: &str, value: Option<Value>) -> StoreResult<Option<Self>> {
        let Some(value) = value else {
            return Ok(None);
        };

        serde_json::from_value(value)
            .map(Some)
            .map_err(|err| StoreError::malformed(room, err))
    }

    /// Question selected by `gameState/currentQuestionIndex`, if any.
    pub fn current_question(&self) -> Option<&Question> {
        let state = self.game_state?;
        self.questions.get(state.current_question_index)
    }

    /// Score of `player_id`; absent entries count as zero.
    pub fn score_of(&self, player_id: &str) -> u64 {
        self.scores.get(player_id).copied().unwrap_or(0)
    }
}

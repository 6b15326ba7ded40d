use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    error::ServiceError,
    services::{
        participant::{AnswerOutcome, ParticipantView},
        projection::RoomView,
    },
    session::setup::QuestionInput,
};

#[derive(Debug, Deserialize, Validate)]
/// First frame of a teacher device: the question bank and session options.
pub struct HostRequest {
    /// Question bank to pick the session from.
    pub questions: Vec<QuestionInput>,
    /// Seconds per question; the configured default when absent.
    #[serde(default)]
    #[validate(range(min = 1, max = 600))]
    pub time_per_question: Option<u32>,
    /// Keep only questions of this category.
    #[serde(default)]
    pub category: Option<String>,
    /// Keep at most this many questions.
    #[serde(default)]
    #[validate(range(min = 1))]
    pub limit: Option<usize>,
    /// When set, the controller registers its own presence under this name.
    #[serde(default)]
    #[validate(length(min = 1, max = 40))]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
/// First frame of a player device.
pub struct JoinRequest {
    /// Six-digit code shown by the host.
    pub room_code: String,
    /// Stable device id; rejoining with it resumes the same score.
    #[validate(length(min = 1, max = 64))]
    pub player_id: String,
    /// Display name.
    #[validate(length(min = 1, max = 40))]
    pub name: String,
    /// Avatar key, opaque to the server.
    #[serde(default)]
    #[validate(length(max = 64))]
    pub avatar: String,
}

#[derive(Debug, Deserialize)]
/// Messages accepted from room WebSocket clients.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Create a room and become its controller.
    Host(HostRequest),
    /// Join an existing room as a player.
    Join(JoinRequest),
    /// Host only: leave the lobby.
    StartGame,
    /// Host only: return a finished game to the lobby.
    Reset,
    /// Player only: answer the open question.
    Answer {
        /// Id of the chosen answer button.
        choice_id: String,
    },
    /// Player only: leave the room for good.
    Leave,
}

impl InboundMessage {
    /// Parse a text frame and validate its payload.
    pub fn from_json_str(raw: &str) -> Result<Self, ServiceError> {
        let message: Self = serde_json::from_str(raw)
            .map_err(|err| ServiceError::InvalidInput(format!("malformed message: {err}")))?;
        match &message {
            Self::Host(request) => request.validate()?,
            Self::Join(request) => request.validate()?,
            _ => {}
        }
        Ok(message)
    }
}

/// Room view pushed to the teacher device.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostView {
    /// Projected room.
    #[serde(flatten)]
    pub room: RoomView,
    /// Steps left on the pre-game countdown.
    pub countdown: u32,
}

#[derive(Debug, Serialize)]
/// Messages pushed to room WebSocket clients.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Reply to `host`.
    RoomCreated {
        /// Code players join with.
        room_code: String,
        /// Questions kept after filtering.
        question_count: usize,
    },
    /// Reply to `join`.
    Joined {
        /// Joined room.
        room_code: String,
        /// Id the device plays under.
        player_id: String,
    },
    /// Host screen update.
    HostView(HostView),
    /// Player screen update.
    PlayerView(ParticipantView),
    /// Result of the last `answer`.
    AnswerResult(AnswerOutcome),
    /// A request was rejected.
    Error {
        /// Human-readable reason.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::services::participant::IgnoreReason;

    #[test]
    fn parses_commands() {
        assert!(matches!(
            InboundMessage::from_json_str(r#"{"type":"start_game"}"#).unwrap(),
            InboundMessage::StartGame
        ));
        match InboundMessage::from_json_str(r#"{"type":"answer","choice_id":"b"}"#).unwrap() {
            InboundMessage::Answer { choice_id } => assert_eq!(choice_id, "b"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn parses_a_host_request_with_camel_case_questions() {
        let raw = json!({
            "type": "host",
            "time_per_question": 15,
            "questions": [{
                "prompt": "2+2?",
                "choices": [{ "text": "4" }, { "text": "5" }],
                "correctChoiceId": "a"
            }]
        });
        match InboundMessage::from_json_str(&raw.to_string()).unwrap() {
            InboundMessage::Host(request) => {
                assert_eq!(request.time_per_question, Some(15));
                assert_eq!(request.questions.len(), 1);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn rejects_invalid_payloads() {
        let blank_name = r#"{"type":"join","room_code":"123456","player_id":"p1","name":""}"#;
        assert!(matches!(
            InboundMessage::from_json_str(blank_name),
            Err(ServiceError::InvalidInput(_))
        ));
        assert!(InboundMessage::from_json_str(r#"{"type":"skip_question"}"#).is_err());
        assert!(InboundMessage::from_json_str("not json").is_err());
    }

    #[test]
    fn outbound_messages_carry_their_type() {
        let created = serde_json::to_value(OutboundMessage::RoomCreated {
            room_code: "123456".into(),
            question_count: 3,
        })
        .unwrap();
        assert_eq!(created["type"], "room_created");
        assert_eq!(created["room_code"], "123456");

        let ignored = serde_json::to_value(OutboundMessage::AnswerResult(AnswerOutcome::Ignored {
            reason: IgnoreReason::TimeUp,
        }))
        .unwrap();
        assert_eq!(
            ignored,
            json!({ "type": "answer_result", "outcome": "ignored", "reason": "time_up" })
        );

        let scored: Value =
            serde_json::to_value(OutboundMessage::AnswerResult(AnswerOutcome::Scored { points: 88 }))
                .unwrap();
        assert_eq!(scored["points"], 88);
    }
}

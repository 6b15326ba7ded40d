//! Local, derived copy of a room.
//!
//! Each client subscribes to the room subtree and folds every notification into its own
//! [`RoomProjection`]. Nothing here writes to the store.

use serde::Serialize;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, warn};

use crate::{
    services::leaderboard::{self, LeaderboardRow},
    session::{
        handle::RoomReader,
        model::{Question, RoomSnapshot, SessionStatus},
    },
};

/// Question as shown to players, without the correct answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    /// Question id.
    pub id: String,
    /// Question text.
    pub prompt: String,
    /// Optional illustration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Answer buttons in display order.
    pub choices: Vec<ChoiceView>,
}

/// One answer button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChoiceView {
    /// Id sent back with an answer.
    pub id: String,
    /// Button label.
    pub text: String,
}

impl From<&Question> for QuestionView {
    fn from(question: &Question) -> Self {
        Self {
            id: question.id.clone(),
            prompt: question.prompt.clone(),
            image: question.image.clone(),
            choices: question
                .choices
                .iter()
                .map(|choice| ChoiceView {
                    id: choice.id.clone(),
                    text: choice.text.clone(),
                })
                .collect(),
        }
    }
}

/// Renderable state of a room.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    /// Room code.
    pub room: String,
    /// `None` while no session exists under the room code.
    pub status: Option<SessionStatus>,
    /// Index of the current question.
    pub question_index: usize,
    /// Questions in the session.
    pub question_count: usize,
    /// Open question, only while PLAYING.
    pub question: Option<QuestionView>,
    /// Seconds left as last written by the controller.
    pub timer: u32,
    /// Full length of a question.
    pub time_per_question: u32,
    /// Leaderboard derived from the same snapshot.
    pub leaderboard: Vec<LeaderboardRow>,
    /// Whether our store connection is still alive.
    pub connected: bool,
}

/// What changed in the last reduction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Observed {
    /// `gameState/status` moved.
    pub status_changed: bool,
    /// `gameState/currentQuestionIndex` moved.
    pub index_changed: bool,
}

/// Input to the projection loop.
#[derive(Debug)]
pub enum ProjectionUpdate {
    /// The room subtree changed; `None` means it no longer exists.
    Room(Option<RoomSnapshot>),
    /// Our own connectivity changed.
    Connectivity(bool),
}

/// Folded state of one room.
#[derive(Debug, Clone)]
pub struct RoomProjection {
    room: String,
    snapshot: Option<RoomSnapshot>,
    leaderboard: Vec<LeaderboardRow>,
    connected: bool,
}

impl RoomProjection {
    /// Empty projection for `room`, assumed connected.
    pub fn new(room: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            snapshot: None,
            leaderboard: Vec::new(),
            connected: true,
        }
    }

    /// Fold one update in, reporting status and question-index changes.
    pub fn apply(&mut self, update: ProjectionUpdate) -> Observed {
        match update {
            ProjectionUpdate::Room(next) => {
                let before = self.position();
                // Recomputed on every change, so a status transition never shows a stale board.
                self.leaderboard = next
                    .as_ref()
                    .map(|room| leaderboard::compute(&room.players, &room.scores))
                    .unwrap_or_default();
                self.snapshot = next;
                let after = self.position();

                Observed {
                    status_changed: before.0 != after.0,
                    index_changed: before.1 != after.1,
                }
            }
            ProjectionUpdate::Connectivity(connected) => {
                self.connected = connected;
                Observed::default()
            }
        }
    }

    /// Last decoded room, if any.
    pub fn snapshot(&self) -> Option<&RoomSnapshot> {
        self.snapshot.as_ref()
    }

    /// Render the folded state.
    pub fn view(&self) -> RoomView {
        let snapshot = self.snapshot.as_ref();
        let state = snapshot.and_then(|room| room.game_state);
        let question = snapshot
            .filter(|_| state.is_some_and(|s| s.status == SessionStatus::Playing))
            .and_then(RoomSnapshot::current_question)
            .map(QuestionView::from);

        RoomView {
            room: self.room.clone(),
            status: state.map(|s| s.status),
            question_index: state.map(|s| s.current_question_index).unwrap_or_default(),
            question_count: snapshot.map(|room| room.questions.len()).unwrap_or_default(),
            question,
            timer: state.map(|s| s.timer).unwrap_or_default(),
            time_per_question: state.map(|s| s.time_per_question).unwrap_or_default(),
            leaderboard: self.leaderboard.clone(),
            connected: self.connected,
        }
    }

    fn position(&self) -> (Option<SessionStatus>, Option<usize>) {
        let state = self.snapshot.as_ref().and_then(|room| room.game_state);
        (
            state.map(|s| s.status),
            state.map(|s| s.current_question_index),
        )
    }
}

/// Follow `reader`'s room until the store goes away, feeding every change to `on_update`.
pub async fn follow<F>(reader: RoomReader, mut on_update: F)
where
    F: FnMut(ProjectionUpdate) + Send,
{
    let room = reader.code().root().to_string();
    let mut subscription = reader.subscribe();
    let mut connectivity = reader.connectivity();
    let mut connectivity_open = true;

    on_update(ProjectionUpdate::Connectivity(*connectivity.borrow_and_update()));
    if let Some(update) = decode(&room, subscription.current()) {
        on_update(update);
    }

    loop {
        tokio::select! {
            next = subscription.changed() => match next {
                Some(value) => {
                    if let Some(update) = decode(&room, value) {
                        on_update(update);
                    }
                }
                None => break,
            },
            changed = connectivity.changed(), if connectivity_open => {
                if changed.is_err() {
                    connectivity_open = false;
                    on_update(ProjectionUpdate::Connectivity(false));
                } else {
                    let online = *connectivity.borrow_and_update();
                    debug!(%room, online, "connectivity changed");
                    on_update(ProjectionUpdate::Connectivity(online));
                }
            }
        }
    }
    debug!(%room, "room subscription closed");
}

fn decode(room: &str, value: Option<serde_json::Value>) -> Option<ProjectionUpdate> {
    match RoomSnapshot::from_value(room, value) {
        Ok(snapshot) => Some(ProjectionUpdate::Room(snapshot)),
        Err(err) => {
            warn!(%room, error = %err, "ignoring malformed room update");
            None
        }
    }
}

/// Read-only follower publishing [`RoomView`]s, used for projector screens and the
/// controller's own leaderboard.
pub struct RoomObserver {
    view: watch::Receiver<RoomView>,
    task: JoinHandle<()>,
}

impl RoomObserver {
    /// Start following `reader`'s room.
    pub fn spawn(reader: RoomReader) -> Self {
        let mut projection = RoomProjection::new(reader.code().to_string());
        let (sender, view) = watch::channel(projection.view());
        let task = tokio::spawn(follow(reader, move |update| {
            projection.apply(update);
            sender.send_replace(projection.view());
        }));
        Self { view, task }
    }

    /// Receiver of every projected view.
    pub fn view(&self) -> watch::Receiver<RoomView> {
        self.view.clone()
    }
}

impl Drop for RoomObserver {
    fn drop(&mut self) {
        self.task.abort();
    }
}

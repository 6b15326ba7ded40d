//! Player-side actor.
//!
//! A [`Participant`] follows its room, keeps the local `has_answered` flag and turns answers
//! into ledger transactions. It never writes `gameState`.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    error::ServiceError,
    services::{
        ledger::ScoreLedger,
        presence::{self, PlayerProfile},
        projection::{self, Observed, RoomProjection, RoomView},
        scoring,
    },
    session::{
        handle::{ParticipantHandle, RoomReader},
        model::SessionStatus,
    },
};

/// What a player's device renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    /// Shared room projection.
    #[serde(flatten)]
    pub room: RoomView,
    /// Whose view this is.
    pub player_id: String,
    /// Whether the open question has been answered from this device.
    pub has_answered: bool,
    /// This player's ledger total.
    pub score: u64,
}

/// Why an answer never reached the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// No session exists, or this device has not seen it yet.
    NoSession,
    /// No question is open.
    NotPlaying,
    /// This question was already answered.
    AlreadyAnswered,
    /// The local timer reached zero.
    TimeUp,
    /// The open question has no such choice.
    UnknownChoice,
}

/// Result of [`Participant::submit_answer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AnswerOutcome {
    /// Correct answer, added to the ledger.
    Scored {
        /// Points earned for this answer.
        points: u64,
    },
    /// Wrong choice; nothing was written.
    Incorrect,
    /// Local no-op.
    Ignored {
        /// Why the answer was dropped.
        reason: IgnoreReason,
    },
}

struct LocalState {
    projection: RoomProjection,
    has_answered: bool,
}

impl LocalState {
    /// Any new question index or status opens a fresh answer window.
    fn observe(&mut self, observed: Observed) {
        if observed.index_changed || observed.status_changed {
            self.has_answered = false;
        }
    }

    fn view(&self, player_id: &str) -> ParticipantView {
        ParticipantView {
            room: self.projection.view(),
            player_id: player_id.to_owned(),
            has_answered: self.has_answered,
            score: self
                .projection
                .snapshot()
                .map(|room| room.score_of(player_id))
                .unwrap_or_default(),
        }
    }

    /// Check an answer against the local projection, returning `(correct, timer, tpq)`.
    fn judge(&self, choice_id: &str) -> Result<(bool, u32, u32), IgnoreReason> {
        let room = self.projection.snapshot().ok_or(IgnoreReason::NoSession)?;
        let state = room.game_state.ok_or(IgnoreReason::NoSession)?;
        if state.status != SessionStatus::Playing {
            return Err(IgnoreReason::NotPlaying);
        }
        if self.has_answered {
            return Err(IgnoreReason::AlreadyAnswered);
        }
        if state.timer == 0 {
            return Err(IgnoreReason::TimeUp);
        }
        let question = room.current_question().ok_or(IgnoreReason::NotPlaying)?;
        if !question.has_choice(choice_id) {
            return Err(IgnoreReason::UnknownChoice);
        }
        Ok((question.is_correct(choice_id), state.timer, state.time_per_question))
    }
}

/// A joined player.
pub struct Participant {
    reader: RoomReader,
    player_id: String,
    ledger: ScoreLedger,
    state: Arc<Mutex<LocalState>>,
    view: Arc<watch::Sender<ParticipantView>>,
    task: JoinHandle<()>,
}

impl Participant {
    /// Register `profile` in the room and start following it.
    pub async fn join(handle: ParticipantHandle, profile: PlayerProfile) -> Result<Self, ServiceError> {
        if profile.id != handle.player_id() {
            return Err(ServiceError::InvalidInput(format!(
                "profile `{}` does not match handle `{}`",
                profile.id,
                handle.player_id()
            )));
        }

        let reader = handle.reader().clone();
        presence::join(&reader, &profile).await?;

        let player_id = handle.player_id().to_owned();
        let state = Arc::new(Mutex::new(LocalState {
            projection: RoomProjection::new(reader.code().to_string()),
            has_answered: false,
        }));
        let initial = lock(&state).view(&player_id);
        let view = Arc::new(watch::Sender::new(initial));

        let task = {
            let state = state.clone();
            let view = view.clone();
            let player_id = player_id.clone();
            tokio::spawn(projection::follow(reader.clone(), move |update| {
                let mut local = lock(&state);
                let observed = local.projection.apply(update);
                local.observe(observed);
                view.send_replace(local.view(&player_id));
            }))
        };

        Ok(Self {
            ledger: handle.ledger(),
            reader,
            player_id,
            state,
            view,
            task,
        })
    }

    /// Id of the playing device.
    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    /// Read access to the joined room.
    pub fn reader(&self) -> &RoomReader {
        &self.reader
    }

    /// Receiver of every projected view.
    pub fn subscribe(&self) -> watch::Receiver<ParticipantView> {
        self.view.subscribe()
    }

    /// Latest projected view.
    pub fn view(&self) -> ParticipantView {
        self.view.borrow().clone()
    }

    /// Answer the current question with `choice_id`.
    ///
    /// At most one answer per question is judged. A correct answer is scored from the timer
    /// this device last observed and written through a single ledger transaction.
    pub async fn submit_answer(&self, choice_id: &str) -> Result<AnswerOutcome, ServiceError> {
        let judged = {
            let mut local = lock(&self.state);
            let judged = local.judge(choice_id);
            if judged.is_ok() {
                local.has_answered = true;
                self.view.send_replace(local.view(&self.player_id));
            }
            judged
        };

        let (correct, timer, time_per_question) = match judged {
            Ok(judged) => judged,
            Err(reason) => {
                debug!(player = %self.player_id, ?reason, "answer ignored");
                return Ok(AnswerOutcome::Ignored { reason });
            }
        };

        if !correct {
            debug!(player = %self.player_id, choice = choice_id, "incorrect answer");
            return Ok(AnswerOutcome::Incorrect);
        }

        let points = scoring::points_for_correct(timer, time_per_question);
        let total = self.ledger.add_score(&self.player_id, points).await?;
        info!(
            room = %self.reader.code(),
            player = %self.player_id,
            points,
            total,
            "answer scored"
        );
        Ok(AnswerOutcome::Scored { points })
    }

    /// Mark the player offline and disarm the disconnect cleanup.
    pub async fn leave(self) -> Result<(), ServiceError> {
        presence::leave(&self.reader, &self.player_id).await
    }
}

impl Drop for Participant {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn lock(state: &Mutex<LocalState>) -> MutexGuard<'_, LocalState> {
    state.lock().unwrap_or_else(|poisoned| {
        warn!("participant state lock poisoned; recovering");
        poisoned.into_inner()
    })
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        session::{
            model::{Choice, GameState, Question},
            registry::RoomRegistry,
        },
        store::{Connection, MemoryStore},
    };

    fn questions() -> Vec<Question> {
        ["q1", "q2"]
            .into_iter()
            .map(|id| Question {
                id: id.into(),
                prompt: format!("{id}?"),
                image: None,
                choices: vec![
                    Choice { id: "a".into(), text: "A".into() },
                    Choice { id: "b".into(), text: "B".into() },
                ],
                correct_choice_id: "a".into(),
            })
            .collect()
    }

    fn profile(id: &str) -> PlayerProfile {
        PlayerProfile {
            id: id.into(),
            name: id.to_uppercase(),
            avatar: String::new(),
        }
    }

    async fn wait_for(participant: &Participant, check: impl FnMut(&ParticipantView) -> bool) {
        let mut views = participant.subscribe();
        tokio::time::timeout(Duration::from_secs(5), views.wait_for(check))
            .await
            .expect("view never matched")
            .unwrap();
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        registry: RoomRegistry,
        controller: crate::session::handle::ControllerHandle,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let registry = RoomRegistry::new();
        let connection = Arc::new(Connection::open(store.clone()));
        let controller = registry.create_room(connection, questions(), 20).await.unwrap();
        Fixture { store, registry, controller }
    }

    impl Fixture {
        async fn join(&self, id: &str) -> Participant {
            let connection = Arc::new(Connection::open(self.store.clone()));
            let handle = self
                .registry
                .join_room(connection, self.controller.code(), id)
                .await
                .unwrap();
            Participant::join(handle, profile(id)).await.unwrap()
        }

        async fn play(&self, index: usize, timer: u32) {
            self.controller
                .write_game_state(GameState {
                    status: SessionStatus::Playing,
                    current_question_index: index,
                    timer,
                    time_per_question: 20,
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn scores_a_correct_answer_once() {
        let fixture = fixture().await;
        let player = fixture.join("p1").await;
        fixture.play(0, 15).await;
        wait_for(&player, |view| view.room.timer == 15).await;

        assert_eq!(
            player.submit_answer("a").await.unwrap(),
            AnswerOutcome::Scored { points: 88 }
        );
        assert_eq!(
            player.submit_answer("a").await.unwrap(),
            AnswerOutcome::Ignored { reason: IgnoreReason::AlreadyAnswered }
        );
        wait_for(&player, |view| view.score == 88 && view.has_answered).await;
    }

    #[tokio::test]
    async fn incorrect_answer_never_touches_the_ledger() {
        let fixture = fixture().await;
        let player = fixture.join("p1").await;
        fixture.play(0, 10).await;
        wait_for(&player, |view| view.room.status == Some(SessionStatus::Playing)).await;

        assert_eq!(player.submit_answer("b").await.unwrap(), AnswerOutcome::Incorrect);
        let room = fixture.controller.reader().snapshot().await.unwrap();
        assert!(room.scores.is_empty());
    }

    #[tokio::test]
    async fn ignores_answers_outside_an_open_question() {
        let fixture = fixture().await;
        let player = fixture.join("p1").await;
        wait_for(&player, |view| view.room.status == Some(SessionStatus::Lobby)).await;
        assert_eq!(
            player.submit_answer("a").await.unwrap(),
            AnswerOutcome::Ignored { reason: IgnoreReason::NotPlaying }
        );

        fixture.play(0, 0).await;
        wait_for(&player, |view| view.room.status == Some(SessionStatus::Playing)).await;
        assert_eq!(
            player.submit_answer("a").await.unwrap(),
            AnswerOutcome::Ignored { reason: IgnoreReason::TimeUp }
        );

        fixture.play(0, 5).await;
        wait_for(&player, |view| view.room.timer == 5).await;
        assert_eq!(
            player.submit_answer("z").await.unwrap(),
            AnswerOutcome::Ignored { reason: IgnoreReason::UnknownChoice }
        );
        assert!(!player.view().has_answered);
    }

    #[tokio::test]
    async fn next_question_rearms_the_answer() {
        let fixture = fixture().await;
        let player = fixture.join("p1").await;
        fixture.play(0, 20).await;
        wait_for(&player, |view| view.room.status == Some(SessionStatus::Playing)).await;
        player.submit_answer("a").await.unwrap();

        fixture.play(1, 20).await;
        wait_for(&player, |view| view.room.question_index == 1 && !view.has_answered).await;
        assert_eq!(
            player.submit_answer("a").await.unwrap(),
            AnswerOutcome::Scored { points: 100 }
        );
    }

    #[tokio::test]
    async fn replaying_the_same_question_index_rearms_the_answer() {
        let fixture = fixture().await;
        let player = fixture.join("p1").await;
        fixture.play(0, 20).await;
        wait_for(&player, |view| view.room.status == Some(SessionStatus::Playing)).await;
        player.submit_answer("a").await.unwrap();

        fixture
            .controller
            .write_game_state(GameState {
                status: SessionStatus::Finished,
                current_question_index: 0,
                timer: 0,
                time_per_question: 20,
            })
            .await
            .unwrap();
        wait_for(&player, |view| view.room.status == Some(SessionStatus::Finished)).await;

        fixture.play(0, 20).await;
        wait_for(&player, |view| {
            view.room.status == Some(SessionStatus::Playing) && !view.has_answered
        })
        .await;
        assert_eq!(
            player.submit_answer("a").await.unwrap(),
            AnswerOutcome::Scored { points: 100 }
        );
    }

    #[tokio::test]
    async fn half_registered_player_does_not_freeze_the_room() {
        let fixture = fixture().await;
        let player = fixture.join("p1").await;

        // Cleanup armed, then the transport dies before the record is written.
        let ghost = Connection::open(fixture.store.clone());
        ghost
            .on_disconnect(&fixture.controller.code().player("ghost").child("online"), false)
            .await
            .unwrap();
        fixture.store.sever(ghost.id());

        fixture.play(0, 15).await;
        wait_for(&player, |view| {
            view.room.status == Some(SessionStatus::Playing) && view.room.timer == 15
        })
        .await;
        assert_eq!(
            player.submit_answer("a").await.unwrap(),
            AnswerOutcome::Scored { points: 88 }
        );

        let room = fixture.controller.reader().snapshot().await.unwrap();
        assert_eq!(room.score_of("p1"), 88);
        assert!(!room.players.contains_key("ghost"));
        let view = player.view();
        assert_eq!(view.room.leaderboard.len(), 1);
    }

    #[tokio::test]
    async fn leave_marks_the_player_offline() {
        let fixture = fixture().await;
        let player = fixture.join("p1").await;
        player.leave().await.unwrap();

        let room = fixture.controller.reader().snapshot().await.unwrap();
        assert!(!room.players["p1"].online);
    }

    #[tokio::test]
    async fn mismatched_profile_is_rejected() {
        let fixture = fixture().await;
        let connection = Arc::new(Connection::open(fixture.store.clone()));
        let handle = fixture
            .registry
            .join_room(connection, fixture.controller.code(), "p1")
            .await
            .unwrap();
        let err = Participant::join(handle, profile("p2")).await.err().unwrap();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }
}

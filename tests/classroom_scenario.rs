//! Whole classroom sessions played over one in-process store.

use std::sync::Arc;

use quizroom::{
    services::{
        controller::{Controller, ControllerSettings},
        export::TracingExporter,
        participant::{AnswerOutcome, Participant, ParticipantView},
        presence::PlayerProfile,
        projection::{RoomObserver, RoomView},
    },
    session::{
        model::{Choice, Question, SessionStatus},
        registry::RoomRegistry,
    },
    state::state_machine::GamePhase,
    store::{Connection, MemoryStore},
};

struct Classroom {
    store: Arc<MemoryStore>,
    registry: RoomRegistry,
    controller: Controller,
}

impl Classroom {
    async fn open(question_count: usize, time_per_question: u32) -> Self {
        let store = Arc::new(MemoryStore::new());
        let registry = RoomRegistry::new();
        let handle = registry
            .create_room(connect(&store), questions(question_count), time_per_question)
            .await
            .unwrap();
        let controller = Controller::spawn(
            handle,
            ControllerSettings::default(),
            Arc::new(TracingExporter),
        );
        Self {
            store,
            registry,
            controller,
        }
    }

    async fn join(&self, id: &str, name: &str) -> Participant {
        let handle = self
            .registry
            .join_room(connect(&self.store), self.controller.code(), id)
            .await
            .unwrap();
        Participant::join(
            handle,
            PlayerProfile {
                id: id.into(),
                name: name.into(),
                avatar: String::new(),
            },
        )
        .await
        .unwrap()
    }

    async fn observe(&self) -> RoomObserver {
        let reader = self
            .registry
            .observe_room(connect(&self.store), self.controller.code())
            .await
            .unwrap();
        RoomObserver::spawn(reader)
    }
}

fn connect(store: &Arc<MemoryStore>) -> Arc<Connection> {
    Arc::new(Connection::open(store.clone()))
}

fn questions(count: usize) -> Vec<Question> {
    (1..=count)
        .map(|n| Question {
            id: format!("q{n}"),
            prompt: format!("{n} + {n} = ?"),
            image: None,
            choices: vec![
                Choice { id: "a".into(), text: (2 * n).to_string() },
                Choice { id: "b".into(), text: (2 * n + 1).to_string() },
                Choice { id: "c".into(), text: (2 * n + 2).to_string() },
            ],
            correct_choice_id: "a".into(),
        })
        .collect()
}

async fn wait_player(participant: &Participant, check: impl FnMut(&ParticipantView) -> bool) -> ParticipantView {
    let mut views = participant.subscribe();
    let view = views.wait_for(check).await.unwrap().clone();
    view
}

async fn wait_room(observer: &RoomObserver, check: impl FnMut(&RoomView) -> bool) -> RoomView {
    let mut views = observer.view();
    let view = views.wait_for(check).await.unwrap().clone();
    view
}

#[tokio::test(start_paused = true)]
async fn fast_correct_answer_outranks_a_wrong_one() {
    let classroom = Classroom::open(3, 20).await;
    let ada = classroom.join("ada", "Ada").await;
    let ben = classroom.join("ben", "Ben").await;
    let projector = classroom.observe().await;

    let mut phases = classroom.controller.phases();
    classroom.controller.start_game().await.unwrap();

    let seen = wait_player(&ada, |view| {
        view.room.status == Some(SessionStatus::Playing)
            && view.room.question_index == 0
            && view.room.timer == 15
    })
    .await;
    assert_eq!(seen.room.question.as_ref().unwrap().id, "q1");
    assert_eq!(
        ada.submit_answer("a").await.unwrap(),
        AnswerOutcome::Scored { points: 88 }
    );
    assert_eq!(ben.submit_answer("b").await.unwrap(), AnswerOutcome::Incorrect);

    phases
        .wait_for(|phase| *phase == GamePhase::Finished)
        .await
        .unwrap();

    let room = classroom.controller.reader().snapshot().await.unwrap();
    let state = room.game_state.unwrap();
    assert_eq!(state.status, SessionStatus::Finished);
    assert_eq!(state.current_question_index, 2);
    assert_eq!(room.score_of("ada"), 88);
    assert_eq!(room.score_of("ben"), 0);

    let final_view = wait_room(&projector, |view| view.status == Some(SessionStatus::Finished)).await;
    let order = final_view
        .leaderboard
        .iter()
        .map(|row| (row.rank, row.player_id.as_str(), row.score))
        .collect::<Vec<_>>();
    assert_eq!(order, vec![(1, "ada", 88), (2, "ben", 0)]);

    // Every client derives the same board from the same snapshot.
    let ada_view = wait_player(&ada, |view| view.room.status == Some(SessionStatus::Finished)).await;
    let ben_view = wait_player(&ben, |view| view.room.status == Some(SessionStatus::Finished)).await;
    assert_eq!(ada_view.room.leaderboard, final_view.leaderboard);
    assert_eq!(ben_view.room.leaderboard, final_view.leaderboard);
    assert_eq!(ada_view.score, 88);
}

#[tokio::test(start_paused = true)]
async fn question_index_only_moves_forward() {
    let classroom = Classroom::open(3, 2).await;
    let projector = classroom.observe().await;
    let mut views = projector.view();
    classroom.controller.start_game().await.unwrap();

    let mut last_index = 0;
    let mut statuses = Vec::new();
    loop {
        views.changed().await.unwrap();
        let view = views.borrow_and_update().clone();
        assert!(view.question_index >= last_index, "index went backwards");
        last_index = view.question_index;
        if let Some(status) = view.status.filter(|status| *status != SessionStatus::Lobby) {
            if statuses.last() != Some(&status) {
                statuses.push(status);
            }
        }
        if view.status == Some(SessionStatus::Finished) {
            break;
        }
    }

    assert_eq!(last_index, 2);
    assert_eq!(
        statuses,
        vec![SessionStatus::Countdown, SessionStatus::Playing, SessionStatus::Finished]
    );
}

#[tokio::test(start_paused = true)]
async fn dropped_player_goes_offline_but_keeps_its_score() {
    let classroom = Classroom::open(3, 20).await;
    let ada = classroom.join("ada", "Ada").await;
    let cy = classroom.join("cy", "Cy").await;
    let projector = classroom.observe().await;

    classroom.controller.start_game().await.unwrap();
    wait_player(&cy, |view| {
        view.room.status == Some(SessionStatus::Playing) && view.room.timer == 20
    })
    .await;
    assert_eq!(
        cy.submit_answer("a").await.unwrap(),
        AnswerOutcome::Scored { points: 100 }
    );
    wait_room(&projector, |view| {
        view.leaderboard.first().is_some_and(|row| row.player_id == "cy")
    })
    .await;

    // No explicit leave: the device just vanishes mid-question.
    drop(cy);

    let view = wait_room(&projector, |view| {
        view.leaderboard.iter().all(|row| row.player_id != "cy")
    })
    .await;
    assert_eq!(view.status, Some(SessionStatus::Playing));
    assert_eq!(view.leaderboard.len(), 1);
    assert_eq!(view.leaderboard[0].player_id, "ada");

    let room = classroom.controller.reader().snapshot().await.unwrap();
    assert!(!room.players["cy"].online);
    assert_eq!(room.score_of("cy"), 100);
    assert!(room.players["ada"].online);
    drop(ada);
}

#[tokio::test(start_paused = true)]
async fn reset_returns_to_lobby_with_an_empty_ledger() {
    let classroom = Classroom::open(1, 1).await;
    let ada = classroom.join("ada", "Ada").await;
    let mut phases = classroom.controller.phases();

    classroom.controller.start_game().await.unwrap();
    wait_player(&ada, |view| view.room.status == Some(SessionStatus::Playing)).await;
    ada.submit_answer("a").await.unwrap();
    phases
        .wait_for(|phase| *phase == GamePhase::Finished)
        .await
        .unwrap();

    classroom.controller.reset().await.unwrap();
    let view = wait_player(&ada, |view| view.room.status == Some(SessionStatus::Lobby)).await;
    assert_eq!(view.score, 0);
    assert!(!view.has_answered);
    assert_eq!(view.room.question_index, 0);

    // A second game can be played and scored again.
    classroom.controller.start_game().await.unwrap();
    wait_player(&ada, |view| view.room.status == Some(SessionStatus::Playing)).await;
    assert!(matches!(
        ada.submit_answer("a").await.unwrap(),
        AnswerOutcome::Scored { .. }
    ));
}

//! End-to-end smoke run: one controller and a handful of scripted players sharing an
//! in-process store.
//!
//! Tunables come from the environment: `SIM_PLAYERS`, `SIM_QUESTIONS`, `SIM_TICK_MS`, plus the
//! regular config file for everything else.

use std::{collections::HashMap, env, str::FromStr, sync::Arc, time::Duration};

use anyhow::{Context, bail};
use rand::Rng;
use tokio::time::sleep;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quizroom::{
    config::AppConfig,
    services::{
        controller::Controller,
        leaderboard,
        participant::{AnswerOutcome, Participant},
        presence::PlayerProfile,
    },
    session::{
        model::SessionStatus,
        registry::RoomRegistry,
        setup::{ChoiceInput, QuestionInput, prepare_questions},
    },
    state::state_machine::GamePhase,
    store::{Connection, MemoryStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let player_count: usize = env_or("SIM_PLAYERS", 4);
    let question_count: usize = env_or("SIM_QUESTIONS", 3);
    let tick = Duration::from_millis(env_or("SIM_TICK_MS", 100));
    if player_count == 0 || question_count == 0 {
        bail!("SIM_PLAYERS and SIM_QUESTIONS must be positive");
    }

    let questions = prepare_questions(
        question_bank(question_count),
        &config.question_options(None, Some(question_count)),
    );
    let answer_key: Arc<HashMap<String, String>> = Arc::new(
        questions
            .iter()
            .map(|question| (question.id.clone(), question.correct_choice_id.clone()))
            .collect(),
    );

    let store = Arc::new(MemoryStore::new());
    let registry = RoomRegistry::new();
    let connect = || Arc::new(Connection::open(store.clone()));

    let handle = registry
        .create_room(connect(), questions, config.time_per_question)
        .await
        .context("creating room")?;
    let code = handle.code().clone();
    let mut settings = config.controller_settings();
    settings.tick = tick;
    let controller = Controller::spawn(handle, settings, config.exporter());
    controller.announce("Teacher").await?;

    let mut bots = Vec::with_capacity(player_count);
    for index in 0..player_count {
        let id = format!("bot-{}", index + 1);
        let handle = registry.join_room(connect(), &code, &id).await?;
        let participant = Participant::join(
            handle,
            PlayerProfile {
                id: id.clone(),
                name: format!("Bot {}", index + 1),
                avatar: String::new(),
            },
        )
        .await?;
        // Later bots are sharper.
        let accuracy = (index + 1) as f64 / (player_count + 1) as f64;
        bots.push(tokio::spawn(play(participant, answer_key.clone(), accuracy, tick)));
    }

    info!(room = %code, players = player_count, questions = question_count, "starting simulated game");
    let mut phases = controller.phases();
    controller.start_game().await?;
    phases
        .wait_for(|phase| *phase == GamePhase::Finished)
        .await
        .context("controller stopped before finishing")?;

    let mut participants = Vec::with_capacity(bots.len());
    for bot in bots {
        participants.push(bot.await.context("bot task panicked")?);
    }
    // Let the fire-and-forget export land before the process exits.
    sleep(tick).await;

    let room = controller.reader().snapshot().await?;
    for row in leaderboard::compute(&room.players, &room.scores) {
        info!(rank = row.rank, player = %row.player_id, name = %row.name, score = row.score, "final standing");
    }

    drop(participants);
    controller.shutdown().await;
    Ok(())
}

/// Answer every question once, after a random delay, correctly with probability `accuracy`.
async fn play(
    participant: Participant,
    answer_key: Arc<HashMap<String, String>>,
    accuracy: f64,
    tick: Duration,
) -> Participant {
    let mut views = participant.subscribe();
    loop {
        let view = views.borrow_and_update().clone();
        match view.room.status {
            Some(SessionStatus::Finished) => break,
            Some(SessionStatus::Playing) if !view.has_answered => {
                if let Some(question) = view.room.question {
                    let (delay, correct) = {
                        let mut rng = rand::rng();
                        (rng.random_range(0..4u32), rng.random_bool(accuracy))
                    };
                    sleep(tick * delay).await;

                    let key = answer_key.get(&question.id);
                    let choice = question
                        .choices
                        .iter()
                        .find(|choice| (Some(&choice.id) == key) == correct)
                        .or_else(|| question.choices.first())
                        .map(|choice| choice.id.clone());

                    if let Some(choice) = choice {
                        match participant.submit_answer(&choice).await {
                            Ok(AnswerOutcome::Scored { points }) => {
                                info!(player = participant.player_id(), question = %question.id, points, "scored")
                            }
                            Ok(outcome) => {
                                info!(player = participant.player_id(), question = %question.id, ?outcome, "no points")
                            }
                            Err(err) => warn!(player = participant.player_id(), error = %err, "answer failed"),
                        }
                    }
                }
            }
            _ => {}
        }

        if views.changed().await.is_err() {
            break;
        }
    }
    participant
}

/// Simple arithmetic questions whose right answer is always choice `a`.
fn question_bank(count: usize) -> Vec<QuestionInput> {
    (1..=count)
        .map(|n| {
            let answer = n * 2;
            QuestionInput {
                id: None,
                prompt: format!("{n} + {n} = ?"),
                image: None,
                category: Some("arithmetic".into()),
                choices: [("a", answer), ("b", answer + 1), ("c", answer + 2), ("d", answer - 1)]
                    .into_iter()
                    .map(|(id, value)| ChoiceInput {
                        id: Some(id.into()),
                        text: value.to_string(),
                    })
                    .collect(),
                correct_choice_id: Some("a".into()),
            }
        })
        .collect()
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

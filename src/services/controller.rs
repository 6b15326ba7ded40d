//! Teacher-side actor owning the session clock.
//!
//! The [`Controller`] is the only writer of `gameState`. Every phase change runs through the
//! state machine's plan/apply/abort protocol: the store write happens between plan and apply,
//! and the phase is only published once the write landed. A single driver task owns the
//! one-second clock and restarts it whenever the phase changes.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::{
    sync::{Mutex, RwLock, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at, timeout},
};
use tracing::{debug, info, warn};

use crate::{
    error::ServiceError,
    services::{
        export::{self, ScoreExporter},
        presence::{self, PlayerProfile},
    },
    session::{
        handle::{ControllerHandle, RoomReader},
        model::{GameState, SessionStatus},
        room::RoomCode,
    },
    state::{
        DEFAULT_TRANSITION_TIMEOUT, Plan, Snapshot,
        state_machine::{GameEvent, GamePhase, GameStateMachine},
    },
    store::StoreError,
};

/// Default number of pre-game countdown steps.
pub const DEFAULT_COUNTDOWN_STEPS: u32 = 5;
/// Default clock period.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Tunables of the controller clock.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Steps of the local countdown before the first question.
    pub countdown_steps: u32,
    /// Period of both the countdown and the question timer.
    pub tick: Duration,
    /// Upper bound on a single transition's store write; `None` waits forever.
    pub transition_timeout: Option<Duration>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            countdown_steps: DEFAULT_COUNTDOWN_STEPS,
            tick: DEFAULT_TICK,
            transition_timeout: Some(DEFAULT_TRANSITION_TIMEOUT),
        }
    }
}

struct ControllerInner {
    handle: ControllerHandle,
    settings: ControllerSettings,
    machine: RwLock<GameStateMachine>,
    transition_gate: Mutex<()>,
    phase: watch::Sender<GamePhase>,
    countdown: watch::Sender<u32>,
    exporter: Arc<dyn ScoreExporter>,
}

/// Running controller of one room. Dropping it stops the clock.
pub struct Controller {
    inner: Arc<ControllerInner>,
    driver: JoinHandle<()>,
}

impl Controller {
    /// Take ownership of `handle` and start the driver task. The session is in LOBBY.
    pub fn spawn(
        handle: ControllerHandle,
        settings: ControllerSettings,
        exporter: Arc<dyn ScoreExporter>,
    ) -> Self {
        let machine = GameStateMachine::new(handle.question_count());
        let inner = Arc::new(ControllerInner {
            machine: RwLock::new(machine),
            transition_gate: Mutex::new(()),
            phase: watch::Sender::new(GamePhase::Lobby),
            countdown: watch::Sender::new(settings.countdown_steps),
            handle,
            settings,
            exporter,
        });
        let driver = tokio::spawn(drive(inner.clone()));
        info!(room = %inner.handle.code(), "controller started");
        Self { inner, driver }
    }

    /// Code of the driven room.
    pub fn code(&self) -> &RoomCode {
        self.inner.handle.code()
    }

    /// Read access to the driven room.
    pub fn reader(&self) -> &RoomReader {
        self.inner.handle.reader()
    }

    /// Questions in this session.
    pub fn question_count(&self) -> usize {
        self.inner.handle.question_count()
    }

    /// Last applied phase.
    pub fn phase(&self) -> GamePhase {
        *self.inner.phase.borrow()
    }

    /// Receiver of every applied phase.
    pub fn phases(&self) -> watch::Receiver<GamePhase> {
        self.inner.phase.subscribe()
    }

    /// Steps left on the pre-game countdown.
    pub fn countdown(&self) -> watch::Receiver<u32> {
        self.inner.countdown.subscribe()
    }

    /// State machine snapshot, including any pending transition.
    pub async fn snapshot(&self) -> Snapshot {
        self.inner.machine.read().await.snapshot()
    }

    /// Write the controller's own presence record under its synthetic id.
    pub async fn announce(&self, name: &str) -> Result<(), ServiceError> {
        let profile = PlayerProfile {
            id: self.inner.handle.presence_id().to_owned(),
            name: name.to_owned(),
            avatar: String::new(),
        };
        presence::join(self.reader(), &profile).await
    }

    /// Clear the ledger and enter COUNTDOWN.
    pub async fn start_game(&self) -> Result<(), ServiceError> {
        let handle = &self.inner.handle;
        if handle.question_count() == 0 {
            return Err(ServiceError::EmptyQuestionSet);
        }

        let tpq = handle.time_per_question();
        self.inner
            .run_transition(GameEvent::StartGame, || async {
                handle.clear_scores().await?;
                handle
                    .write_game_state(GameState {
                        status: SessionStatus::Countdown,
                        current_question_index: 0,
                        timer: tpq,
                        time_per_question: tpq,
                    })
                    .await
            })
            .await?;
        Ok(())
    }

    /// Return a finished session to LOBBY with an empty ledger.
    pub async fn reset(&self) -> Result<(), ServiceError> {
        let handle = &self.inner.handle;
        self.inner
            .run_transition(GameEvent::Reset, || async {
                handle.clear_scores().await?;
                handle
                    .write_game_state(GameState::lobby(handle.time_per_question()))
                    .await
            })
            .await?;
        Ok(())
    }

    /// Stop the clock and wait for the driver to wind down.
    pub async fn shutdown(mut self) {
        self.driver.abort();
        // The join error is the cancellation we just requested.
        let _ = (&mut self.driver).await;
        info!(room = %self.code(), "controller stopped");
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

impl ControllerInner {
    /// Plan `event`, run `work`, then apply on success or abort on failure and timeout.
    async fn run_transition<F, Fut>(&self, event: GameEvent, work: F) -> Result<GamePhase, ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), ServiceError>>,
    {
        let gate = self.transition_gate.lock().await;
        let Plan { id: plan_id, .. } = self.machine.write().await.plan(event)?;

        let work_future = work();
        let outcome = match self.settings.transition_timeout {
            Some(limit) => match timeout(limit, work_future).await {
                Ok(result) => result,
                Err(_) => Err(ServiceError::Timeout),
            },
            None => work_future.await,
        };

        let mut machine = self.machine.write().await;
        match outcome {
            Ok(()) => {
                let next = machine.apply(plan_id)?;
                drop(machine);
                self.phase.send_replace(next);
                drop(gate);
                info!(room = %self.handle.code(), ?event, phase = ?next, "transition applied");
                Ok(next)
            }
            Err(err) => {
                if let Err(abort_err) = machine.abort(plan_id) {
                    warn!(
                        event = ?event,
                        plan_id = %plan_id,
                        error = ?abort_err,
                        "failed to abort transition"
                    );
                }
                drop(machine);
                drop(gate);
                warn!(room = %self.handle.code(), ?event, error = %err, "transition aborted");
                Err(err)
            }
        }
    }

    fn playing(&self, question_index: usize) -> GameState {
        let tpq = self.handle.time_per_question();
        GameState {
            status: SessionStatus::Playing,
            current_question_index: question_index,
            timer: tpq,
            time_per_question: tpq,
        }
    }

    /// One clock period elapsed in `clock`.
    async fn tick(&self, clock: &mut PhaseClock) -> Result<(), ServiceError> {
        match clock {
            PhaseClock::Countdown { steps_left } => {
                *steps_left = steps_left.saturating_sub(1);
                self.countdown.send_replace(*steps_left);
                debug!(room = %self.handle.code(), steps_left = *steps_left, "countdown");
                if *steps_left == 0 {
                    self.run_transition(GameEvent::CountdownElapsed, || {
                        self.handle.write_game_state(self.playing(0))
                    })
                    .await?;
                }
                Ok(())
            }
            PhaseClock::Question {
                question_index,
                remaining,
            } => match remaining.checked_sub(1) {
                Some(timer) => {
                    *remaining = timer;
                    self.handle.write_timer(timer).await
                }
                None => {
                    let index = *question_index;
                    if index + 1 < self.handle.question_count() {
                        self.run_transition(GameEvent::AdvanceQuestion, || {
                            self.handle.write_game_state(self.playing(index + 1))
                        })
                        .await?;
                    } else {
                        let tpq = self.handle.time_per_question();
                        self.run_transition(GameEvent::Finish, || {
                            self.handle.write_game_state(GameState {
                                status: SessionStatus::Finished,
                                current_question_index: index,
                                timer: 0,
                                time_per_question: tpq,
                            })
                        })
                        .await?;
                        self.spawn_export();
                    }
                    Ok(())
                }
            },
        }
    }

    /// Report final scores without holding up the clock.
    fn spawn_export(&self) {
        let reader = self.handle.reader().clone();
        let exporter = self.exporter.clone();
        tokio::spawn(async move {
            let room = match reader.snapshot().await {
                Ok(room) => room,
                Err(err) => {
                    warn!(room = %reader.code(), error = %err, "cannot read final scores");
                    return;
                }
            };
            let reports = export::build_reports(&room);
            if let Err(err) = exporter.export(reader.code(), reports).await {
                warn!(room = %reader.code(), error = %err, "score export failed");
            }
        });
    }
}

/// Local clock state of the running phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PhaseClock {
    Countdown { steps_left: u32 },
    Question { question_index: usize, remaining: u32 },
}

impl PhaseClock {
    fn start(phase: GamePhase, settings: &ControllerSettings, time_per_question: u32) -> Option<Self> {
        match phase {
            GamePhase::Countdown => Some(Self::Countdown {
                steps_left: settings.countdown_steps,
            }),
            GamePhase::Playing { question_index } => Some(Self::Question {
                question_index,
                remaining: time_per_question,
            }),
            GamePhase::Lobby | GamePhase::Finished => None,
        }
    }
}

/// Driver loop: one clock per phase, replaced whenever a new phase is published.
async fn drive(inner: Arc<ControllerInner>) {
    let room = inner.handle.code().clone();
    let mut phases = inner.phase.subscribe();
    let mut connectivity = inner.handle.reader().connectivity();

    'phases: loop {
        let phase = *phases.borrow_and_update();
        let clock = PhaseClock::start(phase, &inner.settings, inner.handle.time_per_question());
        if let Some(PhaseClock::Countdown { steps_left }) = clock {
            inner.countdown.send_replace(steps_left);
        }
        debug!(%room, ?phase, clocked = clock.is_some(), "phase clock restarted");

        let Some(mut clock) = clock else {
            tokio::select! {
                changed = phases.changed() => if changed.is_err() {
                    break 'phases;
                },
                _ = disconnected(&mut connectivity) => break 'phases,
            }
            continue 'phases;
        };

        let tick = inner.settings.tick;
        let mut interval = interval_at(Instant::now() + tick, tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                changed = phases.changed() => {
                    if changed.is_err() {
                        break 'phases;
                    }
                    continue 'phases;
                }
                _ = disconnected(&mut connectivity) => break 'phases,
                _ = interval.tick() => {}
            }

            match inner.tick(&mut clock).await {
                Ok(()) => {}
                Err(ServiceError::Store(StoreError::Disconnected)) => break 'phases,
                Err(err) => warn!(%room, ?phase, error = %err, "clock step failed"),
            }
        }
    }

    warn!(%room, "controller clock stopped; the session no longer advances");
}

/// Resolves once the store connection is gone.
async fn disconnected(connectivity: &mut watch::Receiver<bool>) {
    // A closed channel means the connection itself was dropped.
    let _ = connectivity.wait_for(|online| !*online).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        services::export::{ExportError, ScoreReport},
        session::{
            model::{Choice, Question},
            registry::RoomRegistry,
        },
        store::{Connection, MemoryStore},
    };
    use futures::future::{BoxFuture, FutureExt};

    #[derive(Default)]
    struct Recorder {
        exports: std::sync::Mutex<Vec<Vec<ScoreReport>>>,
    }

    impl ScoreExporter for Recorder {
        fn export(
            &self,
            _room: &RoomCode,
            reports: Vec<ScoreReport>,
        ) -> BoxFuture<'static, Result<(), ExportError>> {
            self.exports.lock().unwrap().push(reports);
            futures::future::ready(Ok(())).boxed()
        }
    }

    fn questions(count: usize) -> Vec<Question> {
        (0..count)
            .map(|i| Question {
                id: format!("q{}", i + 1),
                prompt: format!("question {i}"),
                image: None,
                choices: vec![
                    Choice { id: "a".into(), text: "A".into() },
                    Choice { id: "b".into(), text: "B".into() },
                ],
                correct_choice_id: "a".into(),
            })
            .collect()
    }

    async fn controller(count: usize, tpq: u32) -> (Arc<MemoryStore>, Controller, Arc<Recorder>) {
        let store = Arc::new(MemoryStore::new());
        let registry = RoomRegistry::new();
        let connection = Arc::new(Connection::open(store.clone()));
        let handle = registry
            .create_room(connection, questions(count), tpq)
            .await
            .unwrap();
        let recorder = Arc::new(Recorder::default());
        let controller = Controller::spawn(handle, ControllerSettings::default(), recorder.clone());
        (store, controller, recorder)
    }

    async fn state(controller: &Controller) -> GameState {
        controller.reader().snapshot().await.unwrap().game_state.unwrap()
    }

    async fn wait_phase(controller: &Controller, phase: GamePhase) {
        let mut phases = controller.phases();
        phases.wait_for(|current| *current == phase).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn empty_question_set_never_leaves_the_lobby() {
        let (_store, controller, _) = controller(0, 20).await;
        let err = controller.start_game().await.unwrap_err();

        assert!(matches!(err, ServiceError::EmptyQuestionSet));
        assert_eq!(controller.phase(), GamePhase::Lobby);
        assert_eq!(state(&controller).await.status, SessionStatus::Lobby);
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_hands_over_to_the_first_question() {
        let (_store, controller, _) = controller(2, 20).await;
        controller.start_game().await.unwrap();

        let started = state(&controller).await;
        assert_eq!(started.status, SessionStatus::Countdown);
        assert_eq!(started.timer, 20);
        assert_eq!(*controller.countdown().borrow(), DEFAULT_COUNTDOWN_STEPS);

        wait_phase(&controller, GamePhase::Playing { question_index: 0 }).await;
        let playing = state(&controller).await;
        assert_eq!(playing.status, SessionStatus::Playing);
        assert_eq!(playing.current_question_index, 0);
        assert_eq!(playing.timer, 20);
        assert_eq!(*controller.countdown().borrow(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_counts_down_once_per_tick() {
        let (_store, controller, _) = controller(2, 20).await;
        controller.start_game().await.unwrap();
        wait_phase(&controller, GamePhase::Playing { question_index: 0 }).await;

        let mut room = controller.reader().subscribe();
        let mut seen = Vec::new();
        while seen.len() < 3 {
            let value = room.changed().await.unwrap();
            let timer = value
                .and_then(|room| room["gameState"]["timer"].as_u64())
                .unwrap();
            if seen.last() != Some(&timer) {
                seen.push(timer);
            }
        }
        assert_eq!(seen, vec![19, 18, 17]);
    }

    #[tokio::test(start_paused = true)]
    async fn runs_every_question_then_finishes_and_exports() {
        let (_store, controller, recorder) = controller(3, 2).await;
        controller.start_game().await.unwrap();

        let mut phases = controller.phases();
        let mut visited = vec![*phases.borrow_and_update()];
        while *visited.last().unwrap() != GamePhase::Finished {
            phases.changed().await.unwrap();
            visited.push(*phases.borrow_and_update());
        }
        assert_eq!(
            visited,
            vec![
                GamePhase::Countdown,
                GamePhase::Playing { question_index: 0 },
                GamePhase::Playing { question_index: 1 },
                GamePhase::Playing { question_index: 2 },
                GamePhase::Finished,
            ]
        );

        let finished = state(&controller).await;
        assert_eq!(finished.status, SessionStatus::Finished);
        assert_eq!(finished.timer, 0);
        assert_eq!(controller.snapshot().await.version, 5);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(recorder.exports.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_only_from_finished_and_clears_scores() {
        let (_store, controller, _) = controller(1, 1).await;
        assert!(matches!(
            controller.reset().await,
            Err(ServiceError::InvalidState(_))
        ));

        controller.start_game().await.unwrap();
        wait_phase(&controller, GamePhase::Finished).await;

        let scores = controller.code().score("p1");
        controller.reader().connection().set(&scores, 70).await.unwrap();

        controller.reset().await.unwrap();
        let room = controller.reader().snapshot().await.unwrap();
        assert_eq!(room.game_state.unwrap(), GameState::lobby(1));
        assert!(room.scores.is_empty());
        assert_eq!(controller.phase(), GamePhase::Lobby);
    }

    #[tokio::test(start_paused = true)]
    async fn severed_connection_stops_the_clock() {
        let (store, controller, _) = controller(2, 20).await;
        controller.start_game().await.unwrap();
        wait_phase(&controller, GamePhase::Playing { question_index: 0 }).await;

        store.sever(controller.reader().connection().id());
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(controller.phase(), GamePhase::Playing { question_index: 0 });
    }
}

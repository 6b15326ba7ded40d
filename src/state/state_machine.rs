use std::time::Instant;

use thiserror::Error;
use uuid::Uuid;

use crate::session::model::SessionStatus;

/// Phases of a session as seen by its controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GamePhase {
    /// Waiting for the teacher to start; players can join.
    Lobby,
    /// Local pre-game countdown running on the controller.
    Countdown,
    /// The question at `question_index` is active.
    Playing {
        /// Zero-based index into the session's question list.
        question_index: usize,
    },
    /// Every question has been played.
    Finished,
}

impl GamePhase {
    /// Status string replicated under `gameState/status`.
    pub fn status(&self) -> SessionStatus {
        match self {
            GamePhase::Lobby => SessionStatus::Lobby,
            GamePhase::Countdown => SessionStatus::Countdown,
            GamePhase::Playing { .. } => SessionStatus::Playing,
            GamePhase::Finished => SessionStatus::Finished,
        }
    }

    /// Question index replicated under `gameState/currentQuestionIndex`.
    pub fn question_index(&self) -> usize {
        match self {
            GamePhase::Playing { question_index } => *question_index,
            _ => 0,
        }
    }
}

/// Events that can be applied to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameEvent {
    /// Teacher starts the game from the lobby.
    StartGame,
    /// The local countdown reached zero.
    CountdownElapsed,
    /// The timer of the active question ran out and another question remains.
    AdvanceQuestion,
    /// The timer of the last question ran out.
    Finish,
    /// Teacher returns a finished session to the lobby.
    Reset,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the state machine was in when the invalid event was received.
    pub from: GamePhase,
    /// The event that cannot be applied from this phase.
    pub event: GameEvent,
}

/// Errors that can occur when planning a state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// A transition is already pending and must be applied or aborted.
    AlreadyPending,
    /// The session has no questions, so it cannot leave the lobby.
    NoQuestions,
    /// The requested transition is not valid from the current phase.
    InvalidTransition(InvalidTransition),
}

/// Errors that can occur when applying a planned state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
    /// State machine phase changed since the plan was created.
    PhaseMismatch {
        /// Phase when plan was created.
        expected: GamePhase,
        /// Current phase.
        actual: GamePhase,
    },
    /// State machine version changed since the plan was created.
    VersionMismatch {
        /// Version when plan was created.
        expected: usize,
        /// Current version.
        actual: usize,
    },
}

/// Errors that can occur when aborting a planned state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
}

/// Unique identifier for a planned state transition.
pub type PlanId = Uuid;

/// A planned state machine transition that has been validated but not yet applied.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Unique identifier for this plan.
    pub id: PlanId,
    /// Phase the state machine is currently in.
    pub from: GamePhase,
    /// Phase the state machine will transition to.
    pub to: GamePhase,
    /// Event that triggered this transition.
    pub event: GameEvent,
    /// Version number after applying this transition.
    pub version_next: usize,
    /// Timestamp when this plan was created.
    pub pending_since: Instant,
}

/// Snapshot of the current state machine state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Current phase of the state machine.
    pub phase: GamePhase,
    /// Version number of the state machine (increments on each transition).
    pub version: usize,
    /// Pending transition phase, if a transition is planned but not yet applied.
    pub pending: Option<GamePhase>,
}

/// Linear session flow: lobby, countdown, one playing phase per question, finished, and the
/// reset edge back to the lobby.
#[derive(Debug, Clone)]
pub struct GameStateMachine {
    phase: GamePhase,
    version: usize,
    question_count: usize,
    pending: Option<Plan>,
}

impl GameStateMachine {
    /// Create a state machine in the lobby for a session with `question_count` questions.
    pub fn new(question_count: usize) -> Self {
        Self {
            phase: GamePhase::Lobby,
            version: 0,
            question_count,
            pending: None,
        }
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    /// Create a snapshot of the current state machine state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            phase: self.phase,
            version: self.version,
            pending: self.pending.as_ref().map(|plan| plan.to),
        }
    }

    /// Plan a transition by validating that the event can be applied from the current phase.
    /// Returns a Plan that can later be applied or aborted.
    pub fn plan(&mut self, event: GameEvent) -> Result<Plan, PlanError> {
        if self.pending.is_some() {
            return Err(PlanError::AlreadyPending);
        }

        let next = self.compute_transition(event)?;

        let plan = Plan {
            id: Uuid::new_v4(),
            from: self.phase,
            to: next,
            event,
            version_next: self.version + 1,
            pending_since: Instant::now(),
        };

        self.pending = Some(plan.clone());

        Ok(plan)
    }

    /// Apply a planned transition, moving the state machine to the next phase.
    /// Returns the new phase after the transition.
    pub fn apply(&mut self, plan_id: PlanId) -> Result<GamePhase, ApplyError> {
        let plan = self.pending.take().ok_or(ApplyError::NoPending)?;

        if plan.id != plan_id {
            let expected_plan_id = plan.id;
            self.pending = Some(plan);
            return Err(ApplyError::IdMismatch {
                expected: expected_plan_id,
                got: plan_id,
            });
        }

        if self.phase != plan.from {
            return Err(ApplyError::PhaseMismatch {
                expected: plan.from,
                actual: self.phase,
            });
        }

        if self.version + 1 != plan.version_next {
            return Err(ApplyError::VersionMismatch {
                expected: plan.version_next,
                actual: self.version + 1,
            });
        }

        self.phase = plan.to;
        self.version = plan.version_next;

        Ok(self.phase)
    }

    /// Abort a planned transition without applying it, returning the state machine to its previous state.
    pub fn abort(&mut self, plan_id: PlanId) -> Result<(), AbortError> {
        let plan = self.pending.as_ref().ok_or(AbortError::NoPending)?;

        if plan.id != plan_id {
            return Err(AbortError::IdMismatch {
                expected: plan.id,
                got: plan_id,
            });
        }

        self.pending = None;
        Ok(())
    }

    fn compute_transition(&self, event: GameEvent) -> Result<GamePhase, PlanError> {
        let invalid = || {
            PlanError::InvalidTransition(InvalidTransition {
                from: self.phase,
                event,
            })
        };

        let next = match (self.phase, event) {
            (GamePhase::Lobby, GameEvent::StartGame) => {
                if self.question_count == 0 {
                    return Err(PlanError::NoQuestions);
                }
                GamePhase::Countdown
            }
            (GamePhase::Countdown, GameEvent::CountdownElapsed) => {
                GamePhase::Playing { question_index: 0 }
            }
            (GamePhase::Playing { question_index }, GameEvent::AdvanceQuestion)
                if question_index + 1 < self.question_count =>
            {
                GamePhase::Playing {
                    question_index: question_index + 1,
                }
            }
            (GamePhase::Playing { question_index }, GameEvent::Finish)
                if question_index + 1 >= self.question_count =>
            {
                GamePhase::Finished
            }
            (GamePhase::Finished, GameEvent::Reset) => GamePhase::Lobby,
            _ => return Err(invalid()),
        };

        Ok(next)
    }
}

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt, stream::SplitStream};
use thiserror::Error;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{info, warn};

use crate::{
    dto::ws::{HostRequest, HostView, InboundMessage, JoinRequest, OutboundMessage},
    error::ServiceError,
    services::{
        controller::Controller,
        participant::Participant,
        presence::PlayerProfile,
        projection::{RoomObserver, RoomView},
    },
    session::{room::RoomCode, setup::prepare_questions},
    state::SharedState,
};

/// Internal error type for socket handling.
#[derive(Debug, Error)]
enum RelayError {
    /// Writer channel closed - connection should be terminated immediately.
    #[error("connection closed")]
    ConnectionClosed,
    /// Error from the session layer.
    #[error("service error: {0}")]
    Service(#[from] ServiceError),
}

type Outbound = mpsc::UnboundedSender<Message>;
type Inbound = SplitStream<WebSocket>;

/// Handle the full lifecycle of one room WebSocket connection.
///
/// The first frame decides the role: `host` creates a room and drives it, `join` plays in an
/// existing one. Everything the device sees afterwards is pushed from its local projection.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let ident_timeout = state.config().identification_timeout();
    let initial_message = match tokio::time::timeout(ident_timeout, receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(Some(Ok(Message::Close(_)))) => {
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Ok(_))) => {
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Err(err))) => {
            warn!(error = %err, "websocket receive error");
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(None) | Err(_) => {
            warn!("websocket identification timed out");
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let result = match InboundMessage::from_json_str(&initial_message) {
        Ok(InboundMessage::Host(request)) => run_host(&state, &outbound_tx, &mut receiver, request).await,
        Ok(InboundMessage::Join(request)) => run_player(&state, &outbound_tx, &mut receiver, request).await,
        Ok(other) => Err(RelayError::Service(ServiceError::InvalidInput(format!(
            "first message must be `host` or `join`, got {other:?}"
        )))),
        Err(err) => Err(err.into()),
    };

    if let Err(err) = result {
        warn!(error = %err, "room socket ended with an error");
        if let RelayError::Service(err) = err {
            let _ = send_message_to_websocket(&outbound_tx, &error_message(&err));
        }
        let _ = outbound_tx.send(Message::Close(None));
    }

    finalize(writer_task, outbound_tx).await;
}

/// Create a room from the host request and run its controller until the socket closes.
async fn run_host(
    state: &SharedState,
    outbound: &Outbound,
    receiver: &mut Inbound,
    request: HostRequest,
) -> Result<(), RelayError> {
    let config = state.config();
    let options = config.question_options(request.category, request.limit);
    let questions = prepare_questions(request.questions, &options);
    let time_per_question = request.time_per_question.unwrap_or(config.time_per_question);

    let handle = state
        .registry()
        .create_room(state.connect(), questions, time_per_question)
        .await?;
    let code = handle.code().clone();
    let controller = Controller::spawn(handle, config.controller_settings(), state.exporter());

    let outcome = drive_host(&controller, outbound, receiver, request.name.as_deref()).await;

    state.registry().release(&code);
    let transitions = controller.snapshot().await.version;
    controller.shutdown().await;
    info!(room = %code, transitions, "host disconnected");
    outcome
}

async fn drive_host(
    controller: &Controller,
    outbound: &Outbound,
    receiver: &mut Inbound,
    name: Option<&str>,
) -> Result<(), RelayError> {
    if let Some(name) = name {
        controller.announce(name).await?;
    }

    send_message_to_websocket(
        outbound,
        &OutboundMessage::RoomCreated {
            room_code: controller.code().to_string(),
            question_count: controller.question_count(),
        },
    )?;
    info!(room = %controller.code(), "host connected");

    let observer = RoomObserver::spawn(controller.reader().clone());
    let mut views = observer.view();
    let mut countdown = controller.countdown();
    views.mark_unchanged();
    countdown.mark_unchanged();
    send_message_to_websocket(outbound, &host_view(&views, &countdown))?;

    loop {
        tokio::select! {
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let reply = match InboundMessage::from_json_str(&text) {
                        Ok(InboundMessage::StartGame) => controller.start_game().await.err(),
                        Ok(InboundMessage::Reset) => controller.reset().await.err(),
                        Ok(other) => Some(ServiceError::InvalidInput(format!(
                            "hosts cannot send {other:?}"
                        ))),
                        Err(err) => Some(err),
                    };
                    if let Some(err) = reply {
                        warn!(
                            room = %controller.code(),
                            phase = ?controller.phase(),
                            error = %err,
                            "host command rejected"
                        );
                        send_message_to_websocket(outbound, &error_message(&err))?;
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = outbound.send(Message::Pong(payload));
                }
                Some(Ok(Message::Close(frame))) => {
                    let _ = outbound.send(Message::Close(frame));
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(room = %controller.code(), error = %err, "websocket error");
                    break;
                }
                None => break,
            },
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                send_message_to_websocket(outbound, &host_view(&views, &countdown))?;
            }
            changed = countdown.changed() => {
                if changed.is_err() {
                    break;
                }
                send_message_to_websocket(outbound, &host_view(&views, &countdown))?;
            }
        }
    }

    Ok(())
}

/// Join an existing room and relay the player's view until the socket closes.
async fn run_player(
    state: &SharedState,
    outbound: &Outbound,
    receiver: &mut Inbound,
    request: JoinRequest,
) -> Result<(), RelayError> {
    let code: RoomCode = request.room_code.parse()?;
    let handle = state
        .registry()
        .join_room(state.connect(), &code, &request.player_id)
        .await?;
    let participant = Participant::join(
        handle,
        PlayerProfile {
            id: request.player_id.clone(),
            name: request.name,
            avatar: request.avatar,
        },
    )
    .await?;

    send_message_to_websocket(
        outbound,
        &OutboundMessage::Joined {
            room_code: code.to_string(),
            player_id: request.player_id.clone(),
        },
    )?;
    info!(room = %code, player = %request.player_id, "player connected");

    let mut views = participant.subscribe();
    views.mark_unchanged();
    send_message_to_websocket(outbound, &OutboundMessage::PlayerView(views.borrow().clone()))?;

    loop {
        tokio::select! {
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => match InboundMessage::from_json_str(&text) {
                    Ok(InboundMessage::Answer { choice_id }) => {
                        match participant.submit_answer(&choice_id).await {
                            Ok(outcome) => send_message_to_websocket(
                                outbound,
                                &OutboundMessage::AnswerResult(outcome),
                            )?,
                            Err(err) => {
                                warn!(room = %code, player = %request.player_id, error = %err, "answer failed");
                                send_message_to_websocket(outbound, &error_message(&err))?;
                            }
                        }
                    }
                    Ok(InboundMessage::Leave) => {
                        participant.leave().await?;
                        let _ = outbound.send(Message::Close(None));
                        info!(room = %code, player = %request.player_id, "player left");
                        return Ok(());
                    }
                    Ok(other) => {
                        let err = ServiceError::InvalidInput(format!("players cannot send {other:?}"));
                        send_message_to_websocket(outbound, &error_message(&err))?;
                    }
                    Err(err) => send_message_to_websocket(outbound, &error_message(&err))?,
                },
                Some(Ok(Message::Ping(payload))) => {
                    let _ = outbound.send(Message::Pong(payload));
                }
                Some(Ok(Message::Close(frame))) => {
                    let _ = outbound.send(Message::Close(frame));
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(room = %code, player = %request.player_id, error = %err, "websocket error");
                    break;
                }
                None => break,
            },
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                send_message_to_websocket(outbound, &OutboundMessage::PlayerView(view))?;
            }
        }
    }

    // Dropping the participant closes its store connection, which marks it offline.
    info!(room = %code, player = %request.player_id, "player disconnected");
    Ok(())
}

fn host_view(views: &watch::Receiver<RoomView>, countdown: &watch::Receiver<u32>) -> OutboundMessage {
    OutboundMessage::HostView(HostView {
        room: views.borrow().clone(),
        countdown: *countdown.borrow(),
    })
}

fn error_message(err: &ServiceError) -> OutboundMessage {
    OutboundMessage::Error {
        message: err.to_string(),
    }
}

/// Serialize a payload and push it onto the provided WebSocket sender.
///
/// Returns `Err(RelayError::ConnectionClosed)` if the writer channel is closed.
fn send_message_to_websocket<T>(tx: &Outbound, value: &T) -> Result<(), RelayError>
where
    T: ?Sized + serde::Serialize + std::fmt::Debug,
{
    let payload = match serde_json::to_string(value) {
        Ok(p) => p,
        Err(err) => {
            // Serialization failure is a permanent error (bug in code)
            warn!(error = %err, "failed to serialize message `{value:?}`");
            return Ok(());
        }
    };

    tx.send(Message::Text(payload.into()))
        .map_err(|_| RelayError::ConnectionClosed)
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: Outbound) {
    drop(outbound_tx);
    let _ = writer_task.await;
}

use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::services::projection::{RoomObserver, RoomView};

/// Name of the SSE event carrying a [`RoomView`].
pub const ROOM_VIEW_EVENT: &str = "room_view";

/// Convert a room observer into an SSE response, pushing the current view and then every
/// change until the client disconnects.
///
/// The observer, and with it the store connection, lives as long as the forwarder task.
pub fn to_sse_stream(observer: RoomObserver) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        let mut views = observer.view();
        let room = views.borrow().room.clone();

        let initial = views.borrow_and_update().clone();
        if let Some(event) = view_event(&initial) {
            if tx.send(Ok(event)).await.is_err() {
                return;
            }
        }

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                changed = views.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let view = views.borrow_and_update().clone();
                    let Some(event) = view_event(&view) else {
                        continue;
                    };
                    if tx.send(Ok(event)).await.is_err() {
                        break;
                    }
                }
            }
        }

        drop(observer);
        info!(%room, "room SSE stream disconnected");
    });

    // response stream reads from mpsc; when client disconnects axum drops this stream
    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn view_event(view: &RoomView) -> Option<Event> {
    match Event::default().event(ROOM_VIEW_EVENT).json_data(view) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(room = %view.room, error = %err, "failed to encode room view");
            None
        }
    }
}

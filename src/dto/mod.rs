use std::time::SystemTime;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// `/health` payload.
pub mod health;
/// Room lookup payloads.
pub mod rooms;
/// Room WebSocket messages.
pub mod ws;

fn format_system_time(time: SystemTime) -> String {
    OffsetDateTime::from(time)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}

use std::time::SystemTime;

use serde::Serialize;

use super::format_system_time;

/// Payload returned by the `/health` route.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always "ok" while the process serves requests.
    pub status: String,
    /// Rooms hosted by this process.
    pub rooms: usize,
    /// Open store connections, one per connected device.
    pub connections: usize,
    /// RFC 3339 time of the check.
    pub checked_at: String,
}

impl HealthResponse {
    /// Create a health response indicating the system is operational.
    pub fn ok(rooms: usize, connections: usize) -> Self {
        Self {
            status: "ok".to_string(),
            rooms,
            connections,
            checked_at: format_system_time(SystemTime::now()),
        }
    }
}

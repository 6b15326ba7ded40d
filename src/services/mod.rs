/// Teacher-side actor driving the session clock.
pub mod controller;
/// Final score reporting.
pub mod export;
/// Health check service.
pub mod health_service;
/// Leaderboard derivation.
pub mod leaderboard;
/// Atomic score increments.
pub mod ledger;
/// Player-side actor.
pub mod participant;
/// Presence records and disconnect cleanup.
pub mod presence;
/// Local room projection shared by every client.
pub mod projection;
/// Read-only room access for HTTP routes.
pub mod room_service;
/// Answer scoring.
pub mod scoring;
/// Server-Sent Events streaming of room views.
pub mod sse_service;
/// WebSocket connection and message handling service.
pub mod websocket_service;

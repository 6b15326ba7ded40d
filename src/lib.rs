//! Library crate for quizroom, exposing modules for binaries and integration tests.

pub mod config;
/// Wire payloads for HTTP and WebSocket clients.
pub mod dto;
/// Service and HTTP error types.
pub mod error;
/// Axum route trees.
pub mod routes;
/// Controller, participant, and relay logic.
pub mod services;
pub mod session;
/// Shared application state and the game state machine.
pub mod state;
pub mod store;

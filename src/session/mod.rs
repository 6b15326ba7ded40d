//! Rooms, their data model, and the capability handles onto them.

pub mod handle;
/// Records stored under a room.
pub mod model;
/// Room creation and lookup.
pub mod registry;
/// Room codes and store paths.
pub mod room;
pub mod setup;

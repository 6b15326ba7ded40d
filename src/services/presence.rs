use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::info;

use crate::{
    error::ServiceError,
    session::{handle::RoomReader, model::Player},
};

/// Identity a device presents when it joins a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerProfile {
    /// Key under `players`.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Avatar key.
    #[serde(default)]
    pub avatar: String,
}

/// Publish `profile` as online and arm the store-side cleanup that marks it offline when
/// this connection goes away.
///
/// The cleanup is registered before the record is written, so there is no window in which
/// the record says online without a cleanup to undo it.
pub async fn join(room: &RoomReader, profile: &PlayerProfile) -> Result<(), ServiceError> {
    let connection = room.connection();
    let record = room.code().player(&profile.id);

    connection
        .on_disconnect(&record.child("online"), false)
        .await?;
    connection
        .set(
            &record,
            Player {
                name: profile.name.clone(),
                avatar: profile.avatar.clone(),
                online: true,
                last_seen: now_millis(),
            },
        )
        .await?;

    info!(room = %room.code(), player = %profile.id, "player joined");
    Ok(())
}

/// Explicitly mark `player_id` offline and disarm its disconnect cleanup.
pub async fn leave(room: &RoomReader, player_id: &str) -> Result<(), ServiceError> {
    let connection = room.connection();
    let record = room.code().player(player_id);

    connection.set(&record.child("online"), false).await?;
    connection.set(&record.child("lastSeen"), now_millis()).await?;
    connection.cancel_on_disconnect(&record.child("online")).await?;

    info!(room = %room.code(), player = player_id, "player left");
    Ok(())
}

fn now_millis() -> i64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
    i64::try_from(nanos / 1_000_000).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        session::room::RoomCode,
        store::{Connection, MemoryStore},
    };

    fn profile(id: &str) -> PlayerProfile {
        PlayerProfile {
            id: id.into(),
            name: format!("Player {id}"),
            avatar: "fox".into(),
        }
    }

    fn reader(store: &Arc<MemoryStore>) -> RoomReader {
        let connection = Arc::new(Connection::open(store.clone()));
        RoomReader::new(connection, "111111".parse::<RoomCode>().unwrap())
    }

    async fn player(observer: &RoomReader, id: &str) -> Player {
        let value = observer
            .connection()
            .get(&observer.code().player(id))
            .await
            .unwrap()
            .unwrap();
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn join_writes_an_online_record() {
        let store = Arc::new(MemoryStore::new());
        let room = reader(&store);
        join(&room, &profile("p1")).await.unwrap();

        let record = player(&room, "p1").await;
        assert!(record.online);
        assert_eq!(record.avatar, "fox");
        assert!(record.last_seen > 0);
    }

    #[tokio::test]
    async fn abrupt_disconnect_flips_online_but_keeps_the_record() {
        let store = Arc::new(MemoryStore::new());
        let observer = reader(&store);

        let room = reader(&store);
        join(&room, &profile("p1")).await.unwrap();
        drop(room);

        let record = player(&observer, "p1").await;
        assert!(!record.online);
        assert_eq!(record.name, "Player p1");
    }

    #[tokio::test]
    async fn explicit_leave_disarms_cleanup() {
        let store = Arc::new(MemoryStore::new());
        let observer = reader(&store);

        let room = reader(&store);
        join(&room, &profile("p1")).await.unwrap();
        leave(&room, "p1").await.unwrap();
        // A later rejoin on another connection must not be undone by the old one.
        let again = reader(&store);
        join(&again, &profile("p1")).await.unwrap();
        drop(room);

        assert!(player(&observer, "p1").await.online);
    }
}

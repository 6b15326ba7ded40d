//! Final score reporting once a session finishes.

use std::path::PathBuf;

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use thiserror::Error;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tokio::{fs::OpenOptions, io::AsyncWriteExt};
use tracing::info;

use crate::session::{
    model::{CONTROLLER_ID, RoomSnapshot},
    room::RoomCode,
};

/// One player's result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreReport {
    /// Player id under `players`.
    pub player_id: String,
    /// Display name at export time.
    pub name: String,
    /// Ledger total.
    pub final_score: u64,
    /// Questions played in the session.
    pub total_questions: usize,
}

/// Errors raised while exporting scores.
#[derive(Debug, Error)]
pub enum ExportError {
    /// Writing to the destination failed.
    #[error("failed to write score export: {0}")]
    Io(#[from] std::io::Error),
    /// A report could not be encoded.
    #[error("failed to encode score export: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Destination for final scores.
pub trait ScoreExporter: Send + Sync {
    /// Deliver the reports of a finished session in `room`.
    fn export(
        &self,
        room: &RoomCode,
        reports: Vec<ScoreReport>,
    ) -> BoxFuture<'static, Result<(), ExportError>>;
}

/// Build one report per registered player, offline players included.
pub fn build_reports(room: &RoomSnapshot) -> Vec<ScoreReport> {
    room.players
        .iter()
        .filter(|(id, _)| id.as_str() != CONTROLLER_ID)
        .map(|(id, player)| ScoreReport {
            player_id: id.clone(),
            name: player.name.clone(),
            final_score: room.score_of(id),
            total_questions: room.questions.len(),
        })
        .collect()
}

/// Logs every report.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingExporter;

impl ScoreExporter for TracingExporter {
    fn export(
        &self,
        room: &RoomCode,
        reports: Vec<ScoreReport>,
    ) -> BoxFuture<'static, Result<(), ExportError>> {
        for report in &reports {
            info!(
                room = %room,
                player = %report.player_id,
                name = %report.name,
                score = report.final_score,
                questions = report.total_questions,
                "final score"
            );
        }
        futures::future::ready(Ok(())).boxed()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportLine<'a> {
    room: &'a str,
    exported_at: &'a str,
    #[serde(flatten)]
    report: &'a ScoreReport,
}

/// Appends one JSON object per report to a file.
#[derive(Debug, Clone)]
pub struct JsonLinesExporter {
    path: PathBuf,
}

impl JsonLinesExporter {
    /// Append to the file at `path`, creating it on first export.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ScoreExporter for JsonLinesExporter {
    fn export(
        &self,
        room: &RoomCode,
        reports: Vec<ScoreReport>,
    ) -> BoxFuture<'static, Result<(), ExportError>> {
        let path = self.path.clone();
        let room = room.to_string();
        async move {
            let exported_at = OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_else(|_| "invalid-timestamp".into());

            let mut buffer = Vec::new();
            for report in &reports {
                serde_json::to_writer(
                    &mut buffer,
                    &ExportLine {
                        room: &room,
                        exported_at: &exported_at,
                        report,
                    },
                )?;
                buffer.push(b'\n');
            }

            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            file.write_all(&buffer).await?;
            file.flush().await?;

            info!(%room, path = %path.display(), reports = reports.len(), "scores exported");
            Ok(())
        }
        .boxed()
    }
}

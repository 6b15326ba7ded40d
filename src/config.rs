//! Application-level configuration loading.

use std::{
    env, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    services::{
        controller::{ControllerSettings, DEFAULT_COUNTDOWN_STEPS},
        export::{JsonLinesExporter, ScoreExporter, TracingExporter},
    },
    session::setup::QuestionSetOptions,
    state::DEFAULT_TRANSITION_TIMEOUT,
};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "QUIZROOM_CONFIG_PATH";

const DEFAULT_TIME_PER_QUESTION: u32 = 20;
const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;
const DEFAULT_IDENTIFICATION_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Seconds per question when the host does not pick one.
    pub time_per_question: u32,
    /// Steps of the controller's pre-game countdown.
    pub countdown_steps: u32,
    /// Period of the controller clock in milliseconds.
    pub tick_interval_ms: u64,
    /// Upper bound on the questions kept for one session.
    pub max_questions: Option<usize>,
    /// Shuffle the question bank before truncating it.
    pub shuffle_questions: bool,
    /// How long a fresh socket may stay silent before identifying itself.
    pub identification_timeout_secs: u64,
    /// When set, final scores are appended to this file as JSON lines.
    pub export_path: Option<PathBuf>,
}

impl AppConfig {
    /// Load the configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        Self::load_from(&resolve_config_path())
    }

    /// Load the configuration at `path`, falling back to built-in defaults.
    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        time_per_question = app_config.time_per_question,
                        export = app_config.export_path.is_some(),
                        "loaded config"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Clock settings handed to every controller.
    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            countdown_steps: self.countdown_steps,
            tick: Duration::from_millis(self.tick_interval_ms),
            transition_timeout: Some(DEFAULT_TRANSITION_TIMEOUT),
        }
    }

    /// Silence allowed on a fresh socket before it is dropped.
    pub fn identification_timeout(&self) -> Duration {
        Duration::from_secs(self.identification_timeout_secs)
    }

    /// Question set options for one host request. The configured maximum caps `limit`.
    pub fn question_options(&self, category: Option<String>, limit: Option<usize>) -> QuestionSetOptions {
        let limit = match (limit, self.max_questions) {
            (Some(requested), Some(max)) => Some(requested.min(max)),
            (requested, max) => requested.or(max),
        };
        QuestionSetOptions {
            category,
            shuffle: self.shuffle_questions,
            limit,
        }
    }

    /// Score exporter matching the configuration.
    pub fn exporter(&self) -> Arc<dyn ScoreExporter> {
        match &self.export_path {
            Some(path) => Arc::new(JsonLinesExporter::new(path.clone())),
            None => Arc::new(TracingExporter),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            time_per_question: DEFAULT_TIME_PER_QUESTION,
            countdown_steps: DEFAULT_COUNTDOWN_STEPS,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            max_questions: None,
            shuffle_questions: true,
            identification_timeout_secs: DEFAULT_IDENTIFICATION_TIMEOUT_SECS,
            export_path: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    time_per_question: Option<u32>,
    countdown_steps: Option<u32>,
    tick_interval_ms: Option<u64>,
    max_questions: Option<usize>,
    shuffle_questions: Option<bool>,
    identification_timeout_secs: Option<u64>,
    export_path: Option<PathBuf>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = AppConfig::default();
        Self {
            time_per_question: positive(
                "time_per_question",
                value.time_per_question,
                defaults.time_per_question,
            ),
            countdown_steps: positive(
                "countdown_steps",
                value.countdown_steps,
                defaults.countdown_steps,
            ),
            tick_interval_ms: positive(
                "tick_interval_ms",
                value.tick_interval_ms,
                defaults.tick_interval_ms,
            ),
            max_questions: value.max_questions.or(defaults.max_questions),
            shuffle_questions: value.shuffle_questions.unwrap_or(defaults.shuffle_questions),
            identification_timeout_secs: positive(
                "identification_timeout_secs",
                value.identification_timeout_secs,
                defaults.identification_timeout_secs,
            ),
            export_path: value.export_path.or(defaults.export_path),
        }
    }
}

/// Zero is never a usable value for the numeric settings.
fn positive<T>(field: &str, value: Option<T>, default: T) -> T
where
    T: Copy + Default + PartialEq,
{
    match value {
        Some(value) if value == T::default() => {
            warn!(field, "ignoring zero in config; using default");
            default
        }
        Some(value) => value,
        None => default,
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

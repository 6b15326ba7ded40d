/// Controller phase machine.
pub mod state_machine;

use std::{sync::Arc, time::Duration};

use crate::{
    config::AppConfig,
    services::export::ScoreExporter,
    session::registry::RoomRegistry,
    store::{Connection, MemoryStore},
};

pub use self::state_machine::{AbortError, ApplyError, Plan, PlanError, PlanId, Snapshot};

/// Handle to the application state shared by every route.
pub type SharedState = Arc<AppState>;
/// Upper bound on the store work behind one phase transition.
pub const DEFAULT_TRANSITION_TIMEOUT: Duration = Duration::from_secs(5);

/// Central application state: the hosted store, the rooms created on it, and the config.
pub struct AppState {
    store: Arc<MemoryStore>,
    registry: RoomRegistry,
    config: AppConfig,
    exporter: Arc<dyn ScoreExporter>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    pub fn new(config: AppConfig) -> SharedState {
        Self::with_store(Arc::new(MemoryStore::new()), config)
    }

    /// Build the state around an existing store.
    pub fn with_store(store: Arc<MemoryStore>, config: AppConfig) -> SharedState {
        let exporter = config.exporter();
        Arc::new(Self {
            store,
            registry: RoomRegistry::new(),
            config,
            exporter,
        })
    }

    /// Store hosted by this process.
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Open a store session for one device.
    pub fn connect(&self) -> Arc<Connection> {
        Arc::new(Connection::open(self.store.clone()))
    }

    /// Rooms created by this process.
    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Loaded configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Destination for final scores of every room hosted here.
    pub fn exporter(&self) -> Arc<dyn ScoreExporter> {
        self.exporter.clone()
    }
}

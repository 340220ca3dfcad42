use crate::api::{ApiClient, QueryBackend};
use crate::commands::chat::{QueryLimits, QueryOrchestrator};
use crate::commands::session::{SessionCoordinator, SessionState};
use crate::commands::settings;
use crate::commands::{ChatError, ValidationError};
use crate::config::Config;
use crate::db::models::{ClientProfile, Preferences};
use crate::db::{open_store, Store};
use std::sync::Arc;

/// Everything the front end reads and writes. Built once at start-up.
pub struct AppState {
    pub config: Config,
    pub api: Arc<ApiClient>,
    store: Arc<dyn Store>,
    orchestrator: QueryOrchestrator,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let store = open_store(&config.data_dir());
        let api = Arc::new(ApiClient::new(&config)?);
        Ok(Self::with_parts(config, store, api.clone(), api))
    }

    /// Assemble state around an explicit store and backend.
    pub fn with_parts(
        config: Config,
        store: Arc<dyn Store>,
        api: Arc<ApiClient>,
        backend: Arc<dyn QueryBackend>,
    ) -> Self {
        let coordinator = Arc::new(SessionCoordinator::new(store.clone(), backend.clone()));
        let orchestrator = QueryOrchestrator::new(coordinator, backend, QueryLimits::from(&config));
        Self {
            config,
            api,
            store,
            orchestrator,
        }
    }

    pub fn clients(&self) -> &[ClientProfile] {
        &self.config.clients
    }

    pub fn client(&self, client_id: &str) -> Option<&ClientProfile> {
        self.config.clients.iter().find(|c| c.id == client_id)
    }

    pub fn orchestrator(&self) -> &QueryOrchestrator {
        &self.orchestrator
    }

    pub fn coordinator(&self) -> &SessionCoordinator {
        self.orchestrator.coordinator()
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn preferences(&self) -> Preferences {
        settings::load_preferences(self.store.as_ref())
    }

    pub async fn select_client(&self, client_id: &str) -> Result<SessionState, ChatError> {
        if self.client(client_id).is_none() {
            return Err(ValidationError::UnknownClient(client_id.to_string()).into());
        }
        self.orchestrator.cancel_clarification();
        Ok(self.coordinator().select_client(client_id).await)
    }

    /// Resume the client selected in the previous run, if it is still configured.
    pub async fn restore(&self) -> Option<SessionState> {
        let client_id = self.coordinator().persisted_client()?;
        if self.client(&client_id).is_none() {
            tracing::info!(client_id = %client_id, "previously selected client no longer configured");
            return None;
        }
        self.coordinator().restore().await
    }
}

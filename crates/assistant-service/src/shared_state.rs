//! Application state shared by every HTTP handler.
//!
//! Everything a session needs is built once at startup and handed out as
//! `Arc` clones; sessions never talk to each other except through the store.

use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    backend::{gemini::GeminiBackend, GenerationBackend},
    config::Config,
    quota::HttpIdentityResolver,
    session::SessionServices,
    store::{self, KeyValueStore, MemoryStore, SqliteStore},
    tools,
    verifier::Verifier,
    widgets::DefaultWidgetRenderer,
};

/// State handed to the Axum router.
#[derive(Clone)]
pub struct AppState {
    /// Configuration (read-only after initialization)
    pub config: Arc<Config>,

    /// Collaborators cloned into each new session
    pub services: SessionServices,
}

impl AppState {
    pub fn new(config: Config, services: SessionServices) -> Self {
        Self {
            config: Arc::new(config),
            services,
        }
    }

    /// Wire up the production collaborators described by `config`. Must be
    /// called inside a Tokio runtime: it starts the store sweeper.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        info!("Initializing application state");

        let store = open_store(config.store_path.as_deref())?;
        store::spawn_sweeper(store.clone(), store::SWEEP_INTERVAL);
        let backend: Arc<dyn GenerationBackend> =
            Arc::new(GeminiBackend::new(&config.gemini_base_url, &config.gemini_key));
        let registry = tools::registry_with_action_timeout(config.action_timeout());
        info!("Registered {} functions", registry.len());

        let services = SessionServices {
            store,
            identity: Arc::new(HttpIdentityResolver::new(&config.user_identification_url)),
            backend: backend.clone(),
            registry: Arc::new(registry),
            renderer: Arc::new(DefaultWidgetRenderer),
            verifier: Arc::new(Verifier::new(backend, &config.verifier_model, config.verifier_timeout())),
            settings: config.session_settings(),
        };
        Ok(Self::new(config, services))
    }
}

fn open_store(path: Option<&str>) -> anyhow::Result<Arc<dyn KeyValueStore>> {
    let Some(path) = path else {
        warn!("No STORE_PATH set; quota and threads are kept in memory only");
        return Ok(Arc::new(MemoryStore::new()));
    };
    let path = Path::new(path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| anyhow::anyhow!("creating store directory {} failed: {}", parent.display(), e))?;
    }
    let store = SqliteStore::new(path)?;
    info!("Key-value store opened at: {}", path.display());
    Ok(Arc::new(store))
}

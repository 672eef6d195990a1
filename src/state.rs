//! Application State
//!
//! Shared handles passed to every request handler.

use std::sync::Arc;
use std::time::Duration;

use chat_relay_llm::BackendRegistry;
use tracing::{info, warn};

use crate::models::settings::AppConfig;
use crate::services::audio::{AsrSettings, AudioRelay, TungsteniteAsrConnector};
use crate::services::auth::{StaticTokenVerifier, TokenVerifier};
use crate::services::moderation::{KeywordFilter, SensitiveFilter};
use crate::services::relay::{PipelineExecutor, PipelineSettings};
use crate::services::search::SearchTool;
use crate::storage::{Database, MessageStore, SqliteMessageStore};
use crate::utils::error::AppResult;

/// Application state, cloned into each handler.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: PipelineExecutor,
    pub store: Arc<dyn MessageStore>,
    pub verifier: Arc<dyn TokenVerifier>,
    /// Absent when no speech recognizer is configured
    pub audio: Option<AudioRelay>,
    /// SSE keep-alive interval
    pub keep_alive: Duration,
    database: Database,
}

impl AppState {
    pub fn new(
        database: Database,
        registry: BackendRegistry,
        verifier: Arc<dyn TokenVerifier>,
        filter: Arc<dyn SensitiveFilter>,
        settings: PipelineSettings,
    ) -> Self {
        let store: Arc<dyn MessageStore> = Arc::new(SqliteMessageStore::new(database.clone()));
        let pipeline = PipelineExecutor::new(store.clone(), Arc::new(registry), filter, settings);
        Self {
            pipeline,
            store,
            verifier,
            audio: None,
            keep_alive: Duration::from_secs(15),
            database,
        }
    }

    /// Build everything the configuration describes.
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let database = match &config.storage.path {
            Some(path) => {
                info!(path = %path, "Opening message database");
                Database::open(path, config.storage.pool_size)?
            }
            None => {
                warn!("No storage.path configured, messages are kept in memory");
                Database::new_in_memory()?
            }
        };

        let registry = BackendRegistry::from_specs(config.backend_specs());
        info!(backends = registry.len(), "Model registry built");

        let verifier: Arc<dyn TokenVerifier> =
            Arc::new(StaticTokenVerifier::from_config(&config.auth));
        let filter = KeywordFilter::new(&config.moderation.banned_terms)?;
        let settings = PipelineSettings {
            channel_capacity: config.server.channel_capacity,
            moderation_every: config.moderation.check_every,
        };

        let mut state =
            Self::new(database, registry, verifier.clone(), Arc::new(filter), settings)
                .with_keep_alive(Duration::from_secs(config.server.keep_alive_secs));
        if let Some(connector) = TungsteniteAsrConnector::from_config(&config.asr) {
            info!(url = %connector.url(), "Speech recognition relay enabled");
            state = state.with_audio(AudioRelay::new(
                verifier,
                Arc::new(connector),
                AsrSettings::from(&config.asr),
            ));
        }
        Ok(state)
    }

    pub fn with_search(mut self, tool: Arc<dyn SearchTool>) -> Self {
        self.pipeline = self.pipeline.with_search(tool);
        self
    }

    pub fn with_audio(mut self, relay: AudioRelay) -> Self {
        self.audio = Some(relay);
        self
    }

    pub fn with_keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive = interval;
        self
    }

    pub fn is_database_healthy(&self) -> bool {
        self.database.is_healthy()
    }

    pub fn backend_count(&self) -> usize {
        self.pipeline.registry().len()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("database", &self.database)
            .field("backends", &self.backend_count())
            .field("audio", &self.audio.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_defaults() {
        let state = AppState::from_config(&AppConfig::default()).unwrap();
        assert!(state.audio.is_none());
        assert!(state.is_database_healthy());
        assert_eq!(state.keep_alive, Duration::from_secs(15));
    }

    #[test]
    fn test_from_config_enables_audio_relay() {
        let mut config = AppConfig::default();
        config.asr.url = Some("ws://127.0.0.1:9/asr".to_string());
        let state = AppState::from_config(&config).unwrap();
        assert!(state.audio.is_some());
    }
}

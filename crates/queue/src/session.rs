//! Session: wires configuration, queue, engine and caches together.
//!
//! This is the surface front ends talk to: batch submission, mode and
//! credential changes, reset, downloads and the optional status server.

use crate::engine::{EngineConfig, ProcessingEngine, StatusSnapshot, Trigger};
use crate::export::{export_results, write_result, ExportError};
use crate::ingest::{IngestError, IngestionGate, RawFile};
use crate::mode::{has_credential, ModeState, PreconditionError, ProcessingMode};
use crate::popularity::{
    CounterSource, GithubStars, PopularityCache, PopularityError, PopularityRecord,
};
use crate::processor::{BackgroundRemover, HttpRemover, ProcessFailure};
use crate::settings::{
    CredentialCache, CredentialStatus, FileSettings, SettingsError, SettingsStore,
};
use crate::startup::{run_startup_checks, StartupError};
use crate::status_server::{run_status_server, ServerError};
use crate::store::{BatchId, QueueSnapshot, QueueStore, ResultFile};
use cutout_config::{Config, ConfigError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Error type for session operations
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    #[error("{0}")]
    Ingest(#[from] IngestError),

    #[error("{0}")]
    Precondition(#[from] PreconditionError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Export failed: {0}")]
    Export(#[from] ExportError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error("Popularity source error: {0}")]
    Popularity(#[from] PopularityError),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// Outcome of an accepted submission
#[derive(Debug)]
pub struct Submission {
    pub batch_id: BatchId,
    pub accepted: usize,
    /// Whether processing started; a missing credential keeps the batch pending.
    pub trigger: Result<Trigger, PreconditionError>,
}

pub struct Session {
    config: Config,
    engine: ProcessingEngine,
    gate: IngestionGate,
    credentials: CredentialCache,
    popularity: Option<PopularityCache>,
    http: Option<Arc<HttpRemover>>,
}

impl Session {
    /// Build a session backed by the HTTP service, the settings file and,
    /// when enabled, the GitHub star counter.
    pub fn new(config: Config) -> Result<Self, SessionError> {
        config.validate()?;

        let http = Arc::new(HttpRemover::new(config.service.clone())?);
        let settings: Arc<dyn SettingsStore> =
            Arc::new(FileSettings::open(&config.storage.settings_path)?);
        let counter: Option<Arc<dyn CounterSource>> = if config.popularity.enabled {
            Some(Arc::new(GithubStars::new(&config.popularity)?))
        } else {
            None
        };

        let mut session = Self::with_parts(config, http.clone(), settings, counter);
        session.http = Some(http);
        Ok(session)
    }

    /// Build a session from explicit collaborators.
    pub fn with_parts(
        config: Config,
        remover: Arc<dyn BackgroundRemover>,
        settings: Arc<dyn SettingsStore>,
        counter: Option<Arc<dyn CounterSource>>,
    ) -> Self {
        let credentials = CredentialCache::new(settings.clone());

        let mode = config.processing.mode;
        let mut initial = ModeState::new(mode);
        if mode == ProcessingMode::Remote {
            initial.api_key = credentials.get().unwrap_or_default();
        }

        let engine = ProcessingEngine::new(
            QueueStore::new(),
            remover,
            initial,
            EngineConfig::from(&config.processing),
        );
        let popularity = counter.map(|source| {
            PopularityCache::new(settings, source, Duration::from_secs(config.popularity.ttl_secs))
        });

        Self {
            gate: IngestionGate::new(config.processing.max_batch_size),
            config,
            engine,
            credentials,
            popularity,
            http: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &ProcessingEngine {
        &self.engine
    }

    pub async fn mode(&self) -> ProcessingMode {
        self.engine.mode().await
    }

    pub async fn api_key(&self) -> String {
        self.engine.api_key().await
    }

    /// Preflight checks for the active mode; the service probe only runs when
    /// the session talks to the HTTP service.
    pub async fn preflight(&self) -> Result<(), StartupError> {
        let mode = self.mode().await;
        run_startup_checks(&self.config, mode, self.http.as_deref()).await
    }

    /// Replace the batch with `files` and start processing.
    pub async fn submit(&self, files: Vec<RawFile>) -> Result<Submission, SessionError> {
        let batch_id = self.gate.submit(self.engine.store(), files).await?;
        let accepted = self.engine.store().counts().await.total();
        let trigger = self.engine.trigger().await;
        Ok(Submission {
            batch_id,
            accepted,
            trigger,
        })
    }

    /// Switch processing mode. Always resets the batch.
    ///
    /// Local mode drops the in-memory credential; remote mode fills an empty
    /// credential from the remembered one.
    pub async fn switch_mode(&self, mode: ProcessingMode) {
        self.engine.reset().await;
        self.engine.set_mode(mode).await;

        match mode {
            ProcessingMode::Local => self.engine.set_api_key("").await,
            ProcessingMode::Remote => {
                if !has_credential(&self.engine.api_key().await) {
                    if let Some(stored) = self.credentials.get() {
                        tracing::debug!("using remembered API key");
                        self.engine.set_api_key(stored).await;
                    }
                }
            }
        }
        tracing::info!(%mode, "processing mode switched");
    }

    /// Replace the in-memory credential and retry pending items.
    pub async fn set_api_key(
        &self,
        api_key: impl Into<String>,
    ) -> Result<Trigger, PreconditionError> {
        self.engine.set_api_key(api_key).await;
        self.engine.trigger().await
    }

    /// Persist the current credential. Returns `false` when there is none.
    pub async fn remember_api_key(&self) -> Result<bool, SettingsError> {
        let current = self.engine.api_key().await;
        if !has_credential(&current) {
            return Ok(false);
        }
        self.credentials.set(&current)?;
        tracing::info!("API key remembered");
        Ok(true)
    }

    /// Clear both the persisted and the in-memory credential.
    pub async fn forget_api_key(&self) -> Result<(), SettingsError> {
        self.credentials.clear()?;
        self.engine.set_api_key("").await;
        tracing::info!("API key forgotten");
        Ok(())
    }

    pub async fn credential_status(&self) -> CredentialStatus {
        self.credentials.status(&self.engine.api_key().await)
    }

    pub async fn reset(&self) {
        self.engine.reset().await;
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        self.engine.store().snapshot().await
    }

    pub async fn status(&self) -> StatusSnapshot {
        self.engine.status().await
    }

    pub async fn result(&self, item_id: &str) -> Option<ResultFile> {
        self.engine.store().result(item_id).await
    }

    /// Write one item's result into `dir`; `None` when it has no result.
    pub async fn export_one(
        &self,
        item_id: &str,
        dir: &Path,
    ) -> Result<Option<PathBuf>, ExportError> {
        let Some(result) = self.result(item_id).await else {
            return Ok(None);
        };
        let format = self.config.processing.output_format;
        Ok(Some(write_result(dir, &result, format)?))
    }

    /// Write every successful result into `dir`.
    pub async fn export_all(&self, dir: &Path) -> Result<Vec<PathBuf>, ExportError> {
        let results = self.engine.store().results().await;
        let paths = export_results(dir, &results, self.config.processing.output_format)?;
        tracing::info!(count = paths.len(), dir = %dir.display(), "results exported");
        Ok(paths)
    }

    /// Quota of the current credential on the hosted API.
    pub async fn usage(&self) -> Option<Result<serde_json::Value, ProcessFailure>> {
        let http = self.http.as_ref()?;
        let api_key = self.engine.api_key().await;
        if !has_credential(&api_key) {
            return None;
        }
        Some(http.usage(&api_key).await)
    }

    /// Popularity counter, if enabled and obtainable.
    pub async fn popularity(&self) -> Option<PopularityRecord> {
        self.popularity.as_ref()?.read().await
    }

    pub fn invalidate_popularity(&self) {
        if let Some(cache) = &self.popularity {
            cache.invalidate();
        }
    }

    /// Spawn the status server on the configured address.
    pub fn start_status_server(&self) -> tokio::task::JoinHandle<()> {
        let engine = self.engine.clone();
        let bind = self.config.server.bind.clone();
        tokio::spawn(async move {
            if let Err(e) = run_status_server(engine, &bind).await {
                tracing::error!("status server error: {}", e);
            }
        })
    }
}

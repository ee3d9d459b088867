//! Processing engine: drains pending items one at a time.
//!
//! At most one drain loop runs per engine. The loop claims the next pending
//! item, sends it to the [`BackgroundRemover`], records the outcome and, in
//! remote mode, waits before the next attempt. A reset bumps the run epoch so
//! a loop started before the reset stops at its next claim, and any result it
//! still delivers is dropped by the store's batch check.

use crate::mode::{inter_item_delay, ModeState, PreconditionError, ProcessingMode};
use crate::processor::{BackgroundRemover, SourceImage};
use crate::store::{QueueSnapshot, QueueStore};
use cutout_config::{OutputFormat, ProcessingConfig};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

/// Settings the drain loop needs from `[processing]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub output_format: OutputFormat,
    pub quality: u8,
    /// Pause after each attempt in remote mode.
    pub remote_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&ProcessingConfig::default())
    }
}

impl From<&ProcessingConfig> for EngineConfig {
    fn from(config: &ProcessingConfig) -> Self {
        Self {
            output_format: config.output_format,
            quality: config.quality,
            remote_delay: Duration::from_millis(config.remote_delay_ms),
        }
    }
}

/// What one drain loop did before it stopped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Outcomes that arrived after their batch was reset or replaced.
    pub discarded: usize,
    /// The loop stopped because of a reset rather than an empty queue.
    pub interrupted: bool,
    /// The loop stopped because the credential was cleared while items
    /// were still pending.
    pub blocked: bool,
}

/// Result of asking the engine to start processing
#[derive(Debug)]
pub enum Trigger {
    /// A new drain loop was spawned.
    Started(JoinHandle<DrainReport>),
    /// A loop is already running and will pick up the pending items.
    AlreadyRunning,
    /// Nothing is pending.
    Idle,
}

impl Trigger {
    pub fn is_started(&self) -> bool {
        matches!(self, Trigger::Started(_))
    }
}

/// Engine state served on the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub mode: ProcessingMode,
    pub running: bool,
    pub queue: QueueSnapshot,
}

#[derive(Debug, Default)]
struct RunState {
    running: bool,
    epoch: u64,
}

enum Start {
    Idle,
    Busy,
    Epoch(u64),
}

/// Sequential processor for one [`QueueStore`]
#[derive(Clone)]
pub struct ProcessingEngine {
    store: QueueStore,
    remover: Arc<dyn BackgroundRemover>,
    mode: Arc<RwLock<ModeState>>,
    run: Arc<Mutex<RunState>>,
    config: EngineConfig,
}

impl ProcessingEngine {
    pub fn new(
        store: QueueStore,
        remover: Arc<dyn BackgroundRemover>,
        mode: ModeState,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            remover,
            mode: Arc::new(RwLock::new(mode)),
            run: Arc::new(Mutex::new(RunState::default())),
            config,
        }
    }

    pub fn store(&self) -> &QueueStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn mode(&self) -> ProcessingMode {
        self.mode.read().await.mode
    }

    pub async fn api_key(&self) -> String {
        self.mode.read().await.api_key.clone()
    }

    pub async fn mode_state(&self) -> ModeState {
        self.mode.read().await.clone()
    }

    pub async fn set_mode(&self, mode: ProcessingMode) {
        self.mode.write().await.mode = mode;
    }

    pub async fn set_api_key(&self, api_key: impl Into<String>) {
        self.mode.write().await.api_key = api_key.into();
    }

    pub async fn is_running(&self) -> bool {
        self.run.lock().await.running
    }

    async fn start(&self) -> Result<Start, PreconditionError> {
        if !self.store.has_pending().await {
            return Ok(Start::Idle);
        }

        let check = self.mode.read().await.check();
        if let Err(e) = check {
            tracing::warn!("processing blocked: {}", e);
            self.store.set_banner(Some(e.to_string())).await;
            return Err(e);
        }

        let mut run = self.run.lock().await;
        if run.running {
            return Ok(Start::Busy);
        }
        run.running = true;
        Ok(Start::Epoch(run.epoch))
    }

    /// Start a drain loop in the background if there is work and none is running.
    ///
    /// A missing remote credential puts the precondition message on the banner
    /// and leaves every item pending.
    pub async fn trigger(&self) -> Result<Trigger, PreconditionError> {
        match self.start().await? {
            Start::Idle => Ok(Trigger::Idle),
            Start::Busy => Ok(Trigger::AlreadyRunning),
            Start::Epoch(epoch) => {
                let engine = self.clone();
                Ok(Trigger::Started(tokio::spawn(async move {
                    engine.drain(epoch).await
                })))
            }
        }
    }

    /// Like [`trigger`](Self::trigger) but drains on the current task.
    ///
    /// Returns `None` when there was nothing to do or another loop owns the queue.
    pub async fn run_until_idle(&self) -> Result<Option<DrainReport>, PreconditionError> {
        match self.start().await? {
            Start::Epoch(epoch) => Ok(Some(self.drain(epoch).await)),
            Start::Idle | Start::Busy => Ok(None),
        }
    }

    /// Stop the current loop at its next claim and empty the store.
    pub async fn reset(&self) {
        let mut run = self.run.lock().await;
        run.epoch += 1;
        let was_running = std::mem::replace(&mut run.running, false);
        self.store.clear().await;
        tracing::info!(epoch = run.epoch, was_running, "queue reset");
    }

    pub async fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            mode: self.mode().await,
            running: self.is_running().await,
            queue: self.store.snapshot().await,
        }
    }

    async fn drain(&self, epoch: u64) -> DrainReport {
        let mut report = DrainReport::default();

        let mode = self.mode().await;
        tracing::info!(%mode, remover = self.remover.name(), epoch, "processing started");

        loop {
            // Claim under the run lock so a reset cannot slip between the
            // epoch check and the claim. The mode state is read per claim so
            // a cleared credential stops the loop before the next request.
            let (claim, params) = {
                let mut run = self.run.lock().await;
                if run.epoch != epoch {
                    report.interrupted = true;
                    break;
                }
                let state = self.mode.read().await.clone();
                if let Err(e) = state.check() {
                    run.running = false;
                    if self.store.has_pending().await {
                        tracing::warn!("processing paused: {}", e);
                        self.store.set_banner(Some(e.to_string())).await;
                        report.blocked = true;
                    }
                    break;
                }
                match self.store.begin_next().await {
                    Some(claim) => {
                        let params = state.params(self.config.output_format, self.config.quality);
                        (claim, params)
                    }
                    None => {
                        run.running = false;
                        break;
                    }
                }
            };

            report.attempted += 1;
            tracing::debug!(item = %claim.item_id, "processing item");

            let source = SourceImage {
                name: claim.name.clone(),
                media_type: claim.media_type.clone(),
                bytes: claim.source.clone(),
            };

            match self.remover.remove_background(&source, &params).await {
                Ok(output) => {
                    let size = output.len();
                    if self.store.complete_success(&claim, output).await {
                        report.succeeded += 1;
                        tracing::info!(item = %claim.item_id, bytes = size, "item completed");
                    } else {
                        report.discarded += 1;
                    }
                }
                Err(failure) => {
                    let message = failure.describe();
                    if self.store.complete_failure(&claim, &message).await {
                        report.failed += 1;
                        tracing::warn!(item = %claim.item_id, "item failed: {}", message);
                    } else {
                        report.discarded += 1;
                    }
                }
            }

            if let Some(delay) = inter_item_delay(params.mode, self.config.remote_delay) {
                tracing::debug!(?delay, "rate limit pause");
                tokio::time::sleep(delay).await;
            }
        }

        tracing::info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            discarded = report.discarded,
            interrupted = report.interrupted,
            blocked = report.blocked,
            "processing stopped"
        );
        report
    }
}

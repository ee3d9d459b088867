//! Cutout
//!
//! Sequential background-removal queue: accepts a batch of images, sends
//! them one at a time to a local or hosted removal service, and keeps
//! per-item status, results and the latest error for front ends.

pub mod engine;
pub mod export;
pub mod ingest;
pub mod item;
pub mod mode;
pub mod popularity;
pub mod processor;
pub mod resources;
pub mod scan;
pub mod session;
pub mod settings;
pub mod startup;
pub mod status_server;
pub mod store;

pub use cutout_config as config;
pub use cutout_config::{Config, OutputFormat, ProcessingMode};
pub use engine::{DrainReport, EngineConfig, ProcessingEngine, StatusSnapshot, Trigger};
pub use export::{export_results, result_file_name, write_result, ExportError, RESULT_PREFIX};
pub use ingest::{filter_images, IngestError, IngestionGate, RawFile, MAX_BATCH_SIZE};
pub use item::{ItemStatus, UploadItem};
pub use mode::{ModeState, PreconditionError};
pub use popularity::{
    CounterSource, Freshness, GithubStars, PopularityCache, PopularityError, PopularityRecord,
};
pub use processor::{
    BackgroundRemover, HttpRemover, ProcessFailure, ProcessParams, SourceImage, GENERIC_FAILURE,
};
pub use resources::{Handle, HandleId, ResourceArena, ResourceStats};
pub use scan::{collect_inputs, is_accepted_image, IMAGE_EXTENSIONS};
pub use session::{Session, SessionError, Submission};
pub use settings::{
    CredentialCache, CredentialStatus, FileSettings, MemorySettings, SettingsError, SettingsStore,
};
pub use startup::{check_config, check_service, check_service_url, run_startup_checks, StartupError};
pub use status_server::{create_status_router, run_status_server, ServerError};
pub use store::{
    BatchId, ItemView, PreviewFile, QueueSnapshot, QueueStore, ResultFile, StatusCounts,
};

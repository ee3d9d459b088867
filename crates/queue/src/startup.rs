//! Preflight checks run before a batch is processed:
//! - Configuration values are in range
//! - The service URL for the active mode is a usable http(s) URL
//! - The service answers its health endpoint

use crate::mode::ProcessingMode;
use crate::processor::HttpRemover;
use cutout_config::{Config, ConfigError};
use reqwest::Url;
use thiserror::Error;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid {mode} service URL '{url}': {reason}")]
    ServiceUrl {
        mode: ProcessingMode,
        url: String,
        reason: String,
    },

    #[error("{mode} service is not reachable: {reason}")]
    ServiceUnavailable { mode: ProcessingMode, reason: String },
}

pub fn check_config(cfg: &Config) -> Result<(), StartupError> {
    cfg.validate()?;
    Ok(())
}

/// The base URL of `mode` must parse and use http or https.
pub fn check_service_url(cfg: &Config, mode: ProcessingMode) -> Result<(), StartupError> {
    let url = cfg.service.base_url(mode);
    let invalid = |reason: String| StartupError::ServiceUrl {
        mode,
        url: url.to_string(),
        reason,
    };

    let parsed = Url::parse(url).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(invalid(format!("unsupported scheme '{}'", other))),
    }
}

/// Probe `GET /health` of the service backing `mode`.
pub async fn check_service(
    remover: &HttpRemover,
    mode: ProcessingMode,
) -> Result<(), StartupError> {
    match remover.health(mode).await {
        Ok(body) => {
            tracing::debug!(%mode, %body, "service healthy");
            Ok(())
        }
        Err(failure) => Err(StartupError::ServiceUnavailable {
            mode,
            reason: failure.describe(),
        }),
    }
}

/// Run all checks in order: config, service URL, then the health probe when a
/// client is given.
pub async fn run_startup_checks(
    cfg: &Config,
    mode: ProcessingMode,
    remover: Option<&HttpRemover>,
) -> Result<(), StartupError> {
    check_config(cfg)?;
    check_service_url(cfg, mode)?;
    if let Some(remover) = remover {
        check_service(remover, mode).await?;
    }
    tracing::info!(%mode, "startup checks passed");
    Ok(())
}

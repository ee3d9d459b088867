//! Processing mode policy: which credential is needed and how requests are paced.

use crate::processor::ProcessParams;
pub use cutout_config::{OutputFormat, ProcessingMode, MIN_REMOTE_DELAY_MS};
use std::time::Duration;
use thiserror::Error;

/// Conditions that keep the drain loop from starting
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreconditionError {
    /// Remote mode with an empty credential.
    #[error("API key is required for API processing")]
    MissingApiKey,
}

/// Whether `api_key` counts as a credential; blank keys do not.
pub fn has_credential(api_key: &str) -> bool {
    !api_key.trim().is_empty()
}

/// Active mode plus the in-memory credential
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModeState {
    pub mode: ProcessingMode,
    /// Credential currently entered; may differ from the persisted one.
    pub api_key: String,
}

impl ModeState {
    pub fn new(mode: ProcessingMode) -> Self {
        Self {
            mode,
            api_key: String::new(),
        }
    }

    /// Whether items may leave `pending` in this state.
    pub fn check(&self) -> Result<(), PreconditionError> {
        match self.mode {
            ProcessingMode::Remote if !has_credential(&self.api_key) => {
                Err(PreconditionError::MissingApiKey)
            }
            _ => Ok(()),
        }
    }

    /// Request parameters; the credential is only sent in remote mode.
    pub fn params(&self, format: OutputFormat, quality: u8) -> ProcessParams {
        ProcessParams {
            mode: self.mode,
            format,
            quality,
            api_key: match self.mode {
                ProcessingMode::Remote => Some(self.api_key.clone()),
                ProcessingMode::Local => None,
            },
        }
    }
}

/// Pause after each attempt: at least [`MIN_REMOTE_DELAY_MS`] in remote
/// mode, none locally.
pub fn inter_item_delay(mode: ProcessingMode, remote_delay: Duration) -> Option<Duration> {
    match mode {
        ProcessingMode::Remote => {
            Some(remote_delay.max(Duration::from_millis(MIN_REMOTE_DELAY_MS)))
        }
        ProcessingMode::Local => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_mode_needs_no_credential() {
        assert!(ModeState::new(ProcessingMode::Local).check().is_ok());
    }

    #[test]
    fn test_remote_mode_requires_credential() {
        let mut state = ModeState::new(ProcessingMode::Remote);
        assert_eq!(state.check(), Err(PreconditionError::MissingApiKey));

        state.api_key = "   ".to_string();
        assert_eq!(state.check(), Err(PreconditionError::MissingApiKey));

        state.api_key = "sk_live".to_string();
        assert!(state.check().is_ok());
    }

    #[test]
    fn test_params_only_carry_key_in_remote_mode() {
        let local = ModeState {
            mode: ProcessingMode::Local,
            api_key: "sk_left_over".to_string(),
        };
        assert_eq!(local.params(OutputFormat::Png, 95).api_key, None);

        let remote = ModeState {
            mode: ProcessingMode::Remote,
            api_key: "sk_live".to_string(),
        };
        let params = remote.params(OutputFormat::Webp, 80);
        assert_eq!(params.api_key.as_deref(), Some("sk_live"));
        assert_eq!(params.format, OutputFormat::Webp);
        assert_eq!(params.quality, 80);
        assert_eq!(params.mode, ProcessingMode::Remote);
    }

    #[test]
    fn test_inter_item_delay() {
        let three = Duration::from_secs(3);
        assert_eq!(inter_item_delay(ProcessingMode::Remote, three), Some(three));
        assert_eq!(inter_item_delay(ProcessingMode::Local, three), None);
        assert_eq!(inter_item_delay(ProcessingMode::Local, Duration::ZERO), None);
    }

    #[test]
    fn test_remote_delay_cannot_drop_below_floor() {
        let floor = Duration::from_millis(MIN_REMOTE_DELAY_MS);
        assert_eq!(inter_item_delay(ProcessingMode::Remote, Duration::ZERO), Some(floor));
        assert_eq!(
            inter_item_delay(ProcessingMode::Remote, Duration::from_millis(10)),
            Some(floor)
        );
        let five = Duration::from_secs(5);
        assert_eq!(inter_item_delay(ProcessingMode::Remote, five), Some(five));
    }

    #[test]
    fn test_blank_key_is_not_a_credential() {
        assert!(!has_credential(""));
        assert!(!has_credential("  \t"));
        assert!(has_credential("sk_live"));
    }

    #[test]
    fn test_precondition_message() {
        assert_eq!(
            PreconditionError::MissingApiKey.to_string(),
            "API key is required for API processing"
        );
    }
}

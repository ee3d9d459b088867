//! Upload items and their processing state machine.
//!
//! An item moves `Pending -> Processing -> {Success | Error}`. Terminal
//! states are only left through a full reset of the queue.

use crate::resources::{Handle, HandleId};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Status of an upload item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Waiting in the queue.
    #[default]
    Pending,
    /// The external call for this item is in flight.
    Processing,
    /// Background removed; a result buffer is held.
    Success,
    /// The external call failed; see the error detail.
    Error,
}

impl ItemStatus {
    /// Label shown next to an item.
    pub fn label(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "Queued",
            ItemStatus::Processing => "Processing",
            ItemStatus::Success => "Completed",
            ItemStatus::Error => "Failed",
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemStatus::Pending => write!(f, "pending"),
            ItemStatus::Processing => write!(f, "processing"),
            ItemStatus::Success => write!(f, "success"),
            ItemStatus::Error => write!(f, "error"),
        }
    }
}

/// One submitted image and its processing record.
#[derive(Debug)]
pub struct UploadItem {
    /// `{submitted_ms}-{position}-{name}`, unique within a batch.
    pub id: String,
    /// Original file name.
    pub name: String,
    /// Declared media type of the source.
    pub media_type: String,
    source: Bytes,
    preview: Handle,
    result: Option<Handle>,
    status: ItemStatus,
    error: Option<String>,
    /// Unix timestamp (milliseconds) of the last status change.
    pub updated_at: i64,
}

impl UploadItem {
    /// Create a pending item owning `preview`.
    pub fn new(
        id: String,
        name: String,
        media_type: String,
        source: Bytes,
        preview: Handle,
    ) -> Self {
        Self {
            id,
            name,
            media_type,
            source,
            preview,
            result: None,
            status: ItemStatus::Pending,
            error: None,
            updated_at: current_timestamp_ms(),
        }
    }

    pub fn status(&self) -> ItemStatus {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Shared view of the original bytes.
    pub fn source(&self) -> Bytes {
        self.source.clone()
    }

    pub fn preview_id(&self) -> HandleId {
        self.preview.id()
    }

    pub fn result_id(&self) -> Option<HandleId> {
        self.result.as_ref().map(Handle::id)
    }

    pub fn is_pending(&self) -> bool {
        self.status == ItemStatus::Pending
    }

    fn touch(&mut self) {
        self.updated_at = current_timestamp_ms();
    }

    /// Mark the item as in flight, clearing any stale error.
    pub fn start(&mut self) {
        self.status = ItemStatus::Processing;
        self.error = None;
        self.touch();
    }

    /// Store the result handle and mark success.
    ///
    /// Returns the handle this one replaced so the caller can release it.
    #[must_use = "the replaced result handle must be released"]
    pub fn succeed(&mut self, result: Handle) -> Option<Handle> {
        let previous = self.result.replace(result);
        self.status = ItemStatus::Success;
        self.error = None;
        self.touch();
        previous
    }

    /// Record a failure. A result from an earlier run is handed back for release.
    #[must_use = "a leftover result handle must be released"]
    pub fn fail(&mut self, reason: &str) -> Option<Handle> {
        self.status = ItemStatus::Error;
        self.error = Some(reason.to_string());
        self.touch();
        self.result.take()
    }

    /// Give up ownership of every handle, consuming the item.
    pub fn into_handles(self) -> (Handle, Option<Handle>) {
        (self.preview, self.result)
    }
}

/// Get current timestamp in milliseconds since Unix epoch.
pub(crate) fn current_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

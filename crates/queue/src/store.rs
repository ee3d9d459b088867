//! Queue store: the ordered batch of upload items and the banner message.
//!
//! All mutations take the write lock once, so observers see either the state
//! before or after an operation. The store owns every resource handle; the
//! only bulk release paths are [`QueueStore::replace_batch`] and
//! [`QueueStore::clear`].

use crate::ingest::RawFile;
use crate::item::{ItemStatus, UploadItem};
use crate::resources::{HandleId, ResourceArena, ResourceStats};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Identity of one accepted batch. Results tagged with an older batch are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(Uuid);

impl BatchId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Aggregate status counts for the current batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub processing: usize,
    pub success: usize,
    pub error: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending + self.processing + self.success + self.error
    }

    /// Non-empty batch with nothing left to do.
    pub fn all_processed(&self) -> bool {
        self.total() > 0 && self.pending == 0 && self.processing == 0
    }

    /// Progress line such as `1 processing • 2 queued • 3 completed`.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if self.processing > 0 {
            parts.push(format!("{} processing", self.processing));
        }
        if self.pending > 0 {
            parts.push(format!("{} queued", self.pending));
        }
        if self.success > 0 {
            parts.push(format!("{} completed", self.success));
        }
        if self.error > 0 {
            parts.push(format!("{} failed", self.error));
        }
        if parts.is_empty() {
            "Preparing images...".to_string()
        } else {
            parts.join(" • ")
        }
    }
}

/// Read-only view of one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemView {
    pub id: String,
    pub name: String,
    pub media_type: String,
    pub status: ItemStatus,
    pub status_label: String,
    pub preview: HandleId,
    pub result: Option<HandleId>,
    pub error: Option<String>,
    pub updated_at: i64,
}

impl From<&UploadItem> for ItemView {
    fn from(item: &UploadItem) -> Self {
        Self {
            id: item.id.clone(),
            name: item.name.clone(),
            media_type: item.media_type.clone(),
            status: item.status(),
            status_label: item.status().label().to_string(),
            preview: item.preview_id(),
            result: item.result_id(),
            error: item.error().map(str::to_string),
            updated_at: item.updated_at,
        }
    }
}

/// Complete view of the queue at one instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub batch_id: Option<BatchId>,
    pub items: Vec<ItemView>,
    pub counts: StatusCounts,
    pub summary: String,
    pub all_processed: bool,
    pub banner: Option<String>,
    pub resources: ResourceStats,
}

/// A pending item handed to the drain loop
#[derive(Debug, Clone)]
pub struct Claim {
    pub batch_id: BatchId,
    pub index: usize,
    pub item_id: String,
    pub name: String,
    pub media_type: String,
    pub source: Bytes,
}

/// A finished result ready for download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultFile {
    pub item_id: String,
    pub name: String,
    pub bytes: Bytes,
}

/// Original image of one item, resolved from its preview handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewFile {
    pub item_id: String,
    pub media_type: String,
    pub bytes: Bytes,
}

#[derive(Debug, Default)]
struct QueueState {
    batch_id: Option<BatchId>,
    items: Vec<UploadItem>,
    banner: Option<String>,
    arena: ResourceArena,
}

impl QueueState {
    fn release_items(&mut self) {
        for item in self.items.drain(..) {
            let (preview, result) = item.into_handles();
            self.arena.release(preview);
            self.arena.release_opt(result);
        }
    }

    /// Item the claim refers to, if the claim still matches the live batch.
    fn claimed_mut(&mut self, claim: &Claim) -> Option<&mut UploadItem> {
        if self.batch_id != Some(claim.batch_id) {
            return None;
        }
        self.items
            .get_mut(claim.index)
            .filter(|item| item.id == claim.item_id && item.status() == ItemStatus::Processing)
    }

    fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for item in &self.items {
            match item.status() {
                ItemStatus::Pending => counts.pending += 1,
                ItemStatus::Processing => counts.processing += 1,
                ItemStatus::Success => counts.success += 1,
                ItemStatus::Error => counts.error += 1,
            }
        }
        counts
    }
}

/// Shared, ordered store of upload items
#[derive(Debug, Clone, Default)]
pub struct QueueStore {
    state: Arc<RwLock<QueueState>>,
}

impl QueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a new batch, releasing every handle of the previous one first.
    ///
    /// Each file gets a preview handle and starts `pending`. The banner is cleared.
    pub async fn replace_batch(&self, files: Vec<RawFile>, submitted_ms: i64) -> BatchId {
        let mut state = self.state.write().await;
        state.release_items();

        let batch_id = BatchId::new();
        let mut items = Vec::with_capacity(files.len());
        for (index, file) in files.into_iter().enumerate() {
            let preview = state.arena.acquire(file.bytes.clone());
            items.push(UploadItem::new(
                item_id(submitted_ms, index, &file.name),
                file.name,
                file.media_type,
                file.bytes,
                preview,
            ));
        }

        state.items = items;
        state.batch_id = Some(batch_id);
        state.banner = None;
        batch_id
    }

    /// Release everything and empty the store.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.release_items();
        state.batch_id = None;
        state.banner = None;
    }

    /// Move the first pending item to `processing` and hand it out.
    ///
    /// Clears the banner, as each attempt starts with a clean slate.
    pub async fn begin_next(&self) -> Option<Claim> {
        let mut state = self.state.write().await;
        let batch_id = state.batch_id?;
        let index = state.items.iter().position(UploadItem::is_pending)?;

        state.banner = None;
        let item = &mut state.items[index];
        item.start();

        Some(Claim {
            batch_id,
            index,
            item_id: item.id.clone(),
            name: item.name.clone(),
            media_type: item.media_type.clone(),
            source: item.source(),
        })
    }

    /// Store the processed bytes for a claimed item.
    ///
    /// Returns `false` and drops the bytes when the claim is stale.
    pub async fn complete_success(&self, claim: &Claim, output: Bytes) -> bool {
        let mut state = self.state.write().await;
        if state.claimed_mut(claim).is_none() {
            tracing::warn!(
                item = %claim.item_id,
                batch = %claim.batch_id,
                "discarding result for stale item"
            );
            return false;
        }

        let handle = state.arena.acquire(output);
        let replaced = match state.claimed_mut(claim) {
            Some(item) => item.succeed(handle),
            None => Some(handle),
        };
        state.arena.release_opt(replaced);
        true
    }

    /// Record a failure for a claimed item and mirror it to the banner.
    ///
    /// Returns `false` when the claim is stale; the banner is left alone then.
    pub async fn complete_failure(&self, claim: &Claim, message: &str) -> bool {
        let mut state = self.state.write().await;
        let leftover = match state.claimed_mut(claim) {
            Some(item) => item.fail(message),
            None => {
                tracing::warn!(
                    item = %claim.item_id,
                    batch = %claim.batch_id,
                    "discarding failure for stale item"
                );
                return false;
            }
        };
        state.arena.release_opt(leftover);
        state.banner = Some(message.to_string());
        true
    }

    pub async fn set_banner(&self, message: Option<String>) {
        self.state.write().await.banner = message;
    }

    pub async fn banner(&self) -> Option<String> {
        self.state.read().await.banner.clone()
    }

    pub async fn has_pending(&self) -> bool {
        self.state.read().await.items.iter().any(UploadItem::is_pending)
    }

    pub async fn counts(&self) -> StatusCounts {
        self.state.read().await.counts()
    }

    pub async fn resource_stats(&self) -> ResourceStats {
        self.state.read().await.arena.stats()
    }

    /// Processed output of one item, if it succeeded.
    pub async fn result(&self, item_id: &str) -> Option<ResultFile> {
        let state = self.state.read().await;
        let item = state.items.iter().find(|item| item.id == item_id)?;
        let bytes = state.arena.get(item.result_id()?)?;
        Some(ResultFile {
            item_id: item.id.clone(),
            name: item.name.clone(),
            bytes,
        })
    }

    /// Original bytes of one item, through its preview handle.
    pub async fn preview(&self, item_id: &str) -> Option<PreviewFile> {
        let state = self.state.read().await;
        let item = state.items.iter().find(|item| item.id == item_id)?;
        let bytes = state.arena.get(item.preview_id())?;
        Some(PreviewFile {
            item_id: item.id.clone(),
            media_type: item.media_type.clone(),
            bytes,
        })
    }

    /// Every successful result, in submission order.
    pub async fn results(&self) -> Vec<ResultFile> {
        let state = self.state.read().await;
        state
            .items
            .iter()
            .filter(|item| item.status() == ItemStatus::Success)
            .filter_map(|item| {
                let bytes = state.arena.get(item.result_id()?)?;
                Some(ResultFile {
                    item_id: item.id.clone(),
                    name: item.name.clone(),
                    bytes,
                })
            })
            .collect()
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        let state = self.state.read().await;
        let counts = state.counts();
        QueueSnapshot {
            batch_id: state.batch_id,
            items: state.items.iter().map(ItemView::from).collect(),
            counts,
            summary: counts.summary(),
            all_processed: counts.all_processed(),
            banner: state.banner.clone(),
            resources: state.arena.stats(),
        }
    }
}

/// Item id from submission time, position and original name.
pub fn item_id(submitted_ms: i64, index: usize, name: &str) -> String {
    format!("{}-{}-{}", submitted_ms, index, name)
}

//! Resource arena for transient image buffers
//!
//! Previews and results are stored as byte buffers behind owning [`Handle`]s.
//! A handle is not `Clone`, so releasing it consumes it and a double release
//! cannot be expressed. Views of a buffer are handed out by [`HandleId`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Copyable identifier of a live buffer, safe to hand to readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandleId(u64);

impl std::fmt::Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "h{}", self.0)
    }
}

/// Owning reference to a buffer in a [`ResourceArena`].
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a dropped handle leaks its buffer until the arena is dropped"]
pub struct Handle {
    id: HandleId,
}

impl Handle {
    pub fn id(&self) -> HandleId {
        self.id
    }
}

/// Acquire/release counters, used to prove nothing leaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStats {
    pub acquired: u64,
    pub released: u64,
    /// Releases of handles the arena did not know about.
    pub stale_releases: u64,
    pub live: usize,
    pub live_bytes: usize,
}

/// Arena of byte buffers indexed by handle id.
#[derive(Debug, Default)]
pub struct ResourceArena {
    buffers: HashMap<HandleId, Bytes>,
    next_id: u64,
    acquired: u64,
    released: u64,
    stale_releases: u64,
}

impl ResourceArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `bytes` and return the owning handle.
    pub fn acquire(&mut self, bytes: Bytes) -> Handle {
        self.next_id += 1;
        let id = HandleId(self.next_id);
        self.buffers.insert(id, bytes);
        self.acquired += 1;
        Handle { id }
    }

    /// Free the buffer behind `handle`.
    ///
    /// Releasing a handle this arena does not hold is a logged no-op.
    pub fn release(&mut self, handle: Handle) {
        match self.buffers.remove(&handle.id) {
            Some(_) => self.released += 1,
            None => {
                self.stale_releases += 1;
                tracing::warn!(handle = %handle.id, "release of unknown resource handle ignored");
            }
        }
    }

    /// Release an optional handle, doing nothing for `None`.
    pub fn release_opt(&mut self, handle: Option<Handle>) {
        if let Some(handle) = handle {
            self.release(handle);
        }
    }

    /// Cheap clone of the buffer behind `id`, if still live.
    pub fn get(&self, id: HandleId) -> Option<Bytes> {
        self.buffers.get(&id).cloned()
    }

    pub fn is_live(&self, id: HandleId) -> bool {
        self.buffers.contains_key(&id)
    }

    pub fn stats(&self) -> ResourceStats {
        ResourceStats {
            acquired: self.acquired,
            released: self.released,
            stale_releases: self.stale_releases,
            live: self.buffers.len(),
            live_bytes: self.buffers.values().map(Bytes::len).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_returns_distinct_handles() {
        let mut arena = ResourceArena::new();
        let a = arena.acquire(Bytes::from_static(b"one"));
        let b = arena.acquire(Bytes::from_static(b"two"));

        assert_ne!(a.id(), b.id());
        assert_eq!(arena.get(a.id()).unwrap(), Bytes::from_static(b"one"));
        assert_eq!(arena.get(b.id()).unwrap(), Bytes::from_static(b"two"));
        assert_eq!(arena.stats().live, 2);
        assert_eq!(arena.stats().live_bytes, 6);

        arena.release(a);
        arena.release(b);
    }

    #[test]
    fn test_release_frees_buffer() {
        let mut arena = ResourceArena::new();
        let handle = arena.acquire(Bytes::from_static(b"pixels"));
        let id = handle.id();

        arena.release(handle);

        assert!(!arena.is_live(id));
        assert!(arena.get(id).is_none());
        let stats = arena.stats();
        assert_eq!(stats.acquired, 1);
        assert_eq!(stats.released, 1);
        assert_eq!(stats.live, 0);
    }

    #[test]
    fn test_release_of_foreign_handle_is_noop() {
        let mut ours = ResourceArena::new();
        let mut theirs = ResourceArena::new();
        let kept = ours.acquire(Bytes::from_static(b"keep"));
        let foreign = theirs.acquire(Bytes::from_static(b"x"));
        let foreign_id = foreign.id();

        // Same numeric id exists in `ours`, so use a fresh one that does not.
        let extra = theirs.acquire(Bytes::from_static(b"y"));
        ours.release(extra);

        let stats = ours.stats();
        assert_eq!(stats.released, 0);
        assert_eq!(stats.stale_releases, 1);
        assert!(ours.is_live(kept.id()));
        assert!(theirs.is_live(foreign_id));

        ours.release(kept);
        theirs.release(foreign);
    }

    #[test]
    fn test_release_opt_none_does_nothing() {
        let mut arena = ResourceArena::new();
        arena.release_opt(None);
        assert_eq!(arena.stats(), ResourceStats::default());
    }
}

//! Project popularity counter with a time-boxed cache.
//!
//! The counter is decorative: a failed refresh is logged and swallowed, and
//! callers simply get nothing to show.

use crate::item::current_timestamp_ms;
use crate::settings::SettingsStore;
use async_trait::async_trait;
use cutout_config::PopularityConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Settings key holding the cached count.
pub const COUNT_KEY: &str = "star_count";
/// Settings key holding the fetch time in epoch milliseconds.
pub const TIMESTAMP_KEY: &str = "star_count_timestamp";

#[derive(Debug, Error)]
pub enum PopularityError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {0}")]
    Status(u16),

    #[error("Response has no counter")]
    MissingCounter,
}

/// Where the counter comes from
#[async_trait]
pub trait CounterSource: Send + Sync {
    async fn fetch(&self) -> Result<u64, PopularityError>;
}

#[derive(Debug, Deserialize)]
struct RepositoryBody {
    stargazers_count: Option<u64>,
}

/// Star count of a GitHub repository
pub struct GithubStars {
    client: Client,
    url: String,
}

impl GithubStars {
    pub fn new(config: &PopularityConfig) -> Result<Self, PopularityError> {
        let client = Client::builder()
            .user_agent(concat!("cutout/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: format!(
                "{}/repos/{}",
                config.api_base.trim_end_matches('/'),
                config.repository
            ),
        })
    }
}

#[async_trait]
impl CounterSource for GithubStars {
    async fn fetch(&self) -> Result<u64, PopularityError> {
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(PopularityError::Status(response.status().as_u16()));
        }
        let body: RepositoryBody = response.json().await?;
        body.stargazers_count.ok_or(PopularityError::MissingCounter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    /// Served from the cache without a network call.
    Cached,
    /// Just fetched from the source.
    Fetched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PopularityRecord {
    pub count: u64,
    pub fetched_at_ms: i64,
    pub freshness: Freshness,
}

/// Counter cache backed by a [`SettingsStore`]
#[derive(Clone)]
pub struct PopularityCache {
    settings: Arc<dyn SettingsStore>,
    source: Arc<dyn CounterSource>,
    ttl: Duration,
}

impl PopularityCache {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        source: Arc<dyn CounterSource>,
        ttl: Duration,
    ) -> Self {
        Self {
            settings,
            source,
            ttl,
        }
    }

    /// Cached value if it is younger than the window at `now_ms`.
    pub fn cached_at(&self, now_ms: i64) -> Option<PopularityRecord> {
        let count = self.settings.get(COUNT_KEY)?.parse::<u64>().ok()?;
        let fetched_at_ms = self.settings.get(TIMESTAMP_KEY)?.parse::<i64>().ok()?;
        let age_ms = now_ms.saturating_sub(fetched_at_ms);
        if age_ms < 0 || age_ms as u128 >= self.ttl.as_millis() {
            return None;
        }
        Some(PopularityRecord {
            count,
            fetched_at_ms,
            freshness: Freshness::Cached,
        })
    }

    pub async fn read(&self) -> Option<PopularityRecord> {
        self.read_at(current_timestamp_ms()).await
    }

    /// Cached value, or a best-effort refresh when the cache is missing or stale.
    pub async fn read_at(&self, now_ms: i64) -> Option<PopularityRecord> {
        if let Some(record) = self.cached_at(now_ms) {
            tracing::debug!(count = record.count, "popularity cache hit");
            return Some(record);
        }

        let count = match self.source.fetch().await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!("popularity refresh failed: {}", e);
                return None;
            }
        };

        let stored = self
            .settings
            .set(COUNT_KEY, &count.to_string())
            .and_then(|_| self.settings.set(TIMESTAMP_KEY, &now_ms.to_string()));
        if let Err(e) = stored {
            tracing::warn!("failed to cache popularity counter: {}", e);
        }

        Some(PopularityRecord {
            count,
            fetched_at_ms: now_ms,
            freshness: Freshness::Fetched,
        })
    }

    /// Drop the cached value so the next read fetches.
    pub fn invalidate(&self) {
        for key in [COUNT_KEY, TIMESTAMP_KEY] {
            if let Err(e) = self.settings.remove(key) {
                tracing::warn!(key, "failed to clear popularity cache: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MemorySettings;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const HOUR_MS: i64 = 60 * 60 * 1000;

    struct FixedSource {
        count: Option<u64>,
        calls: AtomicUsize,
    }

    impl FixedSource {
        fn new(count: Option<u64>) -> Arc<Self> {
            Arc::new(Self {
                count,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CounterSource for FixedSource {
        async fn fetch(&self) -> Result<u64, PopularityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.count.ok_or(PopularityError::Status(503))
        }
    }

    fn cache(source: Arc<FixedSource>) -> (PopularityCache, Arc<MemorySettings>) {
        let settings = Arc::new(MemorySettings::new());
        let cache = PopularityCache::new(settings.clone(), source, Duration::from_secs(3600));
        (cache, settings)
    }

    #[tokio::test]
    async fn test_fetch_then_serve_from_cache() {
        let source = FixedSource::new(Some(1234));
        let (cache, settings) = cache(source.clone());

        let first = cache.read_at(1_000).await.unwrap();
        assert_eq!(first.count, 1234);
        assert_eq!(first.freshness, Freshness::Fetched);
        assert_eq!(settings.get(COUNT_KEY).as_deref(), Some("1234"));
        assert_eq!(settings.get(TIMESTAMP_KEY).as_deref(), Some("1000"));

        let second = cache.read_at(1_000 + HOUR_MS - 1).await.unwrap();
        assert_eq!(second.freshness, Freshness::Cached);
        assert_eq!(second.fetched_at_ms, 1_000);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_stale_cache_refetches() {
        let source = FixedSource::new(Some(7));
        let (cache, settings) = cache(source.clone());
        settings.set(COUNT_KEY, "5").unwrap();
        settings.set(TIMESTAMP_KEY, "0").unwrap();

        let record = cache.read_at(HOUR_MS).await.unwrap();
        assert_eq!(record.count, 7);
        assert_eq!(record.freshness, Freshness::Fetched);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_is_swallowed() {
        let source = FixedSource::new(None);
        let (cache, settings) = cache(source.clone());

        assert_eq!(cache.read_at(0).await, None);
        assert_eq!(settings.get(COUNT_KEY), None);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_clears_without_fetching() {
        let source = FixedSource::new(Some(3));
        let (cache, settings) = cache(source.clone());
        cache.read_at(0).await.unwrap();

        cache.invalidate();

        assert_eq!(settings.get(COUNT_KEY), None);
        assert_eq!(settings.get(TIMESTAMP_KEY), None);
        assert_eq!(source.calls(), 1);
        assert_eq!(cache.cached_at(1), None);
    }

    #[test]
    fn test_unparsable_cache_is_ignored() {
        let (cache, settings) = cache(FixedSource::new(Some(1)));
        settings.set(COUNT_KEY, "lots").unwrap();
        settings.set(TIMESTAMP_KEY, "0").unwrap();
        assert_eq!(cache.cached_at(1), None);
    }

    #[test]
    fn test_github_url() {
        let config = PopularityConfig {
            api_base: "https://api.github.test/".to_string(),
            repository: "owner/repo".to_string(),
            ..PopularityConfig::default()
        };
        let stars = GithubStars::new(&config).unwrap();
        assert_eq!(stars.url, "https://api.github.test/repos/owner/repo");
    }
}

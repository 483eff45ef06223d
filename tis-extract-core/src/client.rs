//! Retrying, caching client over a [`TreeApi`].
//!
//! A [`TreeClient`] lives exactly as long as one traversal run. It owns the
//! node cache for that run, so two concurrent runs never share entries.
//!
//! - Transient failures (network, timeout, configured HTTP statuses) are
//!   retried with exponential backoff up to `max_retries` times. The last
//!   error is surfaced once the budget is spent.
//! - Other API errors and parse errors are surfaced immediately.
//! - Each node id has its own in-flight guard. Concurrent requests for the
//!   same uncached id wait for the first one instead of issuing a second
//!   network call. Failed fetches are not cached.
//! - Cancellation is checked before every attempt and interrupts backoff
//!   sleeps. No lock is held while sleeping.
//! - A response deeper than one level seeds the cache with every embedded
//!   descendant whose child list is present, so those nodes are never
//!   requested on their own.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::contract::TreeApi;
use crate::error::FetchError;
use crate::model::{RawNode, TreeNode};
use crate::stats::RunStats;

/// Backoff schedule and retry classification.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub retry_status_codes: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy {
            max_retries: config.max_retries,
            initial_delay: Duration::from_millis(config.initial_backoff_ms),
            max_delay: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.backoff_multiplier.max(1.0),
            retry_status_codes: config.retry_status_codes.clone(),
        }
    }
}

impl RetryPolicy {
    pub fn is_retryable(&self, error: &FetchError) -> bool {
        match error {
            FetchError::Network(_) | FetchError::Timeout(_) => true,
            FetchError::Api { status, .. } => self.retry_status_codes.contains(status),
            FetchError::Parse(_) | FetchError::Cancelled => false,
        }
    }

    /// First sleep of a backoff sequence.
    pub fn first_delay(&self) -> Duration {
        self.initial_delay.min(self.max_delay)
    }

    /// Grows `current` by the multiplier, saturating at `max_delay`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        Duration::try_from_secs_f64(current.as_secs_f64() * self.multiplier)
            .map_or(self.max_delay, |next| next.min(self.max_delay))
    }
}

type CacheSlot = Arc<OnceCell<Arc<RawNode>>>;

pub struct TreeClient<A: TreeApi + ?Sized> {
    api: Arc<A>,
    policy: RetryPolicy,
    cache: DashMap<String, CacheSlot>,
    stats: Arc<RunStats>,
    cancel: CancellationToken,
}

impl<A: TreeApi + ?Sized> TreeClient<A> {
    pub fn new(
        api: Arc<A>,
        policy: RetryPolicy,
        stats: Arc<RunStats>,
        cancel: CancellationToken,
    ) -> Self {
        TreeClient {
            api,
            policy,
            cache: DashMap::new(),
            stats,
            cancel,
        }
    }

    /// Returns the node with its direct children, from cache when possible.
    pub async fn fetch_node(&self, node_id: &str) -> Result<Arc<RawNode>, FetchError> {
        let slot: CacheSlot = self.cache.entry(node_id.to_string()).or_default().clone();
        if let Some(node) = slot.get() {
            self.stats.record_cache_hit();
            debug!(node_id, "Cache hit");
            return Ok(node.clone());
        }

        let mut fetched_here = false;
        let node = slot
            .get_or_try_init(|| {
                fetched_here = true;
                self.fetch_with_retry(node_id)
            })
            .await?
            .clone();
        if fetched_here {
            self.seed_descendants(&node);
        } else {
            self.stats.record_cache_hit();
            debug!(node_id, "Served by concurrent in-flight fetch");
        }
        Ok(node)
    }

    /// Caches the embedded descendants of `node` that carry their own child list.
    fn seed_descendants(&self, node: &RawNode) {
        let mut pending: Vec<&RawNode> = node.children.iter().flatten().collect();
        let mut seeded = 0usize;
        while let Some(child) = pending.pop() {
            let Some(grandchildren) = &child.children else {
                continue;
            };
            pending.extend(grandchildren.iter());
            let id = child.id();
            if id.is_empty() {
                continue;
            }
            let slot: CacheSlot = self.cache.entry(id).or_default().clone();
            if slot.set(Arc::new(child.clone())).is_ok() {
                self.stats.record_seeded();
                seeded += 1;
            }
        }
        if seeded > 0 {
            debug!(node_id = %node.id(), seeded, "Seeded cache from embedded subtree");
        }
    }

    /// Fetches the children of `parent` as tree nodes one level below it.
    pub async fn fetch_children(&self, parent: &TreeNode) -> Result<Vec<TreeNode>, FetchError> {
        let node = self.fetch_node(&parent.id).await?;
        Ok(node.child_nodes(parent.level))
    }

    pub fn cached_len(&self) -> usize {
        self.cache.iter().filter(|slot| slot.initialized()).count()
    }

    async fn fetch_with_retry(&self, node_id: &str) -> Result<Arc<RawNode>, FetchError> {
        let mut attempt: u32 = 0;
        let mut delay = self.policy.first_delay();
        loop {
            if self.cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            attempt += 1;
            self.stats.record_api_call();
            match self.api.get_node(node_id).await {
                Ok(node) => return Ok(Arc::new(node)),
                Err(e) => {
                    if attempt > self.policy.max_retries || !self.policy.is_retryable(&e) {
                        if attempt > 1 {
                            warn!(node_id, attempts = attempt, error = %e, "Giving up after retries");
                        }
                        return Err(e);
                    }
                    debug!(
                        node_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient fetch failure, backing off"
                    );
                    self.stats.record_retry();
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(FetchError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    delay = self.policy.next_delay(delay);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
            retry_status_codes: vec![503],
        };
        let d1 = policy.next_delay(policy.initial_delay);
        let d2 = policy.next_delay(d1);
        let d3 = policy.next_delay(d2);
        assert_eq!(d1, Duration::from_secs(1));
        assert_eq!(d2, Duration::from_secs(2));
        assert_eq!(d3, Duration::from_secs(2));
    }

    #[test]
    fn oversized_multiplier_saturates_at_max_delay() {
        let policy = RetryPolicy {
            multiplier: 1e30,
            ..RetryPolicy::default()
        };
        let next = policy.next_delay(Duration::from_secs(1));
        assert_eq!(next, policy.max_delay);
        assert_eq!(policy.next_delay(Duration::MAX), policy.max_delay);

        let infinite = RetryPolicy::from(&RetryConfig {
            backoff_multiplier: f64::INFINITY,
            ..RetryConfig::default()
        });
        assert_eq!(infinite.next_delay(Duration::from_millis(1)), infinite.max_delay);
    }

    #[test]
    fn first_delay_is_capped() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(2),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.first_delay(), Duration::from_secs(2));
        assert_eq!(RetryPolicy::default().first_delay(), Duration::from_millis(500));
    }

    #[test]
    fn classification_follows_status_list() {
        let policy = RetryPolicy::default();
        assert!(policy.is_retryable(&FetchError::Timeout("read".into())));
        assert!(policy.is_retryable(&FetchError::Api {
            status: 503,
            message: String::new()
        }));
        assert!(!policy.is_retryable(&FetchError::Api {
            status: 404,
            message: String::new()
        }));
        assert!(!policy.is_retryable(&FetchError::Parse("eof".into())));
    }
}

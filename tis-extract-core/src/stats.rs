//! Counters owned by a single traversal run.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct RunStats {
    api_calls: AtomicU64,
    cache_hits: AtomicU64,
    nodes_seeded: AtomicU64,
    retries: AtomicU64,
    nodes_expanded: AtomicU64,
    branches_pruned: AtomicU64,
    artifacts_kept: AtomicU64,
    artifacts_skipped: AtomicU64,
    branch_failures: AtomicU64,
    projects_resumed: AtomicU64,
}

macro_rules! counter {
    ($record:ident, $field:ident) => {
        pub fn $record(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl RunStats {
    counter!(record_api_call, api_calls);
    counter!(record_cache_hit, cache_hits);
    counter!(record_seeded, nodes_seeded);
    counter!(record_retry, retries);
    counter!(record_expanded, nodes_expanded);
    counter!(record_pruned, branches_pruned);
    counter!(record_kept, artifacts_kept);
    counter!(record_skipped, artifacts_skipped);
    counter!(record_failure, branch_failures);
    counter!(record_resumed, projects_resumed);

    pub fn snapshot(&self) -> StatsSnapshot {
        let api_calls = self.api_calls.load(Ordering::Relaxed);
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let lookups = api_calls + cache_hits;
        StatsSnapshot {
            api_calls,
            cache_hits,
            nodes_seeded: self.nodes_seeded.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            nodes_expanded: self.nodes_expanded.load(Ordering::Relaxed),
            branches_pruned: self.branches_pruned.load(Ordering::Relaxed),
            artifacts_kept: self.artifacts_kept.load(Ordering::Relaxed),
            artifacts_skipped: self.artifacts_skipped.load(Ordering::Relaxed),
            branch_failures: self.branch_failures.load(Ordering::Relaxed),
            projects_resumed: self.projects_resumed.load(Ordering::Relaxed),
            cache_efficiency: if lookups == 0 {
                0.0
            } else {
                cache_hits as f64 / lookups as f64
            },
        }
    }
}

/// Point-in-time copy of [`RunStats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub api_calls: u64,
    pub cache_hits: u64,
    /// Nodes cached from a deeper response without a request of their own.
    #[serde(default)]
    pub nodes_seeded: u64,
    pub retries: u64,
    pub nodes_expanded: u64,
    pub branches_pruned: u64,
    pub artifacts_kept: u64,
    pub artifacts_skipped: u64,
    pub branch_failures: u64,
    /// Projects taken over from a checkpoint instead of being traversed.
    #[serde(default)]
    pub projects_resumed: u64,
    pub cache_efficiency: f64,
}

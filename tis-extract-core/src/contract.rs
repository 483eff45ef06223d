//! # contract: the seam between the engine and the remote tree API
//!
//! The orchestrator never talks HTTP directly. It asks a [`TreeApi`] for one
//! node at a time, and the [`crate::client::TreeClient`] layered on top adds
//! retries, backoff and the per-run cache.
//!
//! ## Implementors
//! - [`crate::http::HttpTreeApi`]: reqwest against the real service.
//! - `MockTreeApi`: generated by mockall for tests, exported with the
//!   `test-export-mocks` feature so integration tests and dependent crates
//!   can script responses and assert call counts.

use async_trait::async_trait;

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

use crate::error::FetchError;
use crate::model::RawNode;

/// Fetches a single node, including its children, from the tree API.
///
/// One call is exactly one request: implementors must not retry or cache.
/// A response may reach several levels deep. Every `children` list it carries
/// must be complete; nodes whose children were not fetched carry `None`.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait TreeApi: Send + Sync {
    async fn get_node(&self, node_id: &str) -> Result<RawNode, FetchError>;
}

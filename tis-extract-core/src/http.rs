//! reqwest implementation of [`TreeApi`].
//!
//! Responses reach `children_level` levels below the requested node. Child
//! lists at that boundary are cleared, so a `children` list in a returned
//! node is always complete. With `adaptive_depth` a node that timed out or
//! answered slower than `slow_response_ms` is requested one level shallower
//! from then on, down to direct children only.

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{Client, StatusCode};
use std::env;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::ApiConfig;
use crate::contract::TreeApi;
use crate::error::{FetchError, SetupError};
use crate::model::RawNode;

const MIN_CHILDREN_LEVEL: u32 = 1;

pub struct HttpTreeApi {
    client: Client,
    base_url: String,
    children_level: u32,
    adaptive_depth: bool,
    slow_response: Duration,
    depth_overrides: DashMap<String, u32>,
    token: Option<String>,
}

impl HttpTreeApi {
    /// Builds the client from config, reading the bearer token from the
    /// environment variable named by `token_env` when one is configured.
    pub fn new(config: &ApiConfig) -> Result<Self, SetupError> {
        let token = match &config.token_env {
            Some(var) => match env::var(var) {
                Ok(token) => Some(token),
                Err(e) => {
                    error!(env_var = %var, error = ?e, "API token variable missing in environment");
                    return Err(SetupError::MissingToken(var.clone()));
                }
            },
            None => None,
        };

        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.read_timeout())
            .build()?;

        info!(
            base_url = %config.base_url,
            children_level = config.children_level,
            adaptive_depth = config.adaptive_depth,
            token_set = token.is_some(),
            "Initialized HttpTreeApi"
        );
        Ok(HttpTreeApi {
            client,
            base_url: config.base_url.clone(),
            children_level: config.children_level.max(MIN_CHILDREN_LEVEL),
            adaptive_depth: config.adaptive_depth,
            slow_response: config.slow_response(),
            depth_overrides: DashMap::new(),
            token,
        })
    }

    fn node_url(&self, node_id: &str) -> String {
        format!("{}{}", self.base_url, node_id)
    }

    /// Children level the next request for `node_id` uses.
    pub fn depth_for(&self, node_id: &str) -> u32 {
        self.depth_overrides
            .get(node_id)
            .map(|depth| *depth)
            .unwrap_or(self.children_level)
    }

    fn lower_depth(&self, node_id: &str, depth: u32, cause: &str) {
        if !self.adaptive_depth || depth <= MIN_CHILDREN_LEVEL {
            return;
        }
        let lowered = depth - 1;
        self.depth_overrides.insert(node_id.to_string(), lowered);
        warn!(node_id, from = depth, to = lowered, cause, "Reducing children level for node");
    }

    async fn request(&self, node_id: &str, depth: u32) -> Result<RawNode, FetchError> {
        let url = self.node_url(node_id);
        let children_level = depth.to_string();
        let mut request = self.client.get(&url).query(&[
            ("mappingType", "TCI"),
            ("childrenlevel", children_level.as_str()),
            ("attributes", "true"),
        ]);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        debug!(node_id, url = %url, depth, "GET node");
        let resp = request.send().await.map_err(map_transport_error)?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(FetchError::Api {
                status: status.as_u16(),
                message: if text.is_empty() {
                    status
                        .canonical_reason()
                        .unwrap_or("unknown status")
                        .to_string()
                } else {
                    text
                },
            });
        }

        let body = resp.bytes().await.map_err(map_transport_error)?;
        if status == StatusCode::NO_CONTENT || body.is_empty() {
            return Err(FetchError::Parse(format!("empty body for node {node_id}")));
        }
        serde_json::from_slice::<RawNode>(&body)
            .map_err(|e| FetchError::Parse(format!("node {node_id}: {e}")))
    }
}

fn map_transport_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout(e.to_string())
    } else if e.is_decode() {
        FetchError::Parse(e.to_string())
    } else {
        FetchError::Network(e.to_string())
    }
}

#[async_trait]
impl TreeApi for HttpTreeApi {
    async fn get_node(&self, node_id: &str) -> Result<RawNode, FetchError> {
        let depth = self.depth_for(node_id);
        let started = Instant::now();
        let mut node = match self.request(node_id, depth).await {
            Ok(node) => node,
            Err(e @ FetchError::Timeout(_)) => {
                self.lower_depth(node_id, depth, "timeout");
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        let elapsed = started.elapsed();
        if elapsed > self.slow_response {
            debug!(node_id, depth, elapsed_ms = elapsed.as_millis() as u64, "Slow response");
            self.lower_depth(node_id, depth, "slow response");
        }
        node.truncate(depth);
        Ok(node)
    }
}

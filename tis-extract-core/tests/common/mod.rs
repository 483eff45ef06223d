#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tis_extract_core::contract::TreeApi;
use tis_extract_core::error::FetchError;
use tis_extract_core::model::RawNode;

/// In-memory tree keyed by node id. Every `get_node` is logged in call order.
#[derive(Default)]
pub struct FakeTree {
    nodes: HashMap<String, Value>,
    failures: HashMap<String, FetchError>,
    delay: Option<Duration>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeTree {
    pub fn new() -> Self {
        FakeTree::default()
    }

    /// Registers a node and the (shallow) children its response lists.
    pub fn node(mut self, id: &str, name: &str, children: Vec<Value>) -> Self {
        self.nodes.insert(
            id.to_string(),
            json!({ "rId": id, "name": name, "children": children }),
        );
        self
    }

    pub fn failing(mut self, id: &str, error: FetchError) -> Self {
        self.failures.insert(id.to_string(), error);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, id: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == id).count()
    }
}

#[async_trait]
impl TreeApi for FakeTree {
    async fn get_node(&self, node_id: &str) -> Result<RawNode, FetchError> {
        self.calls.lock().unwrap().push(node_id.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.failures.get(node_id) {
            return Err(error.clone());
        }
        match self.nodes.get(node_id) {
            Some(value) => Ok(serde_json::from_value(value.clone()).unwrap()),
            None => Err(FetchError::Api {
                status: 404,
                message: format!("node {node_id} not found"),
            }),
        }
    }
}

/// A folder entry as listed in its parent's `children`.
pub fn folder(id: &str, name: &str) -> Value {
    json!({ "rId": id, "name": name })
}

/// A folder entry that embeds its own complete child list, as in a deeper response.
pub fn folder_with(id: &str, name: &str, children: Vec<Value>) -> Value {
    json!({ "rId": id, "name": name, "children": children })
}

/// An artifact entry as listed in its parent's `children`.
pub fn artifact(id: &str, name: &str, component: &str, created: &str) -> Value {
    json!({
        "rId": id,
        "name": name,
        "created": created,
        "componentType": { "name": "vVeh" },
        "component": { "name": component },
        "attributes": [
            { "name": "artifact", "value": "true" },
            { "name": "lifeCycleStatus", "value": "released" },
            { "name": "user", "value": "Alice" }
        ]
    })
}

pub const LCO_NAME: &str = "VW vVeh_LCO : DMG1211V07C1935 / M22J71 [] 110kW_OPF_DQ_CANv7";

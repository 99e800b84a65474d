use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use flowchat_core::ChatNodeConfig;

/// Source of per-workflow chat node configuration.
pub trait WorkflowCatalog: Send + Sync {
    fn chat_node(&self, workflow_id: &str) -> Option<Arc<ChatNodeConfig>>;
}

/// Chat nodes held in memory, typically loaded from the config file.
#[derive(Default)]
pub struct StaticWorkflows {
    nodes: RwLock<HashMap<String, Arc<ChatNodeConfig>>>,
}

impl StaticWorkflows {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_nodes(nodes: impl IntoIterator<Item = (String, ChatNodeConfig)>) -> Self {
        let nodes = nodes.into_iter().map(|(id, cfg)| (id, Arc::new(cfg))).collect();
        Self { nodes: RwLock::new(nodes) }
    }

    /// Insert or replace a node. A replacement that does not advance the
    /// revision gets one bumped, so open sessions pick the edit up.
    pub fn upsert(&self, workflow_id: impl Into<String>, mut config: ChatNodeConfig) -> u64 {
        let mut nodes = self.nodes.write().unwrap_or_else(|e| e.into_inner());
        let workflow_id = workflow_id.into();
        if let Some(previous) = nodes.get(&workflow_id) {
            if config.revision <= previous.revision {
                config.revision = previous.revision + 1;
            }
        }
        let revision = config.revision;
        nodes.insert(workflow_id, Arc::new(config));
        revision
    }

    pub fn workflow_ids(&self) -> Vec<String> {
        let nodes = self.nodes.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = nodes.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl WorkflowCatalog for StaticWorkflows {
    fn chat_node(&self, workflow_id: &str) -> Option<Arc<ChatNodeConfig>> {
        self.nodes.read().unwrap_or_else(|e| e.into_inner()).get(workflow_id).cloned()
    }
}

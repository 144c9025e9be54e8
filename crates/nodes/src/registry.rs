//! Node executor registry: maps a node's declared `type` to its capability.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::{ExecutableNode, NodePolicy};

/// A registered capability together with its execution policy.
#[derive(Clone)]
pub struct RegisteredNode {
    pub node: Arc<dyn ExecutableNode>,
    pub policy: NodePolicy,
}

/// Maps `node_type` strings to `ExecutableNode` implementations.
///
/// Adding a node type is registering a new entry; the engine never inspects
/// a capability's internals.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    entries: HashMap<String, RegisteredNode>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `node` under `node_type` with the default policy.
    ///
    /// Re-registering a type replaces the previous entry.
    pub fn register(&mut self, node_type: impl Into<String>, node: Arc<dyn ExecutableNode>) {
        self.register_with_policy(node_type, node, NodePolicy::default());
    }

    pub fn register_with_policy(
        &mut self,
        node_type: impl Into<String>,
        node: Arc<dyn ExecutableNode>,
        policy: NodePolicy,
    ) {
        self.entries
            .insert(node_type.into(), RegisteredNode { node, policy });
    }

    /// Builder-style variant of [`NodeRegistry::register_with_policy`].
    pub fn with(
        mut self,
        node_type: impl Into<String>,
        node: Arc<dyn ExecutableNode>,
        policy: NodePolicy,
    ) -> Self {
        self.register_with_policy(node_type, node, policy);
        self
    }

    pub fn get(&self, node_type: &str) -> Option<&RegisteredNode> {
        self.entries.get(node_type)
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.entries.contains_key(node_type)
    }

    /// Registered type tags, sorted.
    pub fn node_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("node_types", &self.node_types())
            .finish()
    }
}

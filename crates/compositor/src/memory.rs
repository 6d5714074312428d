use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;

use xsheet::Cel;

use crate::{GraphBackend, GraphError, NodeId, NodeKind, Pad, PropertyValue};

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryNode {
    pub kind: NodeKind,
    pub inputs: BTreeMap<Pad, NodeId>,
    pub properties: BTreeMap<String, PropertyValue>,
}

/// Graph backend that only records structure. Useful headless and for
/// inspecting what a real compositor would be asked to render.
#[derive(Debug, Clone, Default)]
pub struct MemoryGraph {
    nodes: HashMap<NodeId, MemoryNode>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&MemoryNode> {
        self.nodes.get(&id)
    }

    pub fn producer(&self, consumer: NodeId, pad: Pad) -> Option<NodeId> {
        self.nodes.get(&consumer)?.inputs.get(&pad).copied()
    }

    pub fn property(&self, node: NodeId, name: &str) -> Option<&PropertyValue> {
        self.nodes.get(&node)?.properties.get(name)
    }

    /// Indented tree of operations reachable from `root` through its pads.
    pub fn describe(&self, root: NodeId) -> String {
        let mut out = String::new();
        self.describe_node(&mut out, root, None, 0);
        out
    }

    fn describe_node(&self, out: &mut String, id: NodeId, pad: Option<Pad>, depth: usize) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        let indent = "  ".repeat(depth);
        let pad = pad.map(|p| p.to_string()).unwrap_or_default();
        let _ = match node.kind {
            NodeKind::Source { cel } => writeln!(out, "{indent}{pad} source {cel}"),
            kind => writeln!(out, "{indent}{pad} {}", kind.operation()),
        };
        for (pad, producer) in &node.inputs {
            self.describe_node(out, *producer, Some(*pad), depth + 1);
        }
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut MemoryNode, GraphError> {
        self.nodes.get_mut(&id).ok_or(GraphError::NodeNotFound(id))
    }
}

impl GraphBackend for MemoryGraph {
    fn create_node(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId::new();
        self.nodes.insert(
            id,
            MemoryNode {
                kind,
                inputs: BTreeMap::new(),
                properties: BTreeMap::new(),
            },
        );
        id
    }

    fn create_source(&mut self, cel: &Cel) -> NodeId {
        self.create_node(NodeKind::Source { cel: cel.id() })
    }

    fn remove_node(&mut self, node: NodeId) -> Result<(), GraphError> {
        self.nodes
            .remove(&node)
            .ok_or(GraphError::NodeNotFound(node))?;
        for other in self.nodes.values_mut() {
            other.inputs.retain(|_, producer| *producer != node);
        }
        Ok(())
    }

    fn connect(&mut self, producer: NodeId, consumer: NodeId, pad: Pad) -> Result<(), GraphError> {
        if !self.nodes.contains_key(&producer) {
            return Err(GraphError::NodeNotFound(producer));
        }
        self.node_mut(consumer)?.inputs.insert(pad, producer);
        Ok(())
    }

    fn disconnect(&mut self, consumer: NodeId, pad: Pad) -> Result<(), GraphError> {
        self.node_mut(consumer)?.inputs.remove(&pad);
        Ok(())
    }

    fn set_property(
        &mut self,
        node: NodeId,
        name: &str,
        value: PropertyValue,
    ) -> Result<(), GraphError> {
        self.node_mut(node)?
            .properties
            .insert(name.to_string(), value);
        Ok(())
    }
}

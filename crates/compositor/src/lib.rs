//! Compositing-graph wiring for the exposure sheet.
//!
//! The graph itself lives in a [`GraphBackend`]; [`GraphController`] keeps its
//! edges in step with the sheet's playhead and onion-skin settings.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;
use xsheet::{Cel, CelId};

mod controller;
mod memory;

pub use controller::*;
pub use memory::*;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Pad {
    Input,
    Aux,
}

impl fmt::Display for Pad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pad::Input => f.write_str("input"),
            Pad::Aux => f.write_str("aux"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    /// Pass-through output node.
    Nop,
    /// Composites `aux` over `input`.
    Over,
    /// Scales alpha by its `value` property.
    Opacity,
    /// Solid fill sized by `width`/`height`.
    Rectangle,
    /// Pixels of one cel's surface.
    Source { cel: CelId },
}

impl NodeKind {
    pub fn operation(&self) -> &'static str {
        match self {
            NodeKind::Nop => "nop",
            NodeKind::Over => "over",
            NodeKind::Opacity => "opacity",
            NodeKind::Rectangle => "rectangle",
            NodeKind::Source { .. } => "source",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Number(f64),
    Text(String),
}

/// Minimal node-graph surface a compositing library has to provide.
///
/// Connecting a pad that already has a producer replaces it.
pub trait GraphBackend {
    fn create_node(&mut self, kind: NodeKind) -> NodeId;
    /// Node exposing `cel`'s surface as an image producer.
    fn create_source(&mut self, cel: &Cel) -> NodeId;
    fn remove_node(&mut self, node: NodeId) -> Result<(), GraphError>;
    fn connect(&mut self, producer: NodeId, consumer: NodeId, pad: Pad) -> Result<(), GraphError>;
    fn disconnect(&mut self, consumer: NodeId, pad: Pad) -> Result<(), GraphError>;
    fn set_property(
        &mut self,
        node: NodeId,
        name: &str,
        value: PropertyValue,
    ) -> Result<(), GraphError>;
}

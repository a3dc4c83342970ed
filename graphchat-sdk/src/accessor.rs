//! Document operations on a connected [`GraphChatClient`].
//!
//! Every operation except the two validators checks the connection first and
//! fails with [`SdkError::NotConnected`](crate::SdkError::NotConnected) otherwise. Edits are local CRDT
//! transactions: they return as soon as they are applied locally and reach
//! peers asynchronously.

use serde_json::Value;

use crate::client::GraphChatClient;
use crate::error::Result;
use crate::model::{self, GraphNode, Message, NodeUpdate};
use crate::structure;

impl GraphChatClient {
    // ─── Structure text ────────────────────────────────────────────

    /// Current XYZ structure text.
    pub fn xyz_text(&self) -> Result<String> {
        self.ensure_connected()?;
        Ok(self.document().text())
    }

    /// Replace the whole XYZ text in one change.
    pub fn set_xyz_text(&self, content: &str) -> Result<()> {
        self.ensure_connected()?;
        self.document().set_text(content);
        log::debug!("Replaced xyz text ({} bytes)", content.len());
        Ok(())
    }

    /// Insert `chunk` at byte offset `index`.
    pub fn insert_xyz_text(&self, index: u32, chunk: &str) -> Result<()> {
        self.ensure_connected()?;
        self.document().insert_text(index, chunk)
    }

    /// Delete `length` bytes starting at byte offset `start`.
    ///
    /// Only the addressed range is removed; a range reaching past the end of
    /// the text is rejected with [`SdkError::IndexOutOfBounds`](crate::SdkError::IndexOutOfBounds).
    pub fn delete_xyz_text(&self, start: u32, length: u32) -> Result<()> {
        self.ensure_connected()?;
        self.document().delete_text(start, length)
    }

    /// Loose XYZ shape check. Needs no connection.
    pub fn validate_xyz_format(&self, text: &str) -> bool {
        structure::validate_xyz_format(text)
    }

    // ─── Messages ──────────────────────────────────────────────────

    pub fn messages(&self) -> Result<Vec<Message>> {
        self.ensure_connected()?;
        Ok(self.document().messages())
    }

    /// Append a message stamped with the current time and return it.
    pub fn add_message(&self, sender: &str, content: &str) -> Result<Message> {
        self.ensure_connected()?;
        let message = Message::new(sender, content);
        self.document().push_message(&message)?;
        log::debug!("Added message {} from {sender}", message.id);
        Ok(message)
    }

    pub fn clear_messages(&self) -> Result<()> {
        self.ensure_connected()?;
        self.document().clear_messages();
        Ok(())
    }

    pub fn message_by_id(&self, id: i64) -> Result<Option<Message>> {
        self.ensure_connected()?;
        Ok(self.document().message_by_id(id))
    }

    /// Remove the first message with `id`. `Ok(false)` when there is none.
    pub fn delete_message_by_id(&self, id: i64) -> Result<bool> {
        self.ensure_connected()?;
        Ok(self.document().delete_message(id))
    }

    // ─── Graph ─────────────────────────────────────────────────────

    pub fn graph_nodes(&self) -> Result<Vec<GraphNode>> {
        self.ensure_connected()?;
        Ok(self.document().nodes())
    }

    /// Append `node`. Empty edge references are dropped before storing.
    ///
    /// Ids are not checked for uniqueness.
    pub fn add_graph_node(&self, node: GraphNode) -> Result<GraphNode> {
        self.ensure_connected()?;
        let node = node.normalized();
        self.document().push_node(&node)?;
        log::debug!("Added graph node '{}'", node.id);
        Ok(node)
    }

    /// Merge `update` over the node with `node_id`, keeping its position.
    /// `Ok(false)` when there is no such node. A merge that would leave an
    /// invalid node fails with [`SdkError::InvalidRecord`](crate::SdkError::InvalidRecord).
    pub fn update_graph_node(&self, node_id: &str, update: NodeUpdate) -> Result<bool> {
        self.ensure_connected()?;
        self.document().update_node(node_id, update.into_fields())
    }

    pub fn delete_graph_node(&self, node_id: &str) -> Result<bool> {
        self.ensure_connected()?;
        Ok(self.document().delete_node(node_id))
    }

    pub fn graph_node_by_id(&self, node_id: &str) -> Result<Option<GraphNode>> {
        self.ensure_connected()?;
        Ok(self.document().node_by_id(node_id))
    }

    pub fn clear_graph(&self) -> Result<()> {
        self.ensure_connected()?;
        self.document().clear_nodes();
        Ok(())
    }

    /// Replace the whole graph in one change.
    pub fn set_graph_nodes(&self, nodes: &[GraphNode]) -> Result<()> {
        self.ensure_connected()?;
        let nodes: Vec<GraphNode> = nodes.iter().cloned().map(GraphNode::normalized).collect();
        self.document().replace_nodes(&nodes)
    }

    /// Whether `node` is an object carrying `id` and `name`. Needs no connection.
    pub fn validate_graph_node(&self, node: &Value) -> bool {
        model::validate_graph_node(node)
    }
}

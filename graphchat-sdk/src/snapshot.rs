//! Whole-document snapshots as JSON.
//!
//! Snapshot files are pretty-printed [`DocumentState`] objects:
//!
//! ```json
//! {
//!   "xyz_text": "3\nwater\n...",
//!   "messages": [{"id": 1755220895624, "date": "...", "sender": "You", "content": "..."}],
//!   "graph_nodes": [{"id": "input", "name": "Input Layer", "description": ""}],
//!   "is_connected": true
//! }
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde_json::Value;

use crate::client::GraphChatClient;
use crate::error::{Result, SdkError};
use crate::model::{validate_graph_node, DocumentState, GraphNode, Message};

impl GraphChatClient {
    /// Capture the current document.
    pub fn export_state(&self) -> Result<DocumentState> {
        self.ensure_connected()?;
        let document = self.document();
        Ok(DocumentState {
            xyz_text: document.text(),
            messages: document.messages(),
            graph_nodes: document.nodes(),
            is_connected: true,
        })
    }

    /// Load a snapshot object into the document.
    ///
    /// Each present key replaces its part of the document; absent keys leave
    /// it untouched. Messages without string `sender` and `content` and graph
    /// entries without `id` and `name` are skipped. Imported messages are
    /// re-stamped with fresh ids and dates.
    pub fn import_state(&self, snapshot: &Value) -> Result<()> {
        self.ensure_connected()?;
        let fields = snapshot
            .as_object()
            .ok_or_else(|| SdkError::MalformedSnapshot("top level is not an object".into()))?;

        let text = match fields.get("xyz_text") {
            None => None,
            Some(Value::String(text)) => Some(text.as_str()),
            Some(_) => return Err(malformed("xyz_text", "a string")),
        };
        let messages = match fields.get("messages") {
            None => None,
            Some(Value::Array(entries)) => Some(import_messages(entries)),
            Some(_) => return Err(malformed("messages", "an array")),
        };
        let nodes = match fields.get("graph_nodes") {
            None => None,
            Some(Value::Array(entries)) => Some(import_nodes(entries)),
            Some(_) => return Err(malformed("graph_nodes", "an array")),
        };

        let document = self.document();
        if let Some(text) = text {
            document.set_text(text);
        }
        if let Some(messages) = messages {
            document.replace_messages(&messages)?;
            log::info!("Imported {} messages", messages.len());
        }
        if let Some(nodes) = nodes {
            document.replace_nodes(&nodes)?;
            log::info!("Imported {} graph nodes", nodes.len());
        }
        Ok(())
    }

    /// Write [`export_state`](Self::export_state) to `path` as indented JSON.
    pub fn export_to_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let state = self.export_state()?;
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, &state)?;
        writer.flush()?;
        log::info!("Exported document to {}", path.display());
        Ok(())
    }

    /// Read a snapshot file and [`import_state`](Self::import_state) it.
    pub fn load_from_json(&self, path: impl AsRef<Path>) -> Result<()> {
        self.ensure_connected()?;
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let snapshot: Value = serde_json::from_reader(reader)?;
        self.import_state(&snapshot)?;
        log::info!("Loaded document from {}", path.display());
        Ok(())
    }
}

fn malformed(key: &str, expected: &str) -> SdkError {
    SdkError::MalformedSnapshot(format!("`{key}` must be {expected}"))
}

fn import_messages(entries: &[Value]) -> Vec<Message> {
    entries
        .iter()
        .filter_map(|entry| {
            let sender = entry.get("sender").and_then(Value::as_str);
            let content = entry.get("content").and_then(Value::as_str);
            match (sender, content) {
                (Some(sender), Some(content)) => Some(Message::new(sender, content)),
                _ => {
                    log::warn!("Skipping snapshot message without sender/content");
                    None
                }
            }
        })
        .collect()
}

fn import_nodes(entries: &[Value]) -> Vec<GraphNode> {
    entries
        .iter()
        .filter(|entry| validate_graph_node(entry))
        .filter_map(|entry| match serde_json::from_value::<GraphNode>(entry.clone()) {
            Ok(node) => Some(node.normalized()),
            Err(e) => {
                log::warn!("Skipping snapshot graph node: {e}");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_import_messages_skips_incomplete_and_restamps() {
        let entries = vec![
            json!({"id": 1, "date": "2020-01-01T00:00:00Z", "sender": "You", "content": "kept"}),
            json!({"sender": "You"}),
            json!({"content": "orphan"}),
            json!({"sender": 5, "content": "numeric sender"}),
        ];
        let messages = import_messages(&entries);

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "kept");
        assert_ne!(messages[0].id, 1);
        assert_ne!(messages[0].date, "2020-01-01T00:00:00Z");
    }

    #[test]
    fn test_import_nodes_filters_invalid() {
        let entries = vec![
            json!({"id": "a", "name": "A", "in_node_id": "", "out_node_id": []}),
            json!({"id": "b"}),
            json!({"id": "c", "name": 3}),
            json!("not an object"),
        ];
        let nodes = import_nodes(&entries);

        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].id, "a");
        assert!(nodes[0].in_node_id.is_none());
        assert!(nodes[0].out_node_id.is_none());
    }

    #[test]
    fn test_snapshot_operations_require_connection() {
        let client = GraphChatClient::default();
        assert!(matches!(client.export_state(), Err(SdkError::NotConnected)));
        assert!(matches!(
            client.import_state(&json!({})),
            Err(SdkError::NotConnected)
        ));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        assert!(matches!(client.export_to_json(&path), Err(SdkError::NotConnected)));
        assert!(!path.exists());
        assert!(matches!(client.load_from_json(&path), Err(SdkError::NotConnected)));
    }

    #[test]
    fn test_document_state_serializes_expected_keys() {
        let state = DocumentState {
            xyz_text: "1\nx\nH 0 0 0".into(),
            messages: vec![],
            graph_nodes: vec![GraphNode::new("a", "A")],
            is_connected: true,
        };
        let value = serde_json::to_value(&state).unwrap();
        let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 4);
        assert_eq!(value["graph_nodes"][0], json!({"id": "a", "name": "A", "description": ""}));
    }
}

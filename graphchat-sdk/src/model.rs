//! Record types stored in the shared document.
//!
//! Records are plain JSON objects inside the `messages` and `graph` arrays so
//! that browser peers (Yjs) and this SDK read and write the same shape.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A chat message in the `messages` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Epoch milliseconds at creation. Not deduplicated.
    pub id: i64,
    /// ISO-8601 creation timestamp
    #[serde(default, deserialize_with = "lenient_date")]
    pub date: String,
    pub sender: String,
    pub content: String,
}

impl Message {
    /// Stamp a new message with the current time.
    pub fn new(sender: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: now.timestamp_millis(),
            date: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            sender: sender.into(),
            content: content.into(),
        }
    }
}

/// Browser peers push a JS `Date`, which reaches us as `{}`. Anything that
/// isn't a string becomes an empty date instead of failing the record.
fn lenient_date<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        _ => String::new(),
    })
}

/// A node in the `graph` array. Edges are id references carried by the node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_node_id: Option<Vec<String>>,
    /// Fields written by other peers that this SDK doesn't model
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GraphNode {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            in_node_id: None,
            out_node_id: None,
            extra: Map::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_in_node(mut self, in_node_id: impl Into<String>) -> Self {
        self.in_node_id = Some(in_node_id.into());
        self
    }

    pub fn with_out_nodes<I, S>(mut self, out_node_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.out_node_id = Some(out_node_ids.into_iter().map(Into::into).collect());
        self
    }

    /// Drop empty edge references so they are omitted from the stored record.
    pub(crate) fn normalized(mut self) -> Self {
        if self.in_node_id.as_deref().is_some_and(str::is_empty) {
            self.in_node_id = None;
        }
        if self.out_node_id.as_ref().is_some_and(Vec::is_empty) {
            self.out_node_id = None;
        }
        self
    }
}

/// Partial field set merged over an existing [`GraphNode`].
///
/// `None` fields are left untouched; `extra` entries are written verbatim.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub in_node_id: Option<String>,
    pub out_node_id: Option<Vec<String>>,
    pub extra: Map<String, Value>,
}

impl NodeUpdate {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn in_node(mut self, in_node_id: impl Into<String>) -> Self {
        self.in_node_id = Some(in_node_id.into());
        self
    }

    pub fn out_nodes<I, S>(mut self, out_node_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.out_node_id = Some(out_node_ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Flatten into the JSON fields to merge.
    pub fn into_fields(self) -> Map<String, Value> {
        let mut fields = self.extra;
        if let Some(name) = self.name {
            fields.insert("name".into(), Value::String(name));
        }
        if let Some(description) = self.description {
            fields.insert("description".into(), Value::String(description));
        }
        if let Some(in_node_id) = self.in_node_id {
            fields.insert("in_node_id".into(), Value::String(in_node_id));
        }
        if let Some(out) = self.out_node_id {
            fields.insert(
                "out_node_id".into(),
                Value::Array(out.into_iter().map(Value::String).collect()),
            );
        }
        fields
    }
}

impl From<Map<String, Value>> for NodeUpdate {
    fn from(extra: Map<String, Value>) -> Self {
        Self {
            extra,
            ..Self::default()
        }
    }
}

/// Point-in-time copy of the whole document, as written to snapshot files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentState {
    pub xyz_text: String,
    pub messages: Vec<Message>,
    pub graph_nodes: Vec<GraphNode>,
    pub is_connected: bool,
}

/// A graph record is usable when it carries both `id` and `name`.
pub fn validate_graph_node(node: &Value) -> bool {
    node.as_object()
        .is_some_and(|fields| fields.contains_key("id") && fields.contains_key("name"))
}

//! Typed access to the shared Yrs document.
//!
//! ```text
//! yrs::Doc
//!   ├── "xyz"      Y.Text   XYZ structure listing
//!   ├── "messages" Y.Array  chat messages (JSON objects)
//!   └── "graph"    Y.Array  graph nodes    (JSON objects)
//! ```
//!
//! Records are located by their `id` field with a linear scan. Compound
//! edits (replace text, replace graph, update a node in place) run inside a
//! single transaction so peers and observers see one update.
//!
//! Change listeners are queued while the transaction commits and invoked
//! once the document is unlocked again, so a listener may read or edit it.
//!
//! This layer performs no connection checks; see [`crate::GraphChatClient`].

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use yrs::types::ToJson;
use yrs::updates::decoder::Decode;
use yrs::{
    Array, ArrayRef, Doc, GetString, OffsetKind, Options, Origin, ReadTxn, StateVector,
    Subscription, Text, TextRef, Transact, TransactionMut, Update,
};

use crate::convert::{any_to_json, json_to_any};
use crate::error::{Result, SdkError};
use crate::model::{GraphNode, Message};
use crate::observer::{ChangeOrigin, DocumentChange};

/// Root name of the XYZ structure text.
pub const XYZ_TEXT: &str = "xyz";
/// Root name of the chat message array.
pub const MESSAGES: &str = "messages";
/// Root name of the graph node array.
pub const GRAPH: &str = "graph";

/// Transaction origin attached to updates received from the sync transport.
pub(crate) const REMOTE_ORIGIN: &str = "graphchat-remote";

type ChangeFn = dyn Fn(&DocumentChange) + Send + Sync + 'static;

/// Changes committed but not yet handed to their listener.
#[derive(Default)]
struct ChangeQueue {
    pending: Mutex<VecDeque<(Arc<ChangeFn>, DocumentChange)>>,
    // Held while delivering; re-entered when a listener edits the document
    delivering: ReentrantMutex<()>,
}

impl ChangeQueue {
    fn push(&self, listener: Arc<ChangeFn>, change: DocumentChange) {
        self.pending.lock().push_back((listener, change));
    }

    /// Run listeners for everything queued. On return, every change
    /// queued before the call has been delivered.
    fn deliver(&self) {
        let _turn = self.delivering.lock();
        loop {
            let next = self.pending.lock().pop_front();
            let Some((listener, change)) = next else {
                break;
            };
            listener(&change);
        }
    }
}

/// The shared document. Clones refer to the same underlying `yrs::Doc`.
#[derive(Clone)]
pub struct SharedDocument {
    doc: Doc,
    changes: Arc<ChangeQueue>,
}

impl Default for SharedDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedDocument {
    pub fn new() -> Self {
        // Text positions are UTF-8 byte offsets
        let options = Options {
            offset_kind: OffsetKind::Bytes,
            ..Options::default()
        };
        Self {
            doc: Doc::with_options(options),
            changes: Arc::new(ChangeQueue::default()),
        }
    }

    /// The underlying CRDT document.
    pub fn doc(&self) -> &Doc {
        &self.doc
    }

    /// Run `edit` in a local transaction, then deliver the resulting change.
    fn write<R>(&self, edit: impl FnOnce(&mut TransactionMut<'_>) -> R) -> R {
        let result = {
            let mut txn = self.doc.transact_mut();
            edit(&mut txn)
        };
        self.changes.deliver();
        result
    }

    /// Deliver changes committed through [`doc`](Self::doc) directly.
    pub fn flush_changes(&self) {
        self.changes.deliver();
    }

    fn xyz(&self) -> TextRef {
        self.doc.get_or_insert_text(XYZ_TEXT)
    }

    fn messages_array(&self) -> ArrayRef {
        self.doc.get_or_insert_array(MESSAGES)
    }

    fn graph_array(&self) -> ArrayRef {
        self.doc.get_or_insert_array(GRAPH)
    }

    /// Make sure the three root structures exist.
    pub fn bind(&self) {
        self.xyz();
        self.messages_array();
        self.graph_array();
    }

    // ─── Structure text ────────────────────────────────────────────

    pub fn text(&self) -> String {
        let text = self.xyz();
        let txn = self.doc.transact();
        text.get_string(&txn)
    }

    /// Replace the whole text.
    pub fn set_text(&self, content: &str) {
        let text = self.xyz();
        self.write(|txn| {
            let len = text.len(&*txn);
            if len > 0 {
                text.remove_range(txn, 0, len);
            }
            if !content.is_empty() {
                text.insert(txn, 0, content);
            }
        });
    }

    pub fn insert_text(&self, index: u32, chunk: &str) -> Result<()> {
        let text = self.xyz();
        self.write(|txn| {
            let current = text.get_string(&*txn);
            check_boundary(&current, index)?;
            if !chunk.is_empty() {
                text.insert(txn, index, chunk);
            }
            Ok(())
        })
    }

    /// Delete `len` bytes starting at `start`.
    pub fn delete_text(&self, start: u32, len: u32) -> Result<()> {
        let text = self.xyz();
        self.write(|txn| {
            let current = text.get_string(&*txn);
            check_boundary(&current, start)?;
            let end = start.checked_add(len).ok_or(SdkError::IndexOutOfBounds {
                index: u32::MAX,
                len: current.len() as u32,
            })?;
            check_boundary(&current, end)?;
            if len > 0 {
                text.remove_range(txn, start, len);
            }
            Ok(())
        })
    }

    // ─── Messages ──────────────────────────────────────────────────

    pub fn messages(&self) -> Vec<Message> {
        let array = self.messages_array();
        let txn = self.doc.transact();
        read_records(&array, &txn, MESSAGES)
    }

    pub fn push_message(&self, message: &Message) -> Result<()> {
        let record = json_to_any(&serde_json::to_value(message)?);
        let array = self.messages_array();
        self.write(|txn| {
            array.push_back(txn, record);
        });
        Ok(())
    }

    /// Clear the array and append `messages` in one transaction.
    pub fn replace_messages(&self, messages: &[Message]) -> Result<()> {
        let records = messages
            .iter()
            .map(|m| serde_json::to_value(m).map(|v| json_to_any(&v)))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let array = self.messages_array();
        self.write(|txn| replace_all(&array, txn, records));
        Ok(())
    }

    pub fn clear_messages(&self) {
        let array = self.messages_array();
        self.write(|txn| replace_all(&array, txn, Vec::new()));
    }

    /// The first message whose `id` equals `id`.
    pub fn message_by_id(&self, id: i64) -> Option<Message> {
        let array = self.messages_array();
        let txn = self.doc.transact();
        let (index, record) = find_record(&array, &txn, |r| has_number_id(r, id))?;
        decode_record(record, MESSAGES, index)
    }

    /// Remove the first message with `id`. Returns whether one was found.
    pub fn delete_message(&self, id: i64) -> bool {
        let array = self.messages_array();
        self.write(|txn| match find_record(&array, &*txn, |r| has_number_id(r, id)) {
            Some((index, _)) => {
                array.remove(txn, index);
                true
            }
            None => false,
        })
    }

    // ─── Graph ─────────────────────────────────────────────────────

    pub fn nodes(&self) -> Vec<GraphNode> {
        let array = self.graph_array();
        let txn = self.doc.transact();
        read_records(&array, &txn, GRAPH)
    }

    pub fn push_node(&self, node: &GraphNode) -> Result<()> {
        let record = json_to_any(&serde_json::to_value(node)?);
        let array = self.graph_array();
        self.write(|txn| {
            array.push_back(txn, record);
        });
        Ok(())
    }

    /// The first node whose `id` equals `id`.
    pub fn node_by_id(&self, id: &str) -> Option<GraphNode> {
        let array = self.graph_array();
        let txn = self.doc.transact();
        let (index, record) = find_record(&array, &txn, |r| has_string_id(r, id))?;
        decode_record(record, GRAPH, index)
    }

    /// Shallow-merge `fields` over the node with `id`, keeping its index.
    ///
    /// Returns `Ok(false)` when no node has `id`. A merge whose result is no
    /// longer a valid node is rejected and leaves the node untouched.
    pub fn update_node(&self, id: &str, fields: Map<String, Value>) -> Result<bool> {
        let array = self.graph_array();
        self.write(|txn| {
            let Some((index, existing)) = find_record(&array, &*txn, |r| has_string_id(r, id))
            else {
                return Ok(false);
            };

            let mut merged = match existing {
                Value::Object(record) => record,
                _ => Map::new(),
            };
            merged.extend(fields);
            let merged = Value::Object(merged);
            if let Err(e) = serde_json::from_value::<GraphNode>(merged.clone()) {
                return Err(SdkError::InvalidRecord(format!("node '{id}': {e}")));
            }

            array.remove(txn, index);
            array.insert(txn, index, json_to_any(&merged));
            Ok(true)
        })
    }

    pub fn delete_node(&self, id: &str) -> bool {
        let array = self.graph_array();
        self.write(|txn| match find_record(&array, &*txn, |r| has_string_id(r, id)) {
            Some((index, _)) => {
                array.remove(txn, index);
                true
            }
            None => false,
        })
    }

    pub fn clear_nodes(&self) {
        let array = self.graph_array();
        self.write(|txn| replace_all(&array, txn, Vec::new()));
    }

    /// Clear the graph and append `nodes` in one transaction.
    pub fn replace_nodes(&self, nodes: &[GraphNode]) -> Result<()> {
        let records = nodes
            .iter()
            .map(|n| serde_json::to_value(n).map(|v| json_to_any(&v)))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let array = self.graph_array();
        self.write(|txn| replace_all(&array, txn, records));
        Ok(())
    }

    // ─── Sync plumbing ─────────────────────────────────────────────

    pub fn state_vector(&self) -> StateVector {
        self.doc.transact().state_vector()
    }

    /// Everything this document has that a peer at `remote` lacks.
    pub fn encode_diff(&self, remote: &StateVector) -> Vec<u8> {
        self.doc.transact().encode_diff_v1(remote)
    }

    /// Full document state as a single v1 update.
    pub fn encode_state(&self) -> Vec<u8> {
        self.encode_diff(&StateVector::default())
    }

    /// Apply a v1 update received from a peer.
    pub fn apply_remote_update(&self, update: &[u8]) -> Result<()> {
        let update = Update::decode_v1(update).map_err(|e| SdkError::Document(e.to_string()))?;
        let applied = {
            let mut txn = self.doc.transact_mut_with(REMOTE_ORIGIN);
            txn.apply_update(update)
        };
        self.changes.deliver();
        applied.map_err(|e| SdkError::Document(e.to_string()))
    }

    /// Install `on_change` as a listener for committed updates.
    ///
    /// `on_change` runs after the committing transaction is released, on the
    /// thread that made the change. The listener stays installed until the
    /// returned subscription drops.
    pub fn observe<F>(&self, on_change: F) -> Result<Subscription>
    where
        F: Fn(&DocumentChange) + Send + Sync + 'static,
    {
        let remote = Origin::from(REMOTE_ORIGIN);
        let listener: Arc<ChangeFn> = Arc::new(on_change);
        let queue = self.changes.clone();
        self.doc
            .observe_update_v1(move |txn, event| {
                let origin = if txn.origin() == Some(&remote) {
                    ChangeOrigin::Remote
                } else {
                    ChangeOrigin::Local
                };
                queue.push(
                    listener.clone(),
                    DocumentChange {
                        origin,
                        update: event.update.clone(),
                    },
                );
            })
            .map_err(|_| SdkError::Document("cannot observe while a transaction is open".into()))
    }
}

fn check_boundary(text: &str, index: u32) -> Result<()> {
    let at = index as usize;
    if at > text.len() || !text.is_char_boundary(at) {
        return Err(SdkError::IndexOutOfBounds {
            index,
            len: text.len() as u32,
        });
    }
    Ok(())
}

fn has_string_id(record: &Value, id: &str) -> bool {
    record.get("id").and_then(Value::as_str) == Some(id)
}

fn has_number_id(record: &Value, id: i64) -> bool {
    record.get("id").and_then(Value::as_i64) == Some(id)
}

fn replace_all(array: &ArrayRef, txn: &mut TransactionMut<'_>, records: Vec<yrs::Any>) {
    let len = array.len(&*txn);
    if len > 0 {
        array.remove_range(txn, 0, len);
    }
    for record in records {
        array.push_back(txn, record);
    }
}

fn decode_record<R: DeserializeOwned>(record: Value, root: &str, index: u32) -> Option<R> {
    match serde_json::from_value(record) {
        Ok(record) => Some(record),
        Err(e) => {
            log::warn!("Skipping malformed {root} record at index {index}: {e}");
            None
        }
    }
}

/// First record matching `matches`, with its index.
fn find_record<T, P>(array: &ArrayRef, txn: &T, matches: P) -> Option<(u32, Value)>
where
    T: ReadTxn,
    P: Fn(&Value) -> bool,
{
    array
        .iter(txn)
        .enumerate()
        .map(|(index, out)| (index as u32, any_to_json(&out.to_json(txn))))
        .find(|(_, record)| matches(record))
}

/// Decode every record in `array`; undecodable entries are logged and skipped.
fn read_records<T, R>(array: &ArrayRef, txn: &T, root: &str) -> Vec<R>
where
    T: ReadTxn,
    R: DeserializeOwned,
{
    array
        .iter(txn)
        .enumerate()
        .filter_map(|(index, out)| {
            decode_record(any_to_json(&out.to_json(txn)), root, index as u32)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn node(id: &str) -> GraphNode {
        GraphNode::new(id, id.to_uppercase())
    }

    #[test]
    fn test_set_text_replaces_content() {
        let doc = SharedDocument::new();
        doc.set_text("3\nwater\n");
        doc.set_text("1\nhelium\nHe 0 0 0");
        assert_eq!(doc.text(), "1\nhelium\nHe 0 0 0");

        doc.set_text("");
        assert_eq!(doc.text(), "");
    }

    #[test]
    fn test_insert_and_delete_range() {
        let doc = SharedDocument::new();
        doc.set_text("1\n\nHe 0 0 0");
        doc.insert_text(2, "helium").unwrap();
        assert_eq!(doc.text(), "1\nhelium\nHe 0 0 0");

        doc.delete_text(2, 6).unwrap();
        assert_eq!(doc.text(), "1\n\nHe 0 0 0");

        doc.delete_text(0, 0).unwrap();
        assert_eq!(doc.text(), "1\n\nHe 0 0 0");
    }

    #[test]
    fn test_text_edits_out_of_bounds() {
        let doc = SharedDocument::new();
        doc.set_text("abc");

        assert!(matches!(
            doc.insert_text(4, "x"),
            Err(SdkError::IndexOutOfBounds { index: 4, len: 3 })
        ));
        assert!(doc.delete_text(2, 5).is_err());
        assert!(doc.delete_text(1, u32::MAX).is_err());
        assert_eq!(doc.text(), "abc");
    }

    #[test]
    fn test_text_edits_respect_char_boundaries() {
        let doc = SharedDocument::new();
        doc.set_text("Å");
        assert!(doc.insert_text(1, "x").is_err());
        doc.insert_text(2, "x").unwrap();
        assert_eq!(doc.text(), "Åx");
    }

    #[test]
    fn test_message_add_delete_accounting() {
        let doc = SharedDocument::new();
        for i in 0..4 {
            let mut msg = Message::new("Bot", format!("m{i}"));
            msg.id = i;
            doc.push_message(&msg).unwrap();
        }

        assert!(doc.delete_message(1));
        assert!(!doc.delete_message(1));
        assert!(!doc.delete_message(99));

        let contents: Vec<String> = doc.messages().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["m0", "m2", "m3"]);
        assert_eq!(doc.message_by_id(3).unwrap().content, "m3");
        assert!(doc.message_by_id(1).is_none());
    }

    #[test]
    fn test_delete_message_removes_first_duplicate() {
        let doc = SharedDocument::new();
        for content in ["first", "second"] {
            let mut msg = Message::new("Bot", content);
            msg.id = 7;
            doc.push_message(&msg).unwrap();
        }
        assert!(doc.delete_message(7));
        assert_eq!(doc.messages()[0].content, "second");
    }

    #[test]
    fn test_clear_and_replace_messages() {
        let doc = SharedDocument::new();
        doc.push_message(&Message::new("A", "one")).unwrap();
        doc.clear_messages();
        assert!(doc.messages().is_empty());

        let batch = vec![Message::new("B", "two"), Message::new("C", "three")];
        doc.replace_messages(&batch).unwrap();
        assert_eq!(doc.messages(), batch);
    }

    #[test]
    fn test_update_node_keeps_position_and_fields() {
        let doc = SharedDocument::new();
        doc.push_node(&node("a")).unwrap();
        doc.push_node(&node("b").with_description("middle").with_in_node("a"))
            .unwrap();
        doc.push_node(&node("c")).unwrap();

        let mut fields = Map::new();
        fields.insert("name".into(), json!("Bee"));
        fields.insert("color".into(), json!("#64748b"));
        assert!(doc.update_node("b", fields).unwrap());
        assert!(!doc.update_node("zz", Map::new()).unwrap());

        let nodes = doc.nodes();
        let ids: Vec<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let b = &nodes[1];
        assert_eq!(b.name, "Bee");
        assert_eq!(b.description, "middle");
        assert_eq!(b.in_node_id.as_deref(), Some("a"));
        assert_eq!(b.extra["color"], "#64748b");
    }

    #[test]
    fn test_update_node_rejects_invalid_merge() {
        let doc = SharedDocument::new();
        doc.push_node(&node("a")).unwrap();

        let mut fields = Map::new();
        fields.insert("name".into(), json!(5));
        assert!(matches!(
            doc.update_node("a", fields),
            Err(SdkError::InvalidRecord(_))
        ));

        assert_eq!(doc.nodes(), vec![node("a")]);
        assert_eq!(doc.node_by_id("a"), Some(node("a")));
    }

    #[test]
    fn test_lookups_and_edits_share_identity() {
        let doc = SharedDocument::new();
        {
            let array = doc.graph_array();
            let mut txn = doc.doc().transact_mut();
            array.push_back(&mut txn, json_to_any(&json!({"id": "dup", "label": 1})));
        }
        doc.push_node(&node("dup")).unwrap();

        // The first record with the id is the one every operation addresses
        assert!(doc.node_by_id("dup").is_none());
        assert_eq!(doc.nodes(), vec![node("dup")]);
        assert!(doc.delete_node("dup"));
        assert_eq!(doc.node_by_id("dup"), Some(node("dup")));

        let mut msg = Message::new("Bot", "hi");
        msg.id = 42;
        doc.push_message(&msg).unwrap();
        assert_eq!(doc.message_by_id(42), Some(msg));
        assert!(doc.message_by_id(41).is_none());
    }

    #[test]
    fn test_delete_and_replace_nodes() {
        let doc = SharedDocument::new();
        doc.push_node(&node("a")).unwrap();
        doc.push_node(&node("b")).unwrap();

        assert!(doc.delete_node("a"));
        assert!(!doc.delete_node("a"));
        assert_eq!(doc.node_by_id("b").unwrap().name, "B");

        doc.replace_nodes(&[node("x"), node("y")]).unwrap();
        let ids: Vec<String> = doc.nodes().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["x", "y"]);

        doc.clear_nodes();
        assert!(doc.nodes().is_empty());
    }

    #[test]
    fn test_stored_node_omits_absent_edges() {
        let doc = SharedDocument::new();
        doc.push_node(&node("solo")).unwrap();

        let array = doc.graph_array();
        let txn = doc.doc().transact();
        let stored = any_to_json(&array.get(&txn, 0).unwrap().to_json(&txn));
        assert_eq!(stored, json!({"id": "solo", "name": "SOLO", "description": ""}));
    }

    #[test]
    fn test_malformed_records_are_skipped() {
        let doc = SharedDocument::new();
        {
            let array = doc.graph_array();
            let mut txn = doc.doc().transact_mut();
            array.push_back(&mut txn, json_to_any(&json!({"id": "nameless"})));
        }
        doc.push_node(&node("ok")).unwrap();

        let nodes = doc.nodes();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].id, "ok");
    }

    #[test]
    fn test_remote_update_converges() {
        let local = SharedDocument::new();
        let remote = SharedDocument::new();

        remote.set_text("2\npair\nH 0 0 0\nH 0 0 0.74");
        remote.push_node(&node("n1")).unwrap();

        local
            .apply_remote_update(&remote.encode_diff(&local.state_vector()))
            .unwrap();
        assert_eq!(local.text(), remote.text());
        assert_eq!(local.nodes(), remote.nodes());
    }

    #[test]
    fn test_apply_garbage_update_fails() {
        let doc = SharedDocument::new();
        assert!(matches!(
            doc.apply_remote_update(&[0xFF, 0xFE, 0xFD]),
            Err(SdkError::Document(_))
        ));
    }

    #[test]
    fn test_observe_reports_origin() {
        let local = SharedDocument::new();
        local.bind();
        let seen: Arc<Mutex<Vec<ChangeOrigin>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = local
            .observe(move |change| {
                assert!(!change.update.is_empty());
                sink.lock().unwrap().push(change.origin);
            })
            .unwrap();

        local.set_text("local edit");

        let remote = SharedDocument::new();
        remote.push_message(&Message::new("peer", "hi")).unwrap();
        local.apply_remote_update(&remote.encode_state()).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![ChangeOrigin::Local, ChangeOrigin::Remote]
        );
    }

    #[test]
    fn test_observer_reads_committed_state() {
        let doc = SharedDocument::new();
        doc.bind();
        let (reader, (tx, rx)) = (doc.clone(), std::sync::mpsc::channel());
        let _sub = doc
            .observe(move |_| {
                let _ = tx.send(reader.text());
            })
            .unwrap();

        let writer = doc.clone();
        std::thread::spawn(move || writer.set_text("hello"));

        let seen = rx.recv_timeout(std::time::Duration::from_secs(3)).unwrap();
        assert_eq!(seen, "hello");
    }

    #[test]
    fn test_observer_may_edit_document() {
        let doc = SharedDocument::new();
        doc.bind();
        let editor = doc.clone();
        let _sub = doc
            .observe(move |_| {
                if editor.messages().is_empty() {
                    editor.push_message(&Message::new("echo", "seen")).unwrap();
                }
            })
            .unwrap();

        doc.set_text("ping");
        assert_eq!(doc.messages()[0].content, "seen");
    }

    #[test]
    fn test_raw_edits_delivered_on_flush() {
        let doc = SharedDocument::new();
        let text = doc.xyz();
        let count = Arc::new(Mutex::new(0));
        let counter = count.clone();
        let _sub = doc
            .observe(move |_| *counter.lock().unwrap() += 1)
            .unwrap();

        {
            let mut txn = doc.doc().transact_mut();
            text.insert(&mut txn, 0, "raw");
        }
        assert_eq!(*count.lock().unwrap(), 0);
        doc.flush_changes();
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn test_set_text_is_single_update() {
        let doc = SharedDocument::new();
        doc.set_text("old");
        let count = Arc::new(Mutex::new(0));
        let counter = count.clone();
        let _sub = doc
            .observe(move |_| *counter.lock().unwrap() += 1)
            .unwrap();

        doc.set_text("new");
        assert_eq!(*count.lock().unwrap(), 1);
    }
}

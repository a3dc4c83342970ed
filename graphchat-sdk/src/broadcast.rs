//! Per-room fan-out for the relay server.
//!
//! Every connection in a room holds a receiver on the room's tokio broadcast
//! channel. Frames are tagged with the connection that produced them so the
//! writer side can skip echoing a peer's own updates back to it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::document::SharedDocument;

/// A frame queued for every connection in a room.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Connection the frame came from
    pub origin: Uuid,
    /// Encoded y-sync frame, shared between receivers
    pub frame: Arc<Vec<u8>>,
}

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub active_peers: usize,
}

/// Broadcast channel plus the set of connections subscribed to it.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Envelope>,
    peers: RwLock<HashSet<Uuid>>,
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

impl BroadcastGroup {
    /// `capacity` frames are buffered per receiver before a slow peer lags.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            peers: RwLock::new(HashSet::new()),
            messages_sent: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }

    pub async fn add_peer(&self, peer_id: Uuid) -> broadcast::Receiver<Envelope> {
        self.peers.write().await.insert(peer_id);
        self.sender.subscribe()
    }

    pub async fn remove_peer(&self, peer_id: &Uuid) -> bool {
        self.peers.write().await.remove(peer_id)
    }

    /// Queue `frame` for every receiver, the origin's included.
    /// Returns how many receivers it reached.
    pub fn broadcast(&self, origin: Uuid, frame: Vec<u8>) -> usize {
        let envelope = Envelope {
            origin,
            frame: Arc::new(frame),
        };
        let count = self.sender.send(envelope).unwrap_or(0);
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Account for frames a lagging receiver skipped.
    pub fn record_dropped(&self, skipped: u64) {
        self.messages_dropped.fetch_add(skipped, Ordering::Relaxed);
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            active_peers: self.peer_count().await,
        }
    }
}

/// A named room: the relay's copy of the document and its fan-out group.
pub struct Room {
    pub document: SharedDocument,
    pub broadcast: BroadcastGroup,
}

impl Room {
    fn new(capacity: usize) -> Self {
        let document = SharedDocument::new();
        document.bind();
        Self {
            document,
            broadcast: BroadcastGroup::new(capacity),
        }
    }
}

/// Maps room names to rooms. Rooms are created on first join.
pub struct RoomManager {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    default_capacity: usize,
}

impl RoomManager {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            default_capacity,
        }
    }

    pub async fn get_or_create(&self, name: &str) -> Arc<Room> {
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(name) {
                return room.clone();
            }
        }

        let mut rooms = self.rooms.write().await;
        rooms
            .entry(name.to_string())
            .or_insert_with(|| {
                log::info!("Room '{name}' created");
                Arc::new(Room::new(self.default_capacity))
            })
            .clone()
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.get(name).cloned()
    }

    /// Drop the room if nobody is left in it. Its document goes with it.
    pub async fn remove_if_empty(&self, name: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(name) {
            if room.broadcast.peer_count().await == 0 {
                rooms.remove(name);
                return true;
            }
        }
        false
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn active_rooms(&self) -> Vec<String> {
        self.rooms.read().await.keys().cloned().collect()
    }
}

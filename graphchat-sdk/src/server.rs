//! Websocket relay for GraphChat rooms.
//!
//! A minimal y-websocket compatible server: the room is the URL path, every
//! room keeps a document in memory and fans updates out to the other
//! connections in it.
//!
//! ```text
//! Client A ──┐                       ┌──► Client B
//!             ├── /lab ── Room ──────┤
//! Client C ──┘    (SharedDocument +  └──► Client C
//!                  BroadcastGroup)
//! ```
//!
//! Rooms are dropped with their content once the last connection leaves.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use uuid::Uuid;
use yrs::sync::{Message, SyncMessage};

use crate::broadcast::{Room, RoomManager};
use crate::document::SharedDocument;
use crate::protocol;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Broadcast channel capacity per room
    pub broadcast_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            broadcast_capacity: 256,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub rejected_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub active_rooms: usize,
}

/// The relay server.
pub struct SyncServer {
    config: ServerConfig,
    rooms: Arc<RoomManager>,
    stats: Arc<RwLock<ServerStats>>,
}

impl SyncServer {
    pub fn new(config: ServerConfig) -> Self {
        let rooms = Arc::new(RoomManager::new(config.broadcast_capacity));
        Self {
            config,
            rooms,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Relay listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let rooms = self.rooms.clone();
            let stats = self.stats.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, rooms, stats).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        rooms: Arc<RoomManager>,
        stats: Arc<RwLock<ServerStats>>,
    ) -> Result<(), BoxError> {
        let mut path = String::new();
        let mut ws_stream =
            tokio_tungstenite::accept_hdr_async(stream, |request: &Request, response: Response| {
                path = request.uri().path().to_string();
                Ok(response)
            })
            .await?;

        let room_name = path.trim_start_matches('/').to_string();
        if room_name.is_empty() || room_name == "null" {
            log::warn!("Rejecting {addr}: invalid room name {room_name:?}");
            stats.write().await.rejected_connections += 1;
            ws_stream.close(None).await?;
            return Ok(());
        }

        let conn_id = Uuid::new_v4();
        let room = rooms.get_or_create(&room_name).await;
        let broadcast_rx = room.broadcast.add_peer(conn_id).await;
        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
            s.active_rooms = rooms.room_count().await;
        }
        log::info!("Connection {conn_id} from {addr} joined room '{room_name}'");

        let outcome = Self::relay(ws_stream, conn_id, &room, broadcast_rx, &stats).await;

        // Cleanup runs whatever ended the relay loop
        room.broadcast.remove_peer(&conn_id).await;
        if rooms.remove_if_empty(&room_name).await {
            log::info!("Room '{room_name}' removed (empty)");
        }
        {
            let mut s = stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
            s.active_rooms = rooms.room_count().await;
        }
        log::info!("Connection {conn_id} left room '{room_name}'");

        outcome
    }

    async fn relay(
        ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
        conn_id: Uuid,
        room: &Room,
        mut broadcast_rx: tokio::sync::broadcast::Receiver<crate::broadcast::Envelope>,
        stats: &RwLock<ServerStats>,
    ) -> Result<(), BoxError> {
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        // Ask the newcomer for whatever the room is missing
        let step1 = protocol::sync_step1(room.document.state_vector());
        ws_sender.send(WsMessage::Binary(step1.into())).await?;

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(WsMessage::Binary(data))) => {
                            {
                                let mut s = stats.write().await;
                                s.total_messages += 1;
                                s.total_bytes += data.len() as u64;
                            }
                            if let Some(reply) = Self::handle_frame(conn_id, room, &data) {
                                ws_sender.send(WsMessage::Binary(reply.into())).await?;
                            }
                        }
                        Some(Ok(WsMessage::Ping(data))) => {
                            ws_sender.send(WsMessage::Pong(data)).await?;
                        }
                        Some(Ok(WsMessage::Close(_))) | None => break,
                        Some(Err(e)) => {
                            log::warn!("Websocket error on {conn_id}: {e}");
                            break;
                        }
                        Some(Ok(_)) => {}
                    }
                }

                envelope = broadcast_rx.recv() => {
                    match envelope {
                        Ok(envelope) if envelope.origin == conn_id => {}
                        Ok(envelope) => {
                            ws_sender
                                .send(WsMessage::Binary(envelope.frame.to_vec().into()))
                                .await?;
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            room.broadcast.record_dropped(skipped);
                            log::warn!("Connection {conn_id} lagged by {skipped} frames");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        }
        Ok(())
    }

    /// Apply one client frame to the room. Returns a direct reply, if any.
    fn handle_frame(conn_id: Uuid, room: &Room, frame: &[u8]) -> Option<Vec<u8>> {
        let message = match protocol::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("Connection {conn_id}: {e}");
                return None;
            }
        };

        match message {
            Message::Sync(SyncMessage::SyncStep1(remote_sv)) => {
                Some(protocol::sync_step2(room.document.encode_diff(&remote_sv)))
            }
            Message::Sync(SyncMessage::SyncStep2(update))
            | Message::Sync(SyncMessage::Update(update)) => {
                match room.document.apply_remote_update(&update) {
                    Ok(()) => {
                        room.broadcast.broadcast(conn_id, protocol::update(update));
                    }
                    Err(e) => log::warn!("Connection {conn_id} sent a bad update: {e}"),
                }
                None
            }
            Message::Awareness(_) | Message::AwarenessQuery => {
                room.broadcast.broadcast(conn_id, frame.to_vec());
                None
            }
            other => {
                log::debug!("Ignoring {:?} frame from {conn_id}", protocol::FrameKind::of(&other));
                None
            }
        }
    }

    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn room_manager(&self) -> &Arc<RoomManager> {
        &self.rooms
    }

    /// The relay's copy of a live room's document.
    pub async fn room_document(&self, name: &str) -> Option<SharedDocument> {
        self.rooms.get(name).await.map(|room| room.document.clone())
    }
}

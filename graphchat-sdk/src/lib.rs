//! # graphchat-sdk: Client SDK for GraphChat collaborative documents
//!
//! A GraphChat room is one shared Yjs document holding a molecular structure
//! (XYZ text), a chat log and a small node graph. This crate connects to the
//! room's websocket server, keeps a local replica in sync and exposes typed
//! operations on it.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐    y-sync over     ┌─────────────┐
//! │ GraphChatClient  │ ◄────websocket───► │ SyncServer  │
//! │  accessor ops    │                    │ (relay)     │
//! │  snapshot I/O    │                    └──────┬──────┘
//! └──────┬───────────┘                           │
//!        │                                ┌──────┴──────┐
//!        ▼                                │ Room doc +  │
//! ┌──────────────────┐   SyncProvider     │ Broadcast   │
//! │ SharedDocument   │ ◄────────────────  └─────────────┘
//! │ xyz / messages / │
//! │ graph            │ ──► ObserverHub ──► your callbacks
//! └──────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`client`]: session lifecycle (connect, background session, disconnect)
//! - [`accessor`]: text, message and graph operations, gated on connection
//! - [`snapshot`]: whole-document export / import as JSON
//! - [`observer`]: change notification hub
//! - [`document`]: typed access to the underlying `yrs::Doc`
//! - [`provider`]: websocket sync transport
//! - [`protocol`]: y-sync frame helpers
//! - [`server`] / [`broadcast`]: in-process relay for local use and tests
//! - [`structure`]: XYZ format checks and parsing
//!
//! ## Example
//!
//! ```no_run
//! use graphchat_sdk::{GraphChatClient, GraphNode};
//!
//! # async fn demo() -> graphchat_sdk::Result<()> {
//! let mut client = GraphChatClient::with_room("ws://localhost:3000", "room");
//! client.connect().await?;
//! client.set_xyz_text("1\nhelium\nHe 0.0 0.0 0.0")?;
//! client.add_message("Bot", "structure loaded")?;
//! client.add_graph_node(GraphNode::new("input", "Input Layer"))?;
//! client.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod accessor;
pub mod broadcast;
pub mod client;
pub mod config;
pub mod convert;
pub mod document;
pub mod error;
pub mod model;
pub mod observer;
pub mod protocol;
pub mod provider;
pub mod server;
pub mod snapshot;
pub mod structure;

// Re-exports for convenience
pub use broadcast::{BroadcastGroup, BroadcastStats, RoomManager};
pub use client::{ConnectionState, GraphChatClient, KeepAlive};
pub use config::ClientConfig;
pub use document::{SharedDocument, GRAPH, MESSAGES, XYZ_TEXT};
pub use error::{Result, SdkError};
pub use model::{validate_graph_node, DocumentState, GraphNode, Message, NodeUpdate};
pub use observer::{ChangeOrigin, DocumentChange, ObserverHub, ObserverId};
pub use protocol::{FrameKind, ProtocolError};
pub use server::{ServerConfig, ServerStats, SyncServer};
pub use structure::{validate_xyz_format, Atom, XyzError, XyzStructure};

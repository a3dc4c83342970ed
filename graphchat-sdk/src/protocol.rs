//! y-sync framing for websocket messages.
//!
//! Every websocket binary frame carries one y-sync message (lib0 v1
//! encoding), as spoken by y-websocket servers and browser peers:
//! ```text
//! ┌──────────────┬─────────────────┬──────────────────────┐
//! │ msg_type     │ sync step       │ payload              │
//! │ varuint      │ varuint         │ varuint-len bytes    │
//! │ 0 = sync     │ 0 = step 1 (SV) │ state vector / update│
//! │ 1 = awareness│ 1 = step 2      │                      │
//! │ 2 = auth     │ 2 = update      │                      │
//! │ 3 = query    │                 │                      │
//! └──────────────┴─────────────────┴──────────────────────┘
//! ```
//!
//! The encoding itself is provided by `yrs::sync`; this module only names
//! the frames the SDK and relay exchange.

use yrs::sync::{Message, SyncMessage};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::StateVector;

/// Coarse classification of a decoded frame, used for routing and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    SyncStep1,
    SyncStep2,
    Update,
    Awareness,
    AwarenessQuery,
    Auth,
    Custom,
}

impl FrameKind {
    pub fn of(message: &Message) -> Self {
        match message {
            Message::Sync(SyncMessage::SyncStep1(_)) => Self::SyncStep1,
            Message::Sync(SyncMessage::SyncStep2(_)) => Self::SyncStep2,
            Message::Sync(SyncMessage::Update(_)) => Self::Update,
            Message::Awareness(_) => Self::Awareness,
            Message::AwarenessQuery => Self::AwarenessQuery,
            Message::Auth(_) => Self::Auth,
            Message::Custom(_, _) => Self::Custom,
        }
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("failed to decode y-sync frame: {0}")]
    Decode(String),
}

/// Request the peer's missing updates by announcing our state vector.
pub fn sync_step1(state_vector: StateVector) -> Vec<u8> {
    Message::Sync(SyncMessage::SyncStep1(state_vector)).encode_v1()
}

/// Answer a step 1 with the updates the peer lacks.
pub fn sync_step2(diff: Vec<u8>) -> Vec<u8> {
    Message::Sync(SyncMessage::SyncStep2(diff)).encode_v1()
}

/// Incremental update produced by a committed transaction.
pub fn update(update: Vec<u8>) -> Vec<u8> {
    Message::Sync(SyncMessage::Update(update)).encode_v1()
}

pub fn decode(frame: &[u8]) -> Result<Message, ProtocolError> {
    Message::decode_v1(frame).map_err(|e| ProtocolError::Decode(e.to_string()))
}

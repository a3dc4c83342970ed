//! Websocket sync provider.
//!
//! Keeps a [`SharedDocument`] in step with a remote room:
//! - announces our state vector (SyncStep1) when started
//! - answers the room's SyncStep1 with the updates it lacks (SyncStep2)
//! - applies SyncStep2 / Update frames from the room with the remote origin
//! - forwards local updates handed over through the [`UpdateOutlet`]
//!
//! ```text
//!  doc listener ──► UpdateOutlet ──► writer task ──► ws sink
//!                                        ▲
//!  ws stream ──► reader task ── step 2 ──┘
//!                    │
//!                    └──► SharedDocument::apply_remote_update
//! ```
//!
//! Reconnection and heartbeats are out of scope: when the socket drops the
//! provider only records it and logs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use yrs::sync::{Message, SyncMessage};

use crate::document::SharedDocument;
use crate::protocol;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;

/// How long queued frames and the close frame each get to flush.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Hand-off point between the document listener and the provider's writer.
///
/// The listener is installed for the client's lifetime while providers come
/// and go with connections, so the sender is swapped in and out here.
#[derive(Clone, Default)]
pub struct UpdateOutlet {
    sender: Arc<Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>>,
}

impl UpdateOutlet {
    pub fn new() -> Self {
        Self::default()
    }

    fn attach(&self, sender: mpsc::UnboundedSender<Vec<u8>>) {
        *self.sender.lock() = Some(sender);
    }

    fn detach(&self) {
        self.sender.lock().take();
    }

    /// Queue a local update for the room. Returns false when no provider is
    /// attached or its writer has stopped.
    pub fn forward(&self, update: &[u8]) -> bool {
        match self.sender.lock().as_ref() {
            Some(tx) => tx.send(protocol::update(update.to_vec())).is_ok(),
            None => false,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.sender.lock().is_some()
    }
}

/// Write half of the websocket, closed after the provider.
pub struct Socket {
    sink: Arc<tokio::sync::Mutex<WsSink>>,
}

impl Socket {
    /// Send a close frame and flush, bounded by a short grace period.
    pub async fn close(self) -> Result<(), tungstenite::Error> {
        let closing = async {
            let mut sink = self.sink.lock().await;
            sink.close().await
        };
        match tokio::time::timeout(CLOSE_GRACE, closing).await {
            Ok(result) => result,
            Err(_) => Err(tungstenite::Error::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "close frame was not flushed in time",
            ))),
        }
    }
}

/// Running sync provider for one connection.
pub struct SyncProvider {
    outlet: UpdateOutlet,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    synced: watch::Receiver<bool>,
    transport_open: Arc<AtomicBool>,
}

impl SyncProvider {
    /// Attach `document` to the websocket and start syncing.
    ///
    /// Spawns the reader and writer tasks and queues SyncStep1.
    pub fn start(
        stream: WsStream,
        document: SharedDocument,
        outlet: UpdateOutlet,
        url: String,
    ) -> (Self, Socket) {
        let (ws_writer, ws_reader) = stream.split();
        let sink = Arc::new(tokio::sync::Mutex::new(ws_writer));

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (synced_tx, synced_rx) = watch::channel(false);
        let transport_open = Arc::new(AtomicBool::new(true));

        // Queued before the outlet is attached so step 1 goes out first
        let _ = out_tx.send(protocol::sync_step1(document.state_vector()));
        outlet.attach(out_tx.clone());

        // Writer task: forward outgoing frames to the websocket
        let writer_sink = sink.clone();
        let writer = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let mut w = writer_sink.lock().await;
                if let Err(e) = w.send(WsMessage::Binary(frame.into())).await {
                    log::debug!("Sync writer stopped: {e}");
                    break;
                }
            }
        });

        // Reader task: apply the room's frames to the document
        let open = transport_open.clone();
        let reader = tokio::spawn(read_loop(ws_reader, document, out_tx, synced_tx, open, url));

        let provider = Self {
            outlet,
            reader,
            writer,
            synced: synced_rx,
            transport_open,
        };
        (provider, Socket { sink })
    }

    /// Becomes true once the room's SyncStep2 has been applied.
    pub fn synced(&self) -> watch::Receiver<bool> {
        self.synced.clone()
    }

    pub fn transport_open(&self) -> Arc<AtomicBool> {
        self.transport_open.clone()
    }

    /// Stop forwarding and reading without waiting for the tasks.
    pub fn abort(&self) {
        self.outlet.detach();
        self.reader.abort();
        self.writer.abort();
    }

    /// Stop the provider, letting the writer flush what is already queued.
    ///
    /// The outlet is detached and the reader stopped, which drops every
    /// sender of the outbound channel; the writer then drains the channel
    /// and exits. A writer that does not finish within [`CLOSE_GRACE`] is
    /// aborted. Fails only if one of the tasks had panicked.
    pub async fn close(self) -> Result<(), JoinError> {
        self.outlet.detach();
        self.reader.abort();
        self.transport_open.store(false, Ordering::SeqCst);
        match self.reader.await {
            Err(e) if e.is_panic() => return Err(e),
            _ => {}
        }

        let mut writer = self.writer;
        match tokio::time::timeout(CLOSE_GRACE, &mut writer).await {
            Ok(Err(e)) if e.is_panic() => return Err(e),
            Ok(_) => {}
            Err(_) => {
                log::warn!("Dropping unsent updates: writer did not drain in time");
                writer.abort();
            }
        }
        Ok(())
    }
}

async fn read_loop(
    mut ws_reader: SplitStream<WsStream>,
    document: SharedDocument,
    out_tx: mpsc::UnboundedSender<Vec<u8>>,
    synced_tx: watch::Sender<bool>,
    transport_open: Arc<AtomicBool>,
    url: String,
) {
    while let Some(msg) = ws_reader.next().await {
        match msg {
            Ok(WsMessage::Binary(data)) => {
                handle_frame(&document, &data, &out_tx, &synced_tx);
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(WsMessage::Text(_)) => {
                log::debug!("Ignoring text frame from {url}");
            }
            Ok(_) => {}
            Err(e) => {
                log::warn!("Sync transport error from {url}: {e}");
                break;
            }
        }
    }

    transport_open.store(false, Ordering::SeqCst);
    log::warn!("Sync transport to {url} closed; session stays connected until disconnect");
}

fn handle_frame(
    document: &SharedDocument,
    frame: &[u8],
    out_tx: &mpsc::UnboundedSender<Vec<u8>>,
    synced_tx: &watch::Sender<bool>,
) {
    let message = match protocol::decode(frame) {
        Ok(message) => message,
        Err(e) => {
            log::warn!("{e}");
            return;
        }
    };

    match message {
        Message::Sync(SyncMessage::SyncStep1(remote_sv)) => {
            let diff = document.encode_diff(&remote_sv);
            let _ = out_tx.send(protocol::sync_step2(diff));
        }
        Message::Sync(SyncMessage::SyncStep2(update)) => {
            match document.apply_remote_update(&update) {
                Ok(()) => {
                    synced_tx.send_replace(true);
                    log::debug!("Initial room state applied ({} bytes)", update.len());
                }
                Err(e) => log::warn!("Rejected room state: {e}"),
            }
        }
        Message::Sync(SyncMessage::Update(update)) => {
            if let Err(e) = document.apply_remote_update(&update) {
                log::warn!("Rejected remote update: {e}");
            }
        }
        Message::Auth(Some(reason)) => {
            log::warn!("Room denied access: {reason}");
        }
        Message::Awareness(_) => {
            log::trace!("Ignoring awareness frame");
        }
        other => {
            log::debug!("Ignoring {:?} frame", protocol::FrameKind::of(&other));
        }
    }
}

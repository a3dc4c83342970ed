//! Session manager for a GraphChat document.
//!
//! A [`GraphChatClient`] owns one shared document and at most one live
//! connection to its room. The lifecycle is:
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──handshake ok──► Connected
//!      ▲                          │                           │
//!      └──────handshake failed────┘                           │
//!      └─────────────disconnect() / KeepAlive::cancel()───────┘
//! ```
//!
//! The connection is not re-established automatically; a dropped socket is
//! logged and the session stays `Connected` until it is disconnected.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use yrs::Subscription;

use crate::config::ClientConfig;
use crate::document::SharedDocument;
use crate::error::{Result, SdkError};
use crate::observer::{ChangeOrigin, DocumentChange, ObserverHub, ObserverId};
use crate::provider::{Socket, SyncProvider, UpdateOutlet};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Provider and socket of the live connection, torn down in that order.
struct SyncLink {
    provider: SyncProvider,
    socket: Socket,
    // Document listener feeding the provider and the observers
    subscription: Subscription,
}

/// Connection state plus the live provider's status signals.
///
/// Shared with the background session so either teardown path resets it.
struct Session {
    state: ConnectionState,
    synced: Option<watch::Receiver<bool>>,
    transport_open: Option<Arc<AtomicBool>>,
}

impl Session {
    fn disconnected() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            synced: None,
            transport_open: None,
        }
    }
}

/// The keep-alive task spawned by [`GraphChatClient::start_background_session`].
struct KeepAliveTask {
    cancel: Arc<Notify>,
    task: JoinHandle<()>,
}

/// Handle on a background session.
///
/// Cancelling it disconnects the client. Clones control the same session.
#[derive(Debug, Clone)]
pub struct KeepAlive {
    cancel: Arc<Notify>,
    finished: watch::Receiver<bool>,
}

impl KeepAlive {
    /// Ask the background session to tear the connection down.
    pub fn cancel(&self) {
        self.cancel.notify_one();
    }

    /// Whether teardown has completed.
    pub fn is_finished(&self) -> bool {
        *self.finished.borrow()
    }

    /// Wait until the session has been torn down.
    pub async fn closed(&mut self) {
        // An error means the task is gone, which is also the end of it
        let _ = self.finished.wait_for(|done| *done).await;
    }
}

/// GraphChat client: session manager, document accessor and change hub in one.
///
/// Document operations live in the `accessor` and `snapshot` modules; all of
/// them fail with [`SdkError::NotConnected`] unless the client is connected.
pub struct GraphChatClient {
    config: ClientConfig,
    document: SharedDocument,
    observers: ObserverHub,
    outlet: UpdateOutlet,
    session: Arc<RwLock<Session>>,
    link: Arc<Mutex<Option<SyncLink>>>,
    keep_alive: Option<KeepAliveTask>,
}

impl Default for GraphChatClient {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl GraphChatClient {
    /// Create a disconnected client. No I/O happens until [`connect`](Self::connect).
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            document: SharedDocument::new(),
            observers: ObserverHub::new(),
            outlet: UpdateOutlet::new(),
            session: Arc::new(RwLock::new(Session::disconnected())),
            link: Arc::new(Mutex::new(None)),
            keep_alive: None,
        }
    }

    /// Shorthand for `GraphChatClient::new(ClientConfig::new(url, room))`.
    pub fn with_room(websocket_url: impl Into<String>, room_name: impl Into<String>) -> Self {
        Self::new(ClientConfig::new(websocket_url, room_name))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The shared document, without connection checks.
    pub fn document(&self) -> &SharedDocument {
        &self.document
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session.read().state
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Whether the room's initial state has been received on this connection.
    pub fn is_synced(&self) -> bool {
        let session = self.session.read();
        session.state == ConnectionState::Connected
            && session.synced.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Whether the underlying socket is still open. A connected client whose
    /// transport dropped keeps its state; this is the only place it shows.
    pub fn is_transport_open(&self) -> bool {
        let session = self.session.read();
        session.state == ConnectionState::Connected
            && session
                .transport_open
                .as_ref()
                .is_some_and(|open| open.load(Ordering::SeqCst))
    }

    /// Wait until the room's initial state has been applied.
    pub async fn wait_synced(&self) -> Result<()> {
        self.ensure_connected()?;
        let mut synced = self
            .session
            .read()
            .synced
            .clone()
            .ok_or(SdkError::NotConnected)?;
        synced
            .wait_for(|done| *done)
            .await
            .map_err(|_| SdkError::NotConnected)?;
        Ok(())
    }

    pub(crate) fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(SdkError::NotConnected)
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.session.write().state = state;
    }

    // ─── Change observers ──────────────────────────────────────────

    /// Register `callback` for every committed change, local or remote.
    ///
    /// Observers may be registered at any time; they only fire while a
    /// connection is live. They run synchronously once the change is
    /// committed, so they may read the document or edit it further.
    pub fn add_observer<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(&DocumentChange) + Send + Sync + 'static,
    {
        self.observers.add(callback)
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.observers.remove(id)
    }

    // ─── Lifecycle ─────────────────────────────────────────────────

    /// Open the websocket to `{websocket_url}/{room_name}` and start syncing.
    ///
    /// On failure the client is left `Disconnected`.
    pub async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Err(SdkError::AlreadyConnected);
        }
        // A background session whose teardown already ran
        self.stop_keep_alive().await;

        let url = self.config.room_url();
        self.set_state(ConnectionState::Connecting);
        log::info!("Connecting to {url}");

        let handshake = tokio_tungstenite::connect_async(url.as_str());
        let outcome = match self.config.connect_timeout {
            Some(limit) => match tokio::time::timeout(limit, handshake).await {
                Ok(result) => result.map_err(|e| SdkError::connection_failure(&url, e)),
                Err(_) => Err(SdkError::connect_timeout(&url, limit)),
            },
            None => handshake
                .await
                .map_err(|e| SdkError::connection_failure(&url, e)),
        };

        let mut stream = match outcome {
            Ok((stream, _response)) => stream,
            Err(e) => {
                log::warn!("{e}");
                self.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        self.document.bind();
        let hub = self.observers.clone();
        let outlet = self.outlet.clone();
        let subscription = match self.document.observe(move |change| {
            if change.origin == ChangeOrigin::Local {
                outlet.forward(&change.update);
            }
            hub.dispatch(change);
        }) {
            Ok(subscription) => subscription,
            Err(e) => {
                let _ = stream.close(None).await;
                self.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        let (provider, socket) =
            SyncProvider::start(stream, self.document.clone(), self.outlet.clone(), url.clone());
        *self.session.write() = Session {
            state: ConnectionState::Connected,
            synced: Some(provider.synced()),
            transport_open: Some(provider.transport_open()),
        };
        *self.link.lock().await = Some(SyncLink {
            provider,
            socket,
            subscription,
        });

        log::info!("Connected to room '{}'", self.config.room_name);
        Ok(())
    }

    /// Connect, then keep the session open in a background task until the
    /// returned handle is cancelled or [`disconnect`](Self::disconnect) runs.
    pub async fn start_background_session(&mut self) -> Result<KeepAlive> {
        self.connect().await?;

        let cancel = Arc::new(Notify::new());
        let (finished_tx, finished_rx) = watch::channel(false);

        let link = self.link.clone();
        let session = self.session.clone();
        let notified = cancel.clone();
        let task = tokio::spawn(async move {
            notified.notified().await;
            log::info!("Background session cancelled");
            teardown(&link, &session).await;
            finished_tx.send_replace(true);
        });

        self.keep_alive = Some(KeepAliveTask {
            cancel: cancel.clone(),
            task,
        });
        Ok(KeepAlive {
            cancel,
            finished: finished_rx,
        })
    }

    /// Close the connection. Safe to call repeatedly or when never connected.
    ///
    /// Errors raised while closing the provider or socket are logged and
    /// swallowed; the client always ends `Disconnected`.
    pub async fn disconnect(&mut self) {
        self.stop_keep_alive().await;
        teardown(&self.link, &self.session).await;
    }

    async fn stop_keep_alive(&mut self) {
        if let Some(KeepAliveTask { cancel, task }) = self.keep_alive.take() {
            cancel.notify_one();
            if let Err(e) = task.await {
                log::debug!("Background session ended abnormally: {e}");
            }
        }
    }
}

/// Close the provider, then the socket, then mark the client disconnected.
///
/// Queued local updates are flushed by the provider before the socket closes.
async fn teardown(link: &Mutex<Option<SyncLink>>, session: &RwLock<Session>) {
    let taken = link.lock().await.take();
    if let Some(SyncLink {
        provider,
        socket,
        subscription,
    }) = taken
    {
        drop(subscription);
        if let Err(e) = provider.close().await {
            log::debug!("Ignoring provider close error: {e}");
        }
        if let Err(e) = socket.close().await {
            log::debug!("Ignoring socket close error: {e}");
        }
        log::info!("Disconnected");
    }
    *session.write() = Session::disconnected();
}

impl Drop for GraphChatClient {
    fn drop(&mut self) {
        if let Some(keep_alive) = &self.keep_alive {
            keep_alive.cancel.notify_one();
        }
        if let Ok(mut link) = self.link.try_lock() {
            if let Some(link) = link.take() {
                link.provider.abort();
            }
        }
    }
}

impl std::fmt::Debug for GraphChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphChatClient")
            .field("config", &self.config)
            .field("state", &self.connection_state())
            .field("observers", &self.observers.len())
            .finish()
    }
}

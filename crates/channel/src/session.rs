//! Duplex channel session: one socket per process, lazily (re)opened.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use url::Url;
use uuid::Uuid;

use crate::api::Credentials;
use crate::frame::{CorrelationKey, Frame, KEEPALIVE_FRAME};

/// Error type for channel operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("credentials unavailable: {0}")]
    Credentials(String),
    #[error("invalid channel url: {0}")]
    InvalidUrl(String),
    #[error("channel closed before identification")]
    Closed,
}

/// An open duplex connection as two text queues.
/// Dropping `outbound` closes the write half; `inbound` yields `None` once the peer is gone.
pub struct Connection {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

/// Opens duplex connections. Swappable so tests can run without a socket.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: Url) -> Result<Connection, ChannelError>;
}

/// Receives every routable fragment pushed over the channel.
pub trait FrameHandler: Send + Sync {
    fn on_fragment(&self, key: CorrelationKey, text: String);
}

/// Link state as seen by callers of [`ChannelSession::ensure_active`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Live(String),
}

struct Shared {
    state_tx: watch::Sender<LinkState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    generation: AtomicU64,
    handler: Arc<dyn FrameHandler>,
}

impl Shared {
    /// Drop the link, but only if `generation` is still the current connection.
    fn close(&self, generation: u64) {
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        if let Ok(mut out) = self.outbound.lock() {
            *out = None;
        }
        self.state_tx.send_replace(LinkState::Disconnected);
    }
}

/// Owns the duplex connection, its remote-assigned id and the session id.
pub struct ChannelSession {
    session_id: Uuid,
    endpoint: Url,
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn Credentials>,
    shared: Arc<Shared>,
}

impl ChannelSession {
    pub fn new(
        endpoint: Url,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn Credentials>,
        handler: Arc<dyn FrameHandler>,
    ) -> Self {
        let (state_tx, _) = watch::channel(LinkState::Disconnected);
        Self {
            session_id: Uuid::new_v4(),
            endpoint,
            connector,
            credentials,
            shared: Arc::new(Shared {
                state_tx,
                outbound: Mutex::new(None),
                generation: AtomicU64::new(0),
                handler,
            }),
        }
    }

    /// Stable for the lifetime of this session.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Remote-assigned channel id, if the link is live.
    pub fn channel_id(&self) -> Option<String> {
        match &*self.shared.state_tx.borrow() {
            LinkState::Live(id) => Some(id.clone()),
            _ => None,
        }
    }

    pub fn state(&self) -> LinkState {
        self.shared.state_tx.borrow().clone()
    }

    /// Watch link state transitions.
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.shared.state_tx.subscribe()
    }

    /// Return a live channel id, connecting first if needed.
    ///
    /// Live: sends a keep-alive and returns at once. Disconnected: opens a
    /// connection and waits for the identity frame. Callers arriving while a
    /// connect is in progress wait on the same connect.
    pub async fn ensure_active(&self) -> Result<String, ChannelError> {
        let mut state_rx = self.shared.state_tx.subscribe();

        if let Some(id) = self.channel_id() {
            if self.send(KEEPALIVE_FRAME) {
                tracing::debug!("channel keep-alive sent");
                return Ok(id);
            }
            tracing::info!("channel writer gone, reconnecting");
            let generation = self.shared.generation.load(Ordering::SeqCst);
            self.shared.close(generation);
        }

        let mut claimed = false;
        self.shared.state_tx.send_if_modified(|state| {
            if *state == LinkState::Disconnected {
                *state = LinkState::Connecting;
                claimed = true;
                true
            } else {
                false
            }
        });

        if claimed {
            tracing::info!(session_id = %self.session_id, "connecting channel");
            if let Err(e) = self.connect().await {
                tracing::warn!(error = %e, "channel connect failed");
                self.shared.state_tx.send_replace(LinkState::Disconnected);
                return Err(e);
            }
        }

        let state = state_rx
            .wait_for(|s| *s != LinkState::Connecting)
            .await
            .map_err(|_| ChannelError::Closed)?
            .clone();
        match state {
            LinkState::Live(id) => Ok(id),
            _ => Err(ChannelError::Closed),
        }
    }

    /// Queue a text frame on the current connection. False if there is none.
    pub fn send(&self, text: &str) -> bool {
        let Ok(out) = self.shared.outbound.lock() else {
            return false;
        };
        out.as_ref().is_some_and(|tx| tx.send(text.to_owned()).is_ok())
    }

    async fn connect(&self) -> Result<(), ChannelError> {
        let token = self
            .credentials
            .access_token()
            .await
            .map_err(|e| ChannelError::Credentials(e.to_string()))?;
        let url = handshake_url(&self.endpoint, self.session_id, &token);
        let conn = self.connector.connect(url).await?;

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut out) = self.shared.outbound.lock() {
            *out = Some(conn.outbound.clone());
        }
        let _ = conn.outbound.send(KEEPALIVE_FRAME.to_owned());
        tracing::info!(generation, "channel connection established");

        let shared = Arc::clone(&self.shared);
        tokio::spawn(read_frames(shared, conn.inbound, generation));
        Ok(())
    }
}

/// Dispatch inbound frames until the connection goes away.
async fn read_frames(shared: Arc<Shared>, mut inbound: mpsc::UnboundedReceiver<String>, generation: u64) {
    while let Some(raw) = inbound.recv().await {
        match Frame::parse(&raw) {
            Ok(Frame::Identity { connection_id }) => {
                if shared.generation.load(Ordering::SeqCst) != generation {
                    continue;
                }
                tracing::info!(
                    connection_id = %connection_id.replace(['\n', '\r'], ""),
                    "channel identified"
                );
                shared.state_tx.send_replace(LinkState::Live(connection_id));
            }
            Ok(Frame::Fragment { key, text }) => shared.handler.on_fragment(key, text),
            Ok(Frame::Unroutable) => tracing::debug!("unroutable frame dropped"),
            Err(e) => tracing::warn!(error = %e, "malformed frame dropped"),
        }
    }
    tracing::info!(generation, "channel connection closed");
    shared.close(generation);
}

/// Connect URL carrying the session id and bearer token as query parameters.
pub fn handshake_url(endpoint: &Url, session_id: Uuid, token: &str) -> Url {
    let mut url = endpoint.clone();
    if !token.is_empty() {
        url.query_pairs_mut()
            .append_pair("SessionId", &session_id.to_string())
            .append_pair("Auth", token);
    }
    url
}

/// [`Connector`] over a real websocket.
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

#[async_trait::async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: Url) -> Result<Connection, ChannelError> {
        let (ws, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| ChannelError::Connect(e.to_string()))?;
        let (mut ws_tx, mut ws_rx) = ws.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if ws_tx.send(WsMessage::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        tokio::spawn(async move {
            while let Some(msg) = ws_rx.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => {
                        if in_tx.send(text).is_err() {
                            break;
                        }
                    }
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "websocket receive error");
                        break;
                    }
                }
            }
        });

        Ok(Connection { outbound: out_tx, inbound: in_rx })
    }
}

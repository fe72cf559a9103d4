// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Realtime chat channels that reconnect on their own.
//!
//! A [`Channel`] owns one logical connection to a room. When the transport
//! drops, the channel goes `Closed`, waits out the reconnect delay, and
//! connects again with whatever credential is current at that moment.
//! Transport errors never reach callers.

pub mod backoff;
pub mod transport;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::stream::BoxStream;
use futures_util::{Sink, SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::channel::backoff::ReconnectPolicy;
use crate::events::SessionEvent;

/// Outbound messages buffered per open connection.
const OUTBOUND_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// Callback invoked with each inbound JSON message.
pub type MessageHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Inbound text frames of one connection. Ends when the peer closes.
pub type InboundStream = BoxStream<'static, anyhow::Result<String>>;
/// Outbound text frames of one connection.
pub type OutboundSink = Pin<Box<dyn Sink<String, Error = anyhow::Error> + Send>>;

/// One established transport connection.
pub struct Link {
    pub sink: OutboundSink,
    pub stream: InboundStream,
}

/// WebSocket transport seam. Production uses [`transport::TungsteniteConnector`].
pub trait WsConnector: Send + Sync + 'static {
    fn connect(&self, url: String) -> Pin<Box<dyn Future<Output = anyhow::Result<Link>> + Send + '_>>;
}

/// Source of the credential presented when a channel connects.
pub trait TokenProvider: Send + Sync + 'static {
    fn access_token(&self) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub ws_base_url: String,
    pub reconnect: ReconnectPolicy,
    /// Emit [`SessionEvent::ChannelDegraded`] after this many failed connects in a row.
    pub alert_after: Option<u32>,
}

/// Build `<base>/ws/chat/<room>/?token=<token>`. An absent token yields `token=`.
pub fn channel_url(base: &str, room: &str, token: Option<&str>) -> anyhow::Result<String> {
    let mut url = reqwest::Url::parse(base)?;
    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => anyhow::bail!("unsupported channel scheme: {other}"),
    };
    if url.scheme() != scheme && url.set_scheme(scheme).is_err() {
        anyhow::bail!("cannot convert {base} to {scheme}");
    }
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("not a base url: {base}"))?
        .pop_if_empty()
        .extend(["ws", "chat", room, ""]);
    url.query_pairs_mut().clear().append_pair("token", token.unwrap_or(""));
    Ok(url.to_string())
}

/// A self-healing connection to one chat room.
pub struct Channel {
    room_id: String,
    state: watch::Receiver<ConnectionState>,
    outbound: Arc<Mutex<Option<mpsc::Sender<String>>>>,
    handlers: Arc<RwLock<Vec<MessageHandler>>>,
    cancel: CancellationToken,
}

impl Channel {
    /// Start connecting to `room_id` in the background.
    pub fn open(
        room_id: &str,
        options: ChannelOptions,
        connector: Arc<dyn WsConnector>,
        tokens: Arc<dyn TokenProvider>,
        events: broadcast::Sender<SessionEvent>,
        on_message: MessageHandler,
    ) -> Arc<Self> {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let outbound = Arc::new(Mutex::new(None));
        let handlers = Arc::new(RwLock::new(vec![on_message]));
        let cancel = CancellationToken::new();

        let driver = Driver {
            room: room_id.to_owned(),
            options,
            connector,
            tokens,
            events,
            state: state_tx,
            outbound: Arc::clone(&outbound),
            handlers: Arc::clone(&handlers),
            cancel: cancel.clone(),
        };
        let _ = driver.events.send(SessionEvent::ChannelState {
            room: driver.room.clone(),
            state: ConnectionState::Connecting,
        });
        tokio::spawn(driver.run());

        Arc::new(Self { room_id: room_id.to_owned(), state: state_rx, outbound, handlers, cancel })
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn add_handler(&self, handler: MessageHandler) {
        self.handlers.write().push(handler);
    }

    /// Serialize `payload` and send it as one text frame.
    ///
    /// Returns false without sending when the channel is not open.
    pub fn send<T: Serialize + ?Sized>(&self, payload: &T) -> bool {
        if self.state() != ConnectionState::Open {
            tracing::debug!(room = %self.room_id, "channel not open, message dropped");
            return false;
        }
        let Some(tx) = self.outbound.lock().clone() else {
            return false;
        };
        let text = match serde_json::to_string(payload) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(room = %self.room_id, err = %e, "unserializable message dropped");
                return false;
            }
        };
        match tx.try_send(text) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(room = %self.room_id, err = %e, "message dropped");
                false
            }
        }
    }

    /// Stop the channel. It will not reconnect.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Background task behind a [`Channel`].
struct Driver {
    room: String,
    options: ChannelOptions,
    connector: Arc<dyn WsConnector>,
    tokens: Arc<dyn TokenProvider>,
    events: broadcast::Sender<SessionEvent>,
    state: watch::Sender<ConnectionState>,
    outbound: Arc<Mutex<Option<mpsc::Sender<String>>>>,
    handlers: Arc<RwLock<Vec<MessageHandler>>>,
    cancel: CancellationToken,
}

impl Driver {
    async fn run(self) {
        let mut failures: u32 = 0;

        loop {
            self.set_state(ConnectionState::Connecting);

            // Read the credential now, not when the channel was created.
            let token = self.tokens.access_token();
            let connected = match channel_url(&self.options.ws_base_url, &self.room, token.as_deref()) {
                Ok(url) => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        result = self.connector.connect(url) => result,
                    }
                }
                Err(e) => Err(e),
            };

            match connected {
                Ok(link) => {
                    failures = 0;
                    tracing::debug!(room = %self.room, "channel connected");
                    self.pump(link).await;
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    tracing::debug!(room = %self.room, attempt = failures, err = %e, "channel connect failed");
                    if self.options.alert_after == Some(failures) {
                        tracing::warn!(room = %self.room, attempts = failures, "channel degraded");
                        let _ = self.events.send(SessionEvent::ChannelDegraded {
                            room: self.room.clone(),
                            attempts: failures,
                        });
                    }
                }
            }

            if self.cancel.is_cancelled() {
                break;
            }
            self.set_state(ConnectionState::Closed);

            let delay = self.options.reconnect.delay(failures);
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(ConnectionState::Closed);
        tracing::debug!(room = %self.room, "channel stopped");
    }

    /// Run one open connection until it drops or the channel is cancelled.
    async fn pump(&self, link: Link) {
        let Link { mut sink, mut stream } = link;
        let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);
        *self.outbound.lock() = Some(tx);
        self.set_state(ConnectionState::Open);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                msg = stream.next() => match msg {
                    Some(Ok(text)) => self.deliver(&text),
                    Some(Err(e)) => {
                        tracing::debug!(room = %self.room, err = %e, "channel read error");
                        break;
                    }
                    None => {
                        tracing::debug!(room = %self.room, "channel closed by peer");
                        break;
                    }
                },
                Some(text) = rx.recv() => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        result = sink.send(text) => {
                            if let Err(e) = result {
                                tracing::debug!(room = %self.room, err = %e, "channel write error");
                                break;
                            }
                        }
                    }
                }
            }
        }

        *self.outbound.lock() = None;
    }

    /// Deliver each newline-delimited JSON object in `text` to every handler.
    fn deliver(&self, text: &str) {
        let handlers = self.handlers.read().clone();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match serde_json::from_str::<Value>(line) {
                Ok(value) => {
                    for handler in &handlers {
                        handler(value.clone());
                    }
                }
                Err(e) => tracing::debug!(room = %self.room, err = %e, "skipping non-JSON line"),
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if changed {
            tracing::debug!(room = %self.room, ?state, "channel state");
            let _ = self
                .events
                .send(SessionEvent::ChannelState { room: self.room.clone(), state });
        }
    }
}

/// Channels by room id.
pub struct ChannelManager {
    channels: RwLock<HashMap<String, Arc<Channel>>>,
    options: ChannelOptions,
    connector: Arc<dyn WsConnector>,
    tokens: Arc<dyn TokenProvider>,
    events: broadcast::Sender<SessionEvent>,
}

impl ChannelManager {
    pub fn new(
        options: ChannelOptions,
        connector: Arc<dyn WsConnector>,
        tokens: Arc<dyn TokenProvider>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self { channels: RwLock::new(HashMap::new()), options, connector, tokens, events }
    }

    /// Subscribe to `room_id`, opening its channel on first use.
    pub fn subscribe(
        &self,
        room_id: &str,
        on_message: impl Fn(Value) + Send + Sync + 'static,
    ) -> Arc<Channel> {
        let handler: MessageHandler = Arc::new(on_message);
        let mut channels = self.channels.write();
        if let Some(channel) = channels.get(room_id) {
            channel.add_handler(handler);
            return Arc::clone(channel);
        }

        tracing::debug!(room = %room_id, "opening channel");
        let channel = Channel::open(
            room_id,
            self.options.clone(),
            Arc::clone(&self.connector),
            Arc::clone(&self.tokens),
            self.events.clone(),
            handler,
        );
        channels.insert(room_id.to_owned(), Arc::clone(&channel));
        channel
    }

    /// Tear down the channel for `room_id`. Returns false if none was open.
    pub fn unsubscribe(&self, room_id: &str) -> bool {
        match self.channels.write().remove(room_id) {
            Some(channel) => {
                channel.close();
                true
            }
            None => false,
        }
    }

    pub fn channel(&self, room_id: &str) -> Option<Arc<Channel>> {
        self.channels.read().get(room_id).cloned()
    }

    pub fn rooms(&self) -> Vec<String> {
        let mut rooms: Vec<String> = self.channels.read().keys().cloned().collect();
        rooms.sort();
        rooms
    }
}

#[cfg(test)]
#[path = "channel_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deterministic fakes for the HTTP and WebSocket transports.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::channel::{Link, OutboundSink, WsConnector};
use crate::config::LinkConfig;
use crate::events::{event_channel, SessionEvent};
use crate::gateway::{HttpTransport, Response, WireRequest};
use crate::policy::Location;
use crate::session::Session;

pub const API_BASE: &str = "http://backend.test/api/";
pub const WS_BASE: &str = "ws://backend.test";

struct BackendState {
    valid_token: Option<String>,
    issued: u64,
    refresh_status: u16,
    refresh_delay: Duration,
    logout_status: u16,
}

/// In-memory stand-in for the account and resource endpoints.
///
/// Resource paths answer 200 only for the currently valid access token;
/// refresh issues `tok-1`, `tok-2`, ... Special paths: `missing/` (404),
/// `admin/` (403), `boom/` (500), `always-401/`, `unreachable/` (transport
/// error), `slow/` (sleeps a minute).
pub struct FakeBackend {
    state: Mutex<BackendState>,
    requests: Mutex<Vec<WireRequest>>,
    counts: Mutex<HashMap<String, usize>>,
}

impl FakeBackend {
    pub fn new(valid_token: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BackendState {
                valid_token: valid_token.map(str::to_owned),
                issued: 0,
                refresh_status: 200,
                refresh_delay: Duration::ZERO,
                logout_status: 200,
            }),
            requests: Mutex::new(Vec::new()),
            counts: Mutex::new(HashMap::new()),
        })
    }

    /// Make every access token issued so far invalid.
    pub fn expire(&self) {
        self.state.lock().valid_token = None;
    }

    pub fn fail_refresh(&self, status: u16) {
        self.state.lock().refresh_status = status;
    }

    pub fn fail_logout(&self, status: u16) {
        self.state.lock().logout_status = status;
    }

    pub fn delay_refresh(&self, delay: Duration) {
        self.state.lock().refresh_delay = delay;
    }

    pub fn valid_token(&self) -> Option<String> {
        self.state.lock().valid_token.clone()
    }

    /// Number of requests seen for `path` (relative to [`API_BASE`]).
    pub fn count(&self, path: &str) -> usize {
        self.counts.lock().get(path).copied().unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<WireRequest> {
        self.requests.lock().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<WireRequest> {
        let url = format!("{API_BASE}{path}");
        self.requests().into_iter().filter(|r| r.url.split('?').next() == Some(url.as_str())).collect()
    }

    fn issue(&self) -> String {
        let mut state = self.state.lock();
        state.issued += 1;
        let token = format!("tok-{}", state.issued);
        state.valid_token = Some(token.clone());
        token
    }

    fn presented_token(request: &WireRequest) -> Option<String> {
        if let Some(token) = request.cookie("access_token") {
            return Some(token.to_owned());
        }
        request.header("authorization")?.strip_prefix("Bearer ").map(str::to_owned)
    }

    async fn route(&self, path: &str, request: &WireRequest) -> anyhow::Result<Response> {
        let json = |status: u16, body: serde_json::Value| {
            Response::new(status)
                .with_header("content-type", "application/json")
                .with_body(body.to_string())
        };

        match path {
            "accounts/token/refresh/" => {
                let (status, delay) = {
                    let state = self.state.lock();
                    (state.refresh_status, state.refresh_delay)
                };
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if status != 200 {
                    return Ok(json(status, serde_json::json!({ "detail": "Token is invalid or expired" })));
                }
                let token = self.issue();
                Ok(json(200, serde_json::json!({ "access": token }))
                    .with_header("set-cookie", format!("access_token={token}; HttpOnly; Path=/")))
            }
            "accounts/login/" => {
                let body: serde_json::Value =
                    serde_json::from_slice(request.body.as_deref().unwrap_or_default())?;
                if body["password"] != "secret" {
                    return Ok(json(401, serde_json::json!({ "detail": "No active account found" })));
                }
                let token = self.issue();
                Ok(json(200, serde_json::json!({ "access": token, "refresh": "ref-1" }))
                    .with_header("set-cookie", format!("access_token={token}; HttpOnly; Path=/"))
                    .with_header("set-cookie", "refresh_token=ref-1; HttpOnly; Path=/"))
            }
            "accounts/logout/" => {
                let status = self.state.lock().logout_status;
                Ok(json(status, serde_json::json!({ "detail": "logged out" })))
            }
            "accounts/get-csrftoken/" => Ok(json(200, serde_json::json!({}))
                .with_header("set-cookie", "csrftoken=csrf-abc; Path=/")),
            "missing/" => Ok(json(404, serde_json::json!({ "detail": "Not found." }))),
            "admin/" => Ok(json(403, serde_json::json!({ "detail": "Forbidden" }))),
            "boom/" => Ok(Response::new(500).with_body("boom")),
            "always-401/" => Ok(json(401, serde_json::json!({ "detail": "nope" }))),
            "unreachable/" => anyhow::bail!("connection refused"),
            "slow/" => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(json(200, serde_json::json!({})))
            }
            _ => {
                let presented = Self::presented_token(request);
                let valid = self.valid_token();
                if presented.is_some() && presented == valid {
                    Ok(json(200, serde_json::json!({ "path": path, "token": presented })))
                } else {
                    Ok(json(401, serde_json::json!({ "detail": "Authentication credentials were not provided." })))
                }
            }
        }
    }
}

impl HttpTransport for FakeBackend {
    fn execute(
        &self,
        request: WireRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Response>> + Send + '_>> {
        Box::pin(async move {
            let path = request
                .url
                .strip_prefix(API_BASE)
                .unwrap_or(&request.url)
                .split('?')
                .next()
                .unwrap_or_default()
                .to_owned();
            self.requests.lock().push(request.clone());
            *self.counts.lock().entry(path.clone()).or_insert(0) += 1;
            self.route(&path, &request).await
        })
    }
}

/// Server side of one fake WebSocket connection.
pub struct FakePeer {
    pub url: String,
    /// Frames delivered to the channel. Dropping it closes the connection.
    pub inbound: mpsc::UnboundedSender<anyhow::Result<String>>,
    /// Frames the channel sent.
    pub outbound: mpsc::UnboundedReceiver<String>,
}

impl FakePeer {
    pub fn push(&self, text: impl Into<String>) {
        let _ = self.inbound.send(Ok(text.into()));
    }

    pub fn token(&self) -> Option<String> {
        let url = reqwest::Url::parse(&self.url).ok()?;
        url.query_pairs().find(|(k, _)| k == "token").map(|(_, v)| v.into_owned())
    }
}

/// Connector that hands each new connection to the test as a [`FakePeer`].
pub struct FakeConnector {
    urls: Mutex<Vec<String>>,
    refuse: AtomicU32,
    stall_writes: AtomicBool,
    peers: mpsc::UnboundedSender<FakePeer>,
}

impl FakeConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<FakePeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        (Arc::new(Self {
            urls: Mutex::new(Vec::new()),
            refuse: AtomicU32::new(0),
            stall_writes: AtomicBool::new(false),
            peers,
        }), rx)
    }

    /// Fail the next `n` connect attempts.
    pub fn refuse_next(&self, n: u32) {
        self.refuse.store(n, Ordering::SeqCst);
    }

    /// Make writes on connections opened from now on never complete.
    pub fn stall_writes(&self) {
        self.stall_writes.store(true, Ordering::SeqCst);
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

impl WsConnector for FakeConnector {
    fn connect(&self, url: String) -> Pin<Box<dyn Future<Output = anyhow::Result<Link>> + Send + '_>> {
        Box::pin(async move {
            self.urls.lock().push(url.clone());
            let refused = self
                .refuse
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if refused {
                anyhow::bail!("connection refused");
            }

            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
            let _ = self.peers.send(FakePeer { url, inbound: inbound_tx, outbound: outbound_rx });

            let sink: OutboundSink = if self.stall_writes.load(Ordering::SeqCst) {
                Box::pin(futures_util::sink::unfold((), |(), _text: String| {
                    futures_util::future::pending::<anyhow::Result<()>>()
                }))
            } else {
                Box::pin(futures_util::sink::unfold(outbound_tx, |tx, text: String| async move {
                    tx.send(text).map_err(|_| anyhow::anyhow!("peer gone"))?;
                    Ok::<_, anyhow::Error>(tx)
                }))
            };
            Ok(Link { sink, stream: UnboundedReceiverStream::new(inbound_rx).boxed() })
        })
    }
}

pub fn test_config() -> LinkConfig {
    LinkConfig {
        api_base_url: API_BASE.to_owned(),
        ws_base_url: WS_BASE.to_owned(),
        ..Default::default()
    }
}

/// A session over the fakes.
pub struct Harness {
    pub session: Arc<Session>,
    pub backend: Arc<FakeBackend>,
    pub connector: Arc<FakeConnector>,
    pub peers: mpsc::UnboundedReceiver<FakePeer>,
    pub location: Arc<Location>,
    pub events: broadcast::Receiver<SessionEvent>,
}

impl Harness {
    /// Session at `location` holding credential `tok-0`, which the backend accepts.
    pub fn new(config: LinkConfig, location: &str) -> anyhow::Result<Self> {
        let backend = FakeBackend::new(Some("tok-0"));
        let (connector, peers) = FakeConnector::new();
        let events = event_channel();
        let rx = events.subscribe();
        let location = Arc::new(Location::new(location, events.clone()));
        let session = Session::with_events(
            config,
            backend.clone(),
            connector.clone(),
            location.clone(),
            events,
        )?;
        session
            .store()
            .replace(crate::credential::Credential::new("tok-0").with_renewal("ref-0"));
        Ok(Self { session, backend, connector, peers, location, events: rx })
    }

    pub fn start() -> anyhow::Result<Self> {
        Self::new(test_config(), "/home")
    }

    /// Wait for the next connection the session opens.
    pub async fn next_peer(&mut self) -> anyhow::Result<FakePeer> {
        tokio::time::timeout(Duration::from_secs(60), self.peers.recv())
            .await?
            .ok_or_else(|| anyhow::anyhow!("connector dropped"))
    }

    /// Drain queued events.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

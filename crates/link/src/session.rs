// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The session: one credential store, renewal coordinator, gateway and
//! channel manager wired together.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::channel::transport::TungsteniteConnector;
use crate::channel::{Channel, ChannelManager, WsConnector};
use crate::config::LinkConfig;
use crate::credential::renewal::RenewalCoordinator;
use crate::credential::{from_auth_response, Credential, CredentialStore};
use crate::error::RequestError;
use crate::events::{event_channel, SessionEvent};
use crate::gateway::transport::ReqwestTransport;
use crate::gateway::{Gateway, HttpTransport, OutboundRequest, Response};
use crate::policy::{Location, Navigator, Redirector};

pub struct Session {
    config: LinkConfig,
    events: broadcast::Sender<SessionEvent>,
    store: Arc<CredentialStore>,
    redirector: Arc<Redirector>,
    renewal: Arc<RenewalCoordinator>,
    gateway: Gateway,
    channels: ChannelManager,
}

impl Session {
    /// Production session: reqwest and tungstenite transports, an in-memory
    /// [`Location`] starting at `/`, credential seeded from the state file.
    pub fn connect(config: LinkConfig) -> anyhow::Result<Arc<Self>> {
        let events = event_channel();
        let navigator = Arc::new(Location::new("/", events.clone()));
        Self::with_events(
            config,
            Arc::new(ReqwestTransport::new()?),
            Arc::new(TungsteniteConnector),
            navigator,
            events,
        )
    }

    pub fn new(
        config: LinkConfig,
        http: Arc<dyn HttpTransport>,
        ws: Arc<dyn WsConnector>,
        navigator: Arc<dyn Navigator>,
    ) -> anyhow::Result<Arc<Self>> {
        Self::with_events(config, http, ws, navigator, event_channel())
    }

    /// Like [`new`](Self::new), publishing on an existing event channel.
    pub fn with_events(
        config: LinkConfig,
        http: Arc<dyn HttpTransport>,
        ws: Arc<dyn WsConnector>,
        navigator: Arc<dyn Navigator>,
        events: broadcast::Sender<SessionEvent>,
    ) -> anyhow::Result<Arc<Self>> {
        config.validate()?;

        let store = Arc::new(match config.state_file {
            Some(ref path) => CredentialStore::load(path.clone()),
            None => CredentialStore::new(),
        });
        let redirector = Arc::new(Redirector::new(navigator, config.routes()));
        let renewal = RenewalCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&http),
            Arc::clone(&redirector),
            events.clone(),
            config.renewal_options(),
        );
        let gateway = Gateway::new(
            http,
            Arc::clone(&store),
            Arc::clone(&renewal),
            Arc::clone(&redirector),
            config.gateway_options(),
        );
        let channels =
            ChannelManager::new(config.channel_options(), ws, store.clone(), events.clone());

        Ok(Arc::new(Self { config, events, store, redirector, renewal, gateway, channels }))
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn renewal(&self) -> &Arc<RenewalCoordinator> {
        &self.renewal
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn channels(&self) -> &ChannelManager {
        &self.channels
    }

    pub fn navigator(&self) -> &Arc<dyn Navigator> {
        self.redirector.navigator()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn send(&self, request: OutboundRequest) -> Result<Response, RequestError> {
        self.gateway.send(request).await
    }

    pub fn subscribe(
        &self,
        room_id: &str,
        on_message: impl Fn(Value) + Send + Sync + 'static,
    ) -> Arc<Channel> {
        self.channels.subscribe(room_id, on_message)
    }

    pub fn unsubscribe(&self, room_id: &str) -> bool {
        self.channels.unsubscribe(room_id)
    }

    /// Sign in with username and password. Never renews.
    pub async fn login(&self, username: &str, password: &str) -> Result<Arc<Credential>, RequestError> {
        let request = OutboundRequest::post(&self.config.login_path)
            .json(&serde_json::json!({ "username": username, "password": password }))
            .map_err(RequestError::Transport)?;
        let response = self.gateway.send_raw(&request).await?;
        if !response.is_success() {
            tracing::warn!(username, status = response.status, "sign-in rejected");
            return Err(RequestError::Status(response));
        }

        let credential = from_auth_response(&response, None).ok_or_else(|| {
            RequestError::Transport(anyhow::anyhow!("sign-in response carried no credential"))
        })?;
        let credential = self.store.replace(credential);
        tracing::info!(username, "signed in");
        let _ = self.events.send(SessionEvent::SignedIn);
        Ok(credential)
    }

    /// Log out remotely (best effort) and always drop the local credential.
    pub async fn logout(&self) -> Result<(), RequestError> {
        let request = OutboundRequest::post(&self.config.logout_path).body(Bytes::from_static(b"{}"));
        let remote = self.gateway.send_raw(&request).await;

        self.store.invalidate();
        tracing::info!("signed out");
        let _ = self.events.send(SessionEvent::SignedOut);

        match remote {
            Ok(response) if response.is_success() => Ok(()),
            Ok(response) => Err(RequestError::Status(response)),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sessionlink: resilient client session and transport layer.
//!
//! Requests go through a [`gateway::Gateway`] that renews an expired
//! credential once and replays; chat rooms are [`channel::Channel`]s that
//! reconnect on their own. Both share one [`credential::CredentialStore`]
//! owned by a [`session::Session`].

pub mod channel;
pub mod config;
pub mod credential;
pub mod error;
pub mod events;
pub mod gateway;
pub mod policy;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::{Command, LinkConfig};
use crate::events::SessionEvent;
use crate::gateway::{Method, OutboundRequest};
use crate::session::Session;

pub use crate::error::{RenewalError, RequestError};

/// Run one CLI command against a fresh session.
pub async fn run(config: LinkConfig, command: Command) -> anyhow::Result<()> {
    let session = Session::connect(config)?;
    let shutdown = CancellationToken::new();
    let logger = tokio::spawn(log_events(session.events(), shutdown.clone()));

    let result = match command {
        Command::Login { username, password } => {
            let credential = session.login(&username, &password).await?;
            tracing::debug!(has_renewal = credential.renewal.is_some(), "credential stored");
            Ok(())
        }
        Command::Request { method, path, data } => request(&session, &method, &path, data).await,
        Command::Chat { room } => chat(&session, &room).await,
        Command::Logout => Ok(session.logout().await?),
    };

    shutdown.cancel();
    let _ = logger.await;
    result
}

async fn request(
    session: &Session,
    method: &str,
    path: &str,
    data: Option<String>,
) -> anyhow::Result<()> {
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|_| anyhow::anyhow!("invalid method: {method}"))?;
    let mut request = OutboundRequest::new(method, path);
    if let Some(data) = data {
        let body: serde_json::Value = serde_json::from_str(&data)?;
        request = request.json(&body)?;
    }

    let response = session.send(request).await?;
    println!("{}", response.text());
    Ok(())
}

async fn chat(session: &Arc<Session>, room: &str) -> anyhow::Result<()> {
    let channel = session.subscribe(room, |message| println!("{message}"));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<serde_json::Value>(line) {
                    Ok(payload) => {
                        if !channel.send(&payload) {
                            tracing::warn!(room, "channel not open, message dropped");
                        }
                    }
                    Err(e) => tracing::warn!(err = %e, "input is not JSON, ignored"),
                }
            }
        }
    }

    session.unsubscribe(room);
    Ok(())
}

async fn log_events(mut rx: broadcast::Receiver<SessionEvent>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = rx.recv() => match event {
                Ok(event) => tracing::debug!(?event, "session event"),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!(skipped = n, "session event log lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

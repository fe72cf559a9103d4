// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end tests: a real session (reqwest + tungstenite) against the
//! in-process test backend.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use sessionlink::channel::ConnectionState;
use sessionlink::gateway::OutboundRequest;
use sessionlink::policy::Navigator;
use sessionlink::session::Session;
use sessionlink::RequestError;
use sessionlink_specs::{wait_for_state, TestBackend};

const TIMEOUT: Duration = Duration::from_secs(10);

async fn signed_in(backend: &TestBackend) -> anyhow::Result<std::sync::Arc<Session>> {
    let session = Session::connect(backend.config())?;
    session.login("ann", "secret").await?;
    Ok(session)
}

// -- HTTP ---------------------------------------------------------------------

#[tokio::test]
async fn login_then_authenticated_request() -> anyhow::Result<()> {
    let backend = TestBackend::start().await?;
    let session = signed_in(&backend).await?;

    let me: Value = session.send(OutboundRequest::get("accounts/me/")).await?.json()?;
    assert_eq!(me["username"], "ann");
    assert_eq!(backend.logins(), 1);
    assert_eq!(backend.refreshes(), 0);
    Ok(())
}

#[tokio::test]
async fn wrong_password_is_rejected() -> anyhow::Result<()> {
    let backend = TestBackend::start().await?;
    let session = Session::connect(backend.config())?;

    match session.login("ann", "nope").await {
        Err(e) => assert_eq!(e.status(), Some(401)),
        Ok(_) => anyhow::bail!("login should fail"),
    }
    assert!(session.store().current().is_none());
    Ok(())
}

#[tokio::test]
async fn expired_access_is_renewed_transparently() -> anyhow::Result<()> {
    let backend = TestBackend::start().await?;
    let session = signed_in(&backend).await?;
    let before = session.store().access_token();

    backend.expire_access();
    let me: Value = session.send(OutboundRequest::get("accounts/me/")).await?.json()?;

    assert_eq!(me["username"], "ann");
    assert_eq!(backend.refreshes(), 1);
    assert_ne!(session.store().access_token(), before);
    Ok(())
}

#[tokio::test]
async fn concurrent_expiry_renews_once() -> anyhow::Result<()> {
    let backend = TestBackend::start().await?;
    let session = signed_in(&backend).await?;
    backend.expire_access();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let session = session.clone();
            tokio::spawn(async move { session.send(OutboundRequest::get("accounts/me/")).await })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await??.status, 200);
    }
    assert_eq!(backend.refreshes(), 1);
    Ok(())
}

#[tokio::test]
async fn failed_renewal_signs_out() -> anyhow::Result<()> {
    let backend = TestBackend::start().await?;
    let session = signed_in(&backend).await?;
    backend.expire_access();
    backend.revoke_refresh();

    let result = session.send(OutboundRequest::get("accounts/me/")).await;
    assert!(matches!(result, Err(RequestError::Renewal(_))));
    assert!(session.store().current().is_none());
    assert_eq!(backend.logouts(), 1);
    assert_eq!(session.navigator().current_location(), "/sign-in");
    Ok(())
}

#[tokio::test]
async fn not_found_redirects() -> anyhow::Result<()> {
    let backend = TestBackend::start().await?;
    let session = signed_in(&backend).await?;

    let result = session.send(OutboundRequest::get("listings/404/")).await;
    assert!(matches!(result, Err(RequestError::NotFound(_))));
    assert_eq!(session.navigator().current_location(), "/not-found");
    Ok(())
}

#[tokio::test]
async fn logout_clears_credential() -> anyhow::Result<()> {
    let backend = TestBackend::start().await?;
    let session = signed_in(&backend).await?;

    session.logout().await?;
    assert!(session.store().current().is_none());
    assert_eq!(backend.logouts(), 1);
    Ok(())
}

// -- Chat ---------------------------------------------------------------------

#[tokio::test]
async fn chat_round_trip() -> anyhow::Result<()> {
    let backend = TestBackend::start().await?;
    let session = signed_in(&backend).await?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let channel = session.subscribe("lobby", move |message| {
        let _ = tx.send(message);
    });
    wait_for_state(&channel, ConnectionState::Open, TIMEOUT).await?;

    assert!(channel.send(&json!({ "message": "hello", "sender": "ann" })));
    let reply = tokio::time::timeout(TIMEOUT, rx.recv()).await?;
    assert_eq!(
        reply,
        Some(json!({ "room": "lobby", "echo": { "message": "hello", "sender": "ann" } }))
    );
    Ok(())
}

#[tokio::test]
async fn chat_reconnects_with_renewed_credential() -> anyhow::Result<()> {
    let backend = TestBackend::start().await?;
    let session = signed_in(&backend).await?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let channel = session.subscribe("lobby", move |message| {
        let _ = tx.send(message);
    });
    wait_for_state(&channel, ConnectionState::Open, TIMEOUT).await?;
    let first_token = session.store().access_token();

    // Renew through the gateway, then kill the socket.
    backend.expire_access();
    session.send(OutboundRequest::get("accounts/me/")).await?;
    let renewed = session.store().access_token();
    assert_ne!(renewed, first_token);

    backend.drop_sockets();
    wait_for_state(&channel, ConnectionState::Closed, TIMEOUT).await?;
    wait_for_state(&channel, ConnectionState::Open, TIMEOUT).await?;

    let tokens = backend.ws_tokens();
    assert_eq!(tokens.len(), 2);
    assert_eq!(Some(tokens[1].clone()), renewed);

    assert!(channel.send(&json!({ "n": 2 })));
    let reply = tokio::time::timeout(TIMEOUT, rx.recv()).await?;
    assert_eq!(reply, Some(json!({ "room": "lobby", "echo": { "n": 2 } })));

    assert!(session.unsubscribe("lobby"));
    Ok(())
}

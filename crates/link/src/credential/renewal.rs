// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-flight credential renewal.
//!
//! At most one renewal call is in flight per session. Callers that ask for a
//! fresh credential while one is running attach to the same shared future.
//! The renewal runs in its own task, so a cancelled caller never aborts it
//! for the others.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::config::CredentialPlacement;
use crate::credential::{from_auth_response, Credential, CredentialStore};
use crate::error::RenewalError;
use crate::events::SessionEvent;
use crate::gateway::{bounded, build_wire, HttpTransport, OutboundRequest, Response};
use crate::policy::{Destination, Redirector};

type RenewalOutcome = Result<Arc<Credential>, RenewalError>;
type PendingRenewal = Shared<BoxFuture<'static, RenewalOutcome>>;

/// Endpoints and limits used by the coordinator.
#[derive(Debug, Clone)]
pub struct RenewalOptions {
    pub base_url: String,
    pub refresh_path: String,
    pub logout_path: String,
    pub placement: CredentialPlacement,
    pub timeout: Option<Duration>,
}

pub struct RenewalCoordinator {
    store: Arc<CredentialStore>,
    transport: Arc<dyn HttpTransport>,
    redirector: Arc<Redirector>,
    events: broadcast::Sender<SessionEvent>,
    options: RenewalOptions,
    /// In-flight renewal tagged with its sequence number.
    pending: Mutex<Option<(u64, PendingRenewal)>>,
    started: AtomicU64,
}

impl RenewalCoordinator {
    pub fn new(
        store: Arc<CredentialStore>,
        transport: Arc<dyn HttpTransport>,
        redirector: Arc<Redirector>,
        events: broadcast::Sender<SessionEvent>,
        options: RenewalOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            transport,
            redirector,
            events,
            options,
            pending: Mutex::new(None),
            started: AtomicU64::new(0),
        })
    }

    /// Return a fresh credential, joining the in-flight renewal if any.
    pub async fn ensure_fresh(self: &Arc<Self>) -> RenewalOutcome {
        self.renew().await
    }

    /// Start a renewal, or join the one already in flight.
    pub async fn renew(self: &Arc<Self>) -> RenewalOutcome {
        let pending = {
            let mut slot = self.pending.lock();
            self.join_or_start(&mut slot)
        };
        pending.await
    }

    /// Like [`ensure_fresh`](Self::ensure_fresh), for a request that failed
    /// with the credential of `generation`.
    ///
    /// If the credential has changed since, the request was simply stale:
    /// the current credential is returned without renewing again.
    pub async fn ensure_fresh_after(self: &Arc<Self>, generation: u64) -> RenewalOutcome {
        let pending = {
            let mut slot = self.pending.lock();
            let (current_generation, current) = self.store.snapshot();
            if current_generation != generation {
                tracing::debug!(generation, current_generation, "credential already replaced");
                return current.ok_or(RenewalError::Invalidated);
            }
            self.join_or_start(&mut slot)
        };
        pending.await
    }

    /// Number of renewal calls started so far.
    pub fn renewals_started(&self) -> u64 {
        self.started.load(Ordering::SeqCst)
    }

    fn join_or_start(self: &Arc<Self>, slot: &mut Option<(u64, PendingRenewal)>) -> PendingRenewal {
        if let Some((_, ref pending)) = *slot {
            if pending.peek().is_none() {
                return pending.clone();
            }
        }

        let seq = self.started.fetch_add(1, Ordering::SeqCst) + 1;
        let this = Arc::clone(self);
        // The slot lock is held by our caller, so the task cannot clear the
        // slot before it has been filled.
        let task = tokio::spawn(async move {
            let outcome = this.perform(seq).await;
            let mut slot = this.pending.lock();
            if matches!(*slot, Some((id, _)) if id == seq) {
                *slot = None;
            }
            outcome
        });
        let pending = async move {
            task.await.unwrap_or_else(|e| {
                tracing::warn!(err = %e, "renewal task ended abnormally");
                Err(RenewalError::Aborted)
            })
        }
        .boxed()
        .shared();
        *slot = Some((seq, pending.clone()));
        pending
    }

    async fn perform(&self, seq: u64) -> RenewalOutcome {
        let previous = self.store.current();
        tracing::debug!(seq, "renewing credential");

        match self.call_refresh(previous.as_deref()).await {
            Ok(credential) => {
                let credential = self.store.replace(credential);
                let generation = self.store.generation();
                tracing::info!(seq, generation, "credential renewed");
                let _ = self.events.send(SessionEvent::Renewed { generation });
                Ok(credential)
            }
            Err(e) => {
                self.sign_out(previous.as_deref(), &e).await;
                Err(e)
            }
        }
    }

    async fn call_refresh(&self, previous: Option<&Credential>) -> Result<Credential, RenewalError> {
        let response = self
            .post(&self.options.refresh_path, previous)
            .await?;
        if !response.is_success() {
            return Err(RenewalError::Rejected { status: response.status });
        }
        from_auth_response(&response, previous).ok_or(RenewalError::MissingCredential)
    }

    /// Invalidate locally, log out remotely (best effort), redirect to sign-in.
    async fn sign_out(&self, previous: Option<&Credential>, error: &RenewalError) {
        tracing::warn!(err = %error, code = error.as_str(), "credential renewal failed, signing out");
        self.store.invalidate();

        match self.post(&self.options.logout_path, previous).await {
            Ok(response) => tracing::debug!(status = response.status, "remote logout"),
            Err(e) => tracing::debug!(err = %e, "remote logout failed"),
        }

        self.redirector.redirect(Destination::SignIn);
        let _ = self.events.send(SessionEvent::RenewalFailed { error: error.to_string() });
    }

    async fn post(&self, path: &str, credential: Option<&Credential>) -> Result<Response, RenewalError> {
        let request = OutboundRequest::post(path).body(Bytes::from_static(b"{}"));
        let wire = build_wire(&self.options.base_url, &request, self.options.placement, credential)
            .map_err(|e| RenewalError::Transport(format!("{e:#}")))?;
        match bounded(self.options.timeout, self.transport.execute(wire)).await {
            Some(Ok(response)) => Ok(response),
            Some(Err(e)) => Err(RenewalError::Transport(format!("{e:#}"))),
            None => Err(RenewalError::TimedOut),
        }
    }
}

#[cfg(test)]
#[path = "renewal_tests.rs"]
mod tests;

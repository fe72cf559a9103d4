// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential store: the one current session credential, shared by the
//! request gateway and the channel connector.
//!
//! The store is written by the renewal coordinator and by explicit
//! login/logout. Readers take a cheap `Arc` snapshot; replacement is atomic.
//! A generation counter lets the gateway tell whether the credential changed
//! while a request was in flight.

pub mod persist;
pub mod renewal;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

use crate::channel::TokenProvider;
use crate::credential::persist::PersistedCredential;
use crate::gateway::Response;

/// Cookie carrying the access token.
pub const ACCESS_COOKIE: &str = "access_token";
/// Cookie carrying the renewal (refresh) token.
pub const RENEWAL_COOKIE: &str = "refresh_token";

/// An opaque renewable session credential.
///
/// No expiry is tracked: validity is only learned from server responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub value: String,
    /// Secret presented to the renewal endpoint, if the server issued one.
    pub renewal: Option<String>,
    pub valid_since: SystemTime,
}

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self { value: value.into(), renewal: None, valid_since: SystemTime::now() }
    }

    pub fn with_renewal(mut self, renewal: impl Into<String>) -> Self {
        self.renewal = Some(renewal.into());
        self
    }
}

/// Process-wide holder of the current [`Credential`].
pub struct CredentialStore {
    current: RwLock<Option<Arc<Credential>>>,
    generation: AtomicU64,
    state_file: Option<PathBuf>,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore {
    pub fn new() -> Self {
        Self { current: RwLock::new(None), generation: AtomicU64::new(0), state_file: None }
    }

    /// Create a store seeded with `credential`.
    pub fn seeded(credential: Credential) -> Self {
        Self {
            current: RwLock::new(Some(Arc::new(credential))),
            generation: AtomicU64::new(0),
            state_file: None,
        }
    }

    /// Create a store persisted to `path`, seeded from it when readable.
    pub fn load(path: PathBuf) -> Self {
        let current = match persist::load(&path) {
            Ok(persisted) => Some(Arc::new(persisted.into_credential())),
            Err(e) => {
                if path.exists() {
                    tracing::warn!(path = %path.display(), err = %e, "ignoring unreadable credential file");
                }
                None
            }
        };
        Self { current: RwLock::new(current), generation: AtomicU64::new(0), state_file: Some(path) }
    }

    /// Current credential, if any.
    pub fn current(&self) -> Option<Arc<Credential>> {
        self.current.read().clone()
    }

    /// Current access token value, if any.
    pub fn access_token(&self) -> Option<String> {
        self.current.read().as_ref().map(|c| c.value.clone())
    }

    /// Number of replace/invalidate operations so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Generation and credential read together.
    pub fn snapshot(&self) -> (u64, Option<Arc<Credential>>) {
        let current = self.current.read();
        (self.generation.load(Ordering::SeqCst), current.clone())
    }

    /// Atomically replace the current credential.
    ///
    /// The state file is written under the same guard, so the file always
    /// matches the last in-memory swap.
    pub fn replace(&self, credential: Credential) -> Arc<Credential> {
        let credential = Arc::new(credential);
        let mut current = self.current.write();
        *current = Some(Arc::clone(&credential));
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(ref path) = self.state_file {
            if let Err(e) = persist::save(path, &PersistedCredential::from_credential(&credential))
            {
                tracing::warn!(path = %path.display(), err = %e, "failed to persist credential");
            }
        }
        drop(current);
        credential
    }

    /// Drop the current credential and its state file.
    pub fn invalidate(&self) {
        let mut current = self.current.write();
        *current = None;
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(ref path) = self.state_file {
            if let Err(e) = persist::remove(path) {
                tracing::warn!(path = %path.display(), err = %e, "failed to remove credential file");
            }
        }
    }
}

impl TokenProvider for CredentialStore {
    fn access_token(&self) -> Option<String> {
        CredentialStore::access_token(self)
    }
}

/// Extract a credential from a login or renewal response.
///
/// Prefers the JSON body (`access`, `refresh`), falling back to `Set-Cookie`.
/// A renewal secret missing from the response is carried over from `previous`.
pub fn from_auth_response(response: &Response, previous: Option<&Credential>) -> Option<Credential> {
    let body = serde_json::from_slice::<serde_json::Value>(&response.body).ok();
    let body_field = |name: &str| {
        body.as_ref()
            .and_then(|b| b.get(name))
            .and_then(|v| v.as_str())
            .filter(|v| !v.is_empty())
            .map(str::to_owned)
    };

    let value = body_field("access").or_else(|| set_cookie_value(response, ACCESS_COOKIE))?;
    let renewal = body_field("refresh")
        .or_else(|| set_cookie_value(response, RENEWAL_COOKIE))
        .or_else(|| previous.and_then(|p| p.renewal.clone()));

    Some(Credential { value, renewal, valid_since: SystemTime::now() })
}

/// Find the value of cookie `name` among the response's `Set-Cookie` headers.
pub fn set_cookie_value(response: &Response, name: &str) -> Option<String> {
    response.header_values("set-cookie").find_map(|header| {
        let pair = header.split(';').next()?.trim();
        let (key, value) = pair.split_once('=')?;
        (key.trim() == name && !value.is_empty()).then(|| value.trim().to_owned())
    })
}

/// Epoch millis for `time` (0 before the epoch).
pub fn epoch_ms(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Inverse of [`epoch_ms`].
pub fn from_epoch_ms(ms: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms)
}

#[cfg(test)]
#[path = "credential_tests.rs"]
mod tests;

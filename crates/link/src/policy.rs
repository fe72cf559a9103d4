// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Redirect/failure policy: what to do with each terminal condition, and the
//! navigator that carries out redirects.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;

use crate::events::SessionEvent;

/// A failure condition observed by the gateway or the renewal coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// 401 from a resource call.
    Unauthorized,
    RenewalSucceeded,
    RenewalFailed,
    /// 403.
    Forbidden,
    /// 404.
    NotFound,
    /// Any other non-success status.
    OtherFailure,
}

impl Condition {
    /// Classify a response status. `None` means success.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200..=299 => None,
            401 => Some(Self::Unauthorized),
            403 => Some(Self::Forbidden),
            404 => Some(Self::NotFound),
            _ => Some(Self::OtherFailure),
        }
    }
}

/// Where a redirect goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    SignIn,
    Forbidden,
    NotFound,
}

/// What the caller of [`action_for`] must do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Renew the credential, then replay once.
    Renew,
    /// Replay the original call.
    Resume,
    /// Invalidate, best-effort remote logout, redirect to sign-in.
    SignOut,
    /// Redirect, then fail the call.
    RedirectAndFail(Destination),
    /// Return the failure unchanged.
    Propagate,
}

/// The failure policy table.
pub fn action_for(condition: Condition) -> Action {
    match condition {
        Condition::Unauthorized => Action::Renew,
        Condition::RenewalSucceeded => Action::Resume,
        Condition::RenewalFailed => Action::SignOut,
        Condition::Forbidden => Action::RedirectAndFail(Destination::Forbidden),
        Condition::NotFound => Action::RedirectAndFail(Destination::NotFound),
        Condition::OtherFailure => Action::Propagate,
    }
}

/// Route paths for each [`Destination`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routes {
    pub sign_in: String,
    pub forbidden: String,
    pub not_found: String,
}

impl Default for Routes {
    fn default() -> Self {
        Self {
            sign_in: "/sign-in".to_owned(),
            forbidden: "/forbidden".to_owned(),
            not_found: "/not-found".to_owned(),
        }
    }
}

impl Routes {
    pub fn path(&self, destination: Destination) -> &str {
        match destination {
            Destination::SignIn => &self.sign_in,
            Destination::Forbidden => &self.forbidden,
            Destination::NotFound => &self.not_found,
        }
    }
}

/// Navigation surface of the embedding application.
pub trait Navigator: Send + Sync + 'static {
    /// Current location path.
    fn current_location(&self) -> String;

    /// Move to `path`.
    fn navigate(&self, path: &str);
}

/// Carries out redirects through a [`Navigator`].
pub struct Redirector {
    navigator: Arc<dyn Navigator>,
    routes: Routes,
    // Serializes check-then-navigate so concurrent sign-in redirects collapse.
    guard: Mutex<()>,
}

impl Redirector {
    pub fn new(navigator: Arc<dyn Navigator>, routes: Routes) -> Self {
        Self { navigator, routes, guard: Mutex::new(()) }
    }

    pub fn routes(&self) -> &Routes {
        &self.routes
    }

    pub fn navigator(&self) -> &Arc<dyn Navigator> {
        &self.navigator
    }

    /// Redirect to `destination`. Returns whether navigation happened.
    ///
    /// Sign-in redirects are skipped when already on the sign-in route.
    pub fn redirect(&self, destination: Destination) -> bool {
        let target = self.routes.path(destination);
        let _guard = self.guard.lock();
        if destination == Destination::SignIn && self.navigator.current_location() == target {
            tracing::debug!(to = %target, "already at sign-in, redirect skipped");
            return false;
        }
        tracing::info!(to = %target, "redirecting");
        self.navigator.navigate(target);
        true
    }
}

/// In-memory navigator that records the current path and publishes
/// [`SessionEvent::Navigated`].
pub struct Location {
    path: RwLock<String>,
    events: broadcast::Sender<SessionEvent>,
}

impl Location {
    pub fn new(initial: impl Into<String>, events: broadcast::Sender<SessionEvent>) -> Self {
        Self { path: RwLock::new(initial.into()), events }
    }
}

impl Navigator for Location {
    fn current_location(&self) -> String {
        self.path.read().clone()
    }

    fn navigate(&self, path: &str) {
        *self.path.write() = path.to_owned();
        let _ = self.events.send(SessionEvent::Navigated { to: path.to_owned() });
    }
}

#[cfg(test)]
#[path = "policy_tests.rs"]
mod tests;

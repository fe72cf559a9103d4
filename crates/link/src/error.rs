// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use crate::gateway::Response;

/// Why a credential renewal failed.
///
/// `Clone` because a single renewal outcome is handed to every caller that
/// was waiting on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalError {
    /// The renewal endpoint answered with a non-success status.
    Rejected { status: u16 },
    /// The renewal call never produced a response.
    Transport(String),
    /// The renewal call exceeded the configured bound.
    TimedOut,
    /// The endpoint answered 2xx but carried no access token.
    MissingCredential,
    /// The credential was invalidated after the failing request was sent.
    Invalidated,
    /// The renewal task ended without producing an outcome.
    Aborted,
}

impl RenewalError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rejected { .. } => "RENEWAL_REJECTED",
            Self::Transport(_) => "RENEWAL_TRANSPORT",
            Self::TimedOut => "RENEWAL_TIMED_OUT",
            Self::MissingCredential => "RENEWAL_MISSING_CREDENTIAL",
            Self::Invalidated => "CREDENTIAL_INVALIDATED",
            Self::Aborted => "RENEWAL_ABORTED",
        }
    }
}

impl fmt::Display for RenewalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected { status } => write!(f, "renewal rejected ({status})"),
            Self::Transport(msg) => write!(f, "renewal transport error: {msg}"),
            Self::TimedOut => f.write_str("renewal timed out"),
            Self::MissingCredential => f.write_str("renewal response carried no credential"),
            Self::Invalidated => f.write_str("credential was invalidated"),
            Self::Aborted => f.write_str("renewal aborted"),
        }
    }
}

impl std::error::Error for RenewalError {}

/// Failure of a request sent through the [`Gateway`](crate::gateway::Gateway).
///
/// Business-level failures are carried untouched in [`RequestError::Status`];
/// the gateway never reinterprets them.
#[derive(Debug)]
pub enum RequestError {
    /// The credential could not be renewed after a 401.
    Renewal(RenewalError),
    /// 403; the forbidden redirect has already happened.
    Forbidden(Response),
    /// 404; the not-found redirect has already happened.
    NotFound(Response),
    /// Any other non-success status, including a 401 on the replay.
    Status(Response),
    /// The per-request bound elapsed.
    TimedOut,
    /// The transport failed before a response arrived.
    Transport(anyhow::Error),
}

impl RequestError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Renewal(_) => "RENEWAL_FAILED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Status(resp) if resp.status == 401 => "AUTH_EXPIRED",
            Self::Status(_) => "REQUEST_FAILED",
            Self::TimedOut => "TIMED_OUT",
            Self::Transport(_) => "TRANSPORT",
        }
    }

    /// The response behind this error, if the server answered.
    pub fn response(&self) -> Option<&Response> {
        match self {
            Self::Forbidden(resp) | Self::NotFound(resp) | Self::Status(resp) => Some(resp),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        self.response().map(|resp| resp.status)
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Renewal(e) => write!(f, "{}: {e}", self.code()),
            Self::Forbidden(resp) | Self::NotFound(resp) | Self::Status(resp) => {
                write!(f, "{} ({})", self.code(), resp.status)
            }
            Self::TimedOut => f.write_str("request timed out"),
            Self::Transport(e) => write!(f, "transport error: {e:#}"),
        }
    }
}

impl std::error::Error for RequestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Renewal(e) => Some(e),
            Self::Transport(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<RenewalError> for RequestError {
    fn from(e: RenewalError) -> Self {
        Self::Renewal(e)
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;

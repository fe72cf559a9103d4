// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use crate::channel::backoff::ReconnectPolicy;
use crate::channel::ChannelOptions;
use crate::credential::renewal::RenewalOptions;
use crate::gateway::GatewayOptions;
use crate::policy::Routes;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api/";
pub const DEFAULT_WS_BASE_URL: &str = "ws://localhost:8000";
pub const DEFAULT_LOGIN_PATH: &str = "accounts/login/";
pub const DEFAULT_LOGOUT_PATH: &str = "accounts/logout/";
pub const DEFAULT_REFRESH_PATH: &str = "accounts/token/refresh/";
pub const DEFAULT_CSRF_PATH: &str = "accounts/get-csrftoken/";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_RENEWAL_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1_000;
pub const DEFAULT_RECONNECT_MAX_MS: u64 = 30_000;

/// Where the access token goes on outbound requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum CredentialPlacement {
    /// `Cookie: access_token=...`
    #[default]
    Cookie,
    /// `Authorization: Bearer ...`
    Bearer,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum BackoffKind {
    #[default]
    Fixed,
    Exponential,
}

/// Session configuration.
#[derive(Debug, Clone, clap::Args)]
pub struct LinkConfig {
    /// Base URL that request paths are joined onto.
    #[arg(long, default_value = DEFAULT_API_BASE_URL, env = "SESSIONLINK_API_BASE_URL")]
    pub api_base_url: String,

    /// Base URL for realtime channels (ws:// or wss://).
    #[arg(long, default_value = DEFAULT_WS_BASE_URL, env = "SESSIONLINK_WS_BASE_URL")]
    pub ws_base_url: String,

    #[arg(long, default_value = DEFAULT_LOGIN_PATH, env = "SESSIONLINK_LOGIN_PATH")]
    pub login_path: String,

    #[arg(long, default_value = DEFAULT_LOGOUT_PATH, env = "SESSIONLINK_LOGOUT_PATH")]
    pub logout_path: String,

    /// Credential renewal endpoint.
    #[arg(long, default_value = DEFAULT_REFRESH_PATH, env = "SESSIONLINK_REFRESH_PATH")]
    pub refresh_path: String,

    #[arg(long, default_value = DEFAULT_CSRF_PATH, env = "SESSIONLINK_CSRF_PATH")]
    pub csrf_path: String,

    #[arg(long, default_value = "/sign-in", env = "SESSIONLINK_SIGN_IN_ROUTE")]
    pub sign_in_route: String,

    #[arg(long, default_value = "/forbidden", env = "SESSIONLINK_FORBIDDEN_ROUTE")]
    pub forbidden_route: String,

    #[arg(long, default_value = "/not-found", env = "SESSIONLINK_NOT_FOUND_ROUTE")]
    pub not_found_route: String,

    /// How the access token is attached to requests.
    #[arg(long, value_enum, default_value_t = CredentialPlacement::Cookie, env = "SESSIONLINK_CREDENTIAL_PLACEMENT")]
    pub credential_placement: CredentialPlacement,

    /// Fetch a CSRF token before unsafe requests and send it as X-CSRFToken.
    #[arg(long, env = "SESSIONLINK_CSRF")]
    pub csrf: bool,

    /// Per-request timeout in milliseconds (0 disables).
    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT_MS, env = "SESSIONLINK_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: u64,

    /// Renewal call timeout in milliseconds (0 disables).
    #[arg(long, default_value_t = DEFAULT_RENEWAL_TIMEOUT_MS, env = "SESSIONLINK_RENEWAL_TIMEOUT_MS")]
    pub renewal_timeout_ms: u64,

    /// Channel reconnect delay in milliseconds (initial delay for exponential).
    #[arg(long, default_value_t = DEFAULT_RECONNECT_DELAY_MS, env = "SESSIONLINK_RECONNECT_DELAY_MS")]
    pub reconnect_delay_ms: u64,

    #[arg(long, value_enum, default_value_t = BackoffKind::Fixed, env = "SESSIONLINK_RECONNECT_BACKOFF")]
    pub reconnect_backoff: BackoffKind,

    /// Cap for exponential reconnect delay in milliseconds.
    #[arg(long, default_value_t = DEFAULT_RECONNECT_MAX_MS, env = "SESSIONLINK_RECONNECT_MAX_MS")]
    pub reconnect_max_ms: u64,

    /// Emit a degraded event after this many consecutive failed connects (at least 1).
    #[arg(long, env = "SESSIONLINK_RECONNECT_ALERT_AFTER")]
    pub reconnect_alert_after: Option<u32>,

    /// File the credential is persisted to between runs.
    #[arg(long, env = "SESSIONLINK_STATE_FILE")]
    pub state_file: Option<PathBuf>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.into(),
            ws_base_url: DEFAULT_WS_BASE_URL.into(),
            login_path: DEFAULT_LOGIN_PATH.into(),
            logout_path: DEFAULT_LOGOUT_PATH.into(),
            refresh_path: DEFAULT_REFRESH_PATH.into(),
            csrf_path: DEFAULT_CSRF_PATH.into(),
            sign_in_route: "/sign-in".into(),
            forbidden_route: "/forbidden".into(),
            not_found_route: "/not-found".into(),
            credential_placement: CredentialPlacement::Cookie,
            csrf: false,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            renewal_timeout_ms: DEFAULT_RENEWAL_TIMEOUT_MS,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            reconnect_backoff: BackoffKind::Fixed,
            reconnect_max_ms: DEFAULT_RECONNECT_MAX_MS,
            reconnect_alert_after: None,
            state_file: None,
        }
    }
}

fn optional_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl LinkConfig {
    /// Check that the base URLs parse and use a supported scheme.
    pub fn validate(&self) -> anyhow::Result<()> {
        let api = reqwest::Url::parse(&self.api_base_url)
            .map_err(|e| anyhow::anyhow!("invalid --api-base-url {:?}: {e}", self.api_base_url))?;
        if !matches!(api.scheme(), "http" | "https") {
            anyhow::bail!("--api-base-url must be http(s), got {}", api.scheme());
        }
        let ws = reqwest::Url::parse(&self.ws_base_url)
            .map_err(|e| anyhow::anyhow!("invalid --ws-base-url {:?}: {e}", self.ws_base_url))?;
        if !matches!(ws.scheme(), "ws" | "wss" | "http" | "https") {
            anyhow::bail!("--ws-base-url must be ws(s), got {}", ws.scheme());
        }
        if self.reconnect_backoff == BackoffKind::Exponential
            && self.reconnect_max_ms < self.reconnect_delay_ms
        {
            anyhow::bail!("--reconnect-max-ms must be at least --reconnect-delay-ms");
        }
        if self.reconnect_alert_after == Some(0) {
            anyhow::bail!("--reconnect-alert-after must be at least 1");
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        optional_ms(self.request_timeout_ms)
    }

    pub fn renewal_timeout(&self) -> Option<Duration> {
        optional_ms(self.renewal_timeout_ms)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        let delay = Duration::from_millis(self.reconnect_delay_ms);
        match self.reconnect_backoff {
            BackoffKind::Fixed => ReconnectPolicy::Fixed { delay },
            BackoffKind::Exponential => ReconnectPolicy::Exponential {
                initial: delay,
                max: Duration::from_millis(self.reconnect_max_ms),
            },
        }
    }

    pub fn routes(&self) -> Routes {
        Routes {
            sign_in: self.sign_in_route.clone(),
            forbidden: self.forbidden_route.clone(),
            not_found: self.not_found_route.clone(),
        }
    }

    pub fn gateway_options(&self) -> GatewayOptions {
        GatewayOptions {
            base_url: self.api_base_url.clone(),
            placement: self.credential_placement,
            csrf_path: self.csrf.then(|| self.csrf_path.clone()),
            timeout: self.request_timeout(),
        }
    }

    pub fn renewal_options(&self) -> RenewalOptions {
        RenewalOptions {
            base_url: self.api_base_url.clone(),
            refresh_path: self.refresh_path.clone(),
            logout_path: self.logout_path.clone(),
            placement: self.credential_placement,
            timeout: self.renewal_timeout(),
        }
    }

    pub fn channel_options(&self) -> ChannelOptions {
        ChannelOptions {
            ws_base_url: self.ws_base_url.clone(),
            reconnect: self.reconnect_policy(),
            alert_after: self.reconnect_alert_after,
        }
    }
}

/// Command-line interface of the `sessionlink` binary.
#[derive(Debug, Parser)]
#[command(name = "sessionlink", version, about = "Resilient session client for the chat/listings backend")]
pub struct Cli {
    #[command(flatten)]
    pub link: LinkConfig,

    /// Log format (json or text).
    #[arg(long, env = "SESSIONLINK_LOG_FORMAT", default_value = "text", global = true)]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "SESSIONLINK_LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Sign in and store the credential.
    Login {
        #[arg(long)]
        username: String,
        #[arg(long, env = "SESSIONLINK_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Send one request through the gateway and print the body.
    Request {
        /// HTTP method (GET, POST, PUT, PATCH, DELETE).
        method: String,
        /// Path relative to the API base URL.
        path: String,
        /// JSON body.
        #[arg(long)]
        data: Option<String>,
    },
    /// Join a chat room: print inbound messages, send stdin lines.
    Chat { room: String },
    /// Sign out and drop the stored credential.
    Logout,
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

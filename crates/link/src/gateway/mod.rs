// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request gateway: every outbound HTTP call goes through [`Gateway::send`].
//!
//! The gateway attaches the current credential, renews it once on a 401 and
//! replays the original request, and applies the redirect policy to 403/404.

pub mod transport;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

pub use reqwest::Method;

use crate::config::CredentialPlacement;
use crate::credential::renewal::RenewalCoordinator;
use crate::credential::{set_cookie_value, Credential, CredentialStore, ACCESS_COOKIE, RENEWAL_COOKIE};
use crate::error::RequestError;
use crate::policy::{action_for, Action, Condition, Destination, Redirector};

/// Marker header sent on every request.
pub const REQUESTED_WITH: (&str, &str) = ("X-Requested-With", "XMLHttpRequest");
/// Correlation header carrying [`OutboundRequest::id`].
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";
pub const CSRF_COOKIE: &str = "csrftoken";
pub const CSRF_HEADER: &str = "X-CSRFToken";

/// A request as described by application code.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Option<Bytes>,
    id: Uuid,
    retried: bool,
}

impl OutboundRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            id: Uuid::new_v4(),
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Set a JSON body.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> anyhow::Result<Self> {
        self.body = Some(Bytes::from(serde_json::to_vec(body)?));
        Ok(self)
    }

    /// Set a raw body, sent as `application/json`.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Correlation id, identical on the original attempt and the replay.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn retried(&self) -> bool {
        self.retried
    }

    /// Flip `retried` to true. Returns false if it was already set.
    pub(crate) fn mark_retried(&mut self) -> bool {
        !std::mem::replace(&mut self.retried, true)
    }
}

/// A fully resolved request handed to an [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct WireRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl WireRequest {
    /// First value of header `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Value of cookie `name` from the `Cookie` header.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.header("cookie")?.split(';').find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key == name).then_some(value)
        })
    }

    /// Append a cookie, merging into an existing `Cookie` header.
    pub fn add_cookie(&mut self, name: &str, value: &str) {
        let pair = format!("{name}={value}");
        match self.headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case("cookie")) {
            Some((_, existing)) => {
                existing.push_str("; ");
                existing.push_str(&pair);
            }
            None => self.headers.push(("Cookie".to_owned(), pair)),
        }
    }
}

/// A response as seen by callers of the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self { status, headers: Vec::new(), body: Bytes::new() }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// All values of header `name` (case-insensitive), e.g. `Set-Cookie`.
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
}

/// HTTP transport seam. Production uses [`transport::ReqwestTransport`].
pub trait HttpTransport: Send + Sync + 'static {
    /// Execute one physical request. Any status is a successful `Response`;
    /// `Err` means no response arrived.
    fn execute(
        &self,
        request: WireRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Response>> + Send + '_>>;
}

/// Resolve `request` against `base_url` and attach marker and credential headers.
pub(crate) fn build_wire(
    base_url: &str,
    request: &OutboundRequest,
    placement: CredentialPlacement,
    credential: Option<&Credential>,
) -> anyhow::Result<WireRequest> {
    let mut base = reqwest::Url::parse(base_url)?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    let mut url = base.join(request.path.trim_start_matches('/'))?;
    if !request.query.is_empty() {
        url.query_pairs_mut().extend_pairs(request.query.iter());
    }

    let mut wire = WireRequest {
        method: request.method.clone(),
        url: url.to_string(),
        headers: vec![
            (REQUESTED_WITH.0.to_owned(), REQUESTED_WITH.1.to_owned()),
            (REQUEST_ID_HEADER.to_owned(), request.id.to_string()),
        ],
        body: request.body.clone(),
    };
    if wire.body.is_some() && find_header(&request.headers, "content-type").is_none() {
        wire.headers.push(("Content-Type".to_owned(), "application/json".to_owned()));
    }
    wire.headers.extend(request.headers.iter().cloned());

    if let Some(credential) = credential {
        match placement {
            CredentialPlacement::Cookie => wire.add_cookie(ACCESS_COOKIE, &credential.value),
            CredentialPlacement::Bearer => wire
                .headers
                .push(("Authorization".to_owned(), format!("Bearer {}", credential.value))),
        }
        if let Some(ref renewal) = credential.renewal {
            wire.add_cookie(RENEWAL_COOKIE, renewal);
        }
    }
    Ok(wire)
}

/// Await `fut`, giving up after `limit` if one is set.
pub(crate) async fn bounded<F: Future>(limit: Option<Duration>, fut: F) -> Option<F::Output> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.ok(),
        None => Some(fut.await),
    }
}

fn is_safe(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE)
}

/// Gateway settings.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub base_url: String,
    pub placement: CredentialPlacement,
    /// CSRF token endpoint; `None` disables CSRF handling.
    pub csrf_path: Option<String>,
    /// Per-attempt bound; `None` disables it.
    pub timeout: Option<Duration>,
}

/// Wraps outbound calls with credential renewal and the redirect policy.
pub struct Gateway {
    transport: Arc<dyn HttpTransport>,
    store: Arc<CredentialStore>,
    renewal: Arc<RenewalCoordinator>,
    redirector: Arc<Redirector>,
    options: GatewayOptions,
    csrf_token: Mutex<Option<String>>,
}

impl Gateway {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        store: Arc<CredentialStore>,
        renewal: Arc<RenewalCoordinator>,
        redirector: Arc<Redirector>,
        options: GatewayOptions,
    ) -> Self {
        Self { transport, store, renewal, redirector, options, csrf_token: Mutex::new(None) }
    }

    pub fn options(&self) -> &GatewayOptions {
        &self.options
    }

    /// Send `request`, renewing the credential and replaying once on 401.
    pub async fn send(&self, mut request: OutboundRequest) -> Result<Response, RequestError> {
        loop {
            let (generation, credential) = self.store.snapshot();
            let response = self.attempt(&request, credential.as_deref()).await?;
            let Some(condition) = Condition::from_status(response.status) else {
                return Ok(response);
            };

            match action_for(condition) {
                Action::Renew if request.mark_retried() => {
                    tracing::debug!(
                        request_id = %request.id,
                        path = %request.path,
                        generation,
                        "unauthorized, renewing credential"
                    );
                    self.renewal.ensure_fresh_after(generation).await?;
                }
                Action::RedirectAndFail(destination) => {
                    self.redirector.redirect(destination);
                    return Err(match destination {
                        Destination::Forbidden => RequestError::Forbidden(response),
                        Destination::NotFound => RequestError::NotFound(response),
                        Destination::SignIn => RequestError::Status(response),
                    });
                }
                _ => {
                    tracing::debug!(
                        request_id = %request.id,
                        status = response.status,
                        retried = request.retried,
                        "request failed"
                    );
                    return Err(RequestError::Status(response));
                }
            }
        }
    }

    /// Send `request` once with the current credential, applying no policy.
    pub async fn send_raw(&self, request: &OutboundRequest) -> Result<Response, RequestError> {
        let credential = self.store.current();
        self.attempt(request, credential.as_deref()).await
    }

    async fn attempt(
        &self,
        request: &OutboundRequest,
        credential: Option<&Credential>,
    ) -> Result<Response, RequestError> {
        let mut wire =
            build_wire(&self.options.base_url, request, self.options.placement, credential)
                .map_err(RequestError::Transport)?;
        if !is_safe(&request.method) {
            if let Some(token) = self.csrf_token(credential).await {
                wire.add_cookie(CSRF_COOKIE, &token);
                wire.headers.push((CSRF_HEADER.to_owned(), token));
            }
        }

        tracing::debug!(request_id = %request.id, method = %wire.method, url = %wire.url, "sending");
        match bounded(self.options.timeout, self.transport.execute(wire)).await {
            Some(Ok(response)) => Ok(response),
            Some(Err(e)) => {
                tracing::debug!(request_id = %request.id, err = %e, "transport error");
                Err(RequestError::Transport(e))
            }
            None => {
                tracing::debug!(request_id = %request.id, "request timed out");
                Err(RequestError::TimedOut)
            }
        }
    }

    /// Fetch a CSRF token, falling back to the last one seen.
    async fn csrf_token(&self, credential: Option<&Credential>) -> Option<String> {
        let path = self.options.csrf_path.as_deref()?;
        let fetch = OutboundRequest::get(path);
        let fetched = match build_wire(&self.options.base_url, &fetch, self.options.placement, credential)
        {
            Ok(wire) => match bounded(self.options.timeout, self.transport.execute(wire)).await {
                Some(Ok(response)) => set_cookie_value(&response, CSRF_COOKIE),
                Some(Err(e)) => {
                    tracing::warn!(err = %e, "csrf fetch failed");
                    None
                }
                None => {
                    tracing::warn!("csrf fetch timed out");
                    None
                }
            },
            Err(e) => {
                tracing::warn!(err = %e, "csrf fetch failed");
                None
            }
        };

        let mut cached = self.csrf_token.lock();
        if let Some(token) = fetched {
            *cached = Some(token);
        }
        cached.clone()
    }
}

#[cfg(test)]
#[path = "gateway_tests.rs"]
mod tests;

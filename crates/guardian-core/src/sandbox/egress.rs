//! Outbound HTTP: the injected client abstraction and the egress guard.
//!
//! Tools never reach the network directly. Each execution receives a
//! [`GuardedHttpClient`] that checks every request's host against the tool's
//! domain allow-list before delegating to the real [`HttpClient`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

use crate::audit::{AuditEvent, AuditEventKind, AuditSink};
use crate::domain::error::PolicyViolation;
use crate::obs;

use super::io::ExecutionTrail;
use super::monitor::{AccessKind, AccessRecord, ResourceMonitor};
use super::policy::ExecutionPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self::new(HttpMethod::Post, url).with_body(body)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Lowercase host of the target URL.
    pub fn host(&self) -> Result<String, HttpError> {
        let url = Url::parse(&self.url).map_err(|e| HttpError::InvalidUrl {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;
        url.host_str()
            .map(|h| h.to_ascii_lowercase())
            .ok_or_else(|| HttpError::InvalidUrl {
                url: self.url.clone(),
                reason: "missing host".into(),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn json_body(status: u16, body: &Value) -> Self {
        Self::new(status, body.to_string())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Result<Value, HttpError> {
        serde_json::from_str(&self.body).map_err(|e| HttpError::Decode(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HttpError {
    #[error(transparent)]
    Denied(#[from] PolicyViolation),

    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("response decode error: {0}")]
    Decode(String),
}

/// Outbound HTTP, injected per execution.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;
}

// ---------------------------------------------------------------------------
// reqwest
// ---------------------------------------------------------------------------

/// [`HttpClient`] over a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new(timeout: Duration) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("guardian/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| HttpError::Transport(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let mut builder = self
            .client
            .request(request.method.into(), request.url.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| HttpError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| HttpError::Decode(e.to_string()))?;
        Ok(HttpResponse { status, body })
    }
}

// ---------------------------------------------------------------------------
// Static fake
// ---------------------------------------------------------------------------

/// Canned responses keyed by URL; unknown URLs answer 404.
///
/// Every request that reaches it is recorded.
#[derive(Debug, Default)]
pub struct StaticHttpClient {
    routes: HashMap<String, HttpResponse>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl StaticHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_route(mut self, url: impl Into<String>, response: HttpResponse) -> Self {
        self.routes.insert(url.into(), response);
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl HttpClient for StaticHttpClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let response = self
            .routes
            .get(&request.url)
            .cloned()
            .unwrap_or_else(|| HttpResponse::new(404, "not found"));
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        Ok(response)
    }
}

// ---------------------------------------------------------------------------
// Egress guard
// ---------------------------------------------------------------------------

/// Allow-list enforcing wrapper handed to a tool for one execution.
#[derive(Clone)]
pub struct GuardedHttpClient {
    tool_id: String,
    policy: Arc<ExecutionPolicy>,
    inner: Arc<dyn HttpClient>,
    monitor: Arc<ResourceMonitor>,
    audit: Arc<dyn AuditSink>,
    trail: ExecutionTrail,
}

impl GuardedHttpClient {
    pub(crate) fn new(
        tool_id: impl Into<String>,
        policy: Arc<ExecutionPolicy>,
        inner: Arc<dyn HttpClient>,
        monitor: Arc<ResourceMonitor>,
        audit: Arc<dyn AuditSink>,
        trail: ExecutionTrail,
    ) -> Self {
        Self {
            tool_id: tool_id.into(),
            policy,
            inner,
            monitor,
            audit,
            trail,
        }
    }

    /// Check and log one attempt. Denials are also audited and remembered
    /// on the execution trail.
    fn authorize(&self, host: &str) -> Result<(), PolicyViolation> {
        let allowed = self.policy.allows_domain(host);
        self.monitor.log_access(AccessRecord::new(
            &self.tool_id,
            AccessKind::Egress,
            host,
            allowed,
        ));
        obs::emit_egress(&self.tool_id, host, allowed);

        if allowed {
            self.trail.record_egress(host);
            return Ok(());
        }

        let violation = PolicyViolation::DomainNotAllowed {
            tool_id: self.tool_id.clone(),
            domain: host.to_string(),
        };
        self.audit.record(AuditEvent::warn(
            AuditEventKind::EgressDenied,
            &self.tool_id,
            json!({ "domain": host }),
        ));
        self.trail.record_denial(violation.clone());
        Err(violation)
    }
}

#[async_trait]
impl HttpClient for GuardedHttpClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let host = request.host()?;
        self.authorize(&host)?;
        self.inner.send(request).await
    }
}

impl std::fmt::Debug for GuardedHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedHttpClient")
            .field("tool_id", &self.tool_id)
            .field("allowed_domains", &self.policy.allowed_domains)
            .finish()
    }
}

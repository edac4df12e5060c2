//! Remote API boundary.
//!
//! The drainer and pollers depend on the `ApiClient` trait, not on reqwest,
//! so tests inject scripted clients without touching the network. The real
//! implementation speaks the SwiftPick service contract: JSON bodies, a
//! `{ "data": ... }` envelope on success, and a `message` field on errors.

use std::future::Future;
use std::time::Duration;

use serde_json::Value;

use crate::error::{Result, SyncError};
use crate::types::Method;

// ---------------------------------------------------------------------------
// ApiClient
// ---------------------------------------------------------------------------

pub trait ApiClient: Send + Sync + 'static {
    /// Read authoritative state. Used by pollers.
    fn get(&self, path: &str) -> impl Future<Output = Result<Value>> + Send;

    /// Deliver a mutating request. Used by the drainer.
    fn send(
        &self,
        method: Method,
        path: &str,
        payload: &Value,
    ) -> impl Future<Output = Result<Value>> + Send;
}

// ---------------------------------------------------------------------------
// HttpClient
// ---------------------------------------------------------------------------

/// reqwest-backed client with a bounded per-request timeout.
///
/// Failure classification:
/// - timeout / connection error / 5xx → `TransientNetwork` (retry)
/// - 4xx → `PermanentRequest` (surface, no retry)
/// - undecodable 2xx body → `Json` (programming defect)
pub struct HttpClient {
    base: String,
    http: reqwest::Client,
}

impl HttpClient {
    pub fn new(base: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::TransientNetwork(e.to_string()))?;
        Ok(Self {
            base: base.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn execute(&self, req: reqwest::RequestBuilder) -> Result<Value> {
        let resp = req.send().await.map_err(classify_reqwest)?;
        let status = resp.status();
        let body = resp.text().await.map_err(classify_reqwest)?;

        if status.is_success() {
            // 204-style responses carry no body at all
            if body.trim().is_empty() {
                return Ok(Value::Null);
            }
            let envelope: Value = serde_json::from_str(&body)?;
            // Success envelope is { "data": ... }; tolerate a bare body from
            // endpoints that return nothing (e.g. DELETE).
            match envelope.get("data") {
                Some(data) => Ok(data.clone()),
                None => Ok(envelope),
            }
        } else if status.is_client_error() {
            Err(SyncError::PermanentRequest(error_message(&body, status)))
        } else {
            Err(SyncError::TransientNetwork(error_message(&body, status)))
        }
    }
}

impl ApiClient for HttpClient {
    fn get(&self, path: &str) -> impl Future<Output = Result<Value>> + Send {
        let req = self.http.get(self.url(path));
        self.execute(req)
    }

    fn send(
        &self,
        method: Method,
        path: &str,
        payload: &Value,
    ) -> impl Future<Output = Result<Value>> + Send {
        let url = self.url(path);
        let req = match method {
            Method::Post => self.http.post(url),
            Method::Put => self.http.put(url),
            Method::Patch => self.http.patch(url),
            Method::Delete => self.http.delete(url),
        }
        .json(payload);
        self.execute(req)
    }
}

fn classify_reqwest(e: reqwest::Error) -> SyncError {
    // Anything that never produced a status line is transient by definition.
    SyncError::TransientNetwork(e.to_string())
}

/// Prefer the server's `message` field, fall back to the status line.
fn error_message(body: &str, status: reqwest::StatusCode) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
        .unwrap_or_else(|| format!("http {status}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

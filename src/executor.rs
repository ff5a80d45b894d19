//! Request execution engine.
//!
//! [`RequestExecutor::execute`] turns one [`Operation`] into network I/O with a
//! per-attempt timeout, optional caller cancellation, bounded retries and
//! error classification. Attempts within one call are strictly sequential.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::error::SandboxError;
use crate::headers::{build_headers, ACCEPT_JSON};
use crate::hooks::{Interceptor, RequestParts, ResponseInfo};
use crate::retry::RetryPolicy;
use crate::url::{endpoint_url, normalize_base_url};

/// One remote call: method, path segments, query and optional JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub method: Method,
    pub segments: Vec<String>,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl Operation {
    pub fn new<I, S>(method: Method, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            method,
            segments: segments.into_iter().map(Into::into).collect(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::GET, segments)
    }

    pub fn post<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::POST, segments)
    }

    pub fn delete<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::DELETE, segments)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn with_json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, SandboxError> {
        let body = serde_json::to_value(body).map_err(|error| {
            SandboxError::invalid_request(format!("failed to serialize request body: {error}"))
        })?;
        self.body = Some(body);
        Ok(self)
    }

    /// Display path, e.g. `/jobs/job_1`.
    pub fn path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }
}

#[derive(Clone)]
pub struct RequestExecutor {
    http: Client,
    base_url: Url,
    timeout: Duration,
    retry: RetryPolicy,
    user_agent: String,
    extra_headers: BTreeMap<String, String>,
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("base_url", &self.base_url.as_str())
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

impl RequestExecutor {
    pub fn new(config: &ClientConfig) -> Result<Self, SandboxError> {
        let http = Client::builder()
            .build()
            .map_err(|error| SandboxError::invalid_request(format!("failed to build HTTP client: {error}")))?;

        Ok(Self {
            http,
            base_url: normalize_base_url(&config.base_url)?,
            timeout: config.timeout,
            retry: config.retry_policy(),
            user_agent: config.user_agent_or_default(),
            extra_headers: config.extra_headers.clone(),
            interceptors: config.interceptors.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub(crate) fn http(&self) -> &Client {
        &self.http
    }

    pub(crate) fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub(crate) fn extra_headers(&self) -> &BTreeMap<String, String> {
        &self.extra_headers
    }

    /// Run `operation` to completion, retrying transient failures.
    ///
    /// `token` is the bearer snapshot for this call. Exhausted retries return
    /// the last classified error unchanged.
    pub async fn execute<T>(
        &self,
        operation: &Operation,
        token: Option<&str>,
        cancel: Option<&CancellationToken>,
    ) -> Result<T, SandboxError>
    where
        T: DeserializeOwned,
    {
        let mut attempt: u32 = 1;

        loop {
            let started = Instant::now();
            let error = match self.attempt(operation, token, cancel).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            for interceptor in &self.interceptors {
                interceptor.on_error(&error).await;
            }

            let decision = self.retry.decide(&error, attempt);
            if !decision.should_retry {
                debug!(
                    method = %operation.method,
                    path = %operation.path(),
                    attempt,
                    code = %error.code(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "request failed"
                );
                return Err(error);
            }

            warn!(
                method = %operation.method,
                path = %operation.path(),
                attempt,
                code = %error.code(),
                delay_ms = decision.delay.as_millis() as u64,
                "retrying request"
            );
            await_or_cancel(tokio::time::sleep(decision.delay), cancel).await?;
            attempt += 1;
        }
    }

    /// One attempt raced against the timeout and the caller's token.
    async fn attempt<T>(
        &self,
        operation: &Operation,
        token: Option<&str>,
        cancel: Option<&CancellationToken>,
    ) -> Result<T, SandboxError>
    where
        T: DeserializeOwned,
    {
        if is_cancelled(cancel) {
            return Err(SandboxError::aborted());
        }

        tokio::select! {
            biased;
            () = cancelled(cancel) => Err(SandboxError::aborted()),
            () = tokio::time::sleep(self.timeout) => Err(SandboxError::timeout(self.timeout)),
            result = self.dispatch(operation, token) => result,
        }
    }

    async fn dispatch<T>(&self, operation: &Operation, token: Option<&str>) -> Result<T, SandboxError>
    where
        T: DeserializeOwned,
    {
        let mut url = endpoint_url(&self.base_url, &operation.segments)?;
        if !operation.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&operation.query);
        }

        let mut parts = RequestParts {
            method: operation.method.clone(),
            url,
            headers: build_headers(token, ACCEPT_JSON, &self.user_agent, &self.extra_headers)?,
        };
        for interceptor in &self.interceptors {
            interceptor.on_request(&mut parts).await?;
        }

        debug!(method = %parts.method, url = %parts.url, "sending request");
        let mut request = self
            .http
            .request(parts.method.clone(), parts.url.clone())
            .headers(parts.headers);
        if let Some(body) = &operation.body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(SandboxError::network)?;
        let info = ResponseInfo {
            status: response.status(),
            ok: response.status().is_success(),
            url: response.url().clone(),
        };
        for interceptor in &self.interceptors {
            interceptor.on_response(&info).await;
        }

        let text = response.text().await.map_err(SandboxError::network)?;
        let body = parse_body(&text);
        debug!(method = %parts.method, url = %info.url, status = %info.status, "received response");

        match body {
            Some(body) if info.ok => {
                T::deserialize(&body)
                    .map_err(|error| SandboxError::undecodable(info.status, body, error))
            }
            body => Err(SandboxError::from_response(info.status, body)),
        }
    }
}

/// Parse a response body: JSON when possible, raw text otherwise, `None` when empty.
pub(crate) fn parse_body(text: &str) -> Option<Value> {
    if text.trim().is_empty() {
        return None;
    }
    Some(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_owned())))
}

pub(crate) fn is_cancelled(cancel: Option<&CancellationToken>) -> bool {
    cancel.is_some_and(CancellationToken::is_cancelled)
}

/// Resolves when `cancel` fires; never resolves without a token.
pub(crate) async fn cancelled(cancel: Option<&CancellationToken>) {
    match cancel {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

/// Await `future` unless `cancel` fires first.
pub(crate) async fn await_or_cancel<F>(
    future: F,
    cancel: Option<&CancellationToken>,
) -> Result<F::Output, SandboxError>
where
    F: Future,
{
    if is_cancelled(cancel) {
        return Err(SandboxError::aborted());
    }

    tokio::select! {
        biased;
        () = cancelled(cancel) => Err(SandboxError::aborted()),
        output = future => Ok(output),
    }
}

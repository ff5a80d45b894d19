//! Request interceptors.
//!
//! Interceptors observe every executor attempt: they may rewrite outgoing
//! request metadata, see a narrowed view of each response, and are told about
//! every failed attempt (retried or not).

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use url::Url;

use crate::error::SandboxError;

/// Mutable view of an outgoing request handed to [`Interceptor::on_request`].
#[derive(Debug, Clone)]
pub struct RequestParts {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
}

/// Narrowed response view handed to [`Interceptor::on_response`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseInfo {
    pub status: StatusCode,
    pub ok: bool,
    pub url: Url,
}

#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Runs before the request is sent. An error fails the attempt.
    async fn on_request(&self, _request: &mut RequestParts) -> Result<(), SandboxError> {
        Ok(())
    }

    async fn on_response(&self, _response: &ResponseInfo) {}

    async fn on_error(&self, _error: &SandboxError) {}
}

use std::fmt;
use std::sync::{Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ClientConfig;
use crate::error::SandboxError;
use crate::executor::{Operation, RequestExecutor};
use crate::headers::{build_headers, ACCEPT_EVENT_STREAM};
use crate::poller::{poll_until_terminal, WaitOptions};
use crate::stream::{self, EventStream, StreamOptions, StreamRequest};
use crate::types::{
    AsyncRunResponse, ClaudeStatus, DeleteResponse, HealthStatus, Job, JobList, LogoutResponse,
    MessagePage, MessagePageQuery, RefreshRequest, RunRequest, RunResponse, SecretList,
    SessionList, TokenRequest, TokenResponse, TokenValidation,
};
use crate::url::endpoint_url;

/// Session-scoped client for the sandbox API.
///
/// The bearer token is the only mutable state. Each request snapshots it once
/// during setup; writes happen only through the auth operations and token
/// accessors, and the last write wins.
pub struct SandboxClient {
    executor: RequestExecutor,
    config: ClientConfig,
    token: Mutex<Option<String>>,
}

impl fmt::Debug for SandboxClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxClient")
            .field("executor", &self.executor)
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

impl SandboxClient {
    pub fn new(config: ClientConfig) -> Result<Self, SandboxError> {
        let executor = RequestExecutor::new(&config)?;
        let token = config
            .auth_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(ToOwned::to_owned);

        Ok(Self {
            executor,
            config,
            token: Mutex::new(token),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    pub fn set_auth_token(&self, token: impl Into<String>) {
        *lock_unpoisoned(&self.token) = Some(token.into());
    }

    pub fn clear_auth_token(&self) {
        *lock_unpoisoned(&self.token) = None;
    }

    pub fn auth_token(&self) -> Option<String> {
        lock_unpoisoned(&self.token).clone()
    }

    pub fn is_authenticated(&self) -> bool {
        lock_unpoisoned(&self.token).is_some()
    }

    /// Run an arbitrary operation through the executor with the current token.
    pub async fn execute<T>(
        &self,
        operation: Operation,
        cancel: Option<&CancellationToken>,
    ) -> Result<T, SandboxError>
    where
        T: DeserializeOwned,
    {
        let token = self.auth_token();
        self.executor
            .execute(&operation, token.as_deref(), cancel)
            .await
    }

    pub async fn run(
        &self,
        request: &RunRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<RunResponse, SandboxError> {
        self.execute(Operation::post(["run"]).with_json(request)?, cancel)
            .await
    }

    pub async fn run_async(
        &self,
        request: &RunRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<AsyncRunResponse, SandboxError> {
        self.execute(Operation::post(["run", "async"]).with_json(request)?, cancel)
            .await
    }

    pub async fn list_jobs(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<JobList, SandboxError> {
        self.execute(Operation::get(["jobs"]), cancel).await
    }

    pub async fn get_job(
        &self,
        job_id: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Job, SandboxError> {
        self.execute(Operation::get(["jobs", job_id]), cancel).await
    }

    pub async fn cancel_job(
        &self,
        job_id: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<DeleteResponse, SandboxError> {
        self.execute(Operation::delete(["jobs", job_id]), cancel)
            .await
    }

    /// Poll `GET /jobs/{id}` until the job reaches a terminal status.
    pub async fn wait_for_job(
        &self,
        job_id: &str,
        options: WaitOptions,
        cancel: Option<&CancellationToken>,
    ) -> Result<Job, SandboxError> {
        poll_until_terminal(job_id, options, cancel, || self.get_job(job_id, cancel)).await
    }

    /// Open `GET /run/stream` as a lazy event stream.
    ///
    /// The connection is made on first poll; dropping the stream closes it.
    pub fn stream(
        &self,
        request: StreamRequest,
        options: StreamOptions,
    ) -> Result<EventStream, SandboxError> {
        let mut url = endpoint_url(self.executor.base_url(), ["run", "stream"])?;
        url.query_pairs_mut().extend_pairs(request.query_pairs());

        let token = self.auth_token();
        let headers = build_headers(
            token.as_deref(),
            ACCEPT_EVENT_STREAM,
            self.executor.user_agent(),
            self.executor.extra_headers(),
        )?;
        let request = self.executor.http().get(url).headers(headers);

        Ok(stream::open(request, options))
    }

    pub async fn health(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<HealthStatus, SandboxError> {
        self.execute(Operation::get(["health"]), cancel).await
    }

    pub async fn claude_status(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<ClaudeStatus, SandboxError> {
        self.execute(Operation::get(["claude", "status"]), cancel)
            .await
    }

    pub async fn list_secrets(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<SecretList, SandboxError> {
        self.execute(Operation::get(["secrets"]), cancel).await
    }

    pub async fn list_sessions(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<SessionList, SandboxError> {
        self.execute(Operation::get(["sessions"]), cancel).await
    }

    pub async fn delete_session(
        &self,
        session_id: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<DeleteResponse, SandboxError> {
        self.execute(Operation::delete(["sessions", session_id]), cancel)
            .await
    }

    pub async fn session_messages(
        &self,
        session_id: &str,
        page: MessagePageQuery,
        cancel: Option<&CancellationToken>,
    ) -> Result<MessagePage, SandboxError> {
        let mut operation = Operation::get(["sessions", session_id, "messages"]);
        if let Some(offset) = page.offset {
            operation = operation.with_query("offset", offset);
        }
        if let Some(limit) = page.limit {
            operation = operation.with_query("limit", limit);
        }
        self.execute(operation, cancel).await
    }

    /// Exchange credentials for a token and store its access token.
    pub async fn authenticate(
        &self,
        credentials: &TokenRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<TokenResponse, SandboxError> {
        let response: TokenResponse = self
            .execute(Operation::post(["auth", "token"]).with_json(credentials)?, cancel)
            .await?;
        self.set_auth_token(response.access_token.clone());
        info!(expires_in = ?response.expires_in, "authenticated");
        Ok(response)
    }

    pub async fn refresh_token(
        &self,
        refresh_token: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<TokenResponse, SandboxError> {
        let body = RefreshRequest {
            refresh_token: refresh_token.to_owned(),
        };
        let response: TokenResponse = self
            .execute(Operation::post(["auth", "refresh"]).with_json(&body)?, cancel)
            .await?;
        self.set_auth_token(response.access_token.clone());
        info!(expires_in = ?response.expires_in, "access token refreshed");
        Ok(response)
    }

    pub async fn validate_token(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<TokenValidation, SandboxError> {
        self.execute(Operation::get(["auth", "validate"]), cancel)
            .await
    }

    /// Log out server-side; the stored token is cleared only when that succeeds.
    pub async fn logout(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<LogoutResponse, SandboxError> {
        let response: LogoutResponse = self
            .execute(Operation::post(["auth", "logout"]), cancel)
            .await?;
        self.clear_auth_token();
        info!("logged out");
        Ok(response)
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

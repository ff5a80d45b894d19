//! Typed async client for the Claude sandbox container API.
//!
//! Every endpoint call goes through [`RequestExecutor`], which owns per-attempt
//! timeouts, caller cancellation, bounded retries for transient failures, and
//! classification into [`SandboxError`]. Callers branch on
//! [`SandboxError::code`] rather than on variant shape.
//!
//! Streaming runs (`GET /run/stream`) are exposed as a lazy [`EventStream`] of
//! [`StreamEvent`]s supervised by a connection timer and an inter-chunk idle
//! timer. [`SandboxClient::wait_for_job`] polls asynchronous jobs until they
//! reach a terminal status.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod headers;
pub mod hooks;
pub mod poller;
pub mod retry;
pub mod sse;
pub mod stream;
pub mod types;
pub mod url;

pub use client::SandboxClient;
pub use config::ClientConfig;
pub use error::{ErrorCode, SandboxError};
pub use events::StreamEvent;
pub use executor::{Operation, RequestExecutor};
pub use hooks::{Interceptor, RequestParts, ResponseInfo};
pub use poller::WaitOptions;
pub use retry::{Backoff, RetryDecision, RetryPolicy};
pub use stream::{EventStream, StreamOptions, StreamRequest};
pub use tokio_util::sync::CancellationToken;
pub use types::{
    AsyncRunResponse, ContainerOptions, ExecutionOptions, Job, JobStatus, MessagePageQuery,
    RunRequest, RunResponse, TokenRequest, TokenResponse,
};

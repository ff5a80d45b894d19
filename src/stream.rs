//! `/run/stream` event source.
//!
//! A stream moves `Connecting -> Streaming -> Terminated`. While connecting,
//! only the connection timer runs; once response headers arrive, each chunk
//! read races a fresh idle timer. Both timers are futures owned by the poll
//! that created them, so no exit path leaves one behind.

use std::collections::VecDeque;
use std::time::Duration;

use futures_util::stream::{self, BoxStream, StreamExt};
use reqwest::{RequestBuilder, Response};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::SandboxError;
use crate::events::StreamEvent;
use crate::executor::{cancelled, is_cancelled, parse_body};
use crate::sse::{classify_line, LineDecoder};

pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_millis(30_000);
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Lazy, finite, non-restartable sequence of stream events.
pub type EventStream = BoxStream<'static, Result<StreamEvent, SandboxError>>;

/// Query parameters for `GET /run/stream`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub prompt: String,
    pub workdir: Option<String>,
    pub session_id: Option<String>,
}

impl StreamRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            workdir: None,
            session_id: None,
        }
    }

    pub fn with_workdir(mut self, workdir: impl Into<String>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub(crate) fn query_pairs(&self) -> Vec<(&'static str, &str)> {
        let mut pairs = vec![("prompt", self.prompt.as_str())];
        if let Some(workdir) = self.workdir.as_deref() {
            pairs.push(("workdir", workdir));
        }
        if let Some(session_id) = self.session_id.as_deref() {
            pairs.push(("session_id", session_id));
        }
        pairs
    }
}

#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Upper bound for receiving response headers.
    pub connection_timeout: Duration,
    /// Upper bound between consecutive body chunks.
    pub idle_timeout: Duration,
    pub cancel: Option<CancellationToken>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            cancel: None,
        }
    }
}

impl StreamOptions {
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Aborted,
    Failed,
}

enum StreamPhase {
    Connecting(RequestBuilder),
    Streaming(Response),
    Terminated(StreamOutcome),
}

struct EventSource {
    phase: StreamPhase,
    decoder: LineDecoder,
    pending: VecDeque<StreamEvent>,
    options: StreamOptions,
}

/// Wrap a prepared request into a lazily connecting event stream.
pub(crate) fn open(request: RequestBuilder, options: StreamOptions) -> EventStream {
    let source = EventSource {
        phase: StreamPhase::Connecting(request),
        decoder: LineDecoder::default(),
        pending: VecDeque::new(),
        options,
    };

    stream::unfold(source, |mut source| async move {
        let item = source.next_event().await?;
        Some((item, source))
    })
    .boxed()
}

impl EventSource {
    async fn next_event(&mut self) -> Option<Result<StreamEvent, SandboxError>> {
        let cancel = self.options.cancel.clone();
        let cancel = cancel.as_ref();

        loop {
            if let Some(event) = self.pending.pop_front() {
                if event.is_done() {
                    self.pending.clear();
                    self.terminate(StreamOutcome::Completed);
                }
                return Some(Ok(event));
            }

            let phase = std::mem::replace(
                &mut self.phase,
                StreamPhase::Terminated(StreamOutcome::Failed),
            );
            match phase {
                StreamPhase::Connecting(request) => {
                    let connecting = connect(
                        request,
                        self.options.connection_timeout,
                        self.options.idle_timeout,
                        cancel,
                    );
                    match connecting.await {
                        Ok(response) => {
                            debug!(status = %response.status(), "event stream connected");
                            self.phase = StreamPhase::Streaming(response);
                        }
                        Err(error) => return Some(Err(self.fail(error))),
                    }
                }
                StreamPhase::Streaming(mut response) => {
                    match read_chunk(&mut response, self.options.idle_timeout, cancel).await {
                        Ok(Some(chunk)) => {
                            let lines = self.decoder.feed(&chunk);
                            self.enqueue(lines);
                            self.phase = StreamPhase::Streaming(response);
                        }
                        Ok(None) => {
                            drop(response);
                            let tail = self.decoder.finish();
                            self.enqueue(tail);
                            if !self.pending.back().is_some_and(StreamEvent::is_done) {
                                self.pending.push_back(StreamEvent::Done);
                            }
                            // Drained by the next turn, which terminates on `Done`.
                            self.phase = StreamPhase::Terminated(StreamOutcome::Completed);
                        }
                        Err(error) => return Some(Err(self.fail(error))),
                    }
                }
                StreamPhase::Terminated(outcome) => {
                    self.phase = StreamPhase::Terminated(outcome);
                    return None;
                }
            }
        }
    }

    /// Classify lines into the pending queue, discarding anything after `Done`.
    fn enqueue(&mut self, lines: impl IntoIterator<Item = String>) {
        for line in lines {
            if let Some(event) = classify_line(&line) {
                let done = event.is_done();
                self.pending.push_back(event);
                if done {
                    return;
                }
            }
        }
    }

    fn fail(&mut self, error: SandboxError) -> SandboxError {
        let outcome = match error {
            SandboxError::Aborted => StreamOutcome::Aborted,
            _ => StreamOutcome::Failed,
        };
        debug!(code = %error.code(), "event stream failed");
        self.terminate(outcome);
        error
    }

    fn terminate(&mut self, outcome: StreamOutcome) {
        debug!(?outcome, "event stream terminated");
        self.pending.clear();
        self.phase = StreamPhase::Terminated(outcome);
    }
}

/// Send the request under the connection timer; non-2xx bodies are classified.
async fn connect(
    request: RequestBuilder,
    connection_timeout: Duration,
    idle_timeout: Duration,
    cancel: Option<&CancellationToken>,
) -> Result<Response, SandboxError> {
    if is_cancelled(cancel) {
        return Err(SandboxError::aborted());
    }

    let response = tokio::select! {
        biased;
        () = cancelled(cancel) => Err(SandboxError::aborted()),
        () = tokio::time::sleep(connection_timeout) => Err(SandboxError::ConnectionTimeout {
            timeout: connection_timeout,
        }),
        result = request.send() => result.map_err(SandboxError::network),
    }?;

    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let text = tokio::select! {
        biased;
        () = cancelled(cancel) => Err(SandboxError::aborted()),
        () = tokio::time::sleep(idle_timeout) => Err(SandboxError::IdleTimeout {
            timeout: idle_timeout,
        }),
        result = response.text() => result.map_err(SandboxError::network),
    }?;
    Err(SandboxError::from_response(status, parse_body(&text)))
}

/// Read the next body chunk under a fresh idle timer.
async fn read_chunk(
    response: &mut Response,
    idle_timeout: Duration,
    cancel: Option<&CancellationToken>,
) -> Result<Option<Vec<u8>>, SandboxError> {
    tokio::select! {
        biased;
        () = cancelled(cancel) => Err(SandboxError::aborted()),
        () = tokio::time::sleep(idle_timeout) => Err(SandboxError::IdleTimeout {
            timeout: idle_timeout,
        }),
        result = response.chunk() => result
            .map(|bytes| bytes.map(|bytes| bytes.to_vec()))
            .map_err(SandboxError::stream),
    }
}

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::SandboxError;
use crate::executor::await_or_cancel;
use crate::types::{Job, JobStatus};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_millis(300_000);

pub type StatusCallback = Box<dyn FnMut(&JobStatus) + Send>;

pub struct WaitOptions {
    pub poll_interval: Duration,
    /// Wall-clock budget for the whole wait.
    pub max_wait: Duration,
    /// Invoked once per observed status change, including the first status.
    pub on_status_change: Option<StatusCallback>,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_wait: DEFAULT_MAX_WAIT,
            on_status_change: None,
        }
    }
}

impl fmt::Debug for WaitOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitOptions")
            .field("poll_interval", &self.poll_interval)
            .field("max_wait", &self.max_wait)
            .field("on_status_change", &self.on_status_change.is_some())
            .finish()
    }
}

impl WaitOptions {
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn on_status_change<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&JobStatus) + Send + 'static,
    {
        self.on_status_change = Some(Box::new(callback));
        self
    }
}

/// Per-wait bookkeeping.
#[derive(Debug, Clone, Copy)]
pub struct JobPollState {
    pub last_status: Option<JobStatus>,
    pub started: Instant,
}

impl JobPollState {
    fn new() -> Self {
        Self {
            last_status: None,
            started: Instant::now(),
        }
    }

    /// Record `status`; returns true when it differs from the previous one.
    fn observe(&mut self, status: JobStatus) -> bool {
        let changed = self.last_status != Some(status);
        self.last_status = Some(status);
        changed
    }
}

/// Poll `fetch` until the job reaches a terminal status or `max_wait` elapses.
///
/// Each fetch carries its own timeout/retry semantics; this loop only adds the
/// interval sleep and the overall deadline.
pub async fn poll_until_terminal<F, Fut>(
    job_id: &str,
    mut options: WaitOptions,
    cancel: Option<&CancellationToken>,
    mut fetch: F,
) -> Result<Job, SandboxError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Job, SandboxError>>,
{
    let mut state = JobPollState::new();

    loop {
        let job = fetch().await?;

        if state.observe(job.status) {
            debug!(job_id, status = %job.status, "job status changed");
            if let Some(callback) = options.on_status_change.as_mut() {
                callback(&job.status);
            }
        }

        if job.status.is_terminal() {
            return Ok(job);
        }

        if state.started.elapsed() > options.max_wait {
            return Err(SandboxError::WaitTimeout {
                job_id: job_id.to_owned(),
                max_wait: options.max_wait,
            });
        }

        await_or_cancel(tokio::time::sleep(options.poll_interval), cancel).await?;
    }
}

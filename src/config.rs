use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::hooks::Interceptor;
use crate::retry::{Backoff, RetryPolicy, DEFAULT_RETRIES, DEFAULT_RETRY_DELAY};
use crate::url::DEFAULT_BASE_URL;

/// Default per-attempt request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

pub const ENV_BASE_URL: &str = "CLAUDE_SANDBOX_URL";
pub const ENV_TOKEN: &str = "CLAUDE_SANDBOX_TOKEN";
pub const ENV_TIMEOUT_MS: &str = "CLAUDE_SANDBOX_TIMEOUT_MS";
pub const ENV_RETRIES: &str = "CLAUDE_SANDBOX_RETRIES";

/// Client configuration for sandbox API requests.
#[derive(Clone)]
pub struct ClientConfig {
    /// Base URL every endpoint path is appended to.
    pub base_url: String,
    /// Initial bearer token; later changes go through the client's token accessors.
    pub auth_token: Option<String>,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Retries after the initial attempt for transient failures.
    pub retries: u32,
    /// Base delay fed into the backoff strategy.
    pub retry_delay: Duration,
    pub backoff: Backoff,
    /// Optional `User-Agent` override.
    pub user_agent: Option<String>,
    /// Additional headers merged into request headers.
    pub extra_headers: BTreeMap<String, String>,
    pub interceptors: Vec<Arc<dyn Interceptor>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            auth_token: None,
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            backoff: Backoff::default(),
            user_agent: None,
            extra_headers: BTreeMap::new(),
            interceptors: Vec::new(),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("retry_delay", &self.retry_delay)
            .field("backoff", &self.backoff)
            .field("user_agent", &self.user_agent)
            .field("extra_headers", &self.extra_headers)
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Defaults overlaid with `CLAUDE_SANDBOX_*` environment variables.
    ///
    /// Blank values are ignored and unparsable numbers keep the default.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(base_url) = env_string_opt(ENV_BASE_URL) {
            config.base_url = base_url;
        }
        config.auth_token = env_string_opt(ENV_TOKEN);
        if let Some(timeout_ms) = env_parse::<u64>(ENV_TIMEOUT_MS) {
            config.timeout = Duration::from_millis(timeout_ms);
        }
        if let Some(retries) = env_parse::<u32>(ENV_RETRIES) {
            config.retries = retries;
        }
        config
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn insert_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(key.into(), value.into());
        self
    }

    pub fn with_headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.extra_headers.extend(headers);
        self
    }

    pub fn with_interceptor(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retries,
            base_delay: self.retry_delay,
            backoff: self.backoff.clone(),
        }
    }

    pub(crate) fn user_agent_or_default(&self) -> String {
        self.user_agent
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| format!("claude-sandbox-rust/{}", env!("CARGO_PKG_VERSION")))
    }
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        if value.trim().is_empty() {
            None
        } else {
            Some(value.trim().to_owned())
        }
    })
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string_opt(key).and_then(|value| value.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::{ClientConfig, ENV_BASE_URL, ENV_RETRIES, ENV_TIMEOUT_MS, ENV_TOKEN};
    use crate::retry::Backoff;
    use std::env;
    use std::sync::{Mutex, OnceLock};
    use std::time::Duration;

    struct EnvGuard {
        key: &'static str,
        previous: Option<String>,
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(value) = &self.previous {
                env::set_var(self.key, value);
            } else {
                env::remove_var(self.key);
            }
        }
    }

    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
            .lock()
            .expect("env lock poisoned")
    }

    fn set_env_guard(key: &'static str, value: Option<&str>) -> EnvGuard {
        let previous = env::var(key).ok();
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
        EnvGuard { key, previous }
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, "http://localhost:3000");
        assert_eq!(config.timeout, Duration::from_millis(30_000));
        assert_eq!(config.retries, 0);
        assert_eq!(config.retry_delay, Duration::from_millis(1000));
        assert!(matches!(config.backoff, Backoff::Exponential));
        assert!(config.auth_token.is_none());
    }

    #[test]
    fn env_unset_keeps_defaults() {
        let _lock = env_lock();
        let _g1 = set_env_guard(ENV_BASE_URL, None);
        let _g2 = set_env_guard(ENV_TOKEN, None);
        let _g3 = set_env_guard(ENV_TIMEOUT_MS, None);
        let _g4 = set_env_guard(ENV_RETRIES, None);

        let config = ClientConfig::from_env();
        assert_eq!(config.base_url, "http://localhost:3000");
        assert!(config.auth_token.is_none());
        assert_eq!(config.timeout, Duration::from_millis(30_000));
        assert_eq!(config.retries, 0);
    }

    #[test]
    fn env_values_override_defaults() {
        let _lock = env_lock();
        let _g1 = set_env_guard(ENV_BASE_URL, Some("https://sandbox.internal"));
        let _g2 = set_env_guard(ENV_TOKEN, Some(" tok "));
        let _g3 = set_env_guard(ENV_TIMEOUT_MS, Some("5000"));
        let _g4 = set_env_guard(ENV_RETRIES, Some("3"));

        let config = ClientConfig::from_env();
        assert_eq!(config.base_url, "https://sandbox.internal");
        assert_eq!(config.auth_token.as_deref(), Some("tok"));
        assert_eq!(config.timeout, Duration::from_millis(5000));
        assert_eq!(config.retries, 3);
    }

    #[test]
    fn blank_and_unparsable_env_values_are_ignored() {
        let _lock = env_lock();
        let _g1 = set_env_guard(ENV_BASE_URL, Some(""));
        let _g2 = set_env_guard(ENV_TOKEN, Some("   "));
        let _g3 = set_env_guard(ENV_TIMEOUT_MS, Some("soon"));
        let _g4 = set_env_guard(ENV_RETRIES, Some("-1"));

        let config = ClientConfig::from_env();
        assert_eq!(config.base_url, "http://localhost:3000");
        assert!(config.auth_token.is_none());
        assert_eq!(config.timeout, Duration::from_millis(30_000));
        assert_eq!(config.retries, 0);
    }

    #[test]
    fn debug_output_redacts_token() {
        let config = ClientConfig::default().with_auth_token("secret-token");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("<redacted>"));
    }
}

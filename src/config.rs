//! Engine configuration with env-overridable defaults.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `DATAMAP_HTTP_TIMEOUT_SECS` | 30 |
//! | `DATAMAP_MAX_RETRIES` | 1 (clamped to 0..=3) |
//! | `DATAMAP_RETRY_MIN_DELAY_MS` | 200 |
//! | `DATAMAP_RETRY_MAX_DELAY_MS` | 2000 |
//! | `DATAMAP_TLS_VERIFY` | true |
//! | `DATAMAP_PROXY_URL` | unset |
//! | `DATAMAP_HTTP_POOL_MAX_IDLE_PER_HOST` | 32 |
//! | `DATAMAP_INVOCATION_DEADLINE_MS` | unset |

use std::env;
use std::time::Duration;

/// Upper bound for [`EngineConfig::max_retries`].
pub const MAX_RETRIES_LIMIT: u32 = 3;

/// Text returned when an invocation fails and the tool configures no fallback.
pub const DEFAULT_FAILURE_RESPONSE: &str =
    "Sorry, I couldn't complete that request right now.";

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Per-request HTTP timeout.
    pub timeout: Duration,
    /// Retries after the first attempt, per webhook.
    pub max_retries: u32,
    pub retry_min_delay: Duration,
    pub retry_max_delay: Duration,
    /// HTTP statuses worth another attempt.
    pub retry_on_status: Vec<u16>,
    pub verify_tls: bool,
    pub proxy_url: Option<String>,
    pub pool_max_idle_per_host: usize,
    pub user_agent: String,
    /// Overall bound for one invocation, retries included.
    pub invocation_deadline: Option<Duration>,
    pub failure_response: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 1,
            retry_min_delay: Duration::from_millis(200),
            retry_max_delay: Duration::from_secs(2),
            retry_on_status: vec![429, 500, 502, 503, 504],
            verify_tls: true,
            proxy_url: None,
            pool_max_idle_per_host: 32,
            user_agent: format!("datamap-runtime/{}", env!("CARGO_PKG_VERSION")),
            invocation_deadline: None,
            failure_response: DEFAULT_FAILURE_RESPONSE.to_string(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse::<T>().ok())
}

fn flag_var(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    lookup(key).map(|s| !matches!(s.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off"))
}

impl EngineConfig {
    /// Defaults overridden by `DATAMAP_*` environment variables. Unparsable values
    /// are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(secs) = parse_var::<u64>(&lookup, "DATAMAP_HTTP_TIMEOUT_SECS") {
            config.timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(n) = parse_var::<u32>(&lookup, "DATAMAP_MAX_RETRIES") {
            config.max_retries = n.min(MAX_RETRIES_LIMIT);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "DATAMAP_RETRY_MIN_DELAY_MS") {
            config.retry_min_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "DATAMAP_RETRY_MAX_DELAY_MS") {
            config.retry_max_delay = Duration::from_millis(ms);
        }
        if let Some(verify) = flag_var(&lookup, "DATAMAP_TLS_VERIFY") {
            config.verify_tls = verify;
        }
        if let Some(proxy) = lookup("DATAMAP_PROXY_URL") {
            if !proxy.trim().is_empty() {
                config.proxy_url = Some(proxy);
            }
        }
        if let Some(n) = parse_var::<usize>(&lookup, "DATAMAP_HTTP_POOL_MAX_IDLE_PER_HOST") {
            config.pool_max_idle_per_host = n;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "DATAMAP_INVOCATION_DEADLINE_MS") {
            config.invocation_deadline = Some(Duration::from_millis(ms.max(1)));
        }
        config
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Clamped to `0..=3`.
    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n.min(MAX_RETRIES_LIMIT);
        self
    }

    pub fn with_retry_delays(mut self, min: Duration, max: Duration) -> Self {
        self.retry_min_delay = min;
        self.retry_max_delay = max.max(min);
        self
    }

    pub fn with_retry_on_status(mut self, statuses: Vec<u16>) -> Self {
        self.retry_on_status = statuses;
        self
    }

    pub fn with_verify_tls(mut self, enable: bool) -> Self {
        self.verify_tls = enable;
        self
    }

    pub fn with_proxy_url(mut self, url: impl Into<String>) -> Self {
        self.proxy_url = Some(url.into());
        self
    }

    pub fn with_pool_max_idle_per_host(mut self, n: usize) -> Self {
        self.pool_max_idle_per_host = n;
        self
    }

    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    pub fn with_invocation_deadline(mut self, deadline: Duration) -> Self {
        self.invocation_deadline = Some(deadline);
        self
    }

    /// Empty text is ignored so that an invocation can never answer with nothing.
    pub fn with_failure_response(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        if !text.trim().is_empty() {
            self.failure_response = text;
        }
        self
    }
}

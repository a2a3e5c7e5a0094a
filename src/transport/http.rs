use crate::config::EngineConfig;
use crate::transport::TransportError;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, RETRY_AFTER};
use reqwest::{Method, Proxy};
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// Body of an outgoing webhook request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Form(Vec<(String, String)>),
}

/// A fully expanded request, ready to send (and to resend on retry).
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

/// A successful (2xx) reply with its raw body.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Why a single attempt failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AttemptError {
    #[error("invalid request: {0}")]
    Build(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out")]
    Timeout,

    #[error("upstream returned HTTP {status}")]
    Status {
        status: u16,
        retry_after: Option<Duration>,
        body: Vec<u8>,
    },

    #[error("failed to read response body: {0}")]
    Body(String),
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &EngineConfig) -> Result<Self, TransportError> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .default_headers(default_headers)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .danger_accept_invalid_certs(!config.verify_tls);

        if let Some(proxy_url) = &config.proxy_url {
            let proxy = Proxy::all(proxy_url).map_err(|e| {
                TransportError::Other(format!("invalid proxy url '{}': {}", proxy_url, e))
            })?;
            builder = builder.proxy(proxy);
        }

        if !config.verify_tls {
            tracing::warn!("TLS certificate verification is disabled for webhook calls");
        }

        Ok(Self {
            client: builder.build()?,
        })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Issue one attempt. Non-2xx statuses are returned as [`AttemptError::Status`]
    /// with the body kept for the fallback output.
    pub async fn send(&self, request: &PreparedRequest) -> Result<HttpReply, AttemptError> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());

        for (name, value) in &request.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| AttemptError::Build(format!("header '{}': {}", name, e)))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| AttemptError::Build(format!("header '{}': {}", name, e)))?;
            builder = builder.header(header_name, header_value);
        }

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(body) => builder.json(body),
            RequestBody::Form(fields) => builder.form(fields),
        };

        let response = builder.send().await.map_err(classify)?;
        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AttemptError::Timeout
                } else {
                    AttemptError::Body(e.to_string())
                }
            })?
            .to_vec();

        if !status.is_success() {
            return Err(AttemptError::Status {
                status: status.as_u16(),
                retry_after,
                body,
            });
        }
        Ok(HttpReply {
            status: status.as_u16(),
            body,
        })
    }
}

fn classify(error: reqwest::Error) -> AttemptError {
    if error.is_timeout() {
        AttemptError::Timeout
    } else if error.is_builder() {
        AttemptError::Build(error.to_string())
    } else {
        AttemptError::Connect(error.to_string())
    }
}

/// `Retry-After` in delta-seconds form; HTTP dates are ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

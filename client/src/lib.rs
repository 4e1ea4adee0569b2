//! HTTP transport for virtual users
//!
//! [`HttpTargetClient`] implements [`TargetClient`] on top of a pooled
//! `reqwest` client. One client is shared by every virtual user of a worker,
//! so connections to the same target host are reused across requests.

#![warn(missing_docs)]
#![warn(clippy::all)]

use async_trait::async_trait;
use hammer_core::{TargetClient, TargetError, TestTarget};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Configuration
// ============================================================================

/// Connection pool and timeout settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Idle connection timeout
    #[serde(with = "humantime_serde")]
    pub pool_idle_timeout: Duration,

    /// Maximum idle connections per host
    pub pool_max_idle_per_host: usize,

    /// Whole-request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Connection timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// TCP keepalive interval
    #[serde(with = "humantime_serde")]
    pub tcp_keepalive: Option<Duration>,

    /// User agent string
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 64,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            tcp_keepalive: Some(Duration::from_secs(60)),
            user_agent: format!("hammer/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpConfig {
    /// Set the whole-request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the idle pool size per host
    pub fn with_pool_max_idle(mut self, max_idle: usize) -> Self {
        self.pool_max_idle_per_host = max_idle;
        self
    }
}

/// Failure to build the HTTP client
#[derive(Debug, thiserror::Error)]
pub enum HttpClientError {
    /// reqwest refused the configuration (TLS backend, user agent, ...)
    #[error("failed to build http client: {0}")]
    Build(#[from] reqwest::Error),
}

// ============================================================================
// Client
// ============================================================================

/// Pooled HTTP client issuing test target requests
#[derive(Debug, Clone)]
pub struct HttpTargetClient {
    client: Client,
    config: HttpConfig,
}

impl HttpTargetClient {
    /// Build a client from `config`
    pub fn new(config: HttpConfig) -> Result<Self, HttpClientError> {
        let mut builder = Client::builder()
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.as_str());

        if let Some(keepalive) = config.tcp_keepalive {
            builder = builder.tcp_keepalive(keepalive);
        }

        let client = builder.build()?;
        tracing::debug!(
            request_timeout = ?config.request_timeout,
            pool_max_idle_per_host = config.pool_max_idle_per_host,
            "HTTP target client ready"
        );

        Ok(Self { client, config })
    }

    /// Settings this client was built with
    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    fn map_error(&self, e: reqwest::Error) -> TargetError {
        if e.is_timeout() {
            TargetError::Timeout(self.config.request_timeout)
        } else if e.is_builder() {
            TargetError::InvalidRequest(e.to_string())
        } else {
            TargetError::Transport(e.to_string())
        }
    }
}

/// Method of a target; empty means GET
pub fn parse_method(method: &str) -> Result<Method, TargetError> {
    let method = method.trim();
    if method.is_empty() {
        return Ok(Method::GET);
    }
    Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|_| TargetError::InvalidRequest(format!("invalid method: {method}")))
}

/// Header map of a target, keeping every value of repeated headers
pub fn build_headers(target: &TestTarget) -> Result<HeaderMap, TargetError> {
    let mut headers = HeaderMap::new();
    let Some(source) = &target.headers else {
        return Ok(headers);
    };

    for (name, values) in source {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| TargetError::InvalidRequest(format!("invalid header name: {name}")))?;
        for value in values {
            let value = HeaderValue::from_str(value).map_err(|_| {
                TargetError::InvalidRequest(format!("invalid value for header {name}"))
            })?;
            headers.append(name.clone(), value);
        }
    }
    Ok(headers)
}

#[async_trait]
impl TargetClient for HttpTargetClient {
    fn client_name(&self) -> &str {
        "http"
    }

    async fn execute(&self, target: &TestTarget) -> Result<u16, TargetError> {
        let method = parse_method(&target.method)?;
        let mut request = self
            .client
            .request(method, target.uri.as_str())
            .headers(build_headers(target)?);
        if !target.body.is_empty() {
            request = request.body(target.body.clone());
        }

        let response = request.send().await.map_err(|e| self.map_error(e))?;
        Ok(response.status().as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Answers a single request with `status` and hands back the raw request head
    async fn serve_once(status: &'static str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
            }
            let response =
                format!("HTTP/1.1 {status}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = tx.send(String::from_utf8_lossy(&head).into_owned());
        });

        (format!("http://{addr}/ping"), rx)
    }

    #[test]
    fn test_parse_method() {
        assert_eq!(parse_method("").unwrap(), Method::GET);
        assert_eq!(parse_method("post").unwrap(), Method::POST);
        assert_eq!(parse_method(" DELETE ").unwrap(), Method::DELETE);
        assert!(matches!(
            parse_method("NOT A METHOD"),
            Err(TargetError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_build_headers_keeps_repeated_values() {
        let target = TestTarget::new("GET", "http://a/")
            .with_header("Accept", "text/plain")
            .with_header("Accept", "application/json")
            .with_header("X-Key", "secret");

        let headers = build_headers(&target).unwrap();
        assert_eq!(headers.get_all("accept").iter().count(), 2);
        assert_eq!(headers.get("x-key").unwrap(), "secret");

        let bad = TestTarget::new("GET", "http://a/").with_header("X-Key", "line\nbreak");
        assert!(matches!(
            build_headers(&bad),
            Err(TargetError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_config_serde_defaults() {
        let config: HttpConfig =
            serde_json::from_str(r#"{"request_timeout": "5s", "tcp_keepalive": null}"#).unwrap();
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.tcp_keepalive, None);
        assert_eq!(config.pool_max_idle_per_host, 64);
        assert!(config.user_agent.starts_with("hammer/"));
    }

    #[tokio::test]
    async fn test_execute_returns_status_code() {
        let (uri, head) = serve_once("418 I'm a teapot").await;
        let client = HttpTargetClient::new(HttpConfig::default()).unwrap();
        let target = TestTarget::new("", uri).with_header("X-Run", "7");

        let status = client.execute(&target).await.unwrap();
        assert_eq!(status, 418);

        let head = head.await.unwrap().to_ascii_lowercase();
        assert!(head.starts_with("get /ping "));
        assert!(head.contains("x-run: 7"));
        assert!(head.contains("user-agent: hammer/"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let client = HttpTargetClient::new(
            HttpConfig::default().with_connect_timeout(Duration::from_secs(1)),
        )
        .unwrap();
        let target = TestTarget::new("GET", "http://127.0.0.1:1/");

        assert!(matches!(
            client.execute(&target).await,
            Err(TargetError::Transport(_) | TargetError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_uri_is_rejected() {
        let client = HttpTargetClient::new(HttpConfig::default()).unwrap();
        let target = TestTarget::new("GET", "not a uri");

        assert!(matches!(
            client.execute(&target).await,
            Err(TargetError::InvalidRequest(_))
        ));
    }
}

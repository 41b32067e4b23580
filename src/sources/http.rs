//! Thin HTTP layer shared by the source clients.
//!
//! Wraps a `reqwest::Client` with a per-request timeout and maps every
//! failure onto [`SourceError`] so the clients only deal with one error type.

use crate::error::{SourceError, SourceResult};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE, USER_AGENT};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

const CLIENT_USER_AGENT: &str = concat!("dayreport/", env!("CARGO_PKG_VERSION"));

/// JSON-over-HTTP client owned by a single source.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
}

impl HttpClient {
    /// Build a client whose every request carries `headers` and times out
    /// after `timeout_secs`.
    pub fn new(timeout_secs: u64, extra_headers: &[(&'static str, &str)]) -> SourceResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));

        for (name, value) in extra_headers {
            let value = HeaderValue::from_str(value).map_err(|e| {
                SourceError::Configuration(format!("invalid value for header {}: {}", name, e))
            })?;
            headers.insert(HeaderName::from_static(name), value);
        }

        let inner = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| {
                SourceError::Configuration(format!("failed to create HTTP client: {}", e))
            })?;

        Ok(Self { inner })
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.inner.get(url)
    }

    pub fn post(&self, url: &str) -> RequestBuilder {
        self.inner.post(url)
    }

    /// Send `request` and decode a successful JSON body.
    pub async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> SourceResult<T> {
        let response = request.send().await.map_err(transport_error)?;

        let status = response.status();
        let url = response.url().to_string();
        debug!("{} {}", status.as_u16(), url);

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &url, body));
        }

        let bytes = response.bytes().await.map_err(transport_error)?;
        serde_json::from_slice(&bytes).map_err(|e| SourceError::Decode(format!("{}: {}", url, e)))
    }
}

/// Map a non-success status onto the error taxonomy.
pub fn status_error(status: StatusCode, url: &str, body: String) -> SourceError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SourceError::Authorization {
            status: status.as_u16(),
            url: url.to_string(),
        },
        StatusCode::NOT_FOUND => SourceError::NotFound(url.to_string()),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            SourceError::Transient(format!("{} from {}", status, url))
        }
        s if s.is_server_error() => SourceError::Transient(format!("{} from {}", status, url)),
        _ => SourceError::Rejected {
            status: status.as_u16(),
            body: truncate_body(body),
        },
    }
}

fn transport_error(e: reqwest::Error) -> SourceError {
    let url = e.url().map(|u| u.to_string()).unwrap_or_default();
    if e.is_timeout() {
        SourceError::Transient(format!("request to {} timed out", url))
    } else if e.is_connect() {
        SourceError::Transient(format!("cannot connect to {}", url))
    } else if e.is_decode() {
        SourceError::Decode(e.to_string())
    } else {
        SourceError::Transient(e.to_string())
    }
}

fn truncate_body(body: String) -> String {
    const MAX_BODY: usize = 300;
    if body.chars().count() > MAX_BODY {
        let mut short: String = body.chars().take(MAX_BODY).collect();
        short.push_str("...");
        short
    } else {
        body
    }
}

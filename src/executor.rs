use std::fmt;
use std::time::Duration;

use reqwest::header;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::sleep;

use crate::{
    decode::{decode_body, decode_value},
    ClientOptions, Fallback, Fetched, Method, OpsDeckError, RequestDescriptor, Result,
};

/// Credentials attached to every request in live mode.
#[derive(Clone, Default, PartialEq, Eq)]
pub enum Auth {
    #[default]
    None,
    /// Sent as `Authorization: Bearer <token>`.
    Bearer(String),
    /// Sent verbatim under a custom header such as `X-API-Key`.
    ApiKey { header: String, value: String },
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bearer(_) => f.write_str("Bearer(<redacted>)"),
            Self::ApiKey { header, .. } => f
                .debug_struct("ApiKey")
                .field("header", header)
                .field("value", &"<redacted>")
                .finish(),
        }
    }
}

impl Auth {
    /// Builds bearer credentials, adding the `Bearer ` prefix when missing.
    pub fn bearer(token: impl AsRef<str>) -> Self {
        Self::Bearer(normalize_bearer_authorization(token.as_ref()))
    }

    pub(crate) fn apply(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Self::None => builder,
            Self::Bearer(value) => builder.header(header::AUTHORIZATION, value),
            Self::ApiKey { header, value } => builder.header(header.as_str(), value),
        }
    }
}

#[derive(Clone)]
/// Executes [`RequestDescriptor`]s with timeout, classification and linear retry.
pub struct RequestExecutor {
    http: reqwest::Client,
    base_url: String,
    auth: Auth,
    options: ClientOptions,
}

impl fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("base_url", &self.base_url)
            .field("auth", &self.auth)
            .field("options", &self.options)
            .finish()
    }
}

impl RequestExecutor {
    /// Creates an executor for `base_url` without credentials.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            auth: Auth::None,
            options: ClientOptions::default(),
        }
    }

    /// Applies timeout and retry behavior.
    pub fn with_options(mut self, opts: ClientOptions) -> Self {
        self.options = opts;
        self
    }

    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = auth;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn auth(&self) -> &Auth {
        &self.auth
    }

    /// Executes a request, retrying transient failures.
    ///
    /// Retries happen only for timeouts, connect failures and the statuses
    /// 408, 429, 500, 502, 503 and 504; the delay before retry `n` is
    /// `retry_backoff_ms × n`. Other errors are returned after one attempt.
    ///
    /// When retries run out the result is [`OpsDeckError::ExhaustedRetries`],
    /// unless degraded mode is on and the request is a `GET`: then the caller
    /// receives [`Fetched::Degraded`] holding an empty sentinel instead of data.
    pub async fn execute(&self, request: &RequestDescriptor) -> Result<Fetched> {
        let mut attempt = 0usize;
        loop {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                method = %request.method,
                path = %request.path,
                attempt = attempt + 1,
                "sending request"
            );

            let err = match self.send_once(request).await {
                Ok(value) => return Ok(Fetched::Live(value)),
                Err(err) => err,
            };

            if !err.is_retryable() {
                return Err(err);
            }

            if attempt < self.options.max_retries {
                attempt += 1;
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "retrying {} {} ({}/{}): {}",
                    request.method,
                    request.path,
                    attempt,
                    self.options.max_retries,
                    err
                );
                self.wait_before_retry(attempt).await;
                continue;
            }

            let exhausted = OpsDeckError::ExhaustedRetries {
                attempts: attempt + 1,
                last: Box::new(err),
            };

            if self.options.degraded_fallback && request.method == Method::Get {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    path = %request.path,
                    "serving fallback data after failure: {}",
                    exhausted
                );
                return Ok(Fetched::Degraded(Fallback::new(format!(
                    "API unavailable - using fallback data: {exhausted}"
                ))));
            }

            return Err(exhausted);
        }
    }

    /// Executes a request and decodes a live body into `T`.
    pub async fn execute_json<T: DeserializeOwned>(
        &self,
        request: &RequestDescriptor,
    ) -> Result<Fetched<T>> {
        match self.execute(request).await? {
            Fetched::Live(value) => Ok(Fetched::Live(decode_value(value)?)),
            Fetched::Degraded(fallback) => Ok(Fetched::Degraded(fallback)),
        }
    }

    async fn send_once(&self, request: &RequestDescriptor) -> Result<Value> {
        let timeout = request
            .timeout
            .unwrap_or_else(|| Duration::from_millis(self.options.timeout_ms));

        let mut builder = self
            .http
            .request(request.method.as_reqwest(), request.url(&self.base_url))
            .timeout(timeout);
        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        if let Some(body) = &request.body {
            builder = builder
                .header(header::CONTENT_TYPE, "application/json")
                .json(body);
        }
        builder = self.auth.apply(builder);

        let response = builder.send().await.map_err(OpsDeckError::from_transport)?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(OpsDeckError::from_transport)?;

        if !status.is_success() {
            return Err(OpsDeckError::Http {
                status: status.as_u16(),
                body,
            });
        }

        decode_body(&body)
    }

    /// Waits before retry number `retry` (1-based).
    async fn wait_before_retry(&self, retry: usize) {
        sleep(retry_delay(self.options.retry_backoff_ms, retry)).await;
    }
}

/// Linear backoff: `base_ms × retry`.
pub(crate) fn retry_delay(base_ms: u64, retry: usize) -> Duration {
    let retry = u64::try_from(retry).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(retry))
}

fn normalize_bearer_authorization(token: &str) -> String {
    let trimmed = token.trim();
    let prefix = trimmed.get(..7);
    if prefix.is_some_and(|value| value.eq_ignore_ascii_case("bearer ")) {
        trimmed.to_owned()
    } else {
        format!("Bearer {trimmed}")
    }
}

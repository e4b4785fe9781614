/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum OpsDeckError {
    /// Connection or request execution error from `reqwest`.
    #[error("network error: {0}")]
    Network(reqwest::Error),
    /// The request did not complete within its timeout.
    #[error("request timed out: {0}")]
    Timeout(reqwest::Error),
    /// Non-success HTTP status code with raw response body.
    #[error("http error {status}: {body}")]
    Http { status: u16, body: String },
    /// A retryable failure persisted through every allowed attempt.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    ExhaustedRetries {
        /// Total number of attempts made, including the first one.
        attempts: usize,
        /// The failure observed on the final attempt.
        last: Box<OpsDeckError>,
    },
    /// Push channel could not be created or failed irrecoverably.
    #[error("channel error: {0}")]
    Channel(String),
    /// The subscription was already closed or replaced.
    #[error("subscription closed")]
    SubscriptionClosed,
    /// Response decoding error.
    #[error("decode error: {0}")]
    Decode(String),
    /// Invalid configuration value.
    #[error("config error: {0}")]
    Config(String),
}

const RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

impl OpsDeckError {
    pub(crate) fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err)
        } else {
            Self::Network(err)
        }
    }

    /// Whether the request executor may retry after this error.
    ///
    /// Timeouts, connect failures (refused, DNS) and the statuses
    /// 408, 429, 500, 502, 503 and 504 are transient; everything else is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Network(err) => err.is_connect() || err.is_timeout(),
            Self::Http { status, .. } => RETRYABLE_STATUSES.contains(status),
            _ => false,
        }
    }

    /// HTTP status carried by this error, looking through retry exhaustion.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::ExhaustedRetries { last, .. } => last.status(),
            _ => None,
        }
    }
}

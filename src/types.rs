use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Outcome of a request that may have been answered by the fallback path.
///
/// `Degraded` is only produced when [`crate::ClientOptions::degraded_fallback`]
/// is enabled and a `GET` exhausted its retries. Callers that render data
/// must check for it: the fallback carries no real data.
#[derive(Clone, Debug, PartialEq)]
pub enum Fetched<T = Value> {
    Live(T),
    Degraded(Fallback),
}

impl<T> Fetched<T> {
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded(_))
    }

    /// Returns the live value, discarding a fallback.
    pub fn live(self) -> Option<T> {
        match self {
            Self::Live(value) => Some(value),
            Self::Degraded(_) => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Fetched<U> {
        match self {
            Self::Live(value) => Fetched::Live(f(value)),
            Self::Degraded(fallback) => Fetched::Degraded(fallback),
        }
    }
}

/// Sentinel substituted for a failed read in degraded mode.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Fallback {
    pub success: bool,
    /// Description of the failure that triggered the fallback.
    pub error: String,
    /// Always an empty JSON array.
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl Fallback {
    pub(crate) fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            data: Value::Array(Vec::new()),
            timestamp: Utc::now(),
        }
    }
}
